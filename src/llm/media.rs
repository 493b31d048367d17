use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Value};

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    if data.len() > 12 {
        let ftyp = &data[4..12];
        if ftyp.starts_with(b"ftyp") {
            let brand = &ftyp[4..8];
            if brand == b"heic" || brand == b"heif" || brand == b"hevc" {
                return Some("image/heic".to_string());
            }
        }
    }

    infer::get(data).map(|kind| kind.mime_type().to_string())
}

pub fn normalize_image_mime_type(mime_type: &str) -> String {
    let lowered = mime_type.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        "image/x-png" => "image/png".to_string(),
        _ => lowered,
    }
}

pub fn gemini_supports_image_mime(mime_type: &str) -> bool {
    matches!(
        mime_type,
        "image/png" | "image/jpeg" | "image/webp" | "image/heic" | "image/heif"
    )
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match normalize_image_mime_type(mime_type).as_str() {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/heic" | "image/heif" => "heic",
        _ => "png",
    }
}

/// A user-supplied photo of the protagonist.
#[derive(Debug, Clone)]
pub struct ReferenceImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ReferenceImage {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// Builds a reference from raw bytes alone, sniffing the media type.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let mime_type = detect_mime_type(&bytes).unwrap_or_else(|| "image/png".to_string());
        Self { bytes, mime_type }
    }

    /// The media type sent to Gemini: the declared one when Gemini accepts
    /// it, otherwise whatever the bytes look like, otherwise PNG.
    pub fn gemini_mime_type(&self) -> String {
        let declared = normalize_image_mime_type(&self.mime_type);
        if gemini_supports_image_mime(&declared) {
            return declared;
        }
        detect_mime_type(&self.bytes)
            .map(|detected| normalize_image_mime_type(&detected))
            .filter(|detected| gemini_supports_image_mime(detected))
            .unwrap_or_else(|| "image/png".to_string())
    }

    pub fn to_inline_part(&self) -> Value {
        json!({
            "inlineData": {
                "mimeType": self.gemini_mime_type(),
                "data": general_purpose::STANDARD.encode(&self.bytes)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52,
    ];

    #[test]
    fn jpg_alias_is_normalized() {
        let image = ReferenceImage::new(vec![1, 2, 3], "image/JPG");
        assert_eq!(image.gemini_mime_type(), "image/jpeg");
    }

    #[test]
    fn unsupported_declared_type_falls_back_to_sniffed_type() {
        let image = ReferenceImage::new(PNG_HEADER.to_vec(), "application/octet-stream");
        assert_eq!(image.gemini_mime_type(), "image/png");
    }

    #[test]
    fn inline_part_carries_base64_payload() {
        let image = ReferenceImage::new(b"abc".to_vec(), "image/webp");
        let part = image.to_inline_part();
        assert_eq!(part["inlineData"]["mimeType"], "image/webp");
        assert_eq!(part["inlineData"]["data"], "YWJj");
    }

    #[test]
    fn extensions_follow_mime_type() {
        assert_eq!(extension_for_mime("image/jpg"), "jpg");
        assert_eq!(extension_for_mime("image/png"), "png");
        assert_eq!(extension_for_mime("application/octet-stream"), "png");
    }
}
