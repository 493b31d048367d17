use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

// Requests set their own overall timeout; image generation can take minutes.
static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .user_agent(concat!("storybook_forge/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("Failed to build HTTP client")
});

pub fn get_http_client() -> &'static Client {
    &HTTP_CLIENT
}
