use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

/// Global HTTP client with connection pooling and keep-alive.
static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    builder(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| Client::new())
});

fn builder(timeout: Duration) -> reqwest::ClientBuilder {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(5))
        .pool_max_idle_per_host(50)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(30))
        .user_agent(concat!("chatnest/", env!("CARGO_PKG_VERSION")))
}

/// Get the global HTTP client.
pub fn client() -> &'static Client {
    &HTTP_CLIENT
}

/// Build a dedicated client with its own request timeout.
pub fn client_with_timeout(timeout: Duration) -> Result<Client, reqwest::Error> {
    builder(timeout).build()
}
