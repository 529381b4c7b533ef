// ABOUTME: Health probing seam for dev servers
// ABOUTME: HttpHealthProbe treats any HTTP response below 500 as a live server

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Whether the server behind `url` answers
    async fn check(&self, url: &str) -> bool;
}

pub struct HttpHealthProbe {
    client: Client,
}

impl HttpHealthProbe {
    pub fn new(request_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }
}

impl Default for HttpHealthProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                debug!("Health probe to {} failed: {}", url, e);
                false
            }
        }
    }
}
