use crate::model::LlmError;
use crate::utils::preview;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Sends one request envelope and returns the raw response body of a 2xx reply.
#[async_trait::async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn send(&self, endpoint: &str, api_key: &str, body: &Value) -> Result<String, LlmError>;
}

pub struct HttpCompletionTransport {
    client: Client,
}

impl HttpCompletionTransport {
    pub fn new(timeout: Duration) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::NotConfigured(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl CompletionTransport for HttpCompletionTransport {
    async fn send(&self, endpoint: &str, api_key: &str, body: &Value) -> Result<String, LlmError> {
        debug!(%endpoint, "Sending LLM request");

        let mut request = self.client.post(endpoint).json(body);
        if !api_key.is_empty() {
            request = request.bearer_auth(api_key);
        }
        let response = request.send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::HttpStatus {
                status: status.as_u16(),
                body: preview(&text, 300),
            });
        }
        Ok(text)
    }
}
