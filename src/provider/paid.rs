use super::{ImageProvider, Outcome};
use crate::models::Payload;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);
const BODY_SNIPPET_LEN: usize = 500;

#[derive(Debug, Serialize)]
struct PaidImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
}

#[derive(Debug, Deserialize)]
struct PaidImageResponse {
    #[serde(default)]
    files: Vec<String>,
}

/// Synchronous JSON client for the paid image endpoint: one POST, one
/// base64 payload back.
pub struct PaidImageClient {
    client: Client,
    endpoint: String,
    bearer_token: String,
}

impl PaidImageClient {
    pub fn new(endpoint: String, bearer_token: String) -> Self {
        Self::new_with_client(endpoint, bearer_token, Client::new())
    }

    pub fn new_with_client(endpoint: String, bearer_token: String, client: Client) -> Self {
        Self {
            client,
            endpoint,
            bearer_token,
        }
    }
}

#[async_trait]
impl ImageProvider for PaidImageClient {
    async fn invoke(&self, model: &str, prompt: &str) -> Result<Outcome> {
        if self.bearer_token.is_empty() {
            return Ok(Outcome::Fatal(
                "API_BEARER_TOKEN is not configured for paid image models.".to_string(),
            ));
        }

        tracing::debug!(model, "Sending paid image generation request");

        let request = PaidImageRequest {
            model,
            prompt,
            n: 1,
        };

        let response = match self
            .client
            .post(&self.endpoint)
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(&self.bearer_token)
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                // Connection failures and timeouts are transient by
                // definition.
                warn!(model, "Paid image request failed: {}", e);
                return Ok(Outcome::retryable(None, format!("Request failed: {}", e)));
            }
        };

        let status = response.status();
        if status.as_u16() == 401 {
            return Ok(Outcome::Fatal(
                "Image API rejected credentials (401): check API_BEARER_TOKEN.".to_string(),
            ));
        }

        if !status.is_success() {
            let body: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(BODY_SNIPPET_LEN)
                .collect();
            warn!(model, status = status.as_u16(), "Image API error: {}", body);
            // Non-retryable statuses still flow through as retryable so the
            // saturation phrases in the body ("bad argument" on 400) can
            // classify and trigger a model switch.
            return Ok(Outcome::retryable(Some(status.as_u16()), body));
        }

        let payload: PaidImageResponse = match response.json().await {
            Ok(payload) => payload,
            Err(e) => {
                return Ok(Outcome::Fatal(format!(
                    "Malformed image API response: {}",
                    e
                )))
            }
        };

        let Some(encoded) = payload.files.first() else {
            return Ok(Outcome::Empty);
        };

        use base64::Engine as _;
        match base64::engine::general_purpose::STANDARD.decode(encoded) {
            Ok(bytes) if !bytes.is_empty() => Ok(Outcome::Success(Payload::Bytes(bytes))),
            Ok(_) => Ok(Outcome::Empty),
            Err(e) => Ok(Outcome::Fatal(format!(
                "Failed to decode base64 image: {}",
                e
            ))),
        }
    }
}
