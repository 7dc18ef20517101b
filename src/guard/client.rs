use super::{ContentGuard, GuardVerdict};
use crate::prompts;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(40);

#[derive(Debug, Serialize)]
struct GuardRequest<'a> {
    model: &'a str,
    request: GuardRequestInner<'a>,
}

#[derive(Debug, Serialize)]
struct GuardRequestInner<'a> {
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: MessageContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<Part>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum Part {
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
    #[serde(rename = "text")]
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct GuardResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnimalDetection {
    contains_animal: bool,
}

/// Vision-backed guard client. Sends the image plus a strict JSON-only
/// instruction and parses a single boolean field from the answer.
pub struct VisionGuardClient {
    client: Client,
    endpoint: String,
    bearer_token: String,
    model: String,
}

impl VisionGuardClient {
    pub fn new(endpoint: String, bearer_token: String, model: String) -> Self {
        Self::new_with_client(endpoint, bearer_token, model, Client::new())
    }

    pub fn new_with_client(
        endpoint: String,
        bearer_token: String,
        model: String,
        client: Client,
    ) -> Self {
        Self {
            client,
            endpoint,
            bearer_token,
            model,
        }
    }

    fn parse_verdict(content: &str) -> GuardVerdict {
        if let Ok(detection) = serde_json::from_str::<AnimalDetection>(content) {
            return if detection.contains_animal {
                GuardVerdict::Present
            } else {
                GuardVerdict::Absent
            };
        }

        // Models occasionally wrap the JSON in prose or code fences; a
        // substring scan still recovers the answer.
        let lowered = content.to_lowercase();
        if lowered.contains("\"contains_animal\": true") {
            GuardVerdict::Present
        } else if lowered.contains("\"contains_animal\": false") {
            GuardVerdict::Absent
        } else {
            GuardVerdict::Undetermined
        }
    }
}

#[async_trait]
impl ContentGuard for VisionGuardClient {
    async fn check(&self, image_bytes: &[u8]) -> GuardVerdict {
        if self.bearer_token.is_empty() || image_bytes.is_empty() {
            return GuardVerdict::Undetermined;
        }

        debug!("Validating image content ({} bytes)", image_bytes.len());

        use base64::Engine as _;
        let encoded = base64::engine::general_purpose::STANDARD.encode(image_bytes);

        let request = GuardRequest {
            model: &self.model,
            request: GuardRequestInner {
                messages: vec![
                    Message {
                        role: "system",
                        content: MessageContent::Text(prompts::GUARD_SYSTEM.trim_end()),
                    },
                    Message {
                        role: "user",
                        content: MessageContent::Parts(vec![
                            Part::ImageUrl {
                                image_url: ImageUrl {
                                    url: format!("data:image/jpeg;base64,{}", encoded),
                                },
                            },
                            Part::Text {
                                text: prompts::GUARD_USER.trim_end().to_string(),
                            },
                        ]),
                    },
                ],
            },
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
                warn!("Image validation skipped: {}", e);
                return GuardVerdict::Undetermined;
            }
        };

        if !response.status().is_success() {
            warn!(
                status = response.status().as_u16(),
                "Image validation skipped: guard endpoint error"
            );
            return GuardVerdict::Undetermined;
        }

        let body: GuardResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Image validation skipped: unparsable response: {}", e);
                return GuardVerdict::Undetermined;
            }
        };

        let content = body
            .choices
            .first()
            .map(|choice| match &choice.message.content {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();

        Self::parse_verdict(&content)
    }
}
