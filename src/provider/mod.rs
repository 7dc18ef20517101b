//! Image provider clients and outcome classification.
//!
//! A provider call never "just fails": every result is classified so the
//! dispatcher knows whether to retry the same model, switch to the next one,
//! or abort the whole request.

pub mod free;
pub mod mock;
pub mod paid;

pub use free::FreeImageClient;
pub use mock::MockImageProvider;
pub use paid::PaidImageClient;

use crate::models::Payload;
use crate::Result;
use async_trait::async_trait;

/// Transient HTTP statuses worth retrying: rate limiting, server errors,
/// gateway timeouts.
pub const RETRYABLE_STATUSES: &[u16] = &[429, 500, 502, 503, 504, 520, 522, 524, 530];

/// Body phrases that mark a provider as saturated (further retries on the
/// same provider are futile).
const SATURATION_PHRASES: &[&str] = &["rate limit", "credits", "spending limit", "bad argument"];

pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

/// Classified result of one provider call.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success(Payload),
    /// Transient condition: same-model retry is reasonable unless the
    /// outcome classifies as saturated.
    Retryable {
        status: Option<u16>,
        message: String,
    },
    /// Credentials/configuration problem or malformed response. Must not be
    /// retried or switched; surfaces directly to the caller.
    Fatal(String),
    /// HTTP 200 with no usable payload.
    Empty,
}

impl Outcome {
    pub fn retryable(status: Option<u16>, message: impl Into<String>) -> Self {
        Outcome::Retryable {
            status,
            message: message.into(),
        }
    }

    /// Rate limit / exhausted credits: skip to the next model in the plan
    /// instead of busy-retrying this one.
    pub fn is_saturated(&self) -> bool {
        match self {
            Outcome::Retryable { status, message } => {
                if *status == Some(429) {
                    return true;
                }
                let message = message.to_lowercase();
                SATURATION_PHRASES.iter().any(|p| message.contains(p))
            }
            _ => false,
        }
    }

    /// User-facing message for the failure outcomes.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Retryable { status, message } => Some(match status {
                Some(status) => format!("Image API error ({}): {}", status, message),
                None => message.clone(),
            }),
            Outcome::Fatal(message) => Some(message.clone()),
            Outcome::Empty => Some("Image API returned no image.".to_string()),
        }
    }
}

/// One generation call against one provider/model.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn invoke(&self, model: &str, prompt: &str) -> Result<Outcome>;
}
