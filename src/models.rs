//! Data models and structures
//!
//! Defines the core data structures for entitlement records, generation
//! requests/results, and runtime configuration.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Per-user entitlement record: subscription expiry, trial usage, and the
/// per-day / per-month image counters.
///
/// Counter resets are lazy: a counter is authoritative only after being
/// re-evaluated against the current date/period by the ledger. Records are
/// created zero-valued on first access and never deleted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserEntitlement {
    #[serde(default)]
    pub subscription_end: Option<DateTime<Local>>,
    #[serde(default)]
    pub free_trial_used: u32,
    #[serde(default)]
    pub image_trial_used: u32,
    /// Set on the very first trial consumption. Consumed by reminder flows
    /// outside this crate.
    #[serde(default)]
    pub first_use_time: Option<DateTime<Local>>,
    /// `YYYY-MM-DD` key the daily counter was last rolled against.
    #[serde(default)]
    pub image_daily_date: Option<String>,
    #[serde(default)]
    pub image_daily_count: u32,
    /// `YYYY-MM` key the monthly counter was last rolled against.
    #[serde(default)]
    pub image_monthly_period: Option<String>,
    #[serde(default)]
    pub image_monthly_count: u32,
    /// Last model the user explicitly picked.
    #[serde(default)]
    pub preferred_model: Option<String>,
}

/// One generation request from the surrounding application. Ephemeral,
/// never persisted.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub user_id: i64,
    pub prompt: String,
    pub requested_model: Option<String>,
    pub is_image_edit: bool,
    pub source_image: Option<Vec<u8>>,
}

impl GenerationRequest {
    pub fn new(user_id: i64, prompt: impl Into<String>) -> Self {
        Self {
            user_id,
            prompt: prompt.into(),
            requested_model: None,
            is_image_edit: false,
            source_image: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.requested_model = Some(model.into());
        self
    }

    pub fn as_image_edit(mut self, source_image: Option<Vec<u8>>) -> Self {
        self.is_image_edit = true;
        self.source_image = source_image;
        self
    }
}

/// Generated content: either raw image bytes or a ready-to-display URL.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Bytes(Vec<u8>),
    Url(String),
}

/// What the dispatcher hands back to the surrounding application.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub success: bool,
    pub payload: Option<Payload>,
    pub error_message: Option<String>,
    pub model_used: Option<String>,
}

impl GenerationResult {
    pub fn succeeded(payload: Payload, model: impl Into<String>) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error_message: None,
            model_used: Some(model.into()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: None,
            error_message: Some(message.into()),
            model_used: None,
        }
    }
}

/// Outcome of a quota check: allowed, or denied with a user-facing message
/// naming the specific ceiling.
#[derive(Debug, Clone)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub denial_message: Option<String>,
}

impl QuotaDecision {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            denial_message: None,
        }
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            denial_message: Some(message.into()),
        }
    }
}

// Configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Chat/vision endpoint used by the content guard.
    pub api_url: String,
    /// Paid image generation endpoint.
    pub image_api_url: String,
    /// Free-tier image endpoint (primary mirror).
    pub free_image_api_url: String,
    /// Bearer token for the paid endpoints. Empty means free tier only.
    pub api_bearer_token: String,
    /// Vision model used by the content guard.
    pub guard_model: String,
    /// User ids that bypass every quota check.
    pub admin_ids: Vec<i64>,
    /// Directory for per-user entitlement records.
    pub data_dir: std::path::PathBuf,
    /// Operator-editable config file (enabled model list). Re-read on every
    /// dispatch so operator toggles take effect immediately.
    pub operator_config_path: std::path::PathBuf,
    pub free_trial_limit: u32,
    pub image_daily_limit_pro: u32,
    pub image_monthly_limit_pro: u32,
}

impl Config {
    pub fn from_env() -> crate::Result<Self> {
        dotenvy::dotenv().ok();

        let admin_ids = std::env::var("ADMIN_IDS")
            .unwrap_or_default()
            .split(',')
            .filter_map(|part| part.trim().parse::<i64>().ok())
            .collect();

        Ok(Self {
            api_url: std::env::var("API_URL")
                .unwrap_or_else(|_| "http://api.onlysq.ru/ai/v2".to_string()),
            image_api_url: std::env::var("IMAGE_API_URL")
                .unwrap_or_else(|_| "https://api.onlysq.ru/ai/imagen".to_string()),
            free_image_api_url: std::env::var("FREE_IMAGE_API_URL")
                .unwrap_or_else(|_| "https://image.pollinations.ai/prompt".to_string()),
            api_bearer_token: std::env::var("API_BEARER_TOKEN").unwrap_or_default(),
            guard_model: std::env::var("GUARD_MODEL")
                .unwrap_or_else(|_| "gemini-3-flash".to_string()),
            admin_ids,
            data_dir: std::env::var("DATA_DIR")
                .unwrap_or_else(|_| "users".to_string())
                .into(),
            operator_config_path: std::env::var("BOT_CONFIG_PATH")
                .unwrap_or_else(|_| "config.json".to_string())
                .into(),
            free_trial_limit: env_limit("FREE_TRIAL_LIMIT", 5),
            image_daily_limit_pro: env_limit("IMAGE_DAILY_LIMIT_PRO", 20),
            image_monthly_limit_pro: env_limit("IMAGE_MONTHLY_LIMIT_PRO", 300),
        })
    }
}

fn env_limit(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
