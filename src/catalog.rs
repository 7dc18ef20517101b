//! Static model catalog and the operator-controlled enabled set.
//!
//! The registry itself is code-defined. Which models are actually offered is
//! operator configuration, re-read from disk on every decision so toggles in
//! the admin panel take effect without a restart.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Free-tier image model served by the mirror-based GET provider.
pub const FREE_IMAGE_MODEL: &str = "pollinations-flux-free";

/// Every model id the product knows about, text and image alike.
pub const AVAILABLE_MODELS: &[&str] = &[
    // Text models (dispatching them is outside this crate, but the operator
    // config toggles them through the same list).
    "gpt-5.2-chat",
    "deepseek-v3",
    "deepseek-r1",
    "gemini-3-flash",
    "grok-2-vision",
    "grok-3",
    "sonar-pro",
    "sonar",
    "llama-3.3-70b",
    "qwen-3-32b",
    // Image models.
    "p-flux",
    "grok-2-image",
    "flux-2-dev",
    "phoenix-1.0",
    "lucid-origin",
    "flux",
    FREE_IMAGE_MODEL,
];

pub const IMAGE_MODELS: &[&str] = &[
    "p-flux",
    "grok-2-image",
    "flux-2-dev",
    "phoenix-1.0",
    "lucid-origin",
    "flux",
    FREE_IMAGE_MODEL,
];

/// Hard-coded fallback when the operator config is empty or nonsense.
pub const DEFAULT_ENABLED_MODELS: &[&str] = &[
    "gpt-5.2-chat",
    "deepseek-v3",
    "deepseek-r1",
    "gemini-3-flash",
    "flux",
];

/// Priority order used to auto-append an image model when the enabled set
/// would otherwise contain none.
pub const IMAGE_FALLBACK_PRIORITY: &[&str] = &[
    "flux",
    "flux-2-dev",
    "grok-2-image",
    "phoenix-1.0",
    "lucid-origin",
    FREE_IMAGE_MODEL,
];

pub fn is_known_model(id: &str) -> bool {
    AVAILABLE_MODELS.contains(&id)
}

pub fn is_image_model(id: &str) -> bool {
    IMAGE_MODELS.contains(&id)
}

/// Operator-editable configuration, stored as JSON next to the bot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatorConfig {
    #[serde(default)]
    pub enabled_models: Option<Vec<String>>,
}

impl OperatorConfig {
    /// Load the operator config fresh from disk. A missing or unreadable
    /// file is not an error: the defaults apply until the operator writes
    /// one.
    pub async fn load(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Invalid operator config at {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}

/// Resolve the currently enabled model list.
///
/// The operator list is intersected with the static registry; an empty
/// intersection falls back to the defaults. The result always contains at
/// least one image model, and always contains the free model when no paid
/// API token is configured.
pub fn enabled_models(operator: &OperatorConfig, has_api_token: bool) -> Vec<String> {
    let raw: Vec<String> = operator
        .enabled_models
        .clone()
        .unwrap_or_else(|| DEFAULT_ENABLED_MODELS.iter().map(|m| m.to_string()).collect());

    let mut enabled: Vec<String> = raw.into_iter().filter(|m| is_known_model(m)).collect();
    if enabled.is_empty() {
        enabled = DEFAULT_ENABLED_MODELS.iter().map(|m| m.to_string()).collect();
    }

    // The selection policy must never be handed a list with zero usable
    // image models.
    if !enabled.iter().any(|m| is_image_model(m)) {
        if let Some(candidate) = IMAGE_FALLBACK_PRIORITY
            .iter()
            .find(|c| is_known_model(c) && !enabled.iter().any(|m| m == *c))
        {
            enabled.push(candidate.to_string());
        }
    }

    if !has_api_token && !enabled.iter().any(|m| m == FREE_IMAGE_MODEL) {
        enabled.push(FREE_IMAGE_MODEL.to_string());
    }

    enabled
}
