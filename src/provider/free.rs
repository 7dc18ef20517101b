use super::{is_retryable_status, ImageProvider, Outcome};
use crate::models::Payload;
use crate::prompts::sanitize_user_input;
use crate::Result;
use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use std::time::Duration;
use tracing::warn;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);
const SECONDARY_MIRROR: &str = "https://pollinations.ai/p";
const MAX_PROMPT_LEN: usize = 800;
const BODY_SNIPPET_LEN: usize = 500;

/// Query-parameter variants tried in order on each mirror. The free API is
/// unstable enough that switching the internal model and nudging parameters
/// often succeeds where a plain retry does not.
const ATTEMPT_PARAMS: &[&[(&str, &str)]] = &[
    &[
        ("model", "flux"),
        ("nologo", "true"),
        ("width", "1024"),
        ("height", "1024"),
    ],
    &[
        ("model", "flux"),
        ("nologo", "true"),
        ("width", "1024"),
        ("height", "1024"),
        ("enhance", "true"),
    ],
    &[
        ("model", "turbo"),
        ("nologo", "true"),
        ("width", "1024"),
        ("height", "1024"),
    ],
];

/// Short increasing backoff between attempts on one mirror.
fn backoff_delay(attempt_index: usize) -> Duration {
    Duration::from_millis(1200 + 800 * attempt_index as u64)
}

/// GET-based client for the free image tier: multiple mirror hosts,
/// parameter variants, and a fresh randomized seed per attempt so mirror
/// caches never collide.
pub struct FreeImageClient {
    client: Client,
    mirrors: Vec<String>,
    use_backoff: bool,
}

impl FreeImageClient {
    pub fn new(base_url: String) -> Self {
        Self::new_with_client(base_url, Client::new())
    }

    pub fn new_with_client(base_url: String, client: Client) -> Self {
        Self {
            client,
            mirrors: vec![base_url, SECONDARY_MIRROR.to_string()],
            use_backoff: true,
        }
    }

    #[cfg(test)]
    fn with_mirrors(mut self, mirrors: Vec<String>) -> Self {
        self.mirrors = mirrors;
        self
    }

    #[cfg(test)]
    fn without_backoff(mut self) -> Self {
        self.use_backoff = false;
        self
    }

    fn build_url(mirror: &str, prompt: &str, params: &[(&str, &str)], seed: u32) -> Result<Url> {
        let mut url = Url::parse(mirror)
            .map_err(|e| crate::Error::Configuration(format!("Invalid mirror URL {}: {}", mirror, e)))?;
        url.path_segments_mut()
            .map_err(|_| crate::Error::Configuration(format!("Invalid mirror URL {}", mirror)))?
            .push(prompt);
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                query.append_pair(key, value);
            }
            query.append_pair("seed", &seed.to_string());
        }
        Ok(url)
    }
}

#[async_trait]
impl ImageProvider for FreeImageClient {
    async fn invoke(&self, _model: &str, prompt: &str) -> Result<Outcome> {
        let prompt = sanitize_user_input(prompt, MAX_PROMPT_LEN);
        if prompt.is_empty() {
            return Ok(Outcome::Fatal("Empty prompt for image generation.".to_string()));
        }

        // 0 marks a transport error, 200 an empty body.
        let mut last_status: Option<u16> = None;
        let mut last_message = String::new();

        for mirror in &self.mirrors {
            for (i, params) in ATTEMPT_PARAMS.iter().enumerate() {
                let seed = rand::thread_rng().gen_range(1..10_000_000);
                let url = Self::build_url(mirror, &prompt, params, seed)?;

                match self.client.get(url).timeout(REQUEST_TIMEOUT).send().await {
                    Ok(response) if response.status().is_success() => {
                        match response.bytes().await {
                            Ok(bytes) if !bytes.is_empty() => {
                                return Ok(Outcome::Success(Payload::Bytes(bytes.to_vec())));
                            }
                            _ => {
                                last_status = Some(200);
                                last_message = "empty body".to_string();
                            }
                        }
                    }
                    Ok(response) => {
                        let status = response.status().as_u16();
                        let body: String = response
                            .text()
                            .await
                            .unwrap_or_default()
                            .chars()
                            .take(BODY_SNIPPET_LEN)
                            .collect();
                        warn!(
                            mirror,
                            status,
                            attempt = i + 1,
                            "Free image API error: {}",
                            body
                        );
                        last_status = Some(status);
                        last_message = body;
                    }
                    Err(e) => {
                        warn!(mirror, attempt = i + 1, "Free image API request failed: {}", e);
                        last_status = Some(0);
                        last_message = e.to_string();
                    }
                }

                // Retry on this mirror only for transient conditions; a
                // definite status like 404 moves straight to the next
                // mirror.
                let transient = matches!(last_status, Some(0) | Some(200))
                    || matches!(last_status, Some(status) if is_retryable_status(status));
                if i < ATTEMPT_PARAMS.len() - 1 && transient {
                    if self.use_backoff {
                        tokio::time::sleep(backoff_delay(i)).await;
                    }
                    continue;
                }
                break;
            }
        }

        Ok(match last_status {
            Some(200) => Outcome::Empty,
            Some(0) | None => Outcome::retryable(
                None,
                format!("Free image API unreachable: {}", last_message),
            ),
            Some(status) if is_retryable_status(status) => Outcome::retryable(
                Some(status),
                "Free image API is temporarily overloaded. Try again in 10-30 seconds.",
            ),
            Some(status) => Outcome::retryable(Some(status), last_message),
        })
    }
}
