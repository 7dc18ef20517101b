//! Dispatch orchestration: entitlement gating, model planning, provider
//! calls with retry/fallback, and the content-guard loop.

use crate::catalog::{self, OperatorConfig, FREE_IMAGE_MODEL};
use crate::guard::{ContentGuard, GuardVerdict, VisionGuardClient};
use crate::ledger::Ledger;
use crate::models::{Config, GenerationRequest, GenerationResult, Payload, QuotaDecision};
use crate::policy;
use crate::prompts;
use crate::provider::{FreeImageClient, ImageProvider, Outcome, PaidImageClient};
use crate::store::{EntitlementStore, JsonFileStore};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Attempt budget per model before moving to the next candidate.
pub const MAX_ATTEMPTS_PER_MODEL: u32 = 3;

const EXTRA_OBJECTS_ERROR: &str =
    "The model keeps adding extra objects. Try refining your prompt.";

/// Injectable service bundle used to construct [`Dispatcher`] in
/// tests/harnesses.
pub struct DispatcherServices {
    pub store: Arc<dyn EntitlementStore>,
    pub paid_provider: Box<dyn ImageProvider>,
    pub free_provider: Box<dyn ImageProvider>,
    pub guard: Box<dyn ContentGuard>,
}

/// What one walk over the model plan produced.
enum PlanOutcome {
    Delivered { payload: Payload, model: String },
    Exhausted { last_error: String },
}

/// Composes the entitlement ledger, the model catalog/policy, the provider
/// clients, and the content guard into the end-to-end request flow.
pub struct Dispatcher {
    ledger: Ledger,
    paid: Box<dyn ImageProvider>,
    free: Box<dyn ImageProvider>,
    guard: Box<dyn ContentGuard>,
    config: Config,
}

impl Dispatcher {
    /// Build a dispatcher from concrete service dependencies.
    ///
    /// This is primarily useful for integration tests and local harnesses
    /// that need to inject mocks.
    pub fn with_services(services: DispatcherServices, config: Config) -> Self {
        Self {
            ledger: Ledger::from_config(services.store, &config),
            paid: services.paid_provider,
            free: services.free_provider,
            guard: services.guard,
            config,
        }
    }

    /// Construct a dispatcher from environment configuration
    /// (`Config::from_env`).
    pub fn new() -> Result<Self> {
        let config = Config::from_env()?;

        // Reuse one HTTP connection pool across provider clients.
        let http_client = reqwest::Client::new();

        let store: Arc<dyn EntitlementStore> =
            Arc::new(JsonFileStore::new(config.data_dir.clone()));
        let paid: Box<dyn ImageProvider> = Box::new(PaidImageClient::new_with_client(
            config.image_api_url.clone(),
            config.api_bearer_token.clone(),
            http_client.clone(),
        ));
        let free: Box<dyn ImageProvider> = Box::new(FreeImageClient::new_with_client(
            config.free_image_api_url.clone(),
            http_client.clone(),
        ));
        let guard: Box<dyn ContentGuard> = Box::new(VisionGuardClient::new_with_client(
            config.api_url.clone(),
            config.api_bearer_token.clone(),
            config.guard_model.clone(),
            http_client,
        ));

        Ok(Self::with_services(
            DispatcherServices {
                store,
                paid_provider: paid,
                free_provider: free,
                guard,
            },
            config,
        ))
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Quota gate exposed to the surrounding application: called before
    /// offering a generation affordance, and again right before charging a
    /// free-trial unit. Never charges the image quota itself; the single
    /// per-generation charge happens inside [`Dispatcher::request_generation`].
    pub async fn check_and_consume_quota(
        &self,
        user_id: i64,
        is_image: bool,
    ) -> Result<QuotaDecision> {
        if is_image {
            return self.ledger.check_image_quota(user_id).await;
        }
        if self.ledger.can_make_request(user_id).await? {
            Ok(QuotaDecision::allowed())
        } else {
            Ok(QuotaDecision::denied(self.ledger.paywall_message()))
        }
    }

    fn provider_for(&self, model: &str) -> &dyn ImageProvider {
        if model == FREE_IMAGE_MODEL {
            self.free.as_ref()
        } else {
            self.paid.as_ref()
        }
    }

    /// End-to-end image generation for one request.
    ///
    /// Only configuration failures propagate as `Err`; every recoverable
    /// condition ends in an `Ok` result whose `error_message` explains the
    /// final state to the user.
    pub async fn request_generation(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResult> {
        let request_id = Uuid::new_v4();
        let user_id = request.user_id;

        info!(%request_id, user_id, "Dispatching image generation request");

        if prompts::sanitize_user_input(&request.prompt, 1500).is_empty() {
            return Ok(GenerationResult::failed("Empty prompt for image generation."));
        }

        // Subscriber image quota is charged here, before any provider call.
        // Trial units are charged only after a delivered success below.
        let quota = self.ledger.try_consume_image_quota(user_id).await?;
        if !quota.allowed {
            let message = quota
                .denial_message
                .unwrap_or_else(|| "Image generation is not available.".to_string());
            info!(%request_id, user_id, "Quota denied: {}", message);
            return Ok(GenerationResult::failed(message));
        }

        // Operator config is re-read on every dispatch so admin toggles
        // apply without a restart.
        let operator = OperatorConfig::load(&self.config.operator_config_path).await;
        let enabled =
            catalog::enabled_models(&operator, !self.config.api_bearer_token.is_empty());

        let preferred = self.ledger.preferred_model(user_id).await?;
        let plan = policy::build_model_plan(
            &request.prompt,
            request.requested_model.as_deref(),
            preferred.as_deref(),
            &enabled,
        );
        if plan.is_empty() {
            return Err(Error::Configuration(
                "No image-capable model is enabled.".to_string(),
            ));
        }

        let animal_allowed = policy::prompt_requests_animal(&request.prompt);
        let base_prompt = if request.is_image_edit {
            prompts::photo_edit_prompt(&request.prompt, None)
        } else {
            prompts::literal_scene_prompt(&request.prompt, animal_allowed)
        };
        if let Some(source) = &request.source_image {
            // Providers are text-to-image: edit requests are served by
            // regeneration from the instruction, the source stays local.
            tracing::debug!(%request_id, source_bytes = source.len(), "Edit request with source image");
        }

        info!(%request_id, ?plan, animal_allowed, "Built model plan");

        match self
            .run_model_plan(request_id, &plan, &base_prompt, animal_allowed)
            .await?
        {
            PlanOutcome::Delivered { payload, model } => {
                if !self.ledger.is_admin(user_id)
                    && !self.ledger.has_active_subscription(user_id).await?
                {
                    self.ledger.consume_free_trial(user_id, true).await?;
                }
                info!(%request_id, user_id, model, "Generation delivered");
                Ok(GenerationResult::succeeded(payload, model))
            }
            PlanOutcome::Exhausted { last_error } => {
                warn!(%request_id, user_id, "All models exhausted: {}", last_error);
                Ok(GenerationResult::failed(last_error))
            }
        }
    }

    /// Walk the model plan: per-model attempt budget, saturation-driven
    /// model switching, and the guard loop with prompt mutation.
    async fn run_model_plan(
        &self,
        request_id: Uuid,
        plan: &[String],
        base_prompt: &str,
        animal_allowed: bool,
    ) -> Result<PlanOutcome> {
        let mut last_error = "Failed to generate the image.".to_string();

        for (model_idx, model) in plan.iter().enumerate() {
            let provider = self.provider_for(model);
            let mut prompt_variant = base_prompt.to_string();

            'attempts: for attempt in 1..=MAX_ATTEMPTS_PER_MODEL {
                let outcome = provider.invoke(model, &prompt_variant).await?;

                match outcome {
                    Outcome::Fatal(message) => {
                        // A bad credential fails identically on every model;
                        // abort the whole dispatch.
                        error!(%request_id, model, "Fatal provider error: {}", message);
                        return Err(Error::Configuration(message));
                    }
                    Outcome::Retryable { .. } | Outcome::Empty => {
                        if let Some(message) = outcome.error_message() {
                            last_error = message;
                        }
                        if outcome.is_saturated() {
                            warn!(
                                %request_id,
                                model,
                                "Provider saturated, abandoning remaining attempts"
                            );
                            break 'attempts;
                        }
                        warn!(
                            %request_id,
                            model,
                            attempt,
                            "Transient provider error, retrying: {}",
                            last_error
                        );
                        continue;
                    }
                    Outcome::Success(Payload::Url(url)) => {
                        // The guard only inspects raw bytes.
                        return Ok(PlanOutcome::Delivered {
                            payload: Payload::Url(url),
                            model: model.clone(),
                        });
                    }
                    Outcome::Success(Payload::Bytes(bytes)) => {
                        if animal_allowed {
                            return Ok(PlanOutcome::Delivered {
                                payload: Payload::Bytes(bytes),
                                model: model.clone(),
                            });
                        }
                        match self.guard.check(&bytes).await {
                            GuardVerdict::Absent | GuardVerdict::Undetermined => {
                                return Ok(PlanOutcome::Delivered {
                                    payload: Payload::Bytes(bytes),
                                    model: model.clone(),
                                });
                            }
                            GuardVerdict::Present => {
                                warn!(
                                    %request_id,
                                    model,
                                    attempt,
                                    "Guard flagged an unrequested animal, strengthening prompt"
                                );
                                prompt_variant =
                                    policy::no_animals_retry_prompt(base_prompt, attempt);
                                last_error = EXTRA_OBJECTS_ERROR.to_string();
                                continue;
                            }
                        }
                    }
                }
            }

            if model_idx < plan.len() - 1 {
                warn!(
                    %request_id,
                    "Switching image model fallback: {} -> {}",
                    model,
                    plan[model_idx + 1]
                );
            }
        }

        Ok(PlanOutcome::Exhausted { last_error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::MockContentGuard;
    use crate::models::UserEntitlement;
    use crate::provider::MockImageProvider;
    use crate::store::MemoryStore;
    use chrono::{Duration, Local};
    use std::io::Write;

    const USER: i64 = 100;
    const ADMIN: i64 = 1;

    struct TestHarness {
        dispatcher: Dispatcher,
        store: MemoryStore,
        paid: MockImageProvider,
        guard: MockContentGuard,
        // Holds the operator config file alive for the dispatcher's
        // lifetime.
        _operator_config: tempfile::NamedTempFile,
    }

    fn test_config(operator_config_path: &std::path::Path) -> Config {
        Config {
            api_url: "http://unused.invalid".to_string(),
            image_api_url: "http://unused.invalid".to_string(),
            free_image_api_url: "http://unused.invalid".to_string(),
            api_bearer_token: "test-token".to_string(),
            guard_model: "gemini-3-flash".to_string(),
            admin_ids: vec![ADMIN],
            data_dir: "unused".into(),
            operator_config_path: operator_config_path.to_path_buf(),
            free_trial_limit: 5,
            image_daily_limit_pro: 20,
            image_monthly_limit_pro: 300,
        }
    }

    fn harness_with(
        store: MemoryStore,
        paid: MockImageProvider,
        guard: MockContentGuard,
        enabled_models: &[&str],
    ) -> TestHarness {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let config_json = serde_json::json!({ "enabled_models": enabled_models });
        write!(file, "{}", config_json).unwrap();

        let config = test_config(file.path());
        let dispatcher = Dispatcher::with_services(
            DispatcherServices {
                store: Arc::new(store.clone()),
                paid_provider: Box::new(paid.clone()),
                free_provider: Box::new(MockImageProvider::new()),
                guard: Box::new(guard.clone()),
            },
            config,
        );

        TestHarness {
            dispatcher,
            store,
            paid,
            guard,
            _operator_config: file,
        }
    }

    fn subscribed_record() -> UserEntitlement {
        UserEntitlement {
            subscription_end: Some(Local::now() + Duration::days(30)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_successful_generation_charges_trial_after_delivery() {
        let harness = harness_with(
            MemoryStore::new(),
            MockImageProvider::new(),
            MockContentGuard::new(),
            &["flux"],
        );

        let result = harness
            .dispatcher
            .request_generation(GenerationRequest::new(USER, "a red chair"))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.model_used.as_deref(), Some("flux"));
        assert!(matches!(result.payload, Some(Payload::Bytes(_))));

        let record = harness.store.get_record(USER).unwrap();
        assert_eq!(record.free_trial_used, 1);
        assert_eq!(record.image_trial_used, 1);
        assert_eq!(record.image_daily_count, 0);
    }

    #[tokio::test]
    async fn test_subscriber_charged_before_provider_call_not_trial() {
        let store = MemoryStore::new().with_record(USER, subscribed_record());
        let harness = harness_with(
            store,
            MockImageProvider::new(),
            MockContentGuard::new(),
            &["flux"],
        );

        let result = harness
            .dispatcher
            .request_generation(GenerationRequest::new(USER, "a red chair"))
            .await
            .unwrap();
        assert!(result.success);

        let record = harness.store.get_record(USER).unwrap();
        assert_eq!(record.image_daily_count, 1);
        assert_eq!(record.image_monthly_count, 1);
        assert_eq!(record.free_trial_used, 0);
    }

    #[tokio::test]
    async fn test_exhausted_trial_denies_without_provider_calls() {
        let store = MemoryStore::new().with_record(
            USER,
            UserEntitlement {
                free_trial_used: 5,
                ..Default::default()
            },
        );
        let harness = harness_with(
            store,
            MockImageProvider::new(),
            MockContentGuard::new(),
            &["flux"],
        );

        let result = harness
            .dispatcher
            .request_generation(GenerationRequest::new(USER, "a red chair"))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("Free trial exhausted"));
        assert_eq!(harness.paid.get_call_count(), 0);
    }

    #[tokio::test]
    async fn test_guard_present_mutates_prompt_and_succeeds_within_budget() {
        let guard = MockContentGuard::new()
            .with_verdict(GuardVerdict::Present)
            .with_verdict(GuardVerdict::Present)
            .with_verdict(GuardVerdict::Absent);
        let harness = harness_with(
            MemoryStore::new(),
            MockImageProvider::new(),
            guard,
            &["flux"],
        );

        let result = harness
            .dispatcher
            .request_generation(GenerationRequest::new(USER, "a wooden table"))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(harness.paid.get_call_count(), 3);
        assert_eq!(harness.guard.get_call_count(), 3);

        // Attempt 3 ran with the strengthened negative suffix appended to
        // the still-templated scene prompt.
        let last_prompt = harness.paid.last_prompt().unwrap();
        assert!(last_prompt.contains("USER REQUEST (literal):"));
        assert!(last_prompt.contains("a wooden table"));
        assert!(last_prompt.contains("STRICT: no animals"));
        assert!(last_prompt.contains("Focus only on requested objects"));
    }

    #[tokio::test]
    async fn test_guard_always_present_exhausts_with_refine_message() {
        let guard = MockContentGuard::new().with_verdict(GuardVerdict::Present);
        let harness = harness_with(
            MemoryStore::new(),
            MockImageProvider::new(),
            guard,
            &["flux"],
        );

        let result = harness
            .dispatcher
            .request_generation(GenerationRequest::new(USER, "a wooden table"))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(harness.paid.get_call_count(), MAX_ATTEMPTS_PER_MODEL as usize);
        assert!(result
            .error_message
            .unwrap()
            .contains("keeps adding extra objects"));
        // A failed dispatch never charges the trial.
        assert!(harness.store.get_record(USER).is_none());
    }

    #[tokio::test]
    async fn test_animal_prompt_skips_guard() {
        let harness = harness_with(
            MemoryStore::new(),
            MockImageProvider::new(),
            MockContentGuard::new().with_verdict(GuardVerdict::Present),
            &["flux"],
        );

        let result = harness
            .dispatcher
            .request_generation(GenerationRequest::new(USER, "a cat on a sofa"))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(harness.guard.get_call_count(), 0);
    }

    #[tokio::test]
    async fn test_url_payload_bypasses_guard() {
        let paid = MockImageProvider::new()
            .with_outcome(Outcome::Success(Payload::Url("https://img.test/1".to_string())));
        let harness = harness_with(
            MemoryStore::new(),
            paid,
            MockContentGuard::new().with_verdict(GuardVerdict::Present),
            &["flux"],
        );

        let result = harness
            .dispatcher
            .request_generation(GenerationRequest::new(USER, "a wooden table"))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(
            result.payload,
            Some(Payload::Url("https://img.test/1".to_string()))
        );
        assert_eq!(harness.guard.get_call_count(), 0);
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_whole_dispatch() {
        let paid = MockImageProvider::new()
            .with_outcome(Outcome::Fatal("bad credentials (401)".to_string()));
        let harness = harness_with(
            MemoryStore::new(),
            paid,
            MockContentGuard::new(),
            &["flux", "flux-2-dev", "grok-2-image"],
        );

        let err = harness
            .dispatcher
            .request_generation(GenerationRequest::new(USER, "a red chair"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Configuration(_)));
        // No other model in the plan was tried.
        assert_eq!(harness.paid.get_call_count(), 1);
    }

    #[tokio::test]
    async fn test_saturation_switches_models_without_busy_retry() {
        let paid = MockImageProvider::new()
            .with_outcome(Outcome::retryable(Some(429), "rate limit exceeded"));
        let harness = harness_with(
            MemoryStore::new(),
            paid,
            MockContentGuard::new(),
            &["flux", "flux-2-dev", "grok-2-image"],
        );

        let result = harness
            .dispatcher
            .request_generation(GenerationRequest::new(USER, "a red chair"))
            .await
            .unwrap();

        assert!(!result.success);
        // One attempt per model, three models, no per-model retries.
        assert_eq!(harness.paid.get_call_count(), 3);
        let models: Vec<String> = harness.paid.get_calls().into_iter().map(|(m, _)| m).collect();
        assert_eq!(models, vec!["flux", "flux-2-dev", "grok-2-image"]);
        assert!(result.error_message.unwrap().contains("429"));
    }

    #[tokio::test]
    async fn test_transient_error_retries_same_model_then_succeeds() {
        let paid = MockImageProvider::new()
            .with_outcome(Outcome::retryable(Some(503), "upstream unavailable"))
            .with_outcome(Outcome::Empty)
            .with_outcome(Outcome::Success(Payload::Bytes(vec![1, 2, 3])));
        let harness = harness_with(
            MemoryStore::new(),
            paid,
            MockContentGuard::new(),
            &["flux", "flux-2-dev"],
        );

        let result = harness
            .dispatcher
            .request_generation(GenerationRequest::new(USER, "a red chair"))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.model_used.as_deref(), Some("flux"));
        assert_eq!(harness.paid.get_call_count(), 3);
    }

    #[tokio::test]
    async fn test_disabled_requested_model_falls_back_to_policy() {
        let harness = harness_with(
            MemoryStore::new(),
            MockImageProvider::new(),
            MockContentGuard::new(),
            &["flux"],
        );

        let result = harness
            .dispatcher
            .request_generation(
                GenerationRequest::new(USER, "a red chair").with_model("lucid-origin"),
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.model_used.as_deref(), Some("flux"));
    }

    #[tokio::test]
    async fn test_requested_model_pins_front_of_plan() {
        let harness = harness_with(
            MemoryStore::new(),
            MockImageProvider::new(),
            MockContentGuard::new(),
            &["flux", "phoenix-1.0"],
        );

        let result = harness
            .dispatcher
            .request_generation(
                GenerationRequest::new(USER, "a red chair").with_model("phoenix-1.0"),
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.model_used.as_deref(), Some("phoenix-1.0"));
    }

    #[tokio::test]
    async fn test_text_only_operator_list_still_dispatches() {
        // The catalog auto-appends an image model when the operator list
        // has none, so dispatch stays alive.
        let harness = harness_with(
            MemoryStore::new(),
            MockImageProvider::new(),
            MockContentGuard::new(),
            &["deepseek-v3"],
        );

        let result = harness
            .dispatcher
            .request_generation(GenerationRequest::new(USER, "a red chair"))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.model_used.as_deref(), Some("flux"));
    }

    #[tokio::test]
    async fn test_empty_prompt_fails_without_provider_calls() {
        let harness = harness_with(
            MemoryStore::new(),
            MockImageProvider::new(),
            MockContentGuard::new(),
            &["flux"],
        );

        let result = harness
            .dispatcher
            .request_generation(GenerationRequest::new(USER, "   "))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(harness.paid.get_call_count(), 0);
    }

    #[tokio::test]
    async fn test_admin_generation_never_charges_anything() {
        let harness = harness_with(
            MemoryStore::new(),
            MockImageProvider::new(),
            MockContentGuard::new(),
            &["flux"],
        );

        let result = harness
            .dispatcher
            .request_generation(GenerationRequest::new(ADMIN, "a red chair"))
            .await
            .unwrap();

        assert!(result.success);
        assert!(harness.store.get_record(ADMIN).is_none());
    }

    #[tokio::test]
    async fn test_image_edit_request_uses_edit_prompt() {
        let harness = harness_with(
            MemoryStore::new(),
            MockImageProvider::new(),
            MockContentGuard::new(),
            &["flux"],
        );

        let result = harness
            .dispatcher
            .request_generation(
                GenerationRequest::new(USER, "remove background").as_image_edit(Some(vec![1, 2])),
            )
            .await
            .unwrap();

        assert!(result.success);
        let (_, prompt) = harness.paid.get_calls().remove(0);
        assert!(prompt.contains("EDIT REQUEST: remove background"));
    }

    #[tokio::test]
    async fn test_check_and_consume_quota_text_path() {
        let store = MemoryStore::new().with_record(
            USER,
            UserEntitlement {
                free_trial_used: 5,
                ..Default::default()
            },
        );
        let harness = harness_with(
            store,
            MockImageProvider::new(),
            MockContentGuard::new(),
            &["flux"],
        );

        let denied = harness
            .dispatcher
            .check_and_consume_quota(USER, false)
            .await
            .unwrap();
        assert!(!denied.allowed);

        let admin = harness
            .dispatcher
            .check_and_consume_quota(ADMIN, false)
            .await
            .unwrap();
        assert!(admin.allowed);
    }
}
