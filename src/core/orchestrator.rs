//! Request orchestration.
//!
//! Given a target model and message history the orchestrator resolves the
//! effective model (daily-limit fallback), resolves credentials, gates
//! feature options, dispatches to the provider adapter, and handles
//! rate-limit failures by rotating keys and retrying with bounded attempts.
//! Routing substitutions are scoped to the call; a thread's assigned model
//! changes only through explicit user action in the session store.

use crate::api::{
    Completion, GeneratedImage, ProviderAdapter, ProviderFailure, RequestOptions,
};
use crate::auth::KeyVault;
use crate::core::message::Message;
use crate::core::registry::{Model, ModelRef, ModelRegistry, Provider};
use crate::core::settings::SettingsStore;
use crate::core::usage::UsageTracker;
use crate::utils::tokens::estimate_tokens;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Rotation attempts before a rate-limit failure is surfaced.
const MAX_KEY_ROTATIONS: u32 = 3;

/// Pause between a rotation and the retry.
const ROTATION_BACKOFF: Duration = Duration::from_secs(1);

/// User-visible record of a routing substitution and why it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingNotice {
    /// The requested model hit its daily ceiling; a fallback served the call.
    DailyLimitFallback { from: ModelRef, to: ModelRef },
    /// The requested model cannot generate images; a capable one stood in.
    ImageCapabilitySwitch { from: ModelRef, to: ModelRef },
}

impl fmt::Display for RoutingNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingNotice::DailyLimitFallback { from, to } => write!(
                f,
                "{} reached its daily limit; this reply used {} instead",
                from.name, to.name
            ),
            RoutingNotice::ImageCapabilitySwitch { from, to } => write!(
                f,
                "{} cannot generate images; this reply used {} instead",
                from.name, to.name
            ),
        }
    }
}

#[derive(Debug)]
pub enum RequestError {
    /// No usable key for the requested provider. Nothing was dispatched.
    MissingCredential(Provider),
    /// Provider kept signalling quota exhaustion after rotation retries.
    RateLimited { model_id: String, message: String },
    /// Any other adapter failure; auth failures keep "API key" in the
    /// preserved message.
    Provider { message: String },
    /// Image generation requested with no image-capable model available.
    CapabilityMismatch { model_id: String },
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::MissingCredential(provider) => {
                write!(f, "No API key configured for {}", provider.display_name())
            }
            RequestError::RateLimited { model_id, message } => {
                write!(f, "Rate limit reached for {model_id}: {message}")
            }
            RequestError::Provider { message } => {
                write!(f, "Provider request failed: {message}")
            }
            RequestError::CapabilityMismatch { model_id } => {
                write!(
                    f,
                    "{model_id} cannot generate images and no image-capable model is available"
                )
            }
        }
    }
}

impl StdError for RequestError {}

/// Result of a chat dispatch: the completion plus what routing actually did.
#[derive(Debug)]
pub struct ChatOutcome {
    pub completion: Completion,
    pub effective_model: Model,
    pub notices: Vec<RoutingNotice>,
    pub used_shared_key: bool,
}

/// Result of an image dispatch.
#[derive(Debug)]
pub struct ImageOutcome {
    pub image: GeneratedImage,
    pub effective_model: Model,
    pub notices: Vec<RoutingNotice>,
    pub used_shared_key: bool,
}

pub struct RequestOrchestrator {
    registry: Arc<ModelRegistry>,
    tracker: Arc<UsageTracker>,
    settings: Arc<SettingsStore>,
    vault: KeyVault,
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
    backoff: Duration,
}

impl RequestOrchestrator {
    /// Build an orchestrator with the real HTTP adapters.
    pub fn new(
        registry: Arc<ModelRegistry>,
        tracker: Arc<UsageTracker>,
        settings: Arc<SettingsStore>,
        vault: KeyVault,
    ) -> Self {
        let mut adapters: HashMap<Provider, Arc<dyn ProviderAdapter>> = HashMap::new();
        adapters.insert(Provider::Gemini, Arc::new(crate::api::GeminiAdapter::new()));
        adapters.insert(
            Provider::OpenRouter,
            Arc::new(crate::api::OpenRouterAdapter::new()),
        );
        Self::with_adapters(registry, tracker, settings, vault, adapters)
    }

    /// Build an orchestrator with explicit adapters; the seam used by tests.
    pub fn with_adapters(
        registry: Arc<ModelRegistry>,
        tracker: Arc<UsageTracker>,
        settings: Arc<SettingsStore>,
        vault: KeyVault,
        adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
    ) -> Self {
        Self {
            registry,
            tracker,
            settings,
            vault,
            adapters,
            backoff: ROTATION_BACKOFF,
        }
    }

    /// Replace the rotation backoff; tests use a zero pause.
    pub fn rotation_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<UsageTracker> {
        &self.tracker
    }

    pub fn vault(&self) -> &KeyVault {
        &self.vault
    }

    /// Daily-limit substitution: the model itself when under its ceiling,
    /// otherwise its fallback plus the notice to surface.
    pub fn limit_checked(&self, model: &Model) -> (Model, Option<RoutingNotice>) {
        if !self.tracker.has_reached_daily_limit(&model.id) {
            return (model.clone(), None);
        }
        let fallback = self.tracker.fallback_for(&model.id);
        if fallback.id == model.id {
            // No usable fallback resolved; proceed against the exhausted
            // model and let the provider reject it.
            return (model.clone(), None);
        }
        let notice = RoutingNotice::DailyLimitFallback {
            from: model.model_ref(),
            to: fallback.model_ref(),
        };
        (fallback, Some(notice))
    }

    /// Feature flags for a model: each is sent only when both the settings
    /// toggle and the model capability allow it.
    fn options_for(&self, model: &Model) -> RequestOptions {
        let settings = self.settings.snapshot();
        RequestOptions {
            thinking: settings.enable_thinking && model.thinking,
            web_search: settings.enable_web_search && model.web_search,
        }
    }

    fn adapter_for(&self, provider: Provider) -> Result<&Arc<dyn ProviderAdapter>, RequestError> {
        self.adapters
            .get(&provider)
            .ok_or(RequestError::MissingCredential(provider))
    }

    pub async fn send_chat_request(
        &self,
        model: &Model,
        history: &[Message],
    ) -> Result<ChatOutcome, RequestError> {
        let mut notices = Vec::new();
        let (effective, notice) = self.limit_checked(model);
        notices.extend(notice);

        let options = self.options_for(&effective);
        let adapter = self.adapter_for(effective.provider)?;
        let request_len = serde_json::to_string(history).map(|s| s.len()).unwrap_or(0);

        let mut rotations = 0;
        loop {
            let key = self
                .vault
                .active_key(effective.provider)
                .ok_or(RequestError::MissingCredential(effective.provider))?;

            debug!(
                model = %effective.id,
                provider = %effective.provider.as_str(),
                shared_key = key.shared,
                rotations,
                "dispatching chat request"
            );

            match adapter
                .complete(&key.key, &effective.model_id, history, &options)
                .await
            {
                Ok(completion) => {
                    self.record_success(&effective, key.shared, request_len, completion.content.len());
                    return Ok(ChatOutcome {
                        completion,
                        effective_model: effective,
                        notices,
                        used_shared_key: key.shared,
                    });
                }
                Err(failure) => {
                    self.handle_failure(&effective, failure, &mut rotations).await?;
                }
            }
        }
    }

    /// Generate an image, substituting an image-capable model when the
    /// requested one lacks the capability.
    pub async fn generate_image(
        &self,
        model: &Model,
        prompt: &str,
    ) -> Result<ImageOutcome, RequestError> {
        let mut notices = Vec::new();
        let (mut effective, notice) = self.limit_checked(model);
        notices.extend(notice);

        if !effective.image_generation {
            let substitute = self
                .registry
                .image_capable(effective.provider)
                .ok_or_else(|| RequestError::CapabilityMismatch {
                    model_id: effective.id.clone(),
                })?
                .clone();
            notices.push(RoutingNotice::ImageCapabilitySwitch {
                from: effective.model_ref(),
                to: substitute.model_ref(),
            });
            effective = substitute;
        }

        let adapter = self.adapter_for(effective.provider)?;

        let mut rotations = 0;
        loop {
            let key = self
                .vault
                .active_key(effective.provider)
                .ok_or(RequestError::MissingCredential(effective.provider))?;

            debug!(
                model = %effective.id,
                provider = %effective.provider.as_str(),
                shared_key = key.shared,
                rotations,
                "dispatching image request"
            );

            match adapter
                .generate_image(&key.key, &effective.model_id, prompt)
                .await
            {
                Ok(image) => {
                    let caption_len = image.caption.as_deref().map_or(0, str::len);
                    self.record_success(&effective, key.shared, prompt.len(), caption_len);
                    return Ok(ImageOutcome {
                        image,
                        effective_model: effective,
                        notices,
                        used_shared_key: key.shared,
                    });
                }
                Err(failure) => {
                    self.handle_failure(&effective, failure, &mut rotations).await?;
                }
            }
        }
    }

    fn record_success(&self, model: &Model, shared_key: bool, request_len: usize, response_len: usize) {
        let tokens = estimate_tokens(request_len, response_len);
        self.tracker.track_usage(&model.id, tokens);

        if shared_key {
            if let Err(err) = self.settings.mutate(|s| s.free_messages_used += 1) {
                // The completion already succeeded; losing one tick of quota
                // accounting is not worth failing the request over.
                warn!(error = %err, "failed to persist free-message counter");
            }
        }
    }

    /// Classify an adapter failure: rotate-and-retry on rate limits while
    /// the multi-key provider still has attempts left, otherwise surface a
    /// typed error.
    async fn handle_failure(
        &self,
        model: &Model,
        failure: ProviderFailure,
        rotations: &mut u32,
    ) -> Result<(), RequestError> {
        if failure.is_rate_limit() {
            let candidates = self.vault.candidate_keys(model.provider).len();
            if model.provider.multi_key() && candidates > 1 && *rotations < MAX_KEY_ROTATIONS {
                *rotations += 1;
                debug!(
                    model = %model.id,
                    rotations = *rotations,
                    "rate limited; rotating key and retrying"
                );
                if let Err(err) = self.vault.rotate(model.provider) {
                    warn!(error = %err, "failed to persist key rotation");
                }
                tokio::time::sleep(self.backoff).await;
                return Ok(());
            }
            return Err(RequestError::RateLimited {
                model_id: model.id.clone(),
                message: failure.message,
            });
        }

        if failure.is_auth() {
            warn!(
                model = %model.id,
                provider = %model.provider.as_str(),
                "provider rejected the API key"
            );
        }
        Err(RequestError::Provider {
            message: failure.message,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::GeneratedImage;
    use crate::core::registry::RateLimits;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted adapter: pops one response per call and records what it saw.
    pub(crate) struct MockAdapter {
        script: Mutex<Vec<Result<Completion, ProviderFailure>>>,
        image_script: Mutex<Vec<Result<GeneratedImage, ProviderFailure>>>,
        pub calls: Mutex<Vec<(String, String, RequestOptions)>>,
        pub image_calls: Mutex<Vec<(String, String, String)>>,
    }

    impl MockAdapter {
        pub fn completing(script: Vec<Result<Completion, ProviderFailure>>) -> Self {
            Self {
                script: Mutex::new(script),
                image_script: Mutex::new(Vec::new()),
                calls: Mutex::new(Vec::new()),
                image_calls: Mutex::new(Vec::new()),
            }
        }

        pub fn imaging(script: Vec<Result<GeneratedImage, ProviderFailure>>) -> Self {
            Self {
                script: Mutex::new(Vec::new()),
                image_script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
                image_calls: Mutex::new(Vec::new()),
            }
        }

        pub fn reply(text: &str) -> Result<Completion, ProviderFailure> {
            Ok(Completion {
                content: text.to_string(),
                ..Completion::default()
            })
        }

        pub fn rate_limited() -> Result<Completion, ProviderFailure> {
            Err(ProviderFailure {
                status: Some(429),
                message: "RESOURCE_EXHAUSTED: quota".to_string(),
            })
        }
    }

    #[async_trait]
    impl ProviderAdapter for MockAdapter {
        async fn complete(
            &self,
            api_key: &str,
            model_id: &str,
            _history: &[Message],
            options: &RequestOptions,
        ) -> Result<Completion, ProviderFailure> {
            self.calls.lock().unwrap().push((
                api_key.to_string(),
                model_id.to_string(),
                *options,
            ));
            self.script.lock().unwrap().remove(0)
        }

        async fn generate_image(
            &self,
            api_key: &str,
            model_id: &str,
            prompt: &str,
        ) -> Result<GeneratedImage, ProviderFailure> {
            self.image_calls.lock().unwrap().push((
                api_key.to_string(),
                model_id.to_string(),
                prompt.to_string(),
            ));
            self.image_script.lock().unwrap().remove(0)
        }
    }

    pub(crate) fn test_model(id: &str, requests_per_day: Option<u32>, fallback: Option<&str>) -> Model {
        Model {
            id: id.to_string(),
            name: id.to_uppercase(),
            provider: Provider::Gemini,
            model_id: format!("wire-{id}"),
            vision: false,
            thinking: true,
            web_search: true,
            image_generation: false,
            rate_limits: requests_per_day.map(|limit| RateLimits {
                requests_per_minute: None,
                requests_per_day: Some(limit),
                tokens_per_minute: None,
                tokens_per_day: None,
            }),
            fallback_model_id: fallback.map(str::to_string),
        }
    }

    struct Fixture {
        registry: Arc<ModelRegistry>,
        tracker: Arc<UsageTracker>,
        settings: Arc<SettingsStore>,
        adapter: Arc<MockAdapter>,
    }

    impl Fixture {
        fn new(models: Vec<Model>, default_id: &str, adapter: MockAdapter) -> Self {
            let registry = Arc::new(ModelRegistry::new(models, default_id));
            let tracker = Arc::new(UsageTracker::new(registry.clone()));
            let settings = Arc::new(SettingsStore::load(Arc::new(MemoryStore::new())));
            Self {
                registry,
                tracker,
                settings,
                adapter: Arc::new(adapter),
            }
        }

        fn orchestrator(&self, shared_keys: Vec<String>) -> RequestOrchestrator {
            let vault = KeyVault::new(self.settings.clone(), shared_keys, 10);
            let mut adapters: HashMap<Provider, Arc<dyn ProviderAdapter>> = HashMap::new();
            adapters.insert(Provider::Gemini, self.adapter.clone());
            RequestOrchestrator::with_adapters(
                self.registry.clone(),
                self.tracker.clone(),
                self.settings.clone(),
                vault,
                adapters,
            )
            .rotation_backoff(Duration::ZERO)
        }
    }

    fn history() -> Vec<Message> {
        vec![Message::new(crate::core::message::Role::User, "hello")]
    }

    #[tokio::test]
    async fn success_tracks_usage_and_returns_the_completion() {
        let fixture = Fixture::new(
            vec![test_model("x", Some(10), None)],
            "x",
            MockAdapter::completing(vec![MockAdapter::reply("hi there")]),
        );
        fixture
            .settings
            .mutate(|s| s.gemini_api_key = "user-key".to_string())
            .unwrap();
        let orchestrator = fixture.orchestrator(vec![]);
        let model = fixture.registry.model_by_id("x").clone();

        let outcome = orchestrator.send_chat_request(&model, &history()).await.unwrap();

        assert_eq!(outcome.completion.content, "hi there");
        assert_eq!(outcome.effective_model.id, "x");
        assert!(outcome.notices.is_empty());
        assert!(!outcome.used_shared_key);

        let counters = fixture.tracker.usage_for("x").unwrap();
        assert_eq!(counters.requests_today, 1);
        assert!(counters.tokens_today > 0);
    }

    #[tokio::test]
    async fn missing_credential_never_touches_the_adapter() {
        let fixture = Fixture::new(
            vec![test_model("x", None, None)],
            "x",
            MockAdapter::completing(vec![MockAdapter::reply("unreachable")]),
        );
        let orchestrator = fixture.orchestrator(vec![]);
        let model = fixture.registry.model_by_id("x").clone();

        let err = orchestrator.send_chat_request(&model, &history()).await.unwrap_err();

        assert!(matches!(err, RequestError::MissingCredential(Provider::Gemini)));
        assert!(fixture.adapter.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhausted_free_quota_without_user_key_is_missing_credential() {
        let fixture = Fixture::new(
            vec![test_model("x", None, None)],
            "x",
            MockAdapter::completing(vec![MockAdapter::reply("unreachable")]),
        );
        fixture.settings.mutate(|s| s.free_messages_used = 10).unwrap();
        let orchestrator = fixture.orchestrator(vec!["shared-key".to_string()]);
        let model = fixture.registry.model_by_id("x").clone();

        let err = orchestrator.send_chat_request(&model, &history()).await.unwrap_err();

        assert!(matches!(err, RequestError::MissingCredential(Provider::Gemini)));
        assert!(fixture.adapter.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rate_limit_rotates_once_and_retries() {
        let fixture = Fixture::new(
            vec![test_model("x", None, None)],
            "x",
            MockAdapter::completing(vec![
                MockAdapter::rate_limited(),
                MockAdapter::reply("second key worked"),
            ]),
        );
        fixture
            .settings
            .mutate(|s| {
                s.gemini_api_key = "key-a".to_string();
                s.gemini_api_keys = vec!["key-b".to_string()];
            })
            .unwrap();
        let orchestrator = fixture.orchestrator(vec![]);
        let model = fixture.registry.model_by_id("x").clone();

        let outcome = orchestrator.send_chat_request(&model, &history()).await.unwrap();

        assert_eq!(outcome.completion.content, "second key worked");
        let calls = fixture.adapter.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "key-a");
        assert_eq!(calls[1].0, "key-b");
        // Cursor advanced exactly once.
        assert_eq!(fixture.settings.snapshot().current_gemini_key_index, 1);
    }

    #[tokio::test]
    async fn rate_limit_with_a_single_key_is_not_retried() {
        let fixture = Fixture::new(
            vec![test_model("x", None, None)],
            "x",
            MockAdapter::completing(vec![MockAdapter::rate_limited()]),
        );
        fixture
            .settings
            .mutate(|s| s.gemini_api_key = "only-key".to_string())
            .unwrap();
        let orchestrator = fixture.orchestrator(vec![]);
        let model = fixture.registry.model_by_id("x").clone();

        let err = orchestrator.send_chat_request(&model, &history()).await.unwrap_err();

        assert!(matches!(err, RequestError::RateLimited { .. }));
        assert_eq!(fixture.adapter.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rotations_stop_at_the_ceiling() {
        let fixture = Fixture::new(
            vec![test_model("x", None, None)],
            "x",
            MockAdapter::completing(vec![
                MockAdapter::rate_limited(),
                MockAdapter::rate_limited(),
                MockAdapter::rate_limited(),
                MockAdapter::rate_limited(),
            ]),
        );
        fixture
            .settings
            .mutate(|s| {
                s.gemini_api_key = "key-a".to_string();
                s.gemini_api_keys = vec!["key-b".to_string()];
            })
            .unwrap();
        let orchestrator = fixture.orchestrator(vec![]);
        let model = fixture.registry.model_by_id("x").clone();

        let err = orchestrator.send_chat_request(&model, &history()).await.unwrap_err();

        assert!(matches!(err, RequestError::RateLimited { .. }));
        // Initial attempt plus MAX_KEY_ROTATIONS retries.
        assert_eq!(fixture.adapter.calls.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn non_rate_limit_failures_are_not_retried() {
        let fixture = Fixture::new(
            vec![test_model("x", None, None)],
            "x",
            MockAdapter::completing(vec![Err(ProviderFailure {
                status: Some(400),
                message: "API key not valid".to_string(),
            })]),
        );
        fixture
            .settings
            .mutate(|s| {
                s.gemini_api_key = "key-a".to_string();
                s.gemini_api_keys = vec!["key-b".to_string()];
            })
            .unwrap();
        let orchestrator = fixture.orchestrator(vec![]);
        let model = fixture.registry.model_by_id("x").clone();

        let err = orchestrator.send_chat_request(&model, &history()).await.unwrap_err();

        match err {
            RequestError::Provider { message } => assert!(message.contains("API key")),
            other => panic!("expected provider error, got {other:?}"),
        }
        assert_eq!(fixture.adapter.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn daily_limit_substitutes_the_fallback_with_a_notice() {
        let fixture = Fixture::new(
            vec![
                test_model("x", Some(1), Some("y")),
                test_model("y", None, None),
            ],
            "x",
            MockAdapter::completing(vec![MockAdapter::reply("from fallback")]),
        );
        fixture
            .settings
            .mutate(|s| s.gemini_api_key = "user-key".to_string())
            .unwrap();
        fixture.tracker.track_usage("x", 100);
        let orchestrator = fixture.orchestrator(vec![]);
        let model = fixture.registry.model_by_id("x").clone();

        let outcome = orchestrator.send_chat_request(&model, &history()).await.unwrap();

        assert_eq!(outcome.effective_model.id, "y");
        assert!(matches!(
            outcome.notices.as_slice(),
            [RoutingNotice::DailyLimitFallback { from, to }] if from.id == "x" && to.id == "y"
        ));
        // Dispatch used the fallback's wire name.
        assert_eq!(fixture.adapter.calls.lock().unwrap()[0].1, "wire-y");
    }

    #[tokio::test]
    async fn options_require_both_toggle_and_capability() {
        let mut incapable = test_model("x", None, None);
        incapable.thinking = false;
        incapable.web_search = true;
        let fixture = Fixture::new(
            vec![incapable],
            "x",
            MockAdapter::completing(vec![MockAdapter::reply("ok")]),
        );
        fixture
            .settings
            .mutate(|s| {
                s.gemini_api_key = "user-key".to_string();
                s.enable_thinking = true;
                s.enable_web_search = false;
            })
            .unwrap();
        let orchestrator = fixture.orchestrator(vec![]);
        let model = fixture.registry.model_by_id("x").clone();

        orchestrator.send_chat_request(&model, &history()).await.unwrap();

        let options = fixture.adapter.calls.lock().unwrap()[0].2;
        // Thinking enabled in settings but unsupported by the model; web
        // search supported by the model but disabled in settings.
        assert!(!options.thinking);
        assert!(!options.web_search);
    }

    #[tokio::test]
    async fn shared_key_completions_count_against_the_quota() {
        let fixture = Fixture::new(
            vec![test_model("x", None, None)],
            "x",
            MockAdapter::completing(vec![MockAdapter::reply("free reply")]),
        );
        let orchestrator = fixture.orchestrator(vec!["shared-key".to_string()]);
        let model = fixture.registry.model_by_id("x").clone();

        let outcome = orchestrator.send_chat_request(&model, &history()).await.unwrap();

        assert!(outcome.used_shared_key);
        assert_eq!(fixture.settings.snapshot().free_messages_used, 1);
    }

    #[tokio::test]
    async fn image_generation_substitutes_a_capable_model() {
        let mut capable = test_model("img", None, None);
        capable.image_generation = true;
        let fixture = Fixture::new(
            vec![test_model("x", None, None), capable],
            "x",
            MockAdapter::imaging(vec![Ok(GeneratedImage {
                data_url: "data:image/png;base64,AAAA".to_string(),
                caption: Some("a cat".to_string()),
            })]),
        );
        fixture
            .settings
            .mutate(|s| s.gemini_api_key = "user-key".to_string())
            .unwrap();
        let orchestrator = fixture.orchestrator(vec![]);
        let model = fixture.registry.model_by_id("x").clone();

        let outcome = orchestrator
            .generate_image(&model, "generate an image of a cat")
            .await
            .unwrap();

        assert_eq!(outcome.effective_model.id, "img");
        assert!(matches!(
            outcome.notices.as_slice(),
            [RoutingNotice::ImageCapabilitySwitch { from, to }] if from.id == "x" && to.id == "img"
        ));
        assert_eq!(outcome.image.data_url, "data:image/png;base64,AAAA");
        assert_eq!(fixture.tracker.usage_for("img").unwrap().requests_today, 1);
    }

    #[tokio::test]
    async fn image_generation_without_a_capable_model_fails() {
        let fixture = Fixture::new(
            vec![test_model("x", None, None)],
            "x",
            MockAdapter::imaging(vec![]),
        );
        fixture
            .settings
            .mutate(|s| s.gemini_api_key = "user-key".to_string())
            .unwrap();
        let orchestrator = fixture.orchestrator(vec![]);
        let model = fixture.registry.model_by_id("x").clone();

        let err = orchestrator.generate_image(&model, "draw a cat").await.unwrap_err();

        assert!(matches!(err, RequestError::CapabilityMismatch { .. }));
        assert!(fixture.adapter.image_calls.lock().unwrap().is_empty());
    }
}
