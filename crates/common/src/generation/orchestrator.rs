//! Generation orchestrator
//!
//! Owns the whole lifecycle of one generation: entitlement and credit
//! checks, prompt enrichment, provider dispatch under a deadline, the
//! image fallback chain, and the transactional commit.

use super::{
    current_period_start, with_timeout, ClothingRequest, GenerationKind, GenerationOutcome,
    GenerationRequest, GenerationResult,
};
use crate::config::GenerationConfig;
use crate::db::models::{GeneratedImage, User};
use crate::db::{NewGeneration, Store};
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::packages::{can_user_access_feature, can_user_perform_action, get_package_by_tier, Package};
use crate::providers::{GeneratedMedia, ImageProvider, ProviderRequest, ProviderSet};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Authenticated caller on whose behalf a generation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub user_id: Uuid,
    pub team_id: Option<Uuid>,
}

/// A user cleared to spend on a given kind
#[derive(Debug, Clone)]
pub struct Entitlement {
    pub user: User,
    pub package: &'static Package,
    pub usage_this_period: u32,
}

pub struct GenerationService {
    store: Arc<dyn Store>,
    providers: Arc<ProviderSet>,
    config: GenerationConfig,
}

impl GenerationService {
    pub fn new(store: Arc<dyn Store>, providers: Arc<ProviderSet>, config: GenerationConfig) -> Self {
        Self {
            store,
            providers,
            config,
        }
    }

    /// Outer deadline around enrich + dispatch
    pub fn deadline(&self, kind: GenerationKind) -> Duration {
        match kind {
            GenerationKind::Image => self.config.image_timeout(),
            GenerationKind::Video => self.config.video_timeout(),
            GenerationKind::ClothingApplication => self.config.clothing_timeout(),
        }
    }

    /// All read-only checks that must pass before any provider is called
    pub async fn check_entitlement(&self, user_id: Uuid, kind: GenerationKind) -> Result<Entitlement> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| AppError::UserNotFound {
                id: user_id.to_string(),
            })?;

        let package = get_package_by_tier(&user.package_tier).ok_or_else(|| {
            AppError::InvalidPackageTier {
                tier: user.package_tier.clone(),
            }
        })?;

        if let Some(feature) = kind.required_feature() {
            if !can_user_access_feature(package, feature) {
                return Err(AppError::FeatureNotEntitled {
                    tier: package.tier.to_string(),
                    feature: feature.to_string(),
                });
            }
        }

        let since = current_period_start(Utc::now());
        let usage = self.store.count_generations_since(user_id, kind, since).await?;
        let usage = u32::try_from(usage).unwrap_or(u32::MAX);
        let action = kind.action();
        if !can_user_perform_action(package, action, usage) {
            return Err(AppError::ActionLimitReached {
                action: action.to_string(),
                limit: package.limit(action),
            });
        }

        let required = kind.cost();
        if user.credits <= 0 || user.credits < required {
            return Err(AppError::InsufficientCredits {
                balance: user.credits,
                required,
            });
        }

        Ok(Entitlement {
            user,
            package,
            usage_this_period: usage,
        })
    }

    /// Validate and entitle a request without dispatching it
    pub async fn preflight(&self, requester: &Requester, request: &GenerationRequest) -> Result<GenerationKind> {
        request.check()?;
        let kind = request.processor().kind();
        self.check_entitlement(requester.user_id, kind).await?;
        Ok(kind)
    }

    /// Generate an image or video with the processor the request names
    pub async fn generate(&self, requester: &Requester, request: GenerationRequest) -> Result<GenerationOutcome> {
        request.check()?;
        let processor = request.processor();
        let provider = self.providers.primary(processor);
        self.run(requester, processor.kind(), provider, request).await
    }

    /// Action boundary: never fails, always returns a client-ready shape
    pub async fn generate_image_action(&self, requester: &Requester, request: GenerationRequest) -> GenerationResult {
        let result = self.generate(requester, request).await;
        if let Err(ref e) = result {
            if e.is_server_error() {
                warn!(user_id = %requester.user_id, error = %e, "Generation action failed");
            }
        }
        GenerationResult::from(result)
    }

    /// Put a garment on a model image
    pub async fn apply_clothing(&self, requester: &Requester, request: ClothingRequest) -> Result<GenerationOutcome> {
        request.validate()?;
        let request = request.into_generation_request();
        request.check()?;
        let provider = self.providers.clothing();
        self.run(requester, GenerationKind::ClothingApplication, provider, request).await
    }

    #[instrument(skip(self, provider, request), fields(user_id = %requester.user_id, kind = %kind, provider = provider.name()))]
    async fn run(
        &self,
        requester: &Requester,
        kind: GenerationKind,
        provider: Arc<dyn ImageProvider>,
        request: GenerationRequest,
    ) -> Result<GenerationOutcome> {
        if let Some(key) = request.idempotency_key.as_deref() {
            if let Some(existing) = self
                .store
                .find_generation_by_idempotency_key(requester.user_id, key)
                .await?
            {
                let user = self.store.find_user(requester.user_id).await?;
                info!(generation_id = %existing.id, "Idempotent replay, not charging");
                return Ok(outcome(existing, user.map(|u| u.credits).unwrap_or_default(), true));
            }
        }

        let entitlement = self.check_entitlement(requester.user_id, kind).await?;
        let provider_request = ProviderRequest::from_request(&request);

        let started = Instant::now();
        let dispatched = with_timeout(
            provider.name(),
            self.deadline(kind),
            provider.generate(&provider_request),
        )
        .await;
        metrics::record_generation(
            started.elapsed().as_secs_f64(),
            provider.name(),
            kind.as_str(),
            dispatched.is_ok(),
        );

        let media = match dispatched {
            Ok(media) => media,
            Err(e) if kind.allows_fallback() => self.fallback(provider.name(), &provider_request, &e).await,
            Err(e) => {
                warn!(error = %e, "Generation failed, nothing charged");
                return Err(e);
            }
        };

        let cost = kind.cost();
        let committed = self
            .store
            .commit_generation(NewGeneration {
                user_id: requester.user_id,
                team_id: requester.team_id,
                prompt: provider_request.prompt.clone(),
                image_url: media.url.clone(),
                kind,
                processor: media.provider.clone(),
                credits: cost,
                idempotency_key: request.idempotency_key.clone(),
            })
            .await?;

        if !committed.replayed {
            metrics::record_credits_charged(kind.as_str(), cost);
        }

        info!(
            generation_id = %committed.image.id,
            processor = %media.provider,
            tier = %entitlement.package.tier,
            credits_charged = cost,
            remaining_credits = committed.remaining_credits,
            "Generation committed"
        );

        let mut result = outcome(committed.image, committed.remaining_credits, committed.replayed);
        result.used_fallback = media.provider != provider.name();
        Ok(result)
    }

    /// Pollinations first, then the static placeholder. Never fails.
    async fn fallback(&self, failed: &str, request: &ProviderRequest, cause: &AppError) -> GeneratedMedia {
        let fallback = self.providers.fallback();
        warn!(
            provider = failed,
            fallback = fallback.name(),
            error = %cause,
            "Provider failed, falling back"
        );
        metrics::record_fallback(failed, fallback.name());

        match fallback.generate(request).await {
            Ok(media) => media,
            Err(e) => {
                warn!(provider = fallback.name(), error = %e, "Fallback failed, using placeholder");
                metrics::record_fallback(fallback.name(), "placeholder");
                GeneratedMedia::new(self.providers.placeholder().url_for(request), "placeholder")
            }
        }
    }
}

fn outcome(image: GeneratedImage, remaining_credits: i32, replayed: bool) -> GenerationOutcome {
    let kind = match image.kind.as_str() {
        "video" => GenerationKind::Video,
        "clothing_application" => GenerationKind::ClothingApplication,
        _ => GenerationKind::Image,
    };

    GenerationOutcome {
        generation_id: image.id,
        image_url: image.image_url,
        kind,
        processor: image.processor,
        credits_charged: if replayed { 0 } else { image.credits_charged },
        remaining_credits,
        used_fallback: false,
        replayed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvidersConfig;
    use crate::db::MemoryStore;
    use crate::generation::Processor;
    use crate::providers::MockProvider;

    struct Harness {
        store: Arc<MemoryStore>,
        primary: Arc<MockProvider>,
        fallback: Arc<MockProvider>,
        service: GenerationService,
    }

    fn harness(processor: Processor, primary: MockProvider, fallback: MockProvider) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let primary = Arc::new(primary);
        let fallback = Arc::new(fallback);
        let providers = ProviderSet::from_config(&ProvidersConfig::default())
            .unwrap()
            .with_primary(processor, primary.clone())
            .with_clothing(primary.clone())
            .with_fallback(fallback.clone());
        let service = GenerationService::new(
            store.clone(),
            Arc::new(providers),
            GenerationConfig::default(),
        );
        Harness {
            store,
            primary,
            fallback,
            service,
        }
    }

    fn ok_harness() -> Harness {
        harness(
            Processor::Replicate,
            MockProvider::succeeding("replicate", "https://replicate.delivery/out.png"),
            MockProvider::failing("pollinations", "unreachable"),
        )
    }

    fn requester(user: &User) -> Requester {
        Requester {
            user_id: user.id,
            team_id: None,
        }
    }

    fn image_request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            prompt: prompt.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_success_charges_one_credit() {
        let h = ok_harness();
        let user = h.store.seed_user("a@example.com", 10, "standard").await;

        let outcome = h
            .service
            .generate(&requester(&user), image_request("linen dress"))
            .await
            .unwrap();

        assert_eq!(outcome.image_url, "https://replicate.delivery/out.png");
        assert_eq!(outcome.processor, "replicate");
        assert_eq!(outcome.credits_charged, 1);
        assert_eq!(outcome.remaining_credits, 9);
        assert!(!outcome.used_fallback);
        assert_eq!(h.store.find_user(user.id).await.unwrap().unwrap().credits, 9);
    }

    #[tokio::test]
    async fn test_enhanced_prompt_reaches_provider() {
        let h = ok_harness();
        let user = h.store.seed_user("b@example.com", 10, "standard").await;
        let request = GenerationRequest {
            prompt: "tailored suit".to_string(),
            camera_view: Some("front".to_string()),
            ..Default::default()
        };

        h.service.generate(&requester(&user), request).await.unwrap();

        let seen = h.primary.last_request().await.unwrap();
        assert!(seen.enhanced_prompt.starts_with("tailored suit, front view"));
        assert!(seen.enhanced_prompt.contains("professional fashion photography"));
    }

    #[tokio::test]
    async fn test_zero_credits_rejected_before_dispatch() {
        let h = ok_harness();
        let user = h.store.seed_user("c@example.com", 0, "standard").await;

        let result = h
            .service
            .generate_image_action(&requester(&user), image_request("wool coat"))
            .await;

        assert_eq!(
            result,
            GenerationResult::Failure {
                error: "You have no credits remaining.".to_string()
            }
        );
        assert_eq!(h.primary.calls(), 0);
        assert_eq!(h.store.generation_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_tier_rejected() {
        let h = ok_harness();
        let user = h.store.seed_user("d@example.com", 10, "gold").await;

        let result = h
            .service
            .generate_image_action(&requester(&user), image_request("wool coat"))
            .await;

        assert_eq!(
            result,
            GenerationResult::Failure {
                error: "Invalid package tier".to_string()
            }
        );
        assert_eq!(h.primary.calls(), 0);
    }

    #[tokio::test]
    async fn test_blank_prompt_rejected() {
        let h = ok_harness();
        let user = h.store.seed_user("e@example.com", 10, "standard").await;

        let err = h
            .service
            .generate(&requester(&user), image_request("  "))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        assert_eq!(h.primary.calls(), 0);
    }

    #[tokio::test]
    async fn test_provider_error_falls_back_to_pollinations() {
        let h = harness(
            Processor::NanoBanana,
            MockProvider::failing("nano_banana", "HTTP 500"),
            MockProvider::succeeding("pollinations", "https://image.pollinations.ai/prompt/x?seed=1"),
        );
        let user = h.store.seed_user("f@example.com", 10, "standard").await;
        let request = GenerationRequest {
            processor: Some("Nano Banana".to_string()),
            ..image_request("silk scarf")
        };

        let outcome = h.service.generate(&requester(&user), request).await.unwrap();

        assert!(outcome.used_fallback);
        assert_eq!(outcome.processor, "pollinations");
        assert_eq!(outcome.remaining_credits, 9);
        assert_eq!(h.fallback.calls(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_chain_returns_placeholder() {
        let h = harness(
            Processor::NanoBanana,
            MockProvider::failing("nano_banana", "HTTP 500"),
            MockProvider::failing("pollinations", "probe failed"),
        );
        let user = h.store.seed_user("g@example.com", 10, "standard").await;
        let request = GenerationRequest {
            processor: Some("Nano Banana".to_string()),
            ..image_request("silk scarf")
        };

        let result = h.service.generate_image_action(&requester(&user), request).await;

        match result {
            GenerationResult::Success { success, image_url } => {
                assert!(success);
                assert!(image_url.starts_with("https://image.pollinations.ai/prompt/"));
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_provider_hits_deadline_then_falls_back() {
        let h = harness(
            Processor::OpenAi,
            MockProvider::hanging("openai"),
            MockProvider::succeeding("pollinations", "https://image.pollinations.ai/prompt/y"),
        );
        let user = h.store.seed_user("h@example.com", 10, "standard").await;
        let request = GenerationRequest {
            processor: Some("OpenAI DALL-E".to_string()),
            ..image_request("raincoat")
        };

        let outcome = h.service.generate(&requester(&user), request).await.unwrap();
        assert!(outcome.used_fallback);
        assert_eq!(outcome.image_url, "https://image.pollinations.ai/prompt/y");
    }

    #[tokio::test]
    async fn test_video_failure_not_charged_and_no_fallback() {
        let h = harness(
            Processor::Kling,
            MockProvider::failing("kling", "job failed"),
            MockProvider::succeeding("pollinations", "https://image.pollinations.ai/prompt/z"),
        );
        let user = h.store.seed_user("i@example.com", 10, "pro").await;
        let request = GenerationRequest {
            processor: Some("Kling".to_string()),
            ..image_request("runway walk")
        };

        let err = h.service.generate(&requester(&user), request).await.unwrap_err();

        assert!(matches!(err, AppError::Provider { .. }));
        assert_eq!(h.fallback.calls(), 0);
        assert_eq!(h.store.find_user(user.id).await.unwrap().unwrap().credits, 10);
        assert_eq!(h.store.generation_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_video_timeout_message() {
        let h = harness(
            Processor::Kling,
            MockProvider::hanging("kling"),
            MockProvider::succeeding("pollinations", "https://image.pollinations.ai/prompt/z"),
        );
        let user = h.store.seed_user("j@example.com", 10, "premium").await;
        let request = GenerationRequest {
            processor: Some("Kling".to_string()),
            ..image_request("runway walk")
        };

        let result = h.service.generate_image_action(&requester(&user), request).await;
        assert_eq!(
            result,
            GenerationResult::Failure {
                error: "Generation timed out. Please try a simpler prompt.".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_video_success_costs_two() {
        let h = harness(
            Processor::Kling,
            MockProvider::succeeding("kling", "https://cdn.kling.ai/v.mp4"),
            MockProvider::failing("pollinations", "unused"),
        );
        let user = h.store.seed_user("k@example.com", 5, "pro").await;
        let request = GenerationRequest {
            processor: Some("Kling".to_string()),
            ..image_request("runway walk")
        };

        let outcome = h.service.generate(&requester(&user), request).await.unwrap();
        assert_eq!(outcome.kind, GenerationKind::Video);
        assert_eq!(outcome.remaining_credits, 3);
    }

    #[tokio::test]
    async fn test_standard_tier_cannot_generate_video() {
        let h = harness(
            Processor::Kling,
            MockProvider::succeeding("kling", "https://cdn.kling.ai/v.mp4"),
            MockProvider::failing("pollinations", "unused"),
        );
        let user = h.store.seed_user("l@example.com", 50, "standard").await;
        let request = GenerationRequest {
            processor: Some("Kling".to_string()),
            ..image_request("runway walk")
        };

        let err = h.service.generate(&requester(&user), request).await.unwrap_err();
        assert!(matches!(err, AppError::FeatureNotEntitled { .. }));
        assert_eq!(h.primary.calls(), 0);
    }

    #[tokio::test]
    async fn test_one_credit_covers_image_not_clothing() {
        let h = ok_harness();
        let user = h.store.seed_user("m@example.com", 1, "standard").await;

        let err = h
            .service
            .apply_clothing(
                &requester(&user),
                ClothingRequest {
                    model_url: "https://cdn.example.com/m.png".to_string(),
                    garment_url: "https://cdn.example.com/g.png".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InsufficientCredits { balance: 1, required: 2 }));
        assert_eq!(h.primary.calls(), 0);
    }

    #[tokio::test]
    async fn test_monthly_limit_enforced() {
        let h = ok_harness();
        let user = h.store.seed_user("n@example.com", 500, "standard").await;
        for _ in 0..25 {
            h.store
                .commit_generation(NewGeneration {
                    user_id: user.id,
                    team_id: None,
                    prompt: "seed".to_string(),
                    image_url: "https://cdn.example.com/s.png".to_string(),
                    kind: GenerationKind::ClothingApplication,
                    processor: "clothing_ai".to_string(),
                    credits: 2,
                    idempotency_key: None,
                })
                .await
                .unwrap();
        }

        let err = h
            .service
            .apply_clothing(
                &requester(&user),
                ClothingRequest {
                    model_url: "https://cdn.example.com/m.png".to_string(),
                    garment_url: "https://cdn.example.com/g.png".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::ActionLimitReached { limit: 25, .. }));
    }

    #[tokio::test]
    async fn test_idempotency_key_charges_once() {
        let h = ok_harness();
        let user = h.store.seed_user("o@example.com", 10, "standard").await;
        let request = GenerationRequest {
            idempotency_key: Some("req-123".to_string()),
            ..image_request("bomber jacket")
        };

        let first = h.service.generate(&requester(&user), request.clone()).await.unwrap();
        let second = h.service.generate(&requester(&user), request).await.unwrap();

        assert_eq!(first.generation_id, second.generation_id);
        assert!(second.replayed);
        assert_eq!(second.credits_charged, 0);
        assert_eq!(h.primary.calls(), 1);
        assert_eq!(h.store.find_user(user.id).await.unwrap().unwrap().credits, 9);
    }

    #[tokio::test]
    async fn test_concurrent_requests_never_overdraw() {
        let h = ok_harness();
        let user = h.store.seed_user("p@example.com", 1, "standard").await;
        let who = requester(&user);

        let (a, b) = tokio::join!(
            h.service.generate(&who, image_request("look one")),
            h.service.generate(&who, image_request("look two")),
        );

        let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1);
        assert_eq!(h.store.find_user(user.id).await.unwrap().unwrap().credits, 0);
        assert_eq!(h.store.generation_count().await, 1);
    }

    async fn nano_banana_500_service(pollinations_base_url: String) -> (Arc<MemoryStore>, GenerationService) {
        use crate::providers::test_support::spawn_upstream;
        use axum::{http::StatusCode, routing::post, Router};

        let nano_banana = Router::new().route(
            "/v1/generate",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded") }),
        );
        let config = ProvidersConfig {
            nano_banana_api_key: Some("nb-test".to_string()),
            nano_banana_base_url: spawn_upstream(nano_banana).await,
            pollinations_base_url,
            ..Default::default()
        };

        let store = Arc::new(MemoryStore::new());
        let service = GenerationService::new(
            store.clone(),
            Arc::new(ProviderSet::from_config(&config).unwrap()),
            GenerationConfig::default(),
        );
        (store, service)
    }

    fn nano_banana_request() -> GenerationRequest {
        GenerationRequest {
            processor: Some("Nano Banana".to_string()),
            aspect_ratio: Some("16:9".to_string()),
            ..image_request("velvet blazer")
        }
    }

    #[tokio::test]
    async fn test_nano_banana_server_error_served_by_pollinations() {
        use crate::providers::test_support::spawn_upstream;
        use axum::{http::StatusCode, Router};

        let pollinations = spawn_upstream(Router::new().fallback(|| async { StatusCode::OK })).await;
        let (store, service) = nano_banana_500_service(pollinations.clone()).await;
        let user = store.seed_user("nb@example.com", 3, "standard").await;

        let outcome = service.generate(&requester(&user), nano_banana_request()).await.unwrap();

        assert!(outcome.used_fallback);
        assert_eq!(outcome.processor, "pollinations");
        assert!(outcome.image_url.starts_with(&format!("{}/prompt/", pollinations)));
        assert!(outcome.image_url.contains("width=1024&height=576"));
        assert_eq!(outcome.remaining_credits, 2);
    }

    #[tokio::test]
    async fn test_nano_banana_server_error_with_pollinations_down_yields_placeholder() {
        use crate::providers::test_support::dead_upstream;

        let (store, service) = nano_banana_500_service(dead_upstream().await).await;
        let user = store.seed_user("nb2@example.com", 3, "standard").await;

        match service.generate_image_action(&requester(&user), nano_banana_request()).await {
            GenerationResult::Success { success, image_url } => {
                assert!(success);
                assert!(image_url.starts_with("https://image.pollinations.ai/prompt/"));
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(store.generation_count().await, 1);
    }
}
