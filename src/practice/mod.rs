//! The practice loop: prompts, reply generation with fallbacks, reply
//! post-processing and end-of-conversation review.

pub mod error;
pub mod fallback;
pub mod offline;
pub mod prompt;
pub mod reply;
pub mod review;
pub mod service;
pub mod traits;

pub use error::PracticeError;
pub use offline::OfflineGenerator;
pub use prompt::build_system_prompt;
pub use reply::{process_reply, CharacterState, Mood, ProcessedReply};
pub use review::{mission_progress, review, MissionProgress, PerformanceReview, Rating};
pub use service::{
    EndOutcome, PracticeService, PracticeSettings, ReplyOutcome, StartOutcome, FALLBACK_WARNING,
};
pub use traits::{NoopProgressRecorder, ProgressRecorder, ReplyGenerator};

use std::sync::Arc;

use crate::config::Config;
use crate::security::RateLimiter;
use crate::sessions::ConversationStore;

/// Wire the practice service from config and its collaborators.
pub fn create_practice_service(
    config: &Config,
    store: Arc<dyn ConversationStore>,
    limiter: Arc<RateLimiter>,
    generator: Arc<dyn ReplyGenerator>,
) -> PracticeService {
    tracing::debug!(
        generator = generator.name(),
        store = store.name(),
        "Creating practice service"
    );
    PracticeService::new(store, limiter, generator, PracticeSettings::from(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::ManualClock;
    use crate::personas::StaticPersonaCatalog;
    use crate::security::SubjectId;
    use crate::sessions::{create_conversation_store, ConversationConfig, LessonLevel};

    #[tokio::test]
    async fn factory_wires_offline_loop() {
        let config = Config::default();
        let clock = Arc::new(ManualClock::starting_now());
        let store = create_conversation_store(
            &config.sessions,
            Arc::new(StaticPersonaCatalog::builtin()),
            clock.clone(),
        );
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limits, clock));
        let service = create_practice_service(
            &config,
            store,
            limiter,
            Arc::new(OfflineGenerator::with_seed(9)),
        );

        let subject = SubjectId::new("learner1");
        let started = service
            .start(
                &subject,
                ConversationConfig::lesson("asking_questions", LessonLevel::Gold),
            )
            .unwrap();
        assert!(started.opener.is_some());

        let reply = service
            .send(&subject, &started.conversation_id, "How was your weekend?")
            .await
            .unwrap();
        assert!(!reply.fallback_used);
        assert_eq!(reply.stats.message_count, 3);
    }
}
