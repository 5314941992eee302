//! Conversation state: records, the in-memory store, and derived stats.

pub mod in_memory;
pub mod stats;
pub mod traits;

pub use in_memory::{InMemoryConversationStore, StoreSettings};
pub use stats::{compute_stats, summary_stats};
pub use traits::{
    ConversationConfig, ConversationId, ConversationKind, ConversationOverview,
    ConversationRecord, ConversationStats, ConversationStatus, ConversationStore,
    ConversationSummary, HistoryTurn, LessonConfig, LessonLevel, Mission, ReapReport, Role,
    ScenarioConfig, ScenarioInfo, StoreOverview, TransitionOutcome, Turn,
};

use std::sync::Arc;

use crate::config::SessionsConfig;
use crate::infra::Clock;
use crate::personas::{CharacterSelector, PersonaCatalog};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid conversation config: {0}")]
    InvalidConfig(String),
}

/// Create the in-memory conversation store from config.
///
/// Returned as a concrete `Arc` so the same instance can be handed to the
/// reaper as a sweeper.
pub fn create_conversation_store(
    config: &SessionsConfig,
    catalog: Arc<dyn PersonaCatalog>,
    clock: Arc<dyn Clock>,
) -> Arc<InMemoryConversationStore> {
    Arc::new(InMemoryConversationStore::new(
        CharacterSelector::new(catalog),
        clock,
        StoreSettings::from(config),
    ))
}
