//! Seams to the collaborators around the conversation loop.

use anyhow::Result;
use async_trait::async_trait;

use super::review::PerformanceReview;
use crate::sessions::{ConversationSummary, HistoryTurn};

/// Text generation backend that voices the persona.
///
/// Implementations may fail or hang; the caller bounds every call with a
/// timeout and substitutes a canned reply.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Produce the persona's next line. `history` excludes `user_message`.
    async fn generate(
        &self,
        system_prompt: &str,
        history: &[HistoryTurn],
        user_message: &str,
    ) -> Result<String>;

    fn name(&self) -> &str;
}

/// Durable progress sink, called once when a conversation ends.
#[async_trait]
pub trait ProgressRecorder: Send + Sync {
    async fn record(&self, summary: &ConversationSummary, review: &PerformanceReview)
        -> Result<()>;

    fn name(&self) -> &str;
}

/// Progress recorder that drops everything.
#[derive(Debug, Clone, Default)]
pub struct NoopProgressRecorder;

#[async_trait]
impl ProgressRecorder for NoopProgressRecorder {
    async fn record(
        &self,
        _summary: &ConversationSummary,
        _review: &PerformanceReview,
    ) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}
