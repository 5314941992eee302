use chrono::{DateTime, Utc};

use crate::sessions::{ConversationId, ConversationStatus, SessionError};

/// Caller-facing failures of the conversation loop.
///
/// A failed or slow reply generator is not among them: that surfaces as a
/// fallback reply with a warning on the outcome.
#[derive(Debug, thiserror::Error)]
pub enum PracticeError {
    #[error("conversation {0} not found")]
    NotFound(ConversationId),

    #[error("conversation {0} belongs to another subject")]
    Forbidden(ConversationId),

    #[error("conversation {id} is not active (status: {status})")]
    NotActive {
        id: ConversationId,
        status: ConversationStatus,
    },

    #[error("rate limit exceeded for {action}; retry after {}", fmt_reset(.reset_time))]
    RateLimited {
        action: String,
        reset_time: Option<DateTime<Utc>>,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

fn fmt_reset(reset_time: &Option<DateTime<Utc>>) -> String {
    reset_time.map_or_else(|| "the window resets".to_string(), |t| t.to_rfc3339())
}

impl From<SessionError> for PracticeError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidConfig(msg) => Self::InvalidConfig(msg),
        }
    }
}
