//! Caller identity and admission control.
//!
//! [`SessionIdentity`] turns request metadata into a [`SubjectId`], the key
//! every conversation and rate-limit window is partitioned by.
//! [`RateLimiter`] decides whether a subject may perform an action right now.

pub mod identity;
pub mod rate_limit;

pub use identity::{random_subject, IdentityError, RequestMeta, SessionIdentity, SubjectId};
pub use rate_limit::{
    normalize_action, RateDecision, RateLimiter, RatePolicy, ACTION_CONVERSATION_START,
    ACTION_MESSAGE,
};

/// Redact sensitive values for safe logging. Shows first 4 chars + "***" suffix.
pub fn redact(value: &str) -> String {
    match value.char_indices().nth(4) {
        Some((cut, _)) => format!("{}***", &value[..cut]),
        None => "***".to_string(),
    }
}
