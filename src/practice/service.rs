//! The conversation loop as seen by a request layer.
//!
//! Every externally triggered mutation is admitted by the rate limiter first,
//! ownership is checked against the caller's subject, and every user turn
//! gets an assistant turn even when the generator fails.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

use super::error::PracticeError;
use super::fallback::{lesson_fallback, lesson_opener, scenario_fallback, scenario_opener};
use super::prompt::build_system_prompt;
use super::reply::{
    process_reply, read_mood, read_state, CharacterState, Mood, ProcessedReply,
};
use super::review::{mission_progress, review, MissionProgress, PerformanceReview};
use super::traits::{NoopProgressRecorder, ProgressRecorder, ReplyGenerator};
use crate::config::Config;
use crate::personas::Persona;
use crate::security::{
    redact, RateDecision, RateLimiter, SubjectId, ACTION_CONVERSATION_START, ACTION_MESSAGE,
};
use crate::sessions::{
    summary_stats, ConversationConfig, ConversationId, ConversationKind, ConversationOverview,
    ConversationRecord, ConversationStats, ConversationStatus, ConversationStore,
    ConversationSummary, Role, TransitionOutcome,
};

pub const FALLBACK_WARNING: &str = "Using fallback response";

#[derive(Debug, Clone)]
pub struct PracticeSettings {
    pub generation_timeout: Duration,
    pub max_message_chars: usize,
    pub reply_history_limit: usize,
}

impl Default for PracticeSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PracticeSettings {
    fn from(config: &Config) -> Self {
        Self {
            generation_timeout: Duration::from_secs(config.generation.timeout_secs),
            max_message_chars: config.generation.max_message_chars,
            reply_history_limit: config.sessions.reply_history_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub conversation_id: ConversationId,
    pub character: Persona,
    /// Assistant turn appended on start, if any.
    pub opener: Option<String>,
    pub remaining: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplyOutcome {
    pub conversation_id: ConversationId,
    pub reply: String,
    pub mood: Mood,
    pub state: CharacterState,
    pub character: String,
    pub fallback_used: bool,
    pub warning: Option<String>,
    pub stats: ConversationStats,
    pub mission: Option<MissionProgress>,
    pub remaining: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndOutcome {
    pub summary: ConversationSummary,
    pub stats: ConversationStats,
    pub review: PerformanceReview,
}

/// Per-conversation exchange locks. A send holds its conversation's lock
/// from the status check until the reply is stored, and end takes the same
/// lock, so a conversation never closes between a user turn and its reply.
#[derive(Default)]
struct TurnLocks {
    slots: Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>>,
}

impl TurnLocks {
    async fn acquire(&self, id: &ConversationId) -> TurnGuard<'_> {
        let slot = self.slots.lock().entry(id.clone()).or_default().clone();
        let guard = slot.lock_owned().await;
        TurnGuard {
            locks: self,
            id: id.clone(),
            guard: Some(guard),
        }
    }

    fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

struct TurnGuard<'a> {
    locks: &'a TurnLocks,
    id: ConversationId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        let mut slots = self.locks.slots.lock();
        drop(self.guard.take());
        if slots
            .get(&self.id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.id);
        }
    }
}

pub struct PracticeService {
    store: Arc<dyn ConversationStore>,
    limiter: Arc<RateLimiter>,
    generator: Arc<dyn ReplyGenerator>,
    recorder: Arc<dyn ProgressRecorder>,
    settings: PracticeSettings,
    rng: Mutex<StdRng>,
    turns: TurnLocks,
}

impl PracticeService {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        limiter: Arc<RateLimiter>,
        generator: Arc<dyn ReplyGenerator>,
        settings: PracticeSettings,
    ) -> Self {
        Self {
            store,
            limiter,
            generator,
            recorder: Arc::new(NoopProgressRecorder),
            settings,
            rng: Mutex::new(StdRng::from_entropy()),
            turns: TurnLocks::default(),
        }
    }

    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<dyn ProgressRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Seed openers and fallback picks.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    fn admit(&self, subject: &SubjectId, action: &str) -> Result<RateDecision, PracticeError> {
        let decision = self.limiter.check(subject, action);
        if decision.allowed {
            return Ok(decision);
        }
        tracing::info!(
            subject = %redact(subject.as_str()),
            action,
            reset_time = ?decision.reset_time,
            "Rate limit exceeded"
        );
        Err(PracticeError::RateLimited {
            action: action.to_string(),
            reset_time: decision.reset_time,
        })
    }

    /// Look up a record and make sure `subject` owns it.
    pub fn conversation(
        &self,
        subject: &SubjectId,
        id: &ConversationId,
    ) -> Result<ConversationRecord, PracticeError> {
        let record = self
            .store
            .get(id)
            .ok_or_else(|| PracticeError::NotFound(id.clone()))?;
        if !record.is_owned_by(subject) {
            tracing::warn!(
                conversation = %id,
                subject = %redact(subject.as_str()),
                "Conversation accessed by another subject"
            );
            return Err(PracticeError::Forbidden(id.clone()));
        }
        Ok(record)
    }

    pub fn stats(
        &self,
        subject: &SubjectId,
        id: &ConversationId,
    ) -> Result<ConversationStats, PracticeError> {
        self.conversation(subject, id)?;
        self.store
            .stats(id)
            .ok_or_else(|| PracticeError::NotFound(id.clone()))
    }

    pub fn list(&self, subject: &SubjectId) -> Vec<ConversationOverview> {
        self.store.list_for_subject(subject)
    }

    pub fn start(
        &self,
        subject: &SubjectId,
        config: ConversationConfig,
    ) -> Result<StartOutcome, PracticeError> {
        let decision = self.admit(subject, ACTION_CONVERSATION_START)?;
        let id = self.store.start(subject, config)?;
        let record = self
            .store
            .get(&id)
            .ok_or_else(|| PracticeError::NotFound(id.clone()))?;

        let opener = self.opener(&record);
        if let Some(line) = &opener {
            self.store.add_message(&id, Role::Assistant, line);
        }

        Ok(StartOutcome {
            conversation_id: id,
            character: record.character,
            opener,
            remaining: decision.remaining,
        })
    }

    fn opener(&self, record: &ConversationRecord) -> Option<String> {
        let mut rng = self.rng.lock();
        match &record.config {
            ConversationConfig::Lesson(lesson) => Some(lesson_opener(
                &record.character,
                &lesson.display_title(),
                &mut *rng,
            )),
            ConversationConfig::Scenario(scenario) => scenario
                .scenario
                .conversation_starters
                .choose(&mut *rng)
                .map(|starter| scenario_opener(&record.character, starter)),
        }
    }

    /// Append the user's message and the persona's reply.
    pub async fn send(
        &self,
        subject: &SubjectId,
        id: &ConversationId,
        message: &str,
    ) -> Result<ReplyOutcome, PracticeError> {
        let decision = self.admit(subject, ACTION_MESSAGE)?;

        let message = message.trim();
        if message.is_empty() {
            return Err(PracticeError::InvalidInput("message must not be empty".into()));
        }
        if message.chars().count() > self.settings.max_message_chars {
            return Err(PracticeError::InvalidInput(format!(
                "message too long (max {} characters)",
                self.settings.max_message_chars
            )));
        }

        let _turn = self.turns.acquire(id).await;
        let record = self.conversation(subject, id)?;
        if record.status != ConversationStatus::Active {
            return Err(PracticeError::NotActive {
                id: id.clone(),
                status: record.status,
            });
        }

        let history = self
            .store
            .history(id, Some(self.settings.reply_history_limit));
        if !self.store.add_message(id, Role::User, message) {
            return Err(self.closed_error(id));
        }

        let prompt = build_system_prompt(&record.character, &record.config);
        let generated = tokio::time::timeout(
            self.settings.generation_timeout,
            self.generator.generate(&prompt, &history, message),
        )
        .await;

        let outcome = match generated {
            Ok(Ok(raw)) if !raw.trim().is_empty() => Ok(raw),
            Ok(Ok(_)) => Err("generator returned an empty reply".to_string()),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(_) => Err(format!(
                "generator timed out after {}ms",
                self.settings.generation_timeout.as_millis()
            )),
        };

        let (processed, warning) = match outcome {
            Ok(raw) => (process_reply(&raw), None),
            Err(reason) => {
                tracing::warn!(
                    conversation = %id,
                    generator = self.generator.name(),
                    error = %reason,
                    "Reply generation failed, using fallback"
                );
                self.store.annotate(
                    id,
                    HashMap::from([
                        ("fallback_used".to_string(), "true".to_string()),
                        ("last_upstream_failure".to_string(), reason),
                    ]),
                );
                let line = self.fallback_for(&record);
                let fallback = ProcessedReply {
                    mood: read_mood(&line),
                    state: read_state(&line),
                    text: line,
                };
                (fallback, Some(FALLBACK_WARNING.to_string()))
            }
        };

        if !self.store.add_message(id, Role::Assistant, &processed.text) {
            tracing::warn!(conversation = %id, "Conversation closed before the reply was stored");
        }

        let latest = self
            .store
            .get(id)
            .ok_or_else(|| PracticeError::NotFound(id.clone()))?;
        let stats = self
            .store
            .stats(id)
            .ok_or_else(|| PracticeError::NotFound(id.clone()))?;
        let mission = latest
            .config
            .mission()
            .map(|m| mission_progress(m, &latest.history));

        tracing::debug!(
            conversation = %id,
            messages = stats.message_count,
            fallback = warning.is_some(),
            "Reply delivered"
        );

        Ok(ReplyOutcome {
            conversation_id: id.clone(),
            reply: processed.text,
            mood: processed.mood,
            state: processed.state,
            character: stats.character.clone(),
            fallback_used: warning.is_some(),
            warning,
            stats,
            mission,
            remaining: decision.remaining,
        })
    }

    fn fallback_for(&self, record: &ConversationRecord) -> String {
        match record.kind {
            ConversationKind::Lesson => lesson_fallback().to_string(),
            ConversationKind::Scenario => {
                let mut rng = self.rng.lock();
                scenario_fallback(&record.character, &mut *rng)
            }
        }
    }

    fn closed_error(&self, id: &ConversationId) -> PracticeError {
        match self.store.get(id) {
            Some(record) => PracticeError::NotActive {
                id: id.clone(),
                status: record.status,
            },
            None => PracticeError::NotFound(id.clone()),
        }
    }

    pub fn pause(&self, subject: &SubjectId, id: &ConversationId) -> Result<(), PracticeError> {
        self.conversation(subject, id)?;
        self.transition_result(id, self.store.pause(id))
    }

    pub fn resume(&self, subject: &SubjectId, id: &ConversationId) -> Result<(), PracticeError> {
        self.conversation(subject, id)?;
        self.transition_result(id, self.store.resume(id))
    }

    fn transition_result(
        &self,
        id: &ConversationId,
        outcome: TransitionOutcome,
    ) -> Result<(), PracticeError> {
        match outcome {
            TransitionOutcome::Applied | TransitionOutcome::Unchanged => Ok(()),
            TransitionOutcome::Rejected { from, .. } => Err(PracticeError::NotActive {
                id: id.clone(),
                status: from,
            }),
            TransitionOutcome::NotFound => Err(PracticeError::NotFound(id.clone())),
        }
    }

    /// Finish the conversation, review it and hand it to the progress
    /// recorder. Waits for an in-flight reply to be stored first. Recorder
    /// failures are logged, never returned.
    pub async fn end(
        &self,
        subject: &SubjectId,
        id: &ConversationId,
    ) -> Result<EndOutcome, PracticeError> {
        self.conversation(subject, id)?;
        let summary = {
            let _turn = self.turns.acquire(id).await;
            self.store
                .end(id)
                .ok_or_else(|| PracticeError::NotFound(id.clone()))?
        };

        let stats = summary_stats(&summary);
        let review = review(&stats, &summary.history, summary.config.mission());

        if let Err(e) = self.recorder.record(&summary, &review).await {
            tracing::warn!(
                conversation = %id,
                recorder = self.recorder.name(),
                error = %e,
                "Failed to record progress"
            );
        }

        tracing::info!(
            conversation = %id,
            rating = review.rating.as_str(),
            score = review.score,
            "Conversation reviewed"
        );
        Ok(EndOutcome {
            summary,
            stats,
            review,
        })
    }
}
