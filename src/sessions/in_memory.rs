//! In-memory conversation store implementation.

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use super::stats::compute_stats;
use super::traits::{
    ConversationConfig, ConversationId, ConversationKind, ConversationOverview,
    ConversationRecord, ConversationStats, ConversationStatus, ConversationStore,
    ConversationSummary, HistoryTurn, ReapReport, Role, StoreOverview, TransitionOutcome, Turn,
};
use super::SessionError;
use crate::config::{duration_from_secs, SessionsConfig};
use crate::infra::{Clock, SweepReport, Sweeper};
use crate::personas::CharacterSelector;
use crate::security::{redact, SubjectId};

/// Timing and sizing knobs for the store.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Active records idle longer than this are abandoned on reap.
    pub idle_timeout: Duration,
    /// Records of any status idle longer than this are dropped on reap.
    pub retention: Duration,
    /// How long an ended record stays readable.
    pub end_grace: Duration,
    pub default_history_limit: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::from(&SessionsConfig::default())
    }
}

impl From<&SessionsConfig> for StoreSettings {
    fn from(config: &SessionsConfig) -> Self {
        Self {
            idle_timeout: duration_from_secs(config.idle_timeout_secs),
            retention: duration_from_secs(config.retention_secs),
            end_grace: duration_from_secs(config.end_grace_secs),
            default_history_limit: config.default_history_limit,
        }
    }
}

type Slot = Arc<Mutex<ConversationRecord>>;

/// Conversation store backed by a map of individually locked records.
///
/// Lock order is always map first, then record. Mutations grab the record's
/// `Arc` under a short map read lock and release the map before locking the
/// record, so a double-submit on one conversation serializes on that record
/// only.
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<ConversationId, Slot>>,
    selector: CharacterSelector,
    clock: Arc<dyn Clock>,
    settings: StoreSettings,
    reaping: Mutex<()>,
}

impl InMemoryConversationStore {
    pub fn new(
        selector: CharacterSelector,
        clock: Arc<dyn Clock>,
        settings: StoreSettings,
    ) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            selector,
            clock,
            settings,
            reaping: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Number of records physically held, including ended ones that are
    /// past their grace period but not yet purged.
    pub fn len(&self) -> usize {
        self.conversations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.read().is_empty()
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn next_id(&self, kind: ConversationKind, subject: &SubjectId) -> ConversationId {
        let prefix: String = subject.as_str().chars().take(8).collect();
        ConversationId::new(format!(
            "{kind}_{prefix}_{}",
            uuid::Uuid::new_v4().simple()
        ))
    }

    /// Look up a record that is still visible. Ended records past their
    /// grace period are purged on the way.
    fn live_slot(&self, id: &ConversationId) -> Option<Slot> {
        let slot = self.conversations.read().get(id).cloned()?;
        let expired = !is_visible(&slot.lock(), self.now());
        if expired {
            let mut map = self.conversations.write();
            if map.get(id).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                map.remove(id);
                tracing::debug!(conversation = %id, "Purged ended conversation after grace period");
            }
            return None;
        }
        Some(slot)
    }
}

fn is_visible(record: &ConversationRecord, now: DateTime<Utc>) -> bool {
    record.removal_due.map_or(true, |due| now < due)
}

fn complete(record: &mut ConversationRecord, now: DateTime<Utc>) {
    record.status = ConversationStatus::Completed;
    record.last_activity = now;
    stamp_end(record, now);
}

fn stamp_end(record: &mut ConversationRecord, now: DateTime<Utc>) {
    record.end_time = Some(now);
    record.duration_ms = Some((now - record.start_time).num_milliseconds());
}

impl ConversationStore for InMemoryConversationStore {
    fn start(
        &self,
        subject: &SubjectId,
        config: ConversationConfig,
    ) -> Result<ConversationId, SessionError> {
        config.validate()?;
        let character = self.selector.select(&config)?;
        let kind = config.kind();
        let now = self.now();

        let mut map = self.conversations.write();
        let mut id = self.next_id(kind, subject);
        while map.contains_key(&id) {
            id = self.next_id(kind, subject);
        }

        tracing::info!(
            conversation = %id,
            subject = %redact(subject.as_str()),
            kind = %kind,
            character = %character.id,
            "Conversation started"
        );

        let record = ConversationRecord {
            id: id.clone(),
            subject_id: subject.clone(),
            kind,
            config,
            character,
            history: Vec::new(),
            message_count: 0,
            start_time: now,
            last_activity: now,
            end_time: None,
            duration_ms: None,
            status: ConversationStatus::Active,
            metadata: HashMap::new(),
            removal_due: None,
        };
        map.insert(id.clone(), Arc::new(Mutex::new(record)));
        Ok(id)
    }

    fn add_message(&self, id: &ConversationId, role: Role, content: &str) -> bool {
        let Some(slot) = self.live_slot(id) else {
            tracing::debug!(conversation = %id, "Dropped message for unknown conversation");
            return false;
        };

        let mut record = slot.lock();
        if record.status.is_terminal() {
            tracing::warn!(
                conversation = %id,
                status = %record.status,
                "Rejected message for closed conversation"
            );
            return false;
        }

        let now = self.now();
        record.history.push(Turn {
            role,
            content: content.to_string(),
            timestamp: now,
        });
        record.message_count += 1;
        record.last_activity = now;
        true
    }

    fn get(&self, id: &ConversationId) -> Option<ConversationRecord> {
        let slot = self.live_slot(id)?;
        let record = slot.lock().clone();
        Some(record)
    }

    fn history(&self, id: &ConversationId, limit: Option<usize>) -> Vec<HistoryTurn> {
        let limit = limit.unwrap_or(self.settings.default_history_limit);
        if limit == 0 {
            return Vec::new();
        }
        let Some(slot) = self.live_slot(id) else {
            return Vec::new();
        };

        let record = slot.lock();
        let start = record.history.len().saturating_sub(limit);
        record.history[start..].iter().map(HistoryTurn::from).collect()
    }

    fn update_status(
        &self,
        id: &ConversationId,
        status: ConversationStatus,
        extra: HashMap<String, String>,
    ) -> TransitionOutcome {
        let Some(slot) = self.live_slot(id) else {
            return TransitionOutcome::NotFound;
        };

        let mut record = slot.lock();
        if record.status == status {
            record.metadata.extend(extra);
            return TransitionOutcome::Unchanged;
        }
        if !record.status.can_transition_to(status) {
            tracing::debug!(
                conversation = %id,
                from = %record.status,
                to = %status,
                "Rejected status transition"
            );
            return TransitionOutcome::Rejected {
                from: record.status,
                to: status,
            };
        }

        let now = self.now();
        if status == ConversationStatus::Completed {
            complete(&mut record, now);
        } else {
            record.status = status;
            record.last_activity = now;
        }
        record.metadata.extend(extra);
        tracing::debug!(conversation = %id, status = %status, "Conversation status updated");
        TransitionOutcome::Applied
    }

    fn annotate(&self, id: &ConversationId, extra: HashMap<String, String>) -> bool {
        let Some(slot) = self.live_slot(id) else {
            return false;
        };
        slot.lock().metadata.extend(extra);
        true
    }

    fn end(&self, id: &ConversationId) -> Option<ConversationSummary> {
        let slot = self.live_slot(id)?;
        let mut record = slot.lock();
        let now = self.now();

        if !record.status.is_terminal() {
            complete(&mut record, now);
        } else if record.end_time.is_none() {
            stamp_end(&mut record, now);
        }
        if record.removal_due.is_none() {
            record.removal_due = Some(
                now.checked_add_signed(self.settings.end_grace)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            );
            tracing::info!(
                conversation = %id,
                status = %record.status,
                messages = record.message_count,
                duration_ms = record.duration_ms.unwrap_or_default(),
                "Conversation ended"
            );
        }

        Some(ConversationSummary::from(&*record))
    }

    fn stats(&self, id: &ConversationId) -> Option<ConversationStats> {
        let slot = self.live_slot(id)?;
        let record = slot.lock();
        Some(compute_stats(&record, self.now()))
    }

    fn reap(&self) -> Option<ReapReport> {
        let _in_flight = self.reaping.try_lock()?;
        let now = self.now();
        let mut report = ReapReport::default();

        let mut map = self.conversations.write();
        map.retain(|id, slot| {
            let mut record = slot.lock();
            let idle = now - record.last_activity;

            let grace_over = record.removal_due.is_some_and(|due| now >= due);
            if grace_over || idle > self.settings.retention {
                tracing::debug!(conversation = %id, status = %record.status, "Reaped conversation");
                report.removed += 1;
                return false;
            }

            if record.status == ConversationStatus::Active && idle > self.settings.idle_timeout {
                record.status = ConversationStatus::Abandoned;
                report.abandoned += 1;
            }
            true
        });
        report.remaining = map.len();
        drop(map);

        tracing::info!(
            abandoned = report.abandoned,
            removed = report.removed,
            remaining = report.remaining,
            "Conversation cleanup completed"
        );
        Some(report)
    }

    fn list_for_subject(&self, subject: &SubjectId) -> Vec<ConversationOverview> {
        let now = self.now();
        let map = self.conversations.read();
        let mut listed: Vec<ConversationOverview> = map
            .values()
            .filter_map(|slot| {
                let record = slot.lock();
                let wanted = record.is_owned_by(subject)
                    && record.status == ConversationStatus::Active
                    && is_visible(&record, now);
                wanted.then(|| ConversationOverview {
                    id: record.id.clone(),
                    kind: record.kind,
                    start_time: record.start_time,
                    message_count: record.message_count,
                    character: record.character.clone(),
                })
            })
            .collect();

        listed.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        listed
    }

    fn overview(&self) -> StoreOverview {
        let now = self.now();
        let map = self.conversations.read();
        let mut overview = StoreOverview::default();
        for slot in map.values() {
            let record = slot.lock();
            if !is_visible(&record, now) {
                continue;
            }
            overview.total += 1;
            match record.status {
                ConversationStatus::Active => overview.active += 1,
                ConversationStatus::Paused => overview.paused += 1,
                ConversationStatus::Completed => overview.completed += 1,
                ConversationStatus::Abandoned => overview.abandoned += 1,
            }
        }
        overview
    }

    fn clear(&self) {
        let mut map = self.conversations.write();
        let dropped = map.len();
        map.clear();
        tracing::info!(dropped, "Conversation store cleared");
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}

impl Sweeper for InMemoryConversationStore {
    fn sweep(&self) -> SweepReport {
        match self.reap() {
            Some(report) => SweepReport {
                retired: report.abandoned,
                removed: report.removed,
                remaining: report.remaining,
                skipped: false,
            },
            None => SweepReport::skipped(),
        }
    }

    fn name(&self) -> &str {
        "conversations"
    }
}
