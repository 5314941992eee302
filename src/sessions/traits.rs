//! Conversation records, their configuration shapes, and the store trait.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::personas::Persona;
use crate::security::SubjectId;

// ── Identity ────────────────────────────────────────────────────

/// Opaque conversation identifier, unique for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ── Configuration shapes ────────────────────────────────────────

/// Conversation category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Lesson,
    Scenario,
}

impl ConversationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lesson => "lesson",
            Self::Scenario => "scenario",
        }
    }
}

impl fmt::Display for ConversationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationKind {
    type Err = super::SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lesson" => Ok(Self::Lesson),
            "scenario" => Ok(Self::Scenario),
            other => Err(super::SessionError::InvalidConfig(format!(
                "unknown conversation kind '{other}' (expected lesson or scenario)"
            ))),
        }
    }
}

/// Lesson difficulty tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LessonLevel {
    Bronze,
    Silver,
    Gold,
}

impl LessonLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
        }
    }

    /// The tier after this one, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Bronze => Some(Self::Silver),
            Self::Silver => Some(Self::Gold),
            Self::Gold => None,
        }
    }
}

impl FromStr for LessonLevel {
    type Err = super::SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bronze" => Ok(Self::Bronze),
            "silver" => Ok(Self::Silver),
            "gold" => Ok(Self::Gold),
            other => Err(super::SessionError::InvalidConfig(format!(
                "unknown lesson level '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LessonConfig {
    pub lesson_id: String,
    pub level: LessonLevel,
    /// Display title; the id is used when absent.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub learning_objective: Option<String>,
    /// Fully resolved persona; wins over `character_id`.
    #[serde(default)]
    pub character: Option<Persona>,
    #[serde(default)]
    pub character_id: Option<String>,
}

impl LessonConfig {
    /// Title for display, falling back to the id with underscores spaced out.
    pub fn display_title(&self) -> String {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title.to_string(),
            _ => self.lesson_id.replace('_', " "),
        }
    }
}

/// Static description of a scenario setting.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScenarioInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mood: String,
    #[serde(default)]
    pub time_of_day: String,
    #[serde(default)]
    pub social_norms: Vec<String>,
    /// Persona ids that can appear in this scenario.
    #[serde(default)]
    pub characters_present: Vec<String>,
    #[serde(default)]
    pub conversation_starters: Vec<String>,
}

/// Optional goal the user pursues inside a scenario.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mission {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub success_criteria: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScenarioConfig {
    pub scenario: ScenarioInfo,
    #[serde(default)]
    pub character: Option<Persona>,
    #[serde(default)]
    pub character_id: Option<String>,
    #[serde(default)]
    pub mission: Option<Mission>,
}

/// Immutable configuration captured when a conversation starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationConfig {
    Lesson(LessonConfig),
    Scenario(ScenarioConfig),
}

impl ConversationConfig {
    pub fn lesson(lesson_id: impl Into<String>, level: LessonLevel) -> Self {
        Self::Lesson(LessonConfig {
            lesson_id: lesson_id.into(),
            level,
            title: None,
            learning_objective: None,
            character: None,
            character_id: None,
        })
    }

    pub fn scenario(scenario: ScenarioInfo) -> Self {
        Self::Scenario(ScenarioConfig {
            scenario,
            character: None,
            character_id: None,
            mission: None,
        })
    }

    /// Build a config from an untyped kind string and the matching arm's
    /// fields, as received from an outer request layer.
    pub fn from_kind(kind: &str, fields: serde_json::Value) -> Result<Self, super::SessionError> {
        let invalid = |e: serde_json::Error| {
            super::SessionError::InvalidConfig(format!("malformed {kind} config: {e}"))
        };
        let config = match kind.parse::<ConversationKind>()? {
            ConversationKind::Lesson => {
                Self::Lesson(serde_json::from_value(fields).map_err(invalid)?)
            }
            ConversationKind::Scenario => {
                Self::Scenario(serde_json::from_value(fields).map_err(invalid)?)
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn kind(&self) -> ConversationKind {
        match self {
            Self::Lesson(_) => ConversationKind::Lesson,
            Self::Scenario(_) => ConversationKind::Scenario,
        }
    }

    pub fn character(&self) -> Option<&Persona> {
        match self {
            Self::Lesson(c) => c.character.as_ref(),
            Self::Scenario(c) => c.character.as_ref(),
        }
    }

    pub fn character_id(&self) -> Option<&str> {
        let id = match self {
            Self::Lesson(c) => c.character_id.as_deref(),
            Self::Scenario(c) => c.character_id.as_deref(),
        };
        id.filter(|id| !id.trim().is_empty())
    }

    pub fn mission(&self) -> Option<&Mission> {
        match self {
            Self::Lesson(_) => None,
            Self::Scenario(c) => c.mission.as_ref(),
        }
    }

    /// Shape checks that must pass before any record is created.
    pub fn validate(&self) -> Result<(), super::SessionError> {
        let invalid = |msg: &str| Err(super::SessionError::InvalidConfig(msg.to_string()));
        match self {
            Self::Lesson(c) => {
                if c.lesson_id.trim().is_empty() {
                    return invalid("lesson_id must not be empty");
                }
            }
            Self::Scenario(c) => {
                if c.scenario.id.trim().is_empty() {
                    return invalid("scenario.id must not be empty");
                }
                if let Some(mission) = &c.mission {
                    if mission.id.trim().is_empty() {
                        return invalid("mission.id must not be empty");
                    }
                }
            }
        }
        Ok(())
    }
}

// ── Turns and status ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A timestamped history entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A history entry stripped of metadata, ready for a text generator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryTurn {
    pub role: Role,
    pub content: String,
}

impl HistoryTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

impl From<&Turn> for HistoryTurn {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role,
            content: turn.content.clone(),
        }
    }
}

/// Conversation lifecycle state.
///
/// `active -> {paused, completed, abandoned}`, `paused -> {active, abandoned}`.
/// `completed` and `abandoned` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Paused,
    Completed,
    Abandoned,
}

impl ConversationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use ConversationStatus::{Abandoned, Active, Completed, Paused};
        matches!(
            (self, next),
            (Active, Paused | Completed | Abandoned) | (Paused, Active | Abandoned)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a status update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// The record already had the requested status.
    Unchanged,
    Rejected {
        from: ConversationStatus,
        to: ConversationStatus,
    },
    NotFound,
}

impl TransitionOutcome {
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Applied | Self::Unchanged)
    }
}

// ── Record and derived views ────────────────────────────────────

/// One chat session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: ConversationId,
    pub subject_id: SubjectId,
    pub kind: ConversationKind,
    pub config: ConversationConfig,
    pub character: Persona,
    pub history: Vec<Turn>,
    pub message_count: u64,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// `end_time - start_time` in milliseconds, set on completion.
    pub duration_ms: Option<i64>,
    pub status: ConversationStatus,
    /// Extra attributes attached through status updates.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// When an ended record stops being visible.
    #[serde(skip)]
    pub(crate) removal_due: Option<DateTime<Utc>>,
}

impl ConversationRecord {
    pub fn is_owned_by(&self, subject: &SubjectId) -> bool {
        &self.subject_id == subject
    }
}

/// Immutable snapshot returned by `end`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub subject_id: SubjectId,
    pub kind: ConversationKind,
    pub config: ConversationConfig,
    pub character: Persona,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub last_activity: DateTime<Utc>,
    pub message_count: u64,
    pub status: ConversationStatus,
    pub history: Vec<Turn>,
}

impl From<&ConversationRecord> for ConversationSummary {
    fn from(record: &ConversationRecord) -> Self {
        Self {
            id: record.id.clone(),
            subject_id: record.subject_id.clone(),
            kind: record.kind,
            config: record.config.clone(),
            character: record.character.clone(),
            start_time: record.start_time,
            end_time: record.end_time,
            duration_ms: record.duration_ms,
            last_activity: record.last_activity,
            message_count: record.message_count,
            status: record.status,
            history: record.history.clone(),
        }
    }
}

/// Metrics derived from a record on demand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationStats {
    /// Whole seconds from start to end (or to now while still open).
    pub duration_secs: i64,
    pub message_count: u64,
    pub user_message_count: usize,
    pub ai_message_count: usize,
    /// Mean user message length in characters, rounded; 0 without user turns.
    pub average_user_message_length: u64,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Persona display name, or its id when the name is blank.
    pub character: String,
}

/// Short listing entry for a subject's open conversations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationOverview {
    pub id: ConversationId,
    pub kind: ConversationKind,
    pub start_time: DateTime<Utc>,
    pub message_count: u64,
    pub character: Persona,
}

/// Record counts by status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreOverview {
    pub total: usize,
    pub active: usize,
    pub paused: usize,
    pub completed: usize,
    pub abandoned: usize,
}

/// Outcome of one reaper pass over the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReapReport {
    pub abandoned: usize,
    pub removed: usize,
    pub remaining: usize,
}

// ── Store trait ─────────────────────────────────────────────────

/// Owner of all live conversation state.
///
/// Every operation completes against in-memory data; none of them block on
/// I/O. Unknown ids are reported through the return value, never as errors.
/// The store does not check ownership: callers compare
/// [`ConversationRecord::subject_id`] with their own subject before trusting
/// a record.
pub trait ConversationStore: Send + Sync {
    /// Create a record with status `active` and a persona bound once.
    fn start(
        &self,
        subject: &SubjectId,
        config: ConversationConfig,
    ) -> Result<ConversationId, super::SessionError>;

    /// Append a turn. Returns `false` for unknown, expired or terminal records.
    fn add_message(&self, id: &ConversationId, role: Role, content: &str) -> bool;

    fn get(&self, id: &ConversationId) -> Option<ConversationRecord>;

    /// The most recent `limit` turns in call order; `None` uses the
    /// configured default.
    fn history(&self, id: &ConversationId, limit: Option<usize>) -> Vec<HistoryTurn>;

    fn update_status(
        &self,
        id: &ConversationId,
        status: ConversationStatus,
        extra: HashMap<String, String>,
    ) -> TransitionOutcome;

    /// Merge `extra` into the record's metadata without touching its status.
    /// Returns `false` for unknown or expired records.
    fn annotate(&self, id: &ConversationId, extra: HashMap<String, String>) -> bool;

    /// Complete the conversation and return its snapshot. The record stays
    /// readable for the grace period, then disappears.
    fn end(&self, id: &ConversationId) -> Option<ConversationSummary>;

    fn stats(&self, id: &ConversationId) -> Option<ConversationStats>;

    /// Abandon idle records and drop expired ones. Returns `None` when a
    /// reap is already running.
    fn reap(&self) -> Option<ReapReport>;

    /// Active conversations owned by `subject`.
    fn list_for_subject(&self, subject: &SubjectId) -> Vec<ConversationOverview>;

    fn overview(&self) -> StoreOverview;

    /// Drop every record.
    fn clear(&self);

    fn pause(&self, id: &ConversationId) -> TransitionOutcome {
        self.update_status(id, ConversationStatus::Paused, HashMap::new())
    }

    fn resume(&self, id: &ConversationId) -> TransitionOutcome {
        self.update_status(id, ConversationStatus::Active, HashMap::new())
    }

    fn abandon(&self, id: &ConversationId) -> TransitionOutcome {
        self.update_status(id, ConversationStatus::Abandoned, HashMap::new())
    }

    fn name(&self) -> &str;
}
