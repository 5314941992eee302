use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries moved to a terminal or idle state without being dropped.
    pub retired: usize,
    /// Entries dropped from memory.
    pub removed: usize,
    /// Entries still held after the pass.
    pub remaining: usize,
    /// Set when the pass was skipped because another one was in flight.
    pub skipped: bool,
}

impl SweepReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Summary of a reaper tick across all registered sweepers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickResult {
    pub checked_at: DateTime<Utc>,
    pub reports: Vec<(String, SweepReport)>,
}

/// Something that holds in-memory state and knows how to age it out.
///
/// Sweeps must be synchronous and cheap: they run on the reaper task and
/// only ever touch in-memory structures.
pub trait Sweeper: Send + Sync {
    fn sweep(&self) -> SweepReport;
    fn name(&self) -> &str;
}
