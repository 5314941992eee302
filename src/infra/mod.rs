pub mod clock;
pub mod reaper;
pub mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use reaper::Reaper;
pub use traits::{SweepReport, Sweeper, TickResult};

use std::sync::Arc;
use std::time::Duration;

pub fn create_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

pub fn start_reaper(interval: Duration, sweepers: Vec<Arc<dyn Sweeper>>) -> Reaper {
    Reaper::start(interval, sweepers)
}
