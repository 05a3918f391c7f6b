//! Periodic agent loops.
//!
//! - [`CollectionScheduler`]: samples sources into the store every poll interval
//! - [`ReportScheduler`]: snapshots the store into delivery jobs every report interval
//!
//! Every loop stops on the shared broadcast shutdown signal.

use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

mod collection;
mod report;

pub use collection::{CollectionScheduler, LIVENESS_COUNTER, LIVENESS_GAUGE};
pub use report::ReportScheduler;

/// Interval whose first tick fires one `period` from now.
///
/// Late ticks are delayed rather than bursted.
pub fn ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
