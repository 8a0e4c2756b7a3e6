//! Process-wide hybrid logical clock for stamping ownership changes.
//!
//! Wraps [`uhlc::HLC`]. Its NTP64 readings carry whole seconds in the upper
//! 32 bits and the sub-second fraction (with the logical counter folded into
//! the low bits) in the lower 32, which map one-to-one onto
//! [`ClusterTimestamp`]'s `(secs, inc)` pair. Ordering is preserved, so
//! strictly increasing HLC readings give strictly increasing cluster
//! timestamps.

use uhlc::{HLC, HLCBuilder, NTP64};

use crate::types::ClusterTimestamp;

/// Monotonic cluster clock.
pub struct LogicalClock {
    hlc: HLC,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self {
            hlc: HLCBuilder::new().build(),
        }
    }

    /// Take a new, strictly increasing reading.
    pub fn now(&self) -> ClusterTimestamp {
        to_cluster_timestamp(*self.hlc.new_timestamp().get_time())
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LogicalClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicalClock")
            .field("id", self.hlc.get_id())
            .finish()
    }
}

fn to_cluster_timestamp(time: NTP64) -> ClusterTimestamp {
    let raw = time.as_u64();
    ClusterTimestamp::new((raw >> 32) as u32, (raw & u64::from(u32::MAX)) as u32)
}
