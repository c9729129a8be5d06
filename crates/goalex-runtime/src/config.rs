use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_TICK_PERIOD_MS: u64 = 100;
pub const DEFAULT_OUTCOME_RETENTION_MS: i64 = 24 * 60 * 60 * 1000;
pub const DEFAULT_USER_PRIORITY_THRESHOLD: i64 = 100;
pub const DEFAULT_ARCHIVE_RETAIN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutiveConfig {
    pub tick_period_ms: u64,
    /// How long completed and rejected bookkeeping is kept.
    pub outcome_retention_ms: i64,
    /// Lowest priority of a user goal. Lower goals are held in stop mode.
    pub user_priority_threshold: i64,
    /// Finished goals left in the live collection by the archive sweep.
    pub archive_retain: usize,
    /// Write the default mode document when none exists.
    pub default_mode_on_missing: bool,
    pub publish_goal_types: bool,
    pub notification_buffer: usize,
}

impl Default for ExecutiveConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: DEFAULT_TICK_PERIOD_MS,
            outcome_retention_ms: DEFAULT_OUTCOME_RETENTION_MS,
            user_priority_threshold: DEFAULT_USER_PRIORITY_THRESHOLD,
            archive_retain: DEFAULT_ARCHIVE_RETAIN,
            default_mode_on_missing: false,
            publish_goal_types: true,
            notification_buffer: 1024,
        }
    }
}

impl ExecutiveConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms.max(1))
    }
}
