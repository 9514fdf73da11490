//! Generator configuration.
//!
//! A [`Config`] describes one run. It can be built in code, loaded from a JSON
//! file with [`Config::load`], or assembled from command line flags. Every field
//! has a default, so `{}` is a valid config file that produces a 32k filler
//! trace.
//!
//! ```json
//! {
//!   "size": "1m",
//!   "payload": "overenthusiastically",
//!   "schedule": {
//!     "policy": "round-robin",
//!     "tasks": [{"name": "prog1", "id": 10}, {"name": "prog2", "id": 11}],
//!     "cpu": 4
//!   }
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::GenError;
use crate::layout::RecordLayout;
use crate::sched::{Schedule, SchedulePolicy, Task};

pub const DEFAULT_SIZE: &str = "32k";
pub const DEFAULT_PAYLOAD: &str = "overenthusiastically";
pub const DEFAULT_TIMESTAMP_MS: u64 = 1393345613900;

pub const DEFAULT_SCHEDULE_START_MS: u64 = 1393345614000;
pub const DEFAULT_SCHEDULE_END_MS: u64 = 1393345615000;
pub const DEFAULT_SCHEDULE_PERIOD_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Requested trace size, e.g. `32k` or `1.5 MB`.
    pub size: String,
    pub layout: RecordLayout,
    /// Text stored in every filler record.
    pub payload: String,
    /// Timestamp of every filler record, in milliseconds.
    pub timestamp_ms: u64,
    /// Emit the filler records. Turn off to write only a schedule.
    pub fill: bool,
    pub schedule: Option<ScheduleConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            size: DEFAULT_SIZE.to_string(),
            layout: RecordLayout::default(),
            payload: DEFAULT_PAYLOAD.to_string(),
            timestamp_ms: DEFAULT_TIMESTAMP_MS,
            fill: true,
            schedule: None,
        }
    }
}

impl Config {
    /// Read a JSON config file.
    pub fn load(path: &Path) -> Result<Self, GenError> {
        let config_error = |reason: String| GenError::Config {
            path: path.display().to_string(),
            reason,
        };
        let buf = fs::read_to_string(path).map_err(|e| config_error(e.to_string()))?;
        serde_json::from_str(&buf).map_err(|e| config_error(e.to_string()))
    }
}

/// A synthesized context switch timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleConfig {
    pub policy: SchedulePolicy,
    pub tasks: Vec<Task>,
    pub start_ms: u64,
    /// Exclusive.
    pub end_ms: u64,
    pub period_ms: u64,
    pub cpu: u32,
}

impl Default for ScheduleConfig {
    /// An idle task and a busy task sharing CPU 0 for one second.
    fn default() -> Self {
        Self {
            policy: SchedulePolicy::Pair,
            tasks: vec![Task::new("swapper/0", 0), Task::new("prog50pc-cpu0", 30664)],
            start_ms: DEFAULT_SCHEDULE_START_MS,
            end_ms: DEFAULT_SCHEDULE_END_MS,
            period_ms: DEFAULT_SCHEDULE_PERIOD_MS,
            cpu: 0,
        }
    }
}

impl ScheduleConfig {
    /// The round-robin example timeline: four tasks on CPU 4.
    pub fn round_robin_example() -> Self {
        Self {
            policy: SchedulePolicy::RoundRobin,
            tasks: (1..=4)
                .map(|i| Task::new(format!("prog{i}"), 9 + i))
                .collect(),
            cpu: 4,
            ..Self::default()
        }
    }

    pub fn synthesize(&self) -> Result<Schedule, GenError> {
        Schedule::new(
            self.policy,
            self.start_ms,
            self.end_ms,
            self.cpu,
            self.period_ms,
            self.tasks.clone(),
        )
    }
}
