// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Config key under which tools persist [`SchedulerConfig`].
pub const SCHEDULER_CONFIG_KEY: &str = "scheduler";

/// Tunables for a [`Scheduler`](crate::Scheduler).
///
/// Missing fields deserialize to their defaults, so partial JSON documents
/// are valid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Synchronize the worker with `drive_frame` through the two-flag
    /// handshake (one step of pipelining slack). When off, the worker
    /// free-runs, paced by `min_step_ms`.
    pub lock_step: bool,
    /// Sleep quantum while there is nothing to step (free-running worker,
    /// paused or stopped dedicated-rate tasks).
    pub idle_sleep_ms: u64,
    /// Free-running mode only: a logic pass shorter than this sleeps for the
    /// remainder.
    pub min_step_ms: u64,
    /// Name given to the worker thread.
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lock_step: true,
            idle_sleep_ms: 100,
            min_step_ms: 10,
            thread_name: "regen-logic".to_owned(),
        }
    }
}

impl SchedulerConfig {
    /// Idle quantum as a [`Duration`].
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    /// Minimum free-running step as a [`Duration`].
    pub fn min_step(&self) -> Duration {
        Duration::from_millis(self.min_step_ms)
    }
}
