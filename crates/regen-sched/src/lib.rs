// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! regen-sched: dual-thread task scheduler.
//!
//! Every [`Task`] carries two hooks. `logic_update` runs on the scheduler's
//! worker thread (or on a dedicated per-task thread) and does CPU-only work;
//! `render_update` runs on the thread that owns the graphics context, driven
//! by [`Scheduler::drive_frame`]. In lock-step mode the worker computes step
//! N+1 while the render thread draws frame N, and neither side gets more than
//! one step ahead of the other.
//!
//! ```no_run
//! use std::sync::Arc;
//! use regen_sched::{Scheduler, SchedulerConfig, Task, TaskCore};
//!
//! struct Spin {
//!     core: TaskCore,
//! }
//!
//! impl Task<()> for Spin {
//!     fn core(&self) -> &TaskCore {
//!         &self.core
//!     }
//!     fn logic_update(&self, dt: f64) {
//!         let _guard = self.core.lock();
//!         let _ = dt;
//!     }
//! }
//!
//! # fn main() -> Result<(), regen_sched::SchedulerError> {
//! let scheduler: Scheduler<()> = Scheduler::spawn(SchedulerConfig::default())?;
//! let spin = Arc::new(Spin { core: TaskCore::builder("spin").logic().render().running().build() });
//! scheduler.register_task(spin)?;
//! scheduler.resume();
//! for _ in 0..3 {
//!     scheduler.drive_frame(&mut (), 16.0);
//! }
//! scheduler.close(true)?;
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]

mod config;
mod dedicated;
mod scheduler;
mod signal;
mod task;

pub use config::{SchedulerConfig, SCHEDULER_CONFIG_KEY};
pub use scheduler::{Scheduler, SchedulerError, TaskRef};
pub use task::{LogicMode, Task, TaskCore, TaskCoreBuilder, TaskId};
