// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Dedicated-rate logic threads.
//!
//! Tasks registered with [`LogicMode::Dedicated`](crate::LogicMode) step on
//! their own thread instead of joining the lock-step pass. The loop sleeps to
//! approximate the desired rate and idles while the scheduler is paused or
//! the task is stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::scheduler::TaskRef;
use crate::TaskId;

/// Handle to one running dedicated thread.
#[derive(Debug)]
pub(crate) struct DedicatedThread {
    id: TaskId,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl DedicatedThread {
    /// Spawns the stepping loop for `task`.
    pub(crate) fn spawn<C>(
        task: TaskRef<C>,
        hz: f64,
        paused: Arc<AtomicBool>,
        idle: Duration,
    ) -> std::io::Result<Self>
    where
        C: ?Sized + 'static,
    {
        let id = task.core().id();
        let stop = Arc::new(AtomicBool::new(false));
        let period = Duration::try_from_secs_f64(hz.recip()).unwrap_or(Duration::MAX);
        let handle = thread::Builder::new()
            .name(format!("regen-task-{}", id.value()))
            .spawn({
                let stop = Arc::clone(&stop);
                move || step_loop(&task, period, &stop, &paused, idle)
            })?;
        Ok(Self { id, stop, handle })
    }

    pub(crate) fn thread_id(&self) -> ThreadId {
        self.handle.thread().id()
    }

    /// Asks the loop to exit without waiting for it.
    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.handle.thread().unpark();
    }

    /// Stops the loop and joins it, unless called from the loop itself.
    pub(crate) fn stop_and_join(self) {
        self.request_stop();
        if thread::current().id() == self.thread_id() {
            return;
        }
        if self.handle.join().is_err() {
            warn!(task = self.id.value(), "dedicated task thread panicked");
        }
    }
}

fn step_loop<C>(
    task: &TaskRef<C>,
    period: Duration,
    stop: &AtomicBool,
    paused: &AtomicBool,
    idle: Duration,
) where
    C: ?Sized,
{
    let core = task.core();
    debug!(task = core.name(), ?period, "dedicated task thread started");
    let mut last = Instant::now();
    while !stop.load(Ordering::Acquire) {
        if paused.load(Ordering::Acquire) || !core.is_running() {
            thread::park_timeout(idle);
            last = Instant::now();
            continue;
        }
        let start = Instant::now();
        let dt = start.duration_since(last).as_secs_f64() * 1000.0;
        last = start;
        task.logic_update(dt);
        let spent = start.elapsed();
        if spent < period {
            thread::park_timeout(period - spent);
        }
    }
    debug!(task = core.name(), "dedicated task thread stopped");
}
