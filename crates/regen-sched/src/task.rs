// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Task contract: two independent update hooks plus per-task shared state.

use std::any::Any;
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique task identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id value.
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Where a task's logic hook runs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LogicMode {
    /// On the scheduler's worker thread, in lock-step with the render thread.
    Synchronized,
    /// On a dedicated thread at (approximately) `hz` steps per second,
    /// independent of the frame handshake.
    Dedicated {
        /// Desired logic steps per second.
        hz: f64,
    },
}

/// State every task carries: identity, capabilities, running flag and a
/// re-entrant lock for fields shared between the two hooks.
///
/// Embed one in each task type and return it from [`Task::core`].
#[derive(Debug)]
pub struct TaskCore {
    id: TaskId,
    name: Cow<'static, str>,
    logic: bool,
    render: bool,
    mode: LogicMode,
    running: AtomicBool,
    lock: ReentrantMutex<()>,
}

impl TaskCore {
    /// Starts building a task core with the given diagnostic name.
    pub fn builder(name: impl Into<Cow<'static, str>>) -> TaskCoreBuilder {
        TaskCoreBuilder {
            name: name.into(),
            logic: false,
            render: false,
            mode: LogicMode::Synchronized,
            running: false,
        }
    }

    /// Task identity.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Diagnostic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the task's logic hook should be scheduled.
    pub fn wants_logic_update(&self) -> bool {
        self.logic
    }

    /// Whether the task's render hook should be scheduled.
    pub fn wants_render_update(&self) -> bool {
        self.render
    }

    /// Where the logic hook runs.
    pub fn logic_mode(&self) -> LogicMode {
        self.mode
    }

    /// Marks the task running. Idempotent.
    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    /// Marks the task stopped; registered hooks are skipped. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Returns `true` if hooks of this task should run.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Acquires the task lock, blocking. Re-entrant on the owning thread.
    ///
    /// Guard any field written by one hook and read by the other.
    pub fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Acquires the task lock if it is free (or already held by this thread).
    pub fn try_lock(&self) -> Option<ReentrantMutexGuard<'_, ()>> {
        self.lock.try_lock()
    }
}

/// Builder for [`TaskCore`].
#[derive(Debug)]
pub struct TaskCoreBuilder {
    name: Cow<'static, str>,
    logic: bool,
    render: bool,
    mode: LogicMode,
    running: bool,
}

impl TaskCoreBuilder {
    /// Schedules the logic hook on the worker thread.
    pub fn logic(mut self) -> Self {
        self.logic = true;
        self
    }

    /// Schedules the render hook on the render thread.
    pub fn render(mut self) -> Self {
        self.render = true;
        self
    }

    /// Schedules the logic hook on a dedicated thread at `hz` steps per second.
    ///
    /// # Panics
    ///
    /// Panics if `hz` is not a finite positive number, or is so small that
    /// its step period `1 / hz` does not fit in a [`Duration`].
    pub fn dedicated(mut self, hz: f64) -> Self {
        assert!(
            hz.is_finite() && hz > 0.0,
            "dedicated logic rate must be positive, got {hz}"
        );
        assert!(
            Duration::try_from_secs_f64(hz.recip()).is_ok(),
            "dedicated logic rate {hz} has no representable period"
        );
        self.logic = true;
        self.mode = LogicMode::Dedicated { hz };
        self
    }

    /// Creates the core already marked running.
    pub fn running(mut self) -> Self {
        self.running = true;
        self
    }

    /// Finishes the core and assigns it a fresh [`TaskId`].
    pub fn build(self) -> TaskCore {
        TaskCore {
            id: TaskId::next(),
            name: self.name,
            logic: self.logic,
            render: self.render,
            mode: self.mode,
            running: AtomicBool::new(self.running),
            lock: ReentrantMutex::new(()),
        }
    }
}

/// A unit of scheduled work with a logic hook and a render hook.
///
/// `C` is the render context handed to [`render_update`](Task::render_update);
/// the process-wide scheduler uses `dyn Any` so engine subsystems can downcast
/// to their graphics context.
///
/// # Contract
///
/// - `logic_update` runs only on a logic thread. It must not touch
///   graphics-context resources and should treat `dt` (milliseconds) as its
///   only external input. It may take arbitrary time.
/// - `render_update` runs only on the render thread and must never block. It
///   may register or unregister other tasks.
/// - In lock-step mode `logic_update` for step N+1 overlaps `render_update`
///   for frame N. Use [`TaskCore::lock`] for fields both hooks touch.
pub trait Task<C: ?Sized = dyn Any>: Send + Sync {
    /// The task's shared core.
    fn core(&self) -> &TaskCore;

    /// CPU-only step, `dt` milliseconds after the previous step.
    fn logic_update(&self, dt: f64) {
        let _ = dt;
    }

    /// Render-thread step for the current frame.
    fn render_update(&self, ctx: &mut C, dt: f64) {
        let _ = (ctx, dt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = TaskCore::builder("a").build();
        let b = TaskCore::builder("b").build();
        assert_ne!(a.id(), b.id());
        assert!(b.id().value() > a.id().value());
    }

    #[test]
    fn start_stop_are_idempotent() {
        let core = TaskCore::builder("t").logic().build();
        assert!(!core.is_running());
        core.start();
        core.start();
        assert!(core.is_running());
        core.stop();
        core.stop();
        assert!(!core.is_running());
    }

    #[test]
    fn task_lock_is_reentrant() {
        let core = TaskCore::builder("t").build();
        let outer = core.lock();
        let inner = core.try_lock();
        assert!(inner.is_some());
        drop(inner);
        drop(outer);
    }

    #[test]
    fn task_lock_excludes_other_threads() {
        let core = TaskCore::builder("t").build();
        let _held = core.lock();
        std::thread::scope(|s| {
            let contended = s.spawn(|| core.try_lock().is_none());
            assert!(matches!(contended.join(), Ok(true)));
        });
    }

    #[test]
    fn dedicated_implies_logic() {
        let core = TaskCore::builder("sensor").dedicated(30.0).build();
        assert!(core.wants_logic_update());
        assert!(!core.wants_render_update());
        assert_eq!(core.logic_mode(), LogicMode::Dedicated { hz: 30.0 });
    }

    #[test]
    #[should_panic(expected = "must be positive")]
    fn dedicated_rejects_zero_rate() {
        let _ = TaskCore::builder("bad").dedicated(0.0);
    }

    #[test]
    #[should_panic(expected = "no representable period")]
    fn dedicated_rejects_rates_without_a_period() {
        let _ = TaskCore::builder("glacial").dedicated(1e-30);
    }

    #[test]
    fn dedicated_accepts_slow_rates() {
        let core = TaskCore::builder("hourly").dedicated(1.0 / 3600.0).build();
        assert!(matches!(core.logic_mode(), LogicMode::Dedicated { .. }));
    }
}
