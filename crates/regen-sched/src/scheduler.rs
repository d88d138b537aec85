// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Dual-thread task scheduler.
//!
//! A [`Scheduler`] owns one worker thread that runs every synchronized
//! task's logic hook once per step, and exposes [`Scheduler::drive_frame`]
//! for the render thread to run every task's render hook once per displayed
//! frame.
//!
//! # Frame handshake
//!
//! In lock-step mode the two threads meet through two one-slot flags:
//!
//! ```text
//! worker:  [step N] raise(step_ready) wait(frame_consumed) [step N+1] ...
//! render:  raise(frame_consumed) [render scan] wait(step_ready)
//! ```
//!
//! `drive_frame` raises `frame_consumed` *before* its render scan, so the
//! worker computes step N+1 while frame N is being rendered. The trailing
//! wait on `step_ready` means the next `drive_frame` never starts before the
//! worker has produced fresh values, and the worker can never run more than
//! one step ahead. Render hooks must therefore only read logic outputs
//! through data the task itself guards (see [`TaskCore::lock`](crate::TaskCore::lock)).
//!
//! # Registration
//!
//! The logic side keeps a live set plus pending-add / pending-remove queues
//! behind the logic lock; the queues are merged once per step, never
//! mid-pass. The render side keeps a live set and a pending-remove set behind
//! a separate render lock; removals take effect at the next `drive_frame`,
//! additions are visible to the current frame's scan.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::SchedulerConfig;
use crate::dedicated::DedicatedThread;
use crate::signal::Signal;
use crate::task::{LogicMode, Task, TaskId};

/// Shared handle to a registered task.
pub type TaskRef<C> = Arc<dyn Task<C>>;

/// Environmental failures of the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The worker or a dedicated task thread could not be spawned.
    #[error("failed to spawn scheduler thread: {0}")]
    Spawn(#[from] std::io::Error),
    /// A logic hook panicked and took the worker thread down.
    #[error("logic worker panicked: {0}")]
    WorkerPanicked(String),
}

struct LogicQueue<C: ?Sized> {
    live: Vec<TaskRef<C>>,
    pending_add: Vec<TaskRef<C>>,
    pending_remove: Vec<TaskId>,
    in_progress: bool,
}

impl<C: ?Sized> LogicQueue<C> {
    fn contains_live(&self, id: TaskId) -> bool {
        self.live.iter().any(|t| t.core().id() == id)
    }

    fn merge_pending(&mut self) {
        if !self.pending_remove.is_empty() {
            let removed = std::mem::take(&mut self.pending_remove);
            self.live.retain(|t| !removed.contains(&t.core().id()));
        }
        self.live.append(&mut self.pending_add);
    }
}

struct RenderSet<C: ?Sized> {
    live: Vec<TaskRef<C>>,
    pending_remove: HashSet<TaskId>,
    /// Bumped on every membership change; the reload scan re-snapshots when
    /// it moves.
    generation: u64,
}

/// How [`RenderSet::insert`] admitted a task, so the insertion can be undone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RenderInsert {
    /// The task was pending removal; the removal was cancelled.
    Revived,
    /// The task was appended to the live set.
    Added,
}

impl<C: ?Sized> RenderSet<C> {
    fn new() -> Self {
        Self {
            live: Vec::new(),
            pending_remove: HashSet::new(),
            generation: 0,
        }
    }

    /// Admits `task`, cancelling a pending removal if there is one.
    ///
    /// # Panics
    ///
    /// Panics if the task is already live and not pending removal.
    fn insert(&mut self, task: &TaskRef<C>) -> RenderInsert {
        let core = task.core();
        let id = core.id();
        let insert = if self.pending_remove.remove(&id) {
            RenderInsert::Revived
        } else {
            assert!(
                !self.contains_live(id),
                "task `{}` registered twice for render updates",
                core.name()
            );
            self.live.push(Arc::clone(task));
            RenderInsert::Added
        };
        self.generation += 1;
        insert
    }

    /// Undoes an [`insert`](Self::insert) of the task `id`.
    fn revert(&mut self, id: TaskId, insert: RenderInsert) {
        match insert {
            RenderInsert::Revived => {
                self.pending_remove.insert(id);
            }
            RenderInsert::Added => self.live.retain(|t| t.core().id() != id),
        }
        self.generation += 1;
    }

    fn contains_live(&self, id: TaskId) -> bool {
        self.live.iter().any(|t| t.core().id() == id)
    }

    fn snapshot(&self) -> (Vec<TaskRef<C>>, u64) {
        let tasks = self
            .live
            .iter()
            .filter(|t| !self.pending_remove.contains(&t.core().id()))
            .cloned()
            .collect();
        (tasks, self.generation)
    }
}

/// Worker time base. `epoch` moves on every reset so the worker never
/// overwrites a reset with a time sampled before it.
struct Clock {
    last: Instant,
    epoch: u64,
}

struct Shared<C: ?Sized> {
    config: SchedulerConfig,
    logic: Mutex<LogicQueue<C>>,
    /// Notified whenever a logic pass ends.
    logic_idle: Condvar,
    render: Mutex<RenderSet<C>>,
    dedicated: Mutex<HashMap<TaskId, DedicatedThread>>,
    paused: Arc<AtomicBool>,
    closed: AtomicBool,
    step_ready: Signal,
    frame_consumed: Signal,
    clock: Mutex<Clock>,
    worker: OnceLock<Thread>,
    steps: AtomicU64,
    frames: AtomicU64,
}

impl<C: ?Sized> Shared<C> {
    fn on_worker_thread(&self) -> bool {
        self.worker.get().map(Thread::id) == Some(thread::current().id())
    }

    /// Merges pending registrations and, unless paused or empty, marks a
    /// pass in progress and returns the tasks to step. Both happen under the
    /// logic lock so `pause`/`unregister_task` observe a consistent state.
    fn begin_logic_pass(&self) -> Option<Vec<TaskRef<C>>> {
        let mut logic = self.logic.lock();
        logic.merge_pending();
        if self.paused.load(Ordering::Acquire) || logic.live.is_empty() {
            return None;
        }
        logic.in_progress = true;
        Some(logic.live.clone())
    }

    fn end_logic_pass(&self) {
        let mut logic = self.logic.lock();
        logic.in_progress = false;
        self.logic_idle.notify_all();
    }

    fn wait_logic_idle(&self) {
        if self.on_worker_thread() {
            return;
        }
        let mut logic = self.logic.lock();
        while logic.in_progress {
            self.logic_idle.wait(&mut logic);
        }
    }

    fn reset_time(&self) {
        let mut clock = self.clock.lock();
        clock.last = Instant::now();
        clock.epoch = clock.epoch.wrapping_add(1);
    }

    /// Milliseconds since the last observed time, and the clock epoch they
    /// were measured against.
    fn elapsed_ms(&self, now: Instant) -> (f64, u64) {
        let clock = self.clock.lock();
        let dt = now.saturating_duration_since(clock.last).as_secs_f64() * 1000.0;
        (dt, clock.epoch)
    }

    /// Records `now` as the last observed time unless a reset happened
    /// since `epoch` was read.
    fn advance_clock(&self, now: Instant, epoch: u64) {
        let mut clock = self.clock.lock();
        if clock.epoch == epoch {
            clock.last = now;
        }
    }

    fn wake_worker(&self) {
        if let Some(worker) = self.worker.get() {
            worker.unpark();
        }
    }

    fn shut_down_signals(&self) {
        self.closed.store(true, Ordering::Release);
        self.frame_consumed.close();
        self.step_ready.close();
    }
}

/// Marks the scheduler closed when the worker exits, including by panic, so
/// a render thread blocked on `step_ready` or a caller blocked in
/// `pause(true)` is released.
struct WorkerExit<C: ?Sized>(Arc<Shared<C>>);

impl<C: ?Sized> Drop for WorkerExit<C> {
    fn drop(&mut self) {
        self.0.shut_down_signals();
        self.0.end_logic_pass();
    }
}

/// Dual-thread driver: logic hooks on a worker thread, render hooks on the
/// caller's render thread.
///
/// The scheduler starts paused; call [`resume`](Self::resume) to begin
/// stepping.
pub struct Scheduler<C: ?Sized + 'static = dyn Any> {
    shared: Arc<Shared<C>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

static GLOBAL: OnceLock<Scheduler> = OnceLock::new();

impl Scheduler {
    /// Returns the process-wide scheduler, spawning it with the default
    /// configuration on first use.
    ///
    /// The instance lives in a static and is never dropped, so nothing joins
    /// its worker at process exit. Call [`close(true)`](Self::close) on it
    /// before exiting; later calls to `global()` return the closed instance.
    pub fn global() -> Result<&'static Self, SchedulerError> {
        if let Some(scheduler) = GLOBAL.get() {
            return Ok(scheduler);
        }
        let candidate = Self::spawn(SchedulerConfig::default())?;
        // A concurrent first use may win; the losing candidate shuts down on drop.
        Ok(GLOBAL.get_or_init(|| candidate))
    }
}

impl<C: ?Sized + 'static> Scheduler<C> {
    /// Spawns a scheduler and its worker thread.
    #[instrument(skip_all, fields(thread = %config.thread_name, lock_step = config.lock_step))]
    pub fn spawn(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let shared = Arc::new(Shared {
            logic: Mutex::new(LogicQueue {
                live: Vec::new(),
                pending_add: Vec::new(),
                pending_remove: Vec::new(),
                in_progress: false,
            }),
            logic_idle: Condvar::new(),
            render: Mutex::new(RenderSet::new()),
            dedicated: Mutex::new(HashMap::new()),
            paused: Arc::new(AtomicBool::new(true)),
            closed: AtomicBool::new(false),
            step_ready: Signal::new(),
            frame_consumed: Signal::new(),
            clock: Mutex::new(Clock {
                last: Instant::now(),
                epoch: 0,
            }),
            worker: OnceLock::new(),
            steps: AtomicU64::new(0),
            frames: AtomicU64::new(0),
            config,
        });
        let handle = thread::Builder::new()
            .name(shared.config.thread_name.clone())
            .spawn({
                let shared = Arc::clone(&shared);
                move || run_worker(shared)
            })?;
        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// The configuration this scheduler was spawned with.
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Registers `task` with the live sets its capabilities ask for.
    ///
    /// Logic registrations take effect at the next worker step. Render
    /// registrations are visible immediately, including to a frame scan in
    /// progress. Registering a task whose removal is still pending cancels
    /// that removal.
    ///
    /// # Panics
    ///
    /// Panics if the task is already registered (and not pending removal).
    pub fn register_task(&self, task: TaskRef<C>) -> Result<(), SchedulerError> {
        let core = task.core();
        let id = core.id();
        debug!(task = core.name(), id = id.value(), "register task");

        let render_insert = core
            .wants_render_update()
            .then(|| self.shared.render.lock().insert(&task));

        if let Err(err) = self.register_logic(&task) {
            if let Some(insert) = render_insert {
                self.shared.render.lock().revert(id, insert);
            }
            warn!(task = core.name(), %err, "task registration failed");
            return Err(err);
        }
        Ok(())
    }

    fn register_logic(&self, task: &TaskRef<C>) -> Result<(), SchedulerError> {
        let core = task.core();
        let id = core.id();
        if !core.wants_logic_update() {
            return Ok(());
        }
        match core.logic_mode() {
            LogicMode::Synchronized => {
                let mut logic = self.shared.logic.lock();
                if let Some(pos) = logic.pending_remove.iter().position(|x| *x == id) {
                    logic.pending_remove.swap_remove(pos);
                } else {
                    assert!(
                        !logic.contains_live(id)
                            && !logic.pending_add.iter().any(|t| t.core().id() == id),
                        "task `{}` registered twice for logic updates",
                        core.name()
                    );
                    logic.pending_add.push(Arc::clone(task));
                }
            }
            LogicMode::Dedicated { hz } => {
                let mut dedicated = self.shared.dedicated.lock();
                assert!(
                    !dedicated.contains_key(&id),
                    "task `{}` registered twice for dedicated logic updates",
                    core.name()
                );
                let thread = DedicatedThread::spawn(
                    Arc::clone(task),
                    hz,
                    Arc::clone(&self.shared.paused),
                    self.shared.config.idle_sleep(),
                )?;
                dedicated.insert(id, thread);
            }
        }
        Ok(())
    }

    /// Unregisters `task` from every live set it belongs to.
    ///
    /// Render removal is deferred to the next `drive_frame` (and the task is
    /// skipped by a frame scan already in progress). With `blocking`, a
    /// synchronized logic task is guaranteed not to be touched by any logic
    /// pass once this returns, and a dedicated task's thread has been joined,
    /// so the task may be dropped right away. Called from inside a logic
    /// hook, the call never waits on its own pass.
    pub fn unregister_task(&self, task: &dyn Task<C>, blocking: bool) {
        let core = task.core();
        let id = core.id();
        debug!(task = core.name(), id = id.value(), blocking, "unregister task");

        if core.wants_render_update() {
            let mut render = self.shared.render.lock();
            if render.contains_live(id) && render.pending_remove.insert(id) {
                render.generation += 1;
            }
        }

        if core.wants_logic_update() {
            match core.logic_mode() {
                LogicMode::Synchronized => {
                    {
                        let mut logic = self.shared.logic.lock();
                        if let Some(pos) = logic.pending_add.iter().position(|t| t.core().id() == id)
                        {
                            logic.pending_add.swap_remove(pos);
                        } else if logic.contains_live(id) && !logic.pending_remove.contains(&id) {
                            logic.pending_remove.push(id);
                        }
                    }
                    if blocking {
                        self.shared.wait_logic_idle();
                    }
                }
                LogicMode::Dedicated { .. } => {
                    let thread = self.shared.dedicated.lock().remove(&id);
                    if let Some(thread) = thread {
                        if blocking {
                            thread.stop_and_join();
                        } else {
                            thread.request_stop();
                        }
                    }
                }
            }
        }
    }

    /// Unregisters every task. Logic and render removals are deferred like
    /// [`unregister_task`](Self::unregister_task); dedicated threads are
    /// stopped and joined.
    pub fn clear(&self) {
        {
            let mut logic = self.shared.logic.lock();
            logic.pending_add.clear();
            let ids: Vec<TaskId> = logic.live.iter().map(|t| t.core().id()).collect();
            for id in ids {
                if !logic.pending_remove.contains(&id) {
                    logic.pending_remove.push(id);
                }
            }
        }
        {
            let mut render = self.shared.render.lock();
            let ids: Vec<TaskId> = render.live.iter().map(|t| t.core().id()).collect();
            render.pending_remove.extend(ids);
            render.generation += 1;
        }
        let threads: Vec<DedicatedThread> =
            self.shared.dedicated.lock().drain().map(|(_, t)| t).collect();
        for thread in threads {
            thread.stop_and_join();
        }
        debug!("scheduler cleared");
    }

    /// Stops stepping. With `blocking`, waits until no logic pass is in
    /// flight (unless called from the worker thread itself).
    pub fn pause(&self, blocking: bool) {
        {
            let _logic = self.shared.logic.lock();
            self.shared.paused.store(true, Ordering::Release);
        }
        info!(blocking, "scheduler paused");
        if blocking {
            self.shared.wait_logic_idle();
        }
    }

    /// Resumes stepping. The next `dt` is measured from this call.
    pub fn resume(&self) {
        self.shared.reset_time();
        self.shared.paused.store(false, Ordering::Release);
        self.shared.wake_worker();
        info!("scheduler resumed");
    }

    /// Resets the worker's last-observed time to now.
    pub fn reset_time(&self) {
        self.shared.reset_time();
    }

    /// Runs one frame on the render thread.
    ///
    /// Returns immediately while paused or after close. Otherwise releases
    /// the worker to compute the next step, merges pending render removals,
    /// runs every running render task exactly once (including tasks added
    /// by other tasks' hooks during this frame, excluding tasks removed
    /// during it), and, in lock-step mode, blocks until the worker has
    /// produced a fresh step.
    pub fn drive_frame(&self, ctx: &mut C, dt: f64) {
        let shared = &self.shared;
        if shared.paused.load(Ordering::Acquire) || shared.closed.load(Ordering::Acquire) {
            return;
        }
        let lock_step = shared.config.lock_step;
        if lock_step {
            shared.frame_consumed.raise();
        }

        {
            let mut render = shared.render.lock();
            if !render.pending_remove.is_empty() {
                let removed = std::mem::take(&mut render.pending_remove);
                render.live.retain(|t| !removed.contains(&t.core().id()));
            }
        }

        let ran = self.reload_scan(ctx, dt);
        let frame = shared.frames.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(frame, ran, dt, "render scan done");

        if lock_step {
            shared.step_ready.wait();
        }
    }

    /// Invokes `render_update` on every running render task once, tolerating
    /// registration changes made by the hooks themselves.
    fn reload_scan(&self, ctx: &mut C, dt: f64) -> usize {
        let mut processed: HashSet<TaskId> = HashSet::new();
        let mut ran = 0;
        'rescan: loop {
            let (snapshot, generation) = self.shared.render.lock().snapshot();
            for task in &snapshot {
                let core = task.core();
                if !processed.insert(core.id()) {
                    continue;
                }
                if core.is_running() {
                    task.render_update(ctx, dt);
                    ran += 1;
                }
                if self.shared.render.lock().generation != generation {
                    continue 'rescan;
                }
            }
            break;
        }
        ran
    }

    /// Requests worker shutdown and wakes both handshake waits. With
    /// `blocking`, joins the worker and every dedicated task thread.
    ///
    /// After close, `drive_frame` returns immediately. Returns
    /// [`SchedulerError::WorkerPanicked`] if a logic hook panicked.
    pub fn close(&self, blocking: bool) -> Result<(), SchedulerError> {
        self.shared.shut_down_signals();
        self.shared.wake_worker();
        let threads: Vec<DedicatedThread> =
            self.shared.dedicated.lock().drain().map(|(_, t)| t).collect();
        for thread in threads {
            if blocking {
                thread.stop_and_join();
            } else {
                thread.request_stop();
            }
        }
        if !blocking || self.shared.on_worker_thread() {
            return Ok(());
        }
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return Ok(());
        };
        worker.join().map_err(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_owned());
            SchedulerError::WorkerPanicked(message)
        })?;
        info!("scheduler closed");
        Ok(())
    }

    /// Returns `true` while paused.
    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// Returns `true` after [`close`](Self::close) or a worker panic.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Returns `true` while a logic pass is running.
    pub fn is_update_in_progress(&self) -> bool {
        self.shared.logic.lock().in_progress
    }

    /// Number of completed logic passes.
    pub fn step_count(&self) -> u64 {
        self.shared.steps.load(Ordering::Acquire)
    }

    /// Number of completed render scans.
    pub fn frame_count(&self) -> u64 {
        self.shared.frames.load(Ordering::Acquire)
    }

    /// Synchronized tasks in the logic live set (pending queues excluded).
    pub fn logic_task_count(&self) -> usize {
        self.shared.logic.lock().live.len()
    }

    /// Render tasks that will run on the next frame.
    pub fn render_task_count(&self) -> usize {
        let render = self.shared.render.lock();
        render
            .live
            .iter()
            .filter(|t| !render.pending_remove.contains(&t.core().id()))
            .count()
    }

    /// Tasks currently stepping on dedicated threads.
    pub fn dedicated_task_count(&self) -> usize {
        self.shared.dedicated.lock().len()
    }
}

impl<C: ?Sized + 'static> Drop for Scheduler<C> {
    fn drop(&mut self) {
        if let Err(err) = self.close(true) {
            warn!(%err, "scheduler worker ended abnormally");
        }
    }
}

impl<C: ?Sized + 'static> std::fmt::Debug for Scheduler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.shared.config)
            .field("paused", &self.is_paused())
            .field("closed", &self.is_closed())
            .field("steps", &self.step_count())
            .field("frames", &self.frame_count())
            .finish_non_exhaustive()
    }
}

fn run_worker<C: ?Sized>(shared: Arc<Shared<C>>) {
    let _ = shared.worker.set(thread::current());
    let exit = WorkerExit(Arc::clone(&shared));
    let lock_step = shared.config.lock_step;
    info!(lock_step, "logic worker started");
    shared.reset_time();

    loop {
        let now = Instant::now();
        if shared.closed.load(Ordering::Acquire) {
            break;
        }
        let (dt, epoch) = shared.elapsed_ms(now);

        match shared.begin_logic_pass() {
            Some(tasks) => {
                for task in &tasks {
                    if task.core().is_running() {
                        task.logic_update(dt);
                    }
                }
                shared.end_logic_pass();
                let step = shared.steps.fetch_add(1, Ordering::AcqRel) + 1;
                trace!(step, dt, tasks = tasks.len(), "logic pass done");
                if !lock_step {
                    let spent = now.elapsed();
                    let min_step = shared.config.min_step();
                    if spent < min_step {
                        thread::park_timeout(min_step - spent);
                    }
                }
            }
            None if !lock_step => thread::park_timeout(shared.config.idle_sleep()),
            None => {}
        }
        shared.advance_clock(now, epoch);

        if lock_step {
            shared.step_ready.raise();
            if !shared.frame_consumed.wait() {
                break;
            }
        }
    }

    info!("logic worker stopped");
    drop(exit);
}
