// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Instrumented tasks for scheduler tests.
//!
//! A [`ProbeTask`] counts its hook invocations, remembers the thread and `dt`
//! of the latest call, optionally sleeps inside `logic_update`, and can run
//! arbitrary closures from either hook (e.g. to register other tasks from a
//! render hook). Probes sharing a [`Journal`] record a global call order.

use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use regen_sched::{Task, TaskCore, TaskCoreBuilder};

/// Which hook produced a journal entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// `logic_update`.
    Logic,
    /// `render_update`.
    Render,
}

/// One journal entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JournalEntry {
    /// Name of the probe that ran.
    pub task: String,
    /// Hook that ran.
    pub hook: HookKind,
}

/// Shared, ordered record of hook calls across probes.
#[derive(Clone, Debug, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl Journal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, task: &str, hook: HookKind) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(JournalEntry {
                task: task.to_owned(),
                hook,
            });
    }

    /// Every entry so far.
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names of the probes whose `hook` ran, in call order.
    pub fn names(&self, hook: HookKind) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.hook == hook)
            .map(|e| e.task)
            .collect()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

type Hook = Box<dyn Fn(&ProbeTask) + Send + Sync>;

#[derive(Default)]
struct LastCall {
    logic_dt: Option<f64>,
    render_dt: Option<f64>,
    logic_thread: Option<ThreadId>,
    render_thread: Option<ThreadId>,
}

/// Task double that records how the scheduler drives it.
pub struct ProbeTask {
    core: TaskCore,
    logic_calls: AtomicUsize,
    render_calls: AtomicUsize,
    logic_active: AtomicUsize,
    logic_delay: Option<Duration>,
    last: Mutex<LastCall>,
    journal: Option<Journal>,
    on_logic: Option<Hook>,
    on_render: Option<Hook>,
}

impl ProbeTask {
    /// Start building a probe named `name`.
    pub fn builder(name: impl Into<Cow<'static, str>>) -> ProbeTaskBuilder {
        ProbeTaskBuilder {
            core: TaskCore::builder(name),
            logic_delay: None,
            journal: None,
            on_logic: None,
            on_render: None,
        }
    }

    /// Number of completed `logic_update` calls.
    pub fn logic_calls(&self) -> usize {
        self.logic_calls.load(Ordering::SeqCst)
    }

    /// Number of completed `render_update` calls.
    pub fn render_calls(&self) -> usize {
        self.render_calls.load(Ordering::SeqCst)
    }

    /// `logic_update` calls currently executing (0 or 1 in practice).
    pub fn logic_active(&self) -> usize {
        self.logic_active.load(Ordering::SeqCst)
    }

    /// `dt` of the latest logic call.
    pub fn last_logic_dt(&self) -> Option<f64> {
        self.with_last(|l| l.logic_dt)
    }

    /// `dt` of the latest render call.
    pub fn last_render_dt(&self) -> Option<f64> {
        self.with_last(|l| l.render_dt)
    }

    /// Thread of the latest logic call.
    pub fn logic_thread(&self) -> Option<ThreadId> {
        self.with_last(|l| l.logic_thread)
    }

    /// Thread of the latest render call.
    pub fn render_thread(&self) -> Option<ThreadId> {
        self.with_last(|l| l.render_thread)
    }

    fn with_last<R>(&self, f: impl FnOnce(&mut LastCall) -> R) -> R {
        f(&mut self.last.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn journal(&self, hook: HookKind) {
        if let Some(journal) = &self.journal {
            journal.record(self.core.name(), hook);
        }
    }
}

impl std::fmt::Debug for ProbeTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeTask")
            .field("core", &self.core)
            .field("logic_calls", &self.logic_calls())
            .field("render_calls", &self.render_calls())
            .finish_non_exhaustive()
    }
}

impl<C: ?Sized> Task<C> for ProbeTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn logic_update(&self, dt: f64) {
        self.logic_active.fetch_add(1, Ordering::SeqCst);
        {
            let _guard = self.core.lock();
            self.with_last(|l| {
                l.logic_dt = Some(dt);
                l.logic_thread = Some(thread::current().id());
            });
        }
        if let Some(delay) = self.logic_delay {
            thread::sleep(delay);
        }
        self.journal(HookKind::Logic);
        if let Some(hook) = &self.on_logic {
            hook(self);
        }
        self.logic_calls.fetch_add(1, Ordering::SeqCst);
        self.logic_active.fetch_sub(1, Ordering::SeqCst);
    }

    fn render_update(&self, _ctx: &mut C, dt: f64) {
        {
            let _guard = self.core.lock();
            self.with_last(|l| {
                l.render_dt = Some(dt);
                l.render_thread = Some(thread::current().id());
            });
        }
        self.journal(HookKind::Render);
        if let Some(hook) = &self.on_render {
            hook(self);
        }
        self.render_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Builder for [`ProbeTask`].
pub struct ProbeTaskBuilder {
    core: TaskCoreBuilder,
    logic_delay: Option<Duration>,
    journal: Option<Journal>,
    on_logic: Option<Hook>,
    on_render: Option<Hook>,
}

impl ProbeTaskBuilder {
    /// Schedule the logic hook on the worker thread.
    pub fn logic(mut self) -> Self {
        self.core = self.core.logic();
        self
    }

    /// Schedule the render hook.
    pub fn render(mut self) -> Self {
        self.core = self.core.render();
        self
    }

    /// Step the logic hook on a dedicated thread at `hz`.
    pub fn dedicated(mut self, hz: f64) -> Self {
        self.core = self.core.dedicated(hz);
        self
    }

    /// Create the probe already running.
    pub fn running(mut self) -> Self {
        self.core = self.core.running();
        self
    }

    /// Sleep for `delay` inside every `logic_update`.
    pub fn logic_delay(mut self, delay: Duration) -> Self {
        self.logic_delay = Some(delay);
        self
    }

    /// Record calls into `journal`.
    pub fn journal(mut self, journal: &Journal) -> Self {
        self.journal = Some(journal.clone());
        self
    }

    /// Run `hook` at the end of every `logic_update`, before the call is counted.
    pub fn on_logic(mut self, hook: impl Fn(&ProbeTask) + Send + Sync + 'static) -> Self {
        self.on_logic = Some(Box::new(hook));
        self
    }

    /// Run `hook` at the end of every `render_update`, before the call is counted.
    pub fn on_render(mut self, hook: impl Fn(&ProbeTask) + Send + Sync + 'static) -> Self {
        self.on_render = Some(Box::new(hook));
        self
    }

    /// Finish the probe.
    pub fn build(self) -> Arc<ProbeTask> {
        Arc::new(ProbeTask {
            core: self.core.build(),
            logic_calls: AtomicUsize::new(0),
            render_calls: AtomicUsize::new(0),
            logic_active: AtomicUsize::new(0),
            logic_delay: self.logic_delay,
            last: Mutex::new(LastCall::default()),
            journal: self.journal,
            on_logic: self.on_logic,
            on_render: self.on_render,
        })
    }
}

impl std::fmt::Debug for ProbeTaskBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeTaskBuilder")
            .field("core", &self.core)
            .field("logic_delay", &self.logic_delay)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hooks_count_and_journal() {
        let journal = Journal::new();
        let probe = ProbeTask::builder("p")
            .logic()
            .render()
            .journal(&journal)
            .build();
        Task::<()>::logic_update(&*probe, 4.0);
        Task::<()>::render_update(&*probe, &mut (), 16.0);
        assert_eq!(probe.logic_calls(), 1);
        assert_eq!(probe.render_calls(), 1);
        assert_eq!(probe.last_logic_dt(), Some(4.0));
        assert_eq!(probe.last_render_dt(), Some(16.0));
        assert_eq!(journal.names(HookKind::Render), vec!["p".to_owned()]);
        assert_eq!(journal.entries().len(), 2);
    }

    #[test]
    fn on_render_sees_the_probe() {
        let seen = Arc::new(AtomicUsize::new(0));
        let probe = ProbeTask::builder("p")
            .render()
            .on_render({
                let seen = Arc::clone(&seen);
                move |p| {
                    seen.store(p.render_calls() + 10, Ordering::SeqCst);
                }
            })
            .build();
        Task::<()>::render_update(&*probe, &mut (), 1.0);
        assert_eq!(seen.load(Ordering::SeqCst), 10);
    }
}
