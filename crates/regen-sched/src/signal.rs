// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! One-slot handshake flag.
//!
//! The frame handshake uses two of these, one per direction (`step_ready`
//! worker→render, `frame_consumed` render→worker). A raised flag is a single
//! slot: raising twice before a wait still releases exactly one wait, which
//! keeps the pipelining slack at one step.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct SignalState {
    raised: bool,
    closed: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Signal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl Signal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Raises the flag and wakes waiters.
    pub(crate) fn raise(&self) {
        let mut state = self.state.lock();
        state.raised = true;
        self.cond.notify_all();
    }

    /// Blocks until the flag is raised, then lowers it.
    ///
    /// Returns `false` without consuming anything if the signal was closed.
    pub(crate) fn wait(&self) -> bool {
        let mut state = self.state.lock();
        while !state.raised && !state.closed {
            self.cond.wait(&mut state);
        }
        if state.raised {
            state.raised = false;
            true
        } else {
            false
        }
    }

    /// Permanently releases every current and future waiter.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.cond.notify_all();
    }
}
