// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Recorders for state-stack apply callbacks.

use std::sync::{Arc, Mutex, PoisonError};

/// One recorded apply call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyCall<V> {
    /// Whole-state apply (plain stacks, and broadcast applies of indexed stacks).
    All(V),
    /// Single-channel apply of an indexed stack.
    One(usize, V),
}

/// Shared, clonable log of apply calls.
///
/// Hand [`recorder`](Self::recorder) / [`channel_recorder`](Self::channel_recorder)
/// to a stack and inspect the log afterwards.
///
/// # Example
///
/// ```
/// use regen_dry_tests::{ApplyCall, ApplyLog};
///
/// let log = ApplyLog::new();
/// let mut apply = log.recorder();
/// apply(&3);
/// assert_eq!(log.calls(), vec![ApplyCall::All(3)]);
/// ```
#[derive(Debug)]
pub struct ApplyLog<V> {
    calls: Arc<Mutex<Vec<ApplyCall<V>>>>,
}

impl<V> Clone for ApplyLog<V> {
    fn clone(&self) -> Self {
        Self {
            calls: Arc::clone(&self.calls),
        }
    }
}

impl<V> Default for ApplyLog<V> {
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<V: Clone> ApplyLog<V> {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Callback recording whole-state applies.
    pub fn recorder(&self) -> impl FnMut(&V) + 'static
    where
        V: 'static,
    {
        let calls = Arc::clone(&self.calls);
        move |v: &V| {
            calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(ApplyCall::All(v.clone()));
        }
    }

    /// Callback recording single-channel applies.
    pub fn channel_recorder(&self) -> impl FnMut(usize, &V) + 'static
    where
        V: 'static,
    {
        let calls = Arc::clone(&self.calls);
        move |i: usize, v: &V| {
            calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(ApplyCall::One(i, v.clone()));
        }
    }

    /// Snapshot of every call so far.
    pub fn calls(&self) -> Vec<ApplyCall<V>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Drain the log, returning the calls recorded since the last take.
    pub fn take(&self) -> Vec<ApplyCall<V>> {
        std::mem::take(&mut *self.calls.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Number of calls recorded.
    pub fn len(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_log() {
        let log = ApplyLog::new();
        let mut all = log.clone().recorder();
        let mut one = log.channel_recorder();
        all(&"a");
        one(2, &"b");
        assert_eq!(log.len(), 2);
        assert_eq!(
            log.take(),
            vec![ApplyCall::All("a"), ApplyCall::One(2, "b")]
        );
        assert!(log.is_empty());
    }
}
