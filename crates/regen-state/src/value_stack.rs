// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Apply-on-change cache for a single piece of global render state.
//!
//! A [`ValueStack`] mirrors a global setting (blend mode, depth function,
//! viewport, ...) as a LIFO of requested values. The expensive transition is
//! issued through the stack's apply function, and only when the observable
//! value actually changes.
//!
//! # Occupancy
//!
//! The stack moves through three states:
//!
//! - **Init**: nothing was ever pushed. The first push applies unconditionally.
//! - **Filled**: at least one entry. Pushes apply when they differ from the
//!   top; pops apply the newly exposed top when it differs from the removed one.
//! - **Drained**: every entry was popped. The last popped value is remembered
//!   (nothing is reapplied, there is nothing to fall back to), and the next push
//!   is compared against it.
//!
//! # Locking
//!
//! [`ValueStack::lock`] suppresses apply calls while the logical stack keeps
//! evolving. Unlocking does not issue a catch-up apply. Locking is a semantics
//! switch for render passes that must not leak state changes; it is not a
//! concurrency primitive.

use std::fmt;
use std::ops::{Deref, DerefMut};

/// Occupancy of a [`ValueStack`].
#[derive(Clone, Debug, PartialEq, Eq)]
enum Occupancy<V> {
    /// Nothing was ever pushed.
    Init,
    /// The entry vector is non-empty.
    Filled,
    /// The entry vector is empty; holds the last value that was in effect.
    Drained(V),
}

/// LIFO of values for one piece of global state, applying only on change.
///
/// `F` is invoked with the value that should become effective. Any
/// `FnMut(&V)` works; plain `fn` pointers are the common case for wrapping
/// graphics API entry points.
///
/// ```
/// use regen_state::ValueStack;
///
/// let mut applied = Vec::new();
/// let mut depth_func = ValueStack::new(|v: &u32| applied.push(*v));
/// depth_func.push(1);
/// depth_func.push(1); // equal to the top: no apply
/// depth_func.push(2);
/// depth_func.pop(); // 1 is exposed again and differs from 2
/// depth_func.pop();
/// drop(depth_func);
/// assert_eq!(applied, vec![1, 2, 1]);
/// ```
pub struct ValueStack<V, F> {
    entries: Vec<V>,
    occupancy: Occupancy<V>,
    lock_depth: u32,
    apply: F,
}

impl<V, F> ValueStack<V, F>
where
    V: PartialEq + Clone,
    F: FnMut(&V),
{
    /// Creates an empty stack (Init state) that applies values with `apply`.
    pub fn new(apply: F) -> Self {
        Self {
            entries: Vec::new(),
            occupancy: Occupancy::Init,
            lock_depth: 0,
            apply,
        }
    }

    /// Pushes `v`, applying it if it differs from the value currently in effect.
    pub fn push(&mut self, v: V) {
        let changed = match &self.occupancy {
            Occupancy::Init => true,
            Occupancy::Drained(last) => *last != v,
            Occupancy::Filled => self.entries.last() != Some(&v),
        };
        if changed {
            self.apply(&v);
        }
        self.occupancy = Occupancy::Filled;
        self.entries.push(v);
    }

    /// Pops the top entry.
    ///
    /// If another entry is exposed and it differs from the popped one, it is
    /// applied. Popping the final entry applies nothing and remembers the
    /// popped value.
    ///
    /// # Panics
    ///
    /// Panics if the stack has no entries. An unbalanced pop is an engine bug.
    pub fn pop(&mut self) {
        assert!(!self.entries.is_empty(), "ValueStack::pop called on an empty stack");
        let Some(popped) = self.entries.pop() else {
            return;
        };
        match self.entries.last() {
            Some(top) => {
                if *top != popped {
                    let top = top.clone();
                    self.apply(&top);
                }
            }
            None => self.occupancy = Occupancy::Drained(popped),
        }
    }

    /// Suppresses apply calls until the matching [`unlock`](Self::unlock).
    ///
    /// Locks nest; each `lock` needs its own `unlock`.
    pub fn lock(&mut self) {
        self.lock_depth += 1;
    }

    /// Releases one level of [`lock`](Self::lock).
    ///
    /// No catch-up apply happens when the last level is released.
    ///
    /// # Panics
    ///
    /// Panics if the stack is not locked.
    pub fn unlock(&mut self) {
        assert!(self.lock_depth > 0, "ValueStack::unlock without matching lock");
        self.lock_depth -= 1;
    }

    /// Pushes `v` and returns a guard that pops it when dropped.
    ///
    /// The guard derefs to the stack, so nested scopes push through it.
    pub fn scoped(&mut self, v: V) -> Scoped<'_, V, F> {
        self.push(v);
        Scoped { stack: self }
    }

    /// Locks the stack and returns a guard that unlocks it when dropped.
    pub fn locked(&mut self) -> Locked<'_, V, F> {
        self.lock();
        Locked { stack: self }
    }

    fn apply(&mut self, v: &V) {
        if self.lock_depth == 0 {
            (self.apply)(v);
        }
    }
}

impl<V, F> ValueStack<V, F> {
    /// Returns the value in effect: the top entry, or the value remembered
    /// after the stack was drained. `None` before the first push.
    pub fn value(&self) -> Option<&V> {
        match &self.occupancy {
            Occupancy::Init => None,
            Occupancy::Filled => self.entries.last(),
            Occupancy::Drained(last) => Some(last),
        }
    }

    /// Number of logical entries.
    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no entries are on the stack.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` while at least one [`lock`](ValueStack::lock) is outstanding.
    pub fn is_locked(&self) -> bool {
        self.lock_depth > 0
    }
}

impl<V> ValueStack<V, Box<dyn FnMut(&V)>>
where
    V: PartialEq + Clone,
{
    /// Creates a parameter stack: every apply receives `key` alongside the value.
    ///
    /// Suited to key/value style entry points (`glPixelStorei(key, v)`,
    /// sampler parameters, ...).
    pub fn parameter<K>(key: K, mut apply: impl FnMut(K, &V) + 'static) -> Self
    where
        K: Copy + 'static,
    {
        Self::new(Box::new(move |v: &V| apply(key, v)))
    }
}

impl<V: fmt::Debug, F> fmt::Debug for ValueStack<V, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueStack")
            .field("entries", &self.entries)
            .field("occupancy", &self.occupancy)
            .field("lock_depth", &self.lock_depth)
            .finish_non_exhaustive()
    }
}

/// Guard returned by [`ValueStack::scoped`]; pops on drop.
pub struct Scoped<'a, V, F>
where
    V: PartialEq + Clone,
    F: FnMut(&V),
{
    stack: &'a mut ValueStack<V, F>,
}

impl<V, F> Deref for Scoped<'_, V, F>
where
    V: PartialEq + Clone,
    F: FnMut(&V),
{
    type Target = ValueStack<V, F>;

    fn deref(&self) -> &Self::Target {
        self.stack
    }
}

impl<V, F> DerefMut for Scoped<'_, V, F>
where
    V: PartialEq + Clone,
    F: FnMut(&V),
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.stack
    }
}

impl<V, F> Drop for Scoped<'_, V, F>
where
    V: PartialEq + Clone,
    F: FnMut(&V),
{
    fn drop(&mut self) {
        self.stack.pop();
    }
}

/// Guard returned by [`ValueStack::locked`]; unlocks on drop.
pub struct Locked<'a, V, F>
where
    V: PartialEq + Clone,
    F: FnMut(&V),
{
    stack: &'a mut ValueStack<V, F>,
}

impl<V, F> Deref for Locked<'_, V, F>
where
    V: PartialEq + Clone,
    F: FnMut(&V),
{
    type Target = ValueStack<V, F>;

    fn deref(&self) -> &Self::Target {
        self.stack
    }
}

impl<V, F> DerefMut for Locked<'_, V, F>
where
    V: PartialEq + Clone,
    F: FnMut(&V),
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.stack
    }
}

impl<V, F> Drop for Locked<'_, V, F>
where
    V: PartialEq + Clone,
    F: FnMut(&V),
{
    fn drop(&mut self) {
        self.stack.unlock();
    }
}
