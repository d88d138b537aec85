// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Multi-channel apply-on-change cache with stamped ordering.
//!
//! Some render state can be set for every channel at once or for a single
//! channel (per-draw-buffer blend equations, color masks, ...). An
//! [`IndexedValueStack`] keeps one broadcast stack plus one stack per channel
//! and stamps every push with a counter shared by both families. For channel
//! `i` the effective value is the most recently stamped entry among the
//! broadcast top and the channel-`i` top ("last write wins").
//!
//! Stamps come from a single monotonically increasing counter and are never
//! reused, so two tops can never compare equal.

use std::fmt;
use std::ops::{Deref, DerefMut};

/// Position of a write in the total order of writes to one [`IndexedValueStack`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stamp(u64);

impl Stamp {
    /// Returns the raw counter value.
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Debug)]
struct Stamped<V> {
    value: V,
    stamp: Stamp,
}

/// Which stack family issued an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Origin {
    Broadcast,
    Channel,
}

/// Effective value of one channel after an operation.
struct Resolved<V> {
    value: Option<V>,
    from_broadcast: bool,
}

/// Broadcast stack plus `N` per-channel stacks with a shared stamp counter.
///
/// `F` applies a value to every channel, `G` applies a value to one channel.
/// Both are skipped while the stack is locked.
///
/// ```
/// use std::cell::RefCell;
/// use regen_state::IndexedValueStack;
///
/// let log = RefCell::new(Vec::new());
/// {
///     let mut masks = IndexedValueStack::new(
///         4,
///         |v: &char| log.borrow_mut().push(format!("all={v}")),
///         |i, v: &char| log.borrow_mut().push(format!("{i}={v}")),
///     );
///     masks.push('X');
///     masks.push_channel(2, 'Y');
///     masks.pop_channel(2);
/// }
/// assert_eq!(log.into_inner(), ["all=X", "2=Y", "2=X"]);
/// ```
pub struct IndexedValueStack<V, F, G> {
    broadcast: Vec<Stamped<V>>,
    broadcast_memory: Option<V>,
    channels: Vec<Vec<Stamped<V>>>,
    effective: Vec<Option<V>>,
    next_stamp: u64,
    lock_depth: u32,
    apply_all: F,
    apply_one: G,
}

impl<V, F, G> IndexedValueStack<V, F, G>
where
    V: PartialEq + Clone,
    F: FnMut(&V),
    G: FnMut(usize, &V),
{
    /// Creates a stack with `channel_count` channels.
    ///
    /// # Panics
    ///
    /// Panics if `channel_count` is zero.
    pub fn new(channel_count: usize, apply_all: F, apply_one: G) -> Self {
        assert!(channel_count > 0, "IndexedValueStack needs at least one channel");
        Self {
            broadcast: Vec::new(),
            broadcast_memory: None,
            channels: (0..channel_count).map(|_| Vec::new()).collect(),
            effective: vec![None; channel_count],
            next_stamp: 0,
            lock_depth: 0,
            apply_all,
            apply_one,
        }
    }

    /// Pushes `v` for every channel.
    pub fn push(&mut self, v: V) {
        let stamp = self.stamp();
        self.broadcast.push(Stamped { value: v, stamp });
        self.reconcile(Origin::Broadcast);
    }

    /// Pushes `v` for channel `index` only.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn push_channel(&mut self, index: usize, v: V) {
        self.check_index(index);
        let stamp = self.stamp();
        self.channels[index].push(Stamped { value: v, stamp });
        self.reconcile(Origin::Channel);
    }

    /// Pops the broadcast top.
    ///
    /// Every channel whose effective value changes is reapplied: channels
    /// still governed by the broadcast stack through one broadcast apply, and
    /// channels whose own top is now the most recent write individually.
    ///
    /// # Panics
    ///
    /// Panics if the broadcast stack is empty.
    pub fn pop(&mut self) {
        assert!(
            !self.broadcast.is_empty(),
            "IndexedValueStack::pop called on an empty broadcast stack"
        );
        let Some(popped) = self.broadcast.pop() else {
            return;
        };
        if self.broadcast.is_empty() {
            self.broadcast_memory = Some(popped.value);
        }
        self.reconcile(Origin::Broadcast);
    }

    /// Pops the top of channel `index` and reapplies whichever of the new
    /// broadcast top and the new channel top was written last.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range or that channel's stack is empty.
    pub fn pop_channel(&mut self, index: usize) {
        self.check_index(index);
        assert!(
            self.channels[index].pop().is_some(),
            "IndexedValueStack::pop_channel({index}) called on an empty channel stack"
        );
        self.reconcile(Origin::Channel);
    }

    /// Suppresses apply calls until the matching [`unlock`](Self::unlock).
    pub fn lock(&mut self) {
        self.lock_depth += 1;
    }

    /// Releases one level of [`lock`](Self::lock). No catch-up apply happens.
    ///
    /// # Panics
    ///
    /// Panics if the stack is not locked.
    pub fn unlock(&mut self) {
        assert!(
            self.lock_depth > 0,
            "IndexedValueStack::unlock without matching lock"
        );
        self.lock_depth -= 1;
    }

    /// Pushes a broadcast value and returns a guard that pops it on drop.
    pub fn scoped(&mut self, v: V) -> IndexedScoped<'_, V, F, G> {
        self.push(v);
        IndexedScoped {
            stack: self,
            channel: None,
        }
    }

    /// Pushes a channel value and returns a guard that pops it on drop.
    pub fn scoped_channel(&mut self, index: usize, v: V) -> IndexedScoped<'_, V, F, G> {
        self.push_channel(index, v);
        IndexedScoped {
            stack: self,
            channel: Some(index),
        }
    }

    /// Locks the stack and returns a guard that unlocks it on drop.
    pub fn locked(&mut self) -> IndexedLocked<'_, V, F, G> {
        self.lock();
        IndexedLocked { stack: self }
    }

    fn stamp(&mut self) -> Stamp {
        let stamp = Stamp(self.next_stamp);
        self.next_stamp += 1;
        stamp
    }

    fn check_index(&self, index: usize) {
        assert!(
            index < self.channels.len(),
            "channel {index} out of range for {} channels",
            self.channels.len()
        );
    }

    fn resolve(&self) -> Vec<Resolved<V>> {
        let broadcast = self.broadcast.last();
        self.channels
            .iter()
            .zip(&self.effective)
            .map(|(channel, current)| match (broadcast, channel.last()) {
                (Some(b), Some(c)) if b.stamp > c.stamp => Resolved {
                    value: Some(b.value.clone()),
                    from_broadcast: true,
                },
                (_, Some(c)) => Resolved {
                    value: Some(c.value.clone()),
                    from_broadcast: false,
                },
                (Some(b), None) => Resolved {
                    value: Some(b.value.clone()),
                    from_broadcast: true,
                },
                // Neither stack has an entry: keep the remembered value.
                (None, None) => Resolved {
                    value: current.clone(),
                    from_broadcast: false,
                },
            })
            .collect()
    }

    fn reconcile(&mut self, origin: Origin) {
        let next = self.resolve();
        let changed: Vec<usize> = next
            .iter()
            .zip(&self.effective)
            .enumerate()
            .filter(|(_, (n, cur))| n.value.is_some() && n.value != **cur)
            .map(|(i, _)| i)
            .collect();

        let broadcast_changed = changed.iter().any(|&i| next[i].from_broadcast);
        if origin == Origin::Broadcast && broadcast_changed {
            if let Some(top) = self.broadcast.last() {
                let all = top.value.clone();
                self.emit_all(&all);
                // The broadcast apply clobbered channels that carry newer writes.
                for (i, resolved) in next.iter().enumerate() {
                    if resolved.from_broadcast {
                        continue;
                    }
                    if let Some(v) = resolved.value.as_ref().filter(|v| **v != all) {
                        self.emit_one(i, v);
                    }
                }
            }
        } else {
            for &i in &changed {
                if let Some(v) = next[i].value.as_ref() {
                    self.emit_one(i, v);
                }
            }
        }

        self.effective = next.into_iter().map(|r| r.value).collect();
    }

    fn emit_all(&mut self, v: &V) {
        if self.lock_depth == 0 {
            (self.apply_all)(v);
        }
    }

    fn emit_one(&mut self, index: usize, v: &V) {
        if self.lock_depth == 0 {
            (self.apply_one)(index, v);
        }
    }
}

impl<V, F, G> IndexedValueStack<V, F, G> {
    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// The broadcast top, or the broadcast value remembered after the
    /// broadcast stack was drained.
    pub fn global_value(&self) -> Option<&V> {
        self.broadcast
            .last()
            .map(|s| &s.value)
            .or(self.broadcast_memory.as_ref())
    }

    /// Effective value of channel `index`; `None` if nothing ever reached it.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn value(&self, index: usize) -> Option<&V> {
        self.effective[index].as_ref()
    }

    /// Stamp of the broadcast top, if any.
    pub fn broadcast_stamp(&self) -> Option<Stamp> {
        self.broadcast.last().map(|s| s.stamp)
    }

    /// Stamp of channel `index`'s top, if any.
    pub fn channel_stamp(&self, index: usize) -> Option<Stamp> {
        self.channels[index].last().map(|s| s.stamp)
    }

    /// Returns `true` while at least one lock is outstanding.
    pub fn is_locked(&self) -> bool {
        self.lock_depth > 0
    }
}

impl<V: fmt::Debug, F, G> fmt::Debug for IndexedValueStack<V, F, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexedValueStack")
            .field("broadcast", &self.broadcast)
            .field("channels", &self.channels)
            .field("effective", &self.effective)
            .field("next_stamp", &self.next_stamp)
            .field("lock_depth", &self.lock_depth)
            .finish_non_exhaustive()
    }
}

/// Guard returned by [`IndexedValueStack::scoped`] and
/// [`IndexedValueStack::scoped_channel`]; pops on drop.
pub struct IndexedScoped<'a, V, F, G>
where
    V: PartialEq + Clone,
    F: FnMut(&V),
    G: FnMut(usize, &V),
{
    stack: &'a mut IndexedValueStack<V, F, G>,
    channel: Option<usize>,
}

impl<V, F, G> Deref for IndexedScoped<'_, V, F, G>
where
    V: PartialEq + Clone,
    F: FnMut(&V),
    G: FnMut(usize, &V),
{
    type Target = IndexedValueStack<V, F, G>;

    fn deref(&self) -> &Self::Target {
        self.stack
    }
}

impl<V, F, G> DerefMut for IndexedScoped<'_, V, F, G>
where
    V: PartialEq + Clone,
    F: FnMut(&V),
    G: FnMut(usize, &V),
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.stack
    }
}

impl<V, F, G> Drop for IndexedScoped<'_, V, F, G>
where
    V: PartialEq + Clone,
    F: FnMut(&V),
    G: FnMut(usize, &V),
{
    fn drop(&mut self) {
        match self.channel {
            Some(index) => self.stack.pop_channel(index),
            None => self.stack.pop(),
        }
    }
}

/// Guard returned by [`IndexedValueStack::locked`]; unlocks on drop.
pub struct IndexedLocked<'a, V, F, G>
where
    V: PartialEq + Clone,
    F: FnMut(&V),
    G: FnMut(usize, &V),
{
    stack: &'a mut IndexedValueStack<V, F, G>,
}

impl<V, F, G> Deref for IndexedLocked<'_, V, F, G>
where
    V: PartialEq + Clone,
    F: FnMut(&V),
    G: FnMut(usize, &V),
{
    type Target = IndexedValueStack<V, F, G>;

    fn deref(&self) -> &Self::Target {
        self.stack
    }
}

impl<V, F, G> DerefMut for IndexedLocked<'_, V, F, G>
where
    V: PartialEq + Clone,
    F: FnMut(&V),
    G: FnMut(usize, &V),
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.stack
    }
}

impl<V, F, G> Drop for IndexedLocked<'_, V, F, G>
where
    V: PartialEq + Clone,
    F: FnMut(&V),
    G: FnMut(usize, &V),
{
    fn drop(&mut self) {
        self.stack.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum Call {
        All(char),
        One(usize, char),
    }

    type Log = Rc<RefCell<Vec<Call>>>;

    fn stack(
        channels: usize,
    ) -> (
        Log,
        IndexedValueStack<char, impl FnMut(&char), impl FnMut(usize, &char)>,
    ) {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let all = Rc::clone(&log);
        let one = Rc::clone(&log);
        let stack = IndexedValueStack::new(
            channels,
            move |v: &char| all.borrow_mut().push(Call::All(*v)),
            move |i, v: &char| one.borrow_mut().push(Call::One(i, *v)),
        );
        (log, stack)
    }

    #[test]
    fn channel_pop_falls_back_to_older_broadcast() {
        let (log, mut s) = stack(4);
        s.push('X');
        s.push_channel(2, 'Y');
        s.pop_channel(2);
        assert_eq!(
            *log.borrow(),
            vec![Call::All('X'), Call::One(2, 'Y'), Call::One(2, 'X')]
        );
        assert_eq!(s.value(2), Some(&'X'));
    }

    #[test]
    fn broadcast_pop_restores_newer_channel_writes() {
        let (log, mut s) = stack(3);
        s.push('A');
        s.push_channel(1, 'B');
        s.push('C');
        assert_eq!(s.value(1), Some(&'C'));
        log.borrow_mut().clear();

        s.pop();
        assert_eq!(*log.borrow(), vec![Call::All('A'), Call::One(1, 'B')]);
        assert_eq!(s.value(0), Some(&'A'));
        assert_eq!(s.value(1), Some(&'B'));
    }

    #[test]
    fn broadcast_pop_to_empty_reapplies_only_channel_tops() {
        let (log, mut s) = stack(3);
        s.push_channel(0, 'P');
        s.push('Q');
        log.borrow_mut().clear();

        s.pop();
        assert_eq!(*log.borrow(), vec![Call::One(0, 'P')]);
        // Channels 1 and 2 remember the drained broadcast value.
        assert_eq!(s.value(1), Some(&'Q'));
        assert_eq!(s.global_value(), Some(&'Q'));
    }

    #[test]
    fn redundant_writes_are_skipped() {
        let (log, mut s) = stack(2);
        s.push('Z');
        s.push('Z');
        s.push_channel(0, 'Z');
        s.pop_channel(0);
        s.pop();
        assert_eq!(*log.borrow(), vec![Call::All('Z')]);
    }

    #[test]
    fn stamps_are_unique_and_increasing() {
        let (_, mut s) = stack(2);
        s.push('a');
        let b0 = s.broadcast_stamp();
        s.push_channel(1, 'b');
        s.pop_channel(1);
        s.push_channel(1, 'c');
        assert!(s.channel_stamp(1) > b0);
        assert_eq!(s.channel_stamp(1).map(Stamp::value), Some(2));
    }

    #[test]
    fn lock_suppresses_both_apply_kinds() {
        let (log, mut s) = stack(2);
        {
            let mut locked = s.locked();
            locked.push('m');
            locked.push_channel(1, 'n');
        }
        assert!(!s.is_locked());
        assert!(log.borrow().is_empty());
        assert_eq!(s.value(1), Some(&'n'));
    }

    #[test]
    fn scoped_guards_pop_the_right_family() {
        let (log, mut s) = stack(2);
        s.push('a');
        {
            let mut outer = s.scoped_channel(0, 'b');
            let _inner = outer.scoped('c');
        }
        assert_eq!(
            *log.borrow(),
            vec![
                Call::All('a'),
                Call::One(0, 'b'),
                Call::All('c'),
                Call::All('a'),
                Call::One(0, 'b'),
                Call::One(0, 'a'),
            ]
        );
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_channel_panics() {
        let (_, mut s) = stack(2);
        s.push_channel(2, 'x');
    }

    #[test]
    #[should_panic(expected = "empty channel stack")]
    fn pop_empty_channel_panics() {
        let (_, mut s) = stack(2);
        s.push('x');
        s.pop_channel(0);
    }
}
