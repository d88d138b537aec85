// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! regen-state: apply-on-change caches for global render state.
//!
//! Renderer code wraps every piece of global graphics state in a
//! [`ValueStack`] (one value) or an [`IndexedValueStack`] (broadcast plus
//! per-channel values) and pushes/pops around scoped uses. The stacks issue
//! the underlying state transition only when the observable value changes.
//!
//! Both types are single-writer objects meant for the render thread.
#![forbid(unsafe_code)]

mod indexed;
mod value_stack;

pub use indexed::{IndexedLocked, IndexedScoped, IndexedValueStack, Stamp};
pub use value_stack::{Locked, Scoped, ValueStack};
