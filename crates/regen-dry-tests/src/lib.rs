// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for regen crates.
//!
//! # Modules
//!
//! - [`apply`] - Recorders for state-stack apply callbacks
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`probe`] - Instrumented tasks for scheduler tests
#![forbid(unsafe_code)]

pub mod apply;
pub mod config;
pub mod probe;

// Re-export commonly used items at crate root for convenience
pub use apply::{ApplyCall, ApplyLog};
pub use config::InMemoryConfigStore;
pub use probe::{HookKind, Journal, JournalEntry, ProbeTask, ProbeTaskBuilder};
