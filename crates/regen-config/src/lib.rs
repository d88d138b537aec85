// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Config storage for regen tools.
//!
//! [`ConfigStore`] is the raw-blob storage port, [`ConfigService`] layers JSON
//! (de)serialization on top, and [`FsConfigStore`] keeps one `<key>.json` file
//! per key in a directory.
#![forbid(unsafe_code)]

mod fs;
mod service;

pub use fs::FsConfigStore;
pub use service::{ConfigError, ConfigService, ConfigStore};
