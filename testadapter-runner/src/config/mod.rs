// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for testadapter.
//!
//! A configuration snapshot ([`AdapterConfig`]) is assembled from three layers, highest
//! precedence first:
//!
//! 1. adapter settings, read from `.config/testadapter.toml` ([`AdapterSettings`]),
//! 2. a `mocha.opts`-style options file ([`OptsFile`]),
//! 3. built-in defaults.

mod adapter_config;
mod file_resolver;
mod opts_file;
mod provider;
mod settings;

pub use adapter_config::*;
pub use file_resolver::*;
pub use opts_file::*;
pub use provider::*;
pub use settings::*;
