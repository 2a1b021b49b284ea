// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A command-line host for testadapter.
//!
//! `testadapter list` loads the test tree of a workspace and prints it, and `testadapter run`
//! runs all or part of it, printing events as they happen. Both accept
//! `--message-format json` to print one event per line for consumption by other tools.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;
mod reporter;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{OutputContext, StderrStyles};
