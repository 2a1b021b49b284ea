// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for testadapter: turning the files of a file-based test framework into a
//! test tree, running parts of that tree, and streaming ordered events about both to a host.
//!
//! The flow of data is strictly one way:
//!
//! 1. A [`ConfigProvider`](config::ConfigProvider) yields an
//!    [`AdapterConfig`](config::AdapterConfig) snapshot once per load or run.
//! 2. The [`TestTreeBuilder`](list::TestTreeBuilder) enumerates the configured files through a
//!    [`Framework`](framework::Framework) and produces a [`TestTree`](list::TestTree).
//! 3. The [`RunOrchestrator`](runner::RunOrchestrator), optionally wrapped by the
//!    [`DebugCoordinator`](debug::DebugCoordinator), runs part of that tree.
//! 4. Everything is reported through [`EventChannel`](channel::EventChannel)s.
//!
//! [`TestAdapter`](adapter::TestAdapter) ties these together for hosts.

pub mod adapter;
pub mod cancel;
pub mod channel;
pub mod config;
pub mod debug;
pub mod errors;
pub mod framework;
pub mod list;
pub mod output;
pub mod runner;
mod time;
