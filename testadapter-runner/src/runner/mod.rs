// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The run orchestrator.
//!
//! The main structure in this module is [`RunOrchestrator`].

mod dispatcher;
mod executor;
mod imp;
mod plan;

pub use imp::RunOrchestrator;
pub use plan::*;
