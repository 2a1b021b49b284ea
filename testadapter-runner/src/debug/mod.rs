// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running tests under a debugger.
//!
//! A [`DebugSubsystem`] starts debuggers and reports when their sessions end. The
//! [`DebugCoordinator`] layers a small state machine ([`DebugState`]) on top of a
//! [`RunOrchestrator`](crate::runner::RunOrchestrator) so that a debug run only finishes once
//! its session did.

mod coordinator;
mod subsystem;

pub use coordinator::*;
pub use subsystem::*;
