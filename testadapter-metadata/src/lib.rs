// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Data shared between the testadapter core, hosts that display its results, and the worker
//! processes that drive an underlying test framework.
//!
//! Everything in this crate is serializable: hosts typically consume the [`LoadEvent`] and
//! [`RunEvent`] streams as JSON, and workers speak the [`worker`] protocol as JSON lines.

mod errors;
mod events;
mod exit_codes;
mod test_id;
mod tree;
pub mod worker;

pub use errors::*;
pub use events::*;
pub use exit_codes::*;
pub use test_id::*;
pub use tree::*;
