// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Helpers for end-to-end tests of testadapter with the fake worker.

pub mod temp_workspace;
pub mod testadapter_cli;
