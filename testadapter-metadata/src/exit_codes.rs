// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `testadapter` failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum TestAdapterExitCode {}

impl TestAdapterExitCode {
    /// No errors occurred and testadapter exited normally.
    pub const OK: i32 = 0;

    /// No tests were selected to run, but no other errors occurred.
    pub const NO_TESTS_RUN: i32 = 4;

    /// A user issue happened while setting up a testadapter invocation, for example an invalid
    /// settings file.
    pub const SETUP_ERROR: i32 = 96;

    /// One or more tests failed or errored, or the run was cancelled.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// Loading the test tree produced an error.
    pub const LOAD_FAILED: i32 = 104;

    /// A debug run was requested but the debugger could not be started.
    pub const DEBUG_START_FAILED: i32 = 107;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
