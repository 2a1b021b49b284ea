// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;

/// An error that occurs while unescaping the name path part of a [`TestId`](crate::TestId).
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("invalid escape sequence `\\{found}` at byte {position} of name path `{input}`")]
pub struct NamePathParseError {
    input: String,
    position: usize,
    found: String,
}

impl NamePathParseError {
    pub(crate) fn new(input: impl Into<String>, position: usize, found: Option<char>) -> Self {
        Self {
            input: input.into(),
            position,
            found: found.map_or_else(String::new, String::from),
        }
    }

    /// Returns the name path that failed to parse.
    pub fn input(&self) -> &str {
        &self.input
    }
}
