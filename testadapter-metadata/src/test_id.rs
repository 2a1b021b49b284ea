// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::NamePathParseError;
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A stable identifier for a node in a test tree.
///
/// Identifiers have the shape `<absolute file path>:<escaped name path>`. File-level suites use
/// the bare file path, and the root of the tree uses [`TestId::ROOT`]. Identifiers are
/// recomputed from the file path and declared names on every load, so they stay the same across
/// reloads as long as neither changes.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestId(String);

impl TestId {
    /// The identifier of the root suite.
    pub const ROOT: &'static str = "root";

    // Escaping never produces `\!`, so this segment can't collide with a declared name.
    const ERROR_SEGMENT: &'static str = "\\!error";

    /// Wraps an identifier received from a host.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier of the root suite.
    pub fn root() -> Self {
        Self(Self::ROOT.to_owned())
    }

    /// Returns the identifier of the synthetic suite grouping everything declared in `file`.
    pub fn file(file: &Utf8Path) -> Self {
        Self(file.as_str().to_owned())
    }

    /// Returns the identifier of a declared suite or test.
    pub fn node(file: &Utf8Path, name_path: &NamePath) -> Self {
        Self(format!("{file}:{}", name_path.escaped()))
    }

    /// Returns the identifier of the synthetic node that reports a file that failed to load.
    pub fn load_error(file: &Utf8Path) -> Self {
        Self(format!("{file}:{}", Self::ERROR_SEGMENT))
    }

    /// Returns the identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this is the identifier of the root suite.
    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    /// Splits the identifier back into the file and name path it was built from.
    pub fn parse(&self) -> TestIdKind<'_> {
        if self.is_root() {
            return TestIdKind::Root;
        }

        let Some(sep) = separator_index(&self.0) else {
            return TestIdKind::File(Utf8Path::new(&self.0));
        };
        let (file, rest) = (Utf8Path::new(&self.0[..sep]), &self.0[sep + 1..]);
        if rest == Self::ERROR_SEGMENT {
            return TestIdKind::LoadError(file);
        }
        match NamePath::unescape(rest) {
            Ok(name_path) if !name_path.is_empty() => TestIdKind::Node { file, name_path },
            // Not produced by `TestId::node`, e.g. a Windows drive letter.
            _ => TestIdKind::File(Utf8Path::new(&self.0)),
        }
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TestId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Finds the last `:` that isn't escaped by the name path.
fn separator_index(id: &str) -> Option<usize> {
    let bytes = id.as_bytes();
    (0..bytes.len()).rev().find(|&i| {
        bytes[i] == b':' && bytes[..i].iter().rev().take_while(|&&b| b == b'\\').count() % 2 == 0
    })
}

/// The result of [`TestId::parse`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestIdKind<'a> {
    /// The root suite.
    Root,

    /// The synthetic suite for a file.
    File(&'a Utf8Path),

    /// The synthetic error node for a file that failed to load.
    LoadError(&'a Utf8Path),

    /// A suite or test declared in a file.
    Node {
        /// The file the node was declared in.
        file: &'a Utf8Path,

        /// The names leading to the node.
        name_path: NamePath,
    },
}

/// The declared names leading from the top level of a file to a suite or test.
///
/// Test frameworks allow a test to be declared twice with the same names. Such repeats are told
/// apart by their [repeat ordinal](Self::repeat): the first declaration has ordinal 0, the next
/// one 1, and so on. The ordinal is part of the [`TestId`] but not of the serialized form, since
/// frameworks only ever name tests by their names.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamePath {
    segments: Vec<String>,
    #[serde(skip)]
    repeat: usize,
}

impl NamePath {
    const SEPARATOR: char = '/';
    const ESCAPE: char = '\\';
    // Escaping never produces `\!`, so repeats can't collide with declared names.
    const REPEAT_MARKER: char = '!';

    /// Creates a new name path from its segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_segments(segments.into_iter().map(Into::into).collect())
    }

    fn from_segments(segments: Vec<String>) -> Self {
        Self {
            segments,
            repeat: 0,
        }
    }

    /// Returns the segments of this name path.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns the number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if there are no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns how many earlier declarations in the same file share these names.
    pub fn repeat(&self) -> usize {
        self.repeat
    }

    /// Returns the same names with the given repeat ordinal.
    pub fn with_repeat(&self, repeat: usize) -> NamePath {
        Self {
            segments: self.segments.clone(),
            repeat,
        }
    }

    /// Returns the same names as the first declaration carrying them.
    pub fn first_declaration(&self) -> NamePath {
        self.with_repeat(0)
    }

    /// Returns true if `self` and `other` have the same names, whatever their repeat ordinals.
    pub fn same_names(&self, other: &NamePath) -> bool {
        self.segments == other.segments
    }

    /// Returns the last segment: the declared name of the node itself.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Returns the name path of the enclosing suite, if any.
    pub fn parent(&self) -> Option<NamePath> {
        match self.segments.len() {
            0 | 1 => None,
            n => Some(Self::from_segments(self.segments[..n - 1].to_vec())),
        }
    }

    /// Returns a new name path with `segment` appended.
    pub fn join(&self, segment: impl Into<String>) -> NamePath {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self::from_segments(segments)
    }

    /// Returns the name paths of all enclosing suites, outermost first.
    pub fn ancestors(&self) -> impl Iterator<Item = NamePath> + '_ {
        (1..self.segments.len()).map(|n| Self::from_segments(self.segments[..n].to_vec()))
    }

    /// Returns true if `self` is `other` or is nested inside it.
    pub fn starts_with(&self, other: &NamePath) -> bool {
        if self.segments.len() == other.segments.len() {
            self == other
        } else {
            self.segments.starts_with(&other.segments)
        }
    }

    /// Returns the escaped form used within a [`TestId`].
    ///
    /// Repeats end in `\!<n>`, where `n` counts declarations from 1: the second test named
    /// `A/t` is `A/t\!2`.
    pub fn escaped(&self) -> String {
        let mut out = String::new();
        for (index, segment) in self.segments.iter().enumerate() {
            if index > 0 {
                out.push(Self::SEPARATOR);
            }
            for c in segment.chars() {
                if matches!(c, Self::ESCAPE | Self::SEPARATOR | ':') {
                    out.push(Self::ESCAPE);
                }
                out.push(c);
            }
        }
        if self.repeat > 0 {
            out.push(Self::ESCAPE);
            out.push(Self::REPEAT_MARKER);
            out.push_str(&(self.repeat + 1).to_string());
        }
        out
    }

    /// Parses the escaped form produced by [`Self::escaped`].
    pub fn unescape(input: &str) -> Result<Self, NamePathParseError> {
        if input.is_empty() {
            return Ok(Self::default());
        }

        let mut segments = Vec::new();
        let mut current = String::new();
        let mut repeat = 0;
        let mut chars = input.char_indices();
        while let Some((position, c)) = chars.next() {
            match c {
                Self::ESCAPE => match chars.next() {
                    Some((_, next @ (Self::ESCAPE | Self::SEPARATOR | ':'))) => current.push(next),
                    Some((marker, Self::REPEAT_MARKER)) => {
                        // Only valid as the suffix of the last segment.
                        let ordinal = &input[marker + 1..];
                        let canonical = !ordinal.starts_with('0')
                            && ordinal.bytes().all(|b| b.is_ascii_digit());
                        match ordinal.parse::<usize>() {
                            Ok(n) if canonical && n >= 2 => repeat = n - 1,
                            _ => {
                                return Err(NamePathParseError::new(
                                    input,
                                    position,
                                    Some(Self::REPEAT_MARKER),
                                ));
                            }
                        }
                        break;
                    }
                    other => {
                        return Err(NamePathParseError::new(
                            input,
                            position,
                            other.map(|(_, c)| c),
                        ));
                    }
                },
                Self::SEPARATOR => segments.push(std::mem::take(&mut current)),
                c => current.push(c),
            }
        }
        segments.push(current);
        Ok(Self { segments, repeat })
    }
}

impl fmt::Display for NamePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join(" "))?;
        if self.repeat > 0 {
            write!(f, " (#{})", self.repeat + 1)?;
        }
        Ok(())
    }
}
