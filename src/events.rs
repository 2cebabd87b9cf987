//! Core record types flowing through the watcher
//!
//! Raw lines come out of the tailer, the grouper assembles them into
//! [`ErrorTrace`]s, and the enricher derives an [`ErrorDetail`] for each trace.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A single newline-terminated line read from the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    /// Line content without the terminating newline or trailing whitespace
    pub text: String,
    /// Byte offset of the first byte of this line in the source file
    pub offset: u64,
}

impl RawLine {
    pub fn new(text: impl Into<String>, offset: u64) -> Self {
        Self {
            text: text.into(),
            offset,
        }
    }
}

/// A complete multi-line error record
///
/// Starts with a line matching the start pattern and holds every continuation
/// line that followed it, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorTrace {
    lines: Vec<String>,
}

impl ErrorTrace {
    pub(crate) fn new(first_line: String) -> Self {
        Self {
            lines: vec![first_line],
        }
    }

    pub(crate) fn push(&mut self, line: String) {
        self.lines.push(line);
    }

    /// Lines of the trace in original order
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Full trace text, newline-joined
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Per-line authorship metadata from version control
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlameInfo {
    pub author: String,
    pub email: String,
    /// Abbreviated commit hash
    pub commit: String,
    pub summary: String,
}

/// Context derived for one trace
///
/// `file` and `line` are unset when the trace carries no location, in which
/// case none of the lookups run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDetail {
    pub file: Option<PathBuf>,
    pub line: Option<u32>,
    pub vhost: Option<PathBuf>,
    pub git_remote: String,
    pub blame: Option<BlameInfo>,
}

/// Placeholder used when the repository remote cannot be resolved
pub const UNKNOWN_REMOTE: &str = "unknown";

impl ErrorDetail {
    /// Detail for a trace without a recognisable file location
    pub fn unlocated() -> Self {
        Self {
            file: None,
            line: None,
            vhost: None,
            git_remote: UNKNOWN_REMOTE.to_string(),
            blame: None,
        }
    }
}
