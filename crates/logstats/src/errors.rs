// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;

use crate::constants;

/// Why a single line could not be turned into a record.
///
/// Every kind is local to one line: the stream keeps going and the aggregator tallies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, derive_more::Display)]
pub enum ParseErrorKind {
    /// The line has fewer than seven `|`-delimited fields.
    #[display("malformed field count")]
    MalformedFieldCount,
    /// The timestamp is not a non-negative integer.
    #[display("invalid timestamp")]
    InvalidTimestamp,
    /// The latency lacks its `ms` suffix or is not numeric.
    #[display("invalid latency")]
    InvalidLatency,
    /// The source IP or user field is empty.
    #[display("empty field")]
    EmptyField,
    /// The line is longer than the reader accepts and was skipped.
    #[display("line too long")]
    LineTooLong,
}

/// A line that failed to parse, kept as a value so the caller can carry on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line_number}: {kind}")]
pub struct ParseError {
    pub line_number: u64,
    pub line: String,
    pub kind: ParseErrorKind,
}

impl ParseError {
    #[must_use]
    pub fn new(kind: ParseErrorKind, line: &str, line_number: u64) -> Self {
        Self {
            line_number,
            line: line.to_string(),
            kind,
        }
    }

    /// The start of the offending line, cut on a char boundary, for log output.
    #[must_use]
    pub fn preview(&self) -> &str {
        if self.line.len() <= constants::MAX_LINE_PREVIEW {
            return &self.line;
        }
        let mut end = constants::MAX_LINE_PREVIEW;
        while !self.line.is_char_boundary(end) {
            end -= 1;
        }
        &self.line[..end]
    }
}

/// Failure to build an aggregator.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Creation {
    #[error("context limit must be greater than 0")]
    ContextLimit,
}

/// Failure to build an [`crate::config::AnalyzerConfig`].
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
