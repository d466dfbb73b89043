// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Parsing of single activity-log lines.
//!
//! A line has the shape
//!
//! ```text
//! <timestamp>|<source_ip>|<user_id>|<action>|<status>|<latency>ms|<details>
//! ```
//!
//! The first six fields are split on `|`. `details` is whatever is left after the sixth
//! delimiter, so a stray `|` inside details never produces a field-count error. Details are
//! kept as raw text and only split into key/value pairs when [`LogRecord::details`] is called.

use std::sync::OnceLock;

use fnv::FnvBuildHasher;

use crate::constants;
use crate::errors::{ParseError, ParseErrorKind};

/// What the parser hands downstream for every line.
pub type Parsed = Result<LogRecord, ParseError>;

/// Key/value pairs from the `details` field.
pub type Details = hashbrown::HashMap<String, String, FnvBuildHasher>;

/// One parsed line. Construct with [`parse`].
#[derive(Debug, Clone)]
pub struct LogRecord {
    timestamp: u64,
    source_ip: String,
    user_id: String,
    action: String,
    status: String,
    latency_ms: u64,
    raw_details: String,
    details: OnceLock<Details>,
}

impl LogRecord {
    /// Epoch seconds. Not guaranteed to be ordered relative to neighbouring lines.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    #[must_use]
    pub fn source_ip(&self) -> &str {
        &self.source_ip
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    #[must_use]
    pub fn latency_ms(&self) -> u64 {
        self.latency_ms
    }

    /// The `details` field exactly as it appeared in the line.
    #[must_use]
    pub fn raw_details(&self) -> &str {
        &self.raw_details
    }

    /// Splits `details` into key/value pairs on first call and caches the result.
    ///
    /// Tokens are separated by `,` and split on their first `:`. A token without `:` is kept
    /// with an empty value, empty tokens are skipped and a repeated key keeps its last value.
    /// This never fails.
    pub fn details(&self) -> &Details {
        self.details.get_or_init(|| parse_details(&self.raw_details))
    }
}

/// Parses one raw line. `line_number` is 1-based and is only used to label errors.
///
/// Owns everything it returns and touches no shared state. A single trailing `\r` is ignored.
/// Timestamp and latency must be plain ASCII digits, so signs and whitespace are rejected. Checks run in field order: field count, timestamp,
/// source IP and user, then latency; the first failure decides the error kind.
pub fn parse(line: &str, line_number: u64) -> Parsed {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let fail = |kind: ParseErrorKind| ParseError::new(kind, line, line_number);

    let mut fields = line.splitn(constants::FIELD_COUNT, constants::FIELD_DELIMITER);
    let (
        Some(timestamp),
        Some(source_ip),
        Some(user_id),
        Some(action),
        Some(status),
        Some(latency),
        Some(details),
    ) = (
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
    )
    else {
        return Err(fail(ParseErrorKind::MalformedFieldCount));
    };

    let timestamp =
        parse_unsigned(timestamp).ok_or_else(|| fail(ParseErrorKind::InvalidTimestamp))?;

    if source_ip.is_empty() || user_id.is_empty() {
        return Err(fail(ParseErrorKind::EmptyField));
    }

    let latency_ms = latency
        .strip_suffix(constants::LATENCY_SUFFIX)
        .and_then(parse_unsigned)
        .ok_or_else(|| fail(ParseErrorKind::InvalidLatency))?;

    Ok(LogRecord {
        timestamp,
        source_ip: source_ip.to_string(),
        user_id: user_id.to_string(),
        action: action.to_string(),
        status: status.to_string(),
        latency_ms,
        raw_details: details.to_string(),
        details: OnceLock::new(),
    })
}

// u64::from_str also takes a leading '+'
fn parse_unsigned(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

fn parse_details(raw: &str) -> Details {
    let mut details = Details::default();
    for token in raw
        .split(constants::DETAIL_SEPARATOR)
        .filter(|t| !t.is_empty())
    {
        let (key, value) = token
            .split_once(constants::DETAIL_KV_SEPARATOR)
            .unwrap_or((token, ""));
        details.insert(key.to_string(), value.to_string());
    }
    details
}
