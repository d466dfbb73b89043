// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Folds parsed lines into running totals.
//!
//! The aggregator never keeps a record once it has been counted. Action and status counters
//! are unbounded in key count but their vocabulary is small. Per-user and per-IP tallies are
//! capped at `max_context` distinct keys each; once a cap is hit, records for new keys are
//! still counted everywhere else and show up in the matching `untracked_*` counter.

use std::collections::BTreeMap;

use fnv::FnvBuildHasher;
use hashbrown::HashMap;
use serde::Serialize;
use tracing::warn;

use crate::errors::{self, ParseError, ParseErrorKind};
use crate::latency::{LatencyStats, LatencySummary};
use crate::record::{LogRecord, Parsed};

type Counts<K> = HashMap<K, u64, FnvBuildHasher>;

/// Point-in-time copy of an [`Aggregator`]'s totals.
///
/// `total_lines == records + parse_errors` holds for every snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateSnapshot {
    pub total_lines: u64,
    pub records: u64,
    pub parse_errors: u64,
    pub errors_by_kind: BTreeMap<ParseErrorKind, u64>,
    pub actions: BTreeMap<String, u64>,
    pub statuses: BTreeMap<String, u64>,
    pub users: BTreeMap<String, u64>,
    pub source_ips: BTreeMap<String, u64>,
    /// Records whose user arrived after the user tally was full.
    pub untracked_users: u64,
    /// Records whose source IP arrived after the IP tally was full.
    pub untracked_source_ips: u64,
    pub latency: LatencyStats,
    pub earliest_timestamp: Option<u64>,
    pub latest_timestamp: Option<u64>,
    /// Records whose timestamp is older than the newest one seen before them.
    pub out_of_order: u64,
}

impl AggregateSnapshot {
    /// The `n` users with the most records, busiest first, ties broken by name.
    #[must_use]
    pub fn top_users(&self, n: usize) -> Vec<(&str, u64)> {
        top_n(&self.users, n)
    }

    /// The `n` source IPs with the most records, busiest first, ties broken by address.
    #[must_use]
    pub fn top_source_ips(&self, n: usize) -> Vec<(&str, u64)> {
        top_n(&self.source_ips, n)
    }
}

fn top_n(counts: &BTreeMap<String, u64>, n: usize) -> Vec<(&str, u64)> {
    let mut entries: Vec<(&str, u64)> = counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    // BTreeMap iteration is already key-ordered and the sort is stable
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    entries.truncate(n);
    entries
}

#[derive(Debug, Clone)]
pub struct Aggregator {
    max_context: usize,
    total_lines: u64,
    records: u64,
    parse_errors: u64,
    errors_by_kind: Counts<ParseErrorKind>,
    actions: Counts<String>,
    statuses: Counts<String>,
    users: Counts<String>,
    source_ips: Counts<String>,
    untracked_users: u64,
    untracked_source_ips: u64,
    latency: LatencySummary,
    earliest_timestamp: Option<u64>,
    latest_timestamp: Option<u64>,
    out_of_order: u64,
    context_limit_reported: bool,
}

impl Aggregator {
    /// Returns a new aggregator that tracks at most `max_context` distinct users and, separately,
    /// `max_context` distinct source IPs.
    ///
    /// # Errors
    /// Fails if `max_context` is 0.
    pub fn new(max_context: usize) -> Result<Self, errors::Creation> {
        if max_context == 0 {
            return Err(errors::Creation::ContextLimit);
        }
        Ok(Self {
            max_context,
            total_lines: 0,
            records: 0,
            parse_errors: 0,
            errors_by_kind: Counts::default(),
            actions: Counts::default(),
            statuses: Counts::default(),
            users: Counts::default(),
            source_ips: Counts::default(),
            untracked_users: 0,
            untracked_source_ips: 0,
            latency: LatencySummary::default(),
            earliest_timestamp: None,
            latest_timestamp: None,
            out_of_order: 0,
            context_limit_reported: false,
        })
    }

    /// Counts one line, parsed or not. Never fails.
    pub fn ingest(&mut self, item: Parsed) {
        match item {
            Ok(record) => self.ingest_record(&record),
            Err(error) => self.ingest_error(&error),
        }
    }

    pub fn ingest_record(&mut self, record: &LogRecord) {
        self.total_lines += 1;
        self.records += 1;

        *self.actions.entry_ref(record.action()).or_default() += 1;
        *self.statuses.entry_ref(record.status()).or_default() += 1;
        self.latency.insert(record.latency_ms());

        let timestamp = record.timestamp();
        match self.latest_timestamp {
            Some(latest) if timestamp < latest => self.out_of_order += 1,
            _ => self.latest_timestamp = Some(timestamp),
        }
        self.earliest_timestamp = Some(
            self.earliest_timestamp
                .map_or(timestamp, |earliest| earliest.min(timestamp)),
        );

        if !tally(&mut self.users, record.user_id(), self.max_context) {
            self.untracked_users += 1;
            self.report_context_limit();
        }
        if !tally(&mut self.source_ips, record.source_ip(), self.max_context) {
            self.untracked_source_ips += 1;
            self.report_context_limit();
        }
    }

    /// Parse errors only move the line and error counters.
    pub fn ingest_error(&mut self, error: &ParseError) {
        self.total_lines += 1;
        self.parse_errors += 1;
        *self.errors_by_kind.entry(error.kind).or_default() += 1;
    }

    #[must_use]
    pub fn total_lines(&self) -> u64 {
        self.total_lines
    }

    #[must_use]
    pub fn snapshot(&self) -> AggregateSnapshot {
        AggregateSnapshot {
            total_lines: self.total_lines,
            records: self.records,
            parse_errors: self.parse_errors,
            errors_by_kind: self.errors_by_kind.iter().map(|(k, v)| (*k, *v)).collect(),
            actions: to_sorted(&self.actions),
            statuses: to_sorted(&self.statuses),
            users: to_sorted(&self.users),
            source_ips: to_sorted(&self.source_ips),
            untracked_users: self.untracked_users,
            untracked_source_ips: self.untracked_source_ips,
            latency: self.latency.stats(),
            earliest_timestamp: self.earliest_timestamp,
            latest_timestamp: self.latest_timestamp,
            out_of_order: self.out_of_order,
        }
    }

    fn report_context_limit(&mut self) {
        if !self.context_limit_reported {
            self.context_limit_reported = true;
            warn!(
                "Context limit of {} reached, further users or source IPs are counted as untracked",
                self.max_context
            );
        }
    }
}

/// Bumps `key`, inserting it only while the map holds fewer than `limit` keys. Returns false
/// if the key had to be dropped.
fn tally(counts: &mut Counts<String>, key: &str, limit: usize) -> bool {
    if let Some(count) = counts.get_mut(key) {
        *count += 1;
        return true;
    }
    if counts.len() >= limit {
        return false;
    }
    counts.insert(key.to_string(), 1);
    true
}

fn to_sorted(counts: &Counts<String>) -> BTreeMap<String, u64> {
    counts.iter().map(|(k, v)| (k.clone(), *v)).collect()
}
