// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Number of `|`-separated fields in a well-formed line. The last one, `details`, takes the
/// remainder of the line.
pub const FIELD_COUNT: usize = 7;

pub const FIELD_DELIMITER: char = '|';
pub const LATENCY_SUFFIX: &str = "ms";
pub const DETAIL_SEPARATOR: char = ',';
pub const DETAIL_KV_SEPARATOR: char = ':';

/// Default cap on distinct users (and, separately, source IPs) tallied by the aggregator.
pub const CONTEXTS: usize = 10_000;

/// Default number of lines the reader hands to the aggregator at once.
pub const BATCH_SIZE: usize = 1_024;

/// Longest prefix of an offending line that is written to diagnostics.
pub const MAX_LINE_PREVIEW: usize = 256;

/// Batches the aggregator service queues before the reader has to wait.
pub const QUEUE_CAPACITY: usize = 16;

/// Longest line, in bytes without its newline, that the reader will hold in memory.
pub const MAX_LINE_BYTES: usize = 64 * 1024;
