// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Line reader that feeds the aggregator.
//!
//! The reader pulls raw lines from a [`LineSource`], numbers them from 1, parses each one and
//! forwards them in batches to an [`AggregatorHandle`]. Lines are read as bytes and decoded
//! lossily, so invalid UTF-8 turns into a parse error on that line instead of ending the run.
//! A line longer than the configured cap is skipped in bounded chunks and reported as
//! [`ParseErrorKind::LineTooLong`]. Only I/O failures of the source itself are returned to the
//! caller.

use std::io::{self, Cursor};
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::aggregator_service::AggregatorHandle;
use crate::constants;
use crate::errors::{ParseError, ParseErrorKind};
use crate::record::{parse, Parsed};

/// Where raw lines come from.
pub enum LineSource {
    File(BufReader<File>),
    /// Replays a fixed buffer, for tests and in-memory input
    Mirror(Cursor<Vec<u8>>),
}

impl LineSource {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path).await?;
        Ok(LineSource::File(BufReader::new(file)))
    }

    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        LineSource::Mirror(Cursor::new(bytes.into()))
    }

    /// Reads the next line into `buf` without its `\n`, holding at most `max_len + 1` bytes.
    async fn read_line(&mut self, buf: &mut Vec<u8>, max_len: usize) -> io::Result<LineRead> {
        match self {
            LineSource::File(reader) => read_capped(reader, buf, max_len).await,
            LineSource::Mirror(cursor) => read_capped(cursor, buf, max_len).await,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Line,
    /// `buf` holds the start of the line; the rest was discarded.
    TooLong,
    Eof,
}

async fn read_capped<R>(reader: &mut R, buf: &mut Vec<u8>, max_len: usize) -> io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let limit = max_len as u64 + 1;
    buf.clear();
    if (&mut *reader).take(limit).read_until(b'\n', buf).await? == 0 {
        return Ok(LineRead::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        return Ok(LineRead::Line);
    }
    if buf.len() <= max_len {
        // last line, no trailing newline
        return Ok(LineRead::Line);
    }

    let mut rest = Vec::new();
    loop {
        rest.clear();
        let read = (&mut *reader).take(limit).read_until(b'\n', &mut rest).await?;
        if read == 0 || rest.last() == Some(&b'\n') {
            return Ok(LineRead::TooLong);
        }
    }
}

/// Reads, parses and forwards lines until the source is exhausted or the token is cancelled.
pub struct LogReader {
    cancel_token: CancellationToken,
    aggregator_handle: AggregatorHandle,
    source: LineSource,
    batch_size: usize,
    max_line_bytes: usize,
    line_number: u64,
}

impl LogReader {
    /// `batch_size` is clamped to at least 1.
    #[must_use]
    pub fn new(
        source: LineSource,
        aggregator_handle: AggregatorHandle,
        batch_size: usize,
        cancel_token: CancellationToken,
    ) -> Self {
        LogReader {
            cancel_token,
            aggregator_handle,
            source,
            batch_size: batch_size.max(1),
            max_line_bytes: constants::MAX_LINE_BYTES,
            line_number: 0,
        }
    }

    /// Overrides the longest accepted line, in bytes without the newline.
    #[must_use]
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    /// Main loop. Returns how many lines were read.
    ///
    /// Cancellation is checked between batches; every line read before that point has been
    /// handed to the aggregator.
    pub async fn spin(mut self) -> io::Result<u64> {
        let mut buf = Vec::new();
        loop {
            if self.cancel_token.is_cancelled() {
                debug!("Log reader cancelled after {} lines", self.line_number);
                break;
            }

            let (batch, exhausted) = self.read_batch(&mut buf).await?;
            if !batch.is_empty() {
                trace!("Sending {} lines to aggregator", batch.len());
                if let Err(e) = self.aggregator_handle.ingest_batch(batch).await {
                    error!("Failed to send lines to aggregator: {}", e);
                    return Err(io::Error::other("aggregator is no longer running"));
                }
            }
            if exhausted {
                debug!("Reached end of input after {} lines", self.line_number);
                break;
            }
        }
        Ok(self.line_number)
    }

    async fn read_batch(&mut self, buf: &mut Vec<u8>) -> io::Result<(Vec<Parsed>, bool)> {
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            let read = self.source.read_line(buf, self.max_line_bytes).await?;
            if read == LineRead::Eof {
                return Ok((batch, true));
            }
            self.line_number += 1;

            let parsed = if read == LineRead::TooLong {
                let head = &buf[..buf.len().min(constants::MAX_LINE_PREVIEW)];
                Err(ParseError::new(
                    ParseErrorKind::LineTooLong,
                    &String::from_utf8_lossy(head),
                    self.line_number,
                ))
            } else {
                parse(&String::from_utf8_lossy(buf), self.line_number)
            };
            if let Err(e) = &parsed {
                debug!("Failed to parse line {}: {}. {:?}", e.line_number, e.kind, e.preview());
            }
            batch.push(parsed);
        }
        Ok((batch, false))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::aggregator::AggregateSnapshot;
    use crate::aggregator_service::AggregatorService;
    use crate::constants::CONTEXTS;
    use std::time::Duration;
    use tracing_test::traced_test;

    async fn read_all(input: &[u8], batch_size: usize) -> (u64, AggregateSnapshot) {
        read_all_capped(input, batch_size, constants::MAX_LINE_BYTES).await
    }

    async fn read_all_capped(
        input: &[u8],
        batch_size: usize,
        max_line_bytes: usize,
    ) -> (u64, AggregateSnapshot) {
        let (service, handle) =
            AggregatorService::new(CONTEXTS).expect("aggregator service creation failed");
        let service_task = tokio::spawn(service.run());

        let reader = LogReader::new(
            LineSource::from_bytes(input),
            handle.clone(),
            batch_size,
            CancellationToken::new(),
        )
        .with_max_line_bytes(max_line_bytes);
        let lines = reader.spin().await.expect("reader failed");

        handle.shutdown().await.expect("Failed to shutdown");
        let snapshot = service_task.await.expect("Service task failed");
        (lines, snapshot)
    }

    #[tokio::test]
    async fn reads_every_line_across_batches() {
        let input = b"1|ip|u|LOGIN|SUCCESS|1ms|\n\
                      2|ip|u|LOGOUT|SUCCESS|2ms|\n\
                      bad|line\n\
                      4|ip|u|LOGIN|FAILURE|4ms|\n\
                      5|ip|u|LOGIN|SUCCESS|5ms|\n";
        let (lines, snapshot) = read_all(input, 2).await;

        assert_eq!(lines, 5);
        assert_eq!(snapshot.total_lines, 5);
        assert_eq!(snapshot.records, 4);
        assert_eq!(snapshot.parse_errors, 1);
        assert_eq!(snapshot.actions["LOGIN"], 3);
    }

    #[tokio::test]
    async fn last_line_without_newline_is_read() {
        let (lines, snapshot) = read_all(b"1|ip|u|LOGIN|SUCCESS|1ms|\n2|ip|u|LOGIN|SUCCESS|1ms|", 10).await;
        assert_eq!(lines, 2);
        assert_eq!(snapshot.records, 2);
    }

    #[tokio::test]
    async fn crlf_and_blank_lines() {
        let input = b"1|ip|u|LOGIN|SUCCESS|1ms|a:b\r\n\r\n2|ip|u|LOGIN|SUCCESS|1ms|\r\n";
        let (lines, snapshot) = read_all(input, 10).await;
        assert_eq!(lines, 3);
        assert_eq!(snapshot.records, 2);
        assert_eq!(
            snapshot.errors_by_kind[&ParseErrorKind::MalformedFieldCount],
            1
        );
    }

    #[tokio::test]
    async fn invalid_utf8_is_a_line_not_a_failure() {
        let mut input = b"1|ip|u|LOGIN|SUCCESS|1ms|\n".to_vec();
        input.extend_from_slice(b"\xff\xfe|garbage\n");
        input.extend_from_slice(b"2|ip|\xc3\x28|LOGIN|SUCCESS|1ms|\n");
        let (lines, snapshot) = read_all(&input, 10).await;
        assert_eq!(lines, 3);
        assert_eq!(snapshot.records, 2);
        assert_eq!(snapshot.parse_errors, 1);
    }

    #[tokio::test]
    async fn empty_input() {
        let (lines, snapshot) = read_all(b"", 10).await;
        assert_eq!(lines, 0);
        assert_eq!(snapshot, AggregateSnapshot::default());
    }

    #[tokio::test]
    #[traced_test]
    async fn parse_failures_are_logged_with_line_number() {
        let input = b"1|ip|u|LOGIN|SUCCESS|1ms|\nabc|ip|u|LOGIN|SUCCESS|1ms|\n";
        let (_, snapshot) = read_all(input, 10).await;
        assert_eq!(snapshot.parse_errors, 1);
        assert!(logs_contain("Failed to parse line 2: invalid timestamp"));
    }

    #[tokio::test]
    async fn cancelled_reader_stops_before_reading() {
        let (service, handle) =
            AggregatorService::new(CONTEXTS).expect("aggregator service creation failed");
        let service_task = tokio::spawn(service.run());

        let cancel_token = CancellationToken::new();
        cancel_token.cancel();
        let reader = LogReader::new(
            LineSource::from_bytes(&b"1|ip|u|LOGIN|SUCCESS|1ms|\n"[..]),
            handle.clone(),
            10,
            cancel_token,
        );
        assert_eq!(reader.spin().await.unwrap(), 0);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.total_lines, 0);
        handle.shutdown().await.unwrap();
        service_task.await.unwrap();
    }

    #[tokio::test]
    async fn stopped_aggregator_is_an_error() {
        let (service, handle) =
            AggregatorService::new(CONTEXTS).expect("aggregator service creation failed");
        drop(service);

        let reader = LogReader::new(
            LineSource::from_bytes(&b"1|ip|u|LOGIN|SUCCESS|1ms|\n"[..]),
            handle,
            10,
            CancellationToken::new(),
        );
        assert!(reader.spin().await.is_err());
    }

    #[tokio::test]
    async fn oversized_lines_are_skipped_and_counted() {
        let long = format!("1|ip|u|LOGIN|SUCCESS|1ms|{}", "x".repeat(500));
        let exact = format!("2|ip|u|LOGIN|SUCCESS|1ms|{}", "y".repeat(40 - 25));
        let input = format!("{long}\n{exact}\n3|ip|u|LOGOUT|SUCCESS|3ms|\n{long}");
        let (lines, snapshot) = read_all_capped(input.as_bytes(), 2, 40).await;

        assert_eq!(exact.len(), 40);
        assert_eq!(lines, 4);
        assert_eq!(snapshot.records, 2);
        assert_eq!(snapshot.errors_by_kind[&ParseErrorKind::LineTooLong], 2);
        assert_eq!(snapshot.actions["LOGOUT"], 1);
    }

    #[tokio::test]
    async fn input_without_newlines_is_read_in_bounded_chunks() {
        let mut source = LineSource::from_bytes(vec![b'a'; 10_000]);
        let mut buf = Vec::new();
        assert_eq!(source.read_line(&mut buf, 64).await.unwrap(), LineRead::TooLong);
        assert!(buf.capacity() < 10_000);
        assert_eq!(source.read_line(&mut buf, 64).await.unwrap(), LineRead::Eof);
    }

    #[tokio::test]
    async fn reader_waits_for_a_full_queue() {
        let (service, handle) = AggregatorService::with_queue_capacity(CONTEXTS, 4)
            .expect("aggregator service creation failed");

        let input: String = (1..=1_000)
            .map(|i| format!("{i}|ip|u|LOGIN|SUCCESS|1ms|\n"))
            .collect();
        let reader = LogReader::new(
            LineSource::from_bytes(input),
            handle.clone(),
            1,
            CancellationToken::new(),
        );
        let reader_task = tokio::spawn(reader.spin());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!reader_task.is_finished());

        let service_task = tokio::spawn(service.run());
        assert_eq!(reader_task.await.unwrap().unwrap(), 1_000);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.total_lines, 1_000);
        handle.shutdown().await.unwrap();
        service_task.await.unwrap();
    }
}
