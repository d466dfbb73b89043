// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::fmt::Write as _;
use std::{env, io, process::ExitCode};
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logstats::{
    aggregator::AggregateSnapshot,
    aggregator_service::{AggregatorHandle, AggregatorService},
    config::AnalyzerConfig,
    reader::{LineSource, LogReader},
};

const TOP_N: usize = 5;

#[tokio::main]
pub async fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        let program = args.first().map_or("log-analyzer", String::as_str);
        eprintln!("Error: Incorrect number of arguments.");
        eprintln!("Usage: {program} <path_to_log_file>");
        return ExitCode::FAILURE;
    }
    let log_path = &args[1];

    let config = match AnalyzerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::new(&config.log_level))
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error: setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }

    debug!("Logging subsystem enabled");
    info!("Initializing Log File Analyzer...");
    info!("Target log file: {log_path}");

    let cancel_token = CancellationToken::new();
    let interrupt_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, finishing with the lines read so far");
            interrupt_token.cancel();
        }
    });

    let analysis = match analyze(log_path, &config, cancel_token).await {
        Ok(analysis) => analysis,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // print whatever was counted even if the read failed part way
    print!("{}", format_report(&analysis.snapshot));

    match analysis.read_result {
        Ok(lines) => {
            debug!("Reader finished after {lines} lines");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed while reading {log_path}: {e}");
            ExitCode::FAILURE
        }
    }
}

struct Analysis {
    snapshot: AggregateSnapshot,
    read_result: io::Result<u64>,
}

/// Streams `log_path` through the aggregator service. Fails only if the file cannot be opened
/// or the service cannot run; a read error part way still yields the totals so far.
async fn analyze(
    log_path: &str,
    config: &AnalyzerConfig,
    cancel_token: CancellationToken,
) -> Result<Analysis, String> {
    let source = LineSource::open(log_path)
        .await
        .map_err(|e| format!("Could not open the log file at {log_path}: {e}"))?;
    info!("File opened successfully. Starting analysis...");

    let (service, handle) = AggregatorService::new(config.max_contexts)
        .map_err(|e| format!("Failed to create aggregator service: {e}"))?;
    let service_task = tokio::spawn(service.run());

    let reporter_token = cancel_token.child_token();
    let reporter = config.report_interval().map(|period| {
        tokio::spawn(report_progress(
            handle.clone(),
            period,
            reporter_token.clone(),
        ))
    });

    let reader = LogReader::new(source, handle.clone(), config.batch_size, cancel_token);
    let read_result = reader.spin().await;

    // the reader has returned, stop the reporter
    reporter_token.cancel();
    if let Some(reporter) = reporter {
        if let Err(e) = reporter.await {
            error!("Progress reporter failed: {e}");
        }
    }

    if let Err(e) = handle.shutdown().await {
        error!("Failed to shut down aggregator service: {e}");
    }
    let snapshot = service_task
        .await
        .map_err(|e| format!("Aggregator service failed: {e}"))?;

    Ok(Analysis {
        snapshot,
        read_result,
    })
}

async fn report_progress(
    handle: AggregatorHandle,
    period: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.tick().await; // discard first tick, which is instantaneous

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match handle.snapshot().await {
                    Ok(snapshot) => info!(
                        "Progress: {} lines, {} records, {} parse errors",
                        snapshot.total_lines, snapshot.records, snapshot.parse_errors
                    ),
                    Err(e) => {
                        error!("Progress snapshot failed: {e}");
                        break;
                    }
                }
            }
            _ = cancel_token.cancelled() => break,
        }
    }
}

fn format_report(snapshot: &AggregateSnapshot) -> String {
    let mut out = String::new();
    // writing to a String cannot fail
    let _ = write_report(&mut out, snapshot);
    out
}

fn write_report(out: &mut String, s: &AggregateSnapshot) -> std::fmt::Result {
    writeln!(out, "------------------------------------")?;
    writeln!(out, "Analysis finished.")?;
    writeln!(out, "Total lines processed: {}", s.total_lines)?;
    writeln!(out, "Records parsed:        {}", s.records)?;
    writeln!(out, "Parse errors:          {}", s.parse_errors)?;
    for (kind, count) in &s.errors_by_kind {
        writeln!(out, "  {kind}: {count}")?;
    }

    if let (Some(earliest), Some(latest)) = (s.earliest_timestamp, s.latest_timestamp) {
        writeln!(out, "Time range:            {earliest} .. {latest}")?;
        writeln!(out, "Out-of-order records:  {}", s.out_of_order)?;
    }

    writeln!(out, "Actions:")?;
    for (action, count) in &s.actions {
        writeln!(out, "  {action}: {count}")?;
    }
    writeln!(out, "Statuses:")?;
    for (status, count) in &s.statuses {
        writeln!(out, "  {status}: {count}")?;
    }

    let latency = &s.latency;
    if let (Some(min), Some(max), Some(mean), Some(stddev)) = (
        latency.min_ms,
        latency.max_ms,
        latency.mean_ms,
        latency.stddev_ms,
    ) {
        writeln!(out, "Latency (ms):")?;
        writeln!(out, "  min {min}  max {max}  mean {mean:.2}  stddev {stddev:.2}")?;
        let quantiles = [
            ("p50", latency.p50_ms),
            ("p90", latency.p90_ms),
            ("p95", latency.p95_ms),
            ("p99", latency.p99_ms),
        ];
        for (name, value) in quantiles {
            if let Some(value) = value {
                writeln!(out, "  {name} ~{value:.1}")?;
            }
        }
    }

    writeln!(out, "Top users:")?;
    for (user, count) in s.top_users(TOP_N) {
        writeln!(out, "  {user}: {count}")?;
    }
    if s.untracked_users > 0 {
        writeln!(out, "  (untracked: {})", s.untracked_users)?;
    }
    writeln!(out, "Top source IPs:")?;
    for (ip, count) in s.top_source_ips(TOP_N) {
        writeln!(out, "  {ip}: {count}")?;
    }
    if s.untracked_source_ips > 0 {
        writeln!(out, "  (untracked: {})", s.untracked_source_ips)?;
    }
    writeln!(out, "------------------------------------")
}
