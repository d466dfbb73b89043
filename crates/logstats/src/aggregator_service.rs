// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::aggregator::{AggregateSnapshot, Aggregator};
use crate::constants;
use crate::record::Parsed;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

#[derive(Debug)]
pub enum AggregatorCommand {
    IngestBatch(Vec<Parsed>),
    Snapshot(oneshot::Sender<AggregateSnapshot>),
    Shutdown,
}

#[derive(Clone)]
pub struct AggregatorHandle {
    tx: mpsc::Sender<AggregatorCommand>,
}

impl AggregatorHandle {
    /// Queues a batch, waiting while the service already has a full queue.
    pub async fn ingest_batch(
        &self,
        items: Vec<Parsed>,
    ) -> Result<(), mpsc::error::SendError<AggregatorCommand>> {
        self.tx.send(AggregatorCommand::IngestBatch(items)).await
    }

    /// Totals as of every batch sent on this handle before the call.
    pub async fn snapshot(&self) -> Result<AggregateSnapshot, String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(AggregatorCommand::Snapshot(response_tx))
            .await
            .map_err(|e| format!("Failed to send snapshot command: {}", e))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive snapshot response: {}", e))
    }

    pub async fn shutdown(&self) -> Result<(), mpsc::error::SendError<AggregatorCommand>> {
        self.tx.send(AggregatorCommand::Shutdown).await
    }
}

/// Owns an [`Aggregator`] and applies commands one at a time, so a snapshot always falls
/// between two batches.
///
/// The command queue holds at most `queue_capacity` entries. Senders wait once it is full, so
/// a slow or not yet started service holds back the reader instead of buffering the input.
pub struct AggregatorService {
    aggregator: Aggregator,
    rx: mpsc::Receiver<AggregatorCommand>,
}

impl AggregatorService {
    pub fn new(
        max_context: usize,
    ) -> Result<(Self, AggregatorHandle), crate::errors::Creation> {
        Self::with_queue_capacity(max_context, constants::QUEUE_CAPACITY)
    }

    /// `queue_capacity` is clamped to at least 1.
    pub fn with_queue_capacity(
        max_context: usize,
        queue_capacity: usize,
    ) -> Result<(Self, AggregatorHandle), crate::errors::Creation> {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let aggregator = Aggregator::new(max_context)?;

        let service = Self { aggregator, rx };

        let handle = AggregatorHandle { tx };

        Ok((service, handle))
    }

    /// Runs until a shutdown command arrives or every handle is dropped, then returns the
    /// final totals.
    pub async fn run(mut self) -> AggregateSnapshot {
        debug!("Aggregator service started");

        while let Some(command) = self.rx.recv().await {
            match command {
                AggregatorCommand::IngestBatch(items) => {
                    for item in items {
                        self.aggregator.ingest(item);
                    }
                }

                AggregatorCommand::Snapshot(response_tx) => {
                    if response_tx.send(self.aggregator.snapshot()).is_err() {
                        error!("Failed to send snapshot response - receiver dropped");
                    }
                }

                AggregatorCommand::Shutdown => {
                    debug!("Aggregator service shutting down");
                    break;
                }
            }
        }

        debug!(
            "Aggregator service stopped after {} lines",
            self.aggregator.total_lines()
        );
        self.aggregator.snapshot()
    }
}
