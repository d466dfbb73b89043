// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::aggregator::{AggregateSnapshot, Aggregator};
use crate::errors;
use crate::record::Parsed;

/// An [`Aggregator`] that can be fed from one thread and read from others.
///
/// The lock is held for exactly one fold or one snapshot copy, so a snapshot never sees half of
/// a record's contribution. Consistency is only promised per record: callers must not rely on
/// two snapshots bracketing a particular batch.
#[derive(Clone)]
pub struct SharedAggregator {
    inner: Arc<Mutex<Aggregator>>,
}

impl SharedAggregator {
    /// # Errors
    /// Fails if `max_context` is 0.
    pub fn new(max_context: usize) -> Result<Self, errors::Creation> {
        Ok(Self {
            inner: Arc::new(Mutex::new(Aggregator::new(max_context)?)),
        })
    }

    pub fn ingest(&self, item: Parsed) {
        self.lock().ingest(item);
    }

    #[must_use]
    pub fn snapshot(&self) -> AggregateSnapshot {
        self.lock().snapshot()
    }

    // ingest is total, so a poisoned guard still holds whole records only
    fn lock(&self) -> MutexGuard<'_, Aggregator> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
