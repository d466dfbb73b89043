// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Streaming parser and aggregator for pipe-delimited activity logs.
//!
//! Lines look like `timestamp|ip|user|action|status|<n>ms|details`. [`record::parse`] turns a
//! line into a [`record::LogRecord`] or a [`errors::ParseError`], and an
//! [`aggregator::Aggregator`] folds either into running totals without keeping the records.
//! [`aggregator_service`] and [`shared_aggregator`] let a reporter read snapshots while
//! ingestion continues, and [`reader`] drives the whole thing from a file.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod aggregator;
pub mod aggregator_service;
pub mod config;
pub mod constants;
pub mod errors;
pub mod latency;
pub mod reader;
pub mod record;
pub mod shared_aggregator;
