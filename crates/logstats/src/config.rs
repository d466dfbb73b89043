// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants;
use crate::errors::ConfigError;
use std::env;
use std::time::Duration;

const DEFAULT_REPORT_INTERVAL_SECS: u64 = 5;

/// Configuration for a log analysis run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerConfig {
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
    /// how often to report progress, in seconds; 0 turns progress reports off
    pub report_interval_secs: u64,
    /// Lines handed to the aggregator per batch
    pub batch_size: usize,
    /// Maximum distinct users, and separately source IPs, tallied
    pub max_contexts: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            report_interval_secs: DEFAULT_REPORT_INTERVAL_SECS,
            batch_size: constants::BATCH_SIZE,
            max_contexts: constants::CONTEXTS,
        }
    }
}

impl AnalyzerConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let log_level = env::var("LOG_ANALYZER_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| "info".to_string());
        let report_interval_secs = env::var("LOG_ANALYZER_REPORT_INTERVAL_SECS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .unwrap_or(DEFAULT_REPORT_INTERVAL_SECS);
        let batch_size = env::var("LOG_ANALYZER_BATCH_SIZE")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(constants::BATCH_SIZE);
        let max_contexts = env::var("LOG_ANALYZER_MAX_CONTEXTS")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(constants::CONTEXTS);

        let config = Self {
            log_level,
            report_interval_secs,
            batch_size,
            max_contexts,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "LOG_ANALYZER_BATCH_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.max_contexts == 0 {
            return Err(ConfigError::InvalidConfig(
                "LOG_ANALYZER_MAX_CONTEXTS must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// `None` when progress reports are turned off.
    #[must_use]
    pub fn report_interval(&self) -> Option<Duration> {
        (self.report_interval_secs > 0).then(|| Duration::from_secs(self.report_interval_secs))
    }
}
