// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use crate::coalesce::SnapshotPolicy;
use crate::constants::{
    DEFAULT_BATCH_WINDOW, DEFAULT_LOG_LEVEL, DEFAULT_MAX_BATCH_SIZE, DEFAULT_SINK_QUEUE_SIZE,
    DEFAULT_SNAPSHOT_MARKER, DEFAULT_SNAPSHOT_TYPE, LOG_LEVELS, OVERFLOW_FACTOR,
};
use crate::errors;

/// Batching limits of an aggregator. Set once at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Elapsed time after which the window timer flushes.
    pub batch_window: Duration,
    /// Maximum number of events emitted by a single flush.
    pub max_batch_size: usize,
    /// Hard bound on the number of queued events.
    pub overflow_capacity: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfig {
            batch_window: DEFAULT_BATCH_WINDOW,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            overflow_capacity: DEFAULT_MAX_BATCH_SIZE * OVERFLOW_FACTOR,
        }
    }
}

impl AggregatorConfig {
    /// Builds a config whose overflow capacity is twice the batch size.
    #[must_use]
    pub fn new(batch_window_ms: u64, max_batch_size: usize) -> Self {
        AggregatorConfig {
            batch_window: Duration::from_millis(batch_window_ms),
            max_batch_size,
            overflow_capacity: max_batch_size.saturating_mul(OVERFLOW_FACTOR),
        }
    }

    #[must_use]
    pub fn with_overflow_capacity(mut self, overflow_capacity: usize) -> Self {
        self.overflow_capacity = overflow_capacity;
        self
    }

    pub fn validate(&self) -> Result<(), errors::Creation> {
        if self.max_batch_size == 0 {
            return Err(errors::Creation::ZeroBatchSize);
        }
        if self.batch_window.is_zero() {
            return Err(errors::Creation::ZeroBatchWindow);
        }
        if self.overflow_capacity < self.max_batch_size {
            return Err(errors::Creation::CapacityBelowBatchSize {
                capacity: self.overflow_capacity,
                max_batch_size: self.max_batch_size,
            });
        }
        Ok(())
    }
}

/// Configuration of the relay process, read from `EVENT_*` environment variables.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub aggregator: AggregatorConfig,
    /// Event types coalesced by their snapshot marker.
    pub snapshot_types: Vec<String>,
    /// Payload field holding the snapshot marker.
    pub snapshot_marker: String,
    /// Deliveries buffered in front of the sink before new ones are rejected.
    pub sink_queue_size: usize,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            aggregator: AggregatorConfig::default(),
            snapshot_types: vec![DEFAULT_SNAPSHOT_TYPE.to_string()],
            snapshot_marker: DEFAULT_SNAPSHOT_MARKER.to_string(),
            sink_queue_size: DEFAULT_SINK_QUEUE_SIZE,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl RelayConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, errors::Config> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// Unparsable numbers fall back to their defaults; the result is validated before returning.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, errors::Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = RelayConfig::default();

        let batch_window_ms = parse_or(
            &lookup,
            "EVENT_BATCH_WINDOW_MS",
            u64::try_from(DEFAULT_BATCH_WINDOW.as_millis()).unwrap_or(100),
        );
        let max_batch_size = parse_or(&lookup, "EVENT_MAX_BATCH_SIZE", DEFAULT_MAX_BATCH_SIZE);
        let mut aggregator = AggregatorConfig::new(batch_window_ms, max_batch_size);
        if let Some(capacity) = lookup("EVENT_OVERFLOW_CAPACITY").and_then(|v| v.parse().ok()) {
            aggregator = aggregator.with_overflow_capacity(capacity);
        }

        let snapshot_types = lookup("EVENT_SNAPSHOT_TYPES")
            .map(|val| {
                val.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or(defaults.snapshot_types);
        let snapshot_marker = lookup("EVENT_SNAPSHOT_MARKER")
            .map(|val| val.trim().to_string())
            .filter(|val| !val.is_empty())
            .unwrap_or(defaults.snapshot_marker);
        let sink_queue_size = parse_or(&lookup, "EVENT_SINK_QUEUE_SIZE", defaults.sink_queue_size);
        let log_level = lookup("EVENT_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = RelayConfig {
            aggregator,
            snapshot_types,
            snapshot_marker,
            sink_queue_size,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), errors::Config> {
        self.aggregator.validate()?;

        if self.sink_queue_size == 0 {
            return Err(errors::Config::Invalid(
                "EVENT_SINK_QUEUE_SIZE must be greater than 0".to_string(),
            ));
        }

        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(errors::Config::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    #[must_use]
    pub fn snapshot_policy(&self) -> SnapshotPolicy {
        SnapshotPolicy::new(self.snapshot_types.clone(), self.snapshot_marker.clone())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|val| val.trim().parse::<T>().ok())
        .unwrap_or(default)
}
