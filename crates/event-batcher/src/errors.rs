// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the event batcher.

/// Errors raised while building an aggregator from an invalid configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Creation {
    #[error("max_batch_size must be greater than zero")]
    ZeroBatchSize,

    #[error("batch window must be greater than zero")]
    ZeroBatchWindow,

    #[error("overflow capacity {capacity} is smaller than max_batch_size {max_batch_size}")]
    CapacityBelowBatchSize {
        capacity: usize,
        max_batch_size: usize,
    },
}

/// Errors raised when an event cannot be admitted.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Insert {
    #[error("event is missing a type")]
    MissingType,

    #[error("aggregator service is not running")]
    ServiceClosed,
}

/// Errors raised while loading process configuration.
#[derive(Debug, thiserror::Error)]
pub enum Config {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Aggregator(#[from] Creation),
}
