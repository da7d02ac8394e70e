// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Window after which a timer-driven flush happens.
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(100);

/// Maximum number of events handed to the sink in a single flush.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;

/// The queue holds this many batches worth of events before evicting.
pub const OVERFLOW_FACTOR: usize = 2;

/// Event type treated as a state snapshot by the default coalescing policy.
pub const DEFAULT_SNAPSHOT_TYPE: &str = "GAME_STATE";

/// Payload field carrying the discrete progress marker of a snapshot.
pub const DEFAULT_SNAPSHOT_MARKER: &str = "frame";

/// Pending deliveries buffered between the flush path and a blocking sink.
pub const DEFAULT_SINK_QUEUE_SIZE: usize = 64;

/// Log levels accepted in `EVENT_LOG_LEVEL`.
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Level used when `EVENT_LOG_LEVEL` is unset or not one of [`LOG_LEVELS`].
pub const DEFAULT_LOG_LEVEL: &str = "info";
