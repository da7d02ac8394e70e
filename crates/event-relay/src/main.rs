// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use event_batcher::{
    aggregator::EventAggregator,
    aggregator_service::{spawn_window_ticker, AggregatorHandle, AggregatorService},
    config::RelayConfig,
    constants::DEFAULT_LOG_LEVEL,
    event::Event,
    logger::{filter_directive, Formatter},
    sink::{ChannelSink, JsonLinesSink},
};

const MAX_TICK_INTERVAL: Duration = Duration::from_millis(10);

#[tokio::main]
pub async fn main() {
    // read before the subscriber exists so a bad EVENT_LOG_LEVEL cannot hide its own error
    let config = RelayConfig::from_env();
    let log_level = match &config {
        Ok(config) => config.log_level.as_str(),
        Err(_) => DEFAULT_LOG_LEVEL,
    };
    let env_filter = filter_directive(log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_writer(std::io::stderr)
        .event_format(Formatter)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match config {
        Ok(c) => c,
        Err(e) => {
            error!("Error creating config on event relay startup: {e}");
            return;
        }
    };

    let cancel_token = CancellationToken::new();

    // stdout writes happen on the sink worker, never on the flush path
    let stdout_sink = Arc::new(JsonLinesSink::new(std::io::stdout()));
    let (channel_sink, sink_worker) =
        ChannelSink::new(stdout_sink, config.sink_queue_size, cancel_token.clone());
    let sink_task = tokio::spawn(sink_worker.run());

    let aggregator = match EventAggregator::new(
        config.aggregator,
        Arc::new(channel_sink),
        Arc::new(config.snapshot_policy()),
    ) {
        Ok(aggregator) => aggregator,
        Err(e) => {
            error!("Error creating event aggregator: {e}");
            return;
        }
    };
    let (service, handle) = AggregatorService::new(aggregator);
    let service_task = tokio::spawn(service.run());

    let tick_interval = config.aggregator.batch_window.min(MAX_TICK_INTERVAL);
    let ticker_task = spawn_window_ticker(handle.clone(), tick_interval, cancel_token.clone());

    info!(
        "event-relay: batching with window={:?}, max_batch={}, capacity={}",
        config.aggregator.batch_window,
        config.aggregator.max_batch_size,
        config.aggregator.overflow_capacity
    );

    tokio::select! {
        () = relay_stdin(&handle) => debug!("stdin closed"),
        _ = tokio::signal::ctrl_c() => info!("interrupted, shutting down"),
    }

    match handle.drain().await {
        Ok(batches) => debug!("Drained {batches} remaining batches"),
        Err(e) => error!("Failed to drain aggregator: {e}"),
    }
    match handle.get_stats().await {
        Ok(stats) => match serde_json::to_string(&stats) {
            Ok(stats) => info!("event-relay: final stats {stats}"),
            Err(e) => error!("Failed to serialize stats: {e}"),
        },
        Err(e) => error!("Failed to read stats: {e}"),
    }

    if let Err(e) = handle.shutdown() {
        error!("Failed to shut down aggregator service: {e}");
    }
    ticker_task.abort();
    // the aggregator owns the last channel sink; dropping it lets the worker finish the backlog
    match service_task.await {
        Ok(aggregator) => drop(aggregator),
        Err(e) => error!("Aggregator service task failed: {e}"),
    }
    if let Err(e) = sink_task.await {
        error!("Sink worker task failed: {e}");
    }

    // a read on an open stdin cannot be cancelled and would keep the runtime from dropping
    std::process::exit(0);
}

/// Feeds every JSON line read from stdin to the aggregator until EOF.
///
/// tokio serves stdin from a blocking thread. When this future is dropped on Ctrl-C while an
/// interactive or piped stdin is still open, that read stays pending until the process exits.
async fn relay_stdin(handle: &AggregatorHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read stdin: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let event = match serde_json::from_str::<Event>(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping malformed event: {e}");
                continue;
            }
        };
        if let Err(e) = handle.add_event(event) {
            warn!("Event not queued: {e}");
        }
    }
}
