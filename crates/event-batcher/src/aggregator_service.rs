// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Actor wrapper sharing one [`EventAggregator`] between tasks.
//!
//! ```text
//!    producers ──┐
//!                ├── AggregatorHandle (Clone) ──commands──> AggregatorService ──> EventAggregator
//!    ticker ─────┘
//! ```
//!
//! Every command is applied by the single service task in arrival order, so admission,
//! overflow eviction, priority flushes and window flushes never interleave.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::aggregator::EventAggregator;
use crate::config::AggregatorConfig;
use crate::errors;
use crate::event::Event;
use crate::stats::Stats;

#[derive(Debug)]
pub enum AggregatorCommand {
    AddEvent(Event),
    Tick(Duration),
    Flush,
    Drain(oneshot::Sender<usize>),
    GetStats(oneshot::Sender<Stats>),
    QueueLen(oneshot::Sender<usize>),
    Reinit(AggregatorConfig, oneshot::Sender<Result<(), errors::Creation>>),
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct AggregatorHandle {
    tx: mpsc::UnboundedSender<AggregatorCommand>,
}

impl AggregatorHandle {
    /// Queues an event without waiting for the service.
    ///
    /// Malformed events are rejected here, before they reach the service.
    pub fn add_event(&self, event: Event) -> Result<(), errors::Insert> {
        event.validate()?;
        self.tx
            .send(AggregatorCommand::AddEvent(event))
            .map_err(|_| errors::Insert::ServiceClosed)
    }

    /// Advances the window clock by `elapsed`.
    pub fn tick(
        &self,
        elapsed: Duration,
    ) -> Result<(), mpsc::error::SendError<AggregatorCommand>> {
        self.tx.send(AggregatorCommand::Tick(elapsed))
    }

    /// Requests a single flush.
    pub fn flush(&self) -> Result<(), mpsc::error::SendError<AggregatorCommand>> {
        self.tx.send(AggregatorCommand::Flush)
    }

    /// Flushes until the queue is empty and returns the number of batches emitted.
    pub async fn drain(&self) -> Result<usize, String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(AggregatorCommand::Drain(response_tx))
            .map_err(|e| format!("Failed to send drain command: {e}"))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive drain response: {e}"))
    }

    pub async fn get_stats(&self) -> Result<Stats, String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(AggregatorCommand::GetStats(response_tx))
            .map_err(|e| format!("Failed to send get_stats command: {e}"))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive get_stats response: {e}"))
    }

    pub async fn queue_len(&self) -> Result<usize, String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(AggregatorCommand::QueueLen(response_tx))
            .map_err(|e| format!("Failed to send queue_len command: {e}"))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive queue_len response: {e}"))
    }

    /// Drops queued events and counters and applies `config`.
    pub async fn reinit(&self, config: AggregatorConfig) -> Result<(), String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(AggregatorCommand::Reinit(config, response_tx))
            .map_err(|e| format!("Failed to send reinit command: {e}"))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive reinit response: {e}"))?
            .map_err(|e| e.to_string())
    }

    pub fn shutdown(&self) -> Result<(), mpsc::error::SendError<AggregatorCommand>> {
        self.tx.send(AggregatorCommand::Shutdown)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct AggregatorService {
    aggregator: EventAggregator,
    rx: mpsc::UnboundedReceiver<AggregatorCommand>,
}

impl AggregatorService {
    #[must_use]
    pub fn new(aggregator: EventAggregator) -> (Self, AggregatorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self { aggregator, rx };
        let handle = AggregatorHandle { tx };
        (service, handle)
    }

    /// Processes commands until `Shutdown` arrives or every handle is dropped.
    ///
    /// Returns the aggregator so callers can inspect or reuse it after shutdown.
    pub async fn run(mut self) -> EventAggregator {
        debug!("Event aggregator service started");

        while let Some(command) = self.rx.recv().await {
            match command {
                AggregatorCommand::AddEvent(event) => {
                    if let Err(e) = self.aggregator.add_event(event) {
                        warn!("Rejected event: {e}");
                    }
                }
                AggregatorCommand::Tick(elapsed) => self.aggregator.update(elapsed),
                AggregatorCommand::Flush => {
                    self.aggregator.flush();
                }
                AggregatorCommand::Drain(response_tx) => {
                    let batches = self.aggregator.drain();
                    if response_tx.send(batches).is_err() {
                        error!("Failed to send drain response - receiver dropped");
                    }
                }
                AggregatorCommand::GetStats(response_tx) => {
                    if response_tx.send(self.aggregator.stats()).is_err() {
                        error!("Failed to send get_stats response - receiver dropped");
                    }
                }
                AggregatorCommand::QueueLen(response_tx) => {
                    if response_tx.send(self.aggregator.queue_len()).is_err() {
                        error!("Failed to send queue_len response - receiver dropped");
                    }
                }
                AggregatorCommand::Reinit(config, response_tx) => {
                    let result = self.aggregator.reinit(config);
                    if response_tx.send(result).is_err() {
                        error!("Failed to send reinit response - receiver dropped");
                    }
                }
                AggregatorCommand::Shutdown => {
                    debug!("Event aggregator service shutting down");
                    break;
                }
            }
        }

        debug!("Event aggregator service stopped");
        self.aggregator
    }
}

/// Spawns a task that drives the window clock of the service every `period`.
///
/// Each tick reports the real time elapsed since the previous one, so a delayed tick still
/// advances the window by the full amount. The task stops when `cancel_token` fires or the
/// service is gone.
pub fn spawn_window_ticker(
    handle: AggregatorHandle,
    period: Duration,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // discard first tick, which is instantaneous
        ticker.tick().await;
        let mut last = Instant::now();

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    debug!("Window ticker cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    let now = Instant::now();
                    if handle.tick(now.duration_since(last)).is_err() {
                        debug!("Aggregator service gone, stopping window ticker");
                        break;
                    }
                    last = now;
                }
            }
        }
    })
}
