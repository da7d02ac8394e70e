// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Transport boundary of the batcher.
//!
//! The aggregator hands every emitted batch to a [`TransportSink`]. Sinks are fire-and-forget
//! from the aggregator's point of view: the returned flag is only used for logging and the
//! `send_failures` counter, and a failed batch is never retried here.
//!
//! # Offloading blocking transports
//!
//! ```text
//!   flush ──try_send──> ChannelSink ──bounded mpsc──> SinkWorker ──spawn_blocking──> inner sink
//! ```
//!
//! [`ChannelSink`] never blocks the flush path. When the channel is full the delivery is
//! rejected and reported as failed.

use std::io::Write;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::event::Event;

/// Destination for emitted events.
pub trait TransportSink: Send + Sync {
    /// Delivers a single event. Used for batches holding exactly one event.
    fn send_event(&self, event: Event) -> bool;

    /// Delivers an ordered batch of events.
    fn send_batch(&self, events: Vec<Event>) -> bool;
}

/// One unit of work handed to a sink.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(Event),
    Batch(Vec<Event>),
}

impl Delivery {
    /// Wraps an emitted batch, unwrapping it to a single event when it holds exactly one.
    #[must_use]
    pub fn from_batch(mut events: Vec<Event>) -> Self {
        if events.len() == 1 {
            if let Some(event) = events.pop() {
                return Delivery::Event(event);
            }
        }
        Delivery::Batch(events)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Delivery::Event(_) => 1,
            Delivery::Batch(events) => events.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn deliver(self, sink: &dyn TransportSink) -> bool {
        match self {
            Delivery::Event(event) => sink.send_event(event),
            Delivery::Batch(events) => sink.send_batch(events),
        }
    }
}

/// Sink that accepts and discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl TransportSink for NullSink {
    fn send_event(&self, _event: Event) -> bool {
        true
    }

    fn send_batch(&self, _events: Vec<Event>) -> bool {
        true
    }
}

/// Hands every delivery to each of several sinks in turn.
///
/// Each sink gets its own copy. A sink refusing a delivery does not stop the others; the
/// delivery counts as accepted only if every sink accepted it.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn TransportSink>>,
}

impl FanoutSink {
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn TransportSink>>) -> Self {
        FanoutSink { sinks }
    }

    /// Adds another destination.
    pub fn add_sink(&mut self, sink: Arc<dyn TransportSink>) {
        self.sinks.push(sink);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    fn fan_out(&self, delivery: &Delivery) -> bool {
        let mut accepted = true;
        for (index, sink) in self.sinks.iter().enumerate() {
            if !delivery.clone().deliver(sink.as_ref()) {
                warn!(
                    "Fan-out destination {index} rejected delivery of {} events",
                    delivery.len()
                );
                accepted = false;
            }
        }
        accepted
    }
}

impl TransportSink for FanoutSink {
    fn send_event(&self, event: Event) -> bool {
        self.fan_out(&Delivery::Event(event))
    }

    fn send_batch(&self, events: Vec<Event>) -> bool {
        self.fan_out(&Delivery::Batch(events))
    }
}

/// Writes each delivery as one line of JSON: an object for a single event, an array for a batch.
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesSink {
            writer: Mutex::new(writer),
        }
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> Option<W> {
        self.writer.into_inner().ok()
    }

    fn write_line<T: Serialize>(&self, value: &T) -> bool {
        let Ok(mut writer) = self.writer.lock() else {
            error!("JSON lines sink writer lock poisoned");
            return false;
        };
        let written = serde_json::to_writer(&mut *writer, value)
            .map_err(std::io::Error::from)
            .and_then(|()| writer.write_all(b"\n"))
            .and_then(|()| writer.flush());
        match written {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to write delivery: {e}");
                false
            }
        }
    }
}

impl<W: Write + Send> TransportSink for JsonLinesSink<W> {
    fn send_event(&self, event: Event) -> bool {
        self.write_line(&event)
    }

    fn send_batch(&self, events: Vec<Event>) -> bool {
        self.write_line(&events)
    }
}

/// Non-blocking front of a bounded delivery queue drained by a [`SinkWorker`].
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Delivery>,
}

impl ChannelSink {
    /// Creates the sink and the worker that forwards its deliveries to `inner`.
    ///
    /// Spawn [`SinkWorker::run`] on a tokio runtime; it stops once every `ChannelSink` clone is
    /// dropped and the queue is drained, or when `cancel_token` fires.
    #[must_use]
    pub fn new(
        inner: Arc<dyn TransportSink>,
        capacity: usize,
        cancel_token: CancellationToken,
    ) -> (Self, SinkWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = SinkWorker {
            rx,
            inner,
            cancel_token,
        };
        (ChannelSink { tx }, worker)
    }

    fn enqueue(&self, delivery: Delivery) -> bool {
        match self.tx.try_send(delivery) {
            Ok(()) => true,
            Err(TrySendError::Full(delivery)) => {
                warn!(
                    "Sink queue full, dropping delivery of {} events",
                    delivery.len()
                );
                false
            }
            Err(TrySendError::Closed(delivery)) => {
                error!(
                    "Sink worker stopped, dropping delivery of {} events",
                    delivery.len()
                );
                false
            }
        }
    }
}

impl TransportSink for ChannelSink {
    fn send_event(&self, event: Event) -> bool {
        self.enqueue(Delivery::Event(event))
    }

    fn send_batch(&self, events: Vec<Event>) -> bool {
        self.enqueue(Delivery::Batch(events))
    }
}

/// Drains a [`ChannelSink`] into a possibly blocking inner sink.
pub struct SinkWorker {
    rx: mpsc::Receiver<Delivery>,
    inner: Arc<dyn TransportSink>,
    cancel_token: CancellationToken,
}

impl SinkWorker {
    pub async fn run(mut self) {
        debug!("Sink worker started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!("Sink worker cancelled");
                    break;
                }
                delivery = self.rx.recv() => {
                    let Some(delivery) = delivery else {
                        break;
                    };
                    let count = delivery.len();
                    let inner = Arc::clone(&self.inner);
                    match tokio::task::spawn_blocking(move || delivery.deliver(inner.as_ref())).await {
                        Ok(true) => debug!("Delivered {count} events"),
                        Ok(false) => warn!("Sink rejected delivery of {count} events"),
                        Err(e) => error!("Sink delivery task failed: {e}"),
                    }
                }
            }
        }

        debug!("Sink worker stopped");
    }
}
