// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The windowed event aggregator.
//!
//! # Flush Triggers
//!
//! Queued events are emitted on one of three triggers:
//! 1. **Window**: [`EventAggregator::update`] accumulates elapsed time and flushes once the
//!    batch window is reached
//! 2. **Priority**: a high-priority event flushes synchronously right after it is queued
//! 3. **Explicit**: callers invoke [`EventAggregator::flush`] or [`EventAggregator::drain`]
//!
//! The timer is driven by the caller, never by an internal thread, so the aggregator needs no
//! locking. [`crate::aggregator_service`] provides the shared, task-driven variant.
//!
//! # State
//!
//! An aggregator is `Idle` while its queue is empty and `Accumulating` otherwise. Flushing is
//! transient and happens entirely inside a `flush` call, after which the aggregator returns to
//! `Idle` or, if a backlog larger than one batch remains, stays `Accumulating`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::coalesce::{self, CoalesceKey, CoalescePolicy};
use crate::config::AggregatorConfig;
use crate::errors;
use crate::event::{self, Event};
use crate::queue::BoundedQueue;
use crate::sink::{Delivery, TransportSink};
use crate::stats::Stats;

/// Observable lifecycle state of an aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    /// Nothing is queued.
    Idle,
    /// Events are queued and waiting for the window or a priority trigger.
    Accumulating,
}

pub struct EventAggregator {
    config: AggregatorConfig,
    queue: BoundedQueue,
    policy: Arc<dyn CoalescePolicy>,
    sink: Arc<dyn TransportSink>,
    clock: fn() -> i64,
    since_flush: Duration,
    stats: Stats,
}

impl std::fmt::Debug for EventAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventAggregator")
            .field("config", &self.config)
            .field("queue_len", &self.queue.len())
            .field("since_flush", &self.since_flush)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl EventAggregator {
    /// Creates an aggregator emitting to `sink` and collapsing events according to `policy`.
    pub fn new(
        config: AggregatorConfig,
        sink: Arc<dyn TransportSink>,
        policy: Arc<dyn CoalescePolicy>,
    ) -> Result<Self, errors::Creation> {
        config.validate()?;
        Ok(EventAggregator {
            config,
            queue: BoundedQueue::new(config.overflow_capacity),
            policy,
            sink,
            clock: event::now_millis,
            since_flush: Duration::ZERO,
            stats: Stats::default(),
        })
    }

    /// Replaces the wall clock used to stamp events that arrive without a timestamp.
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    /// Queues an event.
    ///
    /// The event is stamped with the current time if it has none. If the queue is already at
    /// capacity the oldest events are evicted and counted as dropped; this is never reported to
    /// the caller. A high-priority event triggers one immediate flush. That batch includes the
    /// event only when the backlog fits in `max_batch_size`; otherwise it stays queued behind the
    /// older events.
    pub fn add_event(&mut self, mut event: Event) -> Result<(), errors::Insert> {
        event.validate()?;
        event.stamp((self.clock)());

        let high_priority = event.is_high_priority();
        self.stats.events_queued += 1;

        let evicted = self.queue.push(event);
        if evicted > 0 {
            self.stats.events_dropped += evicted as u64;
            warn!(
                "Event queue full ({} items), dropping {} oldest events",
                self.config.overflow_capacity, evicted
            );
        }

        if high_priority {
            debug!("High priority event queued, flushing immediately");
            self.flush();
        }
        Ok(())
    }

    /// Advances the window clock by `elapsed` and flushes once the batch window is reached.
    pub fn update(&mut self, elapsed: Duration) {
        self.since_flush = self.since_flush.saturating_add(elapsed);
        if self.since_flush >= self.config.batch_window {
            self.flush();
            self.since_flush = Duration::ZERO;
        }
    }

    /// Emits at most one batch and returns the number of events in it.
    ///
    /// The whole queue is coalesced, and the oldest `max_batch_size` survivors are removed and
    /// handed to the sink together with the older entries they superseded. Entries that were
    /// not emitted stay queued untouched, duplicates included, until the next flush. The batch
    /// counts as sent whatever the sink answers. Flushing an empty queue does nothing.
    pub fn flush(&mut self) -> usize {
        if self.queue.is_empty() {
            return 0;
        }

        let keys: Vec<Option<CoalesceKey>> = self
            .queue
            .iter()
            .map(|event| self.policy.coalesce_key(event))
            .collect();
        let survivors = coalesce::survivors(&keys);
        let emitted = &survivors[..survivors.len().min(self.config.max_batch_size)];

        // a surviving key is the last occurrence, so every other entry with it is older
        let emitted_keys: HashSet<&CoalesceKey> = emitted
            .iter()
            .filter_map(|&index| keys[index].as_ref())
            .collect();
        let removed: Vec<usize> = keys
            .iter()
            .enumerate()
            .filter(|(index, key)| match key {
                Some(key) => emitted_keys.contains(key),
                None => emitted.binary_search(index).is_ok(),
            })
            .map(|(index, _)| index)
            .collect();

        let taken = self.queue.take_indices(&removed);
        let collapsed = taken.len() - emitted.len();
        let batch: Vec<Event> = removed
            .iter()
            .zip(taken)
            .filter(|(index, _)| emitted.binary_search(*index).is_ok())
            .map(|(_, event)| event)
            .collect();

        let count = batch.len();
        let delivered = Delivery::from_batch(batch).deliver(self.sink.as_ref());
        if !delivered {
            warn!("Sink failed to accept batch of {count} events, batch dropped");
        }
        self.stats.record_batch(count, delivered);
        self.since_flush = Duration::ZERO;

        debug!(
            "Flushed {count} events ({collapsed} coalesced), {} still queued",
            self.queue.len()
        );
        count
    }

    /// Flushes until the queue is empty and returns the number of batches emitted.
    pub fn drain(&mut self) -> usize {
        let mut batches = 0;
        while !self.queue.is_empty() {
            self.flush();
            batches += 1;
        }
        batches
    }

    /// Snapshot of the counters. Has no side effects.
    #[must_use]
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Drops all queued events and counters and applies a new configuration.
    pub fn reinit(&mut self, config: AggregatorConfig) -> Result<(), errors::Creation> {
        config.validate()?;
        self.config = config;
        self.queue = BoundedQueue::new(config.overflow_capacity);
        self.since_flush = Duration::ZERO;
        self.stats = Stats::default();
        debug!(
            "Aggregator reinitialized: window={:?}, max_batch={}, capacity={}",
            config.batch_window, config.max_batch_size, config.overflow_capacity
        );
        Ok(())
    }

    #[must_use]
    pub fn state(&self) -> AggregatorState {
        if self.queue.is_empty() {
            AggregatorState::Idle
        } else {
            AggregatorState::Accumulating
        }
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Time accumulated towards the next window flush.
    #[must_use]
    pub fn since_flush(&self) -> Duration {
        self.since_flush
    }

    /// Queued events in queue order.
    pub fn pending(&self) -> impl Iterator<Item = &Event> {
        self.queue.iter()
    }

    /// Copy of the queued events ordered by timestamp.
    #[must_use]
    pub fn pending_by_timestamp(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self.queue.iter().cloned().collect();
        event::sort_by_timestamp(&mut events);
        events
    }
}
