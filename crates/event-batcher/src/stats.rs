// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// Counters describing aggregator activity since the last (re)initialization.
///
/// `events_queued` measures admission, not survival: an event counts as queued even if it is
/// later evicted or collapsed by coalescing. Collapsed events are neither sent nor dropped, so
/// `events_sent + events_dropped` may be smaller than `events_queued`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub events_queued: u64,
    pub batches_sent: u64,
    pub events_sent: u64,
    pub events_dropped: u64,
    /// Deliveries the sink reported as failed. Those batches still count as sent.
    pub send_failures: u64,
}

impl Stats {
    #[must_use]
    pub fn avg_events_per_batch(&self) -> f64 {
        if self.batches_sent == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let avg = self.events_sent as f64 / self.batches_sent as f64;
        avg
    }

    pub(crate) fn record_batch(&mut self, events: usize, delivered: bool) {
        self.batches_sent += 1;
        self.events_sent += events as u64;
        if !delivered {
            self.send_failures += 1;
        }
    }
}

impl Serialize for Stats {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Stats", 6)?;
        state.serialize_field("events_queued", &self.events_queued)?;
        state.serialize_field("batches_sent", &self.batches_sent)?;
        state.serialize_field("events_sent", &self.events_sent)?;
        state.serialize_field("events_dropped", &self.events_dropped)?;
        state.serialize_field("send_failures", &self.send_failures)?;
        state.serialize_field("avg_events_per_batch", &self.avg_events_per_batch())?;
        state.end()
    }
}
