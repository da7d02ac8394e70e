// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock transport sinks for testing

use event_batcher::event::Event;
use event_batcher::sink::{Delivery, TransportSink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Mock sink that records every delivery and answers with a configurable outcome
#[derive(Default)]
pub struct RecordingSink {
    deliveries: Mutex<Vec<Delivery>>,
    failing: AtomicBool,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn failing() -> Self {
        let sink = RecordingSink::default();
        sink.failing.store(true, Ordering::SeqCst);
        sink
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().expect("lock poisoned").clone()
    }

    /// Every delivered event, flattened in delivery order
    pub fn events(&self) -> Vec<Event> {
        self.deliveries()
            .into_iter()
            .flat_map(|delivery| match delivery {
                Delivery::Event(event) => vec![event],
                Delivery::Batch(events) => events,
            })
            .collect()
    }

    fn record(&self, delivery: Delivery) -> bool {
        self.deliveries.lock().expect("lock poisoned").push(delivery);
        !self.failing.load(Ordering::SeqCst)
    }
}

impl TransportSink for RecordingSink {
    fn send_event(&self, event: Event) -> bool {
        self.record(Delivery::Event(event))
    }

    fn send_batch(&self, events: Vec<Event>) -> bool {
        self.record(Delivery::Batch(events))
    }
}

/// Mock sink that blocks the calling thread before accepting, like a synchronous network client
#[allow(dead_code)]
pub struct SlowSink {
    pub delay: Duration,
    pub inner: RecordingSink,
}

impl TransportSink for SlowSink {
    fn send_event(&self, event: Event) -> bool {
        std::thread::sleep(self.delay);
        self.inner.send_event(event)
    }

    fn send_batch(&self, events: Vec<Event>) -> bool {
        std::thread::sleep(self.delay);
        self.inner.send_batch(events)
    }
}
