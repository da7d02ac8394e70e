// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded FIFO buffer of pending events.
//!
//! # Eviction Behavior
//!
//! When a push takes the queue past its capacity, entries are evicted from the front (oldest
//! first) until the length equals the capacity again. Under sustained overload the most recent
//! events are kept at the cost of historical completeness.

use std::collections::VecDeque;

use crate::event::Event;

#[derive(Debug, Clone)]
pub struct BoundedQueue {
    events: VecDeque<Event>,
    capacity: usize,
}

impl BoundedQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        BoundedQueue {
            events: VecDeque::with_capacity(capacity.saturating_add(1)),
            capacity,
        }
    }

    /// Appends `event` to the tail and returns how many events were evicted to make room.
    pub fn push(&mut self, event: Event) -> usize {
        self.events.push_back(event);
        let mut evicted = 0;
        while self.events.len() > self.capacity {
            self.events.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Removes the events at `indices` and returns them in queue order.
    ///
    /// `indices` must be strictly increasing; out of range positions are ignored.
    pub fn take_indices(&mut self, indices: &[usize]) -> Vec<Event> {
        if indices.is_empty() {
            return Vec::new();
        }

        let mut taken = Vec::with_capacity(indices.len());
        let mut kept = VecDeque::with_capacity(self.events.len().saturating_sub(indices.len()));
        let mut wanted = indices.iter().peekable();

        for (index, event) in self.events.drain(..).enumerate() {
            if wanted.peek() == Some(&&index) {
                wanted.next();
                taken.push(event);
            } else {
                kept.push_back(event);
            }
        }

        self.events = kept;
        taken
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
