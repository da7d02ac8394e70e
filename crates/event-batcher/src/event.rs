// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The event value object handed from producers to the aggregator.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::errors;

/// Structured, possibly nested payload attached to an event.
pub type Payload = Map<String, Value>;

/// Delivery urgency of an event.
///
/// High-priority events bypass the batch window and are flushed as soon as they are queued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

/// A single occurrence reported by the producer.
///
/// The wire shape is JSON with the kind of event under `type`:
///
/// ```json
/// {"type": "HAND_SCORED", "source": "scoring", "payload": {"chips": 120}, "priority": "high"}
/// ```
///
/// `timestamp` is unix milliseconds. It is optional on input and assigned by the aggregator when
/// the event is queued; once queued it is never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub priority: Priority,
}

impl Event {
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Event {
            event_type: event_type.into(),
            source: String::new(),
            payload: Payload::new(),
            timestamp: None,
            priority: Priority::Normal,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Sets a single payload field, replacing any previous value under `key`.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn is_high_priority(&self) -> bool {
        self.priority == Priority::High
    }

    /// Rejects events that carry no type. Everything else is accepted as-is.
    pub fn validate(&self) -> Result<(), errors::Insert> {
        if self.event_type.trim().is_empty() {
            return Err(errors::Insert::MissingType);
        }
        Ok(())
    }

    /// Timestamp used for ordering. Unstamped events sort first.
    #[must_use]
    pub fn sort_timestamp(&self) -> i64 {
        self.timestamp.unwrap_or(i64::MIN)
    }

    pub(crate) fn stamp(&mut self, now: i64) {
        if self.timestamp.is_none() {
            self.timestamp = Some(now);
        }
    }
}

/// Sorts events by ascending timestamp. Events sharing a timestamp keep their relative order.
pub fn sort_by_timestamp(events: &mut [Event]) {
    events.sort_by_key(Event::sort_timestamp);
}

/// Current wall clock as unix milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
