// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Collapsing of redundant state snapshots.
//!
//! A producer may report the same logical instant many times while a scoring resolution is in
//! progress. A [`CoalescePolicy`] maps each event to an optional [`CoalesceKey`]; queued events
//! that share a key collapse to the most recently queued one, which keeps the position it was
//! queued at. Events without a key always pass through untouched.

use std::collections::HashMap;

use crate::constants::{DEFAULT_SNAPSHOT_MARKER, DEFAULT_SNAPSHOT_TYPE};
use crate::event::Event;

/// Identity of a logical instant: the event type plus a discrete progress marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoalesceKey {
    pub event_type: String,
    pub marker: i64,
}

impl CoalesceKey {
    #[must_use]
    pub fn new(event_type: impl Into<String>, marker: i64) -> Self {
        CoalesceKey {
            event_type: event_type.into(),
            marker,
        }
    }
}

/// Decides which events supersede each other.
pub trait CoalescePolicy: Send + Sync {
    /// `None` means the event is never coalesced.
    fn coalesce_key(&self, event: &Event) -> Option<CoalesceKey>;
}

impl<F> CoalescePolicy for F
where
    F: Fn(&Event) -> Option<CoalesceKey> + Send + Sync,
{
    fn coalesce_key(&self, event: &Event) -> Option<CoalesceKey> {
        self(event)
    }
}

/// Policy that keeps every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCoalescing;

impl CoalescePolicy for NoCoalescing {
    fn coalesce_key(&self, _event: &Event) -> Option<CoalesceKey> {
        None
    }
}

/// Coalesces snapshot events of the configured types by an integer marker in their payload.
///
/// Snapshots missing the marker, or carrying a non-integer marker, are never coalesced.
#[derive(Debug, Clone)]
pub struct SnapshotPolicy {
    snapshot_types: Vec<String>,
    marker_field: String,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        SnapshotPolicy::new(vec![DEFAULT_SNAPSHOT_TYPE.to_string()], DEFAULT_SNAPSHOT_MARKER)
    }
}

impl SnapshotPolicy {
    #[must_use]
    pub fn new(snapshot_types: Vec<String>, marker_field: impl Into<String>) -> Self {
        SnapshotPolicy {
            snapshot_types,
            marker_field: marker_field.into(),
        }
    }
}

impl CoalescePolicy for SnapshotPolicy {
    fn coalesce_key(&self, event: &Event) -> Option<CoalesceKey> {
        if !self.snapshot_types.iter().any(|t| *t == event.event_type) {
            return None;
        }
        let marker = event.payload.get(&self.marker_field)?.as_i64()?;
        Some(CoalesceKey::new(event.event_type.clone(), marker))
    }
}

/// Returns the indices of the events that survive coalescing, in queue order.
///
/// For each key only the last occurrence survives; unkeyed events always survive.
pub fn coalesce<'a, I>(events: I, policy: &dyn CoalescePolicy) -> Vec<usize>
where
    I: IntoIterator<Item = &'a Event>,
{
    let keys: Vec<Option<CoalesceKey>> = events
        .into_iter()
        .map(|event| policy.coalesce_key(event))
        .collect();
    survivors(&keys)
}

/// Same as [`coalesce`] for keys that were already computed, one per queued event.
#[must_use]
pub fn survivors(keys: &[Option<CoalesceKey>]) -> Vec<usize> {
    let mut last_seen: HashMap<&CoalesceKey, usize> = HashMap::new();
    for (index, key) in keys.iter().enumerate() {
        if let Some(key) = key {
            last_seen.insert(key, index);
        }
    }

    keys.iter()
        .enumerate()
        .filter(|(index, key)| match key {
            Some(key) => last_seen.get(key) == Some(index),
            None => true,
        })
        .map(|(index, _)| index)
        .collect()
}

/// Returns a coalesced copy of `events`.
#[must_use]
pub fn aggregate(events: &[Event], policy: &dyn CoalescePolicy) -> Vec<Event> {
    coalesce(events, policy)
        .into_iter()
        .map(|index| events[index].clone())
        .collect()
}
