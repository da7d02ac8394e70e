// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Time-windowed, priority-aware event aggregation and batching.
//!
//! A high-frequency producer hands individual [`event::Event`]s to an
//! [`aggregator::EventAggregator`], which buffers them in a bounded queue, collapses redundant
//! state snapshots, and emits batches to a [`sink::TransportSink`] once the batch window elapses
//! or immediately when a high-priority event arrives.
//!
//! ```text
//!   producer ──add_event──> EventAggregator ──flush──> TransportSink
//!                              ^     │
//!   host loop ──update(dt)─────┘     └──get_stats──> Stats
//! ```
//!
//! The aggregator itself is single-owner and never spawns work. [`aggregator_service`] wraps it
//! in an actor so several tasks can share it, and [`sink::ChannelSink`] moves blocking
//! transports off the flush path.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod aggregator;
pub mod aggregator_service;
pub mod coalesce;
pub mod config;
pub mod constants;
pub mod errors;
pub mod event;
pub mod logger;
pub mod queue;
pub mod sink;
pub mod stats;
