// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::mocks::{RecordingSink, SlowSink};
use event_batcher::{
    aggregator::EventAggregator,
    aggregator_service::{spawn_window_ticker, AggregatorService},
    coalesce::{aggregate, SnapshotPolicy},
    config::AggregatorConfig,
    event::{Event, Priority},
    sink::{ChannelSink, JsonLinesSink, TransportSink},
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

fn aggregator(config: AggregatorConfig, sink: Arc<dyn TransportSink>) -> EventAggregator {
    EventAggregator::new(config, sink, Arc::new(SnapshotPolicy::default()))
        .expect("failed to create aggregator")
}

fn snapshot(frame: i64, chips: i64) -> Event {
    Event::new("GAME_STATE")
        .with_source("scoring")
        .with_field("frame", frame)
        .with_field("chips", chips)
}

#[test]
fn scoring_resolution_is_batched_and_coalesced() {
    let sink = Arc::new(RecordingSink::default());
    let mut aggregator = aggregator(AggregatorConfig::new(100, 50), sink.clone());

    // one hand: a burst of snapshots across two frames with scoring events in between
    aggregator.add_event(Event::new("HAND_PLAYED").with_source("actions")).unwrap();
    for chips in [1100, 1200, 1300, 1400, 1500] {
        aggregator.add_event(snapshot(100, chips)).unwrap();
    }
    aggregator
        .add_event(Event::new("CARD_SCORED").with_field("card", json!({"rank": "K", "suit": "H"})))
        .unwrap();
    for chips in [2100, 2200, 2300] {
        aggregator.add_event(snapshot(101, chips)).unwrap();
    }

    for _ in 0..6 {
        aggregator.update(Duration::from_millis(16));
    }
    assert_eq!(aggregator.stats().batches_sent, 0);
    aggregator.update(Duration::from_millis(16));

    let types: Vec<_> = sink.events().into_iter().map(|e| e.event_type).collect();
    assert_eq!(types, vec!["HAND_PLAYED", "GAME_STATE", "CARD_SCORED", "GAME_STATE"]);

    let events = sink.events();
    assert_eq!(events[1].payload["chips"], 1500);
    assert_eq!(events[3].payload["chips"], 2300);
    assert_eq!(events[2].payload["card"]["rank"], "K");

    let stats = aggregator.stats();
    assert_eq!(stats.events_queued, 10);
    assert_eq!(stats.events_sent, 4);
    assert_eq!(stats.batches_sent, 1);
    assert_eq!(stats.avg_events_per_batch(), 4.0);
}

#[test]
fn aggregate_matches_flush_output() {
    let events: Vec<Event> = (0..4).map(|i| snapshot(7, i)).collect();
    let sink = Arc::new(RecordingSink::default());
    let mut aggregator = aggregator(AggregatorConfig::default(), sink.clone());
    for event in events.clone() {
        aggregator.add_event(event.with_timestamp(1)).unwrap();
    }

    aggregator.flush();

    let expected: Vec<Event> = aggregate(&events, &SnapshotPolicy::default())
        .into_iter()
        .map(|event| event.with_timestamp(1))
        .collect();
    assert_eq!(sink.events(), expected);
}

#[test]
fn burst_overload_keeps_most_recent_events() {
    let sink = Arc::new(RecordingSink::default());
    let mut aggregator = aggregator(AggregatorConfig::default(), sink.clone());

    for i in 0..110 {
        aggregator.add_event(Event::new(format!("EVENT_{i}"))).unwrap();
    }
    assert_eq!(aggregator.queue_len(), 100);
    assert_eq!(aggregator.stats().events_dropped, 10);

    assert_eq!(aggregator.drain(), 2);
    let events = sink.events();
    assert_eq!(events.first().map(|e| e.event_type.as_str()), Some("EVENT_10"));
    assert_eq!(events.last().map(|e| e.event_type.as_str()), Some("EVENT_109"));
}

#[test]
fn sink_outage_loses_batches_but_counts_them() {
    let sink = Arc::new(RecordingSink::failing());
    let mut aggregator = aggregator(AggregatorConfig::default(), sink.clone());

    aggregator.add_event(Event::new("EVENT_1")).unwrap();
    aggregator
        .add_event(Event::new("BLIND_DEFEATED").with_priority(Priority::High))
        .unwrap();
    sink.set_failing(false);
    aggregator.add_event(Event::new("EVENT_2")).unwrap();
    aggregator.flush();

    let stats = aggregator.stats();
    assert_eq!(stats.batches_sent, 2);
    assert_eq!(stats.events_sent, 3);
    assert_eq!(stats.send_failures, 1);
    assert_eq!(sink.deliveries().len(), 2);
}

#[test]
fn json_lines_sink_receives_batches() {
    let sink = Arc::new(JsonLinesSink::new(Vec::new()));
    let mut aggregator = aggregator(AggregatorConfig::default(), sink.clone());

    aggregator.add_event(Event::new("EVENT_1").with_timestamp(10)).unwrap();
    aggregator.add_event(Event::new("EVENT_2").with_timestamp(20)).unwrap();
    aggregator.flush();
    drop(aggregator);

    let sink = Arc::try_unwrap(sink).ok().expect("sink still shared");
    let output = String::from_utf8(sink.into_inner().expect("writer")).expect("utf8");
    let batch: serde_json::Value = serde_json::from_str(output.trim_end()).expect("json line");
    assert_eq!(batch[0]["type"], "EVENT_1");
    assert_eq!(batch[1]["timestamp"], 20);
}

#[tokio::test]
async fn blocking_sink_does_not_stall_producers() {
    let slow = Arc::new(SlowSink {
        delay: Duration::from_millis(50),
        inner: RecordingSink::default(),
    });
    let cancel_token = CancellationToken::new();
    let (channel_sink, worker) = ChannelSink::new(slow.clone(), 16, cancel_token.clone());
    let worker_task = tokio::spawn(worker.run());

    let (service, handle) =
        AggregatorService::new(aggregator(AggregatorConfig::default(), Arc::new(channel_sink)));
    let service_task = tokio::spawn(service.run());

    // three priority flushes would take 150ms if the sink ran on the flush path
    let stats = timeout(Duration::from_millis(120), async {
        for i in 0..3 {
            handle
                .add_event(Event::new(format!("URGENT_{i}")).with_priority(Priority::High))
                .expect("failed to add event");
        }
        handle.get_stats().await.expect("failed to get stats")
    })
    .await
    .expect("producer stalled behind the sink");
    assert_eq!(stats.batches_sent, 3);
    assert_eq!(stats.send_failures, 0);

    handle.shutdown().expect("failed to shut down");
    // dropping the aggregator drops the channel sink, letting the worker drain and stop
    drop(service_task.await.expect("service task failed"));
    timeout(Duration::from_secs(2), worker_task)
        .await
        .expect("worker did not stop")
        .expect("worker task failed");

    assert_eq!(slow.inner.deliveries().len(), 3);
}

#[tokio::test]
async fn ticker_drives_window_flushes() {
    let sink = Arc::new(RecordingSink::default());
    let (service, handle) =
        AggregatorService::new(aggregator(AggregatorConfig::new(30, 50), sink.clone()));
    let service_task = tokio::spawn(service.run());
    let cancel_token = CancellationToken::new();
    let ticker = spawn_window_ticker(handle.clone(), Duration::from_millis(5), cancel_token.clone());

    handle.add_event(Event::new("EVENT_1")).expect("failed to add event");
    handle.add_event(Event::new("EVENT_2")).expect("failed to add event");

    let mut flushed = false;
    for _ in 0..100 {
        if handle.get_stats().await.expect("failed to get stats").batches_sent == 1 {
            flushed = true;
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(flushed, "window flush never happened");
    assert_eq!(sink.events().len(), 2);

    cancel_token.cancel();
    ticker.await.expect("ticker task failed");
    handle.shutdown().expect("failed to shut down");
    service_task.await.expect("service task failed");
}
