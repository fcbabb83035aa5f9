//! Poll cycle behaviour: resume point, batch delivery and idempotency.

mod common;

use beacon_listener::{DeliveryOutcome, FaultOrigin, ListenerError, ListenerSettings, Severity};
use common::{sale, FlakyStore, Harness};
use beacon_store::EventStore;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[tokio::test]
async fn first_poll_starts_from_block_zero() {
    let h = Harness::new(ListenerSettings::default());

    let report = h.listener.poll_once().await.expect("poll should succeed");

    assert_eq!(report.after_block, 0);
    assert_eq!(report.fetched, 0);
    assert_eq!(h.source.calls(), vec![0]);
    assert!(h.rows().is_empty());
}

#[tokio::test]
async fn resume_point_is_latest_recorded_block() {
    let h = Harness::new(ListenerSettings::default());
    for (id, block) in [("a", 5), ("b", 6), ("c", 7)] {
        h.source.push(sale(id, block));
    }

    let first = h.listener.poll_once().await.expect("first poll");
    assert_eq!(first.after_block, 0);
    assert_eq!(first.delivered, 3);

    let second = h.listener.poll_once().await.expect("second poll");
    assert_eq!(second.after_block, 7);
    assert_eq!(second.fetched, 0, "nothing above block 7 yet");

    assert_eq!(h.source.calls(), vec![0, 7]);
    assert_eq!(h.handler.calls(), vec!["a", "b", "c"]);

    h.source.push(sale("d", 9));
    let third = h.listener.poll_once().await.expect("third poll");
    assert_eq!(third.after_block, 7);
    assert_eq!(third.delivered, 1);
    assert_eq!(h.source.calls(), vec![0, 7, 7]);

    h.listener.poll_once().await.expect("fourth poll");
    assert_eq!(h.source.calls(), vec![0, 7, 7, 9]);
}

#[tokio::test]
async fn failed_first_attempts_still_advance_the_resume_point() {
    let h = Harness::new(ListenerSettings::default());
    h.source.push(sale("a", 10));
    h.source.push(sale("b", 12));
    h.handler.fail_on("b");

    h.listener.poll_once().await.expect("poll");
    let next = h.listener.poll_once().await.expect("poll");

    assert_eq!(next.after_block, 12);
    assert_eq!(h.handler.calls(), vec!["a", "b"], "failed event is not refetched");
}

#[tokio::test]
async fn handler_fault_does_not_stop_the_batch() {
    let h = Harness::new(ListenerSettings::default());
    h.source.push(sale("one", 1));
    h.source.push(sale("two", 2));
    h.source.push(sale("three", 3));
    h.handler.fail_on("one");

    let report = h.listener.poll_once().await.expect("poll");

    assert_eq!(h.handler.calls(), vec!["one", "two", "three"]);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, 1);

    let rows = h.rows();
    assert_eq!(rows.len(), 3, "exactly one write per event");
    let outcomes: Vec<(&str, bool, u32)> = rows
        .iter()
        .map(|r| (r.event_id.as_str(), r.success, r.tries))
        .collect();
    assert_eq!(
        outcomes,
        vec![("one", false, 1), ("two", true, 1), ("three", true, 1)]
    );
}

#[tokio::test]
async fn handler_panic_is_recorded_as_failure() {
    let h = Harness::new(ListenerSettings::default());
    h.source.push(sale("boom", 1));
    h.source.push(sale("fine", 2));
    h.handler.panic_on("boom");

    let report = h.listener.poll_once().await.expect("poll survives panic");

    assert_eq!(report.failed, 1);
    assert_eq!(report.delivered, 1);
    let rows = h.rows();
    assert_eq!(rows.len(), 2);
    assert!(!rows[0].success);
    assert!(rows[1].success);

    let messages = h.reporter.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].0.contains("panicked"), "got {:?}", messages[0].0);
}

#[tokio::test]
async fn handler_fault_is_reported_with_attempt_context() {
    let h = Harness::new(ListenerSettings::default());
    h.source.push(sale("x", 4));
    h.handler.fail_on("x");

    h.listener.poll_once().await.expect("poll");

    let messages = h.reporter.messages();
    assert_eq!(messages.len(), 1);
    let (text, ctx) = &messages[0];
    assert!(text.contains("api rejected x"));
    assert_eq!(ctx.origin, FaultOrigin::Handler);
    assert_eq!(ctx.severity, Severity::Error);
    assert_eq!(ctx.tries, Some(1));
    assert_eq!(ctx.listener, "sale-listener");
    assert_eq!(ctx.identity, "sale-listener test");
    let event = ctx.event.as_ref().expect("event attached");
    assert_eq!(event["id"], "x");
    assert_eq!(event["buyer"], "buyer-x");
    assert!(h.reporter.faults().is_empty());
}

#[tokio::test]
async fn already_handled_event_is_skipped_without_write() {
    let h = Harness::new(ListenerSettings::default());
    h.source.push(sale("dup", 3));
    h.source.ignore_bound();

    let first = h.listener.poll_once().await.expect("first poll");
    assert_eq!(first.delivered, 1);

    let second = h.listener.poll_once().await.expect("second poll");
    assert_eq!(second.fetched, 1);
    assert_eq!(second.skipped, 1);
    assert_eq!(second.delivered, 0);

    assert_eq!(h.handler.calls(), vec!["dup"], "handler runs once");
    assert_eq!(h.rows().len(), 1, "no second row");
}

#[tokio::test]
async fn deliver_reports_outcomes() {
    let h = Harness::new(ListenerSettings::default());
    h.handler.fail_on("bad");

    let good = h
        .listener
        .deliver(sale("good", 1), beacon_listener::Attempt::First)
        .await
        .expect("deliver");
    let bad = h
        .listener
        .deliver(sale("bad", 2), beacon_listener::Attempt::First)
        .await
        .expect("deliver");
    let again = h
        .listener
        .deliver(sale("good", 1), beacon_listener::Attempt::First)
        .await
        .expect("deliver");

    assert_eq!(good, DeliveryOutcome::Delivered);
    assert_eq!(bad, DeliveryOutcome::Failed);
    assert_eq!(again, DeliveryOutcome::Skipped);
}

#[tokio::test]
async fn fetch_failure_escapes_the_cycle() {
    let h = Harness::new(ListenerSettings::default());
    h.source.push(sale("a", 1));
    h.source.fail_next(1);

    let err = h.listener.poll_once().await.expect_err("fetch should fail");
    assert!(matches!(err, ListenerError::Fetch(_)));
    assert!(err.to_string().contains("indexer unavailable"));
    assert!(h.rows().is_empty());

    let report = h.listener.poll_once().await.expect("next poll recovers");
    assert_eq!(report.delivered, 1);
}

#[tokio::test]
async fn store_fault_on_one_event_keeps_the_batch_going() {
    let h = Harness::build(ListenerSettings::default(), |sqlite| {
        let flaky = FlakyStore::new(sqlite);
        flaky.insert_failures.store(1, Ordering::SeqCst);
        Arc::new(flaky) as Arc<dyn EventStore>
    });
    h.source.push(sale("lost", 1));
    h.source.push(sale("kept", 2));

    let report = h.listener.poll_once().await.expect("poll");

    assert_eq!(report.errored, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(h.handler.calls(), vec!["lost", "kept"]);
    let rows = h.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].event_id, "kept");

    let faults = h.reporter.faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].1.origin, FaultOrigin::Delivery);
}

#[tokio::test]
async fn resume_point_read_failure_escapes_the_cycle() {
    let h = Harness::build(ListenerSettings::default(), |sqlite| {
        let flaky = FlakyStore::new(sqlite);
        flaky.latest_failures.store(1, Ordering::SeqCst);
        Arc::new(flaky) as Arc<dyn EventStore>
    });

    let err = h.listener.poll_once().await.expect_err("store fault");
    assert!(matches!(err, ListenerError::Store(_)));
    assert!(h.source.calls().is_empty(), "fetch never ran");
}
