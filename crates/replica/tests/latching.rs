//! Latch ordering between concurrent batches

mod common;

use common::{TestRange, put};
use kvrange_replica::Context;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

async fn wait_for(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_disjoint_writes_evaluate_concurrently() {
    let range = TestRange::new();
    let gate_b = range.evaluator.gate("b");
    let gate_c = range.evaluator.gate("c");

    let mut sends = Vec::new();
    for key in ["b", "c"] {
        let replica = range.replica.clone();
        let ba = range.batch(vec![put(key, key)]);
        sends.push(tokio::spawn(async move {
            replica.send(&Context::background(), ba).await
        }));
    }

    // Both are inside the evaluator at once.
    wait_for(|| range.evaluator.in_flight() == 2).await;

    gate_b.add_permits(1);
    gate_c.add_permits(1);
    for send in sends {
        tokio::time::timeout(WAIT, send).await.unwrap().unwrap().unwrap();
    }
    assert_eq!(range.evaluator.max_in_flight(), 2);
}

#[tokio::test]
async fn test_conflicting_writes_evaluate_in_arrival_order() {
    let range = TestRange::new();
    let gate = range.evaluator.gate("b");

    let first = {
        let replica = range.replica.clone();
        let ba = range.batch(vec![put("b", "first")]);
        tokio::spawn(async move { replica.send(&Context::background(), ba).await })
    };
    wait_for(|| range.evaluator.in_flight() == 1).await;

    let second = {
        let replica = range.replica.clone();
        let ba = range.batch(vec![put("b", "second")]);
        tokio::spawn(async move { replica.send(&Context::background(), ba).await })
    };
    wait_for(|| range.latches.outstanding() == 2).await;

    // The second batch waits on latches, not in the evaluator.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(range.evaluator.calls(), 1);

    gate.add_permits(2);
    tokio::time::timeout(WAIT, first).await.unwrap().unwrap().unwrap();
    tokio::time::timeout(WAIT, second).await.unwrap().unwrap().unwrap();

    assert_eq!(range.evaluator.writes(), vec!["first", "second"]);
    assert_eq!(range.evaluator.max_in_flight(), 1);
    assert_eq!(range.evaluator.value("b"), Some(b"second".to_vec()));
}

#[tokio::test]
async fn test_cancel_while_waiting_for_latches() {
    let range = TestRange::new();
    let gate = range.evaluator.gate("b");

    let first = {
        let replica = range.replica.clone();
        let ba = range.batch(vec![put("b", "first")]);
        tokio::spawn(async move { replica.send(&Context::background(), ba).await })
    };
    wait_for(|| range.evaluator.in_flight() == 1).await;

    let ctx = Context::with_timeout(Duration::from_millis(30));
    let err = range
        .replica
        .send(&ctx, range.batch(vec![put("b", "second")]))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "aborted while acquiring latches: context deadline exceeded"
    );
    assert_eq!(range.latches.outstanding(), 1);

    gate.add_permits(1);
    tokio::time::timeout(WAIT, first).await.unwrap().unwrap().unwrap();
    assert_eq!(range.latches.outstanding(), 0);
}
