//! Batch routing, validation and pre-execution steps

mod common;

use common::{NODE, TestRange, get, put, scan};
use kvrange_protocol::{
    BatchRequest, BatchResponse, DeleteRequest, EndTxnRequest, Error, Key, ReadConsistency,
    Request, Response, SequencedWrite,
};
use kvrange_replica::{Context, ExecutionPath, ReplicaConfig, TestingKnobs};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_reads_take_read_only_path() {
    let range = TestRange::new();
    range.send(range.batch(vec![put("b", "1")])).await.unwrap();
    let br = range
        .send(range.batch(vec![get("b"), scan("a", "c")]))
        .await
        .unwrap();

    assert_eq!(
        range.evaluator.paths(),
        vec![ExecutionPath::ReadWrite, ExecutionPath::ReadOnly]
    );
    assert_eq!(br.responses.len(), 2);
    assert_eq!(
        br.responses[0],
        Response::Get {
            value: Some(b"1".to_vec())
        }
    );
}

#[tokio::test]
async fn test_mixed_batch_rejected_before_latching() {
    let range = TestRange::new();
    let err = range
        .send(range.batch(vec![get("b"), put("c", "1")]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cannot mix reads and writes"));
    assert_eq!(range.latches.acquired(), 0);
    assert_eq!(range.evaluator.calls(), 0);
}

#[tokio::test]
async fn test_missing_timestamp_rejected() {
    let range = TestRange::new();
    let mut ba = range.batch(vec![get("b")]);
    ba.header.timestamp = Default::default();
    let err = range.send(ba).await.unwrap_err();
    assert_eq!(err.to_string(), "timestamp must be set");
}

#[tokio::test]
async fn test_inconsistent_reads_rules() {
    let range = TestRange::new();

    let mut write = range.batch(vec![put("b", "1")]);
    write.header.read_consistency = ReadConsistency::Inconsistent;
    assert!(range.send(write).await.is_err());

    let txn = range.txn("t", "b", 1);
    let mut txn_read = range.txn_batch(&txn, vec![get("b")]);
    txn_read.header.read_consistency = ReadConsistency::Inconsistent;
    assert!(range.send(txn_read).await.is_err());

    let mut read = range.batch(vec![get("b")]);
    read.header.read_consistency = ReadConsistency::Inconsistent;
    range.send(read).await.unwrap();
    assert_eq!(range.evaluator.calls(), 1);
}

#[tokio::test]
#[should_panic(expected = "empty batch")]
async fn test_empty_batch_is_fatal() {
    let range = TestRange::new();
    let _ = range.send(range.batch(vec![])).await;
}

#[tokio::test]
async fn test_request_filter_short_circuits() {
    let range = TestRange::builder()
        .knobs(TestingKnobs {
            request_filter: Some(Arc::new(|ba: &BatchRequest| {
                ba.requests
                    .iter()
                    .any(|r| r.span().key == Key::from("x"))
                    .then(|| Error::message("filtered"))
            })),
            ..Default::default()
        })
        .build();

    let err = range.send(range.batch(vec![put("x", "1")])).await.unwrap_err();
    assert_eq!(err.to_string(), "filtered");
    assert_eq!(range.evaluator.calls(), 0);

    range.send(range.batch(vec![put("b", "1")])).await.unwrap();
    assert_eq!(range.evaluator.calls(), 1);
}

#[tokio::test]
async fn test_response_filter_replaces_success() {
    let range = TestRange::builder()
        .knobs(TestingKnobs {
            response_filter: Some(Arc::new(|_: &BatchRequest, br: &BatchResponse| {
                (br.responses.len() == 2).then(|| Error::message("rewritten"))
            })),
            ..Default::default()
        })
        .build();

    range.send(range.batch(vec![put("b", "1")])).await.unwrap();
    let err = range
        .send(range.batch(vec![put("b", "1"), put("c", "2")]))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "rewritten");
    // The batch still ran.
    assert_eq!(range.evaluator.value("c"), Some(b"2".to_vec()));
}

#[tokio::test]
async fn test_gateway_load_recorded() {
    let range = TestRange::new();
    range.send(range.batch(vec![get("b")])).await.unwrap();
    let mut ba = range.batch(vec![get("b")]);
    ba.header.gateway_node_id = Default::default();
    range.send(ba).await.unwrap();

    assert_eq!(range.replica.leaseholder_stats().count(NODE), 1);
    assert_eq!(range.replica.leaseholder_stats().total(), 1);
}

#[tokio::test]
async fn test_batch_txn_gets_observed_timestamp() {
    let range = TestRange::new();
    let mut txn = range.txn("t", "b", 1);
    txn.observed_timestamps.clear();
    let ba = range.txn_batch(&txn, vec![put("b", "1")]);
    let shared = ba.header.txn.clone().unwrap();

    range.send(ba).await.unwrap();

    let evaluated = &range.evaluator.batches()[0];
    assert!(evaluated.txn().unwrap().observed_timestamp(NODE).is_some());
    assert!(shared.observed_timestamp(NODE).is_none());
}

fn oversized_range() -> TestRange {
    let range = TestRange::builder()
        .config(
            ReplicaConfig::default()
                .with_range_max_bytes(100)
                .with_backpressure_range_size_multiplier(2.0),
        )
        .build();
    range.replica.set_range_bytes(500);
    range
}

#[tokio::test]
async fn test_backpressure_blocks_until_range_shrinks() {
    let range = oversized_range();
    assert!(range.replica.should_backpressure_writes());

    let ba = range.batch(vec![put("b", "1")]);
    let replica = range.replica.clone();
    let send = tokio::spawn(async move { replica.send(&Context::background(), ba).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!send.is_finished());

    // Still too big.
    range.replica.set_range_bytes(300);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!send.is_finished());

    range.replica.set_range_bytes(50);
    tokio::time::timeout(WAIT, send).await.unwrap().unwrap().unwrap();
    assert_eq!(range.evaluator.calls(), 1);
}

#[tokio::test]
async fn test_backpressure_skips_unaffected_batches() {
    let range = oversized_range();
    range
        .send(range.batch(vec![Request::Delete(DeleteRequest { key: "b".into() })]))
        .await
        .unwrap();
    range.send(range.batch(vec![get("b")])).await.unwrap();

    // Transactions holding locks are let through.
    let mut txn = range.txn("t", "b", 1);
    txn.lock_spans.push(kvrange_protocol::Span::point("c"));
    range
        .send(range.txn_batch(&txn, vec![put("b", "1")]))
        .await
        .unwrap();
    assert_eq!(range.evaluator.calls(), 3);
}

#[tokio::test]
async fn test_backpressure_canceled() {
    let range = oversized_range();
    let ctx = Context::with_timeout(Duration::from_millis(20));
    let err = range
        .replica
        .send(&ctx, range.batch(vec![put("b", "1")]))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "aborted while applying backpressure: context deadline exceeded"
    );
}

#[tokio::test]
async fn test_backpressure_disabled_by_zero_multiplier() {
    let range = TestRange::builder()
        .config(
            ReplicaConfig::default()
                .with_range_max_bytes(100)
                .with_backpressure_range_size_multiplier(0.0),
        )
        .build();
    range.replica.set_range_bytes(10_000);
    range.send(range.batch(vec![put("b", "1")])).await.unwrap();
}

#[tokio::test]
async fn test_parallel_commit_sees_stripped_in_flight_writes() {
    let range = TestRange::new();
    let txn = range.txn("t", "b", 1);
    let ba = range.txn_batch(
        &txn,
        vec![
            put("c", "1"),
            Request::EndTxn(EndTxnRequest {
                key: "b".into(),
                commit: true,
                lock_spans: vec![],
                in_flight_writes: vec![
                    SequencedWrite {
                        key: "c".into(),
                        sequence: 1,
                    },
                    SequencedWrite {
                        key: "d".into(),
                        sequence: 2,
                    },
                ],
            }),
        ],
    );
    let original = ba.clone();

    range.send(ba).await.unwrap();

    let evaluated = range.evaluator.batches();
    let Request::EndTxn(et) = &evaluated[0].requests[1] else {
        panic!("expected EndTxn");
    };
    assert_eq!(et.in_flight_writes.len(), 1);
    assert_eq!(et.lock_spans, vec![kvrange_protocol::Span::point("c")]);
    let Request::EndTxn(before) = &original.requests[1] else {
        panic!("expected EndTxn");
    };
    assert_eq!(before.in_flight_writes.len(), 2);
}
