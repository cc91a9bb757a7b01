//! Common test utilities for integration tests

use async_trait::async_trait;
use kvrange_hlc::{HlcClock, HlcTimestamp, NodeId, SharedHlcClock};
use kvrange_protocol::{
    AdminChangeReplicasRequest, AdminMergeRequest, AdminRelocateRangeRequest,
    AdminScatterRequest, AdminSplitRequest, AdminTransferLeaseRequest, AdminUnsplitRequest,
    BatchRequest, BatchResponse, CheckConsistencyRequest, ConsistencyCheckResult, Error,
    GetRequest, Header, ImportRequest, IndeterminateCommitError, Intent, Key, Lease, Method,
    PushTxnRequest, PushTxnType, PutRequest, RangeDescriptor, RangeId, ReplicaDescriptor, Request, Response,
    Result, ScanRequest, Span, StoreId, Transaction, TransactionStatus, TxnMeta,
    WriteIntentError,
};
use kvrange_replica::{
    AdminHandler, BatchEvaluator, CommitRecovery, Context, DEFAULT_PUSHEE_RECHECK_INTERVAL,
    ExecutionPath, IntentCleanup, IntentResolution, IntentResolver, LatchGuard, LatchManager,
    LeaseRequester, Replica, ReplicaConfig, ReplicaServices, SpanLatchManager, SpanSet, Stopper,
    TestingKnobs, WaitQueue,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const NODE: NodeId = NodeId::new(1);

pub fn replica_descriptor() -> ReplicaDescriptor {
    ReplicaDescriptor {
        node_id: NODE,
        store_id: StoreId(1),
        replica_id: 1,
    }
}

pub fn range_descriptor() -> RangeDescriptor {
    RangeDescriptor {
        range_id: RangeId(1),
        start_key: Key::from("a"),
        end_key: Key::from("z"),
        replicas: vec![replica_descriptor()],
        generation: 1,
    }
}

#[allow(dead_code)]
pub fn get(key: &str) -> Request {
    Request::Get(GetRequest { key: key.into() })
}

#[allow(dead_code)]
pub fn put(key: &str, value: &str) -> Request {
    Request::Put(PutRequest {
        key: key.into(),
        value: value.as_bytes().to_vec(),
    })
}

#[allow(dead_code)]
pub fn scan(start: &str, end: &str) -> Request {
    Request::Scan(ScanRequest {
        span: Span::range(start, end),
    })
}

/// A write-intent conflict on `key` caused by `holder`, raised by request
/// `index` of the batch.
#[allow(dead_code)]
pub fn intent_conflict(key: &str, holder: &Transaction, index: usize) -> Error {
    Error::from(WriteIntentError {
        intents: vec![Intent {
            span: Span::point(key),
            txn: holder.meta.clone(),
            status: TransactionStatus::Pending,
        }],
    })
    .with_index(Some(index))
}

/// Evaluator backed by an in-memory map.
///
/// Errors queued with [`TestEvaluator::fail_next`] are returned by the next
/// evaluations in order. Keys with a gate block evaluation until the test
/// adds a permit.
#[derive(Default)]
pub struct TestEvaluator {
    data: Mutex<BTreeMap<Key, Vec<u8>>>,
    scripted: Mutex<VecDeque<Error>>,
    gates: Mutex<HashMap<Key, Arc<Semaphore>>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    paths: Mutex<Vec<ExecutionPath>>,
    batches: Mutex<Vec<BatchRequest>>,
    /// Values written by puts, in evaluation order
    writes: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl TestEvaluator {
    pub fn fail_next(&self, err: Error) {
        self.scripted.lock().push_back(err);
    }

    /// Block evaluations whose first request addresses `key`.
    pub fn gate(&self, key: &str) -> Arc<Semaphore> {
        self.gates
            .lock()
            .entry(Key::from(key))
            .or_insert_with(|| Arc::new(Semaphore::new(0)))
            .clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn paths(&self) -> Vec<ExecutionPath> {
        self.paths.lock().clone()
    }

    pub fn batches(&self) -> Vec<BatchRequest> {
        self.batches.lock().clone()
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().clone()
    }

    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.data.lock().get(&Key::from(key)).cloned()
    }

    async fn evaluate(
        &self,
        path: ExecutionPath,
        ba: &BatchRequest,
        guard: LatchGuard,
    ) -> Result<BatchResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.paths.lock().push(path);
        self.batches.lock().push(ba.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let gate = ba
            .requests
            .first()
            .and_then(|r| self.gates.lock().get(&r.span().key).cloned());
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        let result = match self.scripted.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(self.apply(ba)),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        guard.release();
        result
    }

    fn apply(&self, ba: &BatchRequest) -> BatchResponse {
        let mut data = self.data.lock();
        let mut br = BatchResponse {
            txn: ba.txn().cloned(),
            ..Default::default()
        };
        for req in &ba.requests {
            let resp = match req {
                Request::Get(r) => Response::Get {
                    value: data.get(&r.key).cloned(),
                },
                Request::Put(r) => {
                    data.insert(r.key.clone(), r.value.clone());
                    self.writes
                        .lock()
                        .push(String::from_utf8_lossy(&r.value).to_string());
                    Response::Put
                }
                Request::Delete(r) => {
                    data.remove(&r.key);
                    Response::Delete
                }
                Request::Scan(r) => Response::Scan {
                    rows: data
                        .range(r.span.key.clone()..r.span.exclusive_end())
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                },
                Request::EndTxn(r) => {
                    let mut txn = ba.txn().cloned().unwrap_or_else(|| {
                        Transaction::new("", r.key.clone(), 0, ba.header.timestamp, Duration::ZERO)
                    });
                    txn.status = if r.commit {
                        TransactionStatus::Committed
                    } else {
                        TransactionStatus::Aborted
                    };
                    br.txn = Some(txn.clone());
                    Response::EndTxn { txn }
                }
                Request::QueryIntent(_) => Response::QueryIntent { found: true },
                Request::PushTxn(r) => Response::PushTxn {
                    pushee_txn: pushed(r),
                },
                other => panic!("test evaluator does not handle {}", other.method()),
            };
            br.add(resp);
        }
        br
    }
}

/// The pushee record after a successful push.
fn pushed(req: &PushTxnRequest) -> Transaction {
    let mut meta = req.pushee_txn.clone();
    let status = match req.push_type {
        PushTxnType::Abort => TransactionStatus::Aborted,
        PushTxnType::Timestamp | PushTxnType::Touch => {
            meta.write_timestamp.forward(req.push_to);
            TransactionStatus::Pending
        }
    };
    Transaction {
        name: String::new(),
        status,
        read_timestamp: meta.write_timestamp,
        max_timestamp: meta.write_timestamp,
        observed_timestamps: Vec::new(),
        lock_spans: Vec::new(),
        in_flight_writes: Vec::new(),
        meta,
    }
}

#[async_trait]
impl BatchEvaluator for TestEvaluator {
    async fn execute_write_batch(
        &self,
        _ctx: &Context,
        ba: &BatchRequest,
        _spans: &SpanSet,
        guard: LatchGuard,
    ) -> Result<BatchResponse> {
        self.evaluate(ExecutionPath::ReadWrite, ba, guard).await
    }

    async fn execute_read_only_batch(
        &self,
        _ctx: &Context,
        ba: &BatchRequest,
        _spans: &SpanSet,
        guard: LatchGuard,
    ) -> Result<BatchResponse> {
        self.evaluate(ExecutionPath::ReadOnly, ba, guard).await
    }
}

/// How a cleanup handle was finalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalized {
    /// Which resolution handed out the handle, counting from zero
    pub cleanup: usize,
    pub conflict: bool,
    pub txn: bool,
}

/// Intent resolver that records its calls and how its cleanups end.
#[derive(Default)]
pub struct TestIntentResolver {
    results: Mutex<VecDeque<Result<()>>>,
    headers: Mutex<Vec<Header>>,
    push_types: Mutex<Vec<PushTxnType>>,
    finalized: Arc<Mutex<Vec<Finalized>>>,
    issued: AtomicUsize,
}

#[allow(dead_code)]
impl TestIntentResolver {
    /// Result of the next resolution. Resolutions succeed by default.
    pub fn respond_with(&self, result: Result<()>) {
        self.results.lock().push_back(result);
    }

    pub fn calls(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn headers(&self) -> Vec<Header> {
        self.headers.lock().clone()
    }

    pub fn push_types(&self) -> Vec<PushTxnType> {
        self.push_types.lock().clone()
    }

    pub fn finalized(&self) -> Vec<Finalized> {
        self.finalized.lock().clone()
    }
}

#[async_trait]
impl IntentResolver for TestIntentResolver {
    async fn process_write_intent_error(
        &self,
        _ctx: &Context,
        _conflict: &WriteIntentError,
        _args: &Request,
        header: &Header,
        push_type: PushTxnType,
    ) -> IntentResolution {
        let id = self.issued.fetch_add(1, Ordering::SeqCst);
        self.headers.lock().push(header.clone());
        self.push_types.lock().push(push_type);

        let finalized = self.finalized.clone();
        let cleanup = IntentCleanup::new(move |conflict, txn| {
            finalized.lock().push(Finalized {
                cleanup: id,
                conflict: conflict.is_some(),
                txn: txn.is_some(),
            });
        });
        IntentResolution {
            cleanup: Some(cleanup),
            result: self.results.lock().pop_front().unwrap_or(Ok(())),
        }
    }
}

/// Commit recovery that commits the staging transaction unless told
/// otherwise.
#[derive(Default)]
pub struct TestRecovery {
    results: Mutex<VecDeque<Result<Transaction>>>,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl TestRecovery {
    pub fn respond_with(&self, result: Result<Transaction>) {
        self.results.lock().push_back(result);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommitRecovery for TestRecovery {
    async fn resolve_indeterminate_commit(
        &self,
        _ctx: &Context,
        conflict: &IndeterminateCommitError,
    ) -> Result<Transaction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.results.lock().pop_front().unwrap_or_else(|| {
            let mut txn = conflict.staging_txn.clone();
            txn.status = TransactionStatus::Committed;
            Ok(txn)
        })
    }
}

/// Grants leases to whichever replica asks, or to a configured holder.
#[derive(Default)]
pub struct TestLeaseRequester {
    holder: Mutex<Option<ReplicaDescriptor>>,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl TestLeaseRequester {
    pub fn grant_to(&self, holder: ReplicaDescriptor) {
        *self.holder.lock() = Some(holder);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LeaseRequester for TestLeaseRequester {
    async fn request_lease(
        &self,
        _ctx: &Context,
        _desc: &RangeDescriptor,
        replica: ReplicaDescriptor,
        now: HlcTimestamp,
    ) -> Result<Lease> {
        let sequence = self.calls.fetch_add(1, Ordering::SeqCst) as u64 + 2;
        Ok(Lease {
            replica: self.holder.lock().unwrap_or(replica),
            start: now,
            expiration: now.add_duration(Duration::from_secs(9)),
            sequence,
        })
    }
}

/// Admin handler that records the commands it ran.
#[derive(Default)]
pub struct TestAdmin {
    methods: Mutex<Vec<Method>>,
    split_reasons: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl TestAdmin {
    pub fn methods(&self) -> Vec<Method> {
        self.methods.lock().clone()
    }

    pub fn split_reasons(&self) -> Vec<String> {
        self.split_reasons.lock().clone()
    }
}

#[async_trait]
impl AdminHandler for TestAdmin {
    async fn admin_split(
        &self,
        _ctx: &Context,
        _desc: &RangeDescriptor,
        _req: &AdminSplitRequest,
        reason: &str,
    ) -> Result<()> {
        self.methods.lock().push(Method::AdminSplit);
        self.split_reasons.lock().push(reason.to_string());
        Ok(())
    }

    async fn admin_unsplit(
        &self,
        _ctx: &Context,
        _desc: &RangeDescriptor,
        _req: &AdminUnsplitRequest,
    ) -> Result<()> {
        self.methods.lock().push(Method::AdminUnsplit);
        Ok(())
    }

    async fn admin_merge(
        &self,
        _ctx: &Context,
        _desc: &RangeDescriptor,
        _req: &AdminMergeRequest,
    ) -> Result<()> {
        self.methods.lock().push(Method::AdminMerge);
        Ok(())
    }

    async fn admin_transfer_lease(
        &self,
        _ctx: &Context,
        _desc: &RangeDescriptor,
        _req: &AdminTransferLeaseRequest,
    ) -> Result<()> {
        self.methods.lock().push(Method::AdminTransferLease);
        Ok(())
    }

    async fn admin_change_replicas(
        &self,
        _ctx: &Context,
        desc: &RangeDescriptor,
        _req: &AdminChangeReplicasRequest,
    ) -> Result<Option<RangeDescriptor>> {
        self.methods.lock().push(Method::AdminChangeReplicas);
        let mut updated = desc.clone();
        updated.generation += 1;
        Ok(Some(updated))
    }

    async fn admin_relocate_range(
        &self,
        _ctx: &Context,
        _desc: &RangeDescriptor,
        _req: &AdminRelocateRangeRequest,
    ) -> Result<()> {
        self.methods.lock().push(Method::AdminRelocateRange);
        Ok(())
    }

    async fn check_consistency(
        &self,
        _ctx: &Context,
        desc: &RangeDescriptor,
        _req: &CheckConsistencyRequest,
    ) -> Result<Vec<ConsistencyCheckResult>> {
        self.methods.lock().push(Method::CheckConsistency);
        Ok(vec![ConsistencyCheckResult {
            span: desc.span(),
            consistent: true,
            detail: String::new(),
        }])
    }

    async fn import(
        &self,
        _ctx: &Context,
        _desc: &RangeDescriptor,
        req: &ImportRequest,
    ) -> Result<u64> {
        self.methods.lock().push(Method::Import);
        Ok(req.files.len() as u64)
    }

    async fn admin_scatter(
        &self,
        _ctx: &Context,
        _desc: &RangeDescriptor,
        req: &AdminScatterRequest,
    ) -> Result<Vec<Span>> {
        self.methods.lock().push(Method::AdminScatter);
        Ok(vec![req.span.clone()])
    }
}

/// Latch manager that counts acquisitions and releases.
#[derive(Default)]
pub struct CountingLatches {
    inner: SpanLatchManager,
    acquired: AtomicUsize,
    released: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl CountingLatches {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Batches holding or waiting for latches.
    pub fn outstanding(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl LatchManager for CountingLatches {
    async fn acquire(&self, ctx: &Context, spans: Arc<SpanSet>) -> Result<LatchGuard> {
        let guard = self.inner.acquire(ctx, spans.clone()).await?;
        self.acquired.fetch_add(1, Ordering::SeqCst);
        let released = self.released.clone();
        Ok(LatchGuard::new(guard.id(), spans, move || {
            guard.release();
            released.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

/// A replica wired to recording test doubles
pub struct TestRange {
    pub replica: Arc<Replica>,
    pub evaluator: Arc<TestEvaluator>,
    pub resolver: Arc<TestIntentResolver>,
    pub recovery: Arc<TestRecovery>,
    pub leases: Arc<TestLeaseRequester>,
    pub admin: Arc<TestAdmin>,
    pub latches: Arc<CountingLatches>,
    pub wait_queue: Arc<WaitQueue>,
    pub clock: SharedHlcClock,
    pub stopper: Stopper,
}

pub struct TestRangeBuilder {
    config: ReplicaConfig,
    knobs: TestingKnobs,
    lease: Option<Lease>,
    txn_wait_recheck: Duration,
}

#[allow(dead_code)]
impl TestRangeBuilder {
    pub fn config(mut self, config: ReplicaConfig) -> Self {
        self.config = config;
        self
    }

    pub fn knobs(mut self, knobs: TestingKnobs) -> Self {
        self.knobs = knobs;
        self
    }

    /// How long pushers wait in the txn wait queue before re-evaluating.
    pub fn txn_wait_recheck(mut self, interval: Duration) -> Self {
        self.txn_wait_recheck = interval;
        self
    }

    /// Start with this lease instead of a never-expiring one held locally.
    pub fn lease(mut self, lease: Lease) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn build(self) -> TestRange {
        let clock: SharedHlcClock = Arc::new(HlcClock::manual(NODE, 1_000_000_000));
        let stopper = Stopper::new();
        let evaluator = Arc::new(TestEvaluator::default());
        let resolver = Arc::new(TestIntentResolver::default());
        let recovery = Arc::new(TestRecovery::default());
        let leases = Arc::new(TestLeaseRequester::default());
        let admin = Arc::new(TestAdmin::default());
        let latches = Arc::new(CountingLatches::default());
        let wait_queue = Arc::new(WaitQueue::with_recheck_interval(self.txn_wait_recheck));

        let services = ReplicaServices {
            latches: latches.clone(),
            txn_wait_queue: wait_queue.clone(),
            intent_resolver: resolver.clone(),
            commit_recovery: recovery.clone(),
            lease_requester: leases.clone(),
            admin: admin.clone(),
            evaluator: evaluator.clone(),
        };
        let replica = Replica::new(
            range_descriptor(),
            replica_descriptor(),
            clock.clone(),
            stopper.clone(),
            self.config,
            self.knobs,
            services,
        );
        replica.set_lease(self.lease.unwrap_or(Lease {
            replica: replica_descriptor(),
            start: HlcTimestamp::ZERO,
            expiration: HlcTimestamp::MAX,
            sequence: 1,
        }));

        TestRange {
            replica: Arc::new(replica),
            evaluator,
            resolver,
            recovery,
            leases,
            admin,
            latches,
            wait_queue,
            clock,
            stopper,
        }
    }
}

#[allow(dead_code)]
impl TestRange {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> TestRangeBuilder {
        TestRangeBuilder {
            config: ReplicaConfig::default(),
            knobs: TestingKnobs::default(),
            lease: None,
            txn_wait_recheck: DEFAULT_PUSHEE_RECHECK_INTERVAL,
        }
    }

    pub fn header(&self) -> Header {
        Header {
            timestamp: self.clock.now(),
            gateway_node_id: NODE,
            replica: replica_descriptor(),
            range_id: RangeId(1),
            ..Default::default()
        }
    }

    pub fn batch(&self, requests: Vec<Request>) -> BatchRequest {
        BatchRequest::new(self.header(), requests)
    }

    /// A pending transaction that has observed this node's clock.
    pub fn txn(&self, name: &str, key: &str, priority: i32) -> Transaction {
        let now = self.clock.now();
        let mut txn = Transaction::new(name, key, priority, now, self.clock.max_offset());
        txn.update_observed_timestamp(NODE, now);
        txn
    }

    pub fn txn_batch(&self, txn: &Transaction, requests: Vec<Request>) -> BatchRequest {
        let mut ba = self.batch(requests);
        ba.header.timestamp = txn.read_timestamp;
        ba.header.txn = Some(Arc::new(txn.clone()));
        ba
    }

    pub async fn send(&self, ba: BatchRequest) -> Result<BatchResponse> {
        self.replica.send(&Context::background(), ba).await
    }
}

#[allow(dead_code)]
pub fn meta(txn: &Transaction) -> TxnMeta {
    txn.meta.clone()
}
