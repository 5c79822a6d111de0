//! End-to-end scenarios for one controller process under paused time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use keel_core::app::{ControllerBuilder, ControllerConfig, LifecycleSupervisor, ReconcileLoop};
use keel_core::app::{LeaderGate, LoopOptions, WorkerGroup, WorkerLiveness};
use keel_core::domain::{HolderIdentity, LoopState, ReconcileResult, ResourceKey};
use keel_core::error::KeelError;
use keel_core::impls::{InMemoryChangeSource, InMemoryLeaseStore};
use keel_core::observability::LoopStats;
use keel_core::ports::{LeaseStore, ReconcileContext, Reconciler};
use keel_core::queue::{RetryPolicy, WorkQueue};

type Respond = dyn Fn(&ResourceKey) -> ReconcileResult + Send + Sync;

/// Records every invocation and answers with a fixed rule.
struct Recorder {
    calls: Mutex<Vec<(ResourceKey, Instant)>>,
    respond: Box<Respond>,
}

impl Recorder {
    fn new(respond: impl Fn(&ResourceKey) -> ReconcileResult + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        })
    }

    fn done() -> Arc<Self> {
        Self::new(|_| ReconcileResult::Done)
    }

    fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }
}

#[async_trait]
impl Reconciler for Recorder {
    async fn reconcile(&self, _ctx: &ReconcileContext, key: &ResourceKey) -> ReconcileResult {
        self.calls.lock().unwrap().push((key.clone(), Instant::now()));
        (self.respond)(key)
    }
}

struct Running {
    supervisor: Arc<LifecycleSupervisor>,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), KeelError>>,
}

impl Running {
    async fn start(supervisor: LifecycleSupervisor) -> Self {
        let supervisor = Arc::new(supervisor);
        let (stop, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn({
            let supervisor = supervisor.clone();
            async move {
                supervisor
                    .run(async {
                        let _ = stop_rx.await;
                    })
                    .await
            }
        });
        supervisor.context().wait_for(LoopState::Running).await;
        Self {
            supervisor,
            stop,
            handle,
        }
    }

    async fn shutdown(self) -> Arc<LifecycleSupervisor> {
        self.stop.send(()).unwrap();
        self.handle.await.unwrap().unwrap();
        self.supervisor
    }
}

fn key(s: &str) -> ResourceKey {
    ResourceKey::from(s)
}

#[tokio::test(start_paused = true)]
async fn repeated_adds_collapse_into_one_reconcile() {
    let queue = Arc::new(WorkQueue::new(RetryPolicy::default()));
    for _ in 0..5 {
        queue.add(key("A")).await;
    }
    assert_eq!(queue.len().await, 1);

    let recorder = Recorder::done();
    let worker = ReconcileLoop::new(
        0,
        queue.clone(),
        Arc::new(LeaderGate::standalone(HolderIdentity::new("solo"))),
        recorder.clone(),
        Arc::new(LoopStats::default()),
        LoopOptions::from(&ControllerConfig::default()),
    );
    let (stop, rx) = tokio::sync::watch::channel(false);
    let group = WorkerGroup::spawn(vec![worker], rx, Arc::new(WorkerLiveness::default()));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(recorder.count(), 1);

    queue.shut_down().await;
    stop.send(true).unwrap();
    assert_eq!(group.join(Duration::from_secs(1)).await, 0);
}

#[tokio::test(start_paused = true)]
async fn requeue_after_reconciles_periodically() {
    let recorder = Recorder::new(|_| ReconcileResult::RequeueAfter(Duration::from_secs(60)));
    let supervisor = ControllerBuilder::new(ControllerConfig::default())
        .shared_reconciler(recorder.clone())
        .change_source(Arc::new(InMemoryChangeSource::with_keys([key("A")])))
        .build()
        .unwrap();
    let running = Running::start(supervisor).await;

    tokio::time::sleep(Duration::from_secs(301)).await;
    let times = recorder.times();
    assert_eq!(times.len(), 6);
    for pair in times.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= Duration::from_secs(60), "gap {gap:?}");
        assert!(gap < Duration::from_secs(61), "gap {gap:?}");
    }

    let supervisor = running.shutdown().await;
    assert_eq!(supervisor.stats().snapshot().requeues, 6);
}

#[tokio::test(start_paused = true)]
async fn noop_reconciler_leaves_queue_empty() {
    let recorder = Recorder::done();
    let source = Arc::new(InMemoryChangeSource::with_keys([key("ns/a"), key("ns/b"), key("ns/c")]));
    let config = ControllerConfig {
        worker_count: 3,
        ..ControllerConfig::default()
    };
    let supervisor = ControllerBuilder::new(config)
        .shared_reconciler(recorder.clone())
        .change_source(source.clone())
        .build()
        .unwrap();
    let running = Running::start(supervisor).await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(recorder.count(), 3);
    let stats = running.supervisor.queue().stats().await;
    assert_eq!((stats.pending, stats.in_flight, stats.delayed, stats.failing), (0, 0, 0, 0));

    source.upsert(key("ns/a"));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(recorder.count(), 4);
    assert!(running.supervisor.queue().is_empty().await);

    running.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failing_key_backs_off_then_recovers() {
    let failures = Arc::new(Mutex::new(3));
    let recorder = Recorder::new({
        let failures = failures.clone();
        move |_| {
            let mut left = failures.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                ReconcileResult::error("transient")
            } else {
                ReconcileResult::Done
            }
        }
    });
    let supervisor = ControllerBuilder::new(ControllerConfig::default())
        .shared_reconciler(recorder.clone())
        .change_source(Arc::new(InMemoryChangeSource::with_keys([key("A")])))
        .build()
        .unwrap();
    let running = Running::start(supervisor).await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    let times = recorder.times();
    assert_eq!(times.len(), 4);
    // 5ms, 10ms, 20ms
    assert!(times[2] - times[1] >= times[1] - times[0]);
    assert!(times[3] - times[2] >= times[2] - times[1]);
    assert_eq!(running.supervisor.queue().num_requeues(&key("A")).await, 0);

    let supervisor = running.shutdown().await;
    assert_eq!(supervisor.stats().snapshot().errors, 3);
}

#[tokio::test(start_paused = true)]
async fn source_disconnect_drops_readiness_and_resyncs() {
    let recorder = Recorder::done();
    let source = Arc::new(InMemoryChangeSource::with_keys([key("A")]));
    let supervisor = ControllerBuilder::new(ControllerConfig::default())
        .shared_reconciler(recorder.clone())
        .change_source(source.clone())
        .build()
        .unwrap();
    let running = Running::start(supervisor).await;
    let health = running.supervisor.health();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(health.is_ready());
    assert_eq!(recorder.count(), 1);

    source.disconnect(true);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!health.is_ready());
    assert!(health.is_alive());

    source.reconnect();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(health.is_ready());
    assert_eq!(recorder.count(), 2);

    running.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stalled_renewal_stops_reconciling_within_renew_deadline() {
    let recorder = Recorder::new(|_| ReconcileResult::RequeueAfter(Duration::from_secs(1)));
    let store = Arc::new(InMemoryLeaseStore::new());
    let mut config = ControllerConfig::default();
    config.leader_election.enabled = true;
    let renew_deadline = config.leader_election.renew_deadline;
    let supervisor = ControllerBuilder::new(config)
        .shared_reconciler(recorder.clone())
        .change_source(Arc::new(InMemoryChangeSource::with_keys([key("A")])))
        .lease_store(store.clone())
        .build()
        .unwrap();
    let running = Running::start(supervisor).await;
    let health = running.supervisor.health();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(running.supervisor.gate().is_leader());
    assert!(health.is_ready());
    assert!(recorder.count() > 0);

    let stalled_at = Instant::now();
    store.set_available(false);
    tokio::time::sleep(renew_deadline + Duration::from_millis(100)).await;
    assert!(!health.is_ready());
    assert!(!running.supervisor.gate().is_leader());

    tokio::time::sleep(Duration::from_secs(30)).await;
    let cutoff = stalled_at + renew_deadline;
    assert!(recorder.times().iter().all(|at| *at <= cutoff));
    assert!(running.supervisor.stats().snapshot().skipped_not_leader > 0);

    // nobody else took over, so the same holder resumes under its term
    store.set_available(true);
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(running.supervisor.gate().is_leader());
    assert_eq!(running.supervisor.gate().current_term(), Some(1));
    assert!(recorder.times().iter().any(|at| *at > cutoff));

    running.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn graceful_shutdown_releases_lease() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let mut config = ControllerConfig::default();
    config.leader_election.enabled = true;
    config.leader_election.lease_name = "release-test".to_string();
    config.leader_election.identity = HolderIdentity::new("first");
    let supervisor = ControllerBuilder::new(config.clone())
        .shared_reconciler(Recorder::done())
        .change_source(Arc::new(InMemoryChangeSource::new()))
        .lease_store(store.clone())
        .build()
        .unwrap();
    let running = Running::start(supervisor).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(running.supervisor.gate().is_leader());

    let supervisor = running.shutdown().await;
    assert_eq!(supervisor.context().state(), LoopState::Stopped);
    let record = store.read("release-test").await.unwrap().unwrap();
    assert_eq!(record.value.holder, None);
    assert_eq!(record.value.term, 1);

    // successor does not wait for expiry
    let mut successor = config.leader_election;
    successor.identity = HolderIdentity::new("second");
    let gate = LeaderGate::new(
        successor,
        store.clone(),
        Arc::new(keel_core::ports::MonotonicClock::new()),
    )
    .unwrap();
    assert!(gate.try_acquire_or_renew().await.unwrap());
    assert_eq!(gate.current_term(), Some(2));
}
