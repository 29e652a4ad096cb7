//! Concurrency policies
//!
//! An [`Executor`] decides where a received packet is processed:
//!
//! - **Sequential**: inline in the receive loop, one packet at a time
//! - **Worker**: one blocking-pool worker per packet
//! - **Isolated**: one forked process per packet (Unix), against a private
//!   snapshot of the registration table
//! - **Cooperative**: tasks on a single-threaded event loop that yield
//!   between messages and wherever an async handler awaits
//!
//! Every executor counts what it has accepted so that [`Executor::drain`]
//! can wait for in-flight work during shutdown.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::LocalSet;
use tracing::{debug, error, warn};

use crate::error::{Result, ServerError};
use crate::isolate;
use crate::pipeline::{Job, Pipeline};

/// Server concurrency policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    #[default]
    Sequential,
    Worker,
    Isolated,
    Cooperative,
}

impl Policy {
    pub const ALL: [Policy; 4] = [
        Policy::Sequential,
        Policy::Worker,
        Policy::Isolated,
        Policy::Cooperative,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::Sequential => "sequential",
            Policy::Worker => "worker",
            Policy::Isolated => "isolated",
            Policy::Cooperative => "cooperative",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Policy {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self> {
        Policy::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ServerError::Config(format!("unknown policy: {}", s)))
    }
}

/// Runs packet jobs and stream connections under one policy
#[async_trait]
pub trait Executor: Send + Sync {
    fn policy(&self) -> Policy;

    /// Hand over one packet. Returns once the executor has taken it; the
    /// sequential executor only returns after processing completes.
    async fn execute(&self, job: Job);

    /// Run the read loop of one stream connection
    async fn spawn_connection(&self, connection: BoxFuture<'static, ()>);

    /// Wait until every accepted job and connection has finished
    async fn drain(&self);

    /// Jobs and connections accepted but not yet finished
    fn in_flight(&self) -> usize;
}

/// Build the executor for `policy`
pub fn executor_for(policy: Policy, pipeline: Arc<Pipeline>) -> Result<Arc<dyn Executor>> {
    let executor: Arc<dyn Executor> = match policy {
        Policy::Sequential => Arc::new(SequentialExecutor::new(pipeline)),
        Policy::Worker => Arc::new(WorkerExecutor::new(pipeline)),
        Policy::Isolated => Arc::new(IsolatedExecutor::new(pipeline)),
        Policy::Cooperative => Arc::new(CooperativeExecutor::new(pipeline)?),
    };
    debug!("Using {} executor", policy);
    Ok(executor)
}

// ============================================================================
// In-flight tracking
// ============================================================================

#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(self.clone())
    }

    fn active(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

// ============================================================================
// Sequential
// ============================================================================

/// Processes each packet to completion before the next is received
pub struct SequentialExecutor {
    pipeline: Arc<Pipeline>,
    in_flight: Arc<InFlight>,
}

impl SequentialExecutor {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            in_flight: Arc::default(),
        }
    }
}

#[async_trait]
impl Executor for SequentialExecutor {
    fn policy(&self) -> Policy {
        Policy::Sequential
    }

    async fn execute(&self, job: Job) {
        let _guard = self.in_flight.enter();
        self.pipeline.run_inline(job).await;
    }

    async fn spawn_connection(&self, connection: BoxFuture<'static, ()>) {
        // One connection at a time; the accept loop waits here
        let _guard = self.in_flight.enter();
        connection.await;
    }

    async fn drain(&self) {
        self.in_flight.wait_idle().await;
    }

    fn in_flight(&self) -> usize {
        self.in_flight.active()
    }
}

// ============================================================================
// Worker
// ============================================================================

/// One blocking-pool worker per packet
pub struct WorkerExecutor {
    pipeline: Arc<Pipeline>,
    in_flight: Arc<InFlight>,
}

impl WorkerExecutor {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            in_flight: Arc::default(),
        }
    }
}

#[async_trait]
impl Executor for WorkerExecutor {
    fn policy(&self) -> Policy {
        Policy::Worker
    }

    async fn execute(&self, job: Job) {
        let guard = self.in_flight.enter();
        let pipeline = self.pipeline.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            pipeline.run_blocking(job);
        });
    }

    async fn spawn_connection(&self, connection: BoxFuture<'static, ()>) {
        let guard = self.in_flight.enter();
        tokio::spawn(async move {
            let _guard = guard;
            connection.await;
        });
    }

    async fn drain(&self) {
        self.in_flight.wait_idle().await;
    }

    fn in_flight(&self) -> usize {
        self.in_flight.active()
    }
}

// ============================================================================
// Isolated
// ============================================================================

/// One child process per packet, each with its own copy of the registrations.
///
/// The table is copied when the packet is handed over, so `map`/`unmap`
/// calls made afterwards do not change which handlers that run invokes.
/// A helper thread forks the child and waits for it; whatever the handlers
/// change in memory stays in the child, and only their replies come back.
/// A child that crashes loses its packet and nothing else.
pub struct IsolatedExecutor {
    pipeline: Arc<Pipeline>,
    in_flight: Arc<InFlight>,
}

impl IsolatedExecutor {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            in_flight: Arc::default(),
        }
    }
}

#[async_trait]
impl Executor for IsolatedExecutor {
    fn policy(&self) -> Policy {
        Policy::Isolated
    }

    async fn execute(&self, job: Job) {
        let guard = self.in_flight.enter();
        let pipeline = self.pipeline.isolated();
        let spawned = std::thread::Builder::new()
            .name("oscine-isolated".into())
            .spawn(move || {
                let _guard = guard;
                match isolate::run(&pipeline, &job) {
                    Ok(replies) => pipeline.deliver(&job, replies),
                    Err(e) => error!("Isolated run for packet from {:?} failed: {}", job.peer, e),
                }
            });
        if let Err(e) = spawned {
            error!("Failed to spawn isolated worker: {}", e);
        }
    }

    async fn spawn_connection(&self, connection: BoxFuture<'static, ()>) {
        let guard = self.in_flight.enter();
        tokio::spawn(async move {
            let _guard = guard;
            connection.await;
        });
    }

    async fn drain(&self) {
        self.in_flight.wait_idle().await;
    }

    fn in_flight(&self) -> usize {
        self.in_flight.active()
    }
}

// ============================================================================
// Cooperative
// ============================================================================

enum LoopTask {
    Job(Job, InFlightGuard),
    Connection(BoxFuture<'static, ()>, InFlightGuard),
}

/// Single-threaded event loop.
///
/// Owns one OS thread running a current-thread runtime and a [`LocalSet`].
/// Every packet and every stream connection becomes a `spawn_local` task on
/// that loop, so handlers never run in parallel with each other.
pub struct CooperativeExecutor {
    tx: mpsc::UnboundedSender<LoopTask>,
    in_flight: Arc<InFlight>,
}

impl CooperativeExecutor {
    pub fn new(pipeline: Arc<Pipeline>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (tx, mut rx) = mpsc::unbounded_channel::<LoopTask>();

        std::thread::Builder::new()
            .name("oscine-cooperative".into())
            .spawn(move || {
                let local = LocalSet::new();
                local.spawn_local(async move {
                    while let Some(task) = rx.recv().await {
                        match task {
                            LoopTask::Job(job, guard) => {
                                let pipeline = pipeline.clone();
                                tokio::task::spawn_local(async move {
                                    pipeline.run_cooperative(job).await;
                                    drop(guard);
                                });
                            }
                            LoopTask::Connection(connection, guard) => {
                                tokio::task::spawn_local(async move {
                                    connection.await;
                                    drop(guard);
                                });
                            }
                        }
                    }
                });
                // Completes once the channel closes and every task has finished
                runtime.block_on(local);
                debug!("Cooperative loop stopped");
            })?;

        Ok(Self {
            tx,
            in_flight: Arc::default(),
        })
    }

    fn submit(&self, task: LoopTask) {
        if self.tx.send(task).is_err() {
            warn!("Cooperative loop is gone, dropping work");
        }
    }
}

#[async_trait]
impl Executor for CooperativeExecutor {
    fn policy(&self) -> Policy {
        Policy::Cooperative
    }

    async fn execute(&self, job: Job) {
        let guard = self.in_flight.enter();
        self.submit(LoopTask::Job(job, guard));
    }

    async fn spawn_connection(&self, connection: BoxFuture<'static, ()>) {
        let guard = self.in_flight.enter();
        self.submit(LoopTask::Connection(connection, guard));
    }

    async fn drain(&self) {
        self.in_flight.wait_idle().await;
    }

    fn in_flight(&self) -> usize {
        self.in_flight.active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::server::ServerConfig;
    use bytes::Bytes;
    use oscine_core::{Atom, Message, Packet, SystemClock};
    use oscine_transport::TransportSender;
    use parking_lot::Mutex;
    use std::thread::ThreadId;
    use std::time::Duration;

    #[derive(Default)]
    struct Capture {
        sent: Mutex<Vec<Bytes>>,
    }

    impl Capture {
        fn numbers(&self) -> Vec<i32> {
            let mut got: Vec<i32> = self
                .sent
                .lock()
                .iter()
                .filter_map(|data| Packet::decode(data).ok())
                .filter_map(|p| p.as_message().and_then(|m| m.args().first()?.as_i32()))
                .collect();
            got.sort();
            got
        }
    }

    #[async_trait]
    impl TransportSender for Capture {
        async fn send(&self, data: Bytes) -> oscine_transport::Result<()> {
            self.sent.lock().push(data);
            Ok(())
        }

        fn try_send(&self, data: Bytes) -> oscine_transport::Result<()> {
            self.sent.lock().push(data);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn close(&self) -> oscine_transport::Result<()> {
            Ok(())
        }
    }

    fn recording_pipeline() -> (Arc<Pipeline>, Arc<Mutex<Vec<(i32, ThreadId)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Arc::new(Dispatcher::new());
        let log = seen.clone();
        dispatcher
            .map(
                "/job",
                move |_: &str, _: &[Atom], args: &[Atom]| {
                    let n = args.first().and_then(Atom::as_i32).unwrap_or(-1);
                    log.lock().push((n, std::thread::current().id()));
                    Ok(Some(Message::new("/done", vec![Atom::Int(n)])?))
                },
                vec![],
            )
            .unwrap();
        (pipeline_for(dispatcher), seen)
    }

    fn pipeline_for(dispatcher: Arc<Dispatcher>) -> Arc<Pipeline> {
        Arc::new(Pipeline::new(
            dispatcher,
            &ServerConfig::default(),
            Arc::new(SystemClock),
        ))
    }

    fn message_job(address: &str, n: i32) -> Job {
        let data: Bytes = Message::new(address, vec![Atom::Int(n)])
            .unwrap()
            .encode()
            .unwrap();
        Job::new(data, None)
    }

    fn job(n: i32) -> Job {
        message_job("/job", n)
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("worker".parse::<Policy>().unwrap(), Policy::Worker);
        assert_eq!("Cooperative".parse::<Policy>().unwrap(), Policy::Cooperative);
        assert!("forking".parse::<Policy>().is_err());
    }

    #[tokio::test]
    async fn test_every_policy_runs_all_jobs() {
        for policy in Policy::ALL {
            let (pipeline, _) = recording_pipeline();
            let capture = Arc::new(Capture::default());
            let executor = executor_for(policy, pipeline).unwrap();
            assert_eq!(executor.policy(), policy);
            for n in 0..8 {
                executor.execute(job(n).with_reply(capture.clone())).await;
            }
            executor.drain().await;
            assert_eq!(executor.in_flight(), 0);
            assert_eq!(capture.numbers(), (0..8).collect::<Vec<_>>(), "policy {}", policy);
        }
    }

    #[tokio::test]
    async fn test_sequential_preserves_order_on_caller_thread() {
        let (pipeline, seen) = recording_pipeline();
        let executor = SequentialExecutor::new(pipeline);
        for n in 0..4 {
            executor.execute(job(n)).await;
        }
        let seen = seen.lock();
        assert_eq!(seen.iter().map(|(n, _)| *n).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_cooperative_uses_a_single_thread() {
        let (pipeline, seen) = recording_pipeline();
        let executor = CooperativeExecutor::new(pipeline).unwrap();
        for n in 0..16 {
            executor.execute(job(n)).await;
        }
        executor.drain().await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 16);
        let first = seen[0].1;
        assert!(seen.iter().all(|(_, t)| *t == first));
        assert_ne!(first, std::thread::current().id());
    }

    #[tokio::test]
    async fn test_cooperative_packets_interleave_at_await_points() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Arc::new(Dispatcher::new());
        let events = log.clone();
        dispatcher
            .map_async(
                "/slow",
                move |_: &str, _: &[Atom], args: &[Atom]| {
                    let events = events.clone();
                    let n = args.first().and_then(Atom::as_i32).unwrap_or(-1);
                    async move {
                        events.lock().push(format!("start {}", n));
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        events.lock().push(format!("end {}", n));
                        Ok::<_, anyhow::Error>(None::<Message>)
                    }
                },
                vec![],
            )
            .unwrap();

        let executor = CooperativeExecutor::new(pipeline_for(dispatcher)).unwrap();
        executor.execute(message_job("/slow", 1)).await;
        executor.execute(message_job("/slow", 2)).await;
        executor.drain().await;

        assert_eq!(*log.lock(), vec!["start 1", "start 2", "end 1", "end 2"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_isolated_handlers_run_in_a_separate_process() {
        let dispatcher = Arc::new(Dispatcher::new());
        let inner = dispatcher.clone();
        let server_pid = std::process::id();
        dispatcher
            .map(
                "/job",
                move |_: &str, _: &[Atom], _: &[Atom]| {
                    // only the child's copy of the table changes
                    inner.map("/added", |_: &str, _: &[Atom], _: &[Atom]| Ok(None), vec![])?;
                    let pid = std::process::id() as i32;
                    Ok(Some(Message::new("/pid", vec![Atom::Int(pid)])?))
                },
                vec![],
            )
            .unwrap();

        let capture = Arc::new(Capture::default());
        let executor = IsolatedExecutor::new(pipeline_for(dispatcher.clone()));
        executor.execute(job(1).with_reply(capture.clone())).await;
        executor.drain().await;

        assert_eq!(dispatcher.len(), 1);
        let pids = capture.numbers();
        assert_eq!(pids.len(), 1);
        assert_ne!(pids[0], server_pid as i32);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_isolated_abort_only_loses_its_packet() {
        let (pipeline, _) = recording_pipeline();
        pipeline
            .dispatcher()
            .map("/abort", |_: &str, _: &[Atom], _: &[Atom]| std::process::abort(), vec![])
            .unwrap();

        let capture = Arc::new(Capture::default());
        let executor = IsolatedExecutor::new(pipeline);
        executor.execute(message_job("/abort", 0).with_reply(capture.clone())).await;
        executor.execute(job(7).with_reply(capture.clone())).await;
        executor.drain().await;

        assert_eq!(capture.numbers(), vec![7]);
    }

    #[tokio::test]
    async fn test_drain_waits_for_connections() {
        let (pipeline, _) = recording_pipeline();
        let executor = WorkerExecutor::new(pipeline);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        executor
            .spawn_connection(Box::pin(async move {
                let _ = rx.await;
            }))
            .await;
        assert_eq!(executor.in_flight(), 1);

        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            let _ = tx.send(());
        });
        executor.drain().await;
        assert_eq!(executor.in_flight(), 0);
    }
}
