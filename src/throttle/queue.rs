//! Interval-paced task queue.
//!
//! Tasks are buffered until the queue is started, then released one per
//! `interval`, highest priority first. Dispatch is "fire and track": each
//! operation runs on its own tokio task and the ticker never waits for it.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::error::TaskError;
use super::priority::{DEFAULT_PRIORITY, PendingQueue, Priority};

/// Polling resolution used when none is given.
pub const DEFAULT_TICK: Duration = Duration::from_millis(10);

const MIN_TICK: Duration = Duration::from_millis(1);

/// Pacing parameters for a [`ThrottleQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Minimum spacing between two dispatches
    pub interval: Duration,
    /// How often the queue checks whether a dispatch is due
    pub tick: Duration,
}

impl ThrottleConfig {
    /// Pace at `interval` with the default tick
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            tick: DEFAULT_TICK,
        }
    }

    /// Override the polling resolution
    pub const fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Tick actually used: never longer than the interval, never zero.
    pub fn effective_tick(&self) -> Duration {
        self.tick.min(self.interval).max(MIN_TICK)
    }
}

type Running = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A pending task with its result type erased.
trait Job: Send {
    /// Future that invokes the operation and settles the task.
    fn dispatch(self: Box<Self>) -> Running;

    /// Settle without running.
    fn cancel(self: Box<Self>);
}

struct Task<F, T, E> {
    operation: F,
    tx: oneshot::Sender<Result<T, TaskError<E>>>,
}

impl<F, Fut, T, E> Job for Task<F, T, E>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    fn dispatch(self: Box<Self>) -> Running {
        let Task { operation, tx } = *self;
        // A panic while building the future must stay inside the spawned task.
        Box::pin(async move {
            let result = operation().await.map_err(TaskError::Operation);
            // The caller may have dropped its settlement; nobody to tell.
            let _ = tx.send(result);
        })
    }

    fn cancel(self: Box<Self>) {
        let _ = self.tx.send(Err(TaskError::Cancelled));
    }
}

/// Future returned by [`ThrottleQueue::enqueue`].
///
/// Resolves exactly once: with the operation's value, its error wrapped in
/// [`TaskError::Operation`], or [`TaskError::Cancelled`] if the task was
/// cleared before dispatch. Dropping it does not remove the task.
#[derive(Debug)]
#[must_use = "a settlement does nothing unless awaited; the task is queued regardless"]
pub struct Settlement<T, E> {
    rx: oneshot::Receiver<Result<T, TaskError<E>>>,
}

impl<T, E> Future for Settlement<T, E> {
    type Output = Result<T, TaskError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(TaskError::Abandoned)))
    }
}

struct State {
    pending: PendingQueue<Box<dyn Job>>,
    last_dispatch: Option<Instant>,
    ticker: Option<JoinHandle<()>>,
    next_dispatch: u64,
    /// Dispatched tasks that have not finished; each receiver closes when its task ends.
    running: HashMap<u64, watch::Receiver<()>>,
}

impl State {
    /// Register a dispatch. The guard unregisters it when the task ends.
    fn track(&mut self, inner: &Arc<Inner>) -> (InFlightGuard, watch::Receiver<()>) {
        let id = self.next_dispatch;
        self.next_dispatch += 1;
        let (done, settled) = watch::channel(());
        self.running.insert(id, settled.clone());
        let guard = InFlightGuard {
            inner: Arc::downgrade(inner),
            id,
            _done: done,
        };
        (guard, settled)
    }
}

struct Inner {
    config: ThrottleConfig,
    state: Mutex<State>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One ticker step: dispatch the head task if the interval has elapsed.
    fn tick(self: &Arc<Self>, now: Instant) {
        let (job, guard) = {
            let mut state = self.lock();
            let due = state
                .last_dispatch
                .is_none_or(|last| now.duration_since(last) >= self.config.interval);
            if !due {
                return;
            }
            let Some(job) = state.pending.pop() else {
                return;
            };
            state.last_dispatch = Some(now);
            tracing::trace!(remaining = state.pending.len(), "dispatching queued task");
            let (guard, _) = state.track(self);
            (job, guard)
        };
        spawn_job(job, guard);
    }
}

fn spawn_job(job: Box<dyn Job>, guard: InFlightGuard) {
    tokio::spawn(async move {
        let _guard = guard;
        job.dispatch().await;
    });
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
    }
}

/// Keeps a dispatched task registered until its future completes (or unwinds).
struct InFlightGuard {
    inner: Weak<Inner>,
    id: u64,
    /// Dropped last, which closes every receiver waiting on this task.
    _done: watch::Sender<()>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.lock().running.remove(&self.id);
        }
    }
}

async fn run_ticker(inner: Weak<Inner>, tick: Duration) {
    let mut ticks = tokio::time::interval_at(Instant::now() + tick, tick);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticks.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.tick(Instant::now());
    }
}

/// Priority-aware throttled work queue.
///
/// Cloning yields another handle to the same queue; share one queue per
/// rate-limited target.
///
/// All methods that may spawn (`start`, `flush`) must run inside a Tokio runtime.
#[derive(Clone)]
pub struct ThrottleQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ThrottleQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottleQueue")
            .field("config", &self.inner.config)
            .field("pending", &self.len())
            .field("in_flight", &self.in_flight())
            .field("running", &self.is_running())
            .finish()
    }
}

impl ThrottleQueue {
    /// Create an idle queue.
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State {
                    pending: PendingQueue::new(),
                    last_dispatch: None,
                    ticker: None,
                    next_dispatch: 0,
                    running: HashMap::new(),
                }),
            }),
        }
    }

    /// Shorthand for `ThrottleQueue::new(ThrottleConfig::new(interval))`.
    pub fn with_interval(interval: Duration) -> Self {
        Self::new(ThrottleConfig::new(interval))
    }

    /// Pacing parameters
    pub fn config(&self) -> ThrottleConfig {
        self.inner.config
    }

    /// Queue `operation` at the default priority.
    pub fn enqueue<F, Fut, T, E>(&self, operation: F) -> Settlement<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.enqueue_with_priority(operation, DEFAULT_PRIORITY)
    }

    /// Queue `operation`; higher `priority` dispatches sooner, ties keep
    /// insertion order. Nothing runs until the queue is started or flushed.
    pub fn enqueue_with_priority<F, Fut, T, E>(
        &self,
        operation: F,
        priority: Priority,
    ) -> Settlement<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Box<dyn Job> = Box::new(Task { operation, tx });

        let queued = {
            let mut state = self.inner.lock();
            state.pending.push(job, priority);
            state.pending.len()
        };
        tracing::trace!(priority, queued, "task enqueued");

        Settlement { rx }
    }

    /// Begin dispatching. No-op if already running.
    pub fn start(&self) {
        let mut state = self.inner.lock();
        if state.ticker.is_some() {
            return;
        }
        let tick = self.inner.config.effective_tick();
        state.ticker = Some(tokio::spawn(run_ticker(Arc::downgrade(&self.inner), tick)));
        tracing::debug!(
            interval = ?self.inner.config.interval,
            tick = ?tick,
            pending = state.pending.len(),
            "throttle queue started"
        );
    }

    /// Stop dispatching. Pending tasks stay queued.
    pub fn stop(&self) {
        let ticker = self.inner.lock().ticker.take();
        if let Some(ticker) = ticker {
            ticker.abort();
            tracing::debug!("throttle queue stopped");
        }
    }

    /// Discard every pending task, settling each with [`TaskError::Cancelled`].
    ///
    /// In-flight tasks are not touched. Returns how many tasks were discarded.
    pub fn clear(&self) -> usize {
        let jobs = self.inner.lock().pending.drain_ordered();
        let discarded = jobs.len();
        for job in jobs {
            job.cancel();
        }
        if discarded > 0 {
            tracing::debug!(discarded, "throttle queue cleared");
        }
        discarded
    }

    /// Dispatch every pending task immediately, then wait until those tasks
    /// and anything already in flight have settled.
    ///
    /// Work dispatched by the ticker after this call is not waited for.
    /// Does not start the queue.
    pub async fn flush(&self) {
        let (dispatched, waiting) = {
            let mut state = self.inner.lock();
            let mut waiting: Vec<watch::Receiver<()>> = state.running.values().cloned().collect();
            let jobs = state.pending.drain_ordered();
            if !jobs.is_empty() {
                state.last_dispatch = Some(Instant::now());
            }
            let dispatched: Vec<_> = jobs
                .into_iter()
                .map(|job| {
                    let (guard, settled) = state.track(&self.inner);
                    waiting.push(settled);
                    (job, guard)
                })
                .collect();
            (dispatched, waiting)
        };

        tracing::debug!(
            dispatching = dispatched.len(),
            waiting = waiting.len(),
            "flushing throttle queue"
        );
        for (job, guard) in dispatched {
            spawn_job(job, guard);
        }

        for mut settled in waiting {
            // Never sent on; this returns once the task's guard is dropped.
            let _ = settled.changed().await;
        }
    }

    /// Number of tasks not yet dispatched.
    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Whether no task is waiting for dispatch
    pub fn is_empty(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }

    /// Number of dispatched tasks that have not settled yet
    pub fn in_flight(&self) -> usize {
        self.inner.lock().running.len()
    }

    /// Whether the ticker is active
    pub fn is_running(&self) -> bool {
        self.inner.lock().ticker.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_pending, task};

    type Log<T> = Arc<Mutex<Vec<T>>>;

    fn paced(interval_ms: u64) -> ThrottleQueue {
        ThrottleQueue::new(
            ThrottleConfig::new(Duration::from_millis(interval_ms))
                .with_tick(Duration::from_millis(10)),
        )
    }

    /// Enqueue a task that logs `(id, dispatch instant)` when invoked.
    fn logged(
        queue: &ThrottleQueue,
        log: &Log<(usize, Instant)>,
        id: usize,
        priority: Priority,
    ) -> Settlement<usize, String> {
        let log = Arc::clone(log);
        queue.enqueue_with_priority(
            move || {
                log.lock().unwrap().push((id, Instant::now()));
                async move { Ok(id) }
            },
            priority,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatches_are_spaced_by_interval() {
        let queue = paced(100);
        let log: Log<(usize, Instant)> = Arc::default();
        let settlements: Vec<_> = (0..4).map(|i| logged(&queue, &log, i, 0)).collect();

        let started = Instant::now();
        queue.start();
        for settlement in settlements {
            settlement.await.unwrap();
        }

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 4);
        assert!(log[0].1.duration_since(started) <= Duration::from_millis(10));
        for pair in log.windows(2) {
            assert!(pair[1].1.duration_since(pair[0].1) >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_then_insertion_order() {
        let queue = paced(50);
        let log: Log<(usize, Instant)> = Arc::default();
        let settlements: Vec<_> = [1, 1, 5, 1]
            .into_iter()
            .enumerate()
            .map(|(id, priority)| logged(&queue, &log, id, priority))
            .collect();

        queue.start();
        for settlement in settlements {
            settlement.await.unwrap();
        }

        let order: Vec<usize> = log.lock().unwrap().iter().map(|(id, _)| *id).collect();
        assert_eq!(order, vec![2, 0, 1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_high_priority_overtakes_pending_work() {
        let queue = paced(100);
        let log: Log<(usize, Instant)> = Arc::default();
        let first = logged(&queue, &log, 0, 0);
        let second = logged(&queue, &log, 1, 0);

        queue.start();
        first.await.unwrap();
        let urgent = logged(&queue, &log, 2, 10);
        urgent.await.unwrap();
        second.await.unwrap();

        let order: Vec<usize> = log.lock().unwrap().iter().map(|(id, _)| *id).collect();
        assert_eq!(order, vec![0, 2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cancels_pending_tasks() {
        let queue = paced(100);
        let calls = Arc::new(AtomicUsize::new(0));
        let settlements: Vec<Settlement<(), String>> = (0..3)
            .map(|_| {
                let calls = Arc::clone(&calls);
                queue.enqueue(move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        assert_eq!(queue.clear(), 3);
        assert_eq!(queue.len(), 0);
        for settlement in settlements {
            assert!(settlement.await.unwrap_err().is_cancelled());
        }

        queue.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_leaves_in_flight_work_alone() {
        let queue = paced(100);
        let (dispatched_tx, dispatched_rx) = oneshot::channel();
        let slow: Settlement<&str, String> = queue.enqueue(move || {
            let _ = dispatched_tx.send(());
            async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok("done")
            }
        });
        let waiting: Settlement<&str, String> = queue.enqueue(|| async { Ok("never") });

        queue.start();
        dispatched_rx.await.unwrap();
        assert_eq!(queue.clear(), 1);

        assert_eq!(slow.await.unwrap(), "done");
        assert!(waiting.await.unwrap_err().is_cancelled());
        assert!(queue.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_drains_without_waiting_for_interval() {
        let queue = paced(5000);
        let calls = Arc::new(AtomicUsize::new(0));
        let settlements: Vec<Settlement<usize, String>> = (0..3)
            .map(|i| {
                let calls = Arc::clone(&calls);
                queue.enqueue(move || async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(i)
                })
            })
            .collect();

        let started = Instant::now();
        queue.flush().await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(queue.is_empty());
        assert_eq!(queue.in_flight(), 0);
        assert!(!queue.is_running());
        for (i, settlement) in settlements.into_iter().enumerate() {
            assert_eq!(settlement.await.unwrap(), i);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_waits_for_earlier_dispatches() {
        let queue = paced(100);
        let finished = Arc::new(AtomicUsize::new(0));
        let (dispatched_tx, dispatched_rx) = oneshot::channel();
        let done = Arc::clone(&finished);
        let _slow: Settlement<(), String> = queue.enqueue(move || {
            let _ = dispatched_tx.send(());
            async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        queue.start();
        dispatched_rx.await.unwrap();
        assert_eq!(queue.in_flight(), 1);

        queue.flush().await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_ignores_work_dispatched_after_it() {
        let queue = paced(20);
        let slow = || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, String>(())
        };
        let first = queue.enqueue(slow);
        let second = queue.enqueue(slow);
        queue.start();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                loop {
                    let _ = queue.enqueue(slow);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        let flushed = tokio::time::timeout(Duration::from_secs(5), queue.flush()).await;
        assert!(flushed.is_ok(), "flush kept waiting for newer dispatches");
        assert!(first.await.is_ok());
        assert!(second.await.is_ok());
        assert!(queue.is_running());

        producer.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_operation_is_abandoned_and_queue_keeps_going() {
        let queue = paced(50);
        let bad: Settlement<u32, String> = queue.enqueue(|| -> std::future::Ready<Result<u32, String>> {
            panic!("operation blew up before returning its future")
        });
        let good: Settlement<u32, String> = queue.enqueue(|| async { Ok(7) });

        queue.start();
        assert!(matches!(bad.await, Err(TaskError::Abandoned)));
        let good = tokio::time::timeout(Duration::from_secs(10), good).await;
        assert_eq!(good.unwrap().unwrap(), 7);

        assert!(queue.is_running());
        queue.flush().await;
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_survives_panicking_operation() {
        let queue = paced(1000);
        let bad: Settlement<u32, String> = queue.enqueue(|| async {
            if u32::MAX > 0 {
                panic!("operation blew up while running");
            }
            Ok(0)
        });
        let good: Settlement<u32, String> = queue.enqueue(|| async { Ok(1) });

        queue.flush().await;

        assert!(matches!(bad.await, Err(TaskError::Abandoned)));
        assert_eq!(good.await.unwrap(), 1);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_dispatches_before_start() {
        let queue = paced(100);
        let calls = Arc::new(AtomicUsize::new(0));
        let settlements: Vec<Settlement<(), String>> = (0..3)
            .map(|_| {
                let calls = Arc::clone(&calls);
                queue.enqueue(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.len(), 3);
        assert!(!queue.is_running());

        let mut settlements = settlements.into_iter();
        let mut first = task::spawn(settlements.next().unwrap());
        assert_pending!(first.poll());

        queue.start();
        (&mut *first).await.unwrap();
        for settlement in settlements {
            settlement.await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_failure_does_not_disrupt_queue() {
        let queue = paced(100);
        let log: Log<Instant> = Arc::default();
        let settlements: Vec<Settlement<usize, String>> = (0..3)
            .map(|i| {
                let log = Arc::clone(&log);
                queue.enqueue(move || {
                    log.lock().unwrap().push(Instant::now());
                    async move {
                        if i == 1 {
                            Err(format!("request {i} failed"))
                        } else {
                            Ok(i)
                        }
                    }
                })
            })
            .collect();

        queue.start();
        let results: Vec<_> = {
            let mut results = Vec::new();
            for settlement in settlements {
                results.push(settlement.await);
            }
            results
        };

        assert_eq!(results[0].as_ref().unwrap(), &0);
        match &results[1] {
            Err(TaskError::Operation(message)) => assert_eq!(message, "request 1 failed"),
            other => panic!("expected operation error, got {other:?}"),
        }
        assert_eq!(results[2].as_ref().unwrap(), &2);

        let log = log.lock().unwrap();
        assert!(log[2].duration_since(log[1]) >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_keeps_pending_tasks() {
        let queue = paced(100);
        let log: Log<(usize, Instant)> = Arc::default();
        let mut settlements: Vec<_> = (0..3).map(|i| logged(&queue, &log, i, 0)).collect();

        queue.start();
        queue.start();
        assert!(queue.is_running());
        settlements.remove(0).await.unwrap();
        queue.stop();
        assert!(!queue.is_running());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(queue.len(), 2);
        assert_eq!(log.lock().unwrap().len(), 1);

        queue.start();
        for settlement in settlements {
            settlement.await.unwrap();
        }
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_queue_abandons_pending_tasks() {
        let queue = paced(100);
        let settlement: Settlement<(), String> = queue.enqueue(|| async { Ok(()) });
        drop(queue);

        assert!(matches!(settlement.await, Err(TaskError::Abandoned)));
    }

    #[test]
    fn test_tick_is_clamped_to_interval() {
        let config = ThrottleConfig::new(Duration::from_millis(5)).with_tick(Duration::from_millis(50));
        assert_eq!(config.effective_tick(), Duration::from_millis(5));

        let zero = ThrottleConfig::new(Duration::ZERO);
        assert_eq!(zero.effective_tick(), MIN_TICK);
    }
}
