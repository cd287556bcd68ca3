use std::collections::HashMap;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tokio::sync::oneshot;

use super::tick_worker::TickWorker;
use crate::audio::lock;
use crate::error::{Error, Result};

/// Timers due within this window of each other fire on the same wake-up.
pub const MERGE_THRESHOLD: Duration = Duration::from_millis(10);

type Job = Box<dyn FnOnce() + Send>;

struct Timer {
    callback: Box<dyn FnMut() + Send>,
    interval: Duration,
    last_fire: Instant,
    enabled: Arc<AtomicBool>,
}

impl Timer {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// `None` when the interval is too large to ever come due.
    fn due(&self) -> Option<Instant> {
        self.last_fire.checked_add(self.interval)
    }
}

/// Changes to the timer set, applied by the worker between steps.
enum TimerOp {
    Add(u64, Timer),
    Restart(u64),
    Remove(u64),
}

/// Timers owned by the worker loop. Nothing else touches them, so the loop
/// needs no lock to scan or fire them.
struct TimerSet {
    name: String,
    ops: Receiver<TimerOp>,
    timers: HashMap<u64, Timer>,
    // cached absolute due time of the earliest timer, None when unknown
    next_due: Option<Instant>,
}

impl TimerSet {
    fn new(name: String, ops: Receiver<TimerOp>) -> Self {
        Self {
            name,
            ops,
            timers: HashMap::new(),
            next_due: None,
        }
    }

    fn apply_ops(&mut self) {
        while let Ok(op) = self.ops.try_recv() {
            match op {
                TimerOp::Add(id, timer) => {
                    self.timers.insert(id, timer);
                }
                TimerOp::Restart(id) => {
                    if let Some(timer) = self.timers.get_mut(&id) {
                        timer.last_fire = Instant::now();
                    }
                }
                TimerOp::Remove(id) => {
                    self.timers.remove(&id);
                }
            }
            self.next_due = None;
        }
    }

    /// Fire every due timer and return how long the worker may block before
    /// the next one is due. `None` means no timer can come due.
    fn dispatch(&mut self, queued: usize) -> Option<Duration> {
        self.apply_ops();
        let now = Instant::now();

        if !self.timers.values().any(Timer::is_enabled) {
            self.next_due = None;
            return None;
        }

        // Under load, keep draining the queue instead of rescanning every
        // timer per task, as long as nothing is about to become due.
        if queued > 0
            && let Some(due) = self.next_due
            && now + MERGE_THRESHOLD < due
        {
            log::trace!("[{}] Quick return", self.name);
            return Some(due - now);
        }

        log::trace!("[{}] Recalc", self.name);
        let mut fired = Vec::new();
        let mut wait = None::<Duration>;
        for (id, timer) in self.timers.iter().filter(|(_, t)| t.is_enabled()) {
            let Some(due) = timer.due() else {
                continue;
            };
            let timer_wait = if due <= now {
                fired.push(*id);
                timer.interval
            } else {
                due - now
            };
            wait = Some(wait.map_or(timer_wait, |wait| wait.min(timer_wait)));
        }

        let wait = wait.map(|wait| wait.max(MERGE_THRESHOLD));
        self.next_due = wait.and_then(|wait| now.checked_add(wait));

        for id in fired {
            // an earlier callback in this round may have dropped or disabled it
            self.apply_ops();
            let Some(timer) = self.timers.get_mut(&id) else {
                continue;
            };
            if !timer.is_enabled() {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| (timer.callback)())).is_err() {
                log::error!("[{}] Timer callback panicked", self.name);
            }
            timer.last_fire = Instant::now();
        }

        wait
    }
}

pub(crate) struct Inner {
    name: String,
    queue: Mutex<Option<Sender<Job>>>,
    timer_ops: Sender<TimerOp>,
    next_timer_id: AtomicU64,
    timer_count: AtomicUsize,
    thread_id: OnceLock<ThreadId>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    pub(crate) fn is_own_thread(&self) -> bool {
        self.thread_id.get() == Some(&thread::current().id())
    }

    pub(crate) fn invoke<T, F>(&self, f: F) -> Completion<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        if self.is_own_thread() {
            let _ = tx.send(f());
        } else {
            self.enqueue(Box::new(move || {
                let _ = tx.send(f());
            }));
        }
        Completion { rx }
    }

    fn enqueue(&self, job: Job) {
        match lock(&self.queue).as_ref() {
            Some(queue) => {
                if queue.send(job).is_err() {
                    log::debug!("[{}] Dropping task, worker is gone", self.name);
                }
            }
            None => log::debug!("[{}] Dropping task, scheduler closed", self.name),
        }
    }

    fn send_timer_op(&self, op: TimerOp) {
        if self.timer_ops.send(op).is_err() {
            log::debug!("[{}] Dropping timer change, worker is gone", self.name);
        }
    }

    /// Must run on the worker thread.
    pub(crate) fn set_timer_enabled(&self, id: u64, flag: &AtomicBool, enabled: bool) {
        let was_enabled = flag.swap(enabled, Ordering::AcqRel);
        if enabled && !was_enabled {
            self.send_timer_op(TimerOp::Restart(id));
        }
    }

    /// Must run on the worker thread.
    pub(crate) fn remove_timer(&self, id: u64) {
        self.timer_count.fetch_sub(1, Ordering::AcqRel);
        self.send_timer_op(TimerOp::Remove(id));
    }
}

/// Handle to a dedicated worker thread.
///
/// Clones share the same worker. The worker stops once [`dispose`] was called
/// and the queue is drained, or when the last handle is dropped.
///
/// [`dispose`]: DedicatedScheduler::dispose
#[derive(Clone)]
pub struct DedicatedScheduler {
    inner: Arc<Inner>,
}

impl DedicatedScheduler {
    /// Start a new worker thread named `scheduler[{name}]`.
    pub fn new(name: &str) -> Result<Self> {
        let (queue_tx, queue_rx) = crossbeam_channel::unbounded::<Job>();
        let (ops_tx, ops_rx) = crossbeam_channel::unbounded::<TimerOp>();
        let inner = Arc::new(Inner {
            name: name.to_string(),
            queue: Mutex::new(Some(queue_tx)),
            timer_ops: ops_tx,
            next_timer_id: AtomicU64::new(0),
            timer_count: AtomicUsize::new(0),
            thread_id: OnceLock::new(),
            handle: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let timers = TimerSet::new(name.to_string(), ops_rx);
        let handle = thread::Builder::new()
            .name(format!("scheduler[{}]", name))
            .spawn(move || work(weak, queue_rx, timers))?;
        let _ = inner.thread_id.set(handle.thread().id());
        *lock(&inner.handle) = Some(handle);

        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_own_thread(&self) -> bool {
        self.inner.is_own_thread()
    }

    /// Fail with [`Error::NotOwnThread`] unless called on the worker.
    pub fn check_own_thread(&self) -> Result<()> {
        if self.is_own_thread() {
            Ok(())
        } else {
            Err(Error::NotOwnThread)
        }
    }

    /// Run `f` on the worker. Runs inline when already on the worker,
    /// otherwise queues it behind everything submitted before.
    pub fn invoke<T, F>(&self, f: F) -> Completion<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.inner.invoke(f)
    }

    /// Register a periodic callback. Only allowed on the worker thread.
    ///
    /// The callback first fires one `interval` after it is enabled, then
    /// again `interval` after each previous call returned. Callbacks should
    /// not hold a strong scheduler handle, or the worker outlives every
    /// outside handle.
    pub fn create_timer<F>(&self, callback: F, interval: Duration, active: bool) -> Result<TickWorker>
    where
        F: FnMut() + Send + 'static,
    {
        self.check_own_thread()?;

        let id = self.inner.next_timer_id.fetch_add(1, Ordering::Relaxed);
        let enabled = Arc::new(AtomicBool::new(active));
        self.inner.send_timer_op(TimerOp::Add(
            id,
            Timer {
                callback: Box::new(callback),
                interval,
                last_fire: Instant::now(),
                enabled: enabled.clone(),
            },
        ));
        self.inner.timer_count.fetch_add(1, Ordering::AcqRel);

        Ok(TickWorker::new(id, Arc::downgrade(&self.inner), enabled, interval))
    }

    /// Number of registered timers, enabled or not.
    pub fn timer_count(&self) -> usize {
        self.inner.timer_count.load(Ordering::Acquire)
    }

    /// Stop accepting work. Already queued tasks still run. When called off
    /// the worker this blocks until the worker has exited.
    pub fn dispose(&self) {
        if lock(&self.inner.queue).take().is_none() {
            return;
        }
        log::debug!("[{}] Closing scheduler", self.inner.name);

        if self.is_own_thread() {
            return;
        }
        if let Some(handle) = lock(&self.inner.handle).take()
            && handle.join().is_err()
        {
            log::error!("[{}] Worker thread panicked", self.inner.name);
        }
    }
}

fn work(inner: Weak<Inner>, queue: Receiver<Job>, mut timers: TimerSet) {
    let name = timers.name.clone();
    log::debug!("[{}] Scheduler worker started", name);

    loop {
        if inner.strong_count() == 0 {
            break;
        }
        let wait = timers.dispatch(queue.len());

        let job = match wait {
            Some(wait) => match queue.recv_timeout(wait) {
                Ok(job) => job,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match queue.recv() {
                Ok(job) => job,
                Err(_) => break,
            },
        };

        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            log::error!("[{}] Task panicked", name);
        }
    }

    log::debug!("[{}] Scheduler worker stopped", name);
}

/// Result of a task handed to [`DedicatedScheduler::invoke`].
///
/// Await it from async code or [`wait`](Completion::wait) for it from a plain
/// thread. Resolves to [`Error::SchedulerClosed`] when the task never ran to
/// completion, because the scheduler was closed or the task panicked.
pub struct Completion<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Completion<T> {
    pub(crate) fn closed() -> Self {
        let (_, rx) = oneshot::channel();
        Self { rx }
    }

    /// Block the calling thread until the task finished. Must not be called
    /// from inside an async runtime.
    pub fn wait(self) -> Result<T> {
        self.rx.blocking_recv().map_err(|_| Error::SchedulerClosed)
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| Error::SchedulerClosed))
    }
}
