//! Single-threaded cooperative task queues.
//!
//! Every extension group runs on exactly one [`Runloop`], driven by
//! one OS thread. All work that touches an extension arrives here as a
//! posted task, which is what gives the runtime its ordering
//! guarantees:
//!
//! - tasks posted from one thread run in post order,
//! - tasks posted from different threads run in an order consistent
//!   with the happens-before of their posts,
//! - tasks run to completion; nothing preempts them.
//!
//! # Shutdown
//!
//! [`RunloopHandle::stop`] is cooperative: [`Runloop::run`] keeps
//! draining already-posted tasks, cancels pending timers, and only
//! then returns. Posts that arrive after the drain fail with
//! `RT_RUNLOOP_CLOSED` and the caller must treat the closure as never
//! executed.

use parking_lot::{Condvar, Mutex};
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::RuntimeError;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a timer created with [`RunloopHandle::post_timer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct TimerEntry {
    deadline: Instant,
    id: u64,
    task: Task,
}

// BinaryHeap is a max-heap; order entries so the earliest deadline is
// the maximum.
impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl Eq for TimerEntry {}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<Task>,
    timers: BinaryHeap<TimerEntry>,
    cancelled_timers: HashSet<u64>,
    next_timer_id: u64,
    stop_requested: bool,
    closed: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    cond: Condvar,
    name: String,
}

/// The consuming side of a task queue. Drive it with [`Runloop::run`]
/// on the thread that owns the queue.
pub struct Runloop {
    shared: Arc<Shared>,
}

/// Posting side of a [`Runloop`]. Cheap to clone, safe to send across
/// threads.
#[derive(Clone)]
pub struct RunloopHandle {
    shared: Arc<Shared>,
}

impl Runloop {
    /// Creates a runloop and its posting handle.
    #[must_use]
    pub fn new(name: impl Into<String>) -> (Self, RunloopHandle) {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            cond: Condvar::new(),
            name: name.into(),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            RunloopHandle { shared },
        )
    }

    /// Returns a posting handle.
    #[must_use]
    pub fn handle(&self) -> RunloopHandle {
        RunloopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Spawns a named OS thread driving a fresh runloop.
    ///
    /// Returns the posting handle and the join handle of the thread.
    #[must_use]
    pub fn spawn(name: impl Into<String>) -> (RunloopHandle, std::thread::JoinHandle<()>) {
        let name = name.into();
        let (runloop, handle) = Runloop::new(name.clone());
        let join = std::thread::Builder::new()
            .name(name)
            .spawn(move || runloop.run())
            .expect("spawn runloop thread");
        (handle, join)
    }

    /// Runs the queue to completion on the calling thread.
    ///
    /// Returns after [`RunloopHandle::stop`] has been observed and
    /// every non-timer task has been drained. Pending timers are
    /// cancelled.
    pub fn run(self) {
        debug!(runloop = %self.shared.name, "runloop started");

        loop {
            let task = {
                let mut state = self.shared.state.lock();
                loop {
                    // Promote due timers into the ordinary queue.
                    let now = Instant::now();
                    while state
                        .timers
                        .peek()
                        .is_some_and(|t| t.deadline <= now && !state.stop_requested)
                    {
                        let entry = state.timers.pop().expect("peeked");
                        if !state.cancelled_timers.remove(&entry.id) {
                            state.queue.push_back(entry.task);
                        }
                    }

                    if let Some(task) = state.queue.pop_front() {
                        break Some(task);
                    }
                    if state.stop_requested {
                        state.closed = true;
                        state.timers.clear();
                        state.cancelled_timers.clear();
                        break None;
                    }

                    match state.timers.peek().map(|t| t.deadline) {
                        Some(deadline) => {
                            self.shared.cond.wait_until(&mut state, deadline);
                        }
                        None => self.shared.cond.wait(&mut state),
                    }
                }
            };

            match task {
                Some(task) => {
                    trace!(runloop = %self.shared.name, "running task");
                    task();
                }
                None => break,
            }
        }

        debug!(runloop = %self.shared.name, "runloop stopped");
    }
}

impl RunloopHandle {
    fn post(&self, task: Task, front: bool) -> Result<(), RuntimeError> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(RuntimeError::RunloopClosed);
        }
        if front {
            state.queue.push_front(task);
        } else {
            state.queue.push_back(task);
        }
        drop(state);
        self.shared.cond.notify_one();
        Ok(())
    }

    /// Appends a task to the queue.
    ///
    /// # Errors
    ///
    /// `RT_RUNLOOP_CLOSED` once the loop has drained; the closure is
    /// dropped without running.
    pub fn post_tail(&self, f: impl FnOnce() + Send + 'static) -> Result<(), RuntimeError> {
        self.post(Box::new(f), false)
    }

    /// Prepends a task, jumping ahead of already-queued work.
    ///
    /// # Errors
    ///
    /// `RT_RUNLOOP_CLOSED` once the loop has drained.
    pub fn post_front(&self, f: impl FnOnce() + Send + 'static) -> Result<(), RuntimeError> {
        self.post(Box::new(f), true)
    }

    /// Schedules a task to run after `delay`.
    ///
    /// The task is dropped unexecuted if the loop stops first.
    ///
    /// # Errors
    ///
    /// `RT_RUNLOOP_CLOSED` once the loop has drained.
    pub fn post_timer(
        &self,
        delay: Duration,
        f: impl FnOnce() + Send + 'static,
    ) -> Result<TimerId, RuntimeError> {
        let mut state = self.shared.state.lock();
        if state.closed || state.stop_requested {
            return Err(RuntimeError::RunloopClosed);
        }
        let id = state.next_timer_id;
        state.next_timer_id += 1;
        state.timers.push(TimerEntry {
            deadline: Instant::now() + delay,
            id,
            task: Box::new(f),
        });
        drop(state);
        self.shared.cond.notify_one();
        Ok(TimerId(id))
    }

    /// Cancels a pending timer. Returns `false` if it already fired or
    /// was cancelled.
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        let mut state = self.shared.state.lock();
        let pending = state.timers.iter().any(|t| t.id == id.0);
        if pending && state.cancelled_timers.insert(id.0) {
            return true;
        }
        false
    }

    /// Requests the loop to stop after draining queued tasks.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        state.stop_requested = true;
        drop(state);
        self.shared.cond.notify_one();
    }

    /// Returns `true` once the loop has fully drained and no longer
    /// accepts posts.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Name of the loop, for logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

impl std::fmt::Debug for RunloopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunloopHandle")
            .field("name", &self.shared.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn tasks_run_in_post_order() {
        let (runloop, handle) = Runloop::new("t");
        let (tx, rx) = mpsc::channel();

        for i in 0..10 {
            let tx = tx.clone();
            handle.post_tail(move || tx.send(i).expect("send")).expect("post");
        }
        handle.stop();
        runloop.run();

        let got: Vec<i32> = rx.try_iter().collect();
        assert_eq!(got, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn post_front_jumps_queue() {
        let (runloop, handle) = Runloop::new("t");
        let (tx, rx) = mpsc::channel();

        let tx1 = tx.clone();
        handle.post_tail(move || tx1.send("tail").expect("send")).expect("post");
        let tx2 = tx.clone();
        handle.post_front(move || tx2.send("front").expect("send")).expect("post");
        handle.stop();
        runloop.run();

        let got: Vec<&str> = rx.try_iter().collect();
        assert_eq!(got, vec!["front", "tail"]);
    }

    #[test]
    fn run_drains_before_returning() {
        let (runloop, handle) = Runloop::new("t");
        let counter = Arc::new(AtomicUsize::new(0));

        // Stop first, then post; the posts land before run() observes
        // the stop, so they must still execute.
        handle.stop();
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            handle
                .post_tail(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .expect("post");
        }
        runloop.run();

        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert!(handle.is_closed());
    }

    #[test]
    fn post_after_close_fails() {
        let (runloop, handle) = Runloop::new("t");
        handle.stop();
        runloop.run();

        let err = handle.post_tail(|| {}).expect_err("closed");
        assert_eq!(err, RuntimeError::RunloopClosed);
    }

    #[test]
    fn cross_thread_posts_execute() {
        let (handle, join) = Runloop::spawn("worker");
        let (tx, rx) = mpsc::channel();

        let threads: Vec<_> = (0..4)
            .map(|i| {
                let handle = handle.clone();
                let tx = tx.clone();
                std::thread::spawn(move || {
                    handle
                        .post_tail(move || tx.send(i).expect("send"))
                        .expect("post");
                })
            })
            .collect();
        for t in threads {
            t.join().expect("join poster");
        }

        let mut got: Vec<i32> = (0..4).map(|_| rx.recv().expect("recv")).collect();
        got.sort_unstable();
        assert_eq!(got, vec![0, 1, 2, 3]);

        handle.stop();
        join.join().expect("join runloop");
    }

    #[test]
    fn timer_fires_after_delay() {
        let (handle, join) = Runloop::spawn("timer");
        let (tx, rx) = mpsc::channel();

        let started = Instant::now();
        handle
            .post_timer(Duration::from_millis(20), move || {
                tx.send(()).expect("send");
            })
            .expect("post timer");

        rx.recv_timeout(Duration::from_secs(2)).expect("timer fired");
        assert!(started.elapsed() >= Duration::from_millis(20));

        handle.stop();
        join.join().expect("join");
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let (runloop, handle) = Runloop::new("t");
        let fired = Arc::new(AtomicUsize::new(0));

        let fired2 = Arc::clone(&fired);
        let id = handle
            .post_timer(Duration::from_millis(1), move || {
                fired2.fetch_add(1, Ordering::SeqCst);
            })
            .expect("post timer");
        assert!(handle.cancel_timer(id));
        assert!(!handle.cancel_timer(id));

        std::thread::sleep(Duration::from_millis(10));
        handle.stop();
        runloop.run();

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stop_cancels_pending_timers() {
        let (runloop, handle) = Runloop::new("t");
        let fired = Arc::new(AtomicUsize::new(0));

        let fired2 = Arc::clone(&fired);
        handle
            .post_timer(Duration::from_secs(60), move || {
                fired2.fetch_add(1, Ordering::SeqCst);
            })
            .expect("post timer");

        handle.stop();
        runloop.run();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
