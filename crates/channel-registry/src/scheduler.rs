use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// One-shot work item run by a [`Scheduler`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Handle of a scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CancelToken(u64);

impl fmt::Display for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("event {0} already fired or is unknown")]
    AlreadyFired(CancelToken),
}

/// Schedule-after / cancel contract used for retries and periodic timers.
pub trait Scheduler: Send + Sync {
    fn after(&self, delay: Duration, task: Task) -> CancelToken;

    /// Cancel a pending event. Fails when the event has already fired.
    fn cancel(&self, token: CancelToken) -> Result<(), SchedulerError>;
}

/// [`Scheduler`] backed by a tokio runtime; each event is a sleeping task.
pub struct TokioScheduler {
    handle: Handle,
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, AbortHandle>>>,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl Scheduler for TokioScheduler {
    fn after(&self, delay: Duration, task: Task) -> CancelToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pending = self.pending.clone();
        // Held across spawn so the task cannot look itself up before it is registered.
        let mut guard = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let still_pending = pending
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .remove(&id)
                .is_some();
            if still_pending {
                task();
            }
        });
        guard.insert(id, join.abort_handle());
        CancelToken(id)
    }

    fn cancel(&self, token: CancelToken) -> Result<(), SchedulerError> {
        let handle = self
            .pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&token.0)
            .ok_or(SchedulerError::AlreadyFired(token))?;
        handle.abort();
        Ok(())
    }
}

/// Record of one `after` call made on a [`ManualScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledEvent {
    pub token: CancelToken,
    pub at: Duration,
    pub delay: Duration,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_id: u64,
    queue: BTreeMap<(Duration, u64), Task>,
    due: HashMap<u64, Duration>,
    log: Vec<ScheduledEvent>,
}

/// Deterministic [`Scheduler`] driven by a virtual clock.
///
/// Nothing fires until [`ManualScheduler::advance`] is called; tasks then run
/// on the caller's thread in due order.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn now(&self) -> Duration {
        self.lock().now
    }

    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Every event ever scheduled, in call order.
    pub fn history(&self) -> Vec<ScheduledEvent> {
        self.lock().log.clone()
    }

    /// Move the clock forward, running every task that falls due.
    /// Tasks scheduled by those tasks run too if they fall within the window.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now() + by;
        let mut ran = 0;
        loop {
            let next = {
                let mut state = self.lock();
                let key = match state.queue.keys().next() {
                    Some(&(at, id)) if at <= target => (at, id),
                    _ => break,
                };
                state.due.remove(&key.1);
                state.now = key.0;
                state.queue.remove(&key)
            };
            if let Some(task) = next {
                task();
                ran += 1;
            }
        }
        self.lock().now = target;
        ran
    }
}

impl Scheduler for ManualScheduler {
    fn after(&self, delay: Duration, task: Task) -> CancelToken {
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        let at = state.now + delay;
        let token = CancelToken(id);
        state.queue.insert((at, id), task);
        state.due.insert(id, at);
        state.log.push(ScheduledEvent { token, at, delay });
        token
    }

    fn cancel(&self, token: CancelToken) -> Result<(), SchedulerError> {
        let mut state = self.lock();
        let at = state
            .due
            .remove(&token.0)
            .ok_or(SchedulerError::AlreadyFired(token))?;
        state.queue.remove(&(at, token.0));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_manual_runs_in_due_order() {
        let sched = ManualScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (delay, tag) in [(3, "c"), (1, "a"), (2, "b")] {
            let order = order.clone();
            sched.after(
                Duration::from_secs(delay),
                Box::new(move || order.lock().unwrap().push(tag)),
            );
        }
        assert_eq!(sched.advance(Duration::from_millis(1500)), 1);
        assert_eq!(sched.advance(Duration::from_secs(5)), 2);
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(sched.now(), Duration::from_millis(6500));
    }

    #[test]
    fn test_manual_cancel_after_fire_fails() {
        let sched = ManualScheduler::new();
        let token = sched.after(Duration::from_secs(1), Box::new(|| {}));
        let other = sched.after(Duration::from_secs(2), Box::new(|| {}));
        assert_eq!(sched.cancel(other), Ok(()));
        sched.advance(Duration::from_secs(5));
        assert_eq!(sched.cancel(token), Err(SchedulerError::AlreadyFired(token)));
        assert_eq!(sched.pending(), 0);
        assert_eq!(sched.history().len(), 2);
    }

    #[test]
    fn test_manual_task_can_reschedule() {
        let sched = Arc::new(ManualScheduler::new());
        let count = Arc::new(AtomicUsize::new(0));

        fn tick(sched: Arc<ManualScheduler>, count: Arc<AtomicUsize>) {
            count.fetch_add(1, Ordering::SeqCst);
            let s = sched.clone();
            sched.after(Duration::from_secs(2), Box::new(move || tick(s, count)));
        }

        let (s, c) = (sched.clone(), count.clone());
        sched.after(Duration::from_secs(2), Box::new(move || tick(s, c)));
        sched.advance(Duration::from_secs(7));
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(sched.pending(), 1);
    }

    #[tokio::test]
    async fn test_tokio_fire_and_cancel() {
        let sched = TokioScheduler::new(Handle::current());
        let fired = Arc::new(AtomicUsize::new(0));

        let f = fired.clone();
        let keep = sched.after(
            Duration::from_millis(20),
            Box::new(move || {
                f.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let f = fired.clone();
        let drop_me = sched.after(
            Duration::from_millis(20),
            Box::new(move || {
                f.fetch_add(10, Ordering::SeqCst);
            }),
        );
        assert_eq!(sched.cancel(drop_me), Ok(()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(sched.cancel(keep), Err(SchedulerError::AlreadyFired(keep)));
        assert_eq!(sched.pending(), 0);
    }
}
