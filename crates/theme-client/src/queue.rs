//! Asynchronous icon request queue.
//!
//! Lookups issued through the queue run one at a time in FIFO order on a
//! driver task. Each entry gets a [`Ticket`]:
//! - cancelling a queued entry removes it; its callback never runs
//! - cancelling the entry in flight lets the call finish, then releases
//!   the icon the server handed out instead of running the callback

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use theme_ipc::{IconId, IconKey, SharedIconInfo};
use tokio::sync::Notify;
use tracing::debug;

/// What the queue needs from a client.
#[async_trait]
pub trait IconService: Send + Sync + 'static {
    async fn lookup_icon(&self, key: &IconKey) -> SharedIconInfo;

    /// Drop the reference a successful lookup took.
    async fn release_icon(&self, id: &IconId);
}

/// Identifies one queued lookup.
pub type Ticket = u64;

type Callback = Box<dyn FnOnce(SharedIconInfo) + Send + 'static>;

struct Entry {
    ticket: Ticket,
    key: IconKey,
    callback: Callback,
}

struct InFlight {
    ticket: Ticket,
    cancelled: Arc<AtomicBool>,
}

#[derive(Default)]
struct QueueState {
    waiting: VecDeque<Entry>,
    in_flight: Option<InFlight>,
    running: bool,
}

/// FIFO of icon lookups with at most one call in flight.
pub struct AsyncRequestQueue<S: IconService> {
    service: Arc<S>,
    state: Arc<Mutex<QueueState>>,
    next_ticket: AtomicU64,
    idle: Arc<Notify>,
}

impl<S: IconService> AsyncRequestQueue<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self {
            service,
            state: Arc::new(Mutex::new(QueueState::default())),
            next_ticket: AtomicU64::new(1),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Queue a lookup. `callback` runs on the driver task with the result.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue<F>(&self, key: IconKey, callback: F) -> Ticket
    where
        F: FnOnce(SharedIconInfo) + Send + 'static,
    {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let start = {
            let mut state = self.state.lock();
            state.waiting.push_back(Entry {
                ticket,
                key,
                callback: Box::new(callback),
            });
            !std::mem::replace(&mut state.running, true)
        };

        if start {
            tokio::spawn(drive(
                self.service.clone(),
                self.state.clone(),
                self.idle.clone(),
            ));
        }
        ticket
    }

    /// Cancel a lookup. Returns false if it already completed.
    pub fn cancel(&self, ticket: Ticket) -> bool {
        let mut state = self.state.lock();
        if let Some(pos) = state.waiting.iter().position(|e| e.ticket == ticket) {
            state.waiting.remove(pos);
            debug!(ticket, "Cancelled queued icon lookup");
            return true;
        }
        match &state.in_flight {
            Some(in_flight) if in_flight.ticket == ticket => {
                in_flight.cancelled.store(true, Ordering::Release);
                debug!(ticket, "Cancelled in-flight icon lookup");
                true
            }
            _ => false,
        }
    }

    /// Queued plus in-flight lookups.
    pub fn pending(&self) -> usize {
        let state = self.state.lock();
        state.waiting.len() + usize::from(state.in_flight.is_some())
    }

    /// Wait until the queue has drained.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if !self.state.lock().running {
                return;
            }
            notified.await;
        }
    }
}

async fn drive<S: IconService>(service: Arc<S>, state: Arc<Mutex<QueueState>>, idle: Arc<Notify>) {
    loop {
        let (entry, cancelled) = {
            let mut st = state.lock();
            match st.waiting.pop_front() {
                Some(entry) => {
                    let cancelled = Arc::new(AtomicBool::new(false));
                    st.in_flight = Some(InFlight {
                        ticket: entry.ticket,
                        cancelled: cancelled.clone(),
                    });
                    (entry, cancelled)
                }
                None => {
                    st.in_flight = None;
                    st.running = false;
                    drop(st);
                    idle.notify_waiters();
                    return;
                }
            }
        };

        let info = service.lookup_icon(&entry.key).await;
        state.lock().in_flight = None;

        if cancelled.load(Ordering::Acquire) {
            if info.is_valid() {
                debug!(ticket = entry.ticket, path = %entry.key.id.path, "Releasing icon of cancelled lookup");
                service.release_icon(&entry.key.id).await;
            }
            continue;
        }
        (entry.callback)(info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use theme_ipc::{ArenaRef, SizeF};
    use tokio::sync::Semaphore;

    /// Service whose lookups block until a permit is released.
    struct GatedService {
        gate: Semaphore,
        lookups: Mutex<Vec<String>>,
        released: Mutex<Vec<String>>,
    }

    impl GatedService {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(0),
                lookups: Mutex::new(Vec::new()),
                released: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl IconService for GatedService {
        async fn lookup_icon(&self, key: &IconKey) -> SharedIconInfo {
            self.lookups.lock().push(key.id.path.clone());
            self.gate.acquire().await.unwrap().forget();
            SharedIconInfo::Svg {
                handle: ArenaRef::new(64, 10, 1),
            }
        }

        async fn release_icon(&self, id: &IconId) {
            self.released.lock().push(id.path.clone());
        }
    }

    fn key(path: &str) -> IconKey {
        IconKey::new(IconId::new(path, SizeF::new(16.0, 16.0)))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_fifo_one_in_flight() {
        let service = GatedService::new();
        let queue = AsyncRequestQueue::new(service.clone());
        let done = Arc::new(Mutex::new(Vec::new()));

        for name in ["a", "b", "c"] {
            let done = done.clone();
            queue.enqueue(key(name), move |info| {
                assert!(info.is_valid());
                done.lock().push(name);
            });
        }
        settle().await;
        assert_eq!(*service.lookups.lock(), vec!["a"]);
        assert_eq!(queue.pending(), 3);

        service.gate.add_permits(3);
        queue.wait_idle().await;
        assert_eq!(*done.lock(), vec!["a", "b", "c"]);
        assert_eq!(*service.lookups.lock(), vec!["a", "b", "c"]);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_cancel_queued_never_calls_back() {
        let service = GatedService::new();
        let queue = AsyncRequestQueue::new(service.clone());
        let done = Arc::new(Mutex::new(Vec::new()));

        let mut tickets = Vec::new();
        for name in ["first", "second"] {
            let done = done.clone();
            tickets.push(queue.enqueue(key(name), move |_| done.lock().push(name)));
        }
        settle().await;
        assert!(queue.cancel(tickets[1]));

        service.gate.add_permits(2);
        queue.wait_idle().await;
        assert_eq!(*done.lock(), vec!["first"]);
        assert_eq!(*service.lookups.lock(), vec!["first"]);
        assert!(service.released.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_in_flight_releases_icon() {
        let service = GatedService::new();
        let queue = AsyncRequestQueue::new(service.clone());
        let called = Arc::new(AtomicBool::new(false));

        let flag = called.clone();
        let ticket = queue.enqueue(key("qtg_large_busy"), move |_| {
            flag.store(true, Ordering::SeqCst);
        });
        settle().await;
        assert!(queue.cancel(ticket));

        service.gate.add_permits(1);
        queue.wait_idle().await;
        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(*service.released.lock(), vec!["qtg_large_busy"]);
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_noop() {
        let service = GatedService::new();
        service.gate.add_permits(1);
        let queue = AsyncRequestQueue::new(service.clone());

        let ticket = queue.enqueue(key("done"), |_| {});
        queue.wait_idle().await;
        assert!(!queue.cancel(ticket));
        assert!(service.released.lock().is_empty());
    }
}
