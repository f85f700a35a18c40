//! Deferred theme event queue.
//!
//! Notifications are never delivered inside a reply handler. The reader task
//! pushes them here and the application drains them on its own turn.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use theme_ipc::Notification;
use tokio::sync::Notify;

/// A theme change observed by this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThemeEvent {
    /// Another process selected a new theme; handles from before are stale.
    ThemeChanged(String),
    /// Theme files changed on disk. Empty means "everything".
    ContentUpdated(Vec<String>),
}

impl From<Notification> for ThemeEvent {
    fn from(notification: Notification) -> Self {
        match notification {
            Notification::ThemeChanged(name) => Self::ThemeChanged(name),
            Notification::ThemeContentUpdated(files) => Self::ContentUpdated(files),
        }
    }
}

/// FIFO of pending theme events, shared between the reader task and the
/// application.
#[derive(Clone, Default)]
pub struct EventQueue {
    inner: Arc<Mutex<VecDeque<ThemeEvent>>>,
    notify: Arc<Notify>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: ThemeEvent) {
        self.inner.lock().push_back(event);
        self.notify.notify_waiters();
    }

    pub fn try_pop(&self) -> Option<ThemeEvent> {
        self.inner.lock().pop_front()
    }

    /// Take every queued event in arrival order.
    pub fn drain(&self) -> Vec<ThemeEvent> {
        self.inner.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Wait until at least one event is queued, then pop it.
    pub async fn next(&self) -> ThemeEvent {
        loop {
            let notified = self.notify.notified();
            if let Some(event) = self.try_pop() {
                return event;
            }
            notified.await;
        }
    }
}
