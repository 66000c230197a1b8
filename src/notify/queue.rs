use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{Notification, NotificationId, NotificationInput, QueueView};

pub const DEFAULT_DISMISS_AFTER: Duration = Duration::from_secs(5);

/// Serial notification display: one current item, a FIFO backlog, and a
/// dismissal timer for whichever item is current.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct NotificationQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    state: Mutex<QueueState>,
    view_tx: watch::Sender<QueueView>,
    dismiss_after: Duration,
}

#[derive(Default)]
struct QueueState {
    current: Option<Notification>,
    backlog: VecDeque<Notification>,
    timer: Option<DismissTimer>,
}

struct DismissTimer {
    id: NotificationId,
    task: JoinHandle<()>,
}

impl QueueState {
    fn view(&self) -> QueueView {
        QueueView {
            current: self.current.clone(),
            backlog_count: self.backlog.len(),
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.task.abort();
        }
    }
}

impl NotificationQueue {
    pub fn new(dismiss_after: Duration) -> Self {
        let (view_tx, _) = watch::channel(QueueView::default());
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                view_tx,
                dismiss_after,
            }),
        }
    }

    pub fn dismiss_after(&self) -> Duration {
        self.inner.dismiss_after
    }

    /// Add a notification. It is shown immediately when nothing is current,
    /// otherwise it waits at the tail of the backlog.
    pub fn enqueue(&self, input: NotificationInput) -> NotificationId {
        let notification = input.into_notification();
        let id = notification.id;

        let mut state = self.lock();
        if state.current.is_none() {
            self.show(&mut state, notification);
        } else {
            debug!(%id, backlog = state.backlog.len() + 1, "notification queued");
            state.backlog.push_back(notification);
        }
        self.publish(&state);
        id
    }

    /// Remove the current notification and promote the next one, if any.
    pub fn dismiss_current(&self) {
        let mut state = self.lock();
        let Some(dismissed) = state.current.take() else {
            return;
        };
        debug!(id = %dismissed.id, "notification dismissed");
        state.cancel_timer();
        self.promote(&mut state);
        self.publish(&state);
    }

    /// Drop everything, including the pending timer.
    pub fn clear_all(&self) {
        let mut state = self.lock();
        state.cancel_timer();
        state.current = None;
        state.backlog.clear();
        self.publish(&state);
    }

    pub fn snapshot(&self) -> QueueView {
        self.lock().view()
    }

    pub fn current(&self) -> Option<Notification> {
        self.lock().current.clone()
    }

    pub fn backlog_count(&self) -> usize {
        self.lock().backlog.len()
    }

    /// Observe `{current, backlog_count}` as it changes.
    pub fn watch(&self) -> watch::Receiver<QueueView> {
        self.inner.view_tx.subscribe()
    }

    /// Timer callback. Ignored unless `id` is still the current notification.
    fn expire(&self, id: NotificationId) {
        let mut state = self.lock();
        if state.current.as_ref().map(|n| n.id) != Some(id) {
            debug!(%id, "ignoring stale dismissal timer");
            return;
        }
        debug!(%id, "notification timed out");
        // The firing task is this timer; detach instead of aborting it.
        state.timer = None;
        state.current = None;
        self.promote(&mut state);
        self.publish(&state);
    }

    fn promote(&self, state: &mut QueueState) {
        if let Some(next) = state.backlog.pop_front() {
            self.show(state, next);
        }
    }

    fn show(&self, state: &mut QueueState, notification: Notification) {
        state.cancel_timer();
        let id = notification.id;
        state.current = Some(notification);

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(%id, "no tokio runtime; notification will stay until dismissed");
                return;
            }
        };

        let deadline = Instant::now() + self.inner.dismiss_after;
        let weak: Weak<QueueInner> = Arc::downgrade(&self.inner);
        let task = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = weak.upgrade() {
                NotificationQueue { inner }.expire(id);
            }
        });
        state.timer = Some(DismissTimer { id, task });
        debug!(%id, "notification shown");
    }

    fn publish(&self, state: &QueueState) {
        self.inner.view_tx.send_replace(state.view());
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new(DEFAULT_DISMISS_AFTER)
    }
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.cancel_timer();
    }
}

impl std::fmt::Debug for NotificationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("NotificationQueue")
            .field("current", &state.current.as_ref().map(|n| n.id))
            .field("backlog", &state.backlog.len())
            .field("timer", &state.timer.as_ref().map(|t| t.id))
            .finish()
    }
}
