//! Wires the push channel, cache sync and notification queue to the session.
//!
//! One task owns the whole flow: it follows session changes (open on a token,
//! close and clear on sign-out) and applies events one at a time. Since both
//! run on the same task, a sign-out never lands between the cache patch and
//! the notification of a single event.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::BorrowStatus;
use crate::bus::{BorrowUpdate, BusRecvError, EventKind, PushEvent, ReceivedEvent, Subscription};
use crate::cache::{CacheSyncPolicy, KeyedCache};
use crate::channel::transport::{PushTransport, ReconnectPolicy};
use crate::channel::{ChannelStatus, EventChannel};
use crate::config::SyncConfig;
use crate::notify::{NotificationId, NotificationInput, NotificationKind, NotificationQueue};
use crate::session::{CurrentUser, Session, SessionState};

pub struct RealtimeSync {
    channel: Arc<EventChannel>,
    queue: NotificationQueue,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeSync {
    /// Start syncing. Must be called inside a tokio runtime.
    pub fn init(
        config: &SyncConfig,
        session: &Session,
        transport: Arc<dyn PushTransport>,
        cache: Arc<dyn KeyedCache>,
    ) -> Self {
        let channel = Arc::new(EventChannel::new(transport, ReconnectPolicy::from(config)));
        let queue = NotificationQueue::new(config.dismiss_after());

        // Subscribe before anything can connect so no event is missed.
        let subscription = channel.subscribe();
        let task = tokio::spawn(
            SyncTask {
                session_rx: session.watch(),
                channel: channel.clone(),
                subscription,
                queue: queue.clone(),
                cache,
                policy: CacheSyncPolicy::new(),
                visible_kinds: config.visible_kinds.clone(),
                user: None,
            }
            .run(),
        );
        info!(visible = ?config.visible_kinds, "realtime sync started");

        Self {
            channel,
            queue,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn notifications(&self) -> &NotificationQueue {
        &self.queue
    }

    pub fn channel(&self) -> &EventChannel {
        &self.channel
    }

    pub fn status(&self) -> ChannelStatus {
        self.channel.status()
    }

    /// Show a notification produced by the client itself, e.g. after a
    /// successful borrow request.
    pub fn notify_local(&self, input: NotificationInput) -> NotificationId {
        self.queue.enqueue(input)
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop syncing: the task ends, the channel closes and the queue empties.
    /// Safe to call more than once.
    pub fn teardown(&self) {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.abort();
            info!("realtime sync stopped");
        }
        self.channel.close_current();
        self.queue.clear_all();
    }
}

impl Drop for RealtimeSync {
    fn drop(&mut self) {
        let task = self.task.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = task.take() {
            task.abort();
        }
        self.channel.close_current();
    }
}

// ============================================================================
// Sync task
// ============================================================================

struct SyncTask {
    session_rx: watch::Receiver<Option<SessionState>>,
    channel: Arc<EventChannel>,
    subscription: Subscription,
    queue: NotificationQueue,
    cache: Arc<dyn KeyedCache>,
    policy: CacheSyncPolicy,
    visible_kinds: Vec<EventKind>,
    user: Option<CurrentUser>,
}

impl SyncTask {
    async fn run(mut self) {
        self.follow_session();
        loop {
            tokio::select! {
                biased;
                changed = self.session_rx.changed() => {
                    if changed.is_err() {
                        debug!("session gone, stopping realtime sync");
                        self.user = None;
                        self.channel.close_current();
                        self.queue.clear_all();
                        break;
                    }
                    self.follow_session();
                }
                received = self.subscription.recv() => match received {
                    Ok(received) => self.dispatch(received),
                    Err(BusRecvError::Lagged(missed)) => {
                        warn!(missed, "push events were lost, marking synced queries stale");
                        self.policy.resync(self.cache.as_ref());
                    }
                    Err(BusRecvError::Closed) => break,
                },
            }
        }
    }

    fn follow_session(&mut self) {
        let state = self.session_rx.borrow_and_update().clone();
        match state {
            Some(state) => {
                let switched = self
                    .user
                    .as_ref()
                    .is_some_and(|previous| previous.id != state.user.id);
                if switched {
                    info!(user_id = %state.user.id, "signed-in user changed, clearing notifications");
                    self.queue.clear_all();
                }
                self.user = Some(state.user);
                self.channel.open(state.tokens.access);
            }
            None => {
                self.user = None;
                if self.channel.close_current() {
                    info!("signed out, push channel closed");
                }
                self.queue.clear_all();
            }
        }
    }

    fn dispatch(&self, received: ReceivedEvent) {
        let event = &received.event;
        debug!(seq = received.seq, kind = %event.kind(), "dispatching push event");

        self.policy.apply(event, self.cache.as_ref());
        if let Some(input) = self.notification_for(event) {
            let id = self.queue.enqueue(input);
            debug!(%id, kind = %event.kind(), "push event shown to user");
        }
    }

    fn notification_for(&self, event: &PushEvent) -> Option<NotificationInput> {
        if !self.visible_kinds.contains(&event.kind()) {
            return None;
        }
        let input = match event {
            PushEvent::Notification(note) => {
                NotificationInput::new(note.kind, note.title.clone(), note.message.clone())
            }
            PushEvent::BorrowUpdate(update) => {
                let user = self.user.as_ref()?;
                if !user.role.is_staff() && user.id != update.user_id {
                    return None;
                }
                borrow_notification(update)
            }
            PushEvent::StockUpdate(stock) => NotificationInput::info(
                "Availability changed",
                format!(
                    "Book {} now has {} of {} copies available.",
                    stock.book_id, stock.available_copies, stock.total_copies
                ),
            ),
        };
        Some(input.with_timestamp(event.timestamp()))
    }
}

/// User-facing text for a borrowing status change.
pub fn borrow_notification(update: &BorrowUpdate) -> NotificationInput {
    let (kind, title) = match &update.status {
        BorrowStatus::Pending => (NotificationKind::Info, "Borrow request received"),
        BorrowStatus::Approved => (NotificationKind::Success, "Borrow request approved"),
        BorrowStatus::Rejected => (NotificationKind::Error, "Borrow request rejected"),
        BorrowStatus::Borrowed => (NotificationKind::Info, "Book checked out"),
        BorrowStatus::Returned => (NotificationKind::Success, "Book returned"),
        BorrowStatus::Overdue => (NotificationKind::Warning, "Book overdue"),
        BorrowStatus::Other(_) => (NotificationKind::Info, "Borrowing updated"),
    };
    let message = format!(
        "Borrowing {} for book {} is now {}.",
        update.borrow_id, update.book_id, update.status
    );
    NotificationInput::new(kind, title, message).with_timestamp(update.timestamp)
}
