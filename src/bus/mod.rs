//! Push event model and in-process distribution.
//!
//! - `event_types`: wire names, typed payloads, envelope decoding
//! - `EventBus`: broadcast fan-out with per-connection generations so a
//!   closed connection can never deliver another event

mod event_bus;
mod event_types;

pub use event_bus::{BusRecvError, EventBus, ReceivedEvent, Subscription};
pub use event_types::{
    BorrowUpdate, EventError, EventKind, NotificationPayload, PushEvent, StockUpdate,
    EVENT_BORROW_UPDATE, EVENT_NOTIFICATION, EVENT_STOCK_UPDATE,
};
