mod types;

pub use types::{Book, BorrowStatus, Borrowing, Fine, NotificationRecord, Paginated};
