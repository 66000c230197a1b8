//! Sample payloads and cache contents.

use serde_json::{json, Value};

use shelfsync_lib::{CurrentUser, QueryKey, Role, Session, TokenPair};

pub fn book(id: &str, available: u32, total: u32) -> Value {
    json!({
        "id": id,
        "title": format!("Title {id}"),
        "author": "A. Writer",
        "availableCopies": available,
        "totalCopies": total,
        "isAvailable": available > 0,
    })
}

pub fn books_page_key(page: u32) -> QueryKey {
    QueryKey::root("books").with(json!({"page": page, "limit": 10}))
}

pub fn books_page(page: u32, books: Vec<Value>) -> Value {
    let total = books.len();
    json!({
        "data": books,
        "page": page,
        "limit": 10,
        "total": total,
        "totalPages": 1,
    })
}

pub fn stock_update(book_id: &str, available: u32, total: u32) -> Value {
    json!({
        "bookId": book_id,
        "availableCopies": available,
        "totalCopies": total,
        "isAvailable": available > 0,
    })
}

pub fn borrow_update(borrow_id: &str, user_id: &str, status: &str) -> Value {
    json!({
        "borrowId": borrow_id,
        "status": status,
        "bookId": "b1",
        "userId": user_id,
    })
}

pub fn notification(title: &str, message: &str, kind: &str) -> Value {
    json!({"title": title, "message": message, "type": kind})
}

pub fn sign_in(session: &Session, access: &str, user_id: &str, role: Role) {
    session.sign_in(
        TokenPair::new(access, format!("refresh-for-{access}")),
        CurrentUser {
            id: user_id.to_string(),
            role,
        },
    );
}
