//! Shared helpers for the integration tests.

#![allow(dead_code)]

pub mod fixtures;
pub mod mock_transport;

use std::time::Duration;

pub use mock_transport::MockTransport;

/// Poll `condition` until it holds. Each poll sleeps 5ms, which also drives
/// a paused clock forward.
pub async fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    for _ in 0..1000 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
