//! Common test utilities for integration tests.

pub mod assertions;
pub mod fixtures;

use std::net::SocketAddr;
use tokio::net::TcpListener;

pub use assertions::*;
pub use fixtures::*;

/// Bind an ephemeral local port for a test server.
pub async fn bind_local() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to port");
    let addr = listener.local_addr().expect("No local address");
    (listener, addr)
}

/// Wait for a server to be ready by polling its health endpoint.
pub async fn wait_for_server(addr: &SocketAddr, timeout_secs: u64) -> bool {
    let client = reqwest::Client::new();
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_secs(timeout_secs);

    while start.elapsed() < timeout {
        if let Ok(response) = client.get(format!("http://{}/health", addr)).send().await {
            if response.status().is_success() {
                return true;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    false
}

/// Test timing utilities
pub mod timing {
    use std::time::{Duration, Instant};

    /// Measures execution time of a future
    pub async fn measure<F, Fut, T>(f: F) -> (T, Duration)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let start = Instant::now();
        let result = f().await;
        (result, start.elapsed())
    }
}
