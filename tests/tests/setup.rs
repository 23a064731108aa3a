//! Shared test infrastructure.
//!
//! Every integration test runs on [`SERVER_RT`], a multi-threaded runtime shared by
//! the whole test binary, so spawned fixture servers and producer tasks keep running
//! between `block_on` calls. Logs go through the test writer; set `RUST_LOG` to see
//! them.

#![allow(dead_code)]

use std::sync::LazyLock;
use std::time::Duration;

use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

pub static SERVER_RT: LazyLock<Runtime> = LazyLock::new(|| {
    init_tracing();
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("failed to build test runtime")
});

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `condition` every few milliseconds until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}
