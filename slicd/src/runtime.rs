//! Tokio runtime for the daemon.
//!
//! Every accepted connection gets a reader task, a writer task and one task
//! per stream it answers, so the daemon always runs on the multi-threaded
//! scheduler. Worker threads are numbered (`slicd-worker-0`, `slicd-worker-1`,
//! ...) so log lines can be traced back to a thread.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::runtime::Runtime;
use tracing::debug;

use crate::config::RuntimeConfig;

pub fn create_runtime(config: &RuntimeConfig) -> Result<Runtime> {
    let prefix = config.thread_name.clone();
    let counter = Arc::new(AtomicUsize::new(0));

    let worker_threads = config.resolved_worker_threads();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .thread_name_fn(move || {
            let n = counter.fetch_add(1, Ordering::Relaxed);
            format!("{prefix}-{n}")
        })
        .thread_stack_size(config.stack_size_kib * 1024)
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    debug!(
        worker_threads,
        stack_size_kib = config.stack_size_kib,
        "runtime created"
    );
    Ok(runtime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_threads_are_numbered() {
        let config = RuntimeConfig {
            worker_threads: 2,
            thread_name: "slicd-test".to_string(),
            ..RuntimeConfig::default()
        };
        let runtime = create_runtime(&config).unwrap();
        let name = runtime.block_on(async {
            tokio::spawn(async { std::thread::current().name().map(str::to_string) })
                .await
                .unwrap()
        });
        let name = name.unwrap();
        assert!(name.starts_with("slicd-test-"), "unexpected thread name {name}");
    }
}
