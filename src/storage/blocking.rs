//! Blocking bridge for async client crates / 异步客户端的阻塞桥接
//!
//! The adapter interface is synchronous. Backends whose client libraries are
//! async-only (russh, rust-s3) own one of these and drive their futures to
//! completion on the calling thread.
//! 适配器接口是同步的，仅提供异步 API 的客户端通过它在调用线程上完成 future。
//!
//! Calling `block_on` from inside another tokio runtime panics; these drivers
//! must be used from plain threads (or `spawn_blocking`).

use anyhow::{anyhow, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};

#[derive(Clone)]
pub struct BlockingRuntime {
    runtime: Arc<Runtime>,
}

impl BlockingRuntime {
    pub fn new(name: &str) -> Result<Self> {
        // One worker keeps connection tasks (ssh keepalives etc.) alive between calls
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(format!("{}-io", name))
            .enable_all()
            .build()
            .map_err(|e| anyhow!("Failed to start {} runtime: {}", name, e))?;
        Ok(Self { runtime: Arc::new(runtime) })
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn handle(&self) -> Handle {
        self.runtime.handle().clone()
    }

    /// Drop a value inside the runtime context, for types whose Drop spawns tasks
    /// 在运行时上下文中释放值（其 Drop 可能会 spawn 任务）
    pub fn drop_in_context<T>(&self, value: T) {
        let _guard = self.runtime.enter();
        drop(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_on_runs_future() {
        let rt = BlockingRuntime::new("test").unwrap();
        let value = rt.block_on(async {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            21 * 2
        });
        assert_eq!(value, 42);
    }

    #[test]
    fn test_spawned_tasks_progress_between_calls() {
        let rt = BlockingRuntime::new("test").unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        rt.handle().spawn(async move {
            tx.send(7).unwrap();
        });
        assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap(), 7);
    }
}
