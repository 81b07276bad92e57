//! An abstraction over the blocking-task executor used to run service
//! handlers, mirroring the way the framework's own runtime layer lets a
//! caller plug in any executor rather than hard-coding `tokio::spawn`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// An executor capable of running blocking (or merely "don't run this on the
/// connection's own task") service work.
///
/// Implement this for your own thread pool; a `tokio::task::spawn_blocking`-
/// backed implementation is the common case for a tokio-based embedder.
pub trait Executor {
    /// Runs `fut` to completion somewhere other than the caller's task.
    fn execute(&self, fut: BoxFuture);
}

/// A type-erased handle to a blocking executor, cloneable and cheap to pass
/// into `ServiceHandler::invoke`.
#[derive(Clone)]
pub struct BlockingExecutor {
    inner: Arc<dyn Executor + Send + Sync>,
}

impl BlockingExecutor {
    /// Wraps a concrete executor implementation.
    pub fn new(executor: impl Executor + Send + Sync + 'static) -> Self {
        BlockingExecutor {
            inner: Arc::new(executor),
        }
    }

    /// Runs `fut` on the wrapped executor.
    pub fn execute<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.execute(Box::pin(fut));
    }
}

impl fmt::Debug for BlockingExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingExecutor").finish()
    }
}

/// A [`BlockingExecutor`] backed by `tokio::task::spawn_blocking`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioBlockingExecutor;

impl Executor for TokioBlockingExecutor {
    fn execute(&self, fut: BoxFuture) {
        tokio::task::spawn_blocking(move || {
            tokio::runtime::Handle::current().block_on(fut);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn tokio_blocking_executor_runs_future() {
        let ran = Arc::new(AtomicBool::new(false));
        let executor = BlockingExecutor::new(TokioBlockingExecutor);
        let ran2 = ran.clone();
        let (tx, rx) = tokio::sync::oneshot::channel();
        executor.execute(async move {
            ran2.store(true, Ordering::SeqCst);
            let _ = tx.send(());
        });
        rx.await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }
}
