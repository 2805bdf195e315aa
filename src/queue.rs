//! The global run queue.
//!
//! The external process is resumed by session id; two concurrent resumes
//! against the same session corrupt conversation state at the provider. One
//! daemon-wide FIFO worker gives total ordering over every invocation —
//! heartbeat, scheduled jobs, chat transports, and CLI `send` alike. Runs for
//! different agents are serialized too; that trades latency for simplicity
//! and is relied on by callers, so keep it.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

type Task = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Clone)]
pub struct RunQueue {
    tx: mpsc::UnboundedSender<Task>,
}

impl RunQueue {
    /// Spawn the worker loop. Tasks run strictly in arrival order; a task is
    /// not started until the previous one has fully settled.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                // Run each task in its own tokio task so a panic inside one
                // unit of work cannot take the worker loop down with it.
                if tokio::spawn(task).await.is_err() {
                    warn!("Queued task panicked; queue continues");
                }
            }
        });
        Self { tx }
    }

    /// Submit a unit of work; the task is enqueued before this returns, so
    /// call order is queue order. Await the returned future for the task's
    /// outcome. The `Err` arm covers queue-level failures only (worker gone,
    /// task panicked); the task's own result, including its errors, comes
    /// back as `T`.
    pub fn enqueue<T, F>(&self, fut: F) -> impl Future<Output = anyhow::Result<T>>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let task: Task = Box::pin(async move {
            let _ = done_tx.send(fut.await);
        });
        let submitted = self.tx.send(task).is_ok();
        async move {
            if !submitted {
                anyhow::bail!("run queue worker is gone");
            }
            done_rx
                .await
                .map_err(|_| anyhow::anyhow!("queued task dropped before completing"))
        }
    }
}

impl Default for RunQueue {
    fn default() -> Self {
        Self::new()
    }
}
