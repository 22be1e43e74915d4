//! Deferred work queue.
//!
//! A single consumer task drains an unbounded FIFO. Submitters may wait for
//! their own item through a per-item oneshot completion.

use crate::error::{Result, SvcError};
use crate::protocol::{HotUnplugRequest, HotplugRequest};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Request types that are processed off the dispatch path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredRequest {
    IntfHotplug(HotplugRequest),
    IntfHotUnplug(HotUnplugRequest),
}

impl DeferredRequest {
    pub fn intf_id(&self) -> u8 {
        match self {
            DeferredRequest::IntfHotplug(req) => req.intf_id,
            DeferredRequest::IntfHotUnplug(req) => req.intf_id,
        }
    }
}

/// Consumer side of the queue.
#[async_trait]
pub trait DeferredHandler: Send + Sync + 'static {
    async fn process(&self, request: DeferredRequest);
}

enum Work {
    Request {
        request: DeferredRequest,
        completion: Option<oneshot::Sender<()>>,
    },
    Flush(oneshot::Sender<()>),
}

/// Handle to the deferred worker.
pub struct DeferredQueue {
    name: String,
    tx: Mutex<Option<mpsc::UnboundedSender<Work>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl DeferredQueue {
    /// Spawn the consumer task on the current runtime.
    pub fn spawn<H: DeferredHandler>(name: String, handler: Arc<H>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_loop(name.clone(), rx, handler));
        Self {
            name,
            tx: Mutex::new(Some(tx)),
            worker: tokio::sync::Mutex::new(Some(worker)),
        }
    }

    /// Queue `request`. With `wait`, return only after the worker finished
    /// this particular item.
    pub async fn submit(&self, request: DeferredRequest, wait: bool) -> Result<()> {
        let (completion, done) = if wait {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        self.send(Work::Request {
            request,
            completion,
        })?;

        if let Some(done) = done {
            done.await.map_err(|_| SvcError::QueueClosed)?;
        }
        Ok(())
    }

    /// Wait until everything queued so far has been processed.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Work::Flush(tx))?;
        rx.await.map_err(|_| SvcError::QueueClosed)
    }

    /// Stop accepting work, process what is queued, and join the worker.
    pub async fn shutdown(&self) {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        drop(tx);

        if let Some(worker) = self.worker.lock().await.take() {
            let _ = worker.await;
        }
        debug!(queue = %self.name, "deferred queue shut down");
    }

    fn send(&self, work: Work) -> Result<()> {
        let guard = self
            .tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let tx = guard.as_ref().ok_or(SvcError::QueueClosed)?;
        tx.send(work).map_err(|_| SvcError::QueueClosed)
    }
}

async fn run_loop<H: DeferredHandler>(
    name: String,
    mut rx: mpsc::UnboundedReceiver<Work>,
    handler: Arc<H>,
) {
    info!(queue = %name, "deferred worker running");

    // recv() keeps yielding queued items after every sender is gone, so
    // shutdown drains the queue instead of dropping it.
    while let Some(work) = rx.recv().await {
        match work {
            Work::Request {
                request,
                completion,
            } => {
                debug!(queue = %name, intf_id = request.intf_id(), "processing deferred request");
                handler.process(request).await;
                if let Some(completion) = completion {
                    let _ = completion.send(());
                }
            }
            Work::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    info!(queue = %name, "deferred worker exiting");
}
