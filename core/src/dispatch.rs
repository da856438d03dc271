//! Callback dispatcher
//!
//! Listener and logger callbacks never run on the thread that decoded the
//! data. They are queued on a small pool of blocking workers owned by a
//! dedicated Tokio runtime, so a slow or panicking callback cannot stall the
//! notification path.
//!
//! A `SerialQueue` runs its jobs one at a time in submission order on the
//! same pool, for callbacks whose order matters.

use crate::BlueStError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Default number of callback workers
pub const DEFAULT_DISPATCHER_THREADS: usize = 5;

/// Bounded worker pool for user callbacks
pub struct Dispatcher {
    runtime: Option<Runtime>,
    pending: Arc<AtomicUsize>,
}

impl Dispatcher {
    /// Build a dispatcher with at most `threads` concurrent callbacks.
    pub fn new(threads: usize) -> Result<Self, BlueStError> {
        if threads == 0 {
            return Err(BlueStError::InvalidConfig(
                "dispatcher needs at least one thread".to_string(),
            ));
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(threads)
            .thread_name("bluest-dispatch")
            .enable_time()
            .build()?;

        debug!("Dispatcher started with {} callback threads", threads);
        Ok(Self {
            runtime: Some(runtime),
            pending: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Queue `job` and return immediately.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(runtime) = self.runtime.as_ref() else {
            return;
        };

        let pending = self.pending.clone();
        pending.fetch_add(1, Ordering::SeqCst);
        runtime.spawn_blocking(move || {
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                error!("Callback panicked; ignoring");
            }
            pending.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Number of queued or running callbacks
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Open a queue whose jobs run one after the other, in submission order.
    pub fn serial_queue(&self) -> SerialQueue {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        if let Some(runtime) = self.runtime.as_ref() {
            let pending = self.pending.clone();
            runtime.spawn(async move {
                while let Some(job) = receiver.recv().await {
                    let pending = pending.clone();
                    let finished = tokio::task::spawn_blocking(move || {
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            error!("Callback panicked; ignoring");
                        }
                        pending.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
                    if let Err(e) = finished {
                        debug!("Serial queue stopped: {}", e);
                        break;
                    }
                }
            });
        }
        SerialQueue {
            sender,
            pending: self.pending.clone(),
        }
    }
}

/// Ordered job queue on a `Dispatcher`
///
/// Dropping every handle ends the queue once the queued jobs have run.
#[derive(Clone)]
pub struct SerialQueue {
    sender: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
}

impl SerialQueue {
    /// Queue `job` behind the ones already submitted and return immediately.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(Box::new(job)).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            debug!("Serial queue closed; dropping job");
        }
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
