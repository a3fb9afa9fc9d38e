//! Bounded worker pool for saga kick-offs.
//!
//! Jobs go through a bounded `mpsc` queue drained by a fixed number of
//! workers; `submit` waits while the queue is full. On shutdown the workers
//! finish whatever is already queued and exit.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;
type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>;

pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    receiver: SharedReceiver,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `workers` workers over a queue of `capacity` jobs.
    pub fn new(workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>(capacity.max(1));
        let receiver: SharedReceiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let cancel = CancellationToken::new();

        let handles = (0..workers.max(1))
            .map(|worker| tokio::spawn(Self::work(worker, receiver.clone(), cancel.clone())))
            .collect();

        tracing::info!(workers, capacity, "Saga worker pool started");
        Self {
            sender,
            receiver,
            cancel,
            handles: Mutex::new(handles),
        }
    }

    async fn work(worker: usize, receiver: SharedReceiver, cancel: CancellationToken) {
        loop {
            let next = tokio::select! {
                biased;
                job = async { receiver.lock().await.recv().await } => job,
                _ = cancel.cancelled() => break,
            };
            match next {
                Some(job) => job.await,
                None => return,
            }
        }

        // Drain what was queued before shutdown.
        loop {
            let job = receiver.lock().await.try_recv();
            match job {
                Ok(job) => job.await,
                Err(_) => break,
            }
        }
        tracing::debug!(worker, "Saga worker stopped");
    }

    /// Queue a job, waiting for room when the queue is full.
    pub async fn submit<F>(&self, job: F) -> Result<(), PipelineError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::PoolClosed);
        }
        self.sender
            .send(Box::pin(job))
            .await
            .map_err(|_| PipelineError::PoolClosed)
    }

    /// Jobs waiting in the queue.
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Stop accepting jobs, run what is queued, and wait for the workers.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Saga worker panicked");
            }
        }
        // Anything a racing submit slipped in after the drain is dropped.
        self.receiver.lock().await.close();
        tracing::info!("Saga worker pool stopped");
    }
}
