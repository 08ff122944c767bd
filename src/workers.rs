//! Fixed-size pool of worker threads.
//!
//! Used by the command-line host to dispatch payloads concurrently, the way request threads
//! of a host server would. Jobs wait on a bounded queue of [`QUEUED_PER_WORKER`] slots per
//! worker, so [`WorkerPool::execute`] blocks the producer while the queue is full. Dropping
//! the pool stops accepting jobs, lets the queue drain, and joins every worker.
use std::{
    sync::{Arc, Mutex, PoisonError, mpsc},
    thread,
};

use log::{debug, error};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub const QUEUED_PER_WORKER: usize = 4;

#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<Worker>,
    sender: Option<mpsc::SyncSender<Job>>,
}

impl WorkerPool {
    /// # Panics
    /// If `size` is zero.
    pub fn new(size: usize) -> Self {
        assert!(size > 0);

        let mut workers = Vec::with_capacity(size);
        let (sender, receiver) = mpsc::sync_channel(size * QUEUED_PER_WORKER);

        let receiver = Arc::new(Mutex::new(receiver));
        let sender = Some(sender);

        for i in 0..size {
            workers.push(Worker::new(i, Arc::clone(&receiver)));
        }

        Self { workers, sender }
    }

    /// Queues `f` for the next free worker, blocking while the queue is full.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let job = Box::new(f);
        if let Some(sender) = self.sender.as_ref()
            && sender.send(job).is_err()
        {
            error!("all workers have exited, job dropped");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        drop(self.sender.take());

        for worker in self.workers.drain(..) {
            debug!("shutting down worker {}", worker.id);

            if worker.thread.join().is_err() {
                error!("worker {} panicked", worker.id);
            }
        }
    }
}

#[derive(Debug)]
struct Worker {
    id: usize,
    thread: thread::JoinHandle<()>,
}

impl Worker {
    fn new(id: usize, receiver: Arc<Mutex<mpsc::Receiver<Job>>>) -> Self {
        let thread = thread::spawn(move || {
            loop {
                let msg = receiver
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .recv();
                match msg {
                    Ok(job) => {
                        debug!("worker {id} running a job");
                        job();
                    }
                    Err(_) => {
                        debug!("worker {id} disconnected");
                        break;
                    }
                }
            }
        });

        Self { id, thread }
    }
}
