use std::fmt;
use std::io;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Shutdown,
}

#[derive(Debug)]
pub enum PoolError {
    ZeroWorkers,
    Spawn(io::Error),
    Closed,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::ZeroWorkers => write!(f, "worker pool size must be greater than 0"),
            PoolError::Spawn(e) => write!(f, "failed to spawn worker thread: {}", e),
            PoolError::Closed => write!(f, "worker pool is closed"),
        }
    }
}

impl std::error::Error for PoolError {}

/// Fixed-size pool of worker threads draining boxed jobs off a shared
/// channel. Workers are told to shut down and joined when the pool drops.
pub struct ThreadPool {
    workers: Vec<Worker>,
    sender: Option<mpsc::Sender<Message>>,
}

struct Worker {
    thread: Option<thread::JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(size: usize) -> Result<ThreadPool, PoolError> {
        if size == 0 {
            return Err(PoolError::ZeroWorkers);
        }

        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            workers.push(Worker::spawn(id, Arc::clone(&receiver))?);
        }

        Ok(ThreadPool {
            workers,
            sender: Some(sender),
        })
    }

    pub fn execute<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.sender {
            Some(sender) => sender
                .send(Message::Run(Box::new(job)))
                .map_err(|_| PoolError::Closed),
            None => Err(PoolError::Closed),
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            for _ in &self.workers {
                let _ = sender.send(Message::Shutdown);
            }
        }

        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

impl Worker {
    fn spawn(id: usize, receiver: Arc<Mutex<mpsc::Receiver<Message>>>) -> Result<Worker, PoolError> {
        let thread = thread::Builder::new()
            .name(format!("worker-{}", id))
            .spawn(move || loop {
                let message = {
                    let lock = match receiver.lock() {
                        Ok(lock) => lock,
                        Err(_) => break,
                    };
                    match lock.recv() {
                        Ok(message) => message,
                        Err(_) => break,
                    }
                };

                match message {
                    Message::Run(job) => job(),
                    Message::Shutdown => break,
                }
            })
            .map_err(PoolError::Spawn)?;

        Ok(Worker {
            thread: Some(thread),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn zero_sized_pool_is_rejected() {
        assert!(matches!(ThreadPool::new(0), Err(PoolError::ZeroWorkers)));
    }

    #[test]
    fn jobs_run_on_workers() {
        let pool = ThreadPool::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        drop(pool); // joins workers, so all jobs have run
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn drop_waits_for_in_flight_jobs() {
        let pool = ThreadPool::new(1).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&done);
        pool.execute(move || {
            thread::sleep(Duration::from_millis(50));
            flag.store(1, Ordering::SeqCst);
        })
        .unwrap();
        drop(pool);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
