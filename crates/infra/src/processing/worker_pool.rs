//! Bounded pool of threads executing scheduled work packages.

use std::io;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::debug;

use super::processor::ProcessorInner;
use super::work_package::WorkPackage;

/// Threads pulling packages from one shared queue, one batch per dispatch.
///
/// Dropping every sender (see `shutdown`) lets the threads drain the queue
/// and exit.
#[derive(Debug)]
pub(crate) struct WorkerPool {
    sender: Option<mpsc::Sender<Arc<WorkPackage>>>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn spawn(inner: &Arc<ProcessorInner>, size: usize) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Arc<WorkPackage>>();
        let rx = Arc::new(Mutex::new(rx));

        let mut threads = Vec::with_capacity(size);
        for i in 0..size.max(1) {
            let rx = rx.clone();
            let inner = inner.clone();
            let join = thread::Builder::new()
                .name(format!("{}-worker-{i}", inner.name()))
                .spawn(move || worker_loop(&inner, &rx))?;
            threads.push(join);
        }

        Ok(Self {
            sender: Some(tx),
            threads,
        })
    }

    /// Queue a scheduled package. Returns `false` once the pool is shut down.
    pub(crate) fn submit(&self, package: Arc<WorkPackage>) -> bool {
        self.sender
            .as_ref()
            .is_some_and(|tx| tx.send(package).is_ok())
    }

    pub(crate) fn shutdown(mut self) {
        self.sender.take();
        for t in self.threads.drain(..) {
            let _ = t.join();
        }
    }
}

fn worker_loop(inner: &ProcessorInner, queue: &Mutex<mpsc::Receiver<Arc<WorkPackage>>>) {
    loop {
        let next = {
            let rx = queue.lock().unwrap_or_else(|e| e.into_inner());
            rx.recv()
        };

        let Ok(package) = next else {
            break;
        };

        if !package.begin() {
            continue;
        }
        inner.run_batch(&package);
        package.finish();
    }
    debug!(processor = inner.name(), "worker thread stopped");
}
