use std::panic;
use std::sync::mpsc::{sync_channel, Receiver};
use std::thread::{self, JoinHandle};

/// Execute an iterator on a worker thread, which can work ahead a configurable number of items.
/// Items arrive in the order the worker produced them. A panic on the worker is re-raised on
/// the consuming thread.
pub struct BackgroundIterator<T> {
    rx: Receiver<Option<T>>,
    worker: Option<JoinHandle<()>>,
    done: bool,
}

impl<T: Send> Iterator for BackgroundIterator<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.done {
            return None;
        }

        match self.rx.recv() {
            Ok(Some(v)) => Some(v),
            Ok(None) => {
                self.done = true;
                None
            }

            // the worker hung up without sending the end marker
            Err(_) => {
                self.done = true;
                if let Some(worker) = self.worker.take() {
                    if let Err(payload) = worker.join() {
                        panic::resume_unwind(payload);
                    }
                }
                None
            }
        }
    }
}

impl<T: 'static + Send> BackgroundIterator<T> {
    /// Iterate through `itr` on a newly created thread, and send items back to the returned
    /// `BackgroundIterator` for consumption on the calling thread. The worker thread will
    /// continue to produce elements until it is `max_read_ahead` items ahead of the consumer iterator.
    pub fn new<I: 'static + Send + Iterator<Item = T>>(
        itr: I,
        max_read_ahead: usize,
    ) -> BackgroundIterator<T> {
        Self::spawn(move || itr, max_read_ahead)
    }

    /// Like `new`, but the iterator is built on the worker thread by `make`, so
    /// it need not be `Send` itself. Dropping the `BackgroundIterator` stops the
    /// worker at its next send.
    pub fn spawn<I, F>(make: F, max_read_ahead: usize) -> BackgroundIterator<T>
    where
        I: Iterator<Item = T>,
        F: 'static + Send + FnOnce() -> I,
    {
        let (tx, rx) = sync_channel::<Option<T>>(max_read_ahead);
        let worker = thread::spawn(move || {
            for item in make() {
                if tx.send(Some(item)).is_err() {
                    return;
                };
            }

            // the consumer may already be gone
            let _ = tx.send(None);
        });

        BackgroundIterator {
            rx,
            worker: Some(worker),
            done: false,
        }
    }
}
