//! Background operations with a result channel.

use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};

/// A running worker thread and the channel its single result arrives on.
///
/// Dropping the handle detaches the worker; it still runs to completion.
pub struct TaskHandle<T> {
    result: Receiver<T>,
    thread: thread::JoinHandle<()>,
}

impl<T: Send + 'static> TaskHandle<T> {
    /// Runs `work` on a new thread.
    pub fn spawn<F>(work: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let thread = thread::spawn(move || {
            let _ = tx.send(work());
        });
        Self { result: rx, thread }
    }
}

impl<T> TaskHandle<T> {
    /// Blocks until the result arrives. `None` if the worker panicked.
    pub fn wait(self) -> Option<T> {
        let result = self.result.recv().ok();
        let _ = self.thread.join();
        result
    }

    /// Waits at most `timeout` for the result.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.result.recv_timeout(timeout)
    }

    pub fn receiver(&self) -> &Receiver<T> {
        &self.result
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}
