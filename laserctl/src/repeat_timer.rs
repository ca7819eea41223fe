/*!
Periodic action on a background thread, cancellable at any time.
*/

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

/// Runs an action every `interval` until cancelled or dropped
pub struct RepeatTimer {
    cancel: Sender<()>,
    worker: Option<JoinHandle<()>>,
}

impl RepeatTimer {
    /// Start the timer; the first run happens one interval from now
    pub fn start<F>(name: &str, interval: Duration, mut action: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (cancel, cancel_rx) = bounded::<()>(1);

        let worker = thread::Builder::new().name(name.to_string()).spawn(move || {
            loop {
                match cancel_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => action(),
                    // Cancelled, or the owner is gone
                    _ => break,
                }
            }
            debug!("Timer stopped");
        })?;

        Ok(Self {
            cancel,
            worker: Some(worker),
        })
    }

    /// Stop the timer and wait for a running action to finish
    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.cancel.try_send(());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Timer action panicked");
            }
        }
    }
}

impl Drop for RepeatTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
