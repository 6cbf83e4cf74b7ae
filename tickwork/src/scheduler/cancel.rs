// One-shot handle resolved when a cancelled job reaches DONE

use crate::job::Job;
use tokio::sync::watch;

/// Completes once the cancelled job is DONE.
///
/// Handles are cheap to clone; every clone observes the same resolution.
/// Cancelling the same job twice returns handles on the same outcome.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    receiver: watch::Receiver<Option<Job>>,
}

/// Sending side kept by the scheduler while the cancellation is pending
pub(crate) struct CancelResolver {
    sender: watch::Sender<Option<Job>>,
}

impl CancelHandle {
    /// A handle on a pending cancellation with its resolver
    pub(crate) fn pending() -> (CancelResolver, CancelHandle) {
        let (sender, receiver) = watch::channel(None);
        (CancelResolver { sender }, CancelHandle { receiver })
    }

    /// A handle that is already complete
    pub(crate) fn resolved(job: Job) -> CancelHandle {
        let (_sender, receiver) = watch::channel(Some(job));
        CancelHandle { receiver }
    }

    /// The DONE job if the cancellation has completed
    pub fn try_get(&self) -> Option<Job> {
        self.receiver.borrow().clone()
    }

    pub fn is_done(&self) -> bool {
        self.receiver.borrow().is_some()
    }

    /// Wait for the job to be DONE and return it.
    ///
    /// Returns `None` only if the scheduler is dropped before the job finished.
    pub async fn wait(mut self) -> Option<Job> {
        // An error only means the sender is gone; the last value still tells
        let _ = self.receiver.wait_for(|job| job.is_some()).await;
        self.receiver.borrow().clone()
    }
}

impl CancelResolver {
    /// A new handle on this cancellation
    pub(crate) fn subscribe(&self) -> CancelHandle {
        CancelHandle {
            receiver: self.sender.subscribe(),
        }
    }

    pub(crate) fn resolve(self, job: Job) {
        self.sender.send_replace(Some(job));
    }
}
