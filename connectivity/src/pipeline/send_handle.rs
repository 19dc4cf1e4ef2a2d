use std::{
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
    time::Duration,
};

use ca_shared::{CaError, CaResult};

pub(crate) type Completion = Sender<CaResult<()>>;

/// Outcome of a submitted send.
///
/// `submit` returns as soon as the message is queued; the worker that does the
/// actual I/O resolves this handle. The same failure is also delivered to the
/// error callback, so holding on to the handle is optional.
pub struct SendHandle {
    receiver: Receiver<CaResult<()>>,
}

impl SendHandle {
    pub(crate) fn pending() -> (Self, Completion) {
        let (sender, receiver) = mpsc::channel();
        (Self { receiver }, sender)
    }

    pub(crate) fn completed(result: CaResult<()>) -> Self {
        let (handle, sender) = Self::pending();
        let _ = sender.send(result);
        handle
    }

    /// Blocks until the worker has processed the message.
    pub fn wait(self) -> CaResult<()> {
        self.receiver.recv().unwrap_or_else(|_| Err(abandoned()))
    }

    /// Waits at most `timeout`; `None` if the worker has not finished yet.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CaResult<()>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(abandoned())),
        }
    }

    pub fn try_result(&self) -> Option<CaResult<()>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(abandoned())),
        }
    }
}

fn abandoned() -> CaError {
    CaError::failed("send was dropped before the worker processed it")
}
