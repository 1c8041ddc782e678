//! Cooperative cancellation shared by the archive pipeline and the web
//! server.
//!
//! The token is backed by a channel that never carries a message: cancelling
//! drops the only sender, which disconnects every receiver clone at once.
//! Each observer gets exactly one wakeup, whether it is polling
//! [`CancelToken::is_cancelled`], blocking in [`CancelToken::wait`], or
//! selecting on [`CancelToken::receiver`].

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

/// Create a linked cancel handle/token pair.
pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (tx, rx) = bounded::<()>(0);
    (CancelHandle { _tx: tx }, CancelToken { rx })
}

/// Owning side of a cancellation. Dropping it cancels every token clone.
pub struct CancelHandle {
    _tx: Sender<()>,
}

impl CancelHandle {
    /// Cancel explicitly. Equivalent to dropping the handle.
    pub fn cancel(self) {}
}

/// Observer side of a cancellation. Cheap to clone.
#[derive(Clone)]
pub struct CancelToken {
    rx: Receiver<()>,
}

impl CancelToken {
    /// A token that never fires, for callers that opt out of cancellation.
    pub fn never() -> CancelToken {
        let (handle, token) = cancellation();
        std::mem::forget(handle);
        token
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Block until cancelled.
    pub fn wait(&self) {
        let _ = self.rx.recv();
    }

    /// Raw receiver for use in `crossbeam_channel::select!` arms. The arm
    /// fires (with a disconnect error) once the handle is dropped.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}
