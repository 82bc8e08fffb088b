//! Push-side observer contract

use bytes::Bytes;
use rxhyper_core::RxError;

/// One item of a push-stream's data sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A chunk
    Next(Bytes),
    /// The producer finished
    Complete,
    /// The producer failed; nothing follows
    Error(RxError),
}

/// Receives `next`/`complete`/`error` from a producer
pub trait Observer: Send + Sync {
    /// Deliver a chunk
    fn next(&self, chunk: Bytes);

    /// The producer finished
    fn complete(&self);

    /// The producer failed
    fn error(&self, error: RxError);

    /// Dispatch a notification to the matching method
    fn notify(&self, notification: Notification) {
        match notification {
            Notification::Next(chunk) => self.next(chunk),
            Notification::Complete => self.complete(),
            Notification::Error(error) => self.error(error),
        }
    }
}
