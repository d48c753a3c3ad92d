//! The mixer-facing interface of the protocol core.
//!
//! Each device runs its own I/O domain: an OS thread owning the real-time
//! state of every stream attached to it. The main domain talks to it
//! through a message queue; audio and control messages are fire-and-forget,
//! while a handful of operations are synchronous round-trips during which
//! the worker is parked and the main thread has exclusive access.
//!
//! What actually happens to the rendered audio (hardware I/O, resampling,
//! volume kernels) is beyond this interface; the built-in devices are null
//! devices that discard playback and synthesize capture, driven either by
//! their own clock or by explicit render requests from tests.

mod messages;
mod sink;
mod source;

pub use messages::*;
pub use sink::{DetachedInput, InputCtx, Sink, SinkConfig, SinkInput};
pub use source::{OutputCtx, SignalGen, Source, SourceConfig, SourceOutput};

use std::sync::mpsc;
use std::sync::Arc;

use futures::channel::oneshot;

/// Handle the I/O domains use to wake the main loop after posting.
#[derive(Clone)]
pub struct MainHandle {
    tx: mpsc::Sender<MainMessage>,
    waker: Arc<mio::Waker>,
}

impl std::fmt::Debug for MainHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainHandle").finish()
    }
}

impl MainHandle {
    pub fn new(tx: mpsc::Sender<MainMessage>, waker: Arc<mio::Waker>) -> Self {
        Self { tx, waker }
    }

    /// Posts a message to the main loop. Never blocks; if the main loop is
    /// gone the message is dropped, which only happens during teardown.
    pub fn post(&self, msg: MainMessage) {
        if self.tx.send(msg).is_ok() {
            let _ = self.waker.wake();
        }
    }
}

/// Parks the calling thread until the worker answers. The three
/// synchronous round-trips (latency, buffer metrics, state) and
/// attach/detach all funnel through this.
pub(crate) fn roundtrip<T>(rx: oneshot::Receiver<T>) -> Option<T> {
    futures::executor::block_on(rx).ok()
}

/// A fresh oneshot pair, shorthand for the message constructors.
pub(crate) fn reply_channel<T>() -> (oneshot::Sender<T>, oneshot::Receiver<T>) {
    oneshot::channel()
}
