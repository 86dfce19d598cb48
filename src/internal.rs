//! # Summary
//!
//! This module abstracts over internal connections between the manager,
//! the transport tasks, and the store drain.
//!
//! Currently backed by `tokio::sync::mpsc` unbounded channels. Since the
//! channels are unbounded, the only way for a send to fail is if the
//! receiving end has been dropped, which only happens while the node is
//! shutting down. This is why `send` logs instead of panicking, and
//! `try_send` reports the outcome to callers that care.

use tokio::sync::mpsc;

/// Intra-node receiving channel.
#[derive(Debug)]
pub struct Rx<T>(mpsc::UnboundedReceiver<T>);

/// Intra-node transmission channel. All clones send to the same receiving end.
#[derive(Derivative)]
#[derivative(Clone(bound = ""))]
#[derive(Debug)]
pub struct Tx<T>(mpsc::UnboundedSender<T>);

/// Create a new pair of linked receiving and transmitting channels.
pub fn new<T>() -> (Rx<T>, Tx<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Rx(rx), Tx(tx))
}

impl<T> Tx<T> {
    /// Push a message through the channel.
    /// Logs if the receiving end has been dropped.
    pub fn send(&self, message: T) {
        if self.0.send(message).is_err() {
            warn!("receiver dropped");
        }
    }

    /// Attempt to send a message through the channel, returning it
    /// if the receiving end has been dropped.
    pub fn try_send(&self, message: T) -> Result<(), T> {
        self.0.send(message).map_err(|error| error.0)
    }
}

impl<T> Rx<T> {
    /// Wait for the next message. Resolves to `None` once every
    /// transmitting end has been dropped.
    pub async fn recv(&mut self) -> Option<T> {
        self.0.recv().await
    }

    /// Take the next message if one is already buffered.
    pub fn try_recv(&mut self) -> Option<T> {
        self.0.try_recv().ok()
    }

    /// Drain every buffered message.
    pub fn drain(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
