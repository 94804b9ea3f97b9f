//! Outbound half of an accepted connection

use ra_core::ConnectionId;
use ra_protocol::{AgentOutbound, OperatorOutbound};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Sender side of one WebSocket connection
///
/// Events are queued on an unbounded channel drained by the connection's
/// writer task, so emission order per connection is preserved. Once the
/// handle is closed, `send` is a no-op.
pub struct ConnectionHandle<M> {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<M>,
    cancel: CancellationToken,
}

/// Handle to an agent connection
pub type AgentHandle = ConnectionHandle<AgentOutbound>;

/// Handle to an operator connection
pub type OperatorHandle = ConnectionHandle<OperatorOutbound>;

impl<M> ConnectionHandle<M> {
    pub fn new(id: ConnectionId, tx: mpsc::UnboundedSender<M>, cancel: CancellationToken) -> Self {
        Self { id, tx, cancel }
    }

    /// Create a handle together with the receiver its writer task drains
    pub fn channel(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<M>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(id, tx, CancellationToken::new()), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an event; returns false if the connection is gone
    pub fn send(&self, message: M) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx.send(message).is_ok()
    }

    /// Signal the connection's tasks to shut down
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once `close` has been called
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

// Manual impl: `M` itself need not be Clone
impl<M> Clone for ConnectionHandle<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<M> std::fmt::Debug for ConnectionHandle<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
