//! Handle to one live WebSocket, as seen by the dispatcher.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::mpsc;

use crate::protocol::Outbound;

pub type ConnId = u64;

/// What the socket writer task receives.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Frame(Outbound),
    Close,
}

#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnId,
    tx: mpsc::UnboundedSender<Outgoing>,
    closed: Arc<AtomicBool>,
}

impl Connection {
    pub fn new(id: ConnId, tx: mpsc::UnboundedSender<Outgoing>) -> Self {
        Self { id, tx, closed: Arc::new(AtomicBool::new(false)) }
    }

    /// A connection plus the receiving end its writer task would own.
    pub fn channel(id: ConnId) -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(id, tx), rx)
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Queue a frame; returns false if the writer is gone.
    pub fn send(&self, msg: Outbound) -> bool {
        self.tx.send(Outgoing::Frame(msg)).is_ok()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        let _ = self.tx.send(Outgoing::Close);
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Relaxed) && !self.tx.is_closed()
    }
}
