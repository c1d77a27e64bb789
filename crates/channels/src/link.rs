//! Child channel transports.
//!
//! A *linked* channel is a pair of endpoints: one is handed to the child,
//! the other stays with the parent and is listened on. A *direct* channel is
//! two in-process callbacks, one pushing to the child and one the child uses
//! to push back.

use framelink_core::ChannelError;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Delivers one message to the other side of a channel.
pub type MessageSink = Arc<dyn Fn(Value) + Send + Sync>;

/// One end of a linked channel.
#[derive(Debug)]
pub struct LinkEndpoint {
    tx: mpsc::UnboundedSender<Value>,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl LinkEndpoint {
    /// Create two connected endpoints. Messages posted on one arrive on the other.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self { tx: a_tx, rx: a_rx },
            Self { tx: b_tx, rx: b_rx },
        )
    }

    pub fn post(&self, message: Value) -> Result<(), ChannelError> {
        self.tx
            .send(message)
            .map_err(|_| ChannelError::LinkClosed("peer endpoint dropped".into()))
    }

    /// Wait for the next message; `None` once the peer has closed.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Value> {
        self.rx.try_recv().ok()
    }

    /// Separate the sending and receiving halves, e.g. to listen in a task.
    pub fn into_split(self) -> (mpsc::UnboundedSender<Value>, mpsc::UnboundedReceiver<Value>) {
        (self.tx, self.rx)
    }
}

/// The in-process callbacks of a direct channel.
pub struct DirectLink {
    /// Pushes a message to the child.
    pub to_child: MessageSink,
    /// Receives the callback the child must use to push messages upstream.
    pub install_upstream: Box<dyn FnOnce(MessageSink) + Send>,
}

impl std::fmt::Debug for DirectLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectLink").finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum ChannelTransport {
    Linked(LinkEndpoint),
    Direct(DirectLink),
}

impl ChannelTransport {
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelTransport::Linked(_) => "linked",
            ChannelTransport::Direct(_) => "direct",
        }
    }
}
