pub mod client;

use crate::error::BridgeError;

/// Lifecycle of the single outbound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Closing,
    Closed,
    Failed,
}

impl SessionState {
    /// `connect` is allowed from here.
    pub fn can_connect(self) -> bool {
        matches!(self, Self::Idle | Self::Failed | Self::Closed)
    }
}

/// What the read loop observed while connected.
#[derive(Debug)]
pub enum SessionEvent {
    /// An inbound frame, passed through uninterpreted.
    Message(String),
    /// The server ended the stream.
    Closed,
    /// The transport broke.
    Failed(BridgeError),
}

/// Observation points on the session lifecycle. Every method defaults to a
/// no-op.
pub trait SessionHooks: Send {
    fn on_connect_success(&mut self, _url: &str) {}

    fn on_connect_error(&mut self, _cause: &BridgeError) {}

    fn on_connection_close(&mut self) {}

    fn on_message(&mut self, _frame: &str) {}
}
