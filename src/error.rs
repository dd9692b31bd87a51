use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::ws::SessionState;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Everything the bridge can fail with at runtime.
///
/// `Config` and `HardwareInit` are fatal at startup. `AlreadyRegistered`, `AlreadyClosed`,
/// `NotConnected` and `InvalidState` are ordering mistakes in the caller and
/// are never retried. `Connect` and `ConnectionClosed` leave the bridge
/// disconnected until the reconnect policy calls `connect` again.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("hardware initialisation failed: {0}")]
    HardwareInit(String),

    #[cfg_attr(not(feature = "rpi"), allow(dead_code))]
    #[error("hardware read failed: {0}")]
    HardwareRead(String),

    #[error("pin {pin} already has an edge handler registered")]
    AlreadyRegistered { pin: u8 },

    #[error("web socket connection is already closed")]
    AlreadyClosed,

    #[error("web socket connection is not open")]
    NotConnected,

    #[error("cannot connect while session is {state:?}")]
    InvalidState { state: SessionState },

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("connection closed by server")]
    ConnectionClosed,

    #[error("web socket transport error: {0}")]
    WebSocket(#[from] WsError),

    #[error("failed to encode command: {0}")]
    Json(#[from] serde_json::Error),
}
