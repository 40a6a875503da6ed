#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

/// Port error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum PortError {
    /// The transport could not open the named channel
    ConnectFailed {
        /// Channel name that was being opened
        channel: String,
        /// Reason reported by the transport
        reason: String,
    },
    /// The transport refused or failed to transmit a message
    TransmitFailed(String),
    /// The peer end of the channel is gone
    ConnectionClosed,
    /// A connection manager was created outside of a tokio runtime
    NoRuntime,
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed { channel, reason } => {
                write!(f, "Unable to open channel {channel}: {reason}")
            }
            Self::TransmitFailed(reason) => write!(f, "Failed to transmit message: {reason}"),
            Self::ConnectionClosed => write!(f, "Channel connection closed"),
            Self::NoRuntime => write!(f, "No tokio runtime available to drive the connection"),
        }
    }
}

impl StdError for PortError {}

impl From<PortError> for crate::error::Error {
    fn from(e: PortError) -> Self {
        let kind = match e {
            PortError::NoRuntime => crate::error::Kind::Internal,
            _ => crate::error::Kind::Transport,
        };
        crate::error::Error::with_source(kind, e)
    }
}
