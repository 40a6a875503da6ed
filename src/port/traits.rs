//! Core traits for pluggable channel transports.

use futures::Stream;

/// Event emitted by an open transport channel.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent<M> {
    /// Inbound message from the counterpart
    Message(M),
    /// The channel became unusable. Emitted at most once per connection.
    Disconnected {
        /// Reason reported by the transport, if any
        reason: Option<String>,
    },
}

/// Host-supplied primitive that opens named bidirectional channels.
///
/// Any `Err` from [`Transport::open_channel`] is a connect failure, whether the host raised it
/// or reported it out of band. Ending the event stream without a
/// [`TransportEvent::Disconnected`] is treated the same as a disconnect.
///
/// # Example
///
/// ```ignore
/// impl Transport<String> for RuntimePorts {
///     type Connection = RuntimePort;
///     type Events = PortEvents;
///
///     fn open_channel(&self, name: &str) -> crate::Result<(RuntimePort, PortEvents)> {
///         let port = self.runtime.connect(name)?;
///         Ok((port.clone(), port.events()))
///     }
/// }
/// ```
pub trait Transport<M>: Send + Sync + 'static {
    /// Sending half of an open channel
    type Connection: Connection<M>;
    /// Inbound events of an open channel
    type Events: Stream<Item = TransportEvent<M>> + Send + Unpin + 'static;

    /// Open the channel called `name`.
    fn open_channel(&self, name: &str) -> crate::Result<(Self::Connection, Self::Events)>;
}

/// Sending half of an open transport channel.
///
/// Dropping the connection closes the channel.
pub trait Connection<M>: Send + 'static {
    /// Transmit `message` immediately.
    ///
    /// Must return `Err` rather than silently drop the message.
    fn send(&self, message: &M) -> crate::Result<()>;
}

/// Reaction to inbound messages.
///
/// Implemented for any `Fn(M) + Send + Sync + 'static`.
pub trait MessageHandler<M>: Send + Sync + 'static {
    fn handle(&self, message: M);
}

impl<M, F> MessageHandler<M> for F
where
    F: Fn(M) + Send + Sync + 'static,
{
    fn handle(&self, message: M) {
        self(message);
    }
}
