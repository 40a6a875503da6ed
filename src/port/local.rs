//! In-process [`Transport`] connecting managers to named listeners.
//!
//! A [`LocalListener`] plays the role of the background worker. While it is registered, opening
//! its channel succeeds. Dropping it makes further opens fail until a new listener is registered
//! under the same name and closes ports it has not yet accepted. Accepted [`LocalPort`]s belong to
//! the worker and stay open until they are dropped or [`LocalPort::disconnect`]ed, so suspending a
//! worker means dropping both.

#![expect(
    clippy::module_name_repetitions,
    reason = "Local transport types are named after the module to read clearly when re-exported"
)]

use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt as _;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::error::PortError;
use super::traits::{Connection, Transport, TransportEvent};
use crate::Result;

type Endpoints<M> = Arc<DashMap<String, UnboundedSender<LocalPort<M>>>>;

/// Registry of named listeners, usable as a [`Transport`].
pub struct LocalHub<M> {
    endpoints: Endpoints<M>,
}

impl<M> Clone for LocalHub<M> {
    fn clone(&self) -> Self {
        Self {
            endpoints: Arc::clone(&self.endpoints),
        }
    }
}

impl<M> Default for LocalHub<M> {
    fn default() -> Self {
        Self {
            endpoints: Arc::new(DashMap::new()),
        }
    }
}

impl<M> LocalHub<M> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for `name`, replacing any previous one.
    #[must_use]
    pub fn listen(&self, name: &str) -> LocalListener<M> {
        let (tx, incoming) = mpsc::unbounded();
        self.endpoints.insert(name.to_owned(), tx);

        LocalListener {
            name: name.to_owned(),
            endpoints: Arc::clone(&self.endpoints),
            incoming,
        }
    }

    /// Whether a live listener is registered for `name`.
    #[must_use]
    pub fn is_listening(&self, name: &str) -> bool {
        self.endpoints.get(name).is_some_and(|tx| !tx.is_closed())
    }
}

impl<M> Transport<M> for LocalHub<M>
where
    M: Clone + Send + 'static,
{
    type Connection = LocalConnection<M>;
    type Events = UnboundedReceiver<TransportEvent<M>>;

    fn open_channel(&self, name: &str) -> Result<(Self::Connection, Self::Events)> {
        let (to_worker, from_client) = mpsc::unbounded();
        let (to_client, from_worker) = mpsc::unbounded();
        let port = LocalPort {
            name: name.to_owned(),
            outbound: to_client,
            inbound: from_client,
        };

        let accepted = self
            .endpoints
            .get(name)
            .map(|listener| listener.unbounded_send(port).is_ok());

        match accepted {
            Some(true) => Ok((
                LocalConnection {
                    outbound: to_worker,
                },
                from_worker,
            )),
            Some(false) => {
                self.endpoints.remove_if(name, |_, tx| tx.is_closed());
                Err(PortError::ConnectFailed {
                    channel: name.to_owned(),
                    reason: "listener is gone".to_owned(),
                }
                .into())
            }
            None => Err(PortError::ConnectFailed {
                channel: name.to_owned(),
                reason: "no listener registered".to_owned(),
            }
            .into()),
        }
    }
}

/// Client end of a channel opened through [`LocalHub`].
pub struct LocalConnection<M> {
    outbound: UnboundedSender<TransportEvent<M>>,
}

impl<M> Connection<M> for LocalConnection<M>
where
    M: Clone + Send + 'static,
{
    fn send(&self, message: &M) -> Result<()> {
        self.outbound
            .unbounded_send(TransportEvent::Message(message.clone()))
            .map_err(|_e| PortError::ConnectionClosed)?;
        Ok(())
    }
}

/// Worker side of a registration: yields one [`LocalPort`] per opened channel.
pub struct LocalListener<M> {
    name: String,
    endpoints: Endpoints<M>,
    incoming: UnboundedReceiver<LocalPort<M>>,
}

impl<M> LocalListener<M> {
    /// Wait for the next client to open this listener's channel.
    pub async fn accept(&mut self) -> Option<LocalPort<M>> {
        self.incoming.next().await
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<M> Drop for LocalListener<M> {
    fn drop(&mut self) {
        // A newer listener may have replaced this one
        let incoming = &self.incoming;
        self.endpoints
            .remove_if(&self.name, |_, tx| tx.is_connected_to(incoming));
    }
}

/// Worker end of one opened channel.
///
/// Dropping the port disconnects the client.
pub struct LocalPort<M> {
    name: String,
    outbound: UnboundedSender<TransportEvent<M>>,
    inbound: UnboundedReceiver<TransportEvent<M>>,
}

impl<M> LocalPort<M> {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send `message` to the client.
    pub fn send(&self, message: M) -> Result<()> {
        self.outbound
            .unbounded_send(TransportEvent::Message(message))
            .map_err(|_e| PortError::ConnectionClosed)?;
        Ok(())
    }

    /// Receive the next message from the client, or `None` once the client is gone.
    pub async fn recv(&mut self) -> Option<M> {
        match self.inbound.next().await? {
            TransportEvent::Message(message) => Some(message),
            TransportEvent::Disconnected { .. } => None,
        }
    }

    /// Close the channel, telling the client why.
    pub fn disconnect(self, reason: Option<String>) {
        _ = self
            .outbound
            .unbounded_send(TransportEvent::Disconnected { reason });
    }
}
