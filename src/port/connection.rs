#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

#[cfg(feature = "tracing")]
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use backoff::backoff::{Backoff as _, Constant};
use futures::StreamExt as _;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::sleep_until;
use tokio_util::sync::CancellationToken;

use super::config::Config;
use super::error::PortError;
use super::traits::{Connection, MessageHandler, Transport, TransportEvent};
use crate::Result;
use crate::error::Error;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and no attempt scheduled
    Disconnected,
    /// Waiting for the next connection attempt
    Reconnecting {
        /// Consecutive failed connection attempts so far
        attempt: u32,
    },
    /// Successfully connected
    Connected {
        /// When the connection was established
        since: Instant,
    },
    /// Shut down by the owner, no further attempts are made
    Closed,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Transport handle, tagged by lifecycle.
enum Link<C> {
    Disconnected,
    Connected {
        connection: C,
        /// Distinguishes events of this connection from those of earlier ones
        epoch: u64,
    },
    Closed,
}

impl<C> Link<C> {
    const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// Everything mutated by sends, transport events and timers.
struct Shared<M, C> {
    link: Link<C>,
    queue: VecDeque<M>,
    pending_retry: Option<AbortHandle>,
    backoff: Constant,
    epoch: u64,
    failed_attempts: u32,
}

struct Inner<M, T>
where
    M: Send + 'static,
    T: Transport<M>,
{
    name: String,
    transport: T,
    config: Config,
    handler: Option<Arc<dyn MessageHandler<M>>>,
    shared: Mutex<Shared<M, T::Connection>>,
    state_tx: watch::Sender<ConnectionState>,
    runtime: Handle,
    cancel: CancellationToken,
}

/// Keeps a named channel to a background worker usable across suspensions and restarts.
///
/// Messages passed to [`ConnectionManager::send`] are transmitted immediately when the channel
/// is open, and otherwise queued and delivered in order once the channel is re-established.
/// Reconnection is attempted at a fixed interval for as long as the manager exists:
/// - Failed connection attempts and transport disconnects schedule a single retry
/// - Successful connects flush the queue, stopping at the first failed transmission
/// - Inbound messages are passed to the optional [`MessageHandler`]
///
/// Background tasks only hold weak references, so dropping the last clone of the manager
/// cancels any pending retry.
///
/// # Example
///
/// ```ignore
/// let hub = LocalHub::new();
/// let manager = ConnectionManager::with_handler(
///     "content-script".to_owned(),
///     hub.clone(),
///     Config::default(),
///     |msg: String| println!("Received: {msg}"),
/// )?;
///
/// // Queued until a listener for "content-script" is registered
/// manager.send("hello".to_owned());
/// ```
pub struct ConnectionManager<M, T>
where
    M: Send + 'static,
    T: Transport<M>,
{
    inner: Arc<Inner<M, T>>,
}

impl<M, T> Clone for ConnectionManager<M, T>
where
    M: Send + 'static,
    T: Transport<M>,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M, T> ConnectionManager<M, T>
where
    M: Send + 'static,
    T: Transport<M>,
{
    /// Create a connection manager for `name` and attempt to connect immediately.
    ///
    /// Must be called within a tokio runtime, which drives retries and inbound events.
    pub fn new(name: String, transport: T, config: Config) -> Result<Self> {
        Self::start(name, transport, config, None)
    }

    /// Create a connection manager whose inbound messages are passed to `handler`.
    ///
    /// A panicking handler is logged and does not affect the channel.
    pub fn with_handler<H: MessageHandler<M>>(
        name: String,
        transport: T,
        config: Config,
        handler: H,
    ) -> Result<Self> {
        Self::start(name, transport, config, Some(Arc::new(handler)))
    }

    fn start(
        name: String,
        transport: T,
        config: Config,
        handler: Option<Arc<dyn MessageHandler<M>>>,
    ) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::validation("channel name must not be empty"));
        }
        let runtime = Handle::try_current().map_err(|_e| PortError::NoRuntime)?;
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        let inner = Arc::new(Inner {
            name,
            transport,
            handler,
            shared: Mutex::new(Shared {
                link: Link::Disconnected,
                queue: VecDeque::new(),
                pending_retry: None,
                backoff: config.reconnect.clone().into(),
                epoch: 0,
                failed_attempts: 0,
            }),
            config,
            state_tx,
            runtime,
            cancel: CancellationToken::new(),
        });
        inner.connect();

        Ok(Self { inner })
    }

    /// Send `message` now, or queue it until the channel is available.
    ///
    /// Never fails: undeliverable messages wait in the queue and are retried, in order, after
    /// the next successful connect. Messages sent after [`ConnectionManager::close`] are dropped.
    pub fn send(&self, message: M) {
        let inner = &self.inner;
        let mut shared = inner.lock();

        if matches!(shared.link, Link::Closed) {
            #[cfg(feature = "tracing")]
            tracing::debug!(channel = %inner.name, "Dropping message sent on closed channel");
            return;
        }

        if !shared.link.is_connected() {
            shared.queue.push_back(message);
        } else if shared.queue.is_empty() {
            if inner.raw_send(&shared, &message) {
                return;
            }
            shared.queue.push_back(message);
        } else {
            // Earlier messages are still waiting, so this one must not overtake them
            shared.queue.push_back(message);
            inner.flush(&mut shared);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            channel = %inner.name,
            queued = shared.queue.len(),
            "Message queued"
        );
        inner.schedule_reconnect(&mut shared);
    }

    /// Serialize `request` as JSON and [`send`](ConnectionManager::send) it.
    pub fn send_json<R: Serialize>(&self, request: &R) -> Result<()>
    where
        M: From<String>,
    {
        let json = serde_json::to_string(request)?;
        self.send(M::from(json));
        Ok(())
    }

    /// Attempt to transmit `message` on the current connection without queuing it.
    ///
    /// Returns `false` when disconnected or when the transport fails to send.
    pub fn raw_send(&self, message: &M) -> bool {
        let shared = self.inner.lock();
        self.inner.raw_send(&shared, message)
    }

    /// Stop reconnecting and disconnect, returning the messages that were never delivered.
    ///
    /// Subsequent sends are dropped.
    pub fn close(&self) -> Vec<M> {
        let mut shared = self.inner.lock();
        self.inner.cancel.cancel();
        if let Some(retry) = shared.pending_retry.take() {
            retry.abort();
        }
        shared.link = Link::Closed;
        self.inner.state_tx.send_replace(ConnectionState::Closed);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            channel = %self.inner.name,
            undelivered = shared.queue.len(),
            "Channel closed"
        );
        shared.queue.drain(..).collect()
    }

    /// Name of the channel this manager (re-)opens.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.lock().link.is_connected()
    }

    /// Number of messages waiting for delivery.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    ///
    /// Useful for re-establishing per-connection context (e.g. a handshake) after reconnects.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }
}

impl<M, T> Inner<M, T>
where
    M: Send + 'static,
    T: Transport<M>,
{
    fn lock(&self) -> MutexGuard<'_, Shared<M, T::Connection>> {
        // Every critical section leaves `Shared` consistent, so a poisoned lock is recoverable.
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the channel, flushing the queue on success and scheduling a retry on failure.
    fn connect(self: &Arc<Self>) {
        let mut shared = self.lock();
        // This is either the initial attempt or the pending retry firing
        shared.pending_retry = None;
        if !matches!(shared.link, Link::Disconnected) {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            channel = %self.name,
            browser = %self.config.environment,
            "Connecting"
        );

        match self.transport.open_channel(&self.name) {
            Ok((connection, events)) => {
                shared.epoch = shared.epoch.wrapping_add(1);
                let epoch = shared.epoch;
                shared.link = Link::Connected { connection, epoch };
                shared.failed_attempts = 0;
                shared.backoff.reset();
                self.state_tx.send_replace(ConnectionState::Connected {
                    since: Instant::now(),
                });

                #[cfg(feature = "tracing")]
                tracing::debug!(channel = %self.name, epoch, "Connected");

                self.runtime.spawn(Self::pump(
                    Arc::downgrade(self),
                    events,
                    epoch,
                    self.handler.as_ref().map(Arc::clone),
                    self.cancel.clone(),
                ));
                self.flush(&mut shared);
            }
            Err(e) => {
                shared.link = Link::Disconnected;
                shared.failed_attempts = shared.failed_attempts.saturating_add(1);

                #[cfg(feature = "tracing")]
                tracing::warn!(
                    channel = %self.name,
                    browser = %self.config.environment,
                    attempt = shared.failed_attempts,
                    error = %e,
                    "Unable to connect"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = &e;

                self.schedule_reconnect(&mut shared);
            }
        }
    }

    /// Drain inbound events of one connection until it goes away.
    async fn pump(
        inner: Weak<Self>,
        mut events: T::Events,
        epoch: u64,
        handler: Option<Arc<dyn MessageHandler<M>>>,
        cancel: CancellationToken,
    ) {
        let reason = loop {
            let event = tokio::select! {
                () = cancel.cancelled() => return,
                event = events.next() => event,
            };

            match event {
                Some(TransportEvent::Message(message)) => {
                    if let Some(handler) = &handler {
                        dispatch(handler.as_ref(), message);
                    }
                }
                Some(TransportEvent::Disconnected { reason }) => break reason,
                None => break None,
            }
        };

        if let Some(inner) = inner.upgrade() {
            inner.handle_disconnect(epoch, reason);
        }
    }

    fn handle_disconnect(self: &Arc<Self>, epoch: u64, reason: Option<String>) {
        let mut shared = self.lock();
        let current = matches!(
            shared.link,
            Link::Connected { epoch: current, .. } if current == epoch
        );
        if !current {
            #[cfg(feature = "tracing")]
            tracing::debug!(channel = %self.name, epoch, "Ignoring disconnect of stale connection");
            return;
        }

        shared.link = Link::Disconnected;
        self.state_tx.send_replace(ConnectionState::Disconnected);

        #[cfg(feature = "tracing")]
        tracing::info!(channel = %self.name, reason = ?reason, "Channel disconnected");
        #[cfg(not(feature = "tracing"))]
        let _ = &reason;

        self.schedule_reconnect(&mut shared);
    }

    fn raw_send(&self, shared: &Shared<M, T::Connection>, message: &M) -> bool {
        let Link::Connected { connection, .. } = &shared.link else {
            #[cfg(feature = "tracing")]
            tracing::debug!(channel = %self.name, "raw_send: not connected");
            return false;
        };

        match connection.send(message) {
            Ok(()) => true,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(channel = %self.name, error = %e, "Send failed");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                false
            }
        }
    }

    /// Send queued messages in order, stopping at the first one that fails.
    fn flush(&self, shared: &mut Shared<M, T::Connection>) {
        while let Some(message) = shared.queue.pop_front() {
            #[cfg(feature = "tracing")]
            tracing::debug!(channel = %self.name, "Sending queued message");

            if !self.raw_send(shared, &message) {
                shared.queue.push_front(message);
                break;
            }
        }
    }

    /// Schedule one connection attempt after the reconnect delay.
    ///
    /// No-op while connected, after close, or when an attempt is already pending.
    fn schedule_reconnect(self: &Arc<Self>, shared: &mut Shared<M, T::Connection>) {
        if !matches!(shared.link, Link::Disconnected) || self.cancel.is_cancelled() {
            return;
        }
        if shared
            .pending_retry
            .as_ref()
            .is_some_and(|retry| !retry.is_finished())
        {
            return;
        }
        let Some(delay) = shared.backoff.next_backoff() else {
            return;
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(channel = %self.name, ?delay, "Scheduling reconnection attempt");

        let deadline = tokio::time::Instant::now() + delay;
        let inner = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let retry = self.runtime.spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = sleep_until(deadline) => {
                    if let Some(inner) = inner.upgrade() {
                        inner.connect();
                    }
                }
            }
        });
        shared.pending_retry = Some(retry.abort_handle());
        self.state_tx.send_replace(ConnectionState::Reconnecting {
            attempt: shared.failed_attempts,
        });
    }
}

impl<M, T> Drop for Inner<M, T>
where
    M: Send + 'static,
    T: Transport<M>,
{
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Invoke `handler`, containing any panic so the event pump keeps running.
fn dispatch<M: 'static>(handler: &dyn MessageHandler<M>, message: M) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler.handle(message))) {
        #[cfg(feature = "tracing")]
        tracing::error!(panic = panic_message(panic.as_ref()), "Message handler panicked");
        #[cfg(not(feature = "tracing"))]
        let _ = &panic;
    }
}

#[cfg(feature = "tracing")]
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::error::Kind;
    use crate::port::local::LocalHub;

    const CHANNEL: &str = "background";

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn requires_runtime() {
        let hub = LocalHub::<String>::new();
        let Err(err) = ConnectionManager::new(CHANNEL.to_owned(), hub, Config::default()) else {
            panic!("construction outside a runtime should fail");
        };
        assert_eq!(err.kind(), Kind::Internal);
    }

    #[tokio::test]
    async fn rejects_empty_channel_name() {
        let hub = LocalHub::<String>::new();
        let Err(err) = ConnectionManager::new(String::new(), hub, Config::default()) else {
            panic!("empty channel name should be rejected");
        };
        assert_eq!(err.kind(), Kind::Validation);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_is_noop_while_connected() {
        let hub = LocalHub::<String>::new();
        let _listener = hub.listen(CHANNEL);
        let manager = ConnectionManager::new(CHANNEL.to_owned(), hub, Config::default()).unwrap();
        assert!(manager.is_connected(), "listener exists, connect should succeed");

        {
            let mut shared = manager.inner.lock();
            manager.inner.schedule_reconnect(&mut shared);
            assert!(shared.pending_retry.is_none(), "no timer while connected");
        }
        assert!(manager.state().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_sends_share_one_retry() {
        let hub = LocalHub::<String>::new();
        let manager = ConnectionManager::new(CHANNEL.to_owned(), hub, Config::default()).unwrap();
        assert!(
            manager.inner.lock().pending_retry.is_some(),
            "failed connect should schedule a retry"
        );

        for i in 0..5 {
            manager.send(format!("msg-{i}"));
        }

        assert_eq!(manager.queued(), 5);
        assert_eq!(
            manager.state(),
            ConnectionState::Reconnecting { attempt: 1 },
            "sends while disconnected do not count as connection attempts"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retry_deadline_is_set_when_scheduled() {
        let hub = LocalHub::<String>::new();
        let manager = ConnectionManager::new(CHANNEL.to_owned(), hub.clone(), Config::default())
            .unwrap();
        let mut listener = hub.listen(CHANNEL);

        // Advance before the retry task is ever polled
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;

        assert!(manager.is_connected(), "retry fires one delay after the failed connect");
        assert!(listener.accept().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_disconnect_is_ignored() {
        let hub = LocalHub::<String>::new();
        let _listener = hub.listen(CHANNEL);
        let manager = ConnectionManager::new(CHANNEL.to_owned(), hub, Config::default()).unwrap();

        manager.inner.handle_disconnect(0, Some("old connection".to_owned()));

        assert!(manager.is_connected(), "stale epoch must not tear down the link");
        assert!(manager.inner.lock().pending_retry.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_manager_cancels_retry() {
        let hub = LocalHub::<String>::new();
        let manager = ConnectionManager::new(CHANNEL.to_owned(), hub.clone(), Config::default())
            .unwrap();
        let cancel = manager.inner.cancel.clone();

        drop(manager);
        assert!(cancel.is_cancelled(), "drop should cancel background tasks");

        let mut listener = hub.listen(CHANNEL);
        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;

        let accepted = tokio::time::timeout(Duration::from_millis(1), listener.accept()).await;
        assert!(accepted.is_err(), "no connection attempt after drop");
    }

    #[tokio::test(start_paused = true)]
    async fn handler_panic_does_not_stop_dispatch() {
        let hub = LocalHub::<String>::new();
        let mut listener = hub.listen(CHANNEL);
        let handled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&handled);

        let manager = ConnectionManager::with_handler(
            CHANNEL.to_owned(),
            hub,
            Config::default(),
            move |msg: String| {
                assert_ne!(msg, "boom", "handler rejects boom");
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        let port = listener.accept().await.unwrap();
        port.send("boom".to_owned()).unwrap();
        port.send("fine".to_owned()).unwrap();
        settle().await;

        assert_eq!(handled.load(Ordering::SeqCst), 1);
        assert!(manager.is_connected(), "panicking handler must not drop the link");
    }
}
