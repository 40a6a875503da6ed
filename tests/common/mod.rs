#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Each test binary only uses some of the shared helpers"
)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use worker_connection::Result;
use worker_connection::port::{Connection, PortError, Transport, TransportEvent};

pub const CHANNEL: &str = "background";

/// Default reconnect delay of the connection manager.
pub const RETRY: Duration = Duration::from_secs(1);

/// Let spawned tasks run without moving the paused clock.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Move the paused clock forward and let timers that fired run to completion.
pub async fn advance(duration: Duration) {
    tokio::time::advance(duration).await;
    settle().await;
}

#[derive(Default)]
struct State {
    available: bool,
    opens: Vec<Instant>,
    attempted: Vec<String>,
    delivered: Vec<String>,
    failing: HashSet<String>,
    events: Option<UnboundedSender<TransportEvent<String>>>,
}

/// Scripted transport recording every open and every transmission attempt.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<State>>,
}

impl MockTransport {
    pub fn new(available: bool) -> Self {
        let transport = Self::default();
        transport.set_available(available);
        transport
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Whether subsequent opens succeed.
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Make every transmission of `message` fail.
    pub fn fail_sends_of(&self, message: &str) {
        self.lock().failing.insert(message.to_owned());
    }

    pub fn recover_sends_of(&self, message: &str) {
        self.lock().failing.remove(message);
    }

    pub fn opens(&self) -> Vec<Instant> {
        self.lock().opens.clone()
    }

    pub fn attempted(&self) -> Vec<String> {
        self.lock().attempted.clone()
    }

    pub fn delivered(&self) -> Vec<String> {
        self.lock().delivered.clone()
    }

    /// Fire a disconnect on the current connection.
    pub fn disconnect(&self, reason: &str) {
        if let Some(events) = self.lock().events.take() {
            events
                .unbounded_send(TransportEvent::Disconnected {
                    reason: Some(reason.to_owned()),
                })
                .unwrap();
        }
    }

    /// Deliver an inbound message on the current connection.
    pub fn push_inbound(&self, message: &str) {
        let state = self.lock();
        let events = state.events.as_ref().unwrap();
        events
            .unbounded_send(TransportEvent::Message(message.to_owned()))
            .unwrap();
    }
}

impl Transport<String> for MockTransport {
    type Connection = MockConnection;
    type Events = UnboundedReceiver<TransportEvent<String>>;

    fn open_channel(&self, name: &str) -> Result<(Self::Connection, Self::Events)> {
        let mut state = self.lock();
        state.opens.push(Instant::now());

        if !state.available {
            return Err(PortError::ConnectFailed {
                channel: name.to_owned(),
                reason: "worker is suspended".to_owned(),
            }
            .into());
        }

        let (events_tx, events_rx) = mpsc::unbounded();
        state.events = Some(events_tx);

        Ok((
            MockConnection {
                state: Arc::clone(&self.state),
            },
            events_rx,
        ))
    }
}

pub struct MockConnection {
    state: Arc<Mutex<State>>,
}

impl Connection<String> for MockConnection {
    fn send(&self, message: &String) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.attempted.push(message.clone());

        if state.failing.contains(message) {
            return Err(PortError::TransmitFailed(format!("worker refused {message}")).into());
        }

        state.delivered.push(message.clone());
        Ok(())
    }
}

#[must_use]
pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| (*item).to_owned()).collect()
}
