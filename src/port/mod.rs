//! Resilient channel infrastructure.
//!
//! This module keeps a named channel to a background worker usable while the worker is
//! suspended, restarted or otherwise unreachable, delivering messages in order once it returns.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: Queues outbound messages and reconnects at a fixed interval
//! - [`Transport`]: Trait for the host primitive that opens named channels
//! - [`MessageHandler`]: Trait for reacting to inbound messages
//! - [`LocalHub`]: In-process [`Transport`] whose listeners stand in for the worker
//!
//! # Example
//!
//! ```ignore
//! let hub = LocalHub::new();
//! let mut worker = hub.listen("background");
//!
//! let connection = ConnectionManager::new("background".to_owned(), hub, Config::default())?;
//! connection.send("hello".to_owned());
//!
//! let mut port = worker.accept().await.unwrap();
//! assert_eq!(port.recv().await.as_deref(), Some("hello"));
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod local;
pub mod traits;

pub use connection::{ConnectionManager, ConnectionState};
pub use local::LocalHub;
#[expect(
    clippy::module_name_repetitions,
    reason = "PortError includes module name for clarity when used outside this module"
)]
pub use error::PortError;
pub use traits::*;
