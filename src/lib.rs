#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod error;
pub mod port;
pub mod types;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Environment variable the demo reads to pick a [`types::Browser`].
pub const BROWSER_VAR: &str = "WORKER_CONNECTION_BROWSER";
