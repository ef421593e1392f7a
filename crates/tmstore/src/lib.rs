//! `tmstore` - persistence layer for the transportation management dashboard
//!
//! The dashboard keeps all of its state in one flat key-value document. This
//! library provides a local durable store, a client for the hosted document,
//! a facade combining the two behind the [`KeyValueStore`] trait, and a
//! document proxy that keeps the hosted store's secret off the clients.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod facade;
pub mod local;
pub mod logging;
pub mod proxy;
pub mod remote;

pub use config::Config;
pub use document::{BackupRecord, Document};
pub use error::{Error, Result};
pub use facade::{Connectivity, FlushReport, KeyValueStore, RemoteBackedStore};
pub use local::{LocalStats, LocalStore};
pub use logging::init_logging;
pub use remote::RemoteClient;
