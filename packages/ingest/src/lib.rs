#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Ingestion pipeline that mirrors the vendor subscription user listing
//! into the local store.
//!
//! [`IngestionController`] runs the page loop, [`StatusChannel`] relays
//! its status events to one live observer, and [`MirrorConfig`] holds the
//! process configuration shared with the server.

pub mod config;
pub mod controller;
pub mod progress;

pub use config::{ConfigError, MirrorConfig};
pub use controller::{IngestError, IngestOutcome, IngestionController};
pub use progress::StatusChannel;
