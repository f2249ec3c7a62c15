//! # framecast-daemon
//!
//! Runs the framecast pipeline against a TOML config file.
//!
//! - **config**: `DaemonConfig`, the `[[outputs]]` snapshot loader
//! - **pattern**: `PatternRenderer`, a test-pattern stand-in for a browser
//! - **sender**: `NullSender` and the chunked `UdpFrameSender`
//! - **watcher**: live reload of the config file
//! - **service**: `DaemonService`, which ties them to a `Reconciler`

pub mod config;
pub mod pattern;
pub mod sender;
pub mod service;
pub mod watcher;
