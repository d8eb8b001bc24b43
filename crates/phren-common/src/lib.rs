//! Phren Common Library
//!
//! Shared error handling and logging for the phren workspace.
//!
//! - **Error Handling**: [`PhrenError`] and the [`Result`] alias used by
//!   configuration and pre-flight checks
//! - **Logging**: a single place that installs the global `tracing`
//!   subscriber for every binary
//!
//! # Example
//!
//! ```no_run
//! use phren_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;

pub use error::{PhrenError, Result};
