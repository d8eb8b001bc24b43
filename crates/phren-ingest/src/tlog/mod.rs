//! Transparency log access

pub mod client;
pub mod types;

pub use client::{RekorClient, TransparencyLog, DEFAULT_REKOR_URL};
pub use types::{LogInfo, RawEntry};
