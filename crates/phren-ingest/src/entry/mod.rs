//! Log entry model, decoding and signer identity extraction

pub mod decoder;
pub mod identity;
pub mod model;
mod keyring;

pub use decoder::decode_entry;
pub use identity::{extract_identity, CertificateExtension, Identity, X509Identity};
pub use model::{object_key, ContentHash, EntryKind, LogEntry, Signature};
