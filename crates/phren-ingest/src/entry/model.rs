use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identity::Identity;

/// Entry types the decoder understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Rekord,
    #[serde(rename = "hashedrekord")]
    HashedRekord,
    #[serde(rename = "intoto")]
    InToto,
    Unsupported,
}

impl EntryKind {
    /// Map the `kind` tag of an entry body; unknown tags are `Unsupported`
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "rekord" => EntryKind::Rekord,
            "hashedrekord" => EntryKind::HashedRekord,
            "intoto" => EntryKind::InToto,
            _ => EntryKind::Unsupported,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Rekord => "rekord",
            EntryKind::HashedRekord => "hashedrekord",
            EntryKind::InToto => "intoto",
            EntryKind::Unsupported => "unsupported",
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHash {
    pub algorithm: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub format: String,
    /// Public key exactly as carried by the entry (base64)
    pub public_key: String,
    pub identity: Identity,
}

/// One decoded transparency log entry
///
/// A pure projection of the source entry. Nothing mutates it after decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub log_index: u64,
    pub integrated_time: DateTime<Utc>,
    pub log_id: String,
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<ContentHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

impl LogEntry {
    /// Minimal record for an entry whose kind is not understood
    pub fn unsupported(log_index: u64, integrated_time: DateTime<Utc>, log_id: String) -> Self {
        Self {
            log_index,
            integrated_time,
            log_id,
            kind: EntryKind::Unsupported,
            api_version: None,
            hash: None,
            signature: None,
        }
    }

    /// Blob store key for this entry
    pub fn object_key(&self) -> String {
        object_key(self.log_index)
    }

    /// Serialized form written to the blob store
    ///
    /// Compact, no trailing newline, and `&`, `<`, `>` are left as-is.
    pub fn to_canonical_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.signature.as_ref().map(|s| &s.identity)
    }
}

pub fn object_key(log_index: u64) -> String {
    format!("{log_index}/entry.json")
}
