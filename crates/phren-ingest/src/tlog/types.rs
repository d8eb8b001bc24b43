//! Wire types of the Rekor REST API

use serde::{Deserialize, Serialize};

/// `GET /api/v1/log`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogInfo {
    pub tree_size: u64,
    #[serde(default)]
    pub root_hash: Option<String>,
    #[serde(default, rename = "treeID")]
    pub tree_id: Option<String>,
}

/// One value of the `GET /api/v1/log/entries?logIndex=N` response object,
/// which is keyed by entry UUID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEntry {
    /// Base64 JSON document carrying `kind`, `apiVersion` and `spec`
    pub body: String,
    pub integrated_time: i64,
    #[serde(rename = "logID")]
    pub log_id: String,
    pub log_index: u64,
}
