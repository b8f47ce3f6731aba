use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct StorageInfo {
    pub total: u64,
    pub used: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeInfo {
    pub node_id: String,             // provided by the node (stable)
    pub address: String,
    pub port: u16,
    pub online: bool,
    pub last_heartbeat_ms: i128,     // wall-clock (UTC ms)
    pub owner: Option<String>,       // set for personal nodes
    pub storage: StorageInfo,
    pub version: Option<String>,
}

impl NodeInfo {
    pub fn location(&self) -> NodeLocation {
        NodeLocation {
            node_id: self.node_id.clone(),
            address: self.address.clone(),
            port: self.port,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeLocation {
    pub node_id: String,
    pub address: String,
    pub port: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub node_id: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub storage: Option<StorageInfo>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub node_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatResponse {
    /// False when the coordinator does not know the node and ignored the heartbeat.
    pub registered: bool,
}

/// Body of both announce and deannounce.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileClaim {
    pub node_id: String,
    pub filename: String,
    pub size: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileInfo {
    pub filename: String,
    pub owners: Vec<String>,
    pub size: u64,
    pub upload_time_ms: i128,
    pub replicated: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountUsage {
    pub owner: String,
    pub used: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub filename: String,
    pub size: u64,
    pub etag: String,
    pub chunk_count: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub removed: u64,
}
