use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::chunk::ChunkStore;

#[derive(Clone)]
pub struct VolumeState {
    pub http_client: Client,
    pub data_root: Arc<PathBuf>,
    pub chunks: Arc<ChunkStore>,
    pub coordinator_url: String,
    pub node_id: String,
    pub address: String, // advertised to the coordinator
    pub port: u16,
    pub owner: Option<String>,
    pub chunk_size: u64,
    pub max_size: u64,
    pub replication_timeout: Duration,
}
