//! Calls from a volume to the coordinator.

use serde::Serialize;
use tracing::{info, warn};

use common::error::ApiError;
use common::schemas::{FileClaim, NodeInfo, RegisterRequest, StorageInfo};
use common::trace_middleware::traced;

use crate::state::VolumeState;
use crate::store::disk_usage;

async fn post_json<T: Serialize>(state: &VolumeState, path: &str, body: &T) -> Result<(), ApiError> {
    let url = format!("{}{}", state.coordinator_url, path);
    let resp = traced(state.http_client.post(url)).json(body).send().await?;

    if !resp.status().is_success() {
        return Err(ApiError::UpstreamStatus(resp.status()));
    }
    Ok(())
}

pub async fn register(state: &VolumeState) -> anyhow::Result<()> {
    let total = match disk_usage(&state.data_root) {
        Ok(usage) => usage.total,
        Err(e) => {
            warn!("disk_usage error: {e:#}");
            0
        }
    };

    // `used` starts at zero: the coordinator counts it from announcements.
    let payload = RegisterRequest {
        node_id: state.node_id.clone(),
        address: state.address.clone(),
        port: state.port,
        owner: state.owner.clone(),
        storage: Some(StorageInfo { total, used: 0 }),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    };

    post_json(state, "/admin/register", &payload).await?;
    Ok(())
}

/// Registers, then announces every file this volume already holds so a
/// restarted coordinator relearns them.
pub async fn join_cluster(state: &VolumeState) -> anyhow::Result<()> {
    register(state).await?;

    let chunks = state.chunks.clone();
    let manifests = tokio::task::spawn_blocking(move || chunks.manifests()).await??;

    let count = manifests.len();
    for manifest in manifests {
        announce(state, &manifest.filename, manifest.original_size).await?;
    }

    info!("joined coordinator as {} ({count} local files)", state.node_id);

    Ok(())
}

pub async fn announce(state: &VolumeState, filename: &str, size: u64) -> Result<(), ApiError> {
    let claim = FileClaim {
        node_id: state.node_id.clone(),
        filename: filename.to_string(),
        size,
    };
    post_json(state, "/admin/files/announce", &claim).await
}

pub async fn deannounce(state: &VolumeState, filename: &str, size: u64) -> Result<(), ApiError> {
    let claim = FileClaim {
        node_id: state.node_id.clone(),
        filename: filename.to_string(),
        size,
    };
    post_json(state, "/admin/files/deannounce", &claim).await
}

pub async fn list_nodes(state: &VolumeState) -> Result<Vec<NodeInfo>, ApiError> {
    let url = format!("{}/admin/nodes", state.coordinator_url);
    let resp = traced(state.http_client.get(url)).send().await?;

    if !resp.status().is_success() {
        return Err(ApiError::UpstreamStatus(resp.status()));
    }
    Ok(resp.json().await?)
}
