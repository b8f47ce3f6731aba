use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::fs::{self, File};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{Instrument, info, warn};

use common::constants::REPLICATED_FROM_HEADER;
use common::error::ApiError;
use common::key_utils::Key;
use common::schemas::NodeInfo;
use common::trace_middleware::traced;

use crate::client::list_nodes;
use crate::state::VolumeState;

#[derive(thiserror::Error, Debug)]
pub enum ReplicationError {
    #[error("push to {node_id} timed out after {timeout:?}")]
    Timeout { node_id: String, timeout: Duration },
    #[error("push to {node_id} failed: {source}")]
    Upstream {
        node_id: String,
        #[source]
        source: ApiError,
    },
}

/// Pushes the staged upload at `path` to every other online node, then
/// deletes it. Runs detached: failures are logged and never reach the
/// uploader.
pub fn spawn_replication(state: VolumeState, key: Key, path: PathBuf) -> JoinHandle<()> {
    let span = tracing::info_span!("replicate", filename = %key);
    tokio::spawn(
        async move {
            replicate_to_peers(&state, &key, &path).await;
            if let Err(e) = fs::remove_file(&path).await {
                warn!("failed to remove staged upload {}: {e}", path.display());
            }
        }
        .instrument(span),
    )
}

async fn replicate_to_peers(state: &VolumeState, key: &Key, path: &Path) {
    let peers = match list_nodes(state).await {
        Ok(nodes) => nodes
            .into_iter()
            .filter(|n| n.online && n.node_id != state.node_id)
            .collect::<Vec<_>>(),
        Err(e) => {
            warn!("replication skipped, node list unavailable: {e}");
            return;
        }
    };

    if peers.is_empty() {
        return;
    }

    let pushes = peers
        .iter()
        .map(|peer| push_with_timeout(state, peer, key, path));
    let results = join_all(pushes).await;

    let mut delivered = 0;
    for result in results {
        match result {
            Ok(()) => delivered += 1,
            Err(e) => warn!("{e}"),
        }
    }

    info!(delivered, peers = peers.len(), "replication finished");
}

async fn push_with_timeout(
    state: &VolumeState,
    peer: &NodeInfo,
    key: &Key,
    path: &Path,
) -> Result<(), ReplicationError> {
    let timeout = state.replication_timeout;
    match tokio::time::timeout(timeout, push(state, peer, key, path)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(ReplicationError::Upstream {
            node_id: peer.node_id.clone(),
            source,
        }),
        Err(_) => Err(ReplicationError::Timeout {
            node_id: peer.node_id.clone(),
            timeout,
        }),
    }
}

async fn push(
    state: &VolumeState,
    peer: &NodeInfo,
    key: &Key,
    path: &Path,
) -> Result<(), ApiError> {
    let file = File::open(path).await?;
    let len = file.metadata().await?.len();
    let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

    let url = format!("{}/files/{}", peer.base_url(), key.enc());
    let resp = traced(state.http_client.put(url))
        .header(REPLICATED_FROM_HEADER, &state.node_id)
        .header(reqwest::header::CONTENT_LENGTH, len)
        .body(body)
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(ApiError::UpstreamStatus(resp.status()));
    }
    Ok(())
}
