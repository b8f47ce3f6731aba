use axum::http::HeaderMap;
use bytes::Bytes;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::error;

use crate::constants::{CHUNK_DIR_NAME, MANIFEST_DIR_NAME, MANIFEST_EXT, TMP_DIR_NAME};
use crate::error::ApiError;
use crate::key_utils::Key;

pub fn parse_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(axum::http::header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

pub fn hash_hex(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// chunks/<aa>/<chunk_id>, sharded on the first byte of the (hex) id.
pub fn chunk_path(root: &Path, chunk_id: &str) -> PathBuf {
    let shard = chunk_id.get(..2).unwrap_or("00");
    root.join(CHUNK_DIR_NAME).join(shard).join(chunk_id)
}

pub fn manifest_path(root: &Path, key: &Key) -> PathBuf {
    root.join(MANIFEST_DIR_NAME)
        .join(format!("{}.{}", key.storage_name(), MANIFEST_EXT))
}

pub fn tmp_path(root: &Path, name: &str) -> PathBuf {
    root.join(TMP_DIR_NAME).join(name)
}

/// Streams a request body into `file`, returning its size and blake3 etag.
/// Fails with `TooLarge` as soon as more than `max_size` bytes arrive.
pub async fn stream_to_file_with_hash<S, E>(
    mut stream: S,
    file: &mut File,
    max_size: u64,
) -> Result<(u64, String), ApiError>
where
    S: futures_util::Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut hasher = blake3::Hasher::new();
    let mut total: u64 = 0;

    const BUFFER_SIZE: usize = 1024 * 1024;
    let mut buffer = Vec::with_capacity(BUFFER_SIZE);

    while let Some(next) = stream.next().await {
        let chunk: Bytes = next.map_err(|e| {
            error!("stream error: {e}");
            ApiError::Any(anyhow::anyhow!("stream error"))
        })?;

        total = total
            .checked_add(chunk.len() as u64)
            .ok_or(ApiError::TooLarge)?;
        if total > max_size {
            return Err(ApiError::TooLarge);
        }

        hasher.update(&chunk);
        buffer.extend_from_slice(&chunk);

        if buffer.len() >= BUFFER_SIZE {
            file.write_all(&buffer).await?;
            buffer.clear();
        }
    }

    if !buffer.is_empty() {
        file.write_all(&buffer).await?;
    }
    file.flush().await?;

    let etag = hasher.finalize().to_hex().to_string();

    Ok((total, etag))
}
