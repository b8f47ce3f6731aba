use axum::{
    Router,
    body::Body,
    extract::{Json, Path, State},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
};
use anyhow::anyhow;
use std::path::PathBuf;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use uuid::Uuid;

use common::constants::REPLICATED_FROM_HEADER;
use common::error::ApiError;
use common::file_utils::{parse_content_length, stream_to_file_with_hash, tmp_path};
use common::key_utils::Key;
use common::schemas::{CleanupResponse, UploadResponse};
use common::trace_middleware::trace_context_middleware;

use crate::chunk::{ChunkError, ChunkStore, Manifest, StoreStats};
use crate::client::{announce, deannounce};
use crate::replicate::spawn_replication;
use crate::state::VolumeState;

pub fn build_router(state: VolumeState) -> Router {
    Router::new()
        .route(
            "/files/{filename}",
            put(upload_file).get(download_file).delete(delete_file),
        )
        .route("/files", get(list_files))
        .route("/admin/manifest/{filename}", get(get_manifest))
        .route("/admin/cleanup", post(cleanup))
        .route("/admin/stats", get(stats))
        .layer(middleware::from_fn(trace_context_middleware))
        .with_state(state)
}

/// Removes a staged file on drop unless disarmed.
struct TmpGuard(Option<PathBuf>);

impl TmpGuard {
    fn disarm(mut self) -> PathBuf {
        self.0.take().unwrap_or_default()
    }
}

impl Drop for TmpGuard {
    fn drop(&mut self) {
        if let Some(path) = self.0.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

async fn with_chunks<T, F>(ctx: &VolumeState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&ChunkStore) -> Result<T, ChunkError> + Send + 'static,
{
    let chunks = ctx.chunks.clone();
    tokio::task::spawn_blocking(move || f(&chunks))
        .await
        .map_err(|e| ApiError::Any(anyhow!("chunk task failed: {e}")))?
        .map_err(ApiError::from)
}

// PUT /files/{filename}
#[tracing::instrument(name = "volume.put", skip(ctx, headers, body))]
pub async fn upload_file(
    Path(filename): Path<String>,
    State(ctx): State<VolumeState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let key = Key::new(&filename)?;

    if parse_content_length(&headers).is_some_and(|len| len > ctx.max_size) {
        return Err(ApiError::TooLarge);
    }

    let staged = tmp_path(&ctx.data_root, &format!("{}.upload", Uuid::new_v4()));
    let guard = TmpGuard(Some(staged.clone()));

    let mut file = File::create(&staged).await?;
    let (size, etag) =
        stream_to_file_with_hash(body.into_data_stream(), &mut file, ctx.max_size).await?;
    file.sync_all().await?;
    drop(file);

    let manifest = {
        let (src, key, chunk_size) = (staged.clone(), key.clone(), ctx.chunk_size);
        with_chunks(&ctx, move |chunks| chunks.split(&src, &key, chunk_size)).await?
    };

    announce(&ctx, key.name(), size).await?;

    let replicated_from = headers
        .get(REPLICATED_FROM_HEADER)
        .and_then(|v| v.to_str().ok());
    match replicated_from {
        Some(from) => info!(size, from, "stored replica"),
        None => {
            info!(size, chunks = manifest.chunk_count, "stored upload");
            spawn_replication(ctx.clone(), key.clone(), guard.disarm());
        }
    }

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            filename: key.name().to_string(),
            size,
            etag,
            chunk_count: manifest.chunk_count,
        }),
    ))
}

// GET /files/{filename}
#[tracing::instrument(name = "volume.get", skip(ctx))]
pub async fn download_file(
    Path(filename): Path<String>,
    State(ctx): State<VolumeState>,
) -> Result<impl IntoResponse, ApiError> {
    let key = Key::new(&filename)?;
    let out = tmp_path(&ctx.data_root, &format!("{}.download", Uuid::new_v4()));
    let guard = TmpGuard(Some(out.clone()));

    let manifest = {
        let (key, out) = (key.clone(), out.clone());
        with_chunks(&ctx, move |chunks| chunks.reassemble(&key, &out)).await?
    };

    // The open handle keeps the data readable after the unlink.
    let file = File::open(&out).await?;
    drop(guard);

    let mut resp_headers = HeaderMap::new();
    resp_headers.insert(header::CONTENT_LENGTH, manifest.original_size.into());
    resp_headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/octet-stream"),
    );

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((StatusCode::OK, resp_headers, body))
}

// DELETE /files/{filename}
#[tracing::instrument(name = "volume.delete", skip(ctx))]
pub async fn delete_file(
    Path(filename): Path<String>,
    State(ctx): State<VolumeState>,
) -> Result<StatusCode, ApiError> {
    let key = Key::new(&filename)?;

    let manifest = {
        let key = key.clone();
        with_chunks(&ctx, move |chunks| {
            let manifest = chunks.manifest(&key)?;
            chunks.remove(&key)?;
            Ok(manifest)
        })
        .await
        .map_err(|e| match e {
            ApiError::ManifestNotFound(name) => ApiError::FileNotFound(name),
            e => e,
        })?
    };

    if let Err(e) = deannounce(&ctx, key.name(), manifest.original_size).await {
        warn!("deannounce failed: {e}");
    }

    let removed = with_chunks(&ctx, |chunks| chunks.cleanup()).await?;
    info!(removed, "file deleted");

    Ok(StatusCode::NO_CONTENT)
}

// GET /files
pub async fn list_files(State(ctx): State<VolumeState>) -> Result<Json<Vec<String>>, ApiError> {
    let manifests = with_chunks(&ctx, |chunks| chunks.manifests()).await?;
    Ok(Json(manifests.into_iter().map(|m| m.filename).collect()))
}

// GET /admin/manifest/{filename}
pub async fn get_manifest(
    Path(filename): Path<String>,
    State(ctx): State<VolumeState>,
) -> Result<Json<Manifest>, ApiError> {
    let key = Key::new(&filename)?;
    let manifest = with_chunks(&ctx, move |chunks| chunks.manifest(&key)).await?;
    Ok(Json(manifest))
}

// POST /admin/cleanup
#[tracing::instrument(name = "volume.admin.cleanup", skip(ctx))]
pub async fn cleanup(State(ctx): State<VolumeState>) -> Result<Json<CleanupResponse>, ApiError> {
    let removed = with_chunks(&ctx, |chunks| chunks.cleanup()).await?;
    Ok(Json(CleanupResponse { removed }))
}

// GET /admin/stats
pub async fn stats(State(ctx): State<VolumeState>) -> Result<Json<StoreStats>, ApiError> {
    Ok(Json(with_chunks(&ctx, |chunks| chunks.stats()).await?))
}
