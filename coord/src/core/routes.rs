use std::convert::Infallible;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::Stream;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use common::error::ApiError;
use common::key_utils::Key;
use common::schemas::{
    AccountUsage, FileClaim, FileInfo, HeartbeatRequest, HeartbeatResponse, RegisterRequest,
};

use crate::core::events::ControlEvent;
use crate::core::state::CoordinatorState;

// POST /admin/register
#[tracing::instrument(name="coord.admin.register", skip(ctx, req), fields(node_id = %req.node_id, address = %req.address, port = req.port))]
pub async fn register_node(
    State(ctx): State<CoordinatorState>,
    Json(req): Json<RegisterRequest>,
) -> Result<StatusCode, ApiError> {
    if req.node_id.trim().is_empty() {
        return Err(ApiError::InvalidRequest("node_id must not be empty".into()));
    }
    if req.address.trim().is_empty() {
        return Err(ApiError::InvalidRequest("address must not be empty".into()));
    }

    ctx.plane.register(req);

    Ok(StatusCode::OK)
}

// POST /admin/heartbeat
#[tracing::instrument(name="coord.admin.heartbeat", skip(ctx), fields(node_id = %req.node_id))]
pub async fn heartbeat(
    State(ctx): State<CoordinatorState>,
    Json(req): Json<HeartbeatRequest>,
) -> Json<HeartbeatResponse> {
    let registered = ctx.plane.heartbeat(&req.node_id);
    Json(HeartbeatResponse { registered })
}

// GET /admin/nodes
#[tracing::instrument(name = "coord.admin.list_nodes", skip(ctx))]
pub async fn list_nodes(State(ctx): State<CoordinatorState>) -> impl IntoResponse {
    (StatusCode::OK, Json(ctx.plane.list()))
}

// GET /admin/accounts/{owner}
#[tracing::instrument(name = "coord.admin.account", skip(ctx))]
pub async fn account_usage(
    State(ctx): State<CoordinatorState>,
    Path(owner): Path<String>,
) -> Result<Json<AccountUsage>, ApiError> {
    let used = ctx.plane.accounts().used_storage(&owner)?;
    Ok(Json(AccountUsage { owner, used }))
}

// POST /admin/files/announce
#[tracing::instrument(name="coord.files.announce", skip(ctx, claim), fields(filename = %claim.filename, node_id = %claim.node_id, size = claim.size))]
pub async fn announce_file(
    State(ctx): State<CoordinatorState>,
    Json(claim): Json<FileClaim>,
) -> Result<StatusCode, ApiError> {
    let key = Key::new(&claim.filename)?;
    ctx.plane.announce(key.name(), &claim.node_id, claim.size)?;
    Ok(StatusCode::OK)
}

// POST /admin/files/deannounce
#[tracing::instrument(name="coord.files.deannounce", skip(ctx, claim), fields(filename = %claim.filename, node_id = %claim.node_id))]
pub async fn deannounce_file(
    State(ctx): State<CoordinatorState>,
    Json(claim): Json<FileClaim>,
) -> Result<StatusCode, ApiError> {
    let key = Key::new(&claim.filename)?;
    ctx.plane.deannounce(key.name(), &claim.node_id, claim.size)?;
    Ok(StatusCode::OK)
}

// GET /files/{filename}/locations
#[tracing::instrument(name = "coord.files.locate", skip(ctx))]
pub async fn locate_file(
    State(ctx): State<CoordinatorState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let key = Key::new(&filename)?;
    Ok(Json(ctx.plane.locate(key.name())))
}

// GET /files
#[tracing::instrument(name = "coord.files.list", skip(ctx))]
pub async fn list_files(State(ctx): State<CoordinatorState>) -> Json<Vec<String>> {
    Json(ctx.plane.list_files())
}

// GET /files/{filename}
#[tracing::instrument(name = "coord.files.info", skip(ctx))]
pub async fn file_info(
    State(ctx): State<CoordinatorState>,
    Path(filename): Path<String>,
) -> Result<Json<FileInfo>, ApiError> {
    let key = Key::new(&filename)?;
    ctx.plane
        .file_info(key.name())
        .map(Json)
        .ok_or_else(|| ApiError::FileNotFound(filename))
}

// GET /admin/events
/// Server-sent stream of control-plane events. Slow subscribers skip what
/// they missed rather than hold up publishers.
pub async fn stream_events(
    State(ctx): State<CoordinatorState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = ctx.plane.events().subscribe();

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((Ok(to_sse(&event)), rx)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse(event: &ControlEvent) -> Event {
    let sse = Event::default().event(event.name());
    match serde_json::to_string(event) {
        Ok(data) => sse.data(data),
        Err(e) => {
            warn!(event = event.name(), "failed to encode event: {e}");
            sse
        }
    }
}
