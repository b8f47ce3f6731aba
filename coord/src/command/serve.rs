use axum::{
    Router, middleware,
    routing::{get, post},
};
use axum_server::Server;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use common::trace_middleware::trace_context_middleware;
use common::url_utils::parse_socket_addr;

use crate::core::accounts::MemoryAccounts;
use crate::core::liveness::liveness_monitor;
use crate::core::registry::ControlPlane;
use crate::core::routes::{
    account_usage, announce_file, deannounce_file, file_info, heartbeat, list_files, list_nodes,
    locate_file, register_node, stream_events,
};
use crate::core::state::CoordinatorState;

#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// How often the liveness monitor sweeps the node table
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    pub sweep_interval: Duration,

    /// Silence after which a non-personal node is marked offline
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    pub node_timeout: Duration,

    /// Buffered events per subscriber before it starts skipping
    #[arg(long, default_value_t = 1024)]
    pub event_capacity: usize,
}

impl CoordinatorState {
    pub fn from_args(args: &ServeArgs) -> Self {
        let plane = ControlPlane::new(Arc::new(MemoryAccounts::default()), args.event_capacity);
        CoordinatorState {
            plane: Arc::new(plane),
            sweep_interval: args.sweep_interval,
            node_timeout: args.node_timeout,
        }
    }
}

pub fn build_router(state: CoordinatorState) -> Router {
    Router::new()
        .route("/admin/register", post(register_node))
        .route("/admin/heartbeat", post(heartbeat))
        .route("/admin/nodes", get(list_nodes))
        .route("/admin/accounts/{owner}", get(account_usage))
        .route("/admin/events", get(stream_events))
        .route("/files", get(list_files))
        .route("/admin/files/announce", post(announce_file))
        .route("/admin/files/deannounce", post(deannounce_file))
        .route("/files/{filename}", get(file_info))
        .route("/files/{filename}/locations", get(locate_file))
        .layer(middleware::from_fn(trace_context_middleware))
        .with_state(state)
}

pub async fn serve(serve_args: ServeArgs) -> anyhow::Result<()> {
    let state = CoordinatorState::from_args(&serve_args);

    // Spawn liveness monitor
    let (shutdown_tx, shutdown_rx) = watch::channel::<bool>(false);
    let monitor_handle = tokio::spawn(liveness_monitor(
        state.plane.clone(),
        state.sweep_interval,
        state.node_timeout,
        shutdown_rx,
    ));

    let app = build_router(state);

    let socket_addr = parse_socket_addr(&serve_args.listen)?;
    let server = Server::bind(socket_addr).serve(app.into_make_service());

    info!("listening on {}", serve_args.listen);

    // Graceful shutdown: ctrl+c
    tokio::select! {
        res = server => { res?; }
        _ = tokio::signal::ctrl_c() => {}
    }

    // Stop monitor
    let _ = shutdown_tx.send(true);
    let _ = monitor_handle.await;

    Ok(())
}
