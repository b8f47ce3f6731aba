use axum_server::Server;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use common::constants::DEFAULT_CHUNK_SIZE;
use common::telemetry::init_telemetry;
use common::url_utils::{parse_socket_addr, sanitize_url};

use volume::chunk::ChunkStore;
use volume::client::join_cluster;
use volume::health::heartbeat_loop;
use volume::routes::build_router;
use volume::state::VolumeState;

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
enum Cmd {
    /// Run the storage node HTTP server
    Serve(ServeArgs),
    /// Delete chunks no manifest references
    Cleanup(DataArgs),
    /// Print chunk store statistics
    Stats(DataArgs),
}

#[derive(Parser, Debug, Clone)]
struct DataArgs {
    #[arg(long, default_value = "./data")]
    data: PathBuf,
}

#[derive(Parser, Debug, Clone)]
struct ServeArgs {
    #[arg(long, default_value = "./data")]
    data: PathBuf,
    #[arg(long)]
    coordinator_url: String,
    #[arg(long, default_value = "vol-1")]
    node_id: String,
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:3001")]
    listen: String,
    /// Host advertised to the coordinator (defaults to the listen host)
    #[arg(long)]
    advertise_address: Option<String>,
    /// User this node is provisioned for; personal nodes never time out
    #[arg(long)]
    owner: Option<String>,
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: u64,
    /// Max allowed upload size in bytes (default: 1 GB)
    #[arg(long, default_value_t = 1024 * 1024 * 1024u64)]
    max_size: u64,
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    heartbeat_interval: Duration,
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    replication_timeout: Duration,
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    http_timeout: Duration,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry("volume")?;

    let args = Args::parse();

    match args.cmd {
        Cmd::Serve(serve_args) => serve(serve_args).await?,
        Cmd::Cleanup(data_args) => {
            let store = ChunkStore::open(data_args.data)?;
            let removed = tokio::task::spawn_blocking(move || store.cleanup()).await??;
            info!(removed, "cleanup finished");
        }
        Cmd::Stats(data_args) => {
            let store = ChunkStore::open(data_args.data)?;
            let stats = tokio::task::spawn_blocking(move || store.stats()).await??;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let chunks = ChunkStore::open(&args.data)?;
    let socket_addr = parse_socket_addr(&args.listen)?;

    let http_client = reqwest::Client::builder()
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(30))
        .timeout(args.http_timeout)
        .build()?;

    let state = VolumeState {
        http_client,
        data_root: Arc::new(args.data.clone()),
        chunks: Arc::new(chunks),
        coordinator_url: sanitize_url(&args.coordinator_url)?,
        node_id: args.node_id,
        address: args
            .advertise_address
            .unwrap_or_else(|| socket_addr.ip().to_string()),
        port: socket_addr.port(),
        owner: args.owner,
        chunk_size: args.chunk_size,
        max_size: args.max_size,
        replication_timeout: args.replication_timeout,
    };

    join_cluster(&state).await?;

    // Spawn heartbeat loop with shutdown signal
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel::<bool>(false);
    let hb_handle = tokio::spawn(heartbeat_loop(
        state.clone(),
        args.heartbeat_interval,
        shutdown_rx,
    ));

    let app = build_router(state);

    info!("listening on {}", args.listen);

    let server = Server::bind(socket_addr).serve(app.into_make_service());

    // Graceful shutdown: ctrl+c
    tokio::select! {
        res = server => { res?; }
        _ = tokio::signal::ctrl_c() => {}
    }

    // Stop heartbeat
    let _ = shutdown_tx.send(true);
    let _ = hb_handle.await;

    Ok(())
}
