#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use axum_server::Server;
use reqwest::Client;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use common::schemas::{FileInfo, NodeInfo, NodeLocation, UploadResponse};
use coord::command::serve::build_router;
use coord::core::accounts::MemoryAccounts;
use coord::core::liveness::liveness_monitor;
use coord::core::registry::ControlPlane;
use coord::core::state::CoordinatorState;
use volume::chunk::ChunkStore;
use volume::client::join_cluster;
use volume::health::heartbeat_loop;
use volume::routes::build_router as volume_router;
use volume::state::VolumeState;

pub struct TestServer {
    pub handle: JoinHandle<Result<(), anyhow::Error>>,
    pub shutdown_tx: watch::Sender<bool>,
    pub addr: SocketAddr,
    pub url: String,
}

impl TestServer {
    async fn start(listener: TcpListener, app: axum::Router) -> Result<Self> {
        let addr = listener.local_addr()?;
        let url = format!("http://{}", addr);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let server = Server::from_tcp(listener.into_std()?).serve(app.into_make_service());

            tokio::select! {
                res = server => res.map_err(anyhow::Error::from),
                _ = shutdown_rx.changed() => Ok(()),
            }
        });

        Ok(TestServer {
            handle,
            shutdown_tx,
            addr,
            url,
        })
    }

    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.handle.abort();
        let _ = self.handle.await;
        Ok(())
    }
}

pub struct TestCoordinator {
    pub server: TestServer,
    pub state: CoordinatorState,
    pub monitor_shutdown: watch::Sender<bool>,
    pub monitor_handle: JoinHandle<Result<(), anyhow::Error>>,
}

impl TestCoordinator {
    pub async fn new() -> Result<Self> {
        Self::with_config(Duration::from_millis(200), Duration::from_secs(30)).await
    }

    pub async fn with_config(sweep_interval: Duration, node_timeout: Duration) -> Result<Self> {
        let state = CoordinatorState {
            plane: Arc::new(ControlPlane::new(Arc::new(MemoryAccounts::default()), 256)),
            sweep_interval,
            node_timeout,
        };

        let (monitor_shutdown, shutdown_rx) = watch::channel(false);
        let monitor_handle = tokio::spawn(liveness_monitor(
            state.plane.clone(),
            sweep_interval,
            node_timeout,
            shutdown_rx,
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let server = TestServer::start(listener, build_router(state.clone())).await?;

        Ok(TestCoordinator {
            server,
            state,
            monitor_shutdown,
            monitor_handle,
        })
    }

    pub async fn shutdown(self) -> Result<()> {
        let _ = self.monitor_shutdown.send(true);
        let _ = self.monitor_handle.await;
        self.server.shutdown().await
    }

    pub fn url(&self) -> &str {
        &self.server.url
    }
}

pub struct TestVolume {
    pub server: TestServer,
    pub state: VolumeState,
    pub data_dir: TempDir,
    pub heartbeat: Option<(watch::Sender<bool>, JoinHandle<Result<(), anyhow::Error>>)>,
}

impl TestVolume {
    pub async fn new(coordinator_url: &str, node_id: &str) -> Result<Self> {
        Self::with_owner(coordinator_url, node_id, None).await
    }

    pub async fn with_owner(
        coordinator_url: &str,
        node_id: &str,
        owner: Option<&str>,
    ) -> Result<Self> {
        let data_dir = TempDir::new()?;
        let chunks = ChunkStore::open(data_dir.path())?;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let state = VolumeState {
            http_client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?,
            data_root: Arc::new(data_dir.path().to_path_buf()),
            chunks: Arc::new(chunks),
            coordinator_url: coordinator_url.to_string(),
            node_id: node_id.to_string(),
            address: addr.ip().to_string(),
            port: addr.port(),
            owner: owner.map(str::to_string),
            chunk_size: 64 * 1024,
            max_size: 64 * 1024 * 1024,
            replication_timeout: Duration::from_secs(5),
        };

        let server = TestServer::start(listener, volume_router(state.clone())).await?;

        Ok(TestVolume {
            server,
            state,
            data_dir,
            heartbeat: None,
        })
    }

    pub async fn join(&self) -> Result<()> {
        join_cluster(&self.state).await
    }

    pub fn start_heartbeat(&mut self, interval: Duration) {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(heartbeat_loop(self.state.clone(), interval, rx));
        self.heartbeat = Some((tx, handle));
    }

    pub fn stop_heartbeat(&mut self) {
        if let Some((tx, handle)) = self.heartbeat.take() {
            let _ = tx.send(true);
            handle.abort();
        }
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.stop_heartbeat();
        self.server.shutdown().await
    }

    pub fn url(&self) -> &str {
        &self.server.url
    }

    pub fn node_id(&self) -> &str {
        &self.state.node_id
    }
}

// HTTP client utilities
pub async fn list_nodes(client: &Client, coord_url: &str) -> Result<Vec<NodeInfo>> {
    let url = format!("{}/admin/nodes", coord_url);
    let resp = client.get(url).send().await?;

    if !resp.status().is_success() {
        anyhow::bail!("list_nodes failed: {}", resp.status());
    }

    Ok(resp.json().await?)
}

pub async fn locate(client: &Client, coord_url: &str, filename: &str) -> Result<Vec<NodeLocation>> {
    let url = format!("{}/files/{}/locations", coord_url, enc(filename));
    let resp = client.get(url).send().await?;

    if !resp.status().is_success() {
        anyhow::bail!("locate failed: {}", resp.status());
    }

    Ok(resp.json().await?)
}

pub async fn file_info(
    client: &Client,
    coord_url: &str,
    filename: &str,
) -> Result<Option<FileInfo>> {
    let url = format!("{}/files/{}", coord_url, enc(filename));
    let resp = client.get(url).send().await?;

    match resp.status() {
        reqwest::StatusCode::NOT_FOUND => Ok(None),
        s if s.is_success() => Ok(Some(resp.json().await?)),
        s => anyhow::bail!("file_info failed: {}", s),
    }
}

pub async fn upload(
    client: &Client,
    volume_url: &str,
    filename: &str,
    bytes: Vec<u8>,
) -> Result<(reqwest::StatusCode, Option<UploadResponse>)> {
    let url = format!("{}/files/{}", volume_url, enc(filename));
    let resp = client.put(url).body(bytes).send().await?;

    let status = resp.status();
    if !status.is_success() {
        return Ok((status, None));
    }

    Ok((status, Some(resp.json().await?)))
}

pub async fn download(
    client: &Client,
    volume_url: &str,
    filename: &str,
) -> Result<(reqwest::StatusCode, Vec<u8>)> {
    let url = format!("{}/files/{}", volume_url, enc(filename));
    let resp = client.get(url).send().await?;

    let status = resp.status();
    let bytes = resp.bytes().await?.to_vec();

    Ok((status, bytes))
}

pub fn enc(filename: &str) -> String {
    common::key_utils::Key::new(filename)
        .map(|k| k.enc().to_string())
        .unwrap_or_else(|_| filename.to_string())
}

// Utility functions
pub async fn wait_until<F, Fut>(timeout_ms: u64, mut check_fn: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<bool>>,
{
    let start = Instant::now();
    let timeout_duration = Duration::from_millis(timeout_ms);

    loop {
        if check_fn().await? {
            return Ok(());
        }

        if start.elapsed() > timeout_duration {
            anyhow::bail!("wait_until timed out after {}ms", timeout_ms);
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

pub fn blake3_hex(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
