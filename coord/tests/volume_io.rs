use reqwest::{Client, StatusCode};

mod common;
use ::common::file_utils::chunk_path;
use ::common::schemas::CleanupResponse;
use common::*;
use volume::chunk::{Manifest, StoreStats};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_upload_download_round_trip() -> anyhow::Result<()> {
    let coord = TestCoordinator::new().await?;
    let client = Client::new();

    let volume = TestVolume::new(coord.url(), "A").await?;
    volume.join().await?;

    let name = "Q3 report (final) ü.pdf";
    let data = pattern(3 * 64 * 1024);
    let (status, resp) = upload(&client, volume.url(), name, data.clone()).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(resp.expect("upload response").chunk_count, 3);

    let (status, bytes) = download(&client, volume.url(), name).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes.len(), data.len());
    assert_eq!(bytes, data);

    let files: Vec<String> = client
        .get(format!("{}/files", volume.url()))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(files, vec![name.to_string()]);

    let manifest: Manifest = client
        .get(format!("{}/admin/manifest/{}", volume.url(), enc(name)))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(manifest.filename, name);
    assert_eq!(manifest.original_size, data.len() as u64);
    assert!(manifest.reassembled);

    let stats: StoreStats = client
        .get(format!("{}/admin/stats", volume.url()))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(stats.chunk_count, 3);
    assert_eq!(stats.manifest_count, 1);
    assert_eq!(stats.total_bytes, data.len() as u64);

    volume.shutdown().await?;
    coord.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_corrupted_chunk_fails_download() -> anyhow::Result<()> {
    let coord = TestCoordinator::new().await?;
    let client = Client::new();

    let volume = TestVolume::new(coord.url(), "A").await?;
    volume.join().await?;

    upload(&client, volume.url(), "fragile.bin", pattern(100_000)).await?;

    let manifest: Manifest = client
        .get(format!("{}/admin/manifest/fragile.bin", volume.url()))
        .send()
        .await?
        .json()
        .await?;
    let victim = chunk_path(volume.data_dir.path(), &manifest.chunks[0].id);
    let mut bytes = std::fs::read(&victim)?;
    bytes[10] ^= 0x55;
    std::fs::write(&victim, bytes)?;

    let (status, _) = download(&client, volume.url(), "fragile.bin").await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = download(&client, volume.url(), "never-uploaded").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    volume.shutdown().await?;
    coord.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cleanup_endpoint_removes_orphans() -> anyhow::Result<()> {
    let coord = TestCoordinator::new().await?;
    let client = Client::new();

    let volume = TestVolume::new(coord.url(), "A").await?;
    volume.join().await?;

    upload(&client, volume.url(), "keep.txt", pattern(1000)).await?;

    let orphan = chunk_path(volume.data_dir.path(), &"cd".repeat(32));
    std::fs::create_dir_all(orphan.parent().expect("shard dir"))?;
    std::fs::write(&orphan, b"orphan")?;

    let resp: CleanupResponse = client
        .post(format!("{}/admin/cleanup", volume.url()))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(resp.removed, 1);
    assert!(!orphan.exists());

    let (status, bytes) = download(&client, volume.url(), "keep.txt").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, pattern(1000));

    volume.shutdown().await?;
    coord.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_upload_rejects_bad_names() -> anyhow::Result<()> {
    let coord = TestCoordinator::new().await?;
    let client = Client::new();

    let volume = TestVolume::new(coord.url(), "A").await?;
    volume.join().await?;

    // %2F decodes to '/', which filenames may not contain
    let resp = client
        .put(format!("{}/files/a%2Fb", volume.url()))
        .body("x")
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client
        .put(format!("{}/files/%00nul", volume.url()))
        .body("x")
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    volume.shutdown().await?;
    coord.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_upload_from_unregistered_volume_fails() -> anyhow::Result<()> {
    let coord = TestCoordinator::new().await?;
    let client = Client::new();

    // never joined
    let volume = TestVolume::new(coord.url(), "stranger").await?;

    let (status, _) = upload(&client, volume.url(), "x.txt", b"hi".to_vec()).await?;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    volume.shutdown().await?;
    coord.shutdown().await?;
    Ok(())
}
