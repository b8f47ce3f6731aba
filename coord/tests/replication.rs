use reqwest::{Client, StatusCode};

mod common;
use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_upload_is_replicated_to_peers() -> anyhow::Result<()> {
    let coord = TestCoordinator::new().await?;
    let client = Client::new();

    let a = TestVolume::new(coord.url(), "A").await?;
    a.join().await?;
    let b = TestVolume::new(coord.url(), "B").await?;
    b.join().await?;

    let data = pattern(200_000);
    let (status, resp) = upload(&client, a.url(), "holiday.mov", data.clone()).await?;
    assert_eq!(status, StatusCode::CREATED);
    let resp = resp.expect("upload response");
    assert_eq!(resp.size, 200_000);
    assert_eq!(resp.etag, blake3_hex(&data));
    assert_eq!(resp.chunk_count, 4); // 64 KiB chunks

    wait_until(5000, || async {
        Ok(locate(&client, coord.url(), "holiday.mov").await?.len() == 2)
    })
    .await?;

    let info = file_info(&client, coord.url(), "holiday.mov")
        .await?
        .expect("file tracked");
    assert_eq!(info.owners, vec!["A".to_string(), "B".to_string()]);
    assert!(info.replicated);

    let (status, bytes) = download(&client, b.url(), "holiday.mov").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(blake3_hex(&bytes), blake3_hex(&data));

    let nodes = list_nodes(&client, coord.url()).await?;
    assert!(nodes.iter().all(|n| n.storage.used == 200_000));

    a.shutdown().await?;
    b.shutdown().await?;
    coord.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replication_skips_offline_peers() -> anyhow::Result<()> {
    let coord = TestCoordinator::new().await?;
    let client = Client::new();

    let a = TestVolume::new(coord.url(), "A").await?;
    a.join().await?;
    let b = TestVolume::new(coord.url(), "B").await?;
    b.join().await?;

    // B's server disappears but it is still listed online
    b.shutdown().await?;

    let (status, _) = upload(&client, a.url(), "lonely.txt", b"still stored".to_vec()).await?;
    assert_eq!(status, StatusCode::CREATED);

    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    let locations = locate(&client, coord.url(), "lonely.txt").await?;
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0].node_id, "A");

    let (status, bytes) = download(&client, a.url(), "lonely.txt").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"still stored");

    a.shutdown().await?;
    coord.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_delete_deannounces_only_local_copy() -> anyhow::Result<()> {
    let coord = TestCoordinator::new().await?;
    let client = Client::new();

    let a = TestVolume::new(coord.url(), "A").await?;
    a.join().await?;
    let b = TestVolume::new(coord.url(), "B").await?;
    b.join().await?;

    upload(&client, a.url(), "draft.doc", pattern(10_000)).await?;
    wait_until(5000, || async {
        Ok(locate(&client, coord.url(), "draft.doc").await?.len() == 2)
    })
    .await?;

    let resp = client
        .delete(format!("{}/files/{}", a.url(), enc("draft.doc")))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let locations = locate(&client, coord.url(), "draft.doc").await?;
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0].node_id, "B");

    let (status, _) = download(&client, a.url(), "draft.doc").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Deleting again is a 404
    let resp = client
        .delete(format!("{}/files/{}", a.url(), enc("draft.doc")))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = client
        .delete(format!("{}/files/{}", b.url(), enc("draft.doc")))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(file_info(&client, coord.url(), "draft.doc").await?.is_none());

    a.shutdown().await?;
    b.shutdown().await?;
    coord.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replicas_keep_filename_case() -> anyhow::Result<()> {
    let coord = TestCoordinator::new().await?;
    let client = Client::new();

    let a = TestVolume::new(coord.url(), "A").await?;
    a.join().await?;
    let b = TestVolume::new(coord.url(), "B").await?;
    b.join().await?;

    upload(&client, a.url(), "Report.pdf", b"UPPER-CONTENT".to_vec()).await?;
    upload(&client, a.url(), "report.pdf", b"lower".to_vec()).await?;

    wait_until(5000, || async {
        let upper = locate(&client, coord.url(), "Report.pdf").await?.len();
        let lower = locate(&client, coord.url(), "report.pdf").await?.len();
        Ok(upper == 2 && lower == 2)
    })
    .await?;

    let mut files: Vec<String> = client
        .get(format!("{}/files", b.url()))
        .send()
        .await?
        .json()
        .await?;
    files.sort();
    assert_eq!(files, vec!["Report.pdf".to_string(), "report.pdf".to_string()]);

    let (status, bytes) = download(&client, b.url(), "Report.pdf").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"UPPER-CONTENT");

    a.shutdown().await?;
    b.shutdown().await?;
    coord.shutdown().await?;
    Ok(())
}
