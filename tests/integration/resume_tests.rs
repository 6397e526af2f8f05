//! Checkpoint and resume across engine restarts

use crate::{html, test_job_config, test_user_agent};
use driftnet::config::JobConfig;
use driftnet::storage::SqliteCheckpointStore;
use driftnet::{Engine, JobStatus};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CHAIN: usize = 12;

fn engine_at(db: &Path) -> Engine {
    let store = SqliteCheckpointStore::new(db).expect("failed to open checkpoint db");
    Engine::builder()
        .user_agent(test_user_agent())
        .store(Arc::new(store))
        .build()
}

/// Mounts /c0 -> /c1 -> ... -> /c{CHAIN-1}, each fetched exactly once
async fn mount_chain(server: &MockServer) {
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;

    for i in 0..CHAIN {
        let body = if i + 1 < CHAIN {
            format!(r#"<a href="{}/c{}">next</a>"#, base, i + 1)
        } else {
            "<p>end</p>".to_string()
        };
        Mock::given(method("GET"))
            .and(path(format!("/c{}", i)))
            .respond_with(html(body).set_delay(Duration::from_millis(30)))
            .expect(1)
            .mount(server)
            .await;
    }
}

fn chain_config() -> JobConfig {
    JobConfig {
        max_depth: CHAIN as u32 + 1,
        checkpoint_every: 2,
        ..test_job_config()
    }
}

#[tokio::test]
async fn test_resume_after_restart_fetches_nothing_twice() {
    let server = MockServer::start().await;
    mount_chain(&server).await;
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("driftnet.db");

    let first = engine_at(&db);
    let id = first
        .submit(&[format!("{}/c0", server.uri())], chain_config())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(first.pause(id).await.unwrap(), JobStatus::Paused);
    let before = first.status(id).unwrap();
    assert!(before.counters.succeeded < CHAIN as u64);
    drop(first);

    let second = engine_at(&db);
    let restored = second.restore(id).await.unwrap();
    assert_eq!(restored.status, JobStatus::Paused);
    assert_eq!(restored.counters.succeeded, before.counters.succeeded);

    second.resume(id).unwrap();
    let snapshot = tokio::time::timeout(Duration::from_secs(10), second.wait(id))
        .await
        .expect("resumed crawl did not finish")
        .unwrap();

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.counters.succeeded, CHAIN as u64);
    assert_eq!(snapshot.counters.duplicates, 0);
}

#[tokio::test]
async fn test_finished_job_is_listed_and_not_resumable() {
    let server = MockServer::start().await;
    mount_chain(&server).await;
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("driftnet.db");

    let first = engine_at(&db);
    let id = first
        .submit(&[format!("{}/c0", server.uri())], chain_config())
        .unwrap();
    let done = tokio::time::timeout(Duration::from_secs(10), first.wait(id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    drop(first);

    let second = engine_at(&db);
    let stored = second.list_stored().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].job_id, id);
    assert_eq!(stored[0].status, JobStatus::Completed);
    assert_eq!(stored[0].pending, 0);
    assert_eq!(stored[0].visited, CHAIN as u64);

    second.restore(id).await.unwrap();
    assert!(second.resume(id).is_err());
}

#[tokio::test]
async fn test_restore_unknown_job_fails() {
    let dir = TempDir::new().unwrap();
    let engine = engine_at(&dir.path().join("driftnet.db"));

    assert!(engine.restore(uuid::Uuid::new_v4()).await.is_err());
}
