use chrono::Utc;
use demeter_core::models::{IngestionStatus, RunStatus};
use demeter_core::traits::StatusStore;
use demeter_core::HarvestError;
use demeter_db::IngestionStatusRepository;
use uuid::Uuid;

use crate::integration::common::setup_test_db;

fn running(collection_id: u64) -> IngestionStatus {
    IngestionStatus::running(
        Uuid::new_v4(),
        collection_id,
        "ops@example.edu",
        "/tmp/demeter/26/2024-03-07-090500",
        Utc::now(),
    )
}

#[tokio::test]
async fn create_then_get() {
    let (pool, _container) = setup_test_db().await;
    let repo = IngestionStatusRepository::new(pool);
    let status = running(26);

    repo.create(&status).await.unwrap();

    let stored = repo.get(status.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Running);
    assert_eq!(stored.collection_id, 26);
    assert_eq!(stored.data_dir, status.data_dir);
    assert!(stored.end_time.is_none());
}

#[tokio::test]
async fn update_to_complete() {
    let (pool, _container) = setup_test_db().await;
    let repo = IngestionStatusRepository::new(pool);
    let mut status = running(26);
    repo.create(&status).await.unwrap();

    status.complete(128);
    repo.update(&status).await.unwrap();

    let stored = repo.get(status.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Complete);
    assert_eq!(stored.total_items, Some(128));
    assert!(stored.end_time.is_some());
}

#[tokio::test]
async fn update_to_error() {
    let (pool, _container) = setup_test_db().await;
    let repo = IngestionStatusRepository::new(pool);
    let mut status = running(26);
    repo.create(&status).await.unwrap();

    status.fail("Integrity error: fetched 120 of 128");
    repo.update(&status).await.unwrap();

    let stored = repo.get(status.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Error);
    assert_eq!(stored.error.as_deref(), Some("Integrity error: fetched 120 of 128"));
}

#[tokio::test]
async fn update_of_unknown_document_fails() {
    let (pool, _container) = setup_test_db().await;
    let repo = IngestionStatusRepository::new(pool);

    let result = repo.update(&running(26)).await;

    assert!(matches!(result, Err(HarvestError::Database(_))));
}

#[tokio::test]
async fn history_is_newest_first_per_collection() {
    let (pool, _container) = setup_test_db().await;
    let repo = IngestionStatusRepository::new(pool);

    let mut older = running(26);
    older.start_time = Utc::now() - chrono::TimeDelta::hours(1);
    let newer = running(26);
    repo.create(&older).await.unwrap();
    repo.create(&newer).await.unwrap();
    repo.create(&running(27)).await.unwrap();

    let history = repo.history(26, 10).await.unwrap();

    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, newer.id);
    assert_eq!(history[1].id, older.id);
}
