//! Tests for schema application on open.

use sqlx::sqlite::SqlitePoolOptions;

use courier::store::{migrate, Store};

async fn table_names(pool: &sqlx::SqlitePool) -> Vec<String> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .fetch_all(pool)
            .await
            .expect("table listing should succeed");
    rows.into_iter().map(|(name,)| name).collect()
}

#[tokio::test]
async fn open_creates_every_table() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let store = Store::open(&dir.path().join("nested/courier.db"), 2, 8)
        .await
        .expect("store should open");

    let tables = table_names(store.pool()).await;
    for expected in [
        "attachments",
        "disappearing_message_configs",
        "link_previews",
        "messages",
        "send_jobs",
        "threads",
    ] {
        assert!(
            tables.iter().any(|t| t == expected),
            "missing table {expected}"
        );
    }

    store.shutdown().await;
}

#[tokio::test]
async fn migrate_is_idempotent() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("pool should connect");

    migrate(&pool).await.expect("first migration should apply");
    migrate(&pool).await.expect("second migration should be a no-op");

    let tables = table_names(&pool).await;
    assert_eq!(tables.iter().filter(|t| t.as_str() == "messages").count(), 1);
}

#[tokio::test]
async fn reopening_keeps_existing_rows() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("courier.db");

    let store = Store::open(&path, 2, 8).await.expect("store should open");
    crate::support::create_thread(&store, "survivor", None).await;
    store.shutdown().await;
    store.pool().close().await;

    let reopened = Store::open(&path, 2, 8).await.expect("store should reopen");
    assert_eq!(crate::support::count_rows(&reopened, "threads").await, 1);
    reopened.shutdown().await;
}
