//! Serialization through the gate: FIFO admission, transaction isolation from
//! queued operations, and rollback on failure.

use std::time::Duration;

use assert_matches::assert_matches;
use cashy_store::{AppIdentity, Migration, Store, StoreError, StoreOptions, sql_params};
use tempfile::TempDir;
use tokio::sync::oneshot;

const SCHEMA: &str = "
    CREATE TABLE counter (id INTEGER PRIMARY KEY CHECK (id = 1), value INTEGER NOT NULL);
    INSERT INTO counter (id, value) VALUES (1, 0);
    CREATE TABLE entries (id INTEGER PRIMARY KEY, label TEXT NOT NULL);
";

async fn open(dir: &TempDir) -> Store {
    let opts = StoreOptions::new(
        dir.path().join("books.sqlite"),
        AppIdentity::new(0x0266_E000, 0, 3).unwrap(),
    )
    .migrations(vec![Migration::sql("counter and entries", SCHEMA)]);
    Store::open(opts).await.unwrap()
}

async fn entry_count(store: &Store) -> i64 {
    store
        .get("SELECT COUNT(*) AS n FROM entries", sql_params![])
        .await
        .unwrap()
        .unwrap()
        .get("n")
        .unwrap()
}

async fn entry_labels(store: &Store) -> Vec<String> {
    store
        .all("SELECT label FROM entries ORDER BY id", sql_params![])
        .await
        .unwrap()
        .iter()
        .map(|r| r.get("label").unwrap())
        .collect()
}

/// Let every runnable task on the current-thread runtime make progress.
async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_read_modify_write_never_loses_updates() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;

    let tasks: Vec<_> = (0..25)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .transaction(|tx| async move {
                        let current: i64 = tx
                            .get("SELECT value FROM counter WHERE id = 1", sql_params![])
                            .await?
                            .ok_or_else(|| StoreError::Internal("counter row missing".into()))?
                            .get("value")?;
                        tokio::task::yield_now().await;
                        let _ = tx
                            .run("UPDATE counter SET value = ?1 WHERE id = 1", sql_params![current + 1])
                            .await?;
                        Ok::<_, StoreError>(())
                    })
                    .await
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let row = store
        .get("SELECT value FROM counter WHERE id = 1", sql_params![])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get::<i64>("value").unwrap(), 25);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reads_wait_for_commit() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    let (inserted_tx, inserted_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let writer = {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .transaction(|tx| async move {
                    let _ = tx
                        .run("INSERT INTO entries (label) VALUES ('pending')", sql_params![])
                        .await?;
                    let _ = inserted_tx.send(());
                    let _ = release_rx.await;
                    Ok::<_, StoreError>(())
                })
                .await
        })
    };

    inserted_rx.await.unwrap();
    let reader = {
        let store = store.clone();
        tokio::spawn(async move { entry_count(&store).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!reader.is_finished());

    release_tx.send(()).unwrap();
    writer.await.unwrap().unwrap();
    assert_eq!(reader.await.unwrap(), 1);
}

#[tokio::test]
async fn queued_operations_run_in_arrival_order() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let holder = {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .transaction(|_tx| async move {
                    let _ = release_rx.await;
                    Ok::<_, StoreError>(())
                })
                .await
        })
    };
    settle().await;

    let mut queued = Vec::new();
    for label in ["a", "b", "c", "d", "e"] {
        let store = store.clone();
        queued.push(tokio::spawn(async move {
            store
                .run("INSERT INTO entries (label) VALUES (?1)", sql_params![label.to_owned()])
                .await
        }));
        settle().await;
    }

    release_tx.send(()).unwrap();
    holder.await.unwrap().unwrap();
    for task in queued {
        let _ = task.await.unwrap().unwrap();
    }

    assert_eq!(entry_labels(&store).await, ["a", "b", "c", "d", "e"]);
}

#[derive(Debug, thiserror::Error)]
enum PostingError {
    #[error("entries do not balance")]
    Unbalanced,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[tokio::test]
async fn failing_body_discards_its_writes() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    let _ = store
        .run("INSERT INTO entries (label) VALUES ('opening')", sql_params![])
        .await
        .unwrap();

    let result = store
        .transaction(|tx| async move {
            let _ = tx
                .run("INSERT INTO entries (label) VALUES ('debit')", sql_params![])
                .await?;
            let _ = tx
                .run("INSERT INTO entries (label) VALUES ('credit')", sql_params![])
                .await?;
            Err::<(), _>(PostingError::Unbalanced)
        })
        .await;

    assert_matches!(result, Err(PostingError::Unbalanced));
    assert_eq!(entry_count(&store).await, 1);
}

#[tokio::test]
async fn committed_writes_are_visible() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;

    let ids = store
        .transaction(|tx| async move {
            let a = tx
                .run("INSERT INTO entries (label) VALUES ('debit')", sql_params![])
                .await?;
            let b = tx
                .run("INSERT INTO entries (label) VALUES ('credit')", sql_params![])
                .await?;
            Ok::<_, PostingError>((a.last_insert_rowid, b.last_insert_rowid))
        })
        .await
        .unwrap();

    assert_eq!(ids, (1, 2));
    assert_eq!(entry_labels(&store).await, ["debit", "credit"]);
}

#[tokio::test]
async fn engine_error_inside_transaction_rolls_back_and_frees_the_gate() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;

    let result = store
        .transaction(|tx| async move {
            let _ = tx
                .run("INSERT INTO entries (label) VALUES ('kept?')", sql_params![])
                .await?;
            let _ = tx
                .run("INSERT INTO entries (label) VALUES (NULL)", sql_params![])
                .await?;
            Ok::<_, StoreError>(())
        })
        .await;

    assert_matches!(result, Err(StoreError::Engine(_)));
    assert_eq!(entry_count(&store).await, 0);
}

#[tokio::test]
async fn close_waits_for_running_transaction_then_rejects_queued_work() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let holder = {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .transaction(|tx| async move {
                    let _ = release_rx.await;
                    let _ = tx
                        .run("INSERT INTO entries (label) VALUES ('last')", sql_params![])
                        .await?;
                    Ok::<_, StoreError>(())
                })
                .await
        })
    };
    settle().await;

    let closer = {
        let store = store.clone();
        tokio::spawn(async move { store.close().await })
    };
    settle().await;
    let late = {
        let store = store.clone();
        tokio::spawn(async move { entry_count_checked(&store).await })
    };
    settle().await;

    release_tx.send(()).unwrap();
    holder.await.unwrap().unwrap();
    closer.await.unwrap().unwrap();
    assert_matches!(late.await.unwrap(), Err(StoreError::Closed));
    assert!(store.is_closed());
}

async fn entry_count_checked(store: &Store) -> cashy_store::Result<Option<cashy_store::Row>> {
    store.get("SELECT COUNT(*) FROM entries", sql_params![]).await
}
