//! Connection contract, error classification, and transaction scopes
//! against a real SQLite file.

use super::*;
use crate::entity::read;
use crate::errors::{Error, ServerError};
use crate::testing::Harness;

fn insert_preset(name: &str) -> Statement {
    Statement::new("INSERT INTO presets (name) VALUES (?)").bind(name)
}

fn insert_project(user_id: i64, kind: &str, preset_id: Option<i64>) -> Statement {
    Statement::new(
        "INSERT INTO projects (userID, name, type, presetID, lastModified) VALUES (?, 'p', ?, ?, 0)",
    )
    .bind(user_id)
    .bind(kind)
    .bind(preset_id)
}

#[tokio::test]
async fn test_query_one_requires_exactly_one_row() {
    let h = Harness::new().await;
    let mut conn = h.conn().await;
    let by_email = |email: &str| Statement::new("SELECT userID FROM users WHERE email = ?").bind(email);

    let none = conn.query_one(&by_email("ada@example.org")).await;
    assert!(matches!(none, Err(ref e) if e.is(DbErrorKind::NoSuchEntry)));

    let ada = h.user("ada@example.org").await;
    h.user("bob@example.org").await;
    let row = conn.query_one(&by_email("ada@example.org")).await.unwrap();
    assert_eq!(read::<i64>(&row, "userID").unwrap(), ada.user_id.unwrap());

    let all = Statement::new("SELECT userID FROM users");
    assert!(conn.query_one(&all).await.err().unwrap().is(DbErrorKind::QueryAmbiguous));
    assert!(conn.query_binary(&all).await.err().unwrap().is(DbErrorKind::QueryAmbiguous));
    assert!(conn.query_binary(&by_email("eve@example.org")).await.unwrap().is_none());
    assert_eq!(conn.query_any(&all).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_execute_contracts() {
    let h = Harness::new().await;
    let mut conn = h.conn().await;
    let rename = |name: &str| Statement::new("UPDATE presets SET description = 'd' WHERE name = ?").bind(name);

    let missing = conn.execute_one(&rename("base")).await.unwrap_err();
    assert!(missing.is(DbErrorKind::NoSuchEntry));
    assert_eq!(missing.kind.http_status(), 404);
    assert_eq!(conn.execute_binary(&rename("base")).await.unwrap().rows_affected, 0);

    let created = conn.execute_one(&insert_preset("base")).await.unwrap();
    assert_eq!(created.rows_affected, 1);
    assert!(created.last_insert_id > 0);
    conn.execute_one(&insert_preset("extra")).await.unwrap();

    let everything = Statement::new("UPDATE presets SET description = 'd'");
    assert!(conn.execute_binary(&everything).await.unwrap_err().is(DbErrorKind::QueryAmbiguous));
    assert_eq!(conn.execute_any(&everything).await.unwrap().rows_affected, 2);
}

#[tokio::test]
async fn test_internal_statement_failures_are_faults() {
    let h = Harness::new().await;
    let mut conn = h.conn().await;
    let stmt = Statement::new("UPDATE presets SET description = 'd' WHERE presetID = ?")
        .bind(42)
        .internal();

    let err = conn.execute_one(&stmt).await.unwrap_err();

    assert!(err.is(DbErrorKind::QueryFault));
    assert_eq!(err.kind.http_status(), 500);
}

#[tokio::test]
async fn test_driver_errors_are_classified() {
    let h = Harness::new().await;
    let user_id = h.user("ada@example.org").await.user_id.unwrap();
    let mut conn = h.conn().await;

    let duplicate = Statement::new(
        "INSERT INTO users (email, firstName, lastName, password) VALUES ('ada@example.org', 'A', 'L', 'x')",
    );
    let err = conn.execute_one(&duplicate).await.unwrap_err();
    assert!(err.is(DbErrorKind::EntryConflict));
    assert_eq!(err.kind.http_status(), 409);

    let orphan = Statement::new("INSERT INTO scripts (userID, name, lastModified) VALUES (?, 's', 0)").bind(999);
    assert!(conn.execute_one(&orphan).await.unwrap_err().is(DbErrorKind::NoForeignKey));

    let unknown_type = insert_project(user_id, "rnn", None);
    assert!(conn.execute_one(&unknown_type).await.unwrap_err().is(DbErrorKind::ConstraintViolated));

    let nameless = Statement::new("INSERT INTO presets (name) VALUES (?)").bind(None::<String>);
    assert!(conn.execute_one(&nameless).await.unwrap_err().is(DbErrorKind::BadDatatype));

    let preset_id = conn.execute_one(&insert_preset("base")).await.unwrap().last_insert_id;
    conn.execute_one(&insert_project(user_id, "cnn", Some(preset_id))).await.unwrap();
    let in_use = Statement::new("DELETE FROM presets WHERE presetID = ?").bind(preset_id);
    let err = conn.execute_one(&in_use).await.unwrap_err();
    assert!(err.is(DbErrorKind::ReferencedKey));
    assert_eq!(err.kind.http_status(), 409);
}

#[tokio::test]
async fn test_transaction_commits_rows_and_keeps_blobs() {
    let h = Harness::new().await;
    let blobs = h.blobs().clone();

    let preset_id = h
        .services
        .database()
        .transaction(|conn, ledger| {
            Box::pin(async move {
                assert!(conn.in_transaction());
                let id = conn.execute_one(&insert_preset("base")).await?.last_insert_id;
                let key = format!("preset-{id}");
                ledger.protect(&blobs, &key).await?;
                blobs.put(&key, b"{}".to_vec()).await?;
                Ok::<_, Error>(id)
            })
        })
        .await
        .unwrap();

    assert_eq!(h.count("presets").await, 1);
    assert_eq!(h.blob_keys().await, vec![format!("preset-{preset_id}")]);
}

#[tokio::test]
async fn test_transaction_error_rolls_back_both_stores() {
    let h = Harness::new().await;
    let blobs = h.blobs().clone();
    blobs.put("preset-shared", b"before".to_vec()).await.unwrap();

    let err = h
        .services
        .database()
        .transaction(|conn, ledger| {
            Box::pin(async move {
                conn.execute_one(&insert_preset("base")).await?;
                ledger.protect(&blobs, "preset-shared").await?;
                blobs.put("preset-shared", b"after".to_vec()).await?;
                ledger.protect(&blobs, "preset-new").await?;
                blobs.put("preset-new", b"{}".to_vec()).await?;
                Err::<(), Error>(ServerError::bad_request("abandon").into())
            })
        })
        .await
        .unwrap_err();

    assert_eq!(err.status(), 400);
    assert_eq!(h.count("presets").await, 0);
    assert_eq!(h.blob_keys().await, vec!["preset-shared"]);
    assert_eq!(h.blobs().get("preset-shared").await.unwrap(), b"before".to_vec());
}

#[tokio::test]
async fn test_scope_rollback_reports_failed_compensations() {
    let h = Harness::new().await;
    let blobs = h.blobs().clone();
    let mut scope = h.services.database().begin().await.unwrap();
    {
        let (conn, ledger) = scope.parts();
        conn.execute_one(&insert_preset("base")).await.unwrap();
        ledger.protect(&blobs, "preset-a").await.unwrap();
        blobs.put("preset-a", b"a".to_vec()).await.unwrap();
        ledger.protect(&blobs, "preset-b").await.unwrap();
        blobs.put("preset-b", b"b".to_vec()).await.unwrap();
    }
    assert_eq!(scope.ledger().labels(), vec!["remove preset-a", "remove preset-b"]);
    h.store.fail_nth_delete(1);

    let failures = scope.rollback().await;

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].label, "remove preset-b");
    assert_eq!(h.blob_keys().await, vec!["preset-b"]);
    assert_eq!(h.count("presets").await, 0);
}

#[tokio::test]
async fn test_scope_commit_discards_ledger() {
    let h = Harness::new().await;
    let blobs = h.blobs().clone();
    let mut scope = h.services.database().begin().await.unwrap();
    scope.ledger().protect(&blobs, "preset-kept").await.unwrap();
    blobs.put("preset-kept", b"kept".to_vec()).await.unwrap();
    scope.connection().execute_one(&insert_preset("base")).await.unwrap();

    scope.commit().await.unwrap();

    assert_eq!(h.count("presets").await, 1);
    assert_eq!(h.blobs().get("preset-kept").await.unwrap(), b"kept".to_vec());
}

#[tokio::test]
async fn test_dropped_scope_rolls_back_rows() {
    let h = Harness::new().await;
    {
        let mut scope = h.services.database().begin().await.unwrap();
        scope.connection().execute_one(&insert_preset("base")).await.unwrap();
    }
    assert_eq!(h.count("presets").await, 0);
}

#[test]
fn test_schema_lists_every_table() {
    let tables = schema::table_names();
    assert_eq!(tables.len(), 9);
    assert_eq!(tables.first(), Some(&"users"));
    assert!(tables.contains(&"dataLabels"));
}
