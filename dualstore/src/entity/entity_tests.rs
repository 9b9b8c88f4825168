//! Persistence, probes, content pairing, and cascades over real stores.

use super::*;
use crate::db::DbErrorKind;
use crate::entities::{Dataset, Datafile, Project, Script};
use crate::errors::ServerError;
use crate::testing::Harness;
use pretty_assertions::assert_eq;

async fn stored_script(h: &Harness, name: &str) -> Script {
    let user = h.user(&format!("{name}@example.org")).await;
    let mut script = Script::new(user.user_id.unwrap(), name);
    script.create(&mut h.conn().await).await.unwrap();
    script
}

fn label_pairs(dataset: &Dataset) -> Vec<(i64, String)> {
    dataset
        .labels
        .iter()
        .map(|l| (l.label_id.unwrap(), l.string.clone()))
        .collect()
}

#[tokio::test]
async fn test_create_save_and_fetch() {
    let h = Harness::new().await;
    let mut script = stored_script(&h, "notes").await;
    assert!(script.script_id.is_some());
    assert!(script.last_modified.is_some());

    script.name = "journal".to_string();
    script.save(&mut h.conn().await).await.unwrap();

    let fetched = script.probe().fetch_one(&mut h.conn().await).await.unwrap();
    assert_eq!(fetched.name, "journal");
    assert_eq!(fetched.script_id, script.script_id);
}

#[tokio::test]
async fn test_save_requires_an_existing_row() {
    let h = Harness::new().await;
    let mut conn = h.conn().await;
    let mut ghost = Script::new(1, "ghost");

    let unkeyed = ghost.save(&mut conn).await.unwrap_err();
    assert!(unkeyed.is(DbErrorKind::ConstraintViolated));

    ghost.script_id = Some(99);
    let missing = ghost.save(&mut conn).await.unwrap_err();
    assert!(missing.is(DbErrorKind::NoSuchEntry));
}

#[tokio::test]
async fn test_delete_removes_row_and_content() {
    let h = Harness::new().await;
    let script = stored_script(&h, "notes").await;
    script.save_content(h.blobs(), b"print".to_vec(), None).await.unwrap();
    let mut ledger = RollbackLedger::new();

    script.delete(&mut h.conn().await, h.blobs(), &mut ledger).await.unwrap();

    assert_eq!(h.count("scripts").await, 0);
    assert!(h.blob_keys().await.is_empty());
    assert_eq!(ledger.labels(), vec![format!("restore {}", script.blob_key()).as_str()]);

    let again = script.delete(&mut h.conn().await, h.blobs(), &mut RollbackLedger::new()).await;
    assert_eq!(again.unwrap_err().status(), 404);
}

#[tokio::test]
async fn test_probe_filters_and_pages() {
    let h = Harness::new().await;
    let user_id = h.user("ada@example.org").await.user_id.unwrap();
    let mut conn = h.conn().await;
    for name in ["alpha", "beta", "gamma"] {
        Script::new(user_id, name).create(&mut conn).await.unwrap();
    }

    let page = Probe::<Script>::new()
        .eq("userID", user_id)
        .order_by("name", Direction::Desc)
        .offset(1)
        .limit(1)
        .fetch_all(&mut conn)
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].name, "beta");

    let by_owner = Probe::<Script>::new().eq("userID", user_id);
    assert_eq!(by_owner.count(&mut conn).await.unwrap(), 3);
    assert!(by_owner.exists(&mut conn).await.unwrap());
    assert!(by_owner.fetch(&mut conn).await.unwrap_err().is(DbErrorKind::QueryAmbiguous));
    assert!(!Probe::<Script>::new().eq("userID", 404).exists(&mut conn).await.unwrap());
}

#[tokio::test]
async fn test_probe_rejects_unknown_columns() {
    let h = Harness::new().await;
    let probe = Probe::<Script>::new().eq("owner", 1);

    let err = probe.fetch_all(&mut h.conn().await).await.unwrap_err();

    assert!(err.is(DbErrorKind::QueryFault));
    assert!(probe.select_statement().is_err());
}

#[tokio::test]
async fn test_null_filter_matches_missing_values() {
    let h = Harness::new().await;
    let user_id = h.user("ada@example.org").await.user_id.unwrap();
    let mut conn = h.conn().await;
    Project::new(user_id, "vision").create(&mut conn).await.unwrap();

    let unlinked = Probe::<Project>::new().eq("presetID", Value::Null);
    assert_eq!(unlinked.count(&mut conn).await.unwrap(), 1);
    assert!(unlinked.select_statement().unwrap().sql().contains("presetID IS NULL"));
    assert!(unlinked.select_statement().unwrap().params().is_empty());
}

#[tokio::test]
async fn test_content_needs_an_identity() {
    let h = Harness::new().await;
    let unsaved = Script::new(1, "draft");

    let err = unsaved.fetch_content(h.blobs()).await.unwrap_err();
    assert!(matches!(err, crate::blob::BlobError::NoContent { .. }));
    assert!(unsaved.temporary_read_url(h.blobs(), None).is_err());
}

#[tokio::test]
async fn test_content_pairs_with_the_row() {
    let h = Harness::new().await;
    let script = stored_script(&h, "notes").await;
    assert!(!script.content_exists(h.blobs()).await.unwrap());

    script.save_content(h.blobs(), b"v1".to_vec(), None).await.unwrap();

    assert!(script.content_exists(h.blobs()).await.unwrap());
    assert_eq!(script.fetch_content(h.blobs()).await.unwrap(), b"v1".to_vec());
    let url = script.temporary_read_url(h.blobs(), None).unwrap();
    assert!(url.url.contains(&script.blob_key()));
}

#[tokio::test]
async fn test_replay_restores_a_key_written_twice() {
    let h = Harness::new().await;
    let script = stored_script(&h, "notes").await;
    script.save_content(h.blobs(), b"v1".to_vec(), None).await.unwrap();
    let mut ledger = RollbackLedger::new();

    script.save_content(h.blobs(), b"v2".to_vec(), Some(&mut ledger)).await.unwrap();
    script.save_content(h.blobs(), b"v3".to_vec(), Some(&mut ledger)).await.unwrap();
    assert_eq!(ledger.len(), 2);

    assert!(ledger.replay().await.is_empty());
    assert_eq!(script.fetch_content(h.blobs()).await.unwrap(), b"v1".to_vec());
}

#[tokio::test]
async fn test_replay_removes_content_that_did_not_exist() {
    let h = Harness::new().await;
    let script = stored_script(&h, "notes").await;
    let mut ledger = RollbackLedger::new();

    script.save_content(h.blobs(), b"new".to_vec(), Some(&mut ledger)).await.unwrap();
    ledger.replay().await;

    assert!(!script.content_exists(h.blobs()).await.unwrap());
}

#[tokio::test]
async fn test_label_changes_revert_with_the_transaction() {
    let h = Harness::new().await;
    let user_id = h.user("ada@example.org").await.user_id.unwrap();
    let mut dataset = Dataset::new(user_id, "animals");
    dataset.add_label("cat");
    dataset.add_label("dog");
    dataset.create(&mut h.conn().await).await.unwrap();
    let dataset_id = dataset.dataset_id.unwrap();

    let err = h
        .services
        .database()
        .transaction(|conn, _ledger| {
            Box::pin(async move {
                let mut dataset = Probe::<Dataset>::new().eq("datasetID", dataset_id).fetch_one(conn).await?;
                dataset.delete_label(1)?;
                dataset.update_label(2, "wolf")?;
                dataset.add_label("owl");
                dataset.save(conn).await?;
                assert_eq!(label_pairs(&dataset), vec![(2, "wolf".to_string()), (3, "owl".to_string())]);
                Err::<(), Error>(ServerError::bad_request("abandon").into())
            })
        })
        .await
        .unwrap_err();
    assert_eq!(err.status(), 400);

    let reloaded = Probe::<Dataset>::new()
        .eq("datasetID", dataset_id)
        .fetch_one(&mut h.conn().await)
        .await
        .unwrap();
    assert_eq!(label_pairs(&reloaded), vec![(1, "cat".to_string()), (2, "dog".to_string())]);
    assert_eq!(reloaded.next_label, 3);
}

#[tokio::test]
async fn test_label_sync_rejects_unknown_ids() {
    let h = Harness::new().await;
    let user_id = h.user("ada@example.org").await.user_id.unwrap();
    let mut dataset = Dataset::new(user_id, "animals");
    dataset.add_label("cat");
    let mut conn = h.conn().await;
    dataset.create(&mut conn).await.unwrap();

    dataset.next_label = 10;
    dataset.labels[0].label_id = Some(7);
    let err = dataset.save(&mut conn).await.unwrap_err();

    assert!(err.is(DbErrorKind::NoSuchEntry));
}

#[tokio::test]
async fn test_datafile_search_matches_names_newest_first() {
    let h = Harness::new().await;
    let user_id = h.user("ada@example.org").await.user_id.unwrap();
    let mut conn = h.conn().await;
    let mut dataset = Dataset::new(user_id, "animals");
    dataset.add_label("cat");
    dataset.create(&mut conn).await.unwrap();

    let names = ["cat-a.png", "dog.png", "cat-b.png", "cat-c.jpg"];
    let added = [300, 100, 200, 200];
    let ids = dataset.allocate_datafile_ids(&mut conn, names.len()).await.unwrap();
    for ((id, name), date_added) in ids.zip(names).zip(added) {
        let mut file = dataset.new_datafile(id, name, Some(1), None).unwrap();
        file.date_added = Some(date_added);
        file.create(&mut conn).await.unwrap();
    }
    let found = |files: Vec<Datafile>| files.into_iter().map(|f| f.filename).collect::<Vec<_>>();

    let cats = dataset.search_datafiles(&mut conn, "cat%", 0, 20).await.unwrap();
    assert_eq!(found(cats), vec!["cat-a.png", "cat-c.jpg", "cat-b.png"]);

    let second_page = dataset.search_datafiles(&mut conn, "%.png", 1, 2).await.unwrap();
    assert_eq!(found(second_page), vec!["dog.png"]);

    let probe = Probe::<Datafile>::new().like("filename", "%.jpg");
    assert_eq!(probe.count(&mut conn).await.unwrap(), 1);
    assert!(Probe::<Datafile>::new().like("name", "%").select_statement().is_err());
}

#[tokio::test]
async fn test_forward_finalizes_children_and_replays() {
    let h = Harness::new().await;
    let user_id = h.user("ada@example.org").await.user_id.unwrap();
    let mut conn = h.conn().await;
    let mut dataset = Dataset::new(user_id, "animals");
    dataset.add_label("cat");
    dataset.create(&mut conn).await.unwrap();

    let ids = dataset.allocate_datafile_ids(&mut conn, 2).await.unwrap();
    for id in ids {
        let mut file: Datafile = dataset.new_datafile(id, format!("{id}.png"), Some(1), None).unwrap();
        file.create(&mut conn).await.unwrap();
        file.save_content(h.blobs(), vec![1, 2, 3], None).await.unwrap();
    }
    assert_eq!(h.blob_keys().await.len(), 2);

    let mut ledger = RollbackLedger::new();
    let forwarded = forward::<Dataset, Datafile>(&dataset, &mut conn, h.blobs(), &mut ledger)
        .await
        .unwrap();

    assert_eq!(forwarded, 2);
    assert!(h.blob_keys().await.is_empty());
    assert_eq!(h.count("datafiles").await, 2);

    ledger.replay().await;
    assert_eq!(h.blob_keys().await.len(), 2);
}

#[tokio::test]
async fn test_forward_from_an_unsaved_parent_does_nothing() {
    let h = Harness::new().await;
    let mut ledger = RollbackLedger::new();

    let forwarded = forward::<Dataset, Datafile>(&Dataset::new(1, "draft"), &mut h.conn().await, h.blobs(), &mut ledger)
        .await
        .unwrap();

    assert_eq!(forwarded, 0);
    assert!(ledger.is_empty());
}

#[test]
fn test_descriptor_columns() {
    let d = Datafile::DESCRIPTOR;
    assert_eq!(
        d.columns().collect::<Vec<_>>(),
        vec!["datasetID", "datafileID", "filename", "labelID", "customLabel", "dateAdded"]
    );
    assert_eq!(d.insert_columns().len(), 6);
    assert_eq!(Script::DESCRIPTOR.insert_columns(), vec!["userID", "name", "lastModified"]);
    assert_eq!(d.column("labelID"), Some("labelID"));
    assert_eq!(d.column("labelid"), None);
}
