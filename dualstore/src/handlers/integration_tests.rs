//! End-to-end tests running handler pipelines against a real SQLite file
//! and a fault-injecting blob store.

use super::{datasets, presets, projects, scripts, training, users};
use crate::collaborators::MockScriptCompiler;
use crate::entities::{Datafile, Dataset, Project, Script};
use crate::entity::{Content, Probe};
use crate::errors::{Error, ServerError};
use crate::pipeline::{Flow, Pipeline, Request, Response};
use crate::testing::Harness;
use pretty_assertions::assert_eq;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

fn as_user(user_id: i64) -> Request {
    Request::new().with_session(user_id)
}

fn id_of(response: &Response, field: &str) -> i64 {
    response.json_body().unwrap()[field].as_i64().unwrap()
}

async fn signed_up(h: &Harness, email: &str) -> i64 {
    h.user(email).await.user_id.unwrap()
}

async fn new_script(h: &Harness, user_id: i64, name: &str, content: &str) -> i64 {
    let created = h
        .run(
            &scripts::create().unwrap(),
            as_user(user_id).with_body("name", name).with_body("content", content),
        )
        .await;
    assert_eq!(created.status, 201);
    id_of(&created, "scriptID")
}

async fn new_dataset(h: &Harness, user_id: i64, labels: &[&str]) -> i64 {
    let created = h
        .run(
            &datasets::create().unwrap(),
            as_user(user_id).with_body("name", "animals").with_body("labels", json!(labels)),
        )
        .await;
    assert_eq!(created.status, 201);
    id_of(&created, "datasetID")
}

async fn new_project(h: &Harness, user_id: i64, body: JsonValue) -> i64 {
    let mut request = as_user(user_id);
    for (name, value) in body.as_object().unwrap() {
        request = request.with_body(name.clone(), value.clone());
    }
    let created = h.run(&projects::create().unwrap(), request).await;
    assert_eq!(created.status, 201, "{created:?}");
    id_of(&created, "projectID")
}

async fn stage_content(h: &Harness, user_id: i64, project_id: i64, location: i64) -> Response {
    h.run(
        &projects::fetch_stage_content().unwrap(),
        as_user(user_id)
            .with_path("projectID", project_id.to_string())
            .with_path("location", location.to_string()),
    )
    .await
}

#[tokio::test]
async fn test_script_lifecycle() {
    let h = Harness::new().await;
    let user_id = signed_up(&h, "ada@example.org").await;

    let script_id = new_script(&h, user_id, "Hello", "x").await;
    assert!(script_id > 0);

    let fetch = || as_user(user_id).with_path("scriptID", script_id.to_string());
    let fetched = h.run(&scripts::fetch_content().unwrap(), fetch()).await;
    assert_eq!(fetched.status, 200);
    assert_eq!(fetched.json_body(), Some(&json!("x")));

    let deleted = h.run(&scripts::delete().unwrap(), fetch()).await;
    assert_eq!(deleted.status, 204);

    let missing = h.run(&scripts::fetch_content().unwrap(), fetch()).await;
    assert_eq!(missing.status, 404);
    assert_eq!(missing.error_message(), Some("Requested resource could not be located"));
    assert!(h.blob_keys().await.is_empty());
}

#[tokio::test]
async fn test_script_rename_and_update() {
    let h = Harness::new().await;
    let user_id = signed_up(&h, "ada@example.org").await;
    let script_id = new_script(&h, user_id, "draft", "{}").await;
    let path = || as_user(user_id).with_path("scriptID", script_id.to_string());

    let renamed = h.run(&scripts::rename().unwrap(), path().with_body("name", "final")).await;
    assert_eq!(renamed.status, 200);
    assert_eq!(renamed.json_body().unwrap()["name"], "final");

    let updated = h
        .run(&scripts::update_content().unwrap(), path().with_body("content", "{\"epochs\": 3}"))
        .await;
    assert_eq!(updated.status, 204);
    let fetched = h.run(&scripts::fetch_content().unwrap(), path()).await;
    assert_eq!(fetched.json_body(), Some(&json!("{\"epochs\": 3}")));

    let listed = h.run(&scripts::list().unwrap(), as_user(user_id)).await;
    assert_eq!(listed.json_body().unwrap().as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_authentication_and_ownership() {
    let h = Harness::new().await;
    let owner = signed_up(&h, "ada@example.org").await;
    let intruder = signed_up(&h, "eve@example.org").await;
    let script_id = new_script(&h, owner, "private", "secret").await;

    let anonymous = h
        .run(
            &scripts::fetch_content().unwrap(),
            Request::new().with_path("scriptID", script_id.to_string()),
        )
        .await;
    assert_eq!(anonymous.status, 401);
    assert_eq!(
        anonymous.error_message(),
        Some("You must be logged in to perform this action")
    );

    let foreign = h
        .run(
            &scripts::delete().unwrap(),
            as_user(intruder).with_path("scriptID", script_id.to_string()),
        )
        .await;
    assert_eq!(foreign.status, 403);
    assert_eq!(foreign.error_message(), Some("Access denied to requested resource"));
    assert_eq!(h.count("scripts").await, 1);
    assert_eq!(h.blob_keys().await.len(), 1);
}

#[tokio::test]
async fn test_missing_required_field() {
    let h = Harness::new().await;
    let user_id = signed_up(&h, "ada@example.org").await;

    let response = h.run(&scripts::create().unwrap(), as_user(user_id)).await;

    assert_eq!(response.status, 400);
    assert_eq!(response.error_message(), Some("Missing field in body: 'name'"));
    assert_eq!(h.count("scripts").await, 0);
}

#[tokio::test]
async fn test_upload_with_unknown_label_changes_nothing() {
    let h = Harness::new().await;
    let user_id = signed_up(&h, "ada@example.org").await;
    let dataset_id = new_dataset(&h, user_id, &["cat"]).await;
    let upload = || as_user(user_id).with_path("datasetID", dataset_id.to_string());

    let first = h
        .run(
            &datasets::upload_files().unwrap(),
            upload().with_body("labelID", 1).with_file("a.png", b"a".to_vec()),
        )
        .await;
    assert_eq!(first.status, 201);
    let keys_before = h.blob_keys().await;
    assert_eq!(keys_before, vec![format!("datafile-{dataset_id}-1")]);

    let rejected = h
        .run(
            &datasets::upload_files().unwrap(),
            upload()
                .with_body("labelID", 99)
                .with_file("b.png", b"b".to_vec())
                .with_file("c.png", b"c".to_vec())
                .with_file("d.png", b"d".to_vec()),
        )
        .await;

    assert_eq!(rejected.status, 404);
    assert_eq!(h.count("datafiles").await, 1);
    assert_eq!(h.blob_keys().await, keys_before);
    let dataset = Probe::<Dataset>::new()
        .eq("datasetID", dataset_id)
        .fetch_one(&mut h.conn().await)
        .await
        .unwrap();
    assert_eq!(dataset.next_file, 2);
}

#[tokio::test]
async fn test_blob_failure_mid_upload_rolls_back_every_file() {
    let h = Harness::new().await;
    let user_id = signed_up(&h, "ada@example.org").await;
    let dataset_id = new_dataset(&h, user_id, &["cat"]).await;

    h.store.land_failed_puts(true);
    h.store.fail_nth_put(2);
    let response = h
        .run(
            &datasets::upload_files().unwrap(),
            as_user(user_id)
                .with_path("datasetID", dataset_id.to_string())
                .with_body("labelID", 1)
                .with_file("a.png", b"a".to_vec())
                .with_file("b.png", b"b".to_vec())
                .with_file("c.png", b"c".to_vec()),
        )
        .await;

    assert_eq!(response.status, 500);
    assert_eq!(h.count("datafiles").await, 0);
    assert!(h.blob_keys().await.is_empty());
}

#[tokio::test]
async fn test_label_management() {
    let h = Harness::new().await;
    let user_id = signed_up(&h, "ada@example.org").await;
    let dataset_id = new_dataset(&h, user_id, &["cat", "dog"]).await;
    let path = || as_user(user_id).with_path("datasetID", dataset_id.to_string());

    let added = h.run(&datasets::add_label().unwrap(), path().with_body("string", "bird")).await;
    assert_eq!(added.status, 201);
    assert_eq!(added.json_body().unwrap()["labels"][2]["labelID"], 3);

    let updated = h
        .run(
            &datasets::update_label().unwrap(),
            path().with_path("labelID", "2").with_body("string", "wolf"),
        )
        .await;
    assert_eq!(updated.status, 200);
    assert_eq!(updated.json_body().unwrap()["labels"][1]["string"], "wolf");

    let missing = h
        .run(
            &datasets::update_label().unwrap(),
            path().with_path("labelID", "9").with_body("string", "fox"),
        )
        .await;
    assert_eq!(missing.status, 404);
    assert_eq!(missing.error_message(), Some("Requested label does not exist"));

    let synced = h
        .run(
            &datasets::sync_labels().unwrap(),
            path().with_body(
                "labels",
                json!([{"labelID": 1, "string": "lion"}, {"string": "owl"}]),
            ),
        )
        .await;
    assert_eq!(synced.status, 200);
    let labels: Vec<(i64, String)> = synced.json_body().unwrap()["labels"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| (l["labelID"].as_i64().unwrap(), l["string"].as_str().unwrap().to_string()))
        .collect();
    assert_eq!(labels, vec![(1, "lion".to_string()), (4, "owl".to_string())]);
    assert_eq!(h.count("dataLabels").await, 2);
}

#[tokio::test]
async fn test_label_in_use_cannot_be_deleted() {
    let h = Harness::new().await;
    let user_id = signed_up(&h, "ada@example.org").await;
    let dataset_id = new_dataset(&h, user_id, &["cat"]).await;
    let path = || as_user(user_id).with_path("datasetID", dataset_id.to_string());
    h.run(
        &datasets::upload_files().unwrap(),
        path().with_body("labelID", 1).with_file("a.png", b"a".to_vec()),
    )
    .await;

    let response = h.run(&datasets::delete_label().unwrap(), path().with_path("labelID", "1")).await;

    assert_eq!(response.status, 409);
    assert_eq!(h.count("dataLabels").await, 1);
}

fn datafile_ids(response: &Response) -> Vec<i64> {
    response
        .json_body()
        .unwrap()
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["datafileID"].as_i64().unwrap())
        .collect()
}

#[tokio::test]
async fn test_datafile_search_and_delete() {
    let h = Harness::new().await;
    let user_id = signed_up(&h, "ada@example.org").await;
    let dataset_id = new_dataset(&h, user_id, &["cat"]).await;
    let path = || as_user(user_id).with_path("datasetID", dataset_id.to_string());
    let search = |query: Option<&str>, page: &str| {
        let request = path().with_query("page", page);
        match query {
            Some(query) => request.with_query("query", query),
            None => request,
        }
    };
    h.run(
        &datasets::upload_files().unwrap(),
        path()
            .with_body("customLabel", "tabby")
            .with_file("a.png", b"a".to_vec())
            .with_file("b.png", b"b".to_vec())
            .with_file("c.png", b"c".to_vec()),
    )
    .await;
    h.run(
        &datasets::upload_files().unwrap(),
        path()
            .with_body("labelID", 1)
            .with_file("cat-1.jpg", b"d".to_vec())
            .with_file("cat-2.jpg", b"e".to_vec()),
    )
    .await;
    let list = datasets::list_datafiles().unwrap();

    let everything = h.run(&list, path()).await;
    assert_eq!(everything.status, 200);
    assert_eq!(datafile_ids(&everything), vec![5, 4, 3, 2, 1]);

    let pngs = h.run(&list, search(Some("png"), "1")).await;
    assert_eq!(datafile_ids(&pngs), vec![3, 2, 1]);
    let entries = pngs.json_body().unwrap().as_array().unwrap().clone();
    assert_eq!(entries[1]["filename"], "b.png");
    assert_eq!(entries[1]["customLabel"], "tabby");
    let url = entries[1]["url"].as_str().unwrap();
    assert!(url.starts_with(&format!("http://blobs.test/test/datafile-{dataset_id}-2?")));

    assert_eq!(datafile_ids(&h.run(&list, search(Some("cat"), "1")).await), vec![5, 4]);
    assert!(datafile_ids(&h.run(&list, search(Some("dog"), "1")).await).is_empty());
    assert!(datafile_ids(&h.run(&list, search(None, "2")).await).is_empty());
    assert_eq!(h.run(&list, search(None, "0")).await.status, 400);

    let deleted = h
        .run(&datasets::delete_datafile().unwrap(), path().with_path("datafileID", "2"))
        .await;
    assert_eq!(deleted.status, 204);
    assert_eq!(h.count("datafiles").await, 4);
    assert!(!h.blob_keys().await.contains(&format!("datafile-{dataset_id}-2")));
    assert_eq!(datafile_ids(&h.run(&list, search(Some(".png"), "1")).await), vec![3, 1]);
}

#[tokio::test]
async fn test_datafile_update() {
    let h = Harness::new().await;
    let user_id = signed_up(&h, "ada@example.org").await;
    let dataset_id = new_dataset(&h, user_id, &["cat", "dog"]).await;
    let path = || as_user(user_id).with_path("datasetID", dataset_id.to_string());
    h.run(
        &datasets::upload_files().unwrap(),
        path().with_body("labelID", 1).with_file("a.png", b"a".to_vec()),
    )
    .await;
    let update = datasets::update_datafile().unwrap();
    let edit = || path().with_path("datafileID", "1");

    let relabelled = h
        .run(&update, edit().with_body("filename", "dog.png").with_body("labelID", 2))
        .await;
    assert_eq!(relabelled.status, 200);
    let body = relabelled.json_body().unwrap();
    assert_eq!(body["filename"], "dog.png");
    assert_eq!(body["labelID"], 2);
    assert_eq!(body["customLabel"], JsonValue::Null);

    let custom = h
        .run(
            &update,
            edit()
                .with_body("filename", "odd.png")
                .with_body("labelID", JsonValue::Null)
                .with_body("customLabel", "fox"),
        )
        .await;
    assert_eq!(custom.status, 200);
    assert_eq!(custom.json_body().unwrap()["labelID"], JsonValue::Null);
    assert_eq!(custom.json_body().unwrap()["customLabel"], "fox");

    let unlabelled = h.run(&update, edit().with_body("filename", "bare.png")).await;
    assert_eq!(unlabelled.status, 400);
    let unknown = h
        .run(&update, edit().with_body("filename", "x.png").with_body("labelID", 9))
        .await;
    assert_eq!(unknown.status, 404);
    let missing = h
        .run(
            &update,
            path().with_path("datafileID", "7").with_body("filename", "x.png").with_body("labelID", 1),
        )
        .await;
    assert_eq!(missing.status, 404);

    let stranger = signed_up(&h, "eve@example.org").await;
    let foreign = h
        .run(
            &update,
            as_user(stranger)
                .with_path("datasetID", dataset_id.to_string())
                .with_path("datafileID", "1")
                .with_body("filename", "mine.png")
                .with_body("labelID", 1),
        )
        .await;
    assert_eq!(foreign.status, 403);

    let stored = Probe::<Datafile>::new()
        .eq("datasetID", dataset_id)
        .fetch_one(&mut h.conn().await)
        .await
        .unwrap();
    assert_eq!(stored.filename, "odd.png");
    assert_eq!(stored.custom_label.as_deref(), Some("fox"));
    assert_eq!(h.blob_keys().await, vec![format!("datafile-{dataset_id}-1")]);
}

#[tokio::test]
async fn test_stage_content_follows_its_stage() {
    let h = Harness::new().await;
    let user_id = signed_up(&h, "ada@example.org").await;
    let project_id = new_project(&h, user_id, json!({"name": "vision"})).await;
    let replace = |stages: JsonValue| {
        as_user(user_id)
            .with_path("projectID", project_id.to_string())
            .with_body("stages", stages)
    };

    let initial = h
        .run(
            &projects::replace_stages().unwrap(),
            replace(json!([
                {"name": "A", "type": "int", "source": {"inline": {"content": "a"}}},
                {"name": "B", "type": "int", "source": {"inline": {"content": "b"}}},
                {"name": "C", "type": "int", "source": {"inline": {"content": "c"}}},
            ])),
        )
        .await;
    assert_eq!(initial.status, 200);

    let reordered = h
        .run(
            &projects::replace_stages().unwrap(),
            replace(json!([
                {"name": "C", "type": "int", "source": {"existing": {"location": 2}}},
                {"name": "A", "type": "int", "source": {"existing": {"location": 0}}},
            ])),
        )
        .await;
    assert_eq!(reordered.status, 200);
    let returned: Vec<(i64, &str)> = reordered
        .json_body()
        .unwrap()
        .as_array()
        .unwrap()
        .iter()
        .map(|s| (s["location"].as_i64().unwrap(), s["name"].as_str().unwrap()))
        .collect();
    assert_eq!(returned, vec![(0, "C"), (1, "A")]);

    assert_eq!(stage_content(&h, user_id, project_id, 0).await.json_body(), Some(&json!("c")));
    assert_eq!(stage_content(&h, user_id, project_id, 1).await.json_body(), Some(&json!("a")));
    assert_eq!(stage_content(&h, user_id, project_id, 2).await.status, 404);
    assert_eq!(
        h.blob_keys().await,
        vec![format!("config-{project_id}-0"), format!("config-{project_id}-1")]
    );

    let stages = h
        .run(
            &projects::fetch_stages().unwrap(),
            as_user(user_id).with_path("projectID", project_id.to_string()),
        )
        .await;
    let names: Vec<&str> = stages
        .json_body()
        .unwrap()
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["C", "A"]);
}

#[tokio::test]
async fn test_failed_stage_replacement_keeps_old_stages() {
    let h = Harness::new().await;
    let user_id = signed_up(&h, "ada@example.org").await;
    let project_id = new_project(&h, user_id, json!({"name": "vision"})).await;
    let replace = |stages: JsonValue| {
        as_user(user_id)
            .with_path("projectID", project_id.to_string())
            .with_body("stages", stages)
    };
    h.run(
        &projects::replace_stages().unwrap(),
        replace(json!([
            {"name": "A", "type": "int", "source": {"inline": {"content": "a"}}},
            {"name": "B", "type": "int", "source": {"inline": {"content": "b"}}},
        ])),
    )
    .await;

    h.store.fail_nth_put(2);
    let failed = h
        .run(
            &projects::replace_stages().unwrap(),
            replace(json!([
                {"name": "B", "type": "int", "source": {"existing": {"location": 1}}},
                {"name": "A", "type": "int", "source": {"existing": {"location": 0}}},
            ])),
        )
        .await;

    assert_eq!(failed.status, 500);
    assert_eq!(stage_content(&h, user_id, project_id, 0).await.json_body(), Some(&json!("a")));
    assert_eq!(stage_content(&h, user_id, project_id, 1).await.json_body(), Some(&json!("b")));
}

#[tokio::test]
async fn test_foreign_script_cannot_be_linked() {
    let h = Harness::new().await;
    let owner = signed_up(&h, "ada@example.org").await;
    let intruder = signed_up(&h, "eve@example.org").await;
    let script_id = new_script(&h, owner, "private", "{}").await;
    let project_id = new_project(&h, intruder, json!({"name": "theft"})).await;

    let response = h
        .run(
            &projects::replace_stages().unwrap(),
            as_user(intruder)
                .with_path("projectID", project_id.to_string())
                .with_body("stages", json!([{"name": "X", "type": "ext", "scriptID": script_id}])),
        )
        .await;

    assert_eq!(response.status, 403);
    assert_eq!(h.count("configs").await, 0);
}

#[tokio::test]
async fn test_project_update_links_only_owned_datasets() {
    let h = Harness::new().await;
    let owner = signed_up(&h, "ada@example.org").await;
    let other = signed_up(&h, "eve@example.org").await;
    let mine = new_dataset(&h, owner, &[]).await;
    let theirs = new_dataset(&h, other, &[]).await;
    let project_id = new_project(&h, owner, json!({"name": "vision", "datasetIDs": [mine]})).await;
    let update = |body: JsonValue| {
        as_user(owner)
            .with_path("projectID", project_id.to_string())
            .with_body("datasetIDs", body)
    };

    let denied = h.run(&projects::update().unwrap(), update(json!([mine, theirs]))).await;
    assert_eq!(denied.status, 403);

    let cleared = h.run(&projects::update().unwrap(), update(json!([]))).await;
    assert_eq!(cleared.status, 200);
    assert_eq!(cleared.json_body().unwrap()["datasetIDs"], json!([]));
    assert_eq!(h.count("projectDatasets").await, 0);
}

#[tokio::test]
async fn test_preset_in_use_cannot_be_deleted() {
    let h = Harness::new().await;
    let user_id = signed_up(&h, "ada@example.org").await;
    let preset = h
        .run(
            &presets::create().unwrap(),
            as_user(user_id).with_body("name", "resnet").with_body("content", "{}"),
        )
        .await;
    assert_eq!(preset.status, 201);
    let preset_id = id_of(&preset, "presetID");
    new_project(&h, user_id, json!({"name": "vision", "presetID": preset_id})).await;

    let response = h
        .run(
            &presets::delete().unwrap(),
            as_user(user_id).with_path("presetID", preset_id.to_string()),
        )
        .await;

    assert_eq!(response.status, 409);
    assert_eq!(
        response.error_message(),
        Some("Requested resource could not be altered due to a dependency")
    );
    assert!(h.blob_keys().await.contains(&format!("preset-{preset_id}")));
}

/// A project with a preset, an inline stage, a script stage, and one
/// dataset with two labelled files.
async fn training_project(h: &Harness, user_id: i64) -> (i64, i64) {
    let preset = h
        .run(
            &presets::create().unwrap(),
            as_user(user_id)
                .with_body("name", "base")
                .with_body("content", r#"{"model": {"layers": 2}, "epochs": 1}"#),
        )
        .await;
    let preset_id = id_of(&preset, "presetID");
    let script_id = new_script(h, user_id, "optimizer", r#"{"optimizer": {"lr": 0.1}}"#).await;
    let dataset_id = new_dataset(h, user_id, &["cat", "dog"]).await;
    let upload = || as_user(user_id).with_path("datasetID", dataset_id.to_string());
    h.run(
        &datasets::upload_files().unwrap(),
        upload().with_body("labelID", 1).with_file("a.png", b"a".to_vec()),
    )
    .await;
    h.run(
        &datasets::upload_files().unwrap(),
        upload().with_body("customLabel", "small, bird").with_file("b.png", b"b".to_vec()),
    )
    .await;

    let project_id = new_project(
        h,
        user_id,
        json!({"name": "vision", "presetID": preset_id, "datasetIDs": [dataset_id]}),
    )
    .await;
    let stages = h
        .run(
            &projects::replace_stages().unwrap(),
            as_user(user_id).with_path("projectID", project_id.to_string()).with_body(
                "stages",
                json!([
                    {"name": "model", "type": "int",
                     "source": {"inline": {"content": r#"{"model": {"dropout": 0.5}, "epochs": 3}"#}}},
                    {"name": "optimizer", "type": "ext", "scriptID": script_id},
                ]),
            ),
        )
        .await;
    assert_eq!(stages.status, 200);
    (project_id, dataset_id)
}

#[tokio::test]
async fn test_training_export() {
    let h = Harness::new().await;
    let user_id = signed_up(&h, "ada@example.org").await;
    let (project_id, dataset_id) = training_project(&h, user_id).await;

    let exported = h
        .run(
            &training::export().unwrap(),
            as_user(user_id).with_path("projectID", project_id.to_string()),
        )
        .await;

    assert_eq!(exported.status, 201);
    let body = exported.json_body().unwrap();
    assert_eq!(body["configKey"], format!("training-config-{project_id}"));
    assert_eq!(body["entries"], 2);

    let config: JsonValue =
        serde_json::from_slice(&h.blobs().get(&format!("training-config-{project_id}")).await.unwrap())
            .unwrap();
    assert_eq!(
        config,
        json!({"model": {"layers": 2, "dropout": 0.5}, "epochs": 3, "optimizer": {"lr": 0.1}})
    );
    let manifest = h.blobs().get(&format!("training-manifest-{project_id}")).await.unwrap();
    assert_eq!(
        String::from_utf8(manifest).unwrap(),
        format!("datafile-{dataset_id}-1,cat\ndatafile-{dataset_id}-2,small bird\n")
    );

    let deleted = h
        .run(
            &projects::delete().unwrap(),
            as_user(user_id).with_path("projectID", project_id.to_string()),
        )
        .await;
    assert_eq!(deleted.status, 204);
    assert!(h.blobs().keys("training-").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_training_export_rejects_uncompilable_layers() {
    let h = Harness::new().await;
    let user_id = signed_up(&h, "ada@example.org").await;
    let (project_id, _) = training_project(&h, user_id).await;

    let mut compiler = MockScriptCompiler::new();
    compiler
        .expect_compile()
        .returning(|_| Err(anyhow::anyhow!("unexpected token")));
    let services = h.services.clone().with_compiler(Arc::new(compiler));

    let response = training::export()
        .unwrap()
        .execute(
            &services,
            as_user(user_id).with_path("projectID", project_id.to_string()),
        )
        .await;

    assert_eq!(response.status, 400);
    assert!(h.blobs().keys("training-").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_account_deletion_leaves_nothing_behind() {
    let h = Harness::new().await;
    let user_id = signed_up(&h, "ada@example.org").await;
    let (project_id, _) = training_project(&h, user_id).await;
    h.run(
        &training::export().unwrap(),
        as_user(user_id).with_path("projectID", project_id.to_string()),
    )
    .await;
    let survivor = signed_up(&h, "eve@example.org").await;
    new_script(&h, survivor, "kept", "{}").await;

    let response = h.run(&users::delete_account().unwrap(), as_user(user_id)).await;

    assert_eq!(response.status, 204);
    for table in ["projects", "configs", "projectDatasets", "datasets", "dataLabels", "datafiles"] {
        assert_eq!(h.count(table).await, 0, "{table} still has rows");
    }
    assert_eq!(h.count("users").await, 1);
    assert_eq!(h.count("scripts").await, 1);
    assert_eq!(h.count("presets").await, 1);
    let keys: Vec<String> = h
        .blob_keys()
        .await
        .into_iter()
        .filter(|k| !k.starts_with("preset-"))
        .collect();
    assert_eq!(keys, vec![format!("script-{survivor}-2")]);

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipients, vec!["ada@example.org".to_string()]);
}

#[tokio::test]
async fn test_failed_farewell_does_not_fail_deletion() {
    let h = Harness::new().await;
    let user_id = signed_up(&h, "ada@example.org").await;
    h.notifier.fail(true);

    let response = h.run(&users::delete_account().unwrap(), as_user(user_id)).await;

    assert_eq!(response.status, 204);
    assert_eq!(h.count("users").await, 0);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_user_registration() {
    let h = Harness::new().await;
    let register = || {
        Request::new()
            .with_body("email", "ada@example.org")
            .with_body("firstName", "Ada")
            .with_body("lastName", "Lovelace")
            .with_body("password", "correct horse")
    };

    let created = h.run(&users::create().unwrap(), register()).await;
    assert_eq!(created.status, 201);
    assert!(created.json_body().unwrap().get("password").is_none());
    let user_id = id_of(&created, "userID");

    let duplicate = h.run(&users::create().unwrap(), register()).await;
    assert_eq!(duplicate.status, 409);

    let logged_in = h.run(&users::create().unwrap(), register().with_session(user_id)).await;
    assert_eq!(logged_in.status, 303);
    assert_eq!(h.count("users").await, 1);
}

fn failing_update() -> Pipeline {
    Pipeline::builder("test.failing_update")
        .authenticate()
        .with_path_params(&["scriptID"], &[])
        .with_body_params(&["content"], &[])
        .with_entity::<Script>("script", &[("scriptID", "scriptID")])
        .transaction()
        .save_content::<Script>("script", "content")
        .then("reject", |_ctx| {
            Box::pin(async { Err::<Flow, Error>(ServerError::bad_request("rejected after write").into()) })
        })
        .commit()
        .terminate(204)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_rolled_back_write_restores_content() {
    let h = Harness::new().await;
    let user_id = signed_up(&h, "ada@example.org").await;
    let script_id = new_script(&h, user_id, "notes", "old").await;

    let response = h
        .run(
            &failing_update(),
            as_user(user_id)
                .with_path("scriptID", script_id.to_string())
                .with_body("content", "new"),
        )
        .await;

    assert_eq!(response.status, 400);
    let script = Probe::<Script>::new()
        .eq("scriptID", script_id)
        .fetch_one(&mut h.conn().await)
        .await
        .unwrap();
    assert_eq!(script.fetch_content(h.blobs()).await.unwrap(), b"old".to_vec());
}

#[tokio::test]
async fn test_failed_compensation_is_attempted_and_reported() {
    let h = Harness::new().await;
    let user_id = signed_up(&h, "ada@example.org").await;
    let script_id = new_script(&h, user_id, "notes", "old").await;
    let (puts_before, _) = h.store.counts();

    // The new content lands; restoring the old content is the second put.
    h.store.fail_nth_put(2);
    let response = h
        .run(
            &failing_update(),
            as_user(user_id)
                .with_path("scriptID", script_id.to_string())
                .with_body("content", "new"),
        )
        .await;

    assert_eq!(response.status, 400);
    assert_eq!(h.store.counts().0, puts_before + 2);
    let key = format!("script-{user_id}-{script_id}");
    assert_eq!(h.blobs().get(&key).await.unwrap(), b"new".to_vec());
}

#[tokio::test]
async fn test_project_delete_removes_stage_blobs() {
    let h = Harness::new().await;
    let user_id = signed_up(&h, "ada@example.org").await;
    let project_id = new_project(&h, user_id, json!({"name": "vision"})).await;
    h.run(
        &projects::replace_stages().unwrap(),
        as_user(user_id)
            .with_path("projectID", project_id.to_string())
            .with_body("stages", json!([{"name": "A", "type": "gen"}])),
    )
    .await;
    assert_eq!(h.blob_keys().await, vec![format!("config-{project_id}-0")]);

    let deleted = h
        .run(
            &projects::delete().unwrap(),
            as_user(user_id).with_path("projectID", project_id.to_string()),
        )
        .await;

    assert_eq!(deleted.status, 204);
    assert_eq!(h.count("configs").await, 0);
    assert!(h.blob_keys().await.is_empty());
    let project = Probe::<Project>::new()
        .eq("projectID", project_id)
        .fetch(&mut h.conn().await)
        .await
        .unwrap();
    assert!(project.is_none());
}
