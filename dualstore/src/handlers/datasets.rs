//! Dataset, label, and datafile pipelines.

use crate::db::DatabaseError;
use crate::entities::{DataLabel, Datafile, Dataset};
use crate::entity::{Content, Persist};
use crate::errors::{Error, PipelineFault};
use crate::pipeline::{Check, Flow, Pipeline, RequestContext, Resource};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info};

const DATASET_BY_ID: &[(&str, &str)] = &[("datasetID", "datasetID")];
const DATAFILE_BY_ID: &[(&str, &str)] = &[("datasetID", "datasetID"), ("datafileID", "datafileID")];
const DATAFILE_PAGE_SIZE: u32 = 20;

fn name_check() -> Check {
    Check::all(vec![Check::string(), Check::non_empty()])
}

async fn create_dataset(ctx: &mut RequestContext) -> Result<Flow, Error> {
    let user_id = ctx.require_user()?;
    let name: String = ctx.required("name")?;
    let labels: Vec<String> = ctx.param_as("labels")?.unwrap_or_default();

    let mut dataset = Dataset::new(user_id, name);
    for label in labels {
        dataset.add_label(label);
    }
    dataset.create(ctx.connection().await?).await?;
    ctx.insert("dataset", Resource::entity(dataset))?;
    Ok(Flow::Proceed)
}

async fn apply_rename(ctx: &mut RequestContext) -> Result<Flow, Error> {
    let name: String = ctx.required("name")?;
    ctx.entity_mut::<Dataset>("dataset")?.name = name;
    Ok(Flow::Proceed)
}

async fn push_label(ctx: &mut RequestContext) -> Result<Flow, Error> {
    let string: String = ctx.required("string")?;
    ctx.entity_mut::<Dataset>("dataset")?.add_label(string);
    Ok(Flow::Proceed)
}

async fn rename_label(ctx: &mut RequestContext) -> Result<Flow, Error> {
    let label_id: i64 = ctx.required("labelID")?;
    let string: String = ctx.required("string")?;
    ctx.entity_mut::<Dataset>("dataset")?.update_label(label_id, string)?;
    Ok(Flow::Proceed)
}

async fn drop_label(ctx: &mut RequestContext) -> Result<Flow, Error> {
    let label_id: i64 = ctx.required("labelID")?;
    ctx.entity_mut::<Dataset>("dataset")?.delete_label(label_id)?;
    Ok(Flow::Proceed)
}

async fn replace_labels(ctx: &mut RequestContext) -> Result<Flow, Error> {
    let labels: Vec<DataLabel> = ctx.required("labels")?;
    let dataset = ctx.entity_mut::<Dataset>("dataset")?;
    let dataset_id = dataset.dataset_id;
    dataset.labels = labels
        .into_iter()
        .map(|label| DataLabel { dataset_id, ..label })
        .collect();
    Ok(Flow::Proceed)
}

async fn store_datafiles(ctx: &mut RequestContext) -> Result<Flow, Error> {
    let files = ctx.files("files")?.to_vec();
    let label_id = ctx.param_as::<Option<i64>>("labelID")?.flatten();
    let custom_label = ctx.param_as::<Option<String>>("customLabel")?.flatten();
    let mut dataset = ctx.entity::<Dataset>("dataset")?.clone();

    let (conn, ledger, blobs) = ctx.transaction_parts("store_datafiles")?;
    let ids = dataset.allocate_datafile_ids(conn, files.len()).await?;
    if let Some(label_id) = label_id {
        if dataset.label(label_id).is_none() {
            return Err(unknown_label(label_id, &dataset));
        }
    }

    let mut created = Vec::with_capacity(files.len());
    for (datafile_id, file) in ids.zip(files) {
        let mut datafile = dataset.new_datafile(datafile_id, file.name, label_id, custom_label.clone())?;
        datafile.create(conn).await?;
        datafile.save_content(blobs, file.content, Some(&mut *ledger)).await?;
        created.push(datafile);
    }

    info!(
        dataset_id = dataset.dataset_id.unwrap_or_default(),
        count = created.len(),
        "datafiles uploaded"
    );
    ctx.replace("dataset", Resource::entity(dataset));
    ctx.insert("datafiles", Resource::entities(created))?;
    Ok(Flow::Proceed)
}

fn unknown_label(label_id: i64, dataset: &Dataset) -> Error {
    DatabaseError::no_such_entry(format!(
        "label {label_id} does not exist in dataset {}",
        dataset.dataset_id.unwrap_or_default()
    ))
    .into()
}

async fn collect_datafiles(ctx: &mut RequestContext) -> Result<Flow, Error> {
    // Numeric-looking queries arrive coerced; search them as text.
    let query = match ctx.param_as::<JsonValue>("query")? {
        Some(JsonValue::String(text)) => text,
        Some(JsonValue::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let page: u32 = ctx.param_as("page")?.unwrap_or(1);
    let dataset = ctx.entity::<Dataset>("dataset")?.clone();
    let blobs = ctx.blobs().clone();

    let pattern = format!("%{query}%");
    let datafiles = dataset
        .search_datafiles(ctx.connection().await?, &pattern, page.saturating_sub(1), DATAFILE_PAGE_SIZE)
        .await?;
    debug!(pattern = %pattern, page, found = datafiles.len(), "datafile search");
    let mut listed = Vec::with_capacity(datafiles.len());
    for datafile in datafiles {
        let url = datafile.temporary_read_url(&blobs, None)?;
        let mut entry = serde_json::to_value(&datafile)?;
        entry["url"] = json!(url.url);
        entry["expiresAt"] = json!(url.expires_at);
        listed.push(entry);
    }
    ctx.insert("datafiles", Resource::Param(listed.into()))?;
    Ok(Flow::Proceed)
}

async fn edit_datafile(ctx: &mut RequestContext) -> Result<Flow, Error> {
    let filename: String = ctx.required("filename")?;
    let label_id = ctx.param_as::<Option<i64>>("labelID")?.flatten();
    let custom_label = ctx.param_as::<Option<String>>("customLabel")?.flatten();
    if let Some(label_id) = label_id {
        let dataset = ctx.entity::<Dataset>("dataset")?;
        if dataset.label(label_id).is_none() {
            return Err(unknown_label(label_id, dataset));
        }
    }

    let datafile = ctx.entity_mut::<Datafile>("datafile")?;
    datafile.filename = filename;
    match label_id {
        Some(label_id) => {
            datafile.label_id = Some(label_id);
            datafile.custom_label = None;
        }
        None => {
            datafile.label_id = None;
            datafile.custom_label = Some(custom_label.unwrap_or_default());
        }
    }
    Ok(Flow::Proceed)
}

/// `POST /datasets` with `name` and optional `labels` (strings).
pub fn create() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("datasets.create")
        .authenticate()
        .with_body_params(&["name"], &["labels"])
        .check("name", name_check())
        .check(
            "labels",
            Check::any(vec![Check::null(), Check::each(name_check())]),
        )
        .transaction()
        .then("create_dataset", |ctx| Box::pin(create_dataset(ctx)))
        .commit()
        .terminate_with(201, "dataset")
        .build()
}

/// `GET /datasets`.
pub fn list() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("datasets.list")
        .authenticate()
        .with_all_entities::<Dataset>("datasets", &[("userID", "userID")])
        .terminate_with(200, "datasets")
        .build()
}

/// `PUT /datasets/{datasetID}` with a new `name`.
pub fn rename() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("datasets.rename")
        .authenticate()
        .with_path_params(&["datasetID"], &[])
        .with_body_params(&["name"], &[])
        .check("name", name_check())
        .with_entity::<Dataset>("dataset", DATASET_BY_ID)
        .authorize::<Dataset>("dataset")
        .then("apply_rename", |ctx| Box::pin(apply_rename(ctx)))
        .save_entity::<Dataset>("dataset")
        .terminate_with(200, "dataset")
        .build()
}

/// `DELETE /datasets/{datasetID}`: the dataset, its labels, and every datafile with its blob.
pub fn delete() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("datasets.delete")
        .authenticate()
        .with_path_params(&["datasetID"], &[])
        .with_entity::<Dataset>("dataset", DATASET_BY_ID)
        .authorize::<Dataset>("dataset")
        .transaction()
        .delete_entity::<Dataset>("dataset")
        .commit()
        .terminate(204)
        .build()
}

/// `POST /datasets/{datasetID}/labels` with `string`.
pub fn add_label() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("datasets.add_label")
        .authenticate()
        .with_path_params(&["datasetID"], &[])
        .with_body_params(&["string"], &[])
        .check("string", name_check())
        .with_entity::<Dataset>("dataset", DATASET_BY_ID)
        .authorize::<Dataset>("dataset")
        .transaction()
        .then("push_label", |ctx| Box::pin(push_label(ctx)))
        .save_entity::<Dataset>("dataset")
        .commit()
        .terminate_with(201, "dataset")
        .build()
}

/// `PUT /datasets/{datasetID}/labels/{labelID}` with `string`.
pub fn update_label() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("datasets.update_label")
        .authenticate()
        .with_path_params(&["datasetID", "labelID"], &[])
        .with_body_params(&["string"], &[])
        .check("string", name_check())
        .with_entity::<Dataset>("dataset", DATASET_BY_ID)
        .authorize::<Dataset>("dataset")
        .transaction()
        .then("rename_label", |ctx| Box::pin(rename_label(ctx)))
        .save_entity::<Dataset>("dataset")
        .commit()
        .terminate_with(200, "dataset")
        .build()
}

/// `DELETE /datasets/{datasetID}/labels/{labelID}`. 409 while datafiles carry the label.
pub fn delete_label() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("datasets.delete_label")
        .authenticate()
        .with_path_params(&["datasetID", "labelID"], &[])
        .with_entity::<Dataset>("dataset", DATASET_BY_ID)
        .authorize::<Dataset>("dataset")
        .transaction()
        .then("drop_label", |ctx| Box::pin(drop_label(ctx)))
        .save_entity::<Dataset>("dataset")
        .commit()
        .terminate(204)
        .build()
}

/// `PUT /datasets/{datasetID}/labels` with the complete label list.
///
/// Entries without a `labelID` are created, missing identifiers are
/// deleted, and changed strings are renamed, all in one transaction.
pub fn sync_labels() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("datasets.sync_labels")
        .authenticate()
        .with_path_params(&["datasetID"], &[])
        .with_body_params(&["labels"], &[])
        .check("labels", Check::array())
        .with_entity::<Dataset>("dataset", DATASET_BY_ID)
        .authorize::<Dataset>("dataset")
        .transaction()
        .then("replace_labels", |ctx| Box::pin(replace_labels(ctx)))
        .save_entity::<Dataset>("dataset")
        .commit()
        .terminate_with(200, "dataset")
        .build()
}

/// `POST /datasets/{datasetID}/files`: multipart upload with an optional
/// `labelID` or `customLabel` applied to every file. 201 with the datafiles.
pub fn upload_files() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("datasets.upload_files")
        .authenticate()
        .with_path_params(&["datasetID"], &[])
        .with_body_params(&[], &["labelID", "customLabel"])
        .check("labelID", Check::any(vec![Check::null(), Check::int()]))
        .check("customLabel", Check::any(vec![Check::null(), Check::string()]))
        .with_files("files")
        .transaction()
        .with_entity::<Dataset>("dataset", DATASET_BY_ID)
        .authorize::<Dataset>("dataset")
        .then_in_transaction("store_datafiles", |ctx| Box::pin(store_datafiles(ctx)))
        .commit()
        .terminate_with(201, "datafiles")
        .build()
}

/// `GET /datasets/{datasetID}/files?query&page`: datafiles whose filename
/// contains `query`, newest first, twenty per page, with temporary read URLs.
pub fn list_datafiles() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("datasets.list_datafiles")
        .authenticate()
        .with_path_params(&["datasetID"], &[])
        .with_query_params(&[], &["query", "page"])
        .check(
            "page",
            Check::any(vec![
                Check::null(),
                Check::all(vec![Check::int(), Check::range(1.0, f64::from(u32::MAX))]),
            ]),
        )
        .with_entity::<Dataset>("dataset", DATASET_BY_ID)
        .authorize::<Dataset>("dataset")
        .then("collect_datafiles", |ctx| Box::pin(collect_datafiles(ctx)))
        .terminate_with(200, "datafiles")
        .build()
}

/// `PUT /datasets/{datasetID}/files/{datafileID}` with `filename` and either
/// `labelID` or `customLabel`. Without a `labelID` the custom label applies,
/// and an empty one is rejected.
pub fn update_datafile() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("datasets.update_datafile")
        .authenticate()
        .with_path_params(&["datasetID", "datafileID"], &[])
        .with_body_params(&["filename"], &["labelID", "customLabel"])
        .check("filename", name_check())
        .check("labelID", Check::any(vec![Check::null(), Check::int()]))
        .check("customLabel", Check::any(vec![Check::null(), Check::string()]))
        .transaction()
        .with_entity::<Dataset>("dataset", DATASET_BY_ID)
        .authorize::<Dataset>("dataset")
        .with_entity::<Datafile>("datafile", DATAFILE_BY_ID)
        .then("edit_datafile", |ctx| Box::pin(edit_datafile(ctx)))
        .save_entity::<Datafile>("datafile")
        .save_entity::<Dataset>("dataset")
        .commit()
        .terminate_with(200, "datafile")
        .build()
}

/// `DELETE /datasets/{datasetID}/files/{datafileID}`.
pub fn delete_datafile() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("datasets.delete_datafile")
        .authenticate()
        .with_path_params(&["datasetID", "datafileID"], &[])
        .with_entity::<Dataset>("dataset", DATASET_BY_ID)
        .authorize::<Dataset>("dataset")
        .with_entity::<Datafile>("datafile", DATAFILE_BY_ID)
        .transaction()
        .delete_entity::<Datafile>("datafile")
        .commit()
        .terminate(204)
        .build()
}
