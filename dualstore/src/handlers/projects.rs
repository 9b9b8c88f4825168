//! Project and stage pipelines.

use crate::db::Connection;
use crate::entities::{ConfigStage, Dataset, Project, Script, StageDraft, StageType, PROJECT_TYPES};
use crate::entity::Probe;
use crate::errors::{Error, PipelineFault, ServerError};
use crate::pipeline::{Check, Flow, Pipeline, RequestContext, Resource};
use serde_json::Value as JsonValue;

const PROJECT_BY_ID: &[(&str, &str)] = &[("projectID", "projectID")];

fn project_type_check() -> Check {
    Check::any(vec![
        Check::null(),
        Check::one_of(PROJECT_TYPES.iter().map(|t| JsonValue::from(*t)).collect()),
    ])
}

fn id_list_check() -> Check {
    Check::any(vec![Check::null(), Check::each(Check::int())])
}

/// 403 unless every dataset exists and belongs to `user_id`.
pub(crate) async fn verify_datasets(conn: &mut Connection, user_id: i64, dataset_ids: &[i64]) -> Result<(), Error> {
    for dataset_id in dataset_ids {
        let owned = Probe::<Dataset>::new()
            .eq("datasetID", *dataset_id)
            .eq("userID", user_id)
            .exists(conn)
            .await?;
        if !owned {
            return Err(ServerError::access_denied()
                .with_internal(format!("dataset {dataset_id} is not owned by user {user_id}"))
                .into());
        }
    }
    Ok(())
}

/// 403 unless every referenced script belongs to `user_id`.
async fn verify_scripts(conn: &mut Connection, user_id: i64, drafts: &[StageDraft]) -> Result<(), Error> {
    for script_id in drafts.iter().filter(|d| d.stage_type == StageType::Ext).filter_map(|d| d.script_id) {
        let owned = Probe::<Script>::new()
            .eq("scriptID", script_id)
            .eq("userID", user_id)
            .exists(conn)
            .await?;
        if !owned {
            return Err(ServerError::access_denied()
                .with_internal(format!("script {script_id} is not owned by user {user_id}"))
                .into());
        }
    }
    Ok(())
}

async fn check_linked_datasets(ctx: &mut RequestContext) -> Result<Flow, Error> {
    let user_id = ctx.require_user()?;
    let dataset_ids: Vec<i64> = ctx.param_as("datasetIDs")?.unwrap_or_default();
    verify_datasets(ctx.connection().await?, user_id, &dataset_ids).await?;
    Ok(Flow::Proceed)
}

async fn apply_update(ctx: &mut RequestContext) -> Result<Flow, Error> {
    let user_id = ctx.require_user()?;
    let name: Option<String> = ctx.param_as("name")?;
    let preset_id: Option<Option<i64>> = match ctx.param("presetID")? {
        Some(value) => Some(serde_json::from_value(value.clone()).map_err(|e| {
            ServerError::bad_value("presetID").with_internal(e.to_string())
        })?),
        None => None,
    };
    let dataset_ids: Option<Vec<i64>> = ctx.param_as("datasetIDs")?;

    if let Some(ids) = &dataset_ids {
        verify_datasets(ctx.connection().await?, user_id, ids).await?;
    }

    let project = ctx.entity_mut::<Project>("project")?;
    if let Some(name) = name {
        project.name = name;
    }
    if let Some(preset_id) = preset_id {
        project.preset_id = preset_id;
    }
    if let Some(ids) = dataset_ids {
        project.dataset_ids = ids;
    }
    Ok(Flow::Proceed)
}

async fn collect_stages(ctx: &mut RequestContext) -> Result<Flow, Error> {
    let project = ctx.entity::<Project>("project")?.clone();
    let stages = project.fetch_stages(ctx.connection().await?).await?;
    ctx.insert("stages", Resource::entities(stages))?;
    Ok(Flow::Proceed)
}

async fn replace_stage_list(ctx: &mut RequestContext) -> Result<Flow, Error> {
    let user_id = ctx.require_user()?;
    let drafts: Vec<StageDraft> = ctx.required("stages")?;
    let mut project = ctx.entity::<Project>("project")?.clone();

    let (conn, ledger, blobs) = ctx.transaction_parts("replace_stage_list")?;
    verify_scripts(conn, user_id, &drafts).await?;
    let stages: Vec<ConfigStage> = project.replace_stages(conn, blobs, ledger, drafts).await?;

    ctx.replace("project", Resource::entity(project));
    ctx.insert("replaced_stages", Resource::entities(stages))?;
    Ok(Flow::Proceed)
}

/// `POST /projects` with `name` and optional `type`, `presetID`, and `datasetIDs`.
pub fn create() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("projects.create")
        .authenticate()
        .with_body_params(&["name"], &["type", "presetID", "datasetIDs"])
        .check("name", Check::all(vec![Check::string(), Check::non_empty()]))
        .check("type", project_type_check())
        .check("presetID", Check::any(vec![Check::null(), Check::int()]))
        .check("datasetIDs", id_list_check())
        .transaction()
        .then("check_linked_datasets", |ctx| Box::pin(check_linked_datasets(ctx)))
        .create_entity::<Project>("project", &["userID", "name", "type", "presetID", "datasetIDs"])
        .commit()
        .terminate_with(201, "project")
        .build()
}

/// `GET /projects`.
pub fn list() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("projects.list")
        .authenticate()
        .with_all_entities::<Project>("projects", &[("userID", "userID")])
        .terminate_with(200, "projects")
        .build()
}

/// `PUT /projects/{projectID}` with any of `name`, `presetID`, `datasetIDs`.
pub fn update() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("projects.update")
        .authenticate()
        .with_path_params(&["projectID"], &[])
        .with_body_params(&[], &["name", "presetID", "datasetIDs"])
        .check(
            "name",
            Check::any(vec![Check::null(), Check::all(vec![Check::string(), Check::non_empty()])]),
        )
        .check("presetID", Check::any(vec![Check::null(), Check::int()]))
        .check("datasetIDs", id_list_check())
        .transaction()
        .with_entity::<Project>("project", PROJECT_BY_ID)
        .authorize::<Project>("project")
        .then("apply_update", |ctx| Box::pin(apply_update(ctx)))
        .save_entity::<Project>("project")
        .commit()
        .terminate_with(200, "project")
        .build()
}

/// `DELETE /projects/{projectID}`: the project, its links, and every stage with its content.
pub fn delete() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("projects.delete")
        .authenticate()
        .with_path_params(&["projectID"], &[])
        .with_entity::<Project>("project", PROJECT_BY_ID)
        .authorize::<Project>("project")
        .transaction()
        .delete_entity::<Project>("project")
        .commit()
        .terminate(204)
        .build()
}

/// `GET /projects/{projectID}/stages`.
pub fn fetch_stages() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("projects.fetch_stages")
        .authenticate()
        .with_path_params(&["projectID"], &[])
        .with_entity::<Project>("project", PROJECT_BY_ID)
        .authorize::<Project>("project")
        .then("collect_stages", |ctx| Box::pin(collect_stages(ctx)))
        .terminate_with(200, "stages")
        .build()
}

/// `PUT /projects/{projectID}/stages` with the complete `stages` list.
///
/// Each entry may carry its content inline or name the current location
/// of the stage it continues; content then follows the stage to its new
/// position.
pub fn replace_stages() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("projects.replace_stages")
        .authenticate()
        .with_path_params(&["projectID"], &[])
        .with_body_params(&["stages"], &[])
        .check("stages", Check::each(Check::object()))
        .transaction()
        .with_entity::<Project>("project", PROJECT_BY_ID)
        .authorize::<Project>("project")
        .then_in_transaction("replace_stage_list", |ctx| Box::pin(replace_stage_list(ctx)))
        .commit()
        .terminate_with(200, "replaced_stages")
        .build()
}

/// `GET /projects/{projectID}/stages/{location}/content`.
pub fn fetch_stage_content() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("projects.fetch_stage_content")
        .authenticate()
        .with_path_params(&["projectID", "location"], &[])
        .with_entity::<Project>("project", PROJECT_BY_ID)
        .authorize::<Project>("project")
        .with_entity::<ConfigStage>("stage", &[("projectID", "projectID"), ("location", "location")])
        .with_content::<ConfigStage>("stage", "content")
        .terminate_with(200, "content")
        .build()
}
