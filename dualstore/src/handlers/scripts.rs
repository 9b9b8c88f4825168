//! Script pipelines.

use crate::entities::Script;
use crate::entity::{Content, Persist};
use crate::errors::{Error, PipelineFault};
use crate::pipeline::{Check, Flow, Pipeline, RequestContext};

async fn store_initial_content(ctx: &mut RequestContext) -> Result<Flow, Error> {
    let content = ctx.param_as::<String>("content")?.unwrap_or_default();
    let script = ctx.entity::<Script>("script")?.clone();
    let (_, ledger, blobs) = ctx.transaction_parts("store_initial_content")?;
    script.save_content(blobs, content.into_bytes(), Some(ledger)).await?;
    Ok(Flow::Proceed)
}

async fn apply_rename(ctx: &mut RequestContext) -> Result<Flow, Error> {
    let name: String = ctx.required("name")?;
    ctx.entity_mut::<Script>("script")?.name = name;
    Ok(Flow::Proceed)
}

async fn touch_script(ctx: &mut RequestContext) -> Result<Flow, Error> {
    let mut script = ctx.entity::<Script>("script")?.clone();
    script.save(ctx.connection().await?).await?;
    Ok(Flow::Proceed)
}

/// `POST /scripts` with `name` and optional `content`. 201 with the script.
pub fn create() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("scripts.create")
        .authenticate()
        .with_body_params(&["name"], &["content"])
        .check("name", Check::all(vec![Check::string(), Check::non_empty()]))
        .check("content", Check::any(vec![Check::null(), Check::string()]))
        .transaction()
        .create_entity::<Script>("script", &["userID", "name"])
        .then_in_transaction("store_initial_content", |ctx| Box::pin(store_initial_content(ctx)))
        .commit()
        .terminate_with(201, "script")
        .build()
}

/// `PUT /scripts/{scriptID}` with a new `name`.
pub fn rename() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("scripts.rename")
        .authenticate()
        .with_path_params(&["scriptID"], &[])
        .with_body_params(&["name"], &[])
        .check("name", Check::all(vec![Check::string(), Check::non_empty()]))
        .with_entity::<Script>("script", &[("scriptID", "scriptID")])
        .authorize::<Script>("script")
        .then("apply_rename", |ctx| Box::pin(apply_rename(ctx)))
        .save_entity::<Script>("script")
        .terminate_with(200, "script")
        .build()
}

/// `GET /scripts/{scriptID}/content`.
pub fn fetch_content() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("scripts.fetch_content")
        .authenticate()
        .with_path_params(&["scriptID"], &[])
        .with_entity::<Script>("script", &[("scriptID", "scriptID")])
        .authorize::<Script>("script")
        .with_content::<Script>("script", "content")
        .terminate_with(200, "content")
        .build()
}

/// `PUT /scripts/{scriptID}/content` with `content`. 204.
pub fn update_content() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("scripts.update_content")
        .authenticate()
        .with_path_params(&["scriptID"], &[])
        .with_body_params(&["content"], &[])
        .check("content", Check::string())
        .with_entity::<Script>("script", &[("scriptID", "scriptID")])
        .authorize::<Script>("script")
        .transaction()
        .save_content::<Script>("script", "content")
        .then("touch_script", |ctx| Box::pin(touch_script(ctx)))
        .commit()
        .terminate(204)
        .build()
}

/// `GET /scripts`: the caller's scripts.
pub fn list() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("scripts.list")
        .authenticate()
        .with_all_entities::<Script>("scripts", &[("userID", "userID")])
        .terminate_with(200, "scripts")
        .build()
}

/// `DELETE /scripts/{scriptID}`. 204; 409 while a stage references it.
pub fn delete() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("scripts.delete")
        .authenticate()
        .with_path_params(&["scriptID"], &[])
        .with_entity::<Script>("script", &[("scriptID", "scriptID")])
        .authorize::<Script>("script")
        .transaction()
        .delete_entity::<Script>("script")
        .commit()
        .terminate(204)
        .build()
}
