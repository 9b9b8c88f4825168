//! Preset pipelines. Presets are global: any logged-in user may read them.

use crate::entities::Preset;
use crate::entity::Content;
use crate::errors::{Error, PipelineFault};
use crate::pipeline::{Check, Flow, Pipeline, RequestContext};

async fn store_preset_content(ctx: &mut RequestContext) -> Result<Flow, Error> {
    let content = ctx.param_as::<String>("content")?.unwrap_or_default();
    let preset = ctx.entity::<Preset>("preset")?.clone();
    let (_, ledger, blobs) = ctx.transaction_parts("store_preset_content")?;
    preset.save_content(blobs, content.into_bytes(), Some(ledger)).await?;
    Ok(Flow::Proceed)
}

/// `POST /presets` with `name`, optional `description` and `content`.
pub fn create() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("presets.create")
        .authenticate()
        .with_body_params(&["name"], &["description", "content"])
        .check("name", Check::all(vec![Check::string(), Check::non_empty()]))
        .transaction()
        .create_entity::<Preset>("preset", &["name", "description"])
        .then_in_transaction("store_preset_content", |ctx| Box::pin(store_preset_content(ctx)))
        .commit()
        .terminate_with(201, "preset")
        .build()
}

/// `GET /presets`.
pub fn list() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("presets.list")
        .authenticate()
        .with_all_entities::<Preset>("presets", &[])
        .terminate_with(200, "presets")
        .build()
}

/// `GET /presets/{presetID}/content`.
pub fn fetch_content() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("presets.fetch_content")
        .authenticate()
        .with_path_params(&["presetID"], &[])
        .with_entity::<Preset>("preset", &[("presetID", "presetID")])
        .with_content::<Preset>("preset", "content")
        .terminate_with(200, "content")
        .build()
}

/// `DELETE /presets/{presetID}`. 409 while a project starts from it.
pub fn delete() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("presets.delete")
        .authenticate()
        .with_path_params(&["presetID"], &[])
        .with_entity::<Preset>("preset", &[("presetID", "presetID")])
        .transaction()
        .delete_entity::<Preset>("preset")
        .commit()
        .terminate(204)
        .build()
}
