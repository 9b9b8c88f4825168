//! Training export: compiles a project's layered configuration and its
//! datafile manifest into two blobs the trainer reads.

use crate::blob::{BlobClient, ByteStream};
use crate::collaborators::DocumentMerger;
use crate::db::Connection;
use crate::entities::{Dataset, Preset, Project, Script, StageType};
use crate::entity::{BlobBacked, Content, Probe};
use crate::errors::{Error, PipelineFault, ServerError};
use crate::pipeline::{Flow, Pipeline, RequestContext, Resource};
use crate::services::Services;
use futures::stream;
use serde_json::json;
use tracing::info;

/// Labels end up in a comma-separated file; separators and line breaks are dropped.
fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| !matches!(c, ',' | '\n' | '\r' | '"'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Collects the preset and stage sources in merge order.
async fn layer_sources(
    conn: &mut Connection,
    blobs: &BlobClient,
    project: &Project,
    user_id: i64,
) -> Result<Vec<(String, Vec<u8>)>, Error> {
    let mut sources = Vec::new();
    if let Some(preset_id) = project.preset_id {
        let preset = Probe::<Preset>::new().eq("presetID", preset_id).fetch_one(conn).await?;
        let content = blobs.get_optional(&preset.blob_key()).await?.unwrap_or_default();
        sources.push((format!("preset '{}'", preset.name), content));
    }

    for stage in project.fetch_stages(conn).await? {
        let content = match (stage.stage_type, stage.script_id) {
            (StageType::Ext, Some(script_id)) => {
                let script = Probe::<Script>::new()
                    .eq("scriptID", script_id)
                    .eq("userID", user_id)
                    .fetch(conn)
                    .await?
                    .ok_or_else(|| {
                        ServerError::access_denied()
                            .with_internal(format!("stage {} uses script {script_id}", stage.location))
                    })?;
                script.fetch_content(blobs).await?
            }
            (StageType::Ext, None) => continue,
            _ => stage.fetch_content(blobs).await?,
        };
        sources.push((format!("stage {} '{}'", stage.location, stage.name), content));
    }
    Ok(sources)
}

/// One `key,label` line per labelled datafile of every linked dataset.
async fn manifest_lines(conn: &mut Connection, project: &Project) -> Result<Vec<String>, Error> {
    let mut lines = Vec::new();
    for dataset_id in &project.dataset_ids {
        let dataset = Probe::<Dataset>::new().eq("datasetID", *dataset_id).fetch_one(conn).await?;
        for datafile in dataset.datafiles(conn, None).await? {
            let label = match (&datafile.custom_label, datafile.label_id) {
                (Some(custom), _) => custom.clone(),
                (None, Some(label_id)) => dataset.label(label_id).map(|l| l.string.clone()).unwrap_or_default(),
                (None, None) => String::new(),
            };
            let label = sanitize_label(&label);
            if label.is_empty() {
                continue;
            }
            lines.push(format!("{},{label}\n", datafile.blob_key()));
        }
    }
    Ok(lines)
}

fn merge_layers(services: &Services, sources: Vec<(String, Vec<u8>)>) -> Result<(serde_json::Value, Vec<String>), Error> {
    let mut merger = DocumentMerger::new();
    let mut warnings = Vec::new();
    for (source, content) in sources {
        let text = String::from_utf8(content)
            .map_err(|_| ServerError::bad_request(format!("Content of {source} is not text")))?;
        let compiled = services.compiler().compile(&text).map_err(|e| {
            ServerError::bad_request(format!("Content of {source} does not compile"))
                .with_internal(format!("{e:#}"))
        })?;
        warnings.extend(compiled.warnings.into_iter().map(|w| format!("{source}: {w}")));
        merger.merge(&compiled.document);
    }
    Ok((merger.into_document(), warnings))
}

async fn export_training(ctx: &mut RequestContext) -> Result<Flow, Error> {
    let user_id = ctx.require_user()?;
    let project = ctx.entity::<Project>("project")?.clone();
    let project_id = project.project_id.unwrap_or_default();
    let config = project.training_config_key();
    let manifest = project.training_manifest_key();
    let services = ctx.services().clone();

    let (conn, ledger, blobs) = ctx.transaction_parts("export_training")?;
    let sources = layer_sources(conn, blobs, &project, user_id).await?;
    let (document, warnings) = merge_layers(&services, sources)?;

    ledger.protect(blobs, &config).await?;
    blobs.put(&config, serde_json::to_vec_pretty(&document)?).await?;

    let lines = manifest_lines(conn, &project).await?;
    let entries = lines.len();
    let chunks: ByteStream = Box::pin(stream::iter(
        lines
            .into_iter()
            .map(|line| Ok::<_, std::io::Error>(line.into_bytes())),
    ));
    ledger.protect(blobs, &manifest).await?;
    blobs.put_stream(&manifest, chunks).await?;

    info!(project_id, entries, warnings = warnings.len(), "training configuration exported");
    ctx.insert(
        "export",
        Resource::Param(json!({
            "configKey": config,
            "manifestKey": manifest,
            "entries": entries,
            "warnings": warnings,
        })),
    )?;
    Ok(Flow::Proceed)
}

/// `POST /projects/{projectID}/training`: writes the merged configuration
/// and the manifest. 201 with both keys and any compiler warnings.
pub fn export() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("training.export")
        .authenticate()
        .with_path_params(&["projectID"], &[])
        .transaction()
        .with_entity::<Project>("project", &[("projectID", "projectID")])
        .authorize::<Project>("project")
        .then_in_transaction("export_training", |ctx| Box::pin(export_training(ctx)))
        .commit()
        .terminate_with(201, "export")
        .build()
}
