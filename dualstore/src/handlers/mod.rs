//! Ready-made pipelines for every record type.
//!
//! Each function assembles and validates one pipeline; callers build them
//! once at startup and execute them per request. [`all`] builds the full
//! set, which doubles as a startup check that every pipeline is well formed.

pub mod datasets;
pub mod presets;
pub mod projects;
pub mod scripts;
pub mod training;
pub mod users;

use crate::errors::PipelineFault;
use crate::pipeline::Pipeline;

/// Every handler pipeline.
pub fn all() -> Result<Vec<Pipeline>, PipelineFault> {
    Ok(vec![
        scripts::create()?,
        scripts::rename()?,
        scripts::fetch_content()?,
        scripts::update_content()?,
        scripts::list()?,
        scripts::delete()?,
        presets::create()?,
        presets::list()?,
        presets::fetch_content()?,
        presets::delete()?,
        datasets::create()?,
        datasets::list()?,
        datasets::rename()?,
        datasets::delete()?,
        datasets::add_label()?,
        datasets::update_label()?,
        datasets::delete_label()?,
        datasets::sync_labels()?,
        datasets::upload_files()?,
        datasets::list_datafiles()?,
        datasets::update_datafile()?,
        datasets::delete_datafile()?,
        projects::create()?,
        projects::list()?,
        projects::update()?,
        projects::delete()?,
        projects::fetch_stages()?,
        projects::replace_stages()?,
        projects::fetch_stage_content()?,
        training::export()?,
        users::create()?,
        users::delete_account()?,
    ])
}

#[cfg(test)]
mod integration_tests;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_pipeline_builds_with_a_unique_name() {
        let pipelines = all().unwrap();
        let names: HashSet<&str> = pipelines.iter().map(Pipeline::name).collect();
        assert_eq!(names.len(), pipelines.len());
    }
}
