//! The record types of the service.
//!
//! Ownership runs user → (scripts, projects, datasets), project → stages,
//! dataset → (labels, datafiles). Deleting an owner finalizes everything
//! beneath it.

mod config_stage;
mod datafile;
mod dataset;
mod preset;
mod project;
mod script;
mod user;

pub use config_stage::{ConfigStage, StageType};
pub use datafile::Datafile;
pub use dataset::{DataLabel, Dataset};
pub use preset::Preset;
pub use project::{Project, StageDraft, StageSource, PROJECT_TYPES};
pub use script::Script;
pub use user::User;
