//! Request pipelines.
//!
//! A [`Pipeline`] is an ordered list of [`Step`]s run against one
//! [`RequestContext`]. At most one sub-range of the list runs inside a
//! relational transaction. The executor owns termination: it issues exactly
//! one [`Response`] per request, commits the transaction when the steps
//! succeed (including a termination inside the range), and rolls it back and
//! replays the ledger when any step fails. Errors are translated into a
//! response in one place, [`Response::from_error`].

mod builder;
mod checks;
mod context;
mod request;
mod step;
mod steps;

pub use builder::PipelineBuilder;
pub use checks::Check;
pub use context::{EntityRecord, Known, RequestContext, Resource};
pub use request::{Request, Response, ResponseBody, Session, UploadedFile};
pub use step::{FnStep, Flow, PipelineState, Step, StepFuture};
pub use steps::ParamLocation;

use crate::errors::{Error, PipelineFault};
use crate::services::Services;
use builder::Entry;
use tracing::{error, info, info_span, warn, Instrument};

/// A validated, reusable step list.
#[derive(Debug)]
pub struct Pipeline {
    name: String,
    entries: Vec<Entry>,
}

impl Pipeline {
    /// Starts building a pipeline.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    /// The pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Step names in order, with transaction markers.
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|entry| match entry {
                Entry::Begin => "transaction",
                Entry::Commit => "commit",
                Entry::Run(step) => step.name(),
            })
            .collect()
    }

    /// Serves one request.
    ///
    /// Never fails: every error becomes a response, and anything that
    /// reaches the caller as a 5xx is logged with its full detail first.
    pub async fn execute(&self, services: &Services, request: Request) -> Response {
        let span = info_span!("pipeline", pipeline = %self.name, request_id = %request.id);
        self.serve(services.clone(), request).instrument(span).await
    }

    async fn serve(&self, services: Services, request: Request) -> Response {
        let mut ctx = RequestContext::new(services, request);
        let mut state = PipelineState::default();

        let outcome = match self.drive(&mut ctx, &mut state).await {
            Ok(response) => ctx.commit().await.map(|()| response),
            Err(err) => {
                ctx.rollback().await;
                Err(err)
            }
        };

        match outcome {
            Ok(response) => {
                info!(status = response.status, "pipeline terminated");
                response
            }
            Err(err) => respond_with_error(&err),
        }
    }

    async fn drive(&self, ctx: &mut RequestContext, state: &mut PipelineState) -> Result<Response, Error> {
        for (index, entry) in self.entries.iter().enumerate() {
            state.advance(&self.name, index)?;
            match entry {
                Entry::Begin => ctx.begin(&self.name).await?,
                Entry::Commit => ctx.commit().await?,
                Entry::Run(step) => {
                    if let Flow::Terminate(response) = step.run(ctx).await? {
                        state.terminate(&self.name)?;
                        return Ok(response);
                    }
                }
            }
        }
        Err(state.finish(&self.name).err().unwrap_or(PipelineFault::NeverTerminated {
            pipeline: self.name.clone(),
        })
        .into())
    }
}

fn respond_with_error(err: &Error) -> Response {
    let response = Response::from_error(err);
    if response.status >= 500 {
        error!(status = response.status, error = ?err, "pipeline failed");
    } else {
        warn!(status = response.status, error = %err, "pipeline rejected request");
    }
    response
}
