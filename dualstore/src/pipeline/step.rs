//! The step contract and the executor state machine.

use super::context::RequestContext;
use super::request::Response;
use crate::errors::{Error, PipelineFault};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt::Debug;

/// What a step asks the executor to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    /// Run the next step.
    Proceed,
    /// End the pipeline with this response.
    Terminate(Response),
}

/// One unit of a pipeline.
///
/// A step reads and populates the request context, then either proceeds or
/// terminates. Failures are returned, never thrown past the executor.
#[async_trait]
pub trait Step: Send + Sync + Debug {
    /// Returns the name of the step.
    fn name(&self) -> &str;

    /// Whether the step only works inside a transaction range.
    fn needs_transaction(&self) -> bool {
        false
    }

    /// Runs the step.
    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, Error>;
}

/// Boxed future returned by closure steps.
pub type StepFuture<'a> = BoxFuture<'a, Result<Flow, Error>>;

/// A closure-backed step.
pub struct FnStep<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> StepFuture<'a> + Send + Sync,
{
    name: String,
    transactional: bool,
    func: F,
}

impl<F> FnStep<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> StepFuture<'a> + Send + Sync,
{
    /// Creates a closure-backed step.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            transactional: false,
            func,
        }
    }

    /// Declares that the closure uses the transaction's ledger.
    #[must_use]
    pub const fn transactional(mut self) -> Self {
        self.transactional = true;
        self
    }
}

impl<F> Debug for FnStep<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> StepFuture<'a> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStep").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Step for FnStep<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> StepFuture<'a> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn needs_transaction(&self) -> bool {
        self.transactional
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, Error> {
        (self.func)(ctx).await
    }
}

/// Progress of one execution.
///
/// `NotStarted → Running(i) → Terminated`. Termination happens once; a
/// second termination or a step after termination is a fault.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PipelineState {
    /// No step has run.
    #[default]
    NotStarted,
    /// Step `i` is running.
    Running(usize),
    /// A response has been issued.
    Terminated,
}

impl PipelineState {
    /// Moves to step `index`.
    pub fn advance(&mut self, pipeline: &str, index: usize) -> Result<(), PipelineFault> {
        if *self == Self::Terminated {
            return Err(PipelineFault::ProceedAfterTermination {
                pipeline: pipeline.to_string(),
            });
        }
        *self = Self::Running(index);
        Ok(())
    }

    /// Enters the terminal state.
    pub fn terminate(&mut self, pipeline: &str) -> Result<(), PipelineFault> {
        if *self == Self::Terminated {
            return Err(PipelineFault::AlreadyTerminated {
                pipeline: pipeline.to_string(),
            });
        }
        *self = Self::Terminated;
        Ok(())
    }

    /// Checks that the step list ended in a termination.
    pub fn finish(&self, pipeline: &str) -> Result<(), PipelineFault> {
        if *self == Self::Terminated {
            Ok(())
        } else {
            Err(PipelineFault::NeverTerminated {
                pipeline: pipeline.to_string(),
            })
        }
    }

    /// Returns true once a response has been issued.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        *self == Self::Terminated
    }
}
