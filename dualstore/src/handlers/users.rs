//! Account pipelines.

use crate::entities::User;
use crate::errors::{Error, PipelineFault};
use crate::pipeline::{Check, Flow, Pipeline, RequestContext, Resource};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

/// Hex SHA-256 of a password. The session layer compares against this.
#[must_use]
pub fn password_digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

async fn digest_password(ctx: &mut RequestContext) -> Result<Flow, Error> {
    let password: String = ctx.required("password")?;
    ctx.replace("password", Resource::Param(password_digest(&password).into()));
    Ok(Flow::Proceed)
}

async fn send_farewell(ctx: &mut RequestContext) -> Result<Flow, Error> {
    let user = ctx.entity::<User>("user")?.clone();
    let services = ctx.services().clone();
    let body = format!(
        "Hello {},\n\nyour account and everything stored with it has been removed.",
        user.first_name
    );
    match services
        .notifier()
        .send_email(&[user.email.clone()], "Your account has been deleted", &body)
        .await
    {
        Ok(()) => info!(user_id = user.user_id.unwrap_or_default(), "farewell sent"),
        Err(err) => warn!(user_id = user.user_id.unwrap_or_default(), error = ?err, "farewell not sent"),
    }
    Ok(Flow::Proceed)
}

fn malformed(pipeline: &str, err: &regex::Error) -> PipelineFault {
    PipelineFault::Malformed {
        pipeline: pipeline.to_string(),
        reason: err.to_string(),
    }
}

/// `POST /users`: registers an account. 201; 409 when the email is taken.
pub fn create() -> Result<Pipeline, PipelineFault> {
    let email = Check::matches(EMAIL_PATTERN).map_err(|e| malformed("users.create", &e))?;
    Pipeline::builder("users.create")
        .redirect_if_authenticated("/")
        .with_body_params(&["email", "firstName", "lastName", "password"], &["phoneNumber"])
        .check("email", email)
        .check("firstName", Check::all(vec![Check::string(), Check::non_empty()]))
        .check("lastName", Check::all(vec![Check::string(), Check::non_empty()]))
        .check("password", Check::length_between(8, 256))
        .check("phoneNumber", Check::any(vec![Check::null(), Check::string()]))
        .then("digest_password", |ctx| Box::pin(digest_password(ctx)))
        .create_entity::<User>("user", &["email", "firstName", "lastName", "phoneNumber", "password"])
        .terminate_with(201, "user")
        .build()
}

/// `DELETE /users/me`: removes the caller and everything they own, then
/// sends a farewell. A failed notification does not fail the request.
pub fn delete_account() -> Result<Pipeline, PipelineFault> {
    Pipeline::builder("users.delete_account")
        .authenticate()
        .transaction()
        .with_entity::<User>("user", &[("userID", "userID")])
        .delete_entity::<User>("user")
        .commit()
        .then("send_farewell", |ctx| Box::pin(send_farewell(ctx)))
        .terminate(204)
        .build()
}
