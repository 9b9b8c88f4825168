//! External collaborators: the script compiler and the notification sender.
//!
//! Both sit behind traits so tests and embedders can substitute their own.
//! Their failures are `anyhow` errors; the engine wraps them in
//! [`Error::Collaborator`](crate::errors::Error::Collaborator).

mod compiler;
mod merge;
mod notify;

pub use compiler::{Compiled, JsonCompiler, ScriptCompiler};
pub use merge::{merge_documents, DocumentMerger};
pub use notify::{LoggingNotifier, NotificationSender};

#[cfg(test)]
pub use compiler::MockScriptCompiler;
#[cfg(test)]
pub use notify::MockNotificationSender;
