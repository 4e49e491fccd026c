mod catch;
pub mod context;
mod js_error;
mod runtime;

use quickjs_rusty::{ExecutionError, ValueError};

pub use catch::*;
pub use js_error::JsError;
pub use runtime::*;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error(transparent)]
    Serde(#[from] quickjs_rusty::serde::Error),
    #[error(transparent)]
    Context(#[from] quickjs_rusty::ContextError),

    /// A raw JavaScript value raised by the host.
    #[error(transparent)]
    Js(#[from] JsError),
    /// A recovered panic that carried no error value.
    #[error("{0}")]
    Panic(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
    /// A JavaScript exception rendered to text, detached from its context.
    #[error("{0}")]
    Exception(String),

    #[error("unexpected")]
    Unexpected(String),
}

impl Error {
    /// The host value behind this error, if it came from JavaScript.
    pub fn js_value(&self) -> Option<&quickjs_rusty::OwnedJsValue> {
        match self {
            Error::Js(err) => Some(err.value()),
            Error::Execution(ExecutionError::Exception(value)) => Some(value),
            _ => None,
        }
    }

    /// Replaces any JavaScript value held by this error with its text.
    ///
    /// Values belong to the context (and thread) that created them, so errors
    /// leaving a worker must not carry them.
    pub fn detach(self) -> Self {
        match self {
            Error::Js(err) => Error::Exception(err.message()),
            Error::Execution(ExecutionError::Exception(value)) => {
                Error::Exception(value.js_to_string().unwrap_or_default())
            }
            err => err,
        }
    }
}
