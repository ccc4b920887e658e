//! Remote execution against a target through its [`Sandbox`](crate::sandbox::Sandbox).
//!
//! - [`evaluate`] ships a generated script to the target, runs it and decodes
//!   its JSON output.
//! - [`command`] turns structured invocations into gateway CLI command lines.
//!
//! Neither component catches errors: sandbox failures and undecodable output
//! surface as [`RemoteError`] for the audit engine to classify.

pub mod command;
pub mod evaluate;

pub use command::{
    hyphenate, ArgShape, CommandOutput, CommandRegistry, CommandSpec, OptionKey, RemoteCommand,
};
pub use evaluate::{php_literal, PhpDialect, RemoteEvaluator, RemoteTask, ScriptDialect};

use crate::sandbox::SandboxError;
use serde_json::Value;

#[derive(thiserror::Error, Debug)]
pub enum RemoteError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("{context} did not return a JSON document: {source} (output: {output:?})")]
    Decode {
        context: String,
        output: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown remote command `{0}`")]
    UnknownCommand(String),

    #[error("target returned an empty temporary path")]
    EmptyTempPath,

    #[error("`{0}` is not a valid script argument name")]
    InvalidArgumentName(String),
}

/// Longest output excerpt kept in a decode error.
const OUTPUT_EXCERPT: usize = 200;

/// Decodes captured output as exactly one JSON document.
///
/// Empty output is a decode failure; a literal `null` is a valid result.
pub(crate) fn decode_json(context: &str, output: &str) -> Result<Value, RemoteError> {
    serde_json::from_str(output.trim()).map_err(|source| RemoteError::Decode {
        context: context.to_string(),
        output: output.chars().take(OUTPUT_EXCERPT).collect(),
        source,
    })
}
