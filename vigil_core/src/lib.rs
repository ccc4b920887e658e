// This file contains the core of Vigil: the audit execution engine, remote
// evaluation and command plumbing, and the policy loader.

// Data model
pub mod types;
pub mod tokens;
pub mod config;
pub mod policy_parser;

// Target access
pub mod sandbox;
pub mod target;
pub mod remote;

// Execution
pub mod expression;
pub mod audit;
pub mod engine;
pub mod checks;

pub use audit::{Audit, AuditContext, AuditError, ParameterKind, ParameterMode, ParameterSet, Remediable};
pub use config::EngineConfig;
pub use engine::{AuditRegistry, Engine};
pub use sandbox::{LocalSandbox, MockSandbox, Sandbox, SandboxError};
pub use target::{StaticTarget, Target};
pub use types::{AuditResponse, Dependency, Outcome, Policy, PolicyCatalog};

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
