use crate::target::StaticTarget;
use crate::types::{Policy, PolicyCatalog};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum PolicyError {
    #[error("Failed to read YAML file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Reads a YAML list of policies. Later entries replace earlier ones with the same name.
pub fn load_policies(path: impl AsRef<Path>) -> Result<PolicyCatalog, PolicyError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let policies: Vec<Policy> = serde_yaml::from_reader(reader)?;
    log::info!("[AUDIT] Loaded {} policies", policies.len());
    Ok(PolicyCatalog::from(policies))
}

pub fn parse_policies(yaml: &str) -> Result<PolicyCatalog, PolicyError> {
    let policies: Vec<Policy> = serde_yaml::from_str(yaml)?;
    Ok(PolicyCatalog::from(policies))
}

/// Reads target facts: a `name` plus a `properties` mapping.
pub fn load_target(path: impl AsRef<Path>) -> Result<StaticTarget, PolicyError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let target: StaticTarget = serde_yaml::from_reader(reader)?;
    Ok(target)
}
