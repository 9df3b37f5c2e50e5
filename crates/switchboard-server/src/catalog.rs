use std::path::{Path, PathBuf};

use serde::Deserialize;
use switchboard::{AgentCatalog, AgentSpec, RegistryError};
use thiserror::Error;

const BUILTIN_CATALOG: &str = include_str!("../agents.yaml");

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read agent catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse agent catalog: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid agent catalog: {0}")]
    Invalid(#[from] RegistryError),
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    default_agent: Option<String>,
    agents: Vec<AgentSpec>,
}

/// Load the catalog at `path`, or the built-in one.
///
/// `default_agent` applies unless the file names its own.
pub fn load(path: Option<&Path>, default_agent: &str) -> Result<AgentCatalog, CatalogError> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            from_yaml(&text, default_agent)
        }
        None => from_yaml(BUILTIN_CATALOG, default_agent),
    }
}

pub fn from_yaml(text: &str, default_agent: &str) -> Result<AgentCatalog, CatalogError> {
    let file: CatalogFile = serde_yaml::from_str(text)?;
    let default_agent = file.default_agent.as_deref().unwrap_or(default_agent);
    Ok(AgentCatalog::new(file.agents, default_agent)?)
}
