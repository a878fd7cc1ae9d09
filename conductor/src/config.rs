//! Configuration loading

use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Find a config file by walking up the directory tree, then checking global config.
///
/// Search order:
/// 1. Current directory and parent directories (walking up to root)
/// 2. Global config at ~/.config/conductor/
///
/// Returns the path if found, None otherwise.
fn find_config_file(filename: &str) -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let candidate = current.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break, // Reached filesystem root
        }
    }

    // Fallback: check global config
    if let Some(config_dir) = dirs::config_dir() {
        let global_path = config_dir.join("conductor").join(filename);
        if global_path.exists() {
            return Some(global_path);
        }
    }

    None
}

/// Top-level configuration (from .conductor.toml)
#[derive(Debug, Default, Deserialize)]
pub struct AppFileConfig {
    #[serde(default)]
    pub server: ServerSectionConfig,
    #[serde(default)]
    pub engine: EngineSectionConfig,
    #[serde(default)]
    pub registry: RegistrySectionConfig,
}

/// HTTP/WebSocket server section
#[derive(Debug, Deserialize)]
pub struct ServerSectionConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Engine section
#[derive(Debug, Deserialize)]
pub struct EngineSectionConfig {
    /// Per-agent execution budget in seconds
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,
    /// Workflow run when a caller names none
    pub default_workflow: Option<String>,
}

/// Workflow registry section
#[derive(Debug, Deserialize)]
pub struct RegistrySectionConfig {
    /// Directory of `<WORKFLOW_ID>.json` files
    #[serde(default = "default_workflows_dir")]
    pub workflows_dir: PathBuf,
}

// Default value functions
fn default_port() -> u16 {
    8000
}

fn default_agent_timeout_secs() -> u64 {
    120
}

fn default_workflows_dir() -> PathBuf {
    PathBuf::from("workflows")
}

impl Default for ServerSectionConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for EngineSectionConfig {
    fn default() -> Self {
        Self {
            agent_timeout_secs: default_agent_timeout_secs(),
            default_workflow: None,
        }
    }
}

impl Default for RegistrySectionConfig {
    fn default() -> Self {
        Self {
            workflows_dir: default_workflows_dir(),
        }
    }
}

impl AppFileConfig {
    /// Load config from .conductor.toml
    ///
    /// Search order:
    /// 1. Walk up directory tree from cwd looking for .conductor.toml
    /// 2. Check ~/.config/conductor/.conductor.toml (global fallback)
    /// 3. Fall back to defaults
    pub fn load() -> Result<Self> {
        if let Some(config_path) = find_config_file(".conductor.toml") {
            tracing::debug!("Loading config from: {}", config_path.display());
            return Self::load_from_path(&config_path);
        }

        tracing::debug!("No .conductor.toml found, using defaults");
        Ok(Self::default())
    }

    /// Load from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppFileConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
