//! Workspace scaffolding for `triage init`.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tracing::info;

use crate::io::config::{TriageConfig, write_config};
use crate::io::rule_store::write_default_rules;

pub const CONFIG_FILE: &str = "triage.toml";
pub const RULES_FILE: &str = "rules.toml";

#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub rules_path: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config_path: root.join(CONFIG_FILE),
            rules_path: root.join(RULES_FILE),
            root,
        }
    }
}

/// Write a default `triage.toml` and an editable copy of the default rules.
///
/// The config points `rules_path` at the written rule file. Fails if either
/// file exists unless `force` is set.
pub fn init_workspace(root: &Path, force: bool) -> Result<WorkspacePaths> {
    let paths = WorkspacePaths::new(root);
    for existing in [&paths.config_path, &paths.rules_path] {
        if existing.exists() && !force {
            return Err(anyhow!(
                "triage init: {} already exists (use --force to overwrite)",
                existing.display()
            ));
        }
    }

    write_default_rules(&paths.rules_path)?;
    let config = TriageConfig {
        rules_path: Some(PathBuf::from(RULES_FILE)),
        ..TriageConfig::default()
    };
    write_config(&paths.config_path, &config)?;
    info!(root = %paths.root.display(), "initialized workspace");
    Ok(paths)
}
