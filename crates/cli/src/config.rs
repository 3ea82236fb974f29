//! RunAs configuration: optional JSON file, then flag/env overrides

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use procrun_core::application::RunAsConfig;

/// Values given on the command line or through `PROCRUN_*` variables
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub allow_root: Option<bool>,
    pub cwd: Option<PathBuf>,
    pub chroot: Option<PathBuf>,
}

pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<RunAsConfig> {
    let mut config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => RunAsConfig::default(),
    };

    if let Some(allow_root) = overrides.allow_root {
        config.allow_root = allow_root;
    }
    if overrides.cwd.is_some() {
        config.cwd = overrides.cwd;
    }
    if overrides.chroot.is_some() {
        config.chroot_path = overrides.chroot;
    }
    Ok(config)
}
