use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;

/// Platform data directory for wildkey, created if missing.
pub fn data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("dev", "wildkey", "wildkey")
        .context("could not determine a home directory for the data dir")?;
    let dir = dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create data dir {}", dir.display()))?;
    Ok(dir)
}
