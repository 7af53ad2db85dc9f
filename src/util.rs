use std::path::{Path, PathBuf};
use uuid::Uuid;
use std::fs;
use chrono::Utc;
use anyhow::Context;

/// Create `<base>/runs/<uuid>` for this run's artifacts and return it
pub fn create_run_dir(base: &Path) -> anyhow::Result<PathBuf> {
    let run_id = Uuid::new_v4().to_string();
    let dir = base.join("runs").join(run_id);
    fs::create_dir_all(&dir).with_context(|| format!("failed to create run dir {:?}", dir))?;
    Ok(dir)
}

pub fn write_artifact(dir: &Path, name: &str, content: &str) -> anyhow::Result<()> {
    let path = dir.join(name);
    fs::write(&path, content).with_context(|| format!("failed to write artifact {:?}", path))?;
    Ok(())
}

pub fn timestamp() -> String {
    // Format: YYYY-MM-DD_HH-MM-SS
    Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}
