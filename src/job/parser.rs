use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use anyhow::Context;
use std::collections::HashSet;

use crate::task::{TransformOptions, TransformTask};

pub const DEFAULT_WORKERS: usize = 4;

/// Job with Serialize + Deserialize so we can read it and copy it into the run dir
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Job {
    pub name: Option<String>,
    /// Plugin module, relative to the job file's directory
    pub transform: PathBuf,
    /// Target files, relative to the job file's directory
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub dry: bool,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub stop_on_error: Option<bool>,
}

impl Job {
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| "<unnamed>".to_string())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or(DEFAULT_WORKERS)
    }

    /// Expand into one task per file, with paths resolved against `base`.
    pub fn tasks(&self, base: &Path) -> Vec<TransformTask> {
        let transform_path = base.join(&self.transform);
        let options = TransformOptions { dry: self.dry };
        self.files
            .iter()
            .map(|f| TransformTask {
                transform_path: transform_path.clone(),
                file_path: base.join(f),
                options,
            })
            .collect()
    }
}

/// Load YAML file into Job
pub fn load_job(path: &Path) -> anyhow::Result<Job> {
    let content = std::fs::read_to_string(path).with_context(|| format!("failed to read {:?}", path))?;
    let job: Job = serde_yaml::from_str(&content).with_context(|| format!("failed to parse YAML {:?}", path))?;
    Ok(job)
}

/// Validate job: transform set, files present and unique, at least one worker
pub fn validate_job(job: &Job) -> anyhow::Result<()> {
    if job.transform.as_os_str().is_empty() {
        anyhow::bail!("job has no transform");
    }
    if job.files.is_empty() {
        anyhow::bail!("job lists no files");
    }

    // The same path must never be handed to two workers at once
    let mut seen = HashSet::new();
    for f in &job.files {
        if !seen.insert(normalize(f)) {
            anyhow::bail!("duplicate file '{}'", f.display());
        }
    }

    if job.worker_count() == 0 {
        anyhow::bail!("workers must be at least 1");
    }

    Ok(())
}

/// Lexically normalize a path: drop `.` and fold `..` into its parent where
/// possible. Symlinks are not followed.
fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component> = Vec::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(c),
            },
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Helper: validate job file path (for main)
pub fn validate_job_file(path: &Path) -> anyhow::Result<Job> {
    let job = load_job(path)?;
    validate_job(&job)?;
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Job {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn defaults_apply() {
        let job = parse("transform: t.rhai\nfiles: [a.js]\n");
        assert!(!job.dry);
        assert_eq!(job.worker_count(), DEFAULT_WORKERS);
        assert_eq!(job.display_name(), "<unnamed>");
        validate_job(&job).unwrap();
    }

    #[test]
    fn tasks_resolve_against_base() {
        let job = parse("name: j\ntransform: plugins/t.rhai\nfiles: [a.js, src/b.js]\ndry: true\n");
        let tasks = job.tasks(Path::new("/work"));
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].transform_path, PathBuf::from("/work/plugins/t.rhai"));
        assert_eq!(tasks[1].file_path, PathBuf::from("/work/src/b.js"));
        assert!(tasks.iter().all(|t| t.options.dry));
    }

    #[test]
    fn rejects_invalid_jobs() {
        let cases = [
            ("transform: ''\nfiles: [a]\n", "no transform"),
            ("transform: t.rhai\nfiles: []\n", "no files"),
            ("transform: t.rhai\nfiles: [a, b, a]\n", "duplicate file 'a'"),
            ("transform: t.rhai\nfiles: [a.js, ./a.js]\n", "duplicate file './a.js'"),
            ("transform: t.rhai\nfiles: [a.js, src/../a.js]\n", "duplicate file 'src/../a.js'"),
            ("transform: t.rhai\nfiles: [a]\nworkers: 0\n", "at least 1"),
        ];
        for (yaml, msg) in cases {
            let err = validate_job(&parse(yaml)).err().unwrap();
            assert!(err.to_string().contains(msg), "{}: {}", yaml, err);
        }
    }

    #[test]
    fn equivalent_spellings_normalize_alike() {
        assert_eq!(normalize(Path::new("./a.js")), PathBuf::from("a.js"));
        assert_eq!(normalize(Path::new("src/../a.js")), PathBuf::from("a.js"));
        assert_eq!(normalize(Path::new("src/./lib/../b.js")), PathBuf::from("src/b.js"));
        assert_eq!(normalize(Path::new("../x/a.js")), PathBuf::from("../x/a.js"));
        assert_eq!(normalize(Path::new("/../a.js")), PathBuf::from("/a.js"));
        assert_ne!(normalize(Path::new("a.js")), normalize(Path::new("b/a.js")));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = load_job(Path::new("/definitely/not/here.yaml")).err().unwrap();
        assert!(err.to_string().contains("failed to read"));
    }
}
