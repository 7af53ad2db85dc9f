use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Options recognised by a single transform task.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformOptions {
    /// Compute and classify the rewrite but never persist it.
    #[serde(default)]
    pub dry: bool,
}

/// One plugin applied to one file, as handed over by the dispatcher.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransformTask {
    pub transform_path: PathBuf,
    pub file_path: PathBuf,
    #[serde(default)]
    pub options: TransformOptions,
}

/// What the transform engine handed back. `None` (or an empty string) means the
/// plugin declined the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTransformOutput {
    pub code: Option<String>,
}

/// Classified engine output; never persisted itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutcome {
    pub changed: bool,
    pub skipped: bool,
    pub source: String,
}

impl TransformOutcome {
    /// Classify raw engine output against the original file contents.
    ///
    /// An empty string counts as "no code" and is reported as skipped, so a plugin
    /// cannot empty a file through this path.
    pub fn classify(raw: RawTransformOutput, original: &str) -> Self {
        match raw.code {
            Some(code) if !code.is_empty() => Self {
                changed: code != original,
                skipped: false,
                source: code,
            },
            _ => Self {
                changed: false,
                skipped: true,
                source: String::new(),
            },
        }
    }

    pub fn status(&self) -> UpdateStatus {
        if self.skipped {
            UpdateStatus::Skipped
        } else if self.changed {
            UpdateStatus::Ok
        } else {
            UpdateStatus::NoChange
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    Ok,
    Skipped,
    NoChange,
}

impl UpdateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStatus::Ok => "ok",
            UpdateStatus::Skipped => "skipped",
            UpdateStatus::NoChange => "nochange",
        }
    }
}

/// Result reported back to the dispatcher, exactly one per task.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TaskResult {
    Update { file: PathBuf, status: UpdateStatus },
    Error { file: PathBuf, error: String },
}

impl TaskResult {
    pub fn update(file: &Path, outcome: &TransformOutcome) -> Self {
        TaskResult::Update {
            file: file.to_path_buf(),
            status: outcome.status(),
        }
    }

    /// Render a task failure into its diagnostic text: the stage message with
    /// the file path, then the `Caused by:` chain down to the underlying error.
    /// That chain is what locates the failure. A backtrace, when
    /// `RUST_BACKTRACE` is set, is captured here and so only shows where the
    /// worker turned the failure into a result.
    pub fn error(file: &Path, err: TaskError) -> Self {
        TaskResult::Error {
            file: file.to_path_buf(),
            error: format!("{:?}", anyhow::Error::new(err)),
        }
    }

    pub fn file(&self) -> &Path {
        match self {
            TaskResult::Update { file, .. } | TaskResult::Error { file, .. } => file,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, TaskResult::Error { .. })
    }
}

/// Pipeline stage a task failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Read,
    Invoke,
    Write,
}

/// Structured failure of a single task.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("failed to load transform plugin {}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("transform failed for {}", .path.display())]
    Invoke {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to write {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TaskError {
    pub fn stage(&self) -> Stage {
        match self {
            TaskError::Load { .. } => Stage::Load,
            TaskError::Read { .. } => Stage::Read,
            TaskError::Invoke { .. } => Stage::Invoke,
            TaskError::Write { .. } => Stage::Write,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(code: Option<&str>) -> RawTransformOutput {
        RawTransformOutput {
            code: code.map(str::to_string),
        }
    }

    #[test]
    fn missing_or_empty_code_is_skipped() {
        for out in [raw(None), raw(Some(""))] {
            let outcome = TransformOutcome::classify(out, "let a = 1;");
            assert!(outcome.skipped);
            assert!(!outcome.changed);
            assert_eq!(outcome.status(), UpdateStatus::Skipped);
        }
    }

    #[test]
    fn identical_code_is_nochange() {
        let outcome = TransformOutcome::classify(raw(Some("a")), "a");
        assert!(!outcome.skipped);
        assert!(!outcome.changed);
        assert_eq!(outcome.status(), UpdateStatus::NoChange);
    }

    #[test]
    fn different_code_is_ok() {
        let outcome = TransformOutcome::classify(raw(Some("b")), "a");
        assert!(outcome.changed);
        assert_eq!(outcome.source, "b");
        assert_eq!(outcome.status(), UpdateStatus::Ok);
    }

    #[test]
    fn results_serialize_with_type_tag() {
        let update = TaskResult::Update {
            file: PathBuf::from("a.js"),
            status: UpdateStatus::NoChange,
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            serde_json::json!({"type": "update", "file": "a.js", "status": "nochange"})
        );

        let err = TaskResult::error(
            Path::new("b.js"),
            TaskError::Read {
                path: PathBuf::from("b.js"),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            },
        );
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["file"], "b.js");
        let text = value["error"].as_str().unwrap();
        assert!(text.starts_with("failed to read b.js"));
        assert!(text.contains("Caused by:"));
        assert!(text.contains("gone"));
    }

    #[test]
    fn task_uses_camel_case_and_defaults_options() {
        let task: TransformTask =
            serde_json::from_str(r#"{"transformPath": "t.rhai", "filePath": "a.js"}"#).unwrap();
        assert_eq!(task.transform_path, PathBuf::from("t.rhai"));
        assert!(!task.options.dry);
    }
}
