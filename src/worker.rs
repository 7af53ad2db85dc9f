use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::engine::{PluginEngine, TransformEngine, TransformRequest};
use crate::plugins::{PluginLoader, TransformPlugin};
use crate::task::{TaskError, TaskResult, TransformOptions, TransformOutcome, TransformTask};

/// Executes transform tasks one at a time. Each worker owns its plugin cache,
/// so a plugin is loaded (and compiled) once per worker no matter how many
/// files it is applied to.
pub struct Worker {
    loader: PluginLoader,
    engine: Arc<dyn TransformEngine>,
}

impl Worker {
    pub fn new() -> Self {
        Self::with_engine(Arc::new(PluginEngine::new()))
    }

    pub fn with_engine(engine: Arc<dyn TransformEngine>) -> Self {
        Self {
            loader: PluginLoader::new(),
            engine,
        }
    }

    pub fn loader(&self) -> &PluginLoader {
        &self.loader
    }

    pub async fn run_task(&mut self, task: &TransformTask) -> TaskResult {
        self.run(&task.transform_path, &task.file_path, &task.options).await
    }

    /// Run one task. Never fails: any error along the way is reported as an
    /// error result for `file_path`.
    pub async fn run(
        &mut self,
        transform_path: &Path,
        file_path: &Path,
        options: &TransformOptions,
    ) -> TaskResult {
        match self.execute(transform_path, file_path, options).await {
            Ok(outcome) => {
                let result = TaskResult::update(file_path, &outcome);
                debug!("{:?}: {}", file_path, outcome.status().as_str());
                result
            }
            Err(err) => {
                warn!("{:?}: {:?} stage failed: {}", file_path, err.stage(), err);
                TaskResult::error(file_path, err)
            }
        }
    }

    async fn execute(
        &mut self,
        transform_path: &Path,
        file_path: &Path,
        options: &TransformOptions,
    ) -> Result<TransformOutcome, TaskError> {
        let plugin = self
            .loader
            .load(transform_path)
            .await
            .map_err(|source| TaskError::Load {
                path: transform_path.to_path_buf(),
                source,
            })?;
        let contents = read_file(file_path).await?;
        let outcome = apply_transform(self.engine.as_ref(), plugin, file_path, contents).await?;
        write_file(file_path, outcome, options).await
    }
}

impl Default for Worker {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_file(file_path: &Path) -> Result<String, TaskError> {
    tokio::fs::read_to_string(file_path)
        .await
        .map_err(|source| TaskError::Read {
            path: file_path.to_path_buf(),
            source,
        })
}

async fn apply_transform(
    engine: &dyn TransformEngine,
    plugin: Arc<dyn TransformPlugin>,
    file_path: &Path,
    contents: String,
) -> Result<TransformOutcome, TaskError> {
    let raw = engine
        .transform(TransformRequest {
            template: contents.clone(),
            file_path: file_path.to_path_buf(),
            plugin,
        })
        .await
        .map_err(|source| TaskError::Invoke {
            path: file_path.to_path_buf(),
            source,
        })?;
    Ok(TransformOutcome::classify(raw, &contents))
}

/// Persist the rewrite unless this is a dry run or nothing changed.
async fn write_file(
    file_path: &Path,
    outcome: TransformOutcome,
    options: &TransformOptions,
) -> Result<TransformOutcome, TaskError> {
    if options.dry || !outcome.changed {
        return Ok(outcome);
    }
    tokio::fs::write(file_path, outcome.source.as_bytes())
        .await
        .map_err(|source| TaskError::Write {
            path: file_path.to_path_buf(),
            source,
        })?;
    Ok(outcome)
}
