use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::plugins::TransformPlugin;
use crate::task::RawTransformOutput;

/// Input handed to a transform engine for one file.
pub struct TransformRequest {
    pub template: String,
    pub file_path: PathBuf,
    pub plugin: Arc<dyn TransformPlugin>,
}

/// Engine trait: apply a plugin to a file's contents.
#[async_trait]
pub trait TransformEngine: Send + Sync {
    async fn transform(&self, request: TransformRequest) -> anyhow::Result<RawTransformOutput>;
}

/// Default engine: runs the plugin on the blocking pool and waits for it.
pub struct PluginEngine;

impl PluginEngine {
    pub fn new() -> Self { Self {} }
}

impl Default for PluginEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransformEngine for PluginEngine {
    async fn transform(&self, request: TransformRequest) -> anyhow::Result<RawTransformOutput> {
        let TransformRequest { template, file_path, plugin } = request;
        let code = tokio::task::spawn_blocking(move || plugin.rewrite(&file_path, &template))
            .await
            .map_err(|e| {
                if e.is_panic() {
                    anyhow::anyhow!("transform plugin panicked")
                } else {
                    anyhow::anyhow!("transform plugin was cancelled")
                }
            })??;
        Ok(RawTransformOutput { code })
    }
}
