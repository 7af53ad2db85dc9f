use anyhow::Context;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::rules::RulePlugin;
use super::script::ScriptCompiler;
use super::{PluginKind, TransformPlugin};

/// Script compilers registered on a worker, one per plugin directory.
#[derive(Default)]
pub struct ScriptCompilers {
    by_dir: HashMap<PathBuf, Arc<ScriptCompiler>>,
}

impl ScriptCompilers {
    /// Register a compiler for `dir`, or return the one already registered.
    pub fn register(&mut self, dir: &Path) -> Arc<ScriptCompiler> {
        self.by_dir
            .entry(dir.to_path_buf())
            .or_insert_with(|| {
                info!("registering script compiler for {:?}", dir);
                Arc::new(ScriptCompiler::new(dir))
            })
            .clone()
    }

    pub fn count(&self) -> usize {
        self.by_dir.len()
    }
}

/// Resolves plugin paths to loaded plugins and keeps them for the lifetime of
/// the worker that owns it. Failed loads are not remembered.
#[derive(Default)]
pub struct PluginLoader {
    compilers: ScriptCompilers,
    cache: HashMap<PathBuf, Arc<dyn TransformPlugin>>,
}

impl PluginLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve and load the plugin at `path`. File access goes through tokio and
    /// script compilation runs on the blocking pool.
    pub async fn load(&mut self, path: &Path) -> anyhow::Result<Arc<dyn TransformPlugin>> {
        let resolved = tokio::fs::canonicalize(path)
            .await
            .with_context(|| format!("cannot resolve plugin module {:?}", path))?;

        if let Some(plugin) = self.cache.get(&resolved) {
            debug!("plugin {:?} already loaded", resolved);
            return Ok(plugin.clone());
        }

        let kind = PluginKind::from_path(&resolved)
            .ok_or_else(|| anyhow::anyhow!("unsupported plugin module {:?}", resolved))?;

        let plugin: Arc<dyn TransformPlugin> = match kind {
            PluginKind::Script => {
                let dir = resolved.parent().unwrap_or_else(|| Path::new("."));
                let compiler = self.compilers.register(dir);
                let script = resolved.clone();
                let compiled = tokio::task::spawn_blocking(move || compiler.compile(&script))
                    .await
                    .context("script compilation did not complete")??;
                Arc::new(compiled)
            }
            PluginKind::Rules => {
                let content = tokio::fs::read_to_string(&resolved)
                    .await
                    .with_context(|| format!("failed to read {:?}", resolved))?;
                Arc::new(RulePlugin::parse(&resolved, &content)?)
            }
        };

        info!("loaded {:?} plugin '{}' from {:?}", kind, plugin.name(), resolved);
        self.cache.insert(resolved, plugin.clone());
        Ok(plugin)
    }

    pub fn compilers(&self) -> &ScriptCompilers {
        &self.compilers
    }

    pub fn loaded(&self) -> usize {
        self.cache.len()
    }
}
