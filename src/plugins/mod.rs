pub mod loader;
pub mod rules;
pub mod script;

use std::path::Path;

pub use loader::PluginLoader;

/// A loaded transform plugin. Implementations are shared across every task that
/// names the same plugin path on a worker, so they must be immutable after load.
pub trait TransformPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Rewrite `source`. `Ok(None)` means the plugin declined this file.
    fn rewrite(&self, file_path: &Path, source: &str) -> anyhow::Result<Option<String>>;
}

/// Module forms the loader understands, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    /// Rhai script; compiled before first use.
    Script,
    /// Declarative regex rules in YAML or JSON.
    Rules,
}

impl PluginKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "rhai" => Some(PluginKind::Script),
            "yaml" | "yml" | "json" => Some(PluginKind::Rules),
            _ => None,
        }
    }
}
