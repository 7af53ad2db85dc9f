use anyhow::anyhow;
use rhai::module_resolvers::FileModuleResolver;
use rhai::{CallFnOptions, Dynamic, Engine, FnPtr, OptimizationLevel, Scope, AST};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::TransformPlugin;

/// Name of the function a script exports as its plugin.
pub const EXPORT_FN: &str = "transform";

/// Rhai compiler for every script in one directory. Module imports resolve
/// relative to that directory; the optimizer is off so compiles stay fast.
pub struct ScriptCompiler {
    engine: Arc<Engine>,
}

fn configured_engine(dir: &Path) -> Engine {
    let mut engine = Engine::new();
    engine.set_module_resolver(FileModuleResolver::new_with_path(dir));
    engine.set_optimization_level(OptimizationLevel::None);
    engine.set_max_operations(10_000_000);
    engine.set_max_call_levels(64);
    engine.set_max_expr_depths(128, 64);
    engine.on_print(|text| debug!("script print: {}", text));
    engine.on_debug(|text, source, pos| debug!("script debug {:?} {:?}: {}", source, pos, text));
    engine
}

impl ScriptCompiler {
    pub fn new(dir: &Path) -> Self {
        Self::from_engine(configured_engine(dir))
    }

    fn from_engine(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    /// Compile the script at `path` and resolve its exported plugin.
    ///
    /// Top-level statements run exactly once, here. Their variables are kept in
    /// the plugin's scope and every later call starts from that scope without
    /// re-running them.
    pub fn compile(&self, path: &Path) -> anyhow::Result<ScriptPlugin> {
        let ast = self
            .engine
            .compile_file(path.to_path_buf())
            .map_err(|err| anyhow!("script compile error: {}", err))?;

        let mut scope = Scope::new();
        let value = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
            .map_err(|err| anyhow!("script evaluation error: {}", err))?;

        let has_export_fn = ast
            .iter_functions()
            .any(|f| f.name == EXPORT_FN && f.params.len() == 2);

        let export = if has_export_fn {
            Export::Function
        } else if let Some(fn_ptr) = value.try_cast::<FnPtr>() {
            Export::Value(fn_ptr)
        } else {
            anyhow::bail!(
                "script neither defines `fn {}(source, path)` nor evaluates to a function",
                EXPORT_FN
            );
        };

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("script")
            .to_string();

        Ok(ScriptPlugin {
            name,
            engine: self.engine.clone(),
            ast,
            scope,
            export,
        })
    }
}

enum Export {
    /// `fn transform(source, path)` defined in the script.
    Function,
    /// The script evaluated to a function pointer or closure.
    Value(FnPtr),
}

pub struct ScriptPlugin {
    name: String,
    engine: Arc<Engine>,
    ast: AST,
    /// Top-level state left behind by the load-time evaluation.
    scope: Scope<'static>,
    export: Export,
}

impl TransformPlugin for ScriptPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn rewrite(&self, file_path: &Path, source: &str) -> anyhow::Result<Option<String>> {
        let args = (source.to_string(), file_path.to_string_lossy().into_owned());
        let value = match &self.export {
            Export::Function => {
                let mut scope = self.scope.clone();
                let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
                self.engine
                    .call_fn_with_options::<Dynamic>(options, &mut scope, &self.ast, EXPORT_FN, args)
            }
            Export::Value(fn_ptr) => fn_ptr.call::<Dynamic>(&self.engine, &self.ast, args),
        }
        .map_err(|err| anyhow!("script '{}' failed: {}", self.name, err))?;

        into_code(value)
    }
}

/// `()` means the script declined the file; anything but a string is an error.
fn into_code(value: Dynamic) -> anyhow::Result<Option<String>> {
    if value.is_unit() {
        return Ok(None);
    }
    value
        .into_string()
        .map(Some)
        .map_err(|type_name| anyhow!("transform returned {} instead of a string", type_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn write_script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn exported_function_rewrites_source() {
        let dir = TempDir::new().unwrap();
        let path = write_script(
            &dir,
            "let.rhai",
            r#"fn transform(source, path) { source.replace("var ", "let "); source }"#,
        );
        let plugin = ScriptCompiler::new(dir.path()).compile(&path).unwrap();
        assert_eq!(plugin.name(), "let");
        let out = plugin.rewrite(Path::new("a.js"), "var a = 1;").unwrap();
        assert_eq!(out.as_deref(), Some("let a = 1;"));
    }

    #[test]
    fn closure_value_is_accepted_as_plugin() {
        let dir = TempDir::new().unwrap();
        let path = write_script(
            &dir,
            "footer.rhai",
            r#"|source, path| { if path.ends_with(".md") { () } else { source + "// done" } }"#,
        );
        let plugin = ScriptCompiler::new(dir.path()).compile(&path).unwrap();
        assert_eq!(plugin.rewrite(Path::new("README.md"), "x").unwrap(), None);
        assert_eq!(
            plugin.rewrite(Path::new("a.js"), "x\n").unwrap().as_deref(),
            Some("x\n// done")
        );
    }

    #[test]
    fn imports_resolve_next_to_plugin() {
        let dir = TempDir::new().unwrap();
        write_script(&dir, "helpers.rhai", "fn shout(s) { s.to_upper() }");
        let path = write_script(
            &dir,
            "upper.rhai",
            r#"fn transform(source, path) { import "helpers" as h; h::shout(source) }"#,
        );
        let plugin = ScriptCompiler::new(dir.path()).compile(&path).unwrap();
        assert_eq!(plugin.rewrite(Path::new("a.txt"), "abc").unwrap().as_deref(), Some("ABC"));
    }

    #[test]
    fn script_without_export_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_script(&dir, "empty.rhai", "let x = 1;");
        let err = ScriptCompiler::new(dir.path()).compile(&path).err().unwrap();
        assert!(err.to_string().contains("neither defines"));
    }

    #[test]
    fn syntax_error_fails_compile() {
        let dir = TempDir::new().unwrap();
        let path = write_script(&dir, "broken.rhai", "fn transform(source, path) { ");
        let err = ScriptCompiler::new(dir.path()).compile(&path).err().unwrap();
        assert!(err.to_string().contains("compile error"));
    }

    #[test]
    fn thrown_error_and_wrong_type_surface_as_errors() {
        let dir = TempDir::new().unwrap();
        let compiler = ScriptCompiler::new(dir.path());

        let boom = write_script(&dir, "boom.rhai", r#"fn transform(source, path) { throw "boom" }"#);
        let err = compiler.compile(&boom).unwrap().rewrite(Path::new("a"), "a").err().unwrap();
        assert!(err.to_string().contains("boom"));

        let number = write_script(&dir, "number.rhai", "fn transform(source, path) { 42 }");
        let err = compiler.compile(&number).unwrap().rewrite(Path::new("a"), "a").err().unwrap();
        assert!(err.to_string().contains("instead of a string"));
    }

    fn counting_compiler(dir: &TempDir) -> (ScriptCompiler, Arc<AtomicUsize>) {
        let prints = Arc::new(AtomicUsize::new(0));
        let mut engine = configured_engine(dir.path());
        let counter = prints.clone();
        engine.on_print(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (ScriptCompiler::from_engine(engine), prints)
    }

    #[test]
    fn top_level_code_runs_once_per_load() {
        let dir = TempDir::new().unwrap();
        let path = write_script(
            &dir,
            "bang.rhai",
            r#"print("init"); let suffix = "!"; fn transform(source, path) { source + "!" }"#,
        );
        let (compiler, prints) = counting_compiler(&dir);
        let plugin = compiler.compile(&path).unwrap();
        assert_eq!(prints.load(Ordering::SeqCst), 1);
        for _ in 0..3 {
            assert_eq!(plugin.rewrite(Path::new("a"), "a").unwrap().as_deref(), Some("a!"));
        }
        assert_eq!(prints.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closure_export_does_not_rerun_top_level_code() {
        let dir = TempDir::new().unwrap();
        let path = write_script(&dir, "twice.rhai", r#"print("init"); |source, path| { source + source }"#);
        let (compiler, prints) = counting_compiler(&dir);
        let plugin = compiler.compile(&path).unwrap();
        for _ in 0..3 {
            assert_eq!(plugin.rewrite(Path::new("a"), "ab").unwrap().as_deref(), Some("abab"));
        }
        assert_eq!(prints.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn throwing_top_level_fails_load() {
        let dir = TempDir::new().unwrap();
        let path = write_script(
            &dir,
            "init_fails.rhai",
            r#"throw "x"; fn transform(source, path) { source }"#,
        );
        let err = ScriptCompiler::new(dir.path()).compile(&path).err().unwrap();
        assert!(err.to_string().contains("script evaluation error"));
    }
}
