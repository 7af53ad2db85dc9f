use anyhow::Context;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;

use super::TransformPlugin;

#[derive(Debug, Deserialize, Clone)]
pub struct RuleDef {
    pub find: String,
    #[serde(default)]
    pub replace: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuleSetDef {
    #[serde(default)]
    pub name: Option<String>,
    /// Regex over the file path; files that do not match are declined.
    #[serde(default)]
    pub files: Option<String>,
    pub rules: Vec<RuleDef>,
}

/// A rule file is either a full rule set or just its list of rules.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RuleModule {
    Set(RuleSetDef),
    Bare(Vec<RuleDef>),
}

/// Plugin applying regex replacements in order.
pub struct RulePlugin {
    name: String,
    files: Option<Regex>,
    rules: Vec<(Regex, String)>,
}

impl RulePlugin {
    /// Parse a rule module: YAML, or JSON for `.json` files.
    pub fn parse(path: &Path, content: &str) -> anyhow::Result<Self> {
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let module: RuleModule = if is_json {
            serde_json::from_str(content).with_context(|| format!("failed to parse JSON {:?}", path))?
        } else {
            serde_yaml::from_str(content).with_context(|| format!("failed to parse YAML {:?}", path))?
        };

        let def = match module {
            RuleModule::Set(def) => def,
            RuleModule::Bare(rules) => RuleSetDef {
                name: None,
                files: None,
                rules,
            },
        };

        let name = def.name.unwrap_or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("rules")
                .to_string()
        });
        Self::from_def(name, def.files.as_deref(), def.rules)
    }

    fn from_def(name: String, files: Option<&str>, rules: Vec<RuleDef>) -> anyhow::Result<Self> {
        let files = files
            .map(|f| Regex::new(f).with_context(|| format!("invalid files pattern '{}'", f)))
            .transpose()?;
        let rules = rules
            .into_iter()
            .map(|r| {
                let re = Regex::new(&r.find).with_context(|| format!("invalid rule pattern '{}'", r.find))?;
                Ok((re, r.replace))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { name, files, rules })
    }
}

impl TransformPlugin for RulePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn rewrite(&self, file_path: &Path, source: &str) -> anyhow::Result<Option<String>> {
        if let Some(files) = &self.files {
            if !files.is_match(&file_path.to_string_lossy()) {
                return Ok(None);
            }
        }
        let mut out = source.to_string();
        for (re, replacement) in &self.rules {
            out = re.replace_all(&out, replacement.as_str()).into_owned();
        }
        Ok(Some(out))
    }
}
