//! Loading and writing constraint rule files.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::rules::{CompiledRuleSet, DEFAULT_RULES, RuleSet};
use crate::io::config::write_atomic;

/// Load and compile a rule file, or the embedded default set when `path` is `None`.
pub fn load_rules(path: Option<&Path>) -> Result<CompiledRuleSet> {
    let Some(path) = path else {
        return CompiledRuleSet::embedded();
    };
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let set = RuleSet::from_toml(&contents).with_context(|| format!("parse {}", path.display()))?;
    let compiled = set
        .compile()
        .with_context(|| format!("load rule set {}", path.display()))?;
    debug!(
        path = %path.display(),
        rules = compiled.rules.len(),
        rewrites = compiled.rewrites.len(),
        "loaded rule set"
    );
    Ok(compiled)
}

/// Write the embedded default rule set so it can be edited.
pub fn write_default_rules(path: &Path) -> Result<()> {
    write_atomic(path, DEFAULT_RULES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn written_defaults_load_back() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("rules.toml");
        write_default_rules(&path).expect("write");
        let loaded = load_rules(Some(&path)).expect("load");
        let embedded = load_rules(None).expect("embedded");
        let ids = |set: &CompiledRuleSet| {
            set.rules.iter().map(|r| r.rule.id.clone()).collect::<Vec<_>>()
        };
        assert_eq!(ids(&loaded), ids(&embedded));
    }

    #[test]
    fn errors_name_the_file_and_the_rule() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("rules.toml");
        fs::write(
            &path,
            r#"
version = 1

[[rules]]
id = "bad-regex"
category = "forbidden_construct"
message = "broken"
pattern = "("
"#,
        )
        .expect("write");
        let err = load_rules(Some(&path)).expect_err("invalid regex");
        let text = format!("{err:#}");
        assert!(text.contains("rules.toml"));
        assert!(text.contains("rule 'bad-regex': invalid pattern"));
    }
}
