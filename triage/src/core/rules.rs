//! Declarative constraint rule set.
//!
//! Rules are plain TOML data. [`RuleSet::compile`] checks the table once at
//! startup and returns a read-only [`CompiledRuleSet`] with every regex built.

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RuleSetError;

pub const RULESET_VERSION: u32 = 1;

/// Default rule set for Jazzer-style Java harnesses.
pub const DEFAULT_RULES: &str = include_str!("../../rules/default.toml");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    pub version: u32,
    #[serde(default)]
    pub rules: Vec<ConstraintRule>,
    #[serde(default)]
    pub rewrites: Vec<Rewrite>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintRule {
    pub id: String,
    pub message: String,
    #[serde(flatten)]
    pub kind: RuleKind,
}

/// Category plus its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum RuleKind {
    ApiWhitelist {
        provider_type: String,
        allowed_methods: Vec<String>,
    },
    ForbiddenConstruct {
        pattern: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        construct: Option<String>,
    },
    EntryPoints {
        initializer: String,
        teardown: String,
        fuzz_entry: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fuzz_param_type: Option<String>,
    },
    ResourceLifecycle {
        closeable_types: Vec<String>,
        release_method: String,
        entry: String,
    },
    ConstructionBeforeUse {
        entry: String,
        initializer: String,
    },
}

impl RuleKind {
    pub fn category(&self) -> &'static str {
        match self {
            RuleKind::ApiWhitelist { .. } => "api_whitelist",
            RuleKind::ForbiddenConstruct { .. } => "forbidden_construct",
            RuleKind::EntryPoints { .. } => "entry_points",
            RuleKind::ResourceLifecycle { .. } => "resource_lifecycle",
            RuleKind::ConstructionBeforeUse { .. } => "construction_before_use",
        }
    }
}

/// Deterministic source rewrite applied before the first repair pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rewrite {
    pub id: String,
    pub pattern: String,
    #[serde(default)]
    pub replacement: String,
}

#[derive(Debug)]
pub struct CompiledRule {
    pub rule: ConstraintRule,
    /// Set for `forbidden_construct` rules.
    pub pattern: Option<Regex>,
}

#[derive(Debug)]
pub struct CompiledRewrite {
    pub id: String,
    pub pattern: Regex,
    pub replacement: String,
}

#[derive(Debug)]
pub struct CompiledRuleSet {
    pub version: u32,
    pub rules: Vec<CompiledRule>,
    pub rewrites: Vec<CompiledRewrite>,
}

impl RuleSet {
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn compile(&self) -> Result<CompiledRuleSet, RuleSetError> {
        if self.version != RULESET_VERSION {
            return Err(RuleSetError::UnsupportedVersion {
                found: self.version,
                expected: RULESET_VERSION,
            });
        }

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(RuleSetError::DuplicateId(rule.id.clone()));
            }
            check_params(rule)?;
            let pattern = match &rule.kind {
                RuleKind::ForbiddenConstruct { pattern, .. } => {
                    Some(build_regex(&rule.id, pattern)?)
                }
                _ => None,
            };
            rules.push(CompiledRule {
                rule: rule.clone(),
                pattern,
            });
        }

        let mut rewrites = Vec::with_capacity(self.rewrites.len());
        for rewrite in &self.rewrites {
            if !seen.insert(rewrite.id.as_str()) {
                return Err(RuleSetError::DuplicateId(rewrite.id.clone()));
            }
            rewrites.push(CompiledRewrite {
                id: rewrite.id.clone(),
                pattern: build_regex(&rewrite.id, &rewrite.pattern)?,
                replacement: rewrite.replacement.clone(),
            });
        }

        Ok(CompiledRuleSet {
            version: self.version,
            rules,
            rewrites,
        })
    }
}

fn build_regex(rule: &str, pattern: &str) -> Result<Regex, RuleSetError> {
    Regex::new(pattern).map_err(|source| RuleSetError::InvalidPattern {
        rule: rule.to_string(),
        source,
    })
}

fn check_params(rule: &ConstraintRule) -> Result<(), RuleSetError> {
    let invalid = |reason: &str| RuleSetError::InvalidRule {
        rule: rule.id.clone(),
        reason: reason.to_string(),
    };
    if rule.id.trim().is_empty() {
        return Err(invalid("id must not be empty"));
    }
    match &rule.kind {
        RuleKind::ApiWhitelist {
            provider_type,
            allowed_methods,
        } => {
            if provider_type.trim().is_empty() {
                return Err(invalid("provider_type must not be empty"));
            }
            if allowed_methods.is_empty() {
                return Err(invalid("allowed_methods must not be empty"));
            }
        }
        RuleKind::ForbiddenConstruct { pattern, .. } => {
            if pattern.is_empty() {
                return Err(invalid("pattern must not be empty"));
            }
        }
        RuleKind::EntryPoints {
            initializer,
            teardown,
            fuzz_entry,
            ..
        } => {
            if [initializer, teardown, fuzz_entry]
                .iter()
                .any(|name| name.trim().is_empty())
            {
                return Err(invalid("entry point names must not be empty"));
            }
        }
        RuleKind::ResourceLifecycle {
            closeable_types,
            release_method,
            entry,
        } => {
            if closeable_types.is_empty() {
                return Err(invalid("closeable_types must not be empty"));
            }
            if release_method.trim().is_empty() || entry.trim().is_empty() {
                return Err(invalid("release_method and entry must not be empty"));
            }
        }
        RuleKind::ConstructionBeforeUse { entry, initializer } => {
            if entry.trim().is_empty() || initializer.trim().is_empty() {
                return Err(invalid("entry and initializer must not be empty"));
            }
        }
    }
    Ok(())
}

impl CompiledRuleSet {
    /// Compile the embedded default rule set.
    pub fn embedded() -> anyhow::Result<Self> {
        use anyhow::Context;
        let set = RuleSet::from_toml(DEFAULT_RULES).context("parse embedded rule set")?;
        set.compile().context("compile embedded rule set")
    }

    /// Apply every rewrite in order. Returns the new source and the ids of
    /// rewrites that changed it.
    pub fn apply_rewrites(&self, source: &str) -> (String, Vec<String>) {
        let mut current = source.to_string();
        let mut applied = Vec::new();
        for rewrite in &self.rewrites {
            let next = rewrite
                .pattern
                .replace_all(&current, rewrite.replacement.as_str())
                .into_owned();
            if next != current {
                applied.push(rewrite.id.clone());
                current = next;
            }
        }
        (current, applied)
    }
}
