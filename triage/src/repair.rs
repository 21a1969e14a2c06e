//! Bounded repair loop for generated fuzz harnesses.
//!
//! The loop validates the tip of a [`DraftChain`], asks the repair proposer
//! for candidates while findings remain, keeps the best candidate, compiles
//! it, and chains it. It ends `Accepted` when a draft has no findings or
//! `BudgetExhausted` with the last draft and its outstanding findings.

use std::cmp::Reverse;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::harness::{
    Diagnostic, DraftChain, Finding, HarnessDraft, Revision, TargetUnderTest, findings,
    is_java_identifier,
};
use crate::core::rules::CompiledRuleSet;
use crate::core::validator::validate_draft;
use crate::error::RequestError;
use crate::io::compiler::Compiler;
use crate::io::proposer::{RepairProposer, RevisionRequest};

/// A harness to repair (JSON input of `triage repair`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepairRequest {
    pub source: String,
    pub class_name: String,
    /// Diagnostics from an earlier build; revision 0 is compiled when absent.
    #[serde(default)]
    pub diagnostics: Option<Vec<Diagnostic>>,
    #[serde(default)]
    pub target: Option<TargetUnderTest>,
}

impl RepairRequest {
    /// Parse and validate a request. The class name names files under the
    /// output directory, so it must be a plain Java identifier.
    pub fn from_json(value: &Value) -> Result<Self, RequestError> {
        let request: Self = serde_json::from_value(value.clone()).map_err(|err| RequestError {
            field: "<root>",
            reason: err.to_string(),
        })?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        if !is_java_identifier(&self.class_name) {
            return Err(RequestError {
                field: "class_name",
                reason: format!("'{}' is not a Java identifier", self.class_name),
            });
        }
        if self.source.trim().is_empty() {
            return Err(RequestError {
                field: "source",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStatus {
    Accepted,
    BudgetExhausted,
}

#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub status: RepairStatus,
    pub chain: DraftChain,
    /// Findings still open on the final draft; empty when accepted.
    pub findings: Vec<Finding>,
    /// Validation passes performed.
    pub passes: u32,
    /// Proposer calls made.
    pub iterations: u32,
    pub target: Option<TargetUnderTest>,
}

impl RepairOutcome {
    pub fn final_revision(&self) -> &Revision {
        self.chain.latest()
    }

    pub fn draft(&self) -> &HarnessDraft {
        &self.chain.latest().draft
    }
}

/// Collaborators and budget for one repair run.
pub struct RepairConfig<'a, R: ?Sized, C: ?Sized> {
    pub rules: &'a CompiledRuleSet,
    pub proposer: &'a R,
    pub compiler: &'a C,
    pub iteration_limit: u32,
}

/// Validate a draft and merge its diagnostics into one findings list.
pub fn check_draft(
    draft: &HarnessDraft,
    target: Option<&TargetUnderTest>,
    rules: &CompiledRuleSet,
) -> Vec<Finding> {
    findings(draft, validate_draft(draft, target, rules))
}

/// Run the repair loop to completion.
///
/// Errors are infrastructure failures (the build could not run). Proposer
/// failures only consume budget.
#[instrument(skip_all, fields(class = %request.class_name, limit = config.iteration_limit))]
pub fn run_repair<R, C>(request: RepairRequest, config: &RepairConfig<'_, R, C>) -> Result<RepairOutcome>
where
    R: RepairProposer + ?Sized,
    C: Compiler + ?Sized,
{
    request.validate()?;
    let RepairRequest {
        source,
        class_name,
        diagnostics,
        target,
    } = request;

    let mut initial = HarnessDraft::new(source, class_name);
    initial.diagnostics = match diagnostics {
        Some(supplied) => supplied,
        None => config
            .compiler
            .compile(&initial)
            .context("compile revision 0")?,
    };
    let mut chain = DraftChain::new(initial);

    let (rewritten, applied) = config.rules.apply_rewrites(&chain.latest().draft.source);
    if !applied.is_empty() {
        info!(rewrites = ?applied, "applied deterministic rewrites");
        let mut draft = HarnessDraft::new(rewritten, chain.latest().draft.class_name.clone());
        draft.diagnostics = config
            .compiler
            .compile(&draft)
            .context("compile rewritten draft")?;
        chain.revise(draft, Vec::new());
    }

    let mut passes = 0u32;
    let mut iterations = 0u32;
    loop {
        passes += 1;
        let outstanding = check_draft(&chain.latest().draft, target.as_ref(), config.rules);
        debug!(
            pass = passes,
            revision = chain.latest().number,
            findings = outstanding.len(),
            "checked draft"
        );
        if outstanding.is_empty() {
            info!(revision = chain.latest().number, passes, "draft accepted");
            return Ok(RepairOutcome {
                status: RepairStatus::Accepted,
                chain,
                findings: outstanding,
                passes,
                iterations,
                target,
            });
        }
        if iterations >= config.iteration_limit {
            warn!(
                revision = chain.latest().number,
                findings = outstanding.len(),
                "repair budget exhausted"
            );
            return Ok(RepairOutcome {
                status: RepairStatus::BudgetExhausted,
                chain,
                findings: outstanding,
                passes,
                iterations,
                target,
            });
        }

        iterations += 1;
        let revision_request = RevisionRequest {
            draft: &chain.latest().draft,
            findings: &outstanding,
            target: target.as_ref(),
            iteration: iterations,
            iteration_limit: config.iteration_limit,
        };
        let candidates = match config.proposer.revise(&revision_request) {
            Ok(candidates) if !candidates.is_empty() => candidates,
            Ok(_) => {
                warn!(iteration = iterations, "proposer returned no candidates");
                continue;
            }
            Err(err) => {
                warn!(iteration = iterations, err = %format!("{err:#}"), "revision failed");
                continue;
            }
        };

        let class_name = chain.latest().draft.class_name.clone();
        let mut draft = pick_candidate(candidates, &class_name, target.as_ref(), config.rules);
        draft.diagnostics = config
            .compiler
            .compile(&draft)
            .with_context(|| format!("compile revision {}", chain.latest().number + 1))?;
        chain.revise(draft, outstanding);
    }
}

/// The candidate with the fewest violations; ties prefer the longest source,
/// then the earliest.
fn pick_candidate(
    candidates: Vec<String>,
    class_name: &str,
    target: Option<&TargetUnderTest>,
    rules: &CompiledRuleSet,
) -> HarnessDraft {
    let scored: Vec<(usize, HarnessDraft)> = candidates
        .into_iter()
        .map(|source| {
            let draft = HarnessDraft::new(source, class_name);
            let count = validate_draft(&draft, target, rules).len();
            (count, draft)
        })
        .collect();
    for (index, (count, draft)) in scored.iter().enumerate() {
        debug!(index, violations = count, bytes = draft.source.len(), "scored candidate");
    }
    scored
        .into_iter()
        .enumerate()
        .min_by_key(|(index, (count, draft))| (*count, Reverse(draft.source.len()), *index))
        .map(|(_, (_, draft))| draft)
        .unwrap_or_else(|| HarnessDraft::new(String::new(), class_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::compiler::SkipCompiler;
    use crate::test_support::{ScriptedCompiler, ScriptedRepairProposer, valid_harness};

    fn rules() -> CompiledRuleSet {
        CompiledRuleSet::embedded().expect("rules")
    }

    fn request(source: &str) -> RepairRequest {
        RepairRequest {
            source: source.to_string(),
            class_name: "ParserFuzzer".to_string(),
            diagnostics: None,
            target: Some(TargetUnderTest {
                type_name: "Parser".to_string(),
                method: "parse".to_string(),
            }),
        }
    }

    #[test]
    fn class_names_must_be_identifiers() {
        let outside = std::env::temp_dir().join("pwned").display().to_string();
        for class_name in ["../ParserFuzzer", outside.as_str(), "", "9Fuzzer"] {
            let raw = serde_json::json!({"source": valid_harness(), "class_name": class_name});
            let err = RepairRequest::from_json(&raw).expect_err(class_name);
            assert_eq!(err.field, "class_name");
        }

        let raw = serde_json::json!({"source": valid_harness(), "class_name": "Parser$Fuzzer_2"});
        assert!(RepairRequest::from_json(&raw).is_ok());

        let raw = serde_json::json!({"source": valid_harness(), "class_name": "A", "extra": 1});
        assert_eq!(RepairRequest::from_json(&raw).expect_err("unknown field").field, "<root>");
    }

    #[test]
    fn invalid_request_fails_before_any_build() {
        let rules = rules();
        let proposer = ScriptedRepairProposer::new(Vec::new());
        let compiler = ScriptedCompiler::new(Vec::new());
        let mut bad = request(&valid_harness());
        bad.class_name = "../../escape".to_string();
        let err = run_repair(
            bad,
            &RepairConfig {
                rules: &rules,
                proposer: &proposer,
                compiler: &compiler,
                iteration_limit: 3,
            },
        )
        .expect_err("invalid class name");
        assert!(format!("{err:#}").contains("class_name"));
        assert_eq!(compiler.builds(), 0);
    }

    #[test]
    fn candidate_with_fewest_violations_wins() {
        let rules = rules();
        let clean = valid_harness();
        let noisy = clean.replace("data.consumeInt(1, 64)", "data.consumeUnsignedInt()");
        let picked = pick_candidate(
            vec![noisy, clean.clone()],
            "ParserFuzzer",
            None,
            &rules,
        );
        assert_eq!(picked.source, clean);
    }

    #[test]
    fn ties_prefer_longer_then_earlier_candidates() {
        let rules = rules();
        let clean = valid_harness();
        let longer = format!("{clean}\n// seeded corpus lives in src/test/resources\n");
        let picked = pick_candidate(
            vec![clean.clone(), longer.clone()],
            "ParserFuzzer",
            None,
            &rules,
        );
        assert_eq!(picked.source, longer);

        let picked = pick_candidate(
            vec![clean.clone(), clean.clone()],
            "ParserFuzzer",
            None,
            &rules,
        );
        assert_eq!(picked.source, clean);
    }

    #[test]
    fn compile_errors_are_findings_until_fixed() {
        let rules = rules();
        let clean = valid_harness();
        let proposer = ScriptedRepairProposer::new(vec![Ok(vec![clean.clone()])]);
        let compiler = ScriptedCompiler::new(vec![
            vec![Diagnostic {
                message: "ParserFuzzer.java:9: error: cannot find symbol".to_string(),
                location: Some("ParserFuzzer.java:9".to_string()),
            }],
            Vec::new(),
        ]);
        let outcome = run_repair(
            request(&clean),
            &RepairConfig {
                rules: &rules,
                proposer: &proposer,
                compiler: &compiler,
                iteration_limit: 3,
            },
        )
        .expect("repair");
        assert_eq!(outcome.status, RepairStatus::Accepted);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.chain.revisions().len(), 2);
        assert!(matches!(
            outcome.final_revision().trigger.as_slice(),
            [Finding::CompileDiagnostic(_)]
        ));
    }

    #[test]
    fn failed_revisions_consume_budget() {
        let rules = rules();
        let broken = valid_harness().replace("data.consumeInt(1, 64)", "data.consumeUnsignedInt()");
        let proposer =
            ScriptedRepairProposer::new(vec![Err("model offline".to_string()), Ok(Vec::new())]);
        let outcome = run_repair(
            request(&broken),
            &RepairConfig {
                rules: &rules,
                proposer: &proposer,
                compiler: &SkipCompiler,
                iteration_limit: 2,
            },
        )
        .expect("repair");
        assert_eq!(outcome.status, RepairStatus::BudgetExhausted);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.chain.revisions().len(), 1);
        assert_eq!(outcome.draft().source, broken);
        assert_eq!(outcome.findings.len(), 1);
    }
}
