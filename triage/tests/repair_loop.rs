use std::fs;

use triage::core::harness::{Finding, HarnessDraft, TargetUnderTest};
use triage::core::rules::CompiledRuleSet;
use triage::core::validator::validate_draft;
use triage::io::compiler::SkipCompiler;
use triage::io::session_log::write_repair;
use triage::repair::{RepairConfig, RepairRequest, RepairStatus, run_repair};
use triage::test_support::{ScriptedCompiler, ScriptedRepairProposer, valid_harness};

fn target() -> TargetUnderTest {
    TargetUnderTest {
        type_name: "Parser".to_string(),
        method: "parse".to_string(),
    }
}

fn request(source: &str) -> RepairRequest {
    RepairRequest {
        source: source.to_string(),
        class_name: "ParserFuzzer".to_string(),
        diagnostics: None,
        target: Some(target()),
    }
}

fn unsigned_call() -> String {
    valid_harness().replace("data.consumeInt(1, 64)", "data.consumeUnsignedInt()")
}

#[test]
fn disallowed_provider_call_is_one_violation_and_the_fix_clears_it() {
    let rules = CompiledRuleSet::embedded().expect("rules");
    let broken = HarnessDraft::new(unsigned_call(), "ParserFuzzer");
    let violations = validate_draft(&broken, Some(&target()), &rules);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].rule_id, "provider-api");
    assert!(violations[0].detail.contains("consumeUnsignedInt"));

    let fixed = HarnessDraft::new(valid_harness(), "ParserFuzzer");
    assert!(validate_draft(&fixed, Some(&target()), &rules).is_empty());
}

#[test]
fn clean_draft_is_accepted_in_one_pass_without_the_proposer() {
    let rules = CompiledRuleSet::embedded().expect("rules");
    let proposer = ScriptedRepairProposer::new(Vec::new());
    let compiler = ScriptedCompiler::new(Vec::new());
    let outcome = run_repair(
        request(&valid_harness()),
        &RepairConfig {
            rules: &rules,
            proposer: &proposer,
            compiler: &compiler,
            iteration_limit: 5,
        },
    )
    .expect("repair");

    assert_eq!(outcome.status, RepairStatus::Accepted);
    assert_eq!(outcome.passes, 1);
    assert_eq!(outcome.iterations, 0);
    assert!(proposer.requests().is_empty());
    assert_eq!(compiler.builds(), 1);
    assert_eq!(outcome.chain.revisions().len(), 1);
    assert!(outcome.findings.is_empty());
}

#[test]
fn violation_is_repaired_and_chained() {
    let rules = CompiledRuleSet::embedded().expect("rules");
    let proposer = ScriptedRepairProposer::new(vec![Ok(vec![unsigned_call(), valid_harness()])]);
    let outcome = run_repair(
        request(&unsigned_call()),
        &RepairConfig {
            rules: &rules,
            proposer: &proposer,
            compiler: &SkipCompiler,
            iteration_limit: 5,
        },
    )
    .expect("repair");

    assert_eq!(outcome.status, RepairStatus::Accepted);
    assert_eq!(outcome.passes, 2);
    assert_eq!(proposer.requests(), vec![(1, 1)]);
    assert_eq!(outcome.draft().source, valid_harness());

    let revisions = outcome.chain.revisions();
    assert_eq!(revisions.len(), 2);
    assert_eq!(revisions[1].predecessor, Some(0));
    let [Finding::ConstraintViolation(trigger)] = revisions[1].trigger.as_slice() else {
        panic!("expected one violation trigger");
    };
    assert!(trigger.detail.contains("data.consumeUnsignedInt"));
}

#[test]
fn exhausted_budget_returns_the_last_draft_with_its_findings() {
    let rules = CompiledRuleSet::embedded().expect("rules");
    let still_broken = unsigned_call().replace("int limit", "int bound").replace("(limit)", "(bound)");
    let proposer = ScriptedRepairProposer::new(vec![
        Ok(vec![still_broken.clone()]),
        Ok(vec![still_broken.clone()]),
        Ok(vec![still_broken.clone()]),
        Ok(vec![valid_harness()]),
    ]);
    let outcome = run_repair(
        request(&unsigned_call()),
        &RepairConfig {
            rules: &rules,
            proposer: &proposer,
            compiler: &SkipCompiler,
            iteration_limit: 3,
        },
    )
    .expect("repair");

    assert_eq!(outcome.status, RepairStatus::BudgetExhausted);
    assert_eq!(outcome.iterations, 3);
    assert_eq!(outcome.passes, 4);
    assert_eq!(outcome.chain.revisions().len(), 4);
    assert_eq!(outcome.draft().source, still_broken);
    assert_eq!(outcome.findings.len(), 1);
    assert_eq!(
        proposer.requests().iter().map(|(i, _)| *i).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
}

#[test]
fn rewrites_produce_a_revision_before_the_first_pass() {
    let rules = CompiledRuleSet::embedded().expect("rules");
    let noisy = valid_harness().replace(
        "            // rejected input\n",
        "            expected.printStackTrace();\n",
    );
    assert_ne!(noisy, valid_harness());
    let proposer = ScriptedRepairProposer::new(Vec::new());
    let outcome = run_repair(
        request(&noisy),
        &RepairConfig {
            rules: &rules,
            proposer: &proposer,
            compiler: &SkipCompiler,
            iteration_limit: 5,
        },
    )
    .expect("repair");

    assert_eq!(outcome.status, RepairStatus::Accepted);
    assert!(proposer.requests().is_empty());
    let revisions = outcome.chain.revisions();
    assert_eq!(revisions.len(), 2);
    assert!(revisions[1].trigger.is_empty());
    assert!(!revisions[1].draft.source.contains("printStackTrace"));
}

#[test]
fn supplied_diagnostics_replace_the_first_build() {
    let rules = CompiledRuleSet::embedded().expect("rules");
    let proposer = ScriptedRepairProposer::new(vec![Ok(vec![valid_harness()])]);
    let compiler = ScriptedCompiler::new(Vec::new());
    let mut request = request(&valid_harness());
    request.diagnostics = Some(vec![triage::core::harness::Diagnostic::new(
        "ParserFuzzer.java:1: error: package com.code_intelligence.jazzer.api does not exist",
    )]);
    let outcome = run_repair(
        request,
        &RepairConfig {
            rules: &rules,
            proposer: &proposer,
            compiler: &compiler,
            iteration_limit: 2,
        },
    )
    .expect("repair");

    assert_eq!(outcome.status, RepairStatus::Accepted);
    assert_eq!(compiler.builds(), 1);
    assert_eq!(proposer.requests(), vec![(1, 1)]);
}

#[test]
fn repair_artifacts_are_written_per_revision() {
    let rules = CompiledRuleSet::embedded().expect("rules");
    let proposer = ScriptedRepairProposer::new(vec![Ok(vec![valid_harness()])]);
    let outcome = run_repair(
        request(&unsigned_call()),
        &RepairConfig {
            rules: &rules,
            proposer: &proposer,
            compiler: &SkipCompiler,
            iteration_limit: 5,
        },
    )
    .expect("repair");

    let temp = tempfile::tempdir().expect("tempdir");
    let paths = write_repair(temp.path(), &outcome).expect("write");
    assert!(paths.dir.ends_with("repairs/ParserFuzzer"));
    let first = fs::read_to_string(paths.revision_dir(0).join("draft.java")).expect("rev 0");
    assert_eq!(first, unsigned_call());
    let trigger: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(paths.revision_dir(1).join("findings.json")).expect("findings"),
    )
    .expect("json");
    assert_eq!(trigger[0]["kind"], "constraint_violation");
    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&paths.outcome_path).expect("outcome"))
            .expect("json");
    assert_eq!(summary["status"], "accepted");
    assert_eq!(summary["final_revision"], 1);
}
