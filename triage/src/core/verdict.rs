//! Terminal verdict construction and validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TurnError;

/// Sealed outcome of an investigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the crash is reachable from the public entry points.
    pub feasible: bool,
    pub analysis: String,
    /// Present iff `feasible` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<String>,
    /// Sorted, de-duplicated evidence indices.
    pub evidence: Vec<usize>,
    /// Synthesized by the orchestrator rather than reported.
    #[serde(default)]
    pub inconclusive: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReportArgs {
    feasible: bool,
    analysis: String,
    #[serde(default)]
    recommendations: Option<String>,
    #[serde(default)]
    evidence: Option<Vec<usize>>,
}

fn malformed(reason: impl Into<String>) -> TurnError {
    TurnError::MalformedVerdict {
        reason: reason.into(),
    }
}

/// Build a verdict from `report_result` arguments.
///
/// `evidence_len` is the store length at the time of the report; cited indices
/// must be below it.
pub fn verdict_from_report(args: &Value, evidence_len: usize) -> Result<Verdict, TurnError> {
    let report: ReportArgs =
        serde_json::from_value(args.clone()).map_err(|err| malformed(err.to_string()))?;

    let analysis = report.analysis.trim();
    if analysis.is_empty() {
        return Err(malformed("analysis must not be empty"));
    }

    let mut cited = report.evidence.unwrap_or_default();
    if let Some(bad) = cited.iter().find(|idx| **idx >= evidence_len) {
        return Err(malformed(format!(
            "evidence index {bad} does not exist (store has {evidence_len} entries)"
        )));
    }
    cited.sort_unstable();
    cited.dedup();

    if report.feasible {
        return Ok(Verdict {
            feasible: true,
            analysis: analysis.to_string(),
            recommendations: None,
            evidence: cited,
            inconclusive: false,
        });
    }

    let recommendations = report
        .recommendations
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    if recommendations.is_empty() {
        return Err(malformed(
            "recommendations must be non-empty when feasible is false",
        ));
    }
    if evidence_len == 0 {
        return Err(malformed(
            "an infeasible verdict must cite evidence, but none has been gathered",
        ));
    }
    if cited.is_empty() {
        cited = (0..evidence_len).collect();
    }

    Ok(Verdict {
        feasible: false,
        analysis: analysis.to_string(),
        recommendations: Some(recommendations.to_string()),
        evidence: cited,
        inconclusive: false,
    })
}

/// Verdict synthesized when a session aborts. Cites every entry in the store.
pub fn inconclusive(reason: &str, evidence_len: usize) -> Verdict {
    Verdict {
        feasible: false,
        analysis: format!("Investigation ended without a reported verdict: {reason}."),
        recommendations: Some(format!(
            "Result is unknown ({reason}). Re-run with a larger budget or inspect the \
             gathered evidence manually before acting on this crash."
        )),
        evidence: (0..evidence_len).collect(),
        inconclusive: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn infeasible_report_requires_recommendations() {
        let err = verdict_from_report(
            &json!({"feasible": false, "analysis": "guarded", "recommendations": "  "}),
            2,
        )
        .expect_err("blank recommendations");
        assert!(matches!(err, TurnError::MalformedVerdict { .. }));

        let verdict = verdict_from_report(
            &json!({"feasible": false, "analysis": "guarded", "recommendations": "fix the harness"}),
            2,
        )
        .expect("verdict");
        assert_eq!(verdict.evidence, vec![0, 1]);
        assert_eq!(verdict.recommendations.as_deref(), Some("fix the harness"));
    }

    #[test]
    fn infeasible_report_needs_gathered_evidence() {
        let err = verdict_from_report(
            &json!({"feasible": false, "analysis": "a", "recommendations": "r"}),
            0,
        )
        .expect_err("empty store");
        assert!(err.to_string().contains("none has been gathered"));
    }

    #[test]
    fn cited_indices_must_exist_and_are_normalized() {
        let err = verdict_from_report(
            &json!({"feasible": true, "analysis": "reachable", "evidence": [0, 5]}),
            3,
        )
        .expect_err("dangling index");
        assert!(err.to_string().contains("evidence index 5"));

        let verdict = verdict_from_report(
            &json!({"feasible": true, "analysis": "reachable", "evidence": [2, 0, 2],
                    "recommendations": "ignored"}),
            3,
        )
        .expect("verdict");
        assert_eq!(verdict.evidence, vec![0, 2]);
        assert_eq!(verdict.recommendations, None);
    }

    #[test]
    fn non_boolean_feasible_is_malformed() {
        let err = verdict_from_report(&json!({"feasible": "yes", "analysis": "a"}), 1)
            .expect_err("string feasible");
        assert!(matches!(err, TurnError::MalformedVerdict { .. }));
    }

    #[test]
    fn inconclusive_verdict_cites_everything() {
        let verdict = inconclusive("turn budget of 5 exhausted", 4);
        assert!(verdict.inconclusive);
        assert!(!verdict.feasible);
        assert_eq!(verdict.evidence, vec![0, 1, 2, 3]);
        assert!(
            verdict
                .recommendations
                .as_deref()
                .is_some_and(|text| text.contains("budget"))
        );
    }
}
