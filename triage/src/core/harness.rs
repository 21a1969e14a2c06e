//! Harness drafts and their revision chain.

use serde::{Deserialize, Serialize};

use crate::core::validator::Violation;

/// One compiler diagnostic block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessDraft {
    pub source: String,
    pub class_name: String,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

impl HarnessDraft {
    pub fn new(source: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            class_name: class_name.into(),
            diagnostics: Vec::new(),
        }
    }
}

/// Whether `name` can be a Java class name (ASCII letters, digits, `_`, `$`;
/// not starting with a digit). Such a name is also a safe file name.
pub fn is_java_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Type and method the harness is expected to exercise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetUnderTest {
    pub type_name: String,
    pub method: String,
}

/// Reason a draft is not yet acceptable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    ConstraintViolation(Violation),
    CompileDiagnostic(Diagnostic),
}

/// Collect the findings of a draft: violations first, then diagnostics.
pub fn findings(draft: &HarnessDraft, violations: Vec<Violation>) -> Vec<Finding> {
    violations
        .into_iter()
        .map(Finding::ConstraintViolation)
        .chain(
            draft
                .diagnostics
                .iter()
                .cloned()
                .map(Finding::CompileDiagnostic),
        )
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub number: u32,
    pub predecessor: Option<u32>,
    pub draft: HarnessDraft,
    /// Findings on the predecessor that caused this revision.
    pub trigger: Vec<Finding>,
}

/// Linear revision history. Revisions can only be appended at the tip.
#[derive(Debug, Clone)]
pub struct DraftChain {
    revisions: Vec<Revision>,
}

impl DraftChain {
    pub fn new(initial: HarnessDraft) -> Self {
        Self {
            revisions: vec![Revision {
                number: 0,
                predecessor: None,
                draft: initial,
                trigger: Vec::new(),
            }],
        }
    }

    /// Append `draft` as the successor of the current tip.
    pub fn revise(&mut self, draft: HarnessDraft, trigger: Vec<Finding>) -> &Revision {
        let predecessor = self.latest().number;
        self.revisions.push(Revision {
            number: predecessor + 1,
            predecessor: Some(predecessor),
            draft,
            trigger,
        });
        self.latest()
    }

    pub fn latest(&self) -> &Revision {
        // `new` seeds revision 0 and nothing removes revisions.
        &self.revisions[self.revisions.len() - 1]
    }

    pub fn revisions(&self) -> &[Revision] {
        &self.revisions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_is_linear_and_numbered() {
        let mut chain = DraftChain::new(HarnessDraft::new("class A {}", "A"));
        chain.revise(
            HarnessDraft::new("class A { }", "A"),
            vec![Finding::CompileDiagnostic(Diagnostic::new("error: x"))],
        );
        let latest = chain.revise(HarnessDraft::new("class A {  }", "A"), Vec::new());
        assert_eq!(latest.number, 2);
        assert_eq!(latest.predecessor, Some(1));

        for pair in chain.revisions().windows(2) {
            assert_eq!(pair[1].predecessor, Some(pair[0].number));
        }
        assert_eq!(chain.revisions().len(), 3);
        assert_eq!(chain.revisions()[0].predecessor, None);
    }

    #[test]
    fn findings_list_violations_before_diagnostics() {
        let mut draft = HarnessDraft::new("class A {}", "A");
        draft.diagnostics.push(Diagnostic::new("A.java:1: error: boom"));
        let violation = Violation {
            rule_id: "r".to_string(),
            category: "forbidden_construct".to_string(),
            message: "m".to_string(),
            detail: "d".to_string(),
            line: Some(1),
        };
        let all = findings(&draft, vec![violation.clone()]);
        assert_eq!(all[0], Finding::ConstraintViolation(violation));
        assert!(matches!(all[1], Finding::CompileDiagnostic(_)));
    }
}
