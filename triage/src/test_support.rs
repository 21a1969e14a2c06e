//! Scripted collaborators and fixtures for tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use anyhow::{Result, anyhow};
use serde_json::Value;

use crate::core::bundle::ProblemBundle;
use crate::core::harness::{Diagnostic, HarnessDraft};
use crate::core::session::SessionView;
use crate::core::types::{Action, ToolName};
use crate::io::compiler::Compiler;
use crate::io::proposer::{Proposer, RepairProposer, RevisionRequest};
use crate::io::tools::ToolBackend;

/// Proposer that replays a fixed list of actions (or failures) in order.
pub struct ScriptedProposer {
    script: RefCell<VecDeque<Result<Action, String>>>,
    observed: RefCell<Vec<usize>>,
}

impl ScriptedProposer {
    pub fn new(script: Vec<Result<Action, String>>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            observed: RefCell::new(Vec::new()),
        }
    }

    /// Actions not yet handed out.
    pub fn remaining(&self) -> usize {
        self.script.borrow().len()
    }

    /// Evidence store length seen on each call.
    pub fn observed_evidence_lengths(&self) -> Vec<usize> {
        self.observed.borrow().clone()
    }
}

impl Proposer for ScriptedProposer {
    fn propose(&self, view: &SessionView<'_>, _tools: &[String]) -> Result<Action> {
        self.observed.borrow_mut().push(view.evidence.len());
        match self.script.borrow_mut().pop_front() {
            Some(Ok(action)) => Ok(action),
            Some(Err(reason)) => Err(anyhow!(reason)),
            None => Err(anyhow!("scripted proposer exhausted")),
        }
    }
}

/// Tool backend with canned responses and a shared call counter.
pub struct ScriptedToolBackend {
    responses: RefCell<VecDeque<Result<Value, String>>>,
    fallback: Result<Value, String>,
    calls: Rc<Cell<usize>>,
}

impl ScriptedToolBackend {
    /// Answer every call with `payload`.
    pub fn always(payload: Value) -> Self {
        Self::sequence(Vec::new(), Ok(payload))
    }

    /// Fail every call with `reason`.
    pub fn failing(reason: &str) -> Self {
        Self::sequence(Vec::new(), Err(reason.to_string()))
    }

    /// Replay `responses`, then answer with `fallback`.
    pub fn sequence(responses: Vec<Result<Value, String>>, fallback: Result<Value, String>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            fallback,
            calls: Rc::new(Cell::new(0)),
        }
    }

    /// Counter that stays readable after the backend moves into a registry.
    pub fn calls(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.calls)
    }
}

impl ToolBackend for ScriptedToolBackend {
    fn call(&self, _tool: ToolName, _args: &Value) -> Result<Value> {
        self.calls.set(self.calls.get() + 1);
        let next = self
            .responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        next.map_err(|reason| anyhow!(reason))
    }
}

/// Repair proposer that replays candidate lists in order.
pub struct ScriptedRepairProposer {
    script: RefCell<VecDeque<Result<Vec<String>, String>>>,
    requests: RefCell<Vec<(u32, usize)>>,
}

impl ScriptedRepairProposer {
    pub fn new(script: Vec<Result<Vec<String>, String>>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// `(iteration, finding count)` per call.
    pub fn requests(&self) -> Vec<(u32, usize)> {
        self.requests.borrow().clone()
    }
}

impl RepairProposer for ScriptedRepairProposer {
    fn revise(&self, request: &RevisionRequest<'_>) -> Result<Vec<String>> {
        self.requests
            .borrow_mut()
            .push((request.iteration, request.findings.len()));
        match self.script.borrow_mut().pop_front() {
            Some(Ok(candidates)) => Ok(candidates),
            Some(Err(reason)) => Err(anyhow!(reason)),
            None => Err(anyhow!("scripted repair proposer exhausted")),
        }
    }
}

/// Compiler that replays diagnostic lists, then reports clean builds.
pub struct ScriptedCompiler {
    results: RefCell<VecDeque<Vec<Diagnostic>>>,
    builds: Cell<usize>,
}

impl ScriptedCompiler {
    pub fn new(results: Vec<Vec<Diagnostic>>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            builds: Cell::new(0),
        }
    }

    pub fn builds(&self) -> usize {
        self.builds.get()
    }
}

impl Compiler for ScriptedCompiler {
    fn compile(&self, _draft: &HarnessDraft) -> Result<Vec<Diagnostic>> {
        self.builds.set(self.builds.get() + 1);
        Ok(self.results.borrow_mut().pop_front().unwrap_or_default())
    }
}

/// A complete, valid problem bundle.
pub fn sample_bundle() -> ProblemBundle {
    ProblemBundle {
        target_artifact: VALID_HARNESS.to_string(),
        requirements: "Crashes must be reachable through Parser.parse with caller-controlled input."
            .to_string(),
        stacktrace: "java.lang.NullPointerException\n\tat com.example.Parser.readNode(Parser.java:88)\n\tat com.example.Parser.parse(Parser.java:41)\n\tat ParserFuzzer.fuzzerTestOneInput(ParserFuzzer.java:13)"
            .to_string(),
        crash_analysis: "readNode dereferences the lookahead token without checking for end of input."
            .to_string(),
    }
}

const VALID_HARNESS: &str = r#"import com.code_intelligence.jazzer.api.FuzzedDataProvider;
import java.io.StringReader;

public class ParserFuzzer {
    public static void fuzzerInitialize() {
    }

    public static void fuzzerTearDown() {
    }

    public static void fuzzerTestOneInput(FuzzedDataProvider data) {
        int limit = data.consumeInt(1, 64);
        String text = data.consumeRemainingAsString();
        Parser parser = new Parser(limit);
        try (StringReader reader = new StringReader(text)) {
            parser.parse(reader);
        } catch (IllegalArgumentException expected) {
            // rejected input
        }
    }
}
"#;

/// Harness `ParserFuzzer` that satisfies the embedded rule set for target
/// `Parser.parse`.
pub fn valid_harness() -> String {
    VALID_HARNESS.to_string()
}
