//! Constraint validator for harness drafts.
//!
//! Every rule runs against every draft; nothing short-circuits. Violations are
//! ordered by rule order, then by source position.

use std::collections::BTreeSet;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::core::harness::{HarnessDraft, TargetUnderTest};
use crate::core::rules::{CompiledRule, CompiledRuleSet, RuleKind};
use crate::core::scan::{self, LineIndex, MethodDecl};

/// One rule failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    pub category: String,
    /// Rule-level message.
    pub message: String,
    /// What exactly was found.
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

struct Source<'a> {
    masked: String,
    lines: LineIndex,
    methods: Vec<MethodDecl>,
    class_name: &'a str,
}

impl Source<'_> {
    fn line(&self, offset: usize) -> usize {
        self.lines.line(offset)
    }

    fn methods_named(&self, name: &str) -> impl Iterator<Item = &MethodDecl> {
        self.methods.iter().filter(move |m| m.name == name)
    }

    fn first_method(&self, name: &str) -> Option<&MethodDecl> {
        self.methods_named(name).next()
    }

    fn snippet(&self, range: Range<usize>) -> String {
        self.masked[range].split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

struct Sink<'r> {
    rule: &'r CompiledRule,
    found: Vec<(usize, Violation)>,
}

impl Sink<'_> {
    fn push(&mut self, position: usize, line: Option<usize>, detail: String) {
        self.found.push((
            position,
            Violation {
                rule_id: self.rule.rule.id.clone(),
                category: self.rule.rule.kind.category().to_string(),
                message: self.rule.rule.message.clone(),
                detail,
                line,
            },
        ));
    }
}

/// Check `draft` against every rule in `rules`.
pub fn validate_draft(
    draft: &HarnessDraft,
    target: Option<&TargetUnderTest>,
    rules: &CompiledRuleSet,
) -> Vec<Violation> {
    let masked = scan::mask(&draft.source);
    let source = Source {
        lines: LineIndex::new(&masked),
        methods: scan::find_methods(&masked),
        masked,
        class_name: &draft.class_name,
    };

    let mut violations = Vec::new();
    for rule in &rules.rules {
        let mut sink = Sink {
            rule,
            found: Vec::new(),
        };
        match &rule.rule.kind {
            RuleKind::ApiWhitelist {
                provider_type,
                allowed_methods,
            } => check_api_whitelist(&source, provider_type, allowed_methods, &mut sink),
            RuleKind::ForbiddenConstruct { construct, .. } => {
                check_forbidden(&source, rule, construct.as_deref(), &mut sink);
            }
            RuleKind::EntryPoints {
                initializer,
                teardown,
                fuzz_entry,
                fuzz_param_type,
            } => check_entry_points(
                &source,
                [initializer, teardown, fuzz_entry],
                fuzz_param_type.as_deref(),
                &mut sink,
            ),
            RuleKind::ResourceLifecycle {
                closeable_types,
                release_method,
                entry,
            } => check_resources(&source, closeable_types, release_method, entry, &mut sink),
            RuleKind::ConstructionBeforeUse { entry, initializer } => {
                if let Some(target) = target {
                    check_construction(&source, target, entry, initializer, &mut sink);
                }
            }
        }
        // Stable sort keeps discovery order for equal positions.
        sink.found.sort_by_key(|(position, _)| *position);
        violations.extend(sink.found.into_iter().map(|(_, v)| v));
    }
    violations
}

/// Fields are declarations outside any method body.
fn field_vars(source: &Source<'_>, type_name: &str) -> Vec<String> {
    scan::declared_vars(&source.masked, 0..source.masked.len(), type_name)
        .into_iter()
        .filter(|(_, offset)| !scan::inside_any(&source.methods, *offset))
        .filter(|(_, offset)| {
            // Parameters sit between a method name and its body.
            !source
                .methods
                .iter()
                .any(|m| m.name_start < *offset && *offset < m.body.start)
        })
        .map(|(name, _)| name)
        .collect()
}

fn check_api_whitelist(
    source: &Source<'_>,
    provider_type: &str,
    allowed: &[String],
    sink: &mut Sink<'_>,
) {
    let fields = field_vars(source, provider_type);
    let mut reported = BTreeSet::new();
    for method in &source.methods {
        let mut vars: BTreeSet<String> = fields.iter().cloned().collect();
        vars.extend(
            method
                .params
                .iter()
                .filter(|p| p.type_name == provider_type)
                .map(|p| p.name.clone()),
        );
        vars.extend(
            scan::declared_vars(&source.masked, method.body.clone(), provider_type)
                .into_iter()
                .map(|(name, _)| name),
        );

        for var in &vars {
            for access in scan::member_accesses(&source.masked, method.body.clone(), var) {
                if allowed.iter().any(|m| *m == access.member) {
                    continue;
                }
                // Nested methods (anonymous classes) are scanned by both the
                // outer and inner declaration.
                if !reported.insert(access.offset) {
                    continue;
                }
                sink.push(
                    access.offset,
                    Some(source.line(access.offset)),
                    format!(
                        "{var}.{} is not an allowed {provider_type} method",
                        access.member
                    ),
                );
            }
        }
    }
}

fn check_forbidden(
    source: &Source<'_>,
    rule: &CompiledRule,
    construct: Option<&str>,
    sink: &mut Sink<'_>,
) {
    let Some(pattern) = &rule.pattern else {
        return;
    };
    let label = construct.unwrap_or("forbidden construct");
    for found in pattern.find_iter(&source.masked) {
        let text = source.snippet(found.range());
        sink.push(
            found.start(),
            Some(source.line(found.start())),
            format!("{label} `{text}` at line {}", source.line(found.start())),
        );
    }
}

fn check_entry_points(
    source: &Source<'_>,
    names: [&String; 3],
    fuzz_param_type: Option<&str>,
    sink: &mut Sink<'_>,
) {
    let classes = scan::find_classes(&source.masked);
    let matching: Vec<_> = classes
        .iter()
        .filter(|(name, _)| name == source.class_name)
        .collect();
    match matching.as_slice() {
        [] => {
            let found: Vec<&str> = classes.iter().map(|(name, _)| name.as_str()).collect();
            let detail = if found.is_empty() {
                format!("missing class {}", source.class_name)
            } else {
                format!(
                    "missing class {} (found: {})",
                    source.class_name,
                    found.join(", ")
                )
            };
            sink.push(0, None, detail);
        }
        [_] => {}
        [_, rest @ ..] => {
            for (_, offset) in rest {
                sink.push(
                    *offset,
                    Some(source.line(*offset)),
                    format!("class {} declared more than once", source.class_name),
                );
            }
        }
    }

    for (slot, name) in names.into_iter().enumerate() {
        let decls: Vec<&MethodDecl> = source.methods_named(name).collect();
        match decls.as_slice() {
            [] => {
                let near_miss = source
                    .methods
                    .iter()
                    .find(|m| m.name.eq_ignore_ascii_case(name));
                let (position, line, detail) = match near_miss {
                    Some(m) => (
                        m.name_start,
                        Some(source.line(m.name_start)),
                        format!("missing method {name} (found '{}' instead)", m.name),
                    ),
                    None => (source.masked.len(), None, format!("missing method {name}")),
                };
                sink.push(position, line, detail);
            }
            [decl] => {
                // The fuzz entry is the last name in the triple.
                if slot == 2 {
                    check_fuzz_params(source, decl, fuzz_param_type, sink);
                }
            }
            [_, rest @ ..] => {
                for decl in rest {
                    sink.push(
                        decl.name_start,
                        Some(source.line(decl.name_start)),
                        format!("method {name} declared {} times", decls.len()),
                    );
                }
            }
        }
    }
}

fn check_fuzz_params(
    source: &Source<'_>,
    decl: &MethodDecl,
    expected_type: Option<&str>,
    sink: &mut Sink<'_>,
) {
    let line = Some(source.line(decl.name_start));
    match decl.params.as_slice() {
        [param] => {
            if let Some(expected) = expected_type
                && param.type_name != expected
            {
                sink.push(
                    decl.name_start,
                    line,
                    format!(
                        "{} takes {} but must take {expected}",
                        decl.name, param.type_name
                    ),
                );
            }
        }
        params => sink.push(
            decl.name_start,
            line,
            format!(
                "{} must take exactly one parameter, found {}",
                decl.name,
                params.len()
            ),
        ),
    }
}

fn check_resources(
    source: &Source<'_>,
    closeable_types: &[String],
    release_method: &str,
    entry: &str,
    sink: &mut Sink<'_>,
) {
    let Some(method) = source.first_method(entry) else {
        return;
    };
    let body = method.body.clone();
    let masked = source.masked.as_str();

    let headers = try_headers(masked, body.clone());

    let mut created: Vec<(usize, &str)> = closeable_types
        .iter()
        .flat_map(|ty| {
            scan::constructions(masked, body.clone(), ty)
                .into_iter()
                .map(move |offset| (offset, ty.as_str()))
        })
        .collect();
    created.sort_unstable();

    for (offset, ty) in created {
        if headers.iter().any(|h| h.contains(&offset)) {
            continue;
        }
        let binding = bound_variable(masked, body.start, offset);
        let released = binding.as_deref().is_some_and(|var| {
            statement_end(masked, offset, body.end).is_some_and(|end| {
                released_by_next_try(masked, end + 1, body.end, var, release_method)
            })
        });
        if released {
            continue;
        }
        let line = source.line(offset);
        let detail = match binding {
            Some(var) => format!(
                "{var} = new {ty}(...) at line {line} is not released with {var}.{release_method}() in the finally block of a try that directly follows it"
            ),
            None => format!(
                "new {ty}(...) at line {line} is not in a try-with-resources header"
            ),
        };
        sink.push(offset, Some(line), detail);
    }
}

/// Ranges inside `try ( ... )` resource headers.
fn try_headers(masked: &str, body: Range<usize>) -> Vec<Range<usize>> {
    keyword_blocks(masked, body, "try", b'(')
}

/// Offset of the `;` ending the statement that contains `offset`.
///
/// `None` when the enclosing block closes first.
fn statement_end(masked: &str, offset: usize, limit: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, b) in masked.as_bytes()[..limit].iter().enumerate().skip(offset) {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.checked_sub(1)?,
            b';' if depth == 0 => return Some(idx),
            _ => {}
        }
    }
    None
}

/// Whether the statement starting at `at` is a `try` whose `finally` block
/// calls `var.release_method`. The `try` must be the very next statement.
fn released_by_next_try(
    masked: &str,
    at: usize,
    limit: usize,
    var: &str,
    release_method: &str,
) -> bool {
    let bytes = &masked.as_bytes()[..limit];
    let Some(mut cursor) = keyword_at(bytes, at, "try") else {
        return false;
    };
    cursor = skip_ws(bytes, cursor);
    if bytes.get(cursor) == Some(&b'(') {
        let Some(close) = scan::matching_close(masked, cursor) else {
            return false;
        };
        cursor = skip_ws(bytes, close + 1);
    }
    let Some(mut cursor) = block_end(masked, bytes, cursor) else {
        return false;
    };
    while let Some(after) = keyword_at(bytes, cursor, "catch") {
        let open = skip_ws(bytes, after);
        if bytes.get(open) != Some(&b'(') {
            return false;
        }
        let Some(close) = scan::matching_close(masked, open) else {
            return false;
        };
        let Some(end) = block_end(masked, bytes, skip_ws(bytes, close + 1)) else {
            return false;
        };
        cursor = end;
    }
    let Some(after) = keyword_at(bytes, cursor, "finally") else {
        return false;
    };
    let open = skip_ws(bytes, after);
    if bytes.get(open) != Some(&b'{') {
        return false;
    }
    let Some(close) = scan::matching_close(masked, open) else {
        return false;
    };
    scan::member_accesses(masked, open + 1..close, var)
        .iter()
        .any(|access| access.member == release_method)
}

fn skip_ws(bytes: &[u8], mut at: usize) -> usize {
    while bytes.get(at).is_some_and(u8::is_ascii_whitespace) {
        at += 1;
    }
    at
}

/// Offset just past `keyword` when it is the next word at or after `at`.
fn keyword_at(bytes: &[u8], at: usize, keyword: &str) -> Option<usize> {
    let start = skip_ws(bytes, at);
    let end = start + keyword.len();
    let word_ends = bytes
        .get(end)
        .is_none_or(|b| !(b.is_ascii_alphanumeric() || *b == b'_' || *b == b'$'));
    (bytes.get(start..end) == Some(keyword.as_bytes()) && word_ends).then_some(end)
}

/// Offset just past the `{ ... }` block opening at `open`.
fn block_end(masked: &str, bytes: &[u8], open: usize) -> Option<usize> {
    if bytes.get(open) != Some(&b'{') {
        return None;
    }
    scan::matching_close(masked, open).map(|close| close + 1)
}

fn keyword_blocks(masked: &str, body: Range<usize>, keyword: &str, open: u8) -> Vec<Range<usize>> {
    let pattern = format!(r"\b{keyword}\s*\{}", open as char);
    let Ok(re) = regex::Regex::new(&pattern) else {
        return Vec::new();
    };
    re.find_iter(&masked[body.clone()])
        .filter_map(|m| {
            let open_at = body.start + m.end() - 1;
            let close_at = scan::matching_close(masked, open_at)?;
            Some(open_at + 1..close_at)
        })
        .collect()
}

/// Variable a construction is assigned to, looking through wrapping
/// constructors (`r = new BufferedReader(new StringReader(s))`).
fn bound_variable(masked: &str, body_start: usize, offset: usize) -> Option<String> {
    use std::sync::LazyLock;

    use regex::Regex;

    static WRAPPER: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"new\s+[\w$.]+\s*(?:<[^<>;()]*>)?\s*\(\s*$").expect("static regex")
    });
    static ASSIGNED: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"([A-Za-z_$][\w$]*)\s*=\s*$").expect("static regex"));

    let statement_start = masked[body_start..offset]
        .rfind([';', '{', '}'])
        .map_or(body_start, |idx| body_start + idx + 1);
    let mut prefix = &masked[statement_start..offset];
    while let Some(wrapper) = WRAPPER.find(prefix) {
        prefix = &prefix[..wrapper.start()];
    }
    ASSIGNED
        .captures(prefix)
        .and_then(|caps| caps.get(1))
        .map(|name| name.as_str().to_string())
}

fn check_construction(
    source: &Source<'_>,
    target: &TargetUnderTest,
    entry: &str,
    initializer: &str,
    sink: &mut Sink<'_>,
) {
    let Some(method) = source.first_method(entry) else {
        return;
    };
    let masked = source.masked.as_str();
    let type_name = target.type_name.as_str();

    let constructed_early = scan::constructions(masked, 0..masked.len(), type_name)
        .into_iter()
        .any(|offset| {
            !scan::inside_any(&source.methods, offset)
                || source
                    .first_method(initializer)
                    .is_some_and(|init| init.body.contains(&offset))
        });
    if constructed_early {
        return;
    }

    let first_in_entry = scan::constructions(masked, method.body.clone(), type_name)
        .into_iter()
        .min();

    let mut receivers: BTreeSet<String> = field_vars(source, type_name).into_iter().collect();
    receivers.extend(
        scan::declared_vars(masked, method.body.clone(), type_name)
            .into_iter()
            .map(|(name, _)| name),
    );

    let mut uses: Vec<usize> = receivers
        .iter()
        .flat_map(|var| scan::member_accesses(masked, method.body.clone(), var))
        .filter(|access| access.member == target.method)
        .map(|access| access.offset)
        .collect();
    uses.sort_unstable();
    uses.dedup();

    for offset in uses {
        if first_in_entry.is_some_and(|constructed| constructed < offset) {
            continue;
        }
        let line = source.line(offset);
        let detail = match first_in_entry {
            Some(constructed) => format!(
                "{type_name}.{} called at line {line} before {type_name} is constructed at line {}",
                target.method,
                source.line(constructed)
            ),
            None => format!(
                "{type_name}.{} called at line {line} but {type_name} is never constructed",
                target.method
            ),
        };
        sink.push(offset, Some(line), detail);
    }
}
