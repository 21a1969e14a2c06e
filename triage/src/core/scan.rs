//! Lexical scanning helpers for Java-like harness sources.
//!
//! Everything works on a *masked* copy of the source in which comments and
//! the contents of string, char, and text-block literals are replaced with
//! spaces. Masking keeps byte offsets and newlines intact, so positions found
//! in the masked text map directly onto the original.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    LineComment,
    BlockComment,
    Str,
    Char,
    TextBlock,
}

/// Blank out comments and literal contents. Quote delimiters are kept.
pub fn mask(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut state = State::Code;
    let mut i = 0;

    let blank = |out: &mut Vec<u8>, b: u8| out.push(if b == b'\n' { b'\n' } else { b' ' });

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match state {
            State::Code => {
                if b == b'/' && next == Some(b'/') {
                    out.extend_from_slice(b"  ");
                    i += 2;
                    state = State::LineComment;
                    continue;
                }
                if b == b'/' && next == Some(b'*') {
                    out.extend_from_slice(b"  ");
                    i += 2;
                    state = State::BlockComment;
                    continue;
                }
                if bytes[i..].starts_with(b"\"\"\"") {
                    out.extend_from_slice(b"\"\"\"");
                    i += 3;
                    state = State::TextBlock;
                    continue;
                }
                if b == b'"' {
                    state = State::Str;
                } else if b == b'\'' {
                    state = State::Char;
                }
                out.push(b);
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Code;
                }
                blank(&mut out, b);
            }
            State::BlockComment => {
                if b == b'*' && next == Some(b'/') {
                    out.extend_from_slice(b"  ");
                    i += 2;
                    state = State::Code;
                    continue;
                }
                blank(&mut out, b);
            }
            State::Str | State::Char => {
                let close = if state == State::Str { b'"' } else { b'\'' };
                if b == b'\\' {
                    blank(&mut out, b);
                    if let Some(escaped) = next {
                        blank(&mut out, escaped);
                    }
                    i += 2;
                    continue;
                }
                if b == close || b == b'\n' {
                    // A bare newline ends an unterminated literal.
                    state = State::Code;
                    out.push(b);
                } else {
                    blank(&mut out, b);
                }
            }
            State::TextBlock => {
                if b == b'\\' {
                    blank(&mut out, b);
                    if let Some(escaped) = next {
                        blank(&mut out, escaped);
                    }
                    i += 2;
                    continue;
                }
                if bytes[i..].starts_with(b"\"\"\"") {
                    out.extend_from_slice(b"\"\"\"");
                    i += 3;
                    state = State::Code;
                    continue;
                }
                blank(&mut out, b);
            }
        }
        i += 1;
    }

    // An escape as the very last byte can push one byte past the input.
    out.truncate(bytes.len());
    String::from_utf8_lossy(&out).into_owned()
}

/// Byte offset to 1-based line number.
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(idx, _)| idx + 1))
            .collect();
        Self { starts }
    }

    pub fn line(&self, offset: usize) -> usize {
        match self.starts.binary_search(&offset) {
            Ok(idx) => idx + 1,
            Err(idx) => idx,
        }
    }
}

/// Index of the delimiter closing the one at `open`.
pub fn matching_close(masked: &str, open: usize) -> Option<usize> {
    let bytes = masked.as_bytes();
    let (open_b, close_b) = match bytes.get(open)? {
        b'{' => (b'{', b'}'),
        b'(' => (b'(', b')'),
        b'[' => (b'[', b']'),
        _ => return None,
    };
    let mut depth = 0usize;
    for (idx, b) in bytes.iter().enumerate().skip(open) {
        if *b == open_b {
            depth += 1;
        } else if *b == close_b {
            depth -= 1;
            if depth == 0 {
                return Some(idx);
            }
        }
    }
    None
}

/// A declared method parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Simple type name, without package, generics, or array suffixes.
    pub type_name: String,
    pub name: String,
}

/// A method or constructor declaration with a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDecl {
    pub name: String,
    pub name_start: usize,
    pub params: Vec<Param>,
    /// Byte range strictly inside the braces.
    pub body: Range<usize>,
}

const NOT_METHODS: &[&str] = &[
    "if",
    "for",
    "while",
    "switch",
    "catch",
    "synchronized",
    "try",
    "do",
    "else",
    "return",
    "new",
    "throw",
];

static CALL_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z_$][\w$]*)\s*\(").expect("static regex"));
static THROWS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*throws\s+[\w$.]+(?:\s*,\s*[\w$.]+)*").expect("static regex")
});
static CLASS_DECL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bclass\s+([A-Za-z_$][\w$]*)").expect("static regex"));

/// Find every method declaration with a body, in source order.
pub fn find_methods(masked: &str) -> Vec<MethodDecl> {
    let mut methods = Vec::new();
    for caps in CALL_LIKE.captures_iter(masked) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if NOT_METHODS.contains(&name.as_str()) {
            continue;
        }
        let before = masked[..name.start()].trim_end();
        if before.ends_with('.') || ends_with_word(before, "new") {
            continue;
        }
        let open_paren = whole.end() - 1;
        let Some(close_paren) = matching_close(masked, open_paren) else {
            continue;
        };
        let mut rest = close_paren + 1;
        if let Some(throws) = THROWS.find(&masked[rest..]) {
            rest += throws.end();
        }
        let after = &masked[rest..];
        let skipped = after.len() - after.trim_start().len();
        let body_open = rest + skipped;
        if masked.as_bytes().get(body_open) != Some(&b'{') {
            continue;
        }
        let Some(body_close) = matching_close(masked, body_open) else {
            continue;
        };
        methods.push(MethodDecl {
            name: name.as_str().to_string(),
            name_start: name.start(),
            params: parse_params(&masked[open_paren + 1..close_paren]),
            body: body_open + 1..body_close,
        });
    }
    methods
}

fn ends_with_word(text: &str, word: &str) -> bool {
    text.strip_suffix(word).is_some_and(|head| {
        head.chars()
            .next_back()
            .is_none_or(|c| !(c.is_alphanumeric() || c == '_' || c == '$'))
    })
}

/// Split a parameter list on top-level commas.
pub fn parse_params(list: &str) -> Vec<Param> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (idx, c) in list.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&list[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&list[start..]);

    parts
        .into_iter()
        .filter_map(|part| {
            let tokens: Vec<&str> = part
                .split_whitespace()
                .filter(|tok| *tok != "final" && !tok.starts_with('@'))
                .collect();
            let (name, type_tokens) = tokens.split_last()?;
            let raw_type = type_tokens.join(" ");
            if raw_type.is_empty() {
                return None;
            }
            Some(Param {
                type_name: simple_type(&raw_type),
                name: name.trim_start_matches("...").to_string(),
            })
        })
        .collect()
}

/// `java.util.List<String>[]` becomes `List`.
fn simple_type(raw: &str) -> String {
    let base = raw.split('<').next().unwrap_or(raw);
    let base = base.trim_end_matches("...").trim_end_matches("[]").trim();
    base.rsplit('.').next().unwrap_or(base).trim().to_string()
}

/// Declared class names with their offsets.
pub fn find_classes(masked: &str) -> Vec<(String, usize)> {
    CLASS_DECL
        .captures_iter(masked)
        .filter_map(|caps| {
            let name = caps.get(1)?;
            Some((name.as_str().to_string(), name.start()))
        })
        .collect()
}

/// Variables declared with type `type_name` inside `range`, with offsets.
///
/// Matches parameters, locals, and fields (`T x =`, `T x;`, `T x,`, `T x)`).
pub fn declared_vars(masked: &str, range: Range<usize>, type_name: &str) -> Vec<(String, usize)> {
    let pattern = format!(
        r"\b(?:[\w$]+\s*\.\s*)*{}\b(?:\s*<[^<>;()]*>)?(?:\s*\[\s*\])*\s+([A-Za-z_$][\w$]*)\s*([=;,)])",
        regex::escape(type_name)
    );
    let Ok(re) = Regex::new(&pattern) else {
        return Vec::new();
    };
    let region = &masked[range.clone()];
    re.captures_iter(region)
        .filter_map(|caps| {
            let name = caps.get(1)?;
            if name.as_str() == "instanceof" {
                return None;
            }
            Some((name.as_str().to_string(), range.start + name.start()))
        })
        .collect()
}

/// A `receiver.member` occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberAccess {
    pub member: String,
    pub offset: usize,
}

/// Every `receiver.member` access inside `range` where `receiver` is exactly
/// the given identifier (not itself a member of something else).
pub fn member_accesses(masked: &str, range: Range<usize>, receiver: &str) -> Vec<MemberAccess> {
    let pattern = format!(
        r"\b{}\s*\.\s*([A-Za-z_$][\w$]*)",
        regex::escape(receiver)
    );
    let Ok(re) = Regex::new(&pattern) else {
        return Vec::new();
    };
    let region = &masked[range.clone()];
    re.captures_iter(region)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let member = caps.get(1)?;
            if region[..whole.start()].trim_end().ends_with('.') {
                return None;
            }
            Some(MemberAccess {
                member: member.as_str().to_string(),
                offset: range.start + whole.start(),
            })
        })
        .collect()
}

/// Offsets of `new T(` (optionally package-qualified or generic) in `range`.
pub fn constructions(masked: &str, range: Range<usize>, type_name: &str) -> Vec<usize> {
    let pattern = format!(
        r"\bnew\s+(?:[\w$]+\s*\.\s*)*{}\s*(?:<[^<>;()]*>)?\s*\(",
        regex::escape(type_name)
    );
    let Ok(re) = Regex::new(&pattern) else {
        return Vec::new();
    };
    re.find_iter(&masked[range.clone()])
        .map(|m| range.start + m.start())
        .collect()
}

/// Whether `offset` falls inside any method body.
pub fn inside_any(methods: &[MethodDecl], offset: usize) -> bool {
    methods.iter().any(|m| m.body.contains(&offset))
}
