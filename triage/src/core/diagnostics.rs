//! Build-log parsing into grouped compiler diagnostics.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::harness::Diagnostic;

static ANSI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("static regex")
});
/// `path:line[:col]: severity: message`
static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+?):(\d+)(?::\d+)?:\s*(error|fatal error|warning|note):\s*(.*)$")
        .expect("static regex")
});
static SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\d+\s+(?:errors?|warnings?)(?:\s+generated\.?)?\s*$").expect("static regex")
});

const LINKER_PREFIXES: &[&str] = &["/usr/bin/ld: ", "ld.lld: ", "ld: "];

pub fn strip_ansi(text: &str) -> String {
    ANSI.replace_all(text, "").into_owned()
}

#[derive(Debug)]
struct Block {
    location: Option<String>,
    lines: Vec<String>,
    keep: bool,
}

fn close(current: &mut Option<Block>, blocks: &mut Vec<Block>) {
    if let Some(block) = current.take() {
        blocks.push(block);
    }
}

impl Block {
    fn into_diagnostic(self) -> Option<Diagnostic> {
        if !self.keep || self.lines.is_empty() {
            return None;
        }
        Some(Diagnostic {
            message: self.lines.join("\n"),
            location: self.location,
        })
    }
}

/// Group a build log into at most `max` error diagnostics.
///
/// A `path:line[:col]: severity: message` header starts a block; `note:`
/// headers and indented continuation lines attach to the open block; linker
/// lines start their own block; `N errors` summary lines close the block and
/// are dropped. Warning-only blocks are discarded.
pub fn parse_build_log(log: &str, max: usize) -> Vec<Diagnostic> {
    let clean = strip_ansi(log);
    let mut blocks: Vec<Block> = Vec::new();
    let mut current: Option<Block> = None;

    for raw in clean.lines() {
        let line = raw.trim_end();
        if line.trim().is_empty() {
            continue;
        }

        if SUMMARY.is_match(line) {
            close(&mut current, &mut blocks);
            continue;
        }

        if let Some(caps) = HEADER.captures(line) {
            let severity = caps.get(3).map_or("", |m| m.as_str());
            if severity == "note" {
                if let Some(block) = current.as_mut() {
                    block.lines.push(line.to_string());
                }
                continue;
            }
            close(&mut current, &mut blocks);
            let location = match (caps.get(1), caps.get(2)) {
                (Some(path), Some(row)) => Some(format!("{}:{}", path.as_str(), row.as_str())),
                _ => None,
            };
            current = Some(Block {
                location,
                lines: vec![line.to_string()],
                keep: severity != "warning",
            });
            continue;
        }

        if let Some(rest) = LINKER_PREFIXES
            .iter()
            .find_map(|prefix| line.strip_prefix(prefix))
        {
            close(&mut current, &mut blocks);
            current = Some(Block {
                location: None,
                lines: vec![rest.to_string()],
                keep: true,
            });
            continue;
        }

        if raw.starts_with([' ', '\t'])
            && let Some(block) = current.as_mut()
        {
            block.lines.push(line.to_string());
        } else {
            close(&mut current, &mut blocks);
        }
    }
    close(&mut current, &mut blocks);

    blocks
        .into_iter()
        .filter_map(Block::into_diagnostic)
        .take(max)
        .collect()
}

/// Location-less diagnostic holding the last `max_lines` lines of a log.
pub fn log_tail(log: &str, max_lines: usize) -> Diagnostic {
    let clean = strip_ansi(log);
    let lines: Vec<&str> = clean.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max_lines);
    Diagnostic::new(lines[start..].join("\n"))
}
