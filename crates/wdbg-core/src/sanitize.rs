//! Output sanitizer: raw debugger text → clean lines for an agent.
//!
//! Pure functions, no I/O, no shared state. Nothing here can fail; input
//! that doesn't look like cdb output comes back with only line endings and
//! control characters normalized.
//!
//! Cleanup steps, in order:
//! 1. Split on `\r\n`, `\n` and lone `\r`.
//! 2. Remove ANSI escape sequences and control characters (tab is kept),
//!    trim trailing whitespace.
//! 3. Drop the leading banner block (version line, copyright line and the
//!    blank lines around them).
//! 4. Strip prompt echoes from the front of the first line.
//! 5. Drop trailing lines that are only prompts, then surrounding blanks.
//!
//! Only the edges are touched. Prompt-shaped text in the middle of output
//! (e.g. a memory dump containing `0:000> `) is preserved.

use std::sync::OnceLock;

use regex::Regex;

use crate::prompt::{is_prompt_line, strip_prompt_prefix};

/// Lines that make up the one-time startup banner.
const BANNER_PREFIXES: &[&str] = &[
    "Microsoft (R) Windows Debugger Version",
    "Copyright (c) Microsoft Corporation",
];

fn ansi_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").ok())
        .as_ref()
}

/// Cleans a raw output blob.
pub fn clean(raw: &str) -> Vec<String> {
    clean_lines(&[raw])
}

/// Cleans output that has already been split into lines.
///
/// Lines may still contain embedded `\r` or `\n`; they are split further.
pub fn clean_lines<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    let mut lines: Vec<String> = raw
        .iter()
        .flat_map(|chunk| split_lines(chunk.as_ref()))
        .map(|line| strip_control(&line))
        .collect();

    drop_banner(&mut lines);

    if let Some(first) = lines.first_mut() {
        let stripped = strip_prompt_prefix(first);
        if stripped.len() != first.len() {
            *first = stripped.to_string();
        }
    }

    while lines
        .last()
        .is_some_and(|l| l.trim().is_empty() || is_prompt_line(l))
    {
        lines.pop();
    }

    let leading_blanks = lines.iter().take_while(|l| l.trim().is_empty()).count();
    lines.drain(..leading_blanks);

    lines
}

/// Splits on `\r\n`, `\n` and lone `\r`.
fn split_lines(text: &str) -> Vec<String> {
    text.replace("\r\n", "\n")
        .split(['\n', '\r'])
        .map(str::to_string)
        .collect()
}

/// Removes ANSI escapes and control characters, trims trailing whitespace.
fn strip_control(line: &str) -> String {
    let without_ansi = match ansi_regex() {
        Some(re) => re.replace_all(line, ""),
        None => std::borrow::Cow::Borrowed(line),
    };
    without_ansi
        .chars()
        .filter(|c| !c.is_control() || *c == '\t')
        .collect::<String>()
        .trim_end()
        .to_string()
}

fn is_banner_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    BANNER_PREFIXES.iter().any(|prefix| trimmed.starts_with(prefix))
}

/// Drops the banner block if the output starts with one.
fn drop_banner(lines: &mut Vec<String>) {
    let block = lines
        .iter()
        .take_while(|l| l.trim().is_empty() || is_banner_line(l))
        .count();
    let has_banner = lines.iter().take(block).any(|l| is_banner_line(l));
    if has_banner {
        lines.drain(..block);
    }
}
