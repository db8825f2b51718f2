//! cdb prompt grammar.
//!
//! cdb prints its prompt without a trailing newline when it is ready for
//! input, so on a pipe the prompt ends up glued to the front of the next
//! output line. The grammar recognised here:
//!
//! ```text
//! 0:000>          user-mode, process:thread
//! 0:000:x86>      user-mode under WOW64, with effective machine
//! kd>             kernel-mode
//! 1: kd>          kernel-mode, multiprocessor
//! ```
//!
//! Regexes are compiled once. If compilation ever failed the helpers fall
//! back to "no prompt found" rather than panicking, which leaves the output
//! untouched.

use std::sync::OnceLock;

use regex::Regex;

/// One prompt, without anchors.
const PROMPT: &str = r"(?:\d+:\d+(?::[A-Za-z0-9_]+)?|(?:\d+: )?kd)> ?";

fn prompt_line_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(&format!(r"^\s*(?:{PROMPT}\s*)+$")).ok())
        .as_ref()
}

fn prompt_prefix_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(&format!(r"^(?:{PROMPT})+")).ok())
        .as_ref()
}

/// Returns true if the whole line is one or more prompts and whitespace.
///
/// Used both to drop a trailing prompt from command output and to detect an
/// idle debugger waiting for input.
pub fn is_prompt_line(line: &str) -> bool {
    prompt_line_regex().is_some_and(|re| re.is_match(line))
}

/// Strips leading prompts (`0:000> 0:000> text` → `text`).
pub fn strip_prompt_prefix(line: &str) -> &str {
    match prompt_prefix_regex().and_then(|re| re.find(line)) {
        Some(found) => line.get(found.end()..).unwrap_or(line),
        None => line,
    }
}
