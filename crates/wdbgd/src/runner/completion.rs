//! Completion detection for cdb output.
//!
//! cdb has no framing on its output, so the end of a command is inferred.
//! Each command is followed by `.echo WDBG_<nonce>_<seq>_DONE`; the rules,
//! applied line by line as bytes arrive:
//!
//! 1. A line containing the marker for the current `seq` ends the command.
//!    Text before the marker on that line (usually a prompt, sometimes the
//!    last unterminated output line) is kept.
//! 2. A line containing the marker of an *earlier* `seq` belongs to a
//!    command that already returned `TimedOut`. Everything collected so far
//!    is that command's late output and is discarded.
//! 3. A marker preceded by `.echo` is the input being echoed back, not the
//!    debugger's answer, and is dropped.
//! 4. The unterminated tail is tracked separately. When it is exactly a
//!    prompt and the current command has produced output, the caller may
//!    treat a quiet period as completion (idle-prompt fallback).
//!
//! Output is capped at `MAX_OUTPUT_LINES` lines of at most `MAX_LINE_BYTES`
//! bytes; anything past the cap sets `truncated`.

use regex::Regex;
use wdbg_core::is_prompt_line;

use super::RunnerError;

/// Maximum lines kept per command.
pub const MAX_OUTPUT_LINES: usize = 50_000;

/// Maximum bytes kept per line. An unterminated tail longer than this is
/// flushed as a line of its own.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Whether a command's output is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    Pending,
    Completed,
}

// ============================================================================
// Markers
// ============================================================================

/// Generates and recognises the per-command completion markers of one
/// debugger process.
#[derive(Debug)]
pub(crate) struct MarkerSet {
    nonce: String,
    pattern: Regex,
}

impl MarkerSet {
    /// Creates a marker set for the given nonce (alphanumeric).
    pub(crate) fn new(nonce: &str) -> Result<Self, RunnerError> {
        let pattern = Regex::new(&format!(r"WDBG_{}_(\d+)_DONE", regex::escape(nonce)))
            .map_err(|e| RunnerError::Marker(e.to_string()))?;
        Ok(Self {
            nonce: nonce.to_string(),
            pattern,
        })
    }

    /// Marker text for a command sequence number.
    pub(crate) fn marker(&self, seq: u64) -> String {
        format!("WDBG_{}_{seq}_DONE", self.nonce)
    }

    /// Finds a marker in a line: `(seq, byte offset where it starts)`.
    fn find(&self, line: &str) -> Option<(u64, usize)> {
        let captures = self.pattern.captures(line)?;
        let whole = captures.get(0)?;
        let seq = captures.get(1)?.as_str().parse().ok()?;
        Some((seq, whole.start()))
    }
}

// ============================================================================
// Output Collector
// ============================================================================

/// Accumulates output for the command currently in flight.
#[derive(Debug)]
pub(crate) struct OutputCollector {
    markers: MarkerSet,
    tail: Vec<u8>,
    tail_is_fresh: bool,
    lines: Vec<String>,
    truncated: bool,
}

impl OutputCollector {
    pub(crate) fn new(markers: MarkerSet) -> Self {
        Self {
            markers,
            tail: Vec::new(),
            tail_is_fresh: false,
            lines: Vec::new(),
            truncated: false,
        }
    }

    pub(crate) fn markers(&self) -> &MarkerSet {
        &self.markers
    }

    /// Starts collecting for a new command.
    ///
    /// The unterminated tail is kept: it is normally the prompt that will
    /// prefix the new command's first line.
    pub(crate) fn begin(&mut self) {
        self.lines.clear();
        self.truncated = false;
        self.tail_is_fresh = false;
    }

    /// Feeds stdout bytes. Call with an empty slice to process complete
    /// lines left over from the previous command.
    pub(crate) fn push_bytes(&mut self, bytes: &[u8], seq: u64) -> Progress {
        let new_input = !bytes.is_empty();
        self.tail.extend_from_slice(bytes);

        while let Some(pos) = self.tail.iter().position(|b| *b == b'\n') {
            if new_input {
                self.tail_is_fresh = true;
            }
            let raw: Vec<u8> = self.tail.drain(..=pos).collect();
            let line = decode_line(&raw);
            if self.accept_line(line, seq) == Progress::Completed {
                return Progress::Completed;
            }
        }

        if self.tail.len() > MAX_LINE_BYTES {
            let raw = std::mem::take(&mut self.tail);
            let line = decode_line(&raw);
            return self.accept_line(line, seq);
        }

        Progress::Pending
    }

    /// Feeds a complete line from a secondary stream (stderr).
    pub(crate) fn push_line(&mut self, line: String, seq: u64) -> Progress {
        self.accept_line(line, seq)
    }

    /// Moves the unterminated tail into the output (used at EOF).
    pub(crate) fn flush_tail(&mut self) {
        if self.tail.is_empty() {
            return;
        }
        let raw = std::mem::take(&mut self.tail);
        let line = decode_line(&raw);
        self.push_output(line);
    }

    /// True if the tail is exactly a prompt and this command has produced
    /// at least one complete line. A prompt left over from the previous
    /// command does not count.
    pub(crate) fn tail_is_prompt(&self) -> bool {
        self.tail_is_fresh && is_prompt_line(&String::from_utf8_lossy(&self.tail))
    }

    /// Takes the collected lines and truncation flag.
    pub(crate) fn take(&mut self) -> (Vec<String>, bool) {
        (std::mem::take(&mut self.lines), self.truncated)
    }

    fn accept_line(&mut self, line: String, seq: u64) -> Progress {
        let Some((found, start)) = self.markers.find(&line) else {
            self.push_output(line);
            return Progress::Pending;
        };

        let before = line.get(..start).unwrap_or_default();
        if before.trim_end().ends_with(".echo") {
            return Progress::Pending;
        }

        if found == seq {
            if !before.trim().is_empty() {
                self.push_output(before.to_string());
            }
            Progress::Completed
        } else if found < seq {
            self.lines.clear();
            self.truncated = false;
            Progress::Pending
        } else {
            self.push_output(line);
            Progress::Pending
        }
    }

    fn push_output(&mut self, mut line: String) {
        if self.lines.len() >= MAX_OUTPUT_LINES {
            self.truncated = true;
            return;
        }
        if line.len() > MAX_LINE_BYTES {
            let mut cut = MAX_LINE_BYTES;
            while !line.is_char_boundary(cut) {
                cut -= 1;
            }
            line.truncate(cut);
            self.truncated = true;
        }
        self.lines.push(line);
    }
}

/// Decodes one raw line, dropping the line terminator.
fn decode_line(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.trim_end_matches(['\n', '\r']).to_string()
}
