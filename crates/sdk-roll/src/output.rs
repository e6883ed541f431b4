//! Child process output handling: line splitting, terminal-safe sanitising and
//! a bounded tail kept for failure reports.

use std::collections::VecDeque;
use std::io::{BufReader, Read};
use std::sync::mpsc;

const MAX_LINE_CHARS: usize = 4096;
const MAX_PENDING_BYTES: usize = 16 * 1024;

/// Lines of captured output attached to a failed command.
pub const FAILURE_TAIL_LINES: usize = 200;

enum Escape {
    Start,
    Csi,
    Osc,
    OscEsc,
    String,
    StringEsc,
}

/// Strips ANSI/OSC escape sequences and control characters, and truncates
/// very long lines.
pub fn sanitize_line(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_LINE_CHARS));
    let mut escape: Option<Escape> = None;
    let mut chars = 0usize;
    let mut truncated = false;

    for c in input.chars() {
        if let Some(state) = &escape {
            escape = match (state, c) {
                (Escape::Start, '[') => Some(Escape::Csi),
                (Escape::Start, ']') => Some(Escape::Osc),
                (Escape::Start, 'P' | 'X' | '^' | '_') => Some(Escape::String),
                (Escape::Start, _) => None,
                (Escape::Csi, '@'..='~') => None,
                (Escape::Csi, _) => Some(Escape::Csi),
                (Escape::Osc, '\x07') => None,
                (Escape::Osc, '\x1b') => Some(Escape::OscEsc),
                (Escape::Osc, _) => Some(Escape::Osc),
                (Escape::OscEsc, '\\') => None,
                (Escape::OscEsc, '\x1b') => Some(Escape::OscEsc),
                (Escape::OscEsc, _) => Some(Escape::Osc),
                (Escape::String, '\x1b') => Some(Escape::StringEsc),
                (Escape::String, _) => Some(Escape::String),
                (Escape::StringEsc, '\\') => None,
                (Escape::StringEsc, '\x1b') => Some(Escape::StringEsc),
                (Escape::StringEsc, _) => Some(Escape::String),
            };
            continue;
        }

        match c {
            '\x1b' => {
                escape = Some(Escape::Start);
                continue;
            }
            '\r' | '\n' => continue,
            '\t' => out.push(' '),
            c if c.is_control() || is_bidi_control(c) => continue,
            c => out.push(c),
        }
        chars += 1;
        if chars >= MAX_LINE_CHARS {
            truncated = true;
            break;
        }
    }

    if truncated {
        out.push_str(" ...[truncated]");
    }
    out
}

fn is_bidi_control(c: char) -> bool {
    matches!(c, '\u{061C}' | '\u{200E}' | '\u{200F}')
        || ('\u{202A}'..='\u{202E}').contains(&c)
        || ('\u{2066}'..='\u{2069}').contains(&c)
}

/// Reads `reader` to the end and forwards one message per output line.
/// `\r` counts as a line break so progress bars do not pile up.
pub fn read_output_stream<R: Read>(reader: R, tx: mpsc::Sender<String>) {
    let mut r = BufReader::new(reader);
    let mut buf = [0u8; 8192];
    let mut pending = Vec::with_capacity(1024);

    let flush = |pending: &mut Vec<u8>| {
        let line = String::from_utf8_lossy(pending).into_owned();
        pending.clear();
        let _ = tx.send(line);
    };

    loop {
        let n = match r.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for b in &buf[..n] {
            if *b == b'\n' || *b == b'\r' {
                if !pending.is_empty() {
                    flush(&mut pending);
                }
            } else {
                pending.push(*b);
                if pending.len() >= MAX_PENDING_BYTES {
                    flush(&mut pending);
                }
            }
        }
    }

    if !pending.is_empty() {
        flush(&mut pending);
    }
}

/// Keeps the last `cap` lines pushed into it.
#[derive(Debug, Clone)]
pub struct OutputTail {
    cap: usize,
    lines: VecDeque<String>,
    dropped: usize,
}

impl OutputTail {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            lines: VecDeque::new(),
            dropped: 0,
        }
    }

    pub fn push(&mut self, line: String) {
        while self.lines.len() >= self.cap {
            self.lines.pop_front();
            self.dropped += 1;
        }
        self.lines.push_back(line);
    }

    pub fn into_lines(self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.lines.len() + 1);
        if self.dropped > 0 {
            out.push(format!("... {} earlier lines omitted", self.dropped));
        }
        out.extend(self.lines);
        out
    }
}

impl Default for OutputTail {
    fn default() -> Self {
        Self::new(FAILURE_TAIL_LINES)
    }
}
