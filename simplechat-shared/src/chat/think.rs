//! Separation of `<think>` reasoning spans from the visible answer.
//!
//! [`split`] re-scans the whole buffer on every call, which is simple and
//! handles markers split across tokens, but costs O(n²) over a long
//! response. [`ThinkTracker`] produces the same output while only scanning
//! text that has not been settled yet.

use serde::{Deserialize, Serialize};

/// Opens a reasoning span.
pub const THINK_START: &str = "<think>";
/// Closes a reasoning span.
pub const THINK_END: &str = "</think>";

/// Result of separating reasoning from the answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThinkSplit {
    /// Trimmed inner text of every closed think span, in order.
    pub segments: Vec<String>,
    /// The text with every closed span removed, trimmed.
    pub visible: String,
}

/// Splits `text` into reasoning segments and visible text.
///
/// Markers match ASCII case-insensitively and pair lazily, each start with
/// the first end after it. Anything after a start marker that has no end yet
/// is hidden from both parts.
#[must_use]
pub fn split(text: &str) -> ThinkSplit {
    let mut segments = Vec::new();
    let mut visible = String::with_capacity(text.len());
    let mut pos = 0;

    while let Some(start) = find_marker(text, THINK_START, pos) {
        visible.push_str(&text[pos..start]);
        let inner = start + THINK_START.len();
        let Some(end) = find_marker(text, THINK_END, inner) else {
            return ThinkSplit {
                segments,
                visible: visible.trim().to_string(),
            };
        };
        segments.push(text[inner..end].trim().to_string());
        pos = end + THINK_END.len();
    }
    visible.push_str(&text[pos..]);

    ThinkSplit {
        segments,
        visible: visible.trim().to_string(),
    }
}

fn find_marker(text: &str, marker: &str, from: usize) -> Option<usize> {
    let needle = marker.as_bytes();
    text.as_bytes()
        .get(from..)?
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
        .map(|offset| from + offset)
}

/// Incremental equivalent of [`split`] for a growing buffer.
///
/// Everything before `settled` has been classified for good; only the tail
/// is re-scanned when tokens arrive.
#[derive(Debug, Clone, Default)]
pub struct ThinkTracker {
    buffer: String,
    settled: usize,
    settled_visible: String,
    segments: Vec<String>,
    open_at: Option<usize>,
}

impl ThinkTracker {
    /// An empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a token and returns the updated split.
    pub fn push(&mut self, token: &str) -> ThinkSplit {
        self.buffer.push_str(token);
        self.advance();
        self.snapshot()
    }

    /// Everything pushed so far.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.buffer
    }

    /// The split of [`raw`](Self::raw), equal to [`split`] of it.
    #[must_use]
    pub fn snapshot(&self) -> ThinkSplit {
        let mut visible = self.settled_visible.clone();
        if self.open_at.is_none() {
            visible.push_str(&self.buffer[self.settled..]);
        }

        ThinkSplit {
            segments: self.segments.clone(),
            visible: visible.trim().to_string(),
        }
    }

    fn advance(&mut self) {
        loop {
            let start = match self.open_at {
                Some(start) => start,
                None => match find_marker(&self.buffer, THINK_START, self.settled) {
                    Some(start) => {
                        self.settled_visible
                            .push_str(&self.buffer[self.settled..start]);
                        self.settled = start;
                        self.open_at = Some(start);
                        start
                    }
                    None => {
                        self.settle_plain_tail();
                        return;
                    }
                },
            };

            let inner = start + THINK_START.len();
            let Some(end) = find_marker(&self.buffer, THINK_END, inner) else {
                return;
            };
            self.segments
                .push(self.buffer[inner..end].trim().to_string());
            self.settled = end + THINK_END.len();
            self.open_at = None;
        }
    }

    /// Settles text that can no longer become part of a start marker.
    fn settle_plain_tail(&mut self) {
        let keep = THINK_START.len() - 1;
        let mut safe_end = self.buffer.len().saturating_sub(keep).max(self.settled);
        while !self.buffer.is_char_boundary(safe_end) {
            safe_end -= 1;
        }
        self.settled_visible
            .push_str(&self.buffer[self.settled..safe_end]);
        self.settled = safe_end;
    }
}
