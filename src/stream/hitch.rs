//! Hitch detection on the raw server output stream.
//!
//! The server reports long frames as
//! `hitch warning: frame time of <ms> milliseconds`. Output arrives in
//! arbitrary chunks, so a warning may be split anywhere, including in the
//! middle of the number.

use std::sync::LazyLock;

use regex::bytes::Regex;

const HITCH_PREFIX: &str = "hitch warning: frame time of ";
const HITCH_SUFFIX: &str = " milliseconds";

/// Longest text the pattern can match.
pub const MAX_MATCH_LEN: usize = HITCH_PREFIX.len() + 5 + HITCH_SUFFIX.len();

/// Most bytes kept between chunks. Anything older cannot be part of a match.
pub const MAX_PENDING: usize = MAX_MATCH_LEN - 1;

static HITCH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"hitch warning: frame time of (\d{3,5}) milliseconds")
        .expect("hitch pattern is valid")
});

/// Incremental matcher for hitch warnings.
#[derive(Debug, Default)]
pub struct HitchWatcher {
    pending: Vec<u8>,
}

impl HitchWatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of output and return the frame times completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<u32> {
        self.pending.extend_from_slice(chunk);

        let mut hits = Vec::new();
        let mut consumed = 0;
        for caps in HITCH_PATTERN.captures_iter(&self.pending) {
            if let Some(millis) = caps
                .get(1)
                .and_then(|m| std::str::from_utf8(m.as_bytes()).ok())
                .and_then(|s| s.parse::<u32>().ok())
            {
                hits.push(millis);
            }
            if let Some(whole) = caps.get(0) {
                consumed = whole.end();
            }
        }

        // The pattern never spans a line break.
        if let Some(nl) = self.pending[consumed..].iter().rposition(|b| *b == b'\n') {
            consumed += nl + 1;
        }

        let keep_from = self
            .pending
            .len()
            .saturating_sub(MAX_PENDING)
            .max(consumed);
        self.pending.drain(..keep_from);

        hits
    }

    /// Bytes currently held back waiting for the rest of a possible match.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
