//! Expectation engine
//!
//! Sends lines to a wallet session and waits, with a deadline, for one of an
//! ordered set of patterns to appear in its output. The output has no
//! framing: prompts, progress lines, JSON fragments and ANSI noise all
//! arrive interleaved and split at arbitrary byte boundaries, so matching is
//! done against the cleaned text accumulated since the previous match.

use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::Result;

use super::Transport;

/// Upper bound on unmatched output kept for matching (tail is kept)
const MAX_BUFFER_BYTES: usize = 256 * 1024;

/// Ordered (pattern, tag) pairs plus the time allowed for any of them
///
/// Patterns are tested in insertion order; the first pattern that matches
/// anywhere in the buffer wins, regardless of where the other patterns match.
#[derive(Debug, Clone)]
pub struct ExpectationSet<T> {
    patterns: Vec<(Regex, T)>,
    timeout: Duration,
}

impl<T: Copy> ExpectationSet<T> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            patterns: Vec::new(),
            timeout,
        }
    }

    /// Append a pattern with the next-lower priority
    pub fn expect(mut self, pattern: Regex, tag: T) -> Self {
        self.patterns.push((pattern, tag));
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn tags(&self) -> impl Iterator<Item = T> + '_ {
        self.patterns.iter().map(|(_, tag)| *tag)
    }

    /// First pattern (by priority) matching `text`
    fn find(&self, text: &str) -> Option<Matched<T>> {
        self.patterns.iter().find_map(|(pattern, tag)| {
            pattern.captures(text).map(|caps| {
                // Group 0 always participates in a match
                let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
                Matched {
                    tag: *tag,
                    captures: caps
                        .iter()
                        .map(|group| group.map(|m| m.as_str().to_string()))
                        .collect(),
                    before: text[..whole.start].to_string(),
                    text: text[whole.clone()].to_string(),
                    end: whole.end,
                }
            })
        })
    }
}

/// A successful match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matched<T> {
    pub tag: T,
    /// Capture groups, index 0 is the whole match
    pub captures: Vec<Option<String>>,
    /// Output between the previous match and this one
    pub before: String,
    /// The matched text itself
    pub text: String,
    end: usize,
}

impl<T> Matched<T> {
    pub fn capture(&self, index: usize) -> Option<&str> {
        self.captures.get(index).and_then(|c| c.as_deref())
    }

    /// Everything consumed by this match (`before` + `text`)
    pub fn transcript(&self) -> String {
        format!("{}{}", self.before, self.text)
    }
}

/// Result of waiting for an expectation set, exactly one of three
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectOutcome<T> {
    Matched(Matched<T>),
    /// Nothing matched before the deadline
    Timeout { seen: String },
    /// The process closed its output
    Eof { seen: String },
}

impl<T> ExpectOutcome<T> {
    pub fn is_matched(&self) -> bool {
        matches!(self, ExpectOutcome::Matched(_))
    }
}

/// Pattern-driven conversation with a [`Transport`]
pub struct Expecter<S> {
    transport: S,
    buffer: Vec<u8>,
}

impl<S: Transport> Expecter<S> {
    pub fn new(transport: S) -> Self {
        Self {
            transport,
            buffer: Vec::new(),
        }
    }

    /// Send one command line
    ///
    /// Output produced before the command cannot be its response, so it is
    /// dropped along with anything left unmatched in the buffer.
    pub async fn send(&mut self, line: &str) -> Result<()> {
        self.transport.discard_pending();
        self.buffer.clear();
        debug!("→ {}", line);
        self.transport.write_line(line).await
    }

    /// Wait for the first pattern of `set` to match
    pub async fn expect<T: Copy>(&mut self, set: &ExpectationSet<T>) -> ExpectOutcome<T> {
        let deadline = Instant::now() + set.timeout;

        loop {
            let text = self.text();
            if let Some(matched) = set.find(&text) {
                // Keep only what follows the match; it is already clean text
                self.buffer = text[matched.end..].as_bytes().to_vec();
                debug!("← matched {:?}", matched.text);
                return ExpectOutcome::Matched(matched);
            }

            match tokio::time::timeout_at(deadline, self.transport.read_chunk()).await {
                Ok(Some(chunk)) => {
                    self.buffer.extend_from_slice(&chunk);
                    self.trim();
                }
                Ok(None) => {
                    debug!("← EOF");
                    return ExpectOutcome::Eof { seen: text };
                }
                Err(_) => {
                    debug!("← timeout after {:?}", set.timeout);
                    return ExpectOutcome::Timeout { seen: text };
                }
            }
        }
    }

    /// Shut the underlying process down
    pub async fn close(&mut self) {
        self.transport.shutdown().await;
    }

    pub fn transport(&self) -> &S {
        &self.transport
    }

    /// Buffered output with ANSI escape sequences removed
    fn text(&self) -> String {
        let stripped = strip_ansi_escapes::strip(&self.buffer);
        String::from_utf8_lossy(&stripped).into_owned()
    }

    fn trim(&mut self) {
        if self.buffer.len() > MAX_BUFFER_BYTES {
            let excess = self.buffer.len() - MAX_BUFFER_BYTES;
            self.buffer.drain(..excess);
        }
    }
}
