//! Per-object interaction history and the prompt format built from it.
//!
//! The structured log is the source of truth. It is only turned into text at
//! the oracle boundary, in a fixed layout:
//!
//! ```text
//! <preamble>
//! Q: copy()
//! A: true
//! Q: release()
//! A:
//! ```
//!
//! Replies are parsed fail-closed: only a first non-empty line of exactly
//! `true` counts as a yes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle events that reach the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Copy,
    Assign,
    Release,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Copy => "copy",
            EventKind::Assign => "assign",
            EventKind::Release => "release",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One answered question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub event: EventKind,
    pub verdict: bool,
}

/// Append-only record of the oracle's answers about one control block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionLog {
    records: Vec<Record>,
}

impl InteractionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, event: EventKind, verdict: bool) {
        self.records.push(Record { event, verdict });
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Past Q/A pairs, one `Q: <event>()\nA: <verdict>\n` block per record.
    pub fn render_history(&self) -> String {
        let mut out = String::new();
        for record in &self.records {
            out.push_str(&format!(
                "Q: {}()\nA: {}\n",
                record.event, record.verdict
            ));
        }
        out
    }
}

/// Fixed instructions that open every lifecycle prompt.
pub fn system_preamble(type_tag: &str) -> String {
    format!(
        "You decide the lifecycle of a reference-counted object of type '{}'.\n\
         Answer each question with exactly one word: true or false. Output nothing else.\n",
        type_tag
    )
}

/// Full prompt: preamble, rendered history, then the open question.
pub fn render(preamble: &str, history: &InteractionLog, event: EventKind) -> String {
    let mut prompt = String::with_capacity(preamble.len() + history.len() * 24 + 16);
    prompt.push_str(preamble);
    prompt.push_str(&history.render_history());
    prompt.push_str(&format!("Q: {}()\nA:", event));
    prompt
}

/// `true` iff the first non-empty line of the reply, trimmed, is exactly `true`.
pub fn parse_verdict(reply: &str) -> bool {
    reply
        .split('\n')
        .map(|line| line.trim_matches('\r').trim())
        .find(|line| !line.is_empty())
        == Some("true")
}
