//! Streamed response fragments and final text assembly.

use super::error::Error;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;

static THINK_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("think block regex must be valid"));

/// Remove every `<think>...</think>` span and trim surrounding whitespace.
///
/// Must run on the fully concatenated text: a tag may be split across
/// fragments.
#[must_use]
pub fn strip_reasoning(text: &str) -> String {
    THINK_BLOCK.replace_all(text, "").trim().to_string()
}

/// One decoded NDJSON object from a streamed response.
pub trait Fragment: DeserializeOwned {
    /// Text carried by this fragment, if any.
    fn text(&self) -> Option<&str>;
    /// Server-reported error, if any.
    fn error(&self) -> Option<&str>;
}

/// `/api/generate` fragment: `{"response": "...", "done": false}`.
#[derive(Debug, Deserialize)]
pub struct GenerateFragment {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl Fragment for GenerateFragment {
    fn text(&self) -> Option<&str> {
        self.response.as_deref()
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

#[derive(Debug, Deserialize)]
struct FragmentMessage {
    #[serde(default)]
    content: Option<String>,
}

/// `/api/chat` fragment: `{"message": {"role": "assistant", "content": "..."}}`.
#[derive(Debug, Deserialize)]
pub struct ChatFragment {
    #[serde(default)]
    message: Option<FragmentMessage>,
    #[serde(default)]
    error: Option<String>,
}

impl Fragment for ChatFragment {
    fn text(&self) -> Option<&str> {
        self.message.as_ref().and_then(|m| m.content.as_deref())
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Parse one NDJSON line into a fragment, surfacing server errors.
pub fn parse_fragment<F: Fragment>(line: &str) -> Result<F, Error> {
    let fragment: F = serde_json::from_str(line)
        .map_err(|e| Error::Stream(format!("Malformed response fragment: {e}: {line}")))?;
    if let Some(message) = fragment.error() {
        return Err(Error::Api(message.to_string()));
    }
    Ok(fragment)
}

/// Concatenates fragment text in arrival order.
#[derive(Debug, Default)]
pub struct ResponseCollector {
    text: String,
    fragments: usize,
}

impl ResponseCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment's text and return it for live forwarding.
    pub fn push<'a, F: Fragment>(&mut self, fragment: &'a F) -> Option<&'a str> {
        self.fragments += 1;
        let text = fragment.text().filter(|t| !t.is_empty())?;
        self.text.push_str(text);
        Some(text)
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }

    /// Raw concatenation so far.
    pub fn raw(&self) -> &str {
        &self.text
    }

    /// Final cleaned text.
    pub fn finish(self) -> String {
        strip_reasoning(&self.text)
    }
}

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Hides reasoning blocks from live text deltas.
///
/// Holds back any tail that could be the start of a tag until the next
/// delta decides it.
#[derive(Debug, Default)]
pub struct ReasoningFilter {
    pending: String,
    inside: bool,
}

impl ReasoningFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a delta, returning the part that is safe to display.
    pub fn push(&mut self, delta: &str) -> String {
        self.pending.push_str(delta);
        let mut visible = String::new();

        loop {
            let tag = if self.inside { THINK_CLOSE } else { THINK_OPEN };
            if let Some(pos) = self.pending.find(tag) {
                if !self.inside {
                    visible.push_str(&self.pending[..pos]);
                }
                self.pending.drain(..pos + tag.len());
                self.inside = !self.inside;
                continue;
            }

            let cut = self.pending.len() - partial_tag_len(&self.pending, tag);
            if !self.inside {
                visible.push_str(&self.pending[..cut]);
            }
            self.pending.drain(..cut);
            return visible;
        }
    }

    /// Flush whatever was held back. An unclosed block stays hidden.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        if self.inside { String::new() } else { rest }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`.
fn partial_tag_len(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&k| text.ends_with(&tag[..k]))
        .unwrap_or(0)
}
