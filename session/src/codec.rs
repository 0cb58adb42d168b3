//! Wire framing for both directions.
//!
//! Server → client: `<html>` optionally followed by `\n\n<segment>` repeated.
//! Client → server: `<action>` optionally followed by `\n\n<flat JSON string map>`.
//!
//! Receivers split on the first delimiter. Fragments are escaped on the way out
//! so a delimiter inside rendered HTML can never split a frame early.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, InvalidAction};

pub const DELIMITER: &str = "\n\n";

// `&#10;` is a newline character reference: browsers render it exactly like
// the newline it replaces, including inside <pre> and attribute values.
const NEWLINE_REF: &str = "&#10;";
const ESCAPED_DELIMITER: &str = "\n&#10;";

/// Flat string attributes carried by an action. Key order is irrelevant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, String>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str, InvalidAction> {
        self.get(key)
            .ok_or_else(|| InvalidAction::MissingAttribute(key.to_string()))
    }

    /// Required attribute parsed into `T`.
    pub fn parse<T: FromStr>(&self, key: &str) -> Result<T, InvalidAction> {
        let raw = self.require(key)?;
        raw.parse().map_err(|_| InvalidAction::InvalidAttribute {
            key: key.to_string(),
            value: raw.to_string(),
        })
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A decoded client interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionFrame {
    pub action: String,
    pub attributes: Attributes,
}

impl ActionFrame {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key, value);
        self
    }
}

/// A rendered view snapshot. `meta` segments are reserved extension slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    pub html: String,
    pub meta: Vec<String>,
}

impl Fragment {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            meta: Vec::new(),
        }
    }

    pub fn with_meta(mut self, segment: impl Into<String>) -> Self {
        self.meta.push(segment.into());
        self
    }

    pub fn encode(&self) -> String {
        encode_fragment(&self.html, &self.meta)
    }
}

// A newline touching a boundary would merge with the joining delimiter, so
// edge newlines are escaped as well as inner delimiters.
fn escape_segment(segment: &str, leading: bool, trailing: bool) -> Cow<'_, str> {
    let needs_edge = (leading && segment.starts_with('\n')) || (trailing && segment.ends_with('\n'));
    if !needs_edge && !segment.contains(DELIMITER) {
        return Cow::Borrowed(segment);
    }
    let mut escaped = segment.replace(DELIMITER, ESCAPED_DELIMITER);
    if trailing && escaped.ends_with('\n') {
        escaped.pop();
        escaped.push_str(NEWLINE_REF);
    }
    if leading && escaped.starts_with('\n') {
        escaped.replace_range(..1, NEWLINE_REF);
    }
    Cow::Owned(escaped)
}

/// Joins `html` and the extra segments into one textual frame. Never fails.
pub fn encode_fragment<S: AsRef<str>>(html: &str, extra_segments: &[S]) -> String {
    let mut frame = escape_segment(html, false, !extra_segments.is_empty()).into_owned();
    for (i, segment) in extra_segments.iter().enumerate() {
        let last = i + 1 == extra_segments.len();
        frame.push_str(DELIMITER);
        frame.push_str(&escape_segment(segment.as_ref(), true, !last));
    }
    frame
}

/// Receiver-side split of an outbound frame. Escaped delimiters stay escaped.
pub fn decode_fragment(frame: &str) -> Fragment {
    let mut parts = frame.split(DELIMITER);
    let html = parts.next().unwrap_or_default().to_string();
    Fragment {
        html,
        meta: parts.map(str::to_string).collect(),
    }
}

pub fn decode_action(frame: &str) -> Result<ActionFrame, DecodeError> {
    let (head, tail) = match frame.split_once(DELIMITER) {
        Some((head, tail)) => (head, Some(tail)),
        None => (frame, None),
    };

    let action = head.trim();
    if action.is_empty() {
        return Err(DecodeError::EmptyAction);
    }
    if action.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(DecodeError::InvalidActionName(action.to_string()));
    }

    let attributes = match tail.map(str::trim) {
        None | Some("") => Attributes::new(),
        Some(raw) => serde_json::from_str(raw)
            .map_err(|err| DecodeError::MalformedAttributes(err.to_string()))?,
    };

    Ok(ActionFrame {
        action: action.to_string(),
        attributes,
    })
}

/// Client-side counterpart of [`decode_action`].
pub fn encode_action(frame: &ActionFrame) -> String {
    if frame.attributes.is_empty() {
        return frame.action.clone();
    }
    match serde_json::to_string(&frame.attributes) {
        Ok(json) => format!("{}{DELIMITER}{json}", frame.action),
        Err(_) => frame.action.clone(),
    }
}
