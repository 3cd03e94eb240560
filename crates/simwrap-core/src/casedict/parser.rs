//! Structural scan of a bracket-nested case dictionary.
//!
//! Reading a dictionary and rewriting one are the same traversal. `scan`
//! performs that traversal exactly once, classifying each line by shape and
//! recording byte spans into the line, and emits exactly one [`DictEvent`]
//! per input line. `build_tree` folds the stream into a [`DictMap`]; the
//! rewriter in [`super::rewrite`] replays the same stream against a change
//! map. With a single walk the two views cannot disagree about which line
//! holds which key.

use std::path::Path;

use crate::domain::{PatchError, Value};
use crate::patch::split_keep_newlines;

use super::model::{DictMap, DictValue};

/// One classified line. Spans index into the line body, newline excluded.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DictEvent {
    /// Comment, blank line, separator, or a bare word carrying no value.
    Passthrough,
    /// An opening `{` or `(` line, keyed by the preceding bare line.
    Enter { key: String },
    /// A closing `}` or `);` line.
    Leave,
    /// `key value;` with the span of the value token, semicolon excluded.
    Scalar { key: String, value: (usize, usize) },
    /// A dimensioned entry `key name [units] value;`. `tail` is the byte
    /// offset just past the closing `]`.
    Units {
        key: String,
        tail: usize,
        values: Vec<Value>,
    },
    /// A parenthesised row inside a list block, span between the outer
    /// parentheses.
    Row {
        span: (usize, usize),
        values: Vec<Value>,
    },
    /// `key (..) (..) ..` with one span per bracket group.
    Groups {
        key: String,
        spans: Vec<(usize, usize)>,
        values: Vec<Vec<Value>>,
    },
}

/// Classifies every line of `lines`, tracking brace/paren depth. Returns
/// one event per line, or [`PatchError::Structure`] when a closer appears
/// without a matching opener or blocks are still open at end of input.
pub(crate) fn scan(path: &Path, lines: &[(&str, &str)]) -> Result<Vec<DictEvent>, PatchError> {
    let mut events = Vec::with_capacity(lines.len());
    let mut depth = 0usize;
    let mut banner = false;
    let mut prev = String::new();

    for (index, (body, _)) in lines.iter().enumerate() {
        if banner {
            banner = !banner_closes(body);
            events.push(DictEvent::Passthrough);
            continue;
        }
        let trimmed = body.trim();
        if trimmed.is_empty() {
            events.push(DictEvent::Passthrough);
            continue;
        }
        if trimmed.starts_with("/*") {
            banner = !banner_closes(trimmed);
            events.push(DictEvent::Passthrough);
            continue;
        }
        if trimmed.contains("//") {
            events.push(DictEvent::Passthrough);
            continue;
        }

        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        let event = match tokens.as_slice() {
            ["{"] | ["("] => {
                depth += 1;
                DictEvent::Enter { key: prev.clone() }
            }
            ["}"] | [");"] => {
                depth = depth.checked_sub(1).ok_or_else(|| PatchError::Structure {
                    path: path.to_path_buf(),
                    line: index + 1,
                })?;
                DictEvent::Leave
            }
            [_bare] => DictEvent::Passthrough,
            [key, value] => classify_pair(body, key, value),
            _ => classify_wide(body, &tokens),
        };
        prev = trimmed.to_string();
        events.push(event);
    }

    if depth != 0 {
        return Err(PatchError::Structure {
            path: path.to_path_buf(),
            line: lines.len(),
        });
    }
    Ok(events)
}

fn banner_closes(line: &str) -> bool {
    line.contains("\\*") || line.trim_end().ends_with("*/")
}

fn classify_pair(body: &str, key: &str, value: &str) -> DictEvent {
    let Some(stripped) = value.strip_suffix(';') else {
        tracing::debug!(line = body.trim(), "two tokens without terminator, leaving as-is");
        return DictEvent::Passthrough;
    };
    // The value is the last token, so search from the right.
    let Some(start) = body.rfind(value) else {
        return DictEvent::Passthrough;
    };
    DictEvent::Scalar {
        key: key.to_string(),
        value: (start, start + stripped.len()),
    }
}

fn classify_wide(body: &str, tokens: &[&str]) -> DictEvent {
    if body.contains('[') {
        let Some(close) = body.find(']') else {
            return DictEvent::Passthrough;
        };
        let tail = close + 1;
        return DictEvent::Units {
            key: tokens[0].to_string(),
            tail,
            values: coerce_tokens(&body[tail..]),
        };
    }

    if tokens[0].starts_with('(') {
        let Some(open) = body.find('(') else {
            return DictEvent::Passthrough;
        };
        let close = match body.rfind(')') {
            Some(at) if at > open => at,
            _ => body.len(),
        };
        let span = (open + 1, close);
        return DictEvent::Row {
            values: coerce_tokens(&body[span.0..span.1]),
            span,
        };
    }

    let key = tokens[0];
    let search_from = body.find(key).map(|at| at + key.len()).unwrap_or(0);
    let mut spans = Vec::new();
    let mut open: Option<usize> = None;
    for (offset, ch) in body[search_from..].char_indices() {
        let at = search_from + offset;
        match ch {
            '(' if open.is_none() => open = Some(at + 1),
            ')' => {
                if let Some(start) = open.take() {
                    spans.push((start, at));
                }
            }
            _ => {}
        }
    }
    let values = spans
        .iter()
        .map(|&(start, end)| coerce_tokens(&body[start..end]))
        .collect();
    DictEvent::Groups {
        key: key.to_string(),
        spans,
        values,
    }
}

fn coerce_tokens(text: &str) -> Vec<Value> {
    text.split(|ch: char| ch.is_whitespace() || matches!(ch, '(' | ')' | ';'))
        .filter(|token| !token.is_empty())
        .map(Value::coerce)
        .collect()
}

struct Frame {
    key: String,
    map: DictMap,
    rows: Vec<Vec<Value>>,
    saw_rows: bool,
}

impl Frame {
    fn new(key: String) -> Self {
        Self {
            key,
            map: DictMap::new(),
            rows: Vec::new(),
            saw_rows: false,
        }
    }

    fn into_value(self) -> DictValue {
        if self.saw_rows {
            DictValue::Rows(self.rows)
        } else {
            DictValue::Dict(self.map)
        }
    }
}

/// Folds a scanned event stream into the nested dictionary it describes.
pub(crate) fn build_tree(lines: &[(&str, &str)], events: &[DictEvent]) -> DictMap {
    let mut stack = vec![Frame::new(String::new())];
    for ((body, _), event) in lines.iter().zip(events) {
        match event {
            DictEvent::Passthrough => {}
            DictEvent::Enter { key } => stack.push(Frame::new(key.clone())),
            DictEvent::Leave => {
                if stack.len() > 1 {
                    if let Some(frame) = stack.pop() {
                        if let Some(parent) = stack.last_mut() {
                            parent.map.insert(frame.key.clone(), frame.into_value());
                        }
                    }
                }
            }
            DictEvent::Scalar { key, value } => {
                if let Some(top) = stack.last_mut() {
                    top.map
                        .insert(key.clone(), DictValue::Scalar(body[value.0..value.1].to_string()));
                }
            }
            DictEvent::Units { key, values, .. } => {
                if let Some(top) = stack.last_mut() {
                    top.map.insert(key.clone(), DictValue::List(values.clone()));
                }
            }
            DictEvent::Row { values, .. } => {
                if let Some(top) = stack.last_mut() {
                    top.saw_rows = true;
                    top.rows.push(values.clone());
                }
            }
            DictEvent::Groups { key, values, .. } => {
                if let Some(top) = stack.last_mut() {
                    top.map.insert(key.clone(), DictValue::Rows(values.clone()));
                }
            }
        }
    }
    stack.truncate(1);
    stack.pop().map(|frame| frame.map).unwrap_or_default()
}

/// Parses dictionary text into its nested map form.
pub(crate) fn parse_text(path: &Path, text: &str) -> Result<DictMap, PatchError> {
    let lines = split_keep_newlines(text);
    let events = scan(path, &lines)?;
    Ok(build_tree(&lines, &events))
}
