//! Lock-step rewrite of a case dictionary.
//!
//! The rewriter replays the event stream from [`super::parser::scan`] while
//! descending a [`DictChangeMap`] in parallel. Lines whose key has no change
//! entry, compares equal to the requested value, or is marked [`DictChange::Keep`]
//! are copied byte for byte; only the value span of a changed line is
//! replaced. Change keys that never match the file's structure are reported
//! with a warning and skipped rather than failing the rewrite.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::warn;

use crate::domain::{DictChange, DictChangeMap, PatchError, RowChange, Value};
use crate::patch::split_keep_newlines;

use super::parser::{scan, DictEvent};

enum Ctx<'a> {
    /// No change entry addresses this block; everything under it is copied.
    KeepAll,
    Map {
        changes: &'a DictChangeMap,
        consumed: BTreeSet<String>,
    },
    Rows {
        rows: &'a [RowChange],
        next: usize,
        short_warned: bool,
    },
}

impl<'a> Ctx<'a> {
    fn map(changes: &'a DictChangeMap) -> Self {
        Self::Map {
            changes,
            consumed: BTreeSet::new(),
        }
    }

    fn rows(rows: &'a [RowChange]) -> Self {
        Self::Rows {
            rows,
            next: 0,
            short_warned: false,
        }
    }
}

/// Applies `changes` to dictionary text, returning the rewritten text and
/// the number of substituted lines.
pub(crate) fn rewrite_text(
    path: &Path,
    text: &str,
    changes: &DictChangeMap,
) -> Result<(String, usize), PatchError> {
    let lines = split_keep_newlines(text);
    let events = scan(path, &lines)?;

    let mut output = String::with_capacity(text.len());
    let mut substituted = 0usize;
    let mut stack: Vec<Ctx<'_>> = vec![Ctx::map(changes)];

    for ((body, terminator), event) in lines.iter().zip(&events) {
        let mut line_out: Option<String> = None;

        match event {
            DictEvent::Passthrough => {}
            DictEvent::Enter { key } => {
                let child = match stack.last_mut() {
                    Some(Ctx::Map { changes, consumed }) => {
                        let map: &DictChangeMap = *changes;
                        match map.get(key) {
                            None => Ctx::KeepAll,
                            Some(change) => {
                                consumed.insert(key.clone());
                                match change {
                                    DictChange::Nested(inner) => Ctx::map(inner),
                                    DictChange::Rows(rows) => Ctx::rows(rows),
                                    DictChange::Keep => Ctx::KeepAll,
                                    DictChange::Scalar(_) | DictChange::List(_) => {
                                        warn_shape(path, key);
                                        Ctx::KeepAll
                                    }
                                }
                            }
                        }
                    }
                    _ => Ctx::KeepAll,
                };
                stack.push(child);
            }
            DictEvent::Leave => {
                if stack.len() > 1 {
                    if let Some(frame) = stack.pop() {
                        finish_frame(path, frame);
                    }
                }
            }
            DictEvent::Scalar { key, value } => {
                if let Some(Ctx::Map { changes, consumed }) = stack.last_mut() {
                    let map: &DictChangeMap = *changes;
                    match map.get(key) {
                        Some(DictChange::Scalar(new)) => {
                            consumed.insert(key.clone());
                            let rendered = new.to_string();
                            if rendered.as_str() != &body[value.0..value.1] {
                                line_out = Some(format!(
                                    "{}{}{}",
                                    &body[..value.0],
                                    rendered,
                                    &body[value.1..]
                                ));
                            }
                        }
                        Some(DictChange::Keep) => {
                            consumed.insert(key.clone());
                        }
                        Some(_) => {
                            consumed.insert(key.clone());
                            warn_shape(path, key);
                        }
                        None => {}
                    }
                }
            }
            DictEvent::Units { key, tail, values } => {
                if let Some(Ctx::Map { changes, consumed }) = stack.last_mut() {
                    let map: &DictChangeMap = *changes;
                    match map.get(key) {
                        Some(DictChange::List(new)) => {
                            consumed.insert(key.clone());
                            if new != values {
                                line_out =
                                    Some(format!("{} ({});", &body[..*tail], join_values(new)));
                            }
                        }
                        Some(DictChange::Scalar(new)) => {
                            consumed.insert(key.clone());
                            if values.len() != 1 || values[0] != *new {
                                line_out = Some(format!("{} {};", &body[..*tail], new));
                            }
                        }
                        Some(DictChange::Keep) => {
                            consumed.insert(key.clone());
                        }
                        Some(_) => {
                            consumed.insert(key.clone());
                            warn_shape(path, key);
                        }
                        None => {}
                    }
                }
            }
            DictEvent::Row { span, values } => {
                if let Some(Ctx::Rows {
                    rows,
                    next,
                    short_warned,
                }) = stack.last_mut()
                {
                    let list: &[RowChange] = *rows;
                    let index = *next;
                    *next += 1;
                    match list.get(index) {
                        Some(RowChange::Values(new)) => {
                            if new != values {
                                line_out = Some(format!(
                                    "{}{}{}",
                                    &body[..span.0],
                                    join_values(new),
                                    &body[span.1..]
                                ));
                            }
                        }
                        Some(RowChange::Keep) => {}
                        None => {
                            if !*short_warned {
                                warn!(
                                    file = %path.display(),
                                    "fewer change rows than dictionary rows, keeping the rest"
                                );
                                *short_warned = true;
                            }
                        }
                    }
                }
            }
            DictEvent::Groups { key, spans, values } => {
                if let Some(Ctx::Map { changes, consumed }) = stack.last_mut() {
                    let map: &DictChangeMap = *changes;
                    let promoted: Vec<RowChange>;
                    let rows: Option<&[RowChange]> = match map.get(key) {
                        Some(DictChange::Rows(rows)) => {
                            consumed.insert(key.clone());
                            Some(rows.as_slice())
                        }
                        Some(DictChange::List(list)) => {
                            consumed.insert(key.clone());
                            promoted = vec![RowChange::Values(list.clone())];
                            Some(promoted.as_slice())
                        }
                        Some(DictChange::Keep) => {
                            consumed.insert(key.clone());
                            None
                        }
                        Some(_) => {
                            consumed.insert(key.clone());
                            warn_shape(path, key);
                            None
                        }
                        None => None,
                    };
                    if let Some(rows) = rows {
                        if rows.len() > spans.len() {
                            warn!(
                                key = key.as_str(),
                                file = %path.display(),
                                "more change groups than bracket groups on this line"
                            );
                        }
                        let mut rebuilt = String::with_capacity(body.len());
                        let mut cursor = 0usize;
                        let mut changed = false;
                        for (index, &(start, end)) in spans.iter().enumerate() {
                            rebuilt.push_str(&body[cursor..start]);
                            match rows.get(index) {
                                Some(RowChange::Values(new)) if *new != values[index] => {
                                    rebuilt.push_str(&join_values(new));
                                    changed = true;
                                }
                                _ => rebuilt.push_str(&body[start..end]),
                            }
                            cursor = end;
                        }
                        rebuilt.push_str(&body[cursor..]);
                        if changed {
                            line_out = Some(rebuilt);
                        }
                    }
                }
            }
        }

        match line_out {
            Some(new) => {
                output.push_str(&new);
                substituted += 1;
            }
            None => output.push_str(body),
        }
        output.push_str(terminator);
    }

    while let Some(frame) = stack.pop() {
        finish_frame(path, frame);
    }

    Ok((output, substituted))
}

fn finish_frame(path: &Path, frame: Ctx<'_>) {
    match frame {
        Ctx::KeepAll => {}
        Ctx::Map { changes, consumed } => {
            for key in changes.keys() {
                if !consumed.contains(key) {
                    warn!(
                        key = key.as_str(),
                        file = %path.display(),
                        "change key not found in dictionary, skipped"
                    );
                }
            }
        }
        Ctx::Rows { rows, next, .. } => {
            if rows.len() > next {
                warn!(
                    file = %path.display(),
                    unused = rows.len() - next,
                    "unused change rows for this block"
                );
            }
        }
    }
}

fn warn_shape(path: &Path, key: &str) {
    warn!(
        key,
        file = %path.display(),
        "change shape does not match the dictionary entry, skipped"
    );
}

pub(crate) fn join_values(values: &[Value]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}
