use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::domain::Value;

/// Parsed value of one dictionary entry.
///
/// `Scalar` keeps the raw token text so a rewrite can compare against the
/// bytes actually present in the file. `List` holds a flat bracketed value
/// (a units line), `Rows` holds either the rows of a parenthesised block or
/// the bracket groups of a single line, and `Dict` is a nested block.
#[derive(Debug, Clone, PartialEq)]
pub enum DictValue {
    Scalar(String),
    List(Vec<Value>),
    Rows(Vec<Vec<Value>>),
    Dict(DictMap),
}

pub type DictMap = BTreeMap<String, DictValue>;

impl DictValue {
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Self::Scalar(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(values) => Some(values.as_slice()),
            _ => None,
        }
    }

    pub fn as_rows(&self) -> Option<&[Vec<Value>]> {
        match self {
            Self::Rows(rows) => Some(rows.as_slice()),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&DictMap> {
        match self {
            Self::Dict(map) => Some(map),
            _ => None,
        }
    }
}

/// One parsed dictionary file inside a case directory.
#[derive(Debug, Clone)]
pub struct FileDict {
    path: PathBuf,
    root: DictMap,
}

impl FileDict {
    pub(crate) fn new(path: PathBuf, root: DictMap) -> Self {
        Self { path, root }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn root(&self) -> &DictMap {
        &self.root
    }

    /// Walks nested `Dict` values along `path` and returns the entry at the
    /// end, if every intermediate step exists and is itself a dictionary.
    pub fn lookup(&self, path: &[&str]) -> Option<&DictValue> {
        let (first, rest) = path.split_first()?;
        let mut current = self.root.get(*first)?;
        for key in rest {
            current = current.as_dict()?.get(*key)?;
        }
        Some(current)
    }
}
