pub mod errors;

pub use errors::{ConfigurationError, ExecutionError, PatchError, RunError, RunResult};

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// One replacement value, resolved to a concrete type at the API boundary
/// instead of being re-inspected at every use site.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Coerce a raw token the way the config formats expect: integer first,
    /// then float, otherwise the bare text.
    pub fn coerce(token: &str) -> Self {
        if let Ok(int) = token.parse::<i64>() {
            return Self::Int(int);
        }
        if let Ok(float) = token.parse::<f64>() {
            return Self::Float(float);
        }
        Self::Text(token.to_string())
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{}", value),
            Self::Float(value) => write!(f, "{}", value),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Requested change for one key of a case dictionary. `Keep` leaves the
/// current value in place; the other variants mirror the shapes the
/// dictionary parser produces.
#[derive(Debug, Clone, PartialEq)]
pub enum DictChange {
    Keep,
    Scalar(Value),
    List(Vec<Value>),
    Rows(Vec<RowChange>),
    Nested(DictChangeMap),
}

/// One row (or bracket group) of a `Rows` change.
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    Keep,
    Values(Vec<Value>),
}

impl RowChange {
    pub fn values<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Self::Values(values.into_iter().map(Into::into).collect())
    }
}

pub type DictChangeMap = BTreeMap<String, DictChange>;

/// Replacement values for one keyword, in the shape the owning dialect
/// expects. The accessors police the shape once so the replacers never
/// branch on "whatever was passed".
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValues {
    Scalar(Value),
    /// One entry per value line; `None` keeps that line unchanged.
    List(Vec<Option<Value>>),
    /// Structured changes for a case dictionary.
    Mapping(DictChangeMap),
}

impl KeyValues {
    pub fn scalar(value: impl Into<Value>) -> Self {
        Self::Scalar(value.into())
    }

    pub fn list<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Self::List(values.into_iter().map(|value| Some(value.into())).collect())
    }

    /// Rendered value lines for the block dialect; `None` marks a line to
    /// keep.
    pub fn block_lines(&self, keyword: &str) -> Result<Vec<Option<String>>, PatchError> {
        match self {
            Self::Scalar(value) => Ok(vec![Some(value.to_string())]),
            Self::List(values) => Ok(values
                .iter()
                .map(|value| value.as_ref().map(Value::to_string))
                .collect()),
            Self::Mapping(_) => Err(self.unsupported(keyword)),
        }
    }

    /// The single rendered value the commented dialect substitutes.
    pub fn single_value(&self, keyword: &str) -> Result<String, PatchError> {
        match self {
            Self::Scalar(value) => Ok(value.to_string()),
            Self::List(_) | Self::Mapping(_) => Err(self.unsupported(keyword)),
        }
    }

    /// Rendered values joined after the keyword by the line dialect.
    pub fn joined_values(&self, keyword: &str) -> Result<Vec<String>, PatchError> {
        match self {
            Self::Scalar(value) => Ok(vec![value.to_string()]),
            Self::List(values) => values
                .iter()
                .map(|value| {
                    value
                        .as_ref()
                        .map(Value::to_string)
                        .ok_or_else(|| self.unsupported(keyword))
                })
                .collect(),
            Self::Mapping(_) => Err(self.unsupported(keyword)),
        }
    }

    pub fn as_mapping(&self, keyword: &str) -> Result<&DictChangeMap, PatchError> {
        match self {
            Self::Mapping(changes) => Ok(changes),
            Self::Scalar(_) | Self::List(_) => Err(self.unsupported(keyword)),
        }
    }

    fn unsupported(&self, keyword: &str) -> PatchError {
        let reason = match self {
            Self::Scalar(_) => "a plain value does not describe dictionary structure",
            Self::List(_) => "keep markers only apply to block value lines",
            Self::Mapping(_) => "dictionary changes only apply to case dictionaries",
        };
        PatchError::UnsupportedValueType {
            keyword: keyword.to_string(),
            reason,
        }
    }
}

/// Ordered keyword -> values mapping for one run. Application order follows
/// insertion order; inserting an existing keyword replaces its values in
/// place.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChangeSet {
    entries: Vec<(String, KeyValues)>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, keyword: impl Into<String>, values: KeyValues) {
        let keyword = keyword.into();
        if let Some(entry) = self.entries.iter_mut().find(|(key, _)| *key == keyword) {
            entry.1 = values;
        } else {
            self.entries.push((keyword, values));
        }
    }

    pub fn get(&self, keyword: &str) -> Option<&KeyValues> {
        self.entries
            .iter()
            .find(|(key, _)| key == keyword)
            .map(|(_, values)| values)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &KeyValues)> {
        self.entries
            .iter()
            .map(|(key, values)| (key.as_str(), values))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Union of two change sets; on a shared keyword the other set wins.
    pub fn merged(mut self, other: &ChangeSet) -> ChangeSet {
        for (keyword, values) in other.iter() {
            self.insert(keyword, values.clone());
        }
        self
    }
}

impl FromIterator<(String, KeyValues)> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = (String, KeyValues)>>(iter: I) -> Self {
        let mut changes = ChangeSet::new();
        for (keyword, values) in iter {
            changes.insert(keyword, values);
        }
        changes
    }
}

/// Lifecycle of one run. `Failed` records the step that broke; a run is
/// never reused after reaching `Finished` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RunState {
    #[default]
    Created,
    SetUp,
    Executing,
    Finished,
    Failed,
}

impl RunState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::SetUp => "set-up",
            Self::Executing => "executing",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

impl Display for RunState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

/// At most one of an initial-state file or a restart file may start a run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StartFile {
    #[default]
    None,
    InitialState(PathBuf),
    Restart(PathBuf),
}

impl StartFile {
    pub fn from_options(
        initial_state: Option<PathBuf>,
        restart: Option<PathBuf>,
    ) -> Result<Self, ConfigurationError> {
        match (initial_state, restart) {
            (Some(_), Some(_)) => Err(ConfigurationError::ConflictingStartFiles),
            (Some(path), None) => Ok(Self::InitialState(path)),
            (None, Some(path)) => Ok(Self::Restart(path)),
            (None, None) => Ok(Self::None),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::None => None,
            Self::InitialState(path) | Self::Restart(path) => Some(path),
        }
    }

    pub const fn is_restart(&self) -> bool {
        matches!(self, Self::Restart(_))
    }
}

/// How setup places files into the run directory: full copies, or symlinks
/// for everything that is not patched per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CopyMode {
    #[default]
    Full,
    Minimal,
}

/// What setup does when the run directory already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExistsPolicy {
    #[default]
    Continue,
    Fail,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_prefers_int_then_float_then_text() {
        assert_eq!(Value::coerce("42"), Value::Int(42));
        assert_eq!(Value::coerce("-7"), Value::Int(-7));
        assert_eq!(Value::coerce("0.5"), Value::Float(0.5));
        assert_eq!(Value::coerce("1e-3"), Value::Float(0.001));
        assert_eq!(Value::coerce("uniform"), Value::Text("uniform".to_string()));
    }

    #[test]
    fn start_file_rejects_both_options_set() {
        let conflict = StartFile::from_options(
            Some(PathBuf::from("initial_state")),
            Some(PathBuf::from("restart0")),
        );
        assert!(matches!(
            conflict,
            Err(ConfigurationError::ConflictingStartFiles)
        ));

        let restart = StartFile::from_options(None, Some(PathBuf::from("restart0"))).unwrap();
        assert!(restart.is_restart());
        assert_eq!(restart.path(), Some(Path::new("restart0")));

        assert_eq!(StartFile::from_options(None, None).unwrap(), StartFile::None);
    }

    #[test]
    fn key_values_accessors_police_the_dialect_shape() {
        let list = KeyValues::List(vec![Some(Value::Int(2)), None, Some(Value::Int(4))]);
        assert_eq!(
            list.block_lines("PROCESSORS").unwrap(),
            vec![Some("2".to_string()), None, Some("4".to_string())]
        );
        assert!(list.single_value("PROCESSORS").is_err());
        assert!(list.joined_values("PROCESSORS").is_err());

        let scalar = KeyValues::scalar(0.5);
        assert_eq!(scalar.single_value("vishear").unwrap(), "0.5");
        assert_eq!(scalar.joined_values("vishear").unwrap(), vec!["0.5"]);

        let mapping = KeyValues::Mapping(DictChangeMap::new());
        assert!(matches!(
            mapping.block_lines("nu"),
            Err(PatchError::UnsupportedValueType { .. })
        ));
    }

    #[test]
    fn change_set_preserves_insertion_order_and_replaces_in_place() {
        let mut changes = ChangeSet::new();
        changes.insert("PROCESSORS", KeyValues::list([2i64, 2, 2]));
        changes.insert("INITIALNUNITS", KeyValues::list([8i64, 8, 8]));
        changes.insert("PROCESSORS", KeyValues::list([4i64, 1, 1]));

        let keywords: Vec<&str> = changes.iter().map(|(keyword, _)| keyword).collect();
        assert_eq!(keywords, vec!["PROCESSORS", "INITIALNUNITS"]);
        assert_eq!(
            changes.get("PROCESSORS"),
            Some(&KeyValues::list([4i64, 1, 1]))
        );
    }
}
