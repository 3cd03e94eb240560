//! Sweep algebra over change sets.
//!
//! A sweep is an ordered list of change-set points, one per run. Axes are
//! combined either pairwise with [`SweepSet::zip`] or as a cartesian
//! product with [`SweepSet::product`], and every point can be rendered into
//! a filesystem-safe run name.

use crate::domain::{ChangeSet, ConfigurationError, DictChange, DictChangeMap, KeyValues, Value};

#[derive(Debug, Clone, Default)]
pub struct SweepSet {
    points: Vec<ChangeSet>,
}

impl SweepSet {
    /// A sweep with a single empty point, the identity for [`Self::product`].
    pub fn identity() -> Self {
        Self {
            points: vec![ChangeSet::new()],
        }
    }

    /// One axis: a keyword swept over a list of values, yielding one
    /// single-change point per value.
    pub fn axis(keyword: impl Into<String>, values: impl IntoIterator<Item = KeyValues>) -> Self {
        let keyword = keyword.into();
        let points = values
            .into_iter()
            .map(|value| {
                let mut point = ChangeSet::new();
                point.insert(keyword.clone(), value);
                point
            })
            .collect();
        Self { points }
    }

    pub fn single(point: ChangeSet) -> Self {
        Self {
            points: vec![point],
        }
    }

    pub fn from_points(points: Vec<ChangeSet>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[ChangeSet] {
        &self.points
    }

    pub fn into_points(self) -> Vec<ChangeSet> {
        self.points
    }

    /// Pairs two sweeps point by point. A single-point side broadcasts
    /// across the other; any other length difference is a shape error.
    /// On colliding keywords the right-hand side wins.
    pub fn zip(self, other: SweepSet) -> Result<SweepSet, ConfigurationError> {
        let points = match (self.points.len(), other.points.len()) {
            (left, right) if left == right => self
                .points
                .into_iter()
                .zip(other.points)
                .map(|(a, b)| a.merged(&b))
                .collect(),
            (1, _) => {
                let base = &self.points[0];
                other
                    .points
                    .into_iter()
                    .map(|b| base.clone().merged(&b))
                    .collect()
            }
            (_, 1) => {
                let overlay = &other.points[0];
                self.points
                    .into_iter()
                    .map(|a| a.merged(overlay))
                    .collect()
            }
            (left, right) => return Err(ConfigurationError::SweepShapeMismatch { left, right }),
        };
        Ok(SweepSet { points })
    }

    /// Every combination of the two sweeps, left-major order.
    pub fn product(self, other: SweepSet) -> SweepSet {
        let mut points = Vec::with_capacity(self.points.len() * other.points.len());
        for a in &self.points {
            for b in &other.points {
                points.push(a.clone().merged(b));
            }
        }
        SweepSet { points }
    }

    /// Derived run-directory names, one per point: keyword then value
    /// tokens, floats rounded to two decimals, dots replaced by `p`, and
    /// everything except letters, digits, and the separator dropped.
    pub fn run_names(&self, separator: &str) -> Vec<String> {
        self.points
            .iter()
            .map(|point| point_name(point, separator))
            .collect()
    }
}

fn point_name(point: &ChangeSet, separator: &str) -> String {
    let mut name = String::new();
    for (keyword, values) in point.iter() {
        let mut kvstr = keyword.to_string();
        for token in value_tokens(values) {
            kvstr.push_str(separator);
            kvstr.push_str(&token);
        }
        let cleaned = kvstr.replace('.', "p");
        name.extend(
            cleaned
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || separator.contains(*c)),
        );
    }
    name
}

fn value_tokens(values: &KeyValues) -> Vec<String> {
    match values {
        KeyValues::Scalar(value) => vec![name_token(value)],
        KeyValues::List(entries) => entries
            .iter()
            .map(|entry| match entry {
                Some(value) => name_token(value),
                None => "keep".to_string(),
            })
            .collect(),
        KeyValues::Mapping(map) => {
            let mut tokens = Vec::new();
            mapping_tokens(map, &mut tokens);
            tokens
        }
    }
}

fn mapping_tokens(map: &DictChangeMap, tokens: &mut Vec<String>) {
    for (key, change) in map {
        tokens.push(key.clone());
        match change {
            DictChange::Keep => tokens.push("keep".to_string()),
            DictChange::Scalar(value) => tokens.push(name_token(value)),
            DictChange::List(values) => tokens.extend(values.iter().map(name_token)),
            DictChange::Rows(rows) => {
                for row in rows {
                    if let crate::domain::RowChange::Values(values) = row {
                        tokens.extend(values.iter().map(name_token));
                    }
                }
            }
            DictChange::Nested(inner) => mapping_tokens(inner, tokens),
        }
    }
}

fn name_token(value: &Value) -> String {
    match value {
        Value::Int(int) => int.to_string(),
        Value::Float(float) => {
            let rounded = (float * 100.0).round_ties_even() / 100.0;
            if rounded.fract() == 0.0 {
                format!("{:.1}", rounded)
            } else {
                rounded.to_string()
            }
        }
        Value::Text(text) => text.clone(),
    }
}
