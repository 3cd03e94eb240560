//! JSON manifests describing runs, studies, and sweeps.
//!
//! Manifests are the CLI-facing shape of the builder APIs: a run manifest
//! becomes a [`RunSpec`] and a boxed [`Runnable`], a study manifest a
//! [`Study`], a sweep manifest a [`SweepSet`]. Change lists stay ordered,
//! so patches apply in the order the manifest writes them.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::domain::{
    ChangeSet, ConfigurationError, DictChange, DictChangeMap, KeyValues, RowChange, StartFile,
    Value,
};
use crate::platform::Platform;
use crate::runs::{
    CaseRun, CfdRun, CoupledRun, FinishAction, LammpsRun, MdRun, MinimalRun, RunSpec, Runnable,
    ScriptRun,
};
use crate::study::{RunSequence, Study};
use crate::sweep::SweepSet;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse manifest '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("unknown simulator '{0}'")]
    UnknownSimulator(String),

    #[error("unknown platform '{0}'")]
    UnknownPlatform(String),

    #[error("coupled run needs both an 'md' and a 'cfd' side")]
    MissingCoupledSide,

    #[error("unknown sweep combination '{0}', expected 'zip' or 'product'")]
    UnknownCombine(String),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ManifestError> {
    let text = fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ManifestError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// One ordered keyword change as the manifest writes it.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeEntry {
    pub keyword: String,
    pub value: serde_json::Value,
}

/// One post-run action, applied in manifest order.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FinishEntry {
    MoveFinalState { destination: PathBuf },
    CopyResultsDir { destination: PathBuf },
    ReorderRestart { state_file: String },
    RunScript { script: String },
}

impl From<FinishEntry> for FinishAction {
    fn from(entry: FinishEntry) -> Self {
        match entry {
            FinishEntry::MoveFinalState { destination } => Self::MoveFinalState { destination },
            FinishEntry::CopyResultsDir { destination } => Self::CopyResultsDir { destination },
            FinishEntry::ReorderRestart { state_file } => Self::ReorderRestart { state_file },
            FinishEntry::RunScript { script } => Self::RunScript { script },
        }
    }
}

/// One run as a manifest describes it. `simulator` picks the variant;
/// a coupled run nests one manifest per side and ignores its own
/// executable.
#[derive(Debug, Clone, Deserialize)]
pub struct RunManifest {
    #[serde(default = "default_simulator")]
    pub simulator: String,
    pub base_dir: PathBuf,
    pub run_dir: PathBuf,
    #[serde(default)]
    pub executable: String,
    pub input_file: String,
    #[serde(default)]
    pub output_file: Option<String>,
    #[serde(default)]
    pub src_dir: Option<PathBuf>,
    #[serde(default)]
    pub changes: Vec<ChangeEntry>,
    #[serde(default)]
    pub initial_state: Option<PathBuf>,
    #[serde(default)]
    pub restart: Option<PathBuf>,
    #[serde(default)]
    pub extra_files: Vec<String>,
    #[serde(default)]
    pub finish: Vec<FinishEntry>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub job_name: Option<String>,
    #[serde(default)]
    pub walltime: Option<String>,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub minimal_copy: bool,
    #[serde(default)]
    pub fail_if_exists: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub md: Option<Box<RunManifest>>,
    #[serde(default)]
    pub cfd: Option<Box<RunManifest>>,
}

fn default_simulator() -> String {
    "minimal".to_string()
}

impl RunManifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        load_json(path)
    }

    /// The validated spec this manifest describes, before variant
    /// dispatch.
    pub fn to_spec(&self) -> Result<RunSpec, ManifestError> {
        let mut spec = RunSpec::new(
            &self.base_dir,
            &self.run_dir,
            self.executable.clone(),
            self.input_file.clone(),
        );
        if let Some(output_file) = &self.output_file {
            spec = spec.output_file(output_file.clone());
        }
        if let Some(src_dir) = &self.src_dir {
            spec = spec.src_dir(src_dir);
        }
        spec = spec.changes(change_set(&self.changes));
        spec = spec.start_file(StartFile::from_options(
            self.initial_state.clone(),
            self.restart.clone(),
        )?);
        for extra in &self.extra_files {
            spec = spec.extra_file(extra.clone());
        }
        for entry in &self.finish {
            spec = spec.finish_action(entry.clone().into());
        }
        if let Some(name) = &self.platform {
            let platform = Platform::from_name(name)
                .ok_or_else(|| ManifestError::UnknownPlatform(name.clone()))?;
            spec = spec.platform(platform);
        }
        if let Some(job_name) = &self.job_name {
            spec = spec.job_name(job_name.clone());
        }
        if let Some(walltime) = &self.walltime {
            spec = spec.walltime(walltime.clone());
        }
        if let Some(queue) = &self.queue {
            spec = spec.queue(queue.clone());
        }
        if self.minimal_copy {
            spec = spec.copy_mode(crate::domain::CopyMode::Minimal);
        }
        if self.fail_if_exists {
            spec = spec.exists_policy(crate::domain::ExistsPolicy::Fail);
        }
        Ok(spec.dry_run(self.dry_run))
    }

    /// Builds the simulator variant the manifest names. Validation is
    /// eager: paths are checked here, before any directory is touched.
    pub fn build(&self) -> Result<Box<dyn Runnable>, ManifestError> {
        let spec = self.to_spec()?;
        let run: Box<dyn Runnable> = match self.simulator.as_str() {
            "md" => Box::new(MdRun::new(spec)?),
            "cfd" => Box::new(CfdRun::new(spec)?),
            "lammps" => Box::new(LammpsRun::new(spec)?),
            "case" => Box::new(CaseRun::new(spec)?),
            "minimal" => Box::new(MinimalRun::new(spec)?),
            "script" => Box::new(ScriptRun::new(spec)?),
            "coupled" => {
                let (Some(md), Some(cfd)) = (&self.md, &self.cfd) else {
                    return Err(ManifestError::MissingCoupledSide);
                };
                Box::new(CoupledRun::new(spec, md.build()?, cfd.build()?)?)
            }
            other => return Err(ManifestError::UnknownSimulator(other.to_string())),
        };
        Ok(run)
    }

    /// A copy of this manifest with a point's changes merged in and the
    /// run directory re-pointed, for sweep expansion.
    pub fn with_point(&self, run_dir: PathBuf, point: &ChangeSet) -> Self {
        let mut manifest = self.clone();
        manifest.run_dir = run_dir;
        let merged = change_set(&self.changes).merged(point);
        let mut changes = Vec::with_capacity(merged.len());
        for (keyword, values) in merged.iter() {
            changes.push(ChangeEntry {
                keyword: keyword.to_string(),
                value: key_values_to_json(values),
            });
        }
        manifest.changes = changes;
        manifest
    }
}

/// A study: sequences of runs plus the local concurrency bound.
#[derive(Debug, Clone, Deserialize)]
pub struct StudyManifest {
    #[serde(default = "default_max_processes")]
    pub max_processes: usize,
    #[serde(default)]
    pub study_folder: Option<PathBuf>,
    pub sequences: Vec<Vec<RunManifest>>,
}

fn default_max_processes() -> usize {
    1
}

impl StudyManifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        load_json(path)
    }

    pub fn build(&self) -> Result<Study, ManifestError> {
        let mut sequences: Vec<RunSequence> = Vec::with_capacity(self.sequences.len());
        for runs in &self.sequences {
            let mut sequence: RunSequence = Vec::with_capacity(runs.len());
            for manifest in runs {
                sequence.push(manifest.build()?);
            }
            sequences.push(sequence);
        }
        let mut study = Study::new(sequences, self.max_processes)?;
        if let Some(folder) = &self.study_folder {
            study = study.regroup_under(folder);
        }
        Ok(study)
    }
}

/// One sweep axis: a keyword over candidate values.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepAxis {
    pub keyword: String,
    pub values: Vec<serde_json::Value>,
}

/// A sweep: axes combined pairwise or as a cartesian product.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepManifest {
    pub axes: Vec<SweepAxis>,
    #[serde(default = "default_combine")]
    pub combine: String,
    #[serde(default)]
    pub separator: String,
}

fn default_combine() -> String {
    "zip".to_string()
}

impl SweepManifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        load_json(path)
    }

    pub fn expand(&self) -> Result<SweepSet, ManifestError> {
        let mut axes = self.axes.iter().map(|axis| {
            SweepSet::axis(
                axis.keyword.clone(),
                axis.values.iter().map(json_to_key_values),
            )
        });
        let Some(first) = axes.next() else {
            return Ok(SweepSet::identity());
        };
        match self.combine.as_str() {
            "zip" => {
                let mut combined = first;
                for axis in axes {
                    combined = combined.zip(axis)?;
                }
                Ok(combined)
            }
            "product" => Ok(axes.fold(first, SweepSet::product)),
            other => Err(ManifestError::UnknownCombine(other.to_string())),
        }
    }
}

fn change_set(entries: &[ChangeEntry]) -> ChangeSet {
    entries
        .iter()
        .map(|entry| (entry.keyword.clone(), json_to_key_values(&entry.value)))
        .collect()
}

/// JSON shapes map one-to-one onto the change model: scalars stay scalars,
/// arrays become value lists with `null` keeping a line, and objects
/// become dictionary change maps.
pub fn json_to_key_values(value: &serde_json::Value) -> KeyValues {
    match value {
        serde_json::Value::Array(entries) => KeyValues::List(
            entries
                .iter()
                .map(|entry| match entry {
                    serde_json::Value::Null => None,
                    other => Some(json_to_value(other)),
                })
                .collect(),
        ),
        serde_json::Value::Object(map) => KeyValues::Mapping(json_to_dict_changes(map)),
        other => KeyValues::Scalar(json_to_value(other)),
    }
}

fn json_to_dict_changes(map: &serde_json::Map<String, serde_json::Value>) -> DictChangeMap {
    let mut changes = BTreeMap::new();
    for (key, value) in map {
        changes.insert(key.clone(), json_to_dict_change(value));
    }
    changes
}

fn json_to_dict_change(value: &serde_json::Value) -> DictChange {
    match value {
        serde_json::Value::Null => DictChange::Keep,
        serde_json::Value::Object(map) => DictChange::Nested(json_to_dict_changes(map)),
        serde_json::Value::Array(entries) => {
            if entries
                .iter()
                .any(|entry| matches!(entry, serde_json::Value::Array(_) | serde_json::Value::Null))
            {
                DictChange::Rows(
                    entries
                        .iter()
                        .map(|entry| match entry {
                            serde_json::Value::Array(row) => {
                                RowChange::Values(row.iter().map(json_to_value).collect())
                            }
                            _ => RowChange::Keep,
                        })
                        .collect(),
                )
            } else {
                DictChange::List(entries.iter().map(json_to_value).collect())
            }
        }
        other => DictChange::Scalar(json_to_value(other)),
    }
}

fn json_to_value(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                Value::Int(int)
            } else {
                Value::Float(number.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::Bool(flag) => Value::Text(flag.to_string()),
        serde_json::Value::String(text) => Value::Text(text.clone()),
        other => Value::Text(other.to_string()),
    }
}

/// The inverse of [`json_to_key_values`], for rendering expanded sweeps.
pub fn key_values_to_json(values: &KeyValues) -> serde_json::Value {
    match values {
        KeyValues::Scalar(value) => value_to_json(value),
        KeyValues::List(entries) => serde_json::Value::Array(
            entries
                .iter()
                .map(|entry| match entry {
                    Some(value) => value_to_json(value),
                    None => serde_json::Value::Null,
                })
                .collect(),
        ),
        KeyValues::Mapping(map) => dict_changes_to_json(map),
    }
}

fn dict_changes_to_json(map: &DictChangeMap) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    for (key, change) in map {
        let value = match change {
            DictChange::Keep => serde_json::Value::Null,
            DictChange::Scalar(value) => value_to_json(value),
            DictChange::List(values) => {
                serde_json::Value::Array(values.iter().map(value_to_json).collect())
            }
            DictChange::Rows(rows) => serde_json::Value::Array(
                rows.iter()
                    .map(|row| match row {
                        RowChange::Keep => serde_json::Value::Null,
                        RowChange::Values(values) => {
                            serde_json::Value::Array(values.iter().map(value_to_json).collect())
                        }
                    })
                    .collect(),
            ),
            DictChange::Nested(inner) => dict_changes_to_json(inner),
        };
        object.insert(key.clone(), value);
    }
    serde_json::Value::Object(object)
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Int(int) => serde_json::Value::from(*int),
        Value::Float(float) => serde_json::Value::from(*float),
        Value::Text(text) => serde_json::Value::from(text.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn json_values_map_onto_the_change_model() {
        let scalar = json_to_key_values(&serde_json::json!(0.8));
        assert_eq!(scalar, KeyValues::scalar(0.8));

        let list = json_to_key_values(&serde_json::json!([2, null, 2]));
        assert_eq!(
            list,
            KeyValues::List(vec![Some(Value::Int(2)), None, Some(Value::Int(2))])
        );

        let mapping = json_to_key_values(&serde_json::json!({
            "numberOfSubdomains": 8,
            "method": null,
            "simpleCoeffs": { "n": [2, 2, 2] }
        }));
        let KeyValues::Mapping(map) = mapping else {
            panic!("expected a mapping");
        };
        assert_eq!(map.get("method"), Some(&DictChange::Keep));
        assert_eq!(
            map.get("numberOfSubdomains"),
            Some(&DictChange::Scalar(Value::Int(8)))
        );
        assert!(matches!(
            map.get("simpleCoeffs"),
            Some(DictChange::Nested(_))
        ));
    }

    #[test]
    fn a_run_manifest_builds_a_validated_spec() {
        let base = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        fs::write(base.path().join("md.exe"), "").unwrap();
        fs::write(base.path().join("MD.in"), "DENSITY\n0.8\n").unwrap();

        let manifest: RunManifest = serde_json::from_value(serde_json::json!({
            "simulator": "md",
            "base_dir": base.path(),
            "run_dir": scratch.path().join("r"),
            "executable": "md.exe",
            "input_file": "MD.in",
            "changes": [ {"keyword": "DENSITY", "value": 0.9} ],
            "platform": "local"
        }))
        .unwrap();

        let run = manifest.build().unwrap();
        assert_eq!(run.executable_name(), "md.exe");
        assert_eq!(run.platform(), Platform::Local);
    }

    #[test]
    fn unknown_simulators_and_missing_coupled_sides_are_rejected() {
        let base = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        fs::write(base.path().join("COUPLER.in"), "RATIO\n50\n").unwrap();

        let mut manifest: RunManifest = serde_json::from_value(serde_json::json!({
            "simulator": "spectral",
            "base_dir": base.path(),
            "run_dir": scratch.path().join("r"),
            "input_file": "COUPLER.in"
        }))
        .unwrap();
        assert!(matches!(
            manifest.build(),
            Err(ManifestError::UnknownSimulator(_))
        ));

        manifest.simulator = "coupled".to_string();
        assert!(matches!(
            manifest.build(),
            Err(ManifestError::MissingCoupledSide)
        ));
    }

    #[test]
    fn conflicting_start_files_fail_manifest_validation() {
        let base = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        fs::write(base.path().join("MD.in"), "DENSITY\n0.8\n").unwrap();

        let manifest: RunManifest = serde_json::from_value(serde_json::json!({
            "base_dir": base.path(),
            "run_dir": scratch.path().join("r"),
            "executable": "sh",
            "input_file": "MD.in",
            "initial_state": "initial_state",
            "restart": "restart0"
        }))
        .unwrap();
        assert!(matches!(
            manifest.build(),
            Err(ManifestError::Configuration(
                ConfigurationError::ConflictingStartFiles
            ))
        ));
    }

    #[test]
    fn sweeps_expand_by_zip_or_product() {
        let manifest: SweepManifest = serde_json::from_value(serde_json::json!({
            "axes": [
                {"keyword": "DENSITY", "values": [0.8, 1.0]},
                {"keyword": "NSTEPS", "values": [100, 200]}
            ],
            "combine": "zip"
        }))
        .unwrap();
        let zipped = manifest.expand().unwrap();
        assert_eq!(zipped.len(), 2);

        let product = SweepManifest {
            combine: "product".to_string(),
            ..manifest.clone()
        };
        assert_eq!(product.expand().unwrap().len(), 4);

        let bad = SweepManifest {
            combine: "outer".to_string(),
            ..manifest
        };
        assert!(matches!(
            bad.expand(),
            Err(ManifestError::UnknownCombine(_))
        ));
    }

    #[test]
    fn with_point_merges_changes_and_repoints_the_run_dir() {
        let manifest: RunManifest = serde_json::from_value(serde_json::json!({
            "base_dir": "/base",
            "run_dir": "/scratch/run",
            "executable": "md.exe",
            "input_file": "MD.in",
            "changes": [ {"keyword": "NSTEPS", "value": 100} ]
        }))
        .unwrap();

        let mut point = ChangeSet::new();
        point.insert("DENSITY", KeyValues::scalar(0.8));
        let expanded = manifest.with_point(PathBuf::from("/scratch/DENSITY0p8"), &point);

        assert_eq!(expanded.run_dir, PathBuf::from("/scratch/DENSITY0p8"));
        let keywords: Vec<&str> = expanded
            .changes
            .iter()
            .map(|entry| entry.keyword.as_str())
            .collect();
        assert_eq!(keywords, vec!["NSTEPS", "DENSITY"]);
    }
}
