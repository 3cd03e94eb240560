//! Structured case-dictionary reading and rewriting.
//!
//! A simulation case directory carries its settings spread over bracket
//! nested dictionary files under `constant/`, `system/`, and `0/`.
//! [`CaseDict`] parses the whole set into typed trees and applies change
//! maps back onto the files in place, touching only the value spans of
//! lines that actually change. A handful of mesh shortcuts expand a single
//! keyword and a numeric triple into the corresponding multi-file edits.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::domain::{DictChange, DictChangeMap, KeyValues, PatchError, RowChange, Value};
use crate::patch::{io_patch_error, read_file_text, replace_file_text};

mod model;
mod parser;
mod rewrite;

pub use model::{DictMap, DictValue, FileDict};

/// Field classes under `0/` that mark a file as a parseable field
/// dictionary rather than raw mesh data.
const FIELD_CLASSES: [&str; 3] = ["volScalarField", "volVectorField", "volSymmTensorField"];

/// Backup and scratch suffixes excluded from the case walk.
const JUNK_PATTERNS: [&str; 4] = ["*.bak", "*.tmp", "*.orig", "*~"];

/// Every parsed dictionary file of one case directory, keyed by file name.
#[derive(Debug, Clone)]
pub struct CaseDict {
    case_dir: PathBuf,
    files: BTreeMap<String, FileDict>,
}

impl CaseDict {
    /// Parses all dictionary files reachable from `case_dir`: plain files
    /// under `constant/` and `system/`, the block mesh description under
    /// `constant/polyMesh/`, and field files under `0/` whose class line
    /// names a known field type.
    pub fn read(case_dir: impl Into<PathBuf>) -> Result<Self, PatchError> {
        let case_dir = case_dir.into();
        let junk = junk_matcher()?;
        let mut files = BTreeMap::new();
        for path in dictionary_files(&case_dir, &junk)? {
            let text = read_file_text(&path)?;
            let root = parser::parse_text(&path, &text)?;
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            files.insert(name, FileDict::new(path, root));
        }
        Ok(Self { case_dir, files })
    }

    pub fn case_dir(&self) -> &Path {
        &self.case_dir
    }

    pub fn file(&self, name: &str) -> Option<&FileDict> {
        self.files.get(name)
    }

    pub fn files(&self) -> impl Iterator<Item = &FileDict> {
        self.files.values()
    }

    /// Process count the case decomposes into, when the decomposition
    /// dictionary declares one.
    pub fn process_count(&self) -> Option<usize> {
        self.file("decomposeParDict")?
            .lookup(&["numberOfSubdomains"])?
            .as_scalar()?
            .parse()
            .ok()
    }

    /// Applies a change map to the named dictionary file and refreshes the
    /// in-memory tree for it. Returns the number of substituted lines.
    pub fn apply_changes(
        &mut self,
        name: &str,
        changes: &DictChangeMap,
    ) -> Result<usize, PatchError> {
        let path = match self.files.get(name) {
            Some(file) => file.path().to_path_buf(),
            None => {
                return Err(PatchError::UnknownDictFile {
                    name: name.to_string(),
                    case_dir: self.case_dir.clone(),
                });
            }
        };
        let text = read_file_text(&path)?;
        let (rewritten, substituted) = rewrite::rewrite_text(&path, &text, changes)?;
        if substituted > 0 {
            replace_file_text(&path, &rewritten)?;
            let root = parser::parse_text(&path, &rewritten)?;
            self.files
                .insert(name.to_string(), FileDict::new(path, root));
        }
        Ok(substituted)
    }

    /// Applies one keyword change. A mapping value addresses the dictionary
    /// file of that name directly; a numeric triple expands through the
    /// mesh shortcuts (`cell`, `process`, `origin`, `domainsize`).
    pub fn apply(&mut self, keyword: &str, values: &KeyValues) -> Result<usize, PatchError> {
        if let KeyValues::Mapping(changes) = values {
            return self.apply_changes(keyword, changes);
        }

        let triple = numeric_triple(keyword, values)?;
        let lowered = keyword.to_ascii_lowercase();
        if lowered.contains("cell") {
            let counts = integer_triple(keyword, &triple)?;
            self.apply_changes("blockMeshDict", &cell_changes(counts))
        } else if lowered.contains("process") {
            let counts = integer_triple(keyword, &triple)?;
            self.apply_changes("decomposeParDict", &process_changes(counts))
        } else if lowered.contains("origin") {
            let far = self.block_vertex(keyword, 6)?;
            self.apply_changes("blockMeshDict", &vertex_changes(triple, far))
        } else if lowered.contains("domainsize") {
            let origin = self.block_vertex(keyword, 0)?;
            self.apply_changes("blockMeshDict", &vertex_changes(origin, triple))
        } else {
            Err(PatchError::UnsupportedValueType {
                keyword: keyword.to_string(),
                reason: "case dictionaries take a mapping, or a triple for a \
                         cell, process, origin, or domainsize shortcut",
            })
        }
    }

    fn block_vertex(&self, keyword: &str, index: usize) -> Result<[Value; 3], PatchError> {
        let vertex = self
            .file("blockMeshDict")
            .and_then(|file| file.lookup(&["vertices"]))
            .and_then(DictValue::as_rows)
            .and_then(|rows| rows.get(index));
        match vertex {
            Some(row) if row.len() == 3 => Ok([row[0].clone(), row[1].clone(), row[2].clone()]),
            _ => Err(PatchError::UnsupportedValueType {
                keyword: keyword.to_string(),
                reason: "the block mesh does not define an eight-vertex box",
            }),
        }
    }
}

fn junk_matcher() -> Result<GlobSet, PatchError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in JUNK_PATTERNS {
        let glob = GlobBuilder::new(pattern)
            .build()
            .map_err(|source| PatchError::Pattern {
                pattern: pattern.to_string(),
                source,
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| PatchError::Pattern {
        pattern: JUNK_PATTERNS.join(", "),
        source,
    })
}

fn dictionary_files(case_dir: &Path, junk: &GlobSet) -> Result<Vec<PathBuf>, PatchError> {
    let mut found = Vec::new();
    for sub in ["constant", "system"] {
        found.extend(sorted_files(&case_dir.join(sub), junk)?);
    }
    let block_mesh = case_dir.join("constant").join("polyMesh").join("blockMeshDict");
    if block_mesh.is_file() {
        found.push(block_mesh);
    }
    for path in sorted_files(&case_dir.join("0"), junk)? {
        if is_field_file(&path) {
            found.push(path);
        }
    }
    Ok(found)
}

fn sorted_files(dir: &Path, junk: &GlobSet) -> Result<Vec<PathBuf>, PatchError> {
    let mut paths = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(source) if source.kind() == ErrorKind::NotFound => return Ok(paths),
        Err(source) => return Err(io_patch_error(dir, source)),
    };
    for entry in entries {
        let entry = entry.map_err(|source| io_patch_error(dir, source))?;
        let path = entry.path();
        let name = path.file_name().unwrap_or_default();
        if path.is_file() && !junk.is_match(name) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// A `0/` entry is a field dictionary when its header declares one of the
/// recognised field classes. Unreadable candidates are skipped.
fn is_field_file(path: &Path) -> bool {
    let Ok(text) = std::fs::read_to_string(path) else {
        return false;
    };
    text.lines()
        .filter(|line| line.contains("class"))
        .any(|line| FIELD_CLASSES.iter().any(|class| line.contains(class)))
}

fn process_changes(counts: [i64; 3]) -> DictChangeMap {
    let [x, y, z] = counts;
    BTreeMap::from([
        (
            "numberOfSubdomains".to_string(),
            DictChange::Scalar(Value::Int(x * y * z)),
        ),
        (
            "simpleCoeffs".to_string(),
            DictChange::Nested(BTreeMap::from([(
                "n".to_string(),
                DictChange::Rows(vec![RowChange::values([x, y, z])]),
            )])),
        ),
    ])
}

fn cell_changes(counts: [i64; 3]) -> DictChangeMap {
    BTreeMap::from([(
        "blocks".to_string(),
        DictChange::Nested(BTreeMap::from([(
            "hex".to_string(),
            DictChange::Rows(vec![
                RowChange::Keep,
                RowChange::values(counts),
                RowChange::Keep,
            ]),
        )])),
    )])
}

/// Rebuilds the eight vertices of an axis-aligned box spanned by `origin`
/// and the opposite corner `far`.
fn vertex_changes(origin: [Value; 3], far: [Value; 3]) -> DictChangeMap {
    let [xo, yo, zo] = origin;
    let [xf, yf, zf] = far;
    let rows = vec![
        RowChange::Values(vec![xo.clone(), yo.clone(), zo.clone()]),
        RowChange::Values(vec![xf.clone(), yo.clone(), zo.clone()]),
        RowChange::Values(vec![xf.clone(), yf.clone(), zo.clone()]),
        RowChange::Values(vec![xo.clone(), yf.clone(), zo.clone()]),
        RowChange::Values(vec![xo.clone(), yo.clone(), zf.clone()]),
        RowChange::Values(vec![xf.clone(), yo.clone(), zf.clone()]),
        RowChange::Values(vec![xf.clone(), yf.clone(), zf.clone()]),
        RowChange::Values(vec![xo, yf, zf]),
    ];
    BTreeMap::from([("vertices".to_string(), DictChange::Rows(rows))])
}

fn numeric_triple(keyword: &str, values: &KeyValues) -> Result<[Value; 3], PatchError> {
    let unsupported = |reason: &'static str| PatchError::UnsupportedValueType {
        keyword: keyword.to_string(),
        reason,
    };
    let KeyValues::List(entries) = values else {
        return Err(unsupported("mesh shortcuts take exactly three values"));
    };
    if entries.len() != 3 {
        return Err(unsupported("mesh shortcuts take exactly three values"));
    }
    let mut triple = Vec::with_capacity(3);
    for entry in entries {
        match entry {
            Some(value) => triple.push(value.clone()),
            None => return Err(unsupported("keep markers do not apply to mesh shortcuts")),
        }
    }
    Ok([triple[0].clone(), triple[1].clone(), triple[2].clone()])
}

fn integer_triple(keyword: &str, triple: &[Value; 3]) -> Result<[i64; 3], PatchError> {
    let mut counts = [0i64; 3];
    for (slot, value) in counts.iter_mut().zip(triple) {
        match value {
            Value::Int(int) => *slot = *int,
            _ => {
                return Err(PatchError::UnsupportedValueType {
                    keyword: keyword.to_string(),
                    reason: "cell and process counts must be integers",
                });
            }
        }
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const DECOMPOSE: &str = "\
FoamFile
{
    version     2.0;
    object      decomposeParDict;
}

numberOfSubdomains    4;

method          simple;

simpleCoeffs
{
    n               (2 2 1);
    delta           0.001;
}
";

    const BLOCK_MESH: &str = "\
convertToMeters 1;

vertices
(
    (0 0 0)
    (1 0 0)
    (1 1 0)
    (0 1 0)
    (0 0 1)
    (1 0 1)
    (1 1 1)
    (0 1 1)
);

blocks
(
    hex (0 1 2 3 4 5 6 7) (8 8 8) simpleGrading (1 1 1)
);
";

    const VELOCITY_FIELD: &str = "\
FoamFile
{
    version     2.0;
    class       volVectorField;
    object      U;
}

internalField   uniform (0 0 0);
";

    fn write_case(root: &Path) {
        fs::create_dir_all(root.join("system")).unwrap();
        fs::create_dir_all(root.join("constant/polyMesh")).unwrap();
        fs::create_dir_all(root.join("0")).unwrap();
        fs::write(root.join("system/decomposeParDict"), DECOMPOSE).unwrap();
        fs::write(root.join("system/decomposeParDict.bak"), "junk {").unwrap();
        fs::write(root.join("constant/polyMesh/blockMeshDict"), BLOCK_MESH).unwrap();
        fs::write(root.join("0/U"), VELOCITY_FIELD).unwrap();
        fs::write(root.join("0/README"), "not a field\n").unwrap();
    }

    #[test]
    fn reads_case_files_and_skips_junk_and_non_fields() {
        let dir = tempfile::tempdir().unwrap();
        write_case(dir.path());

        let case = CaseDict::read(dir.path()).unwrap();
        assert!(case.file("decomposeParDict").is_some());
        assert!(case.file("blockMeshDict").is_some());
        assert!(case.file("U").is_some());
        assert!(case.file("README").is_none());
        assert!(case.file("decomposeParDict.bak").is_none());
        assert_eq!(case.process_count(), Some(4));
    }

    #[test]
    fn process_shortcut_updates_count_and_grid() {
        let dir = tempfile::tempdir().unwrap();
        write_case(dir.path());

        let mut case = CaseDict::read(dir.path()).unwrap();
        let substituted = case
            .apply("process", &KeyValues::list([2i64, 2, 2]))
            .unwrap();
        assert_eq!(substituted, 2);

        let text = fs::read_to_string(dir.path().join("system/decomposeParDict")).unwrap();
        assert!(text.contains("numberOfSubdomains    8;\n"));
        assert!(text.contains("    n               (2 2 2);\n"));
        assert_eq!(case.process_count(), Some(8));
    }

    #[test]
    fn cell_shortcut_touches_only_the_count_group() {
        let dir = tempfile::tempdir().unwrap();
        write_case(dir.path());

        let mut case = CaseDict::read(dir.path()).unwrap();
        case.apply("cell", &KeyValues::list([16i64, 16, 16])).unwrap();

        let text = fs::read_to_string(dir.path().join("constant/polyMesh/blockMeshDict")).unwrap();
        assert!(text.contains("    hex (0 1 2 3 4 5 6 7) (16 16 16) simpleGrading (1 1 1)\n"));
    }

    #[test]
    fn domainsize_shortcut_rebuilds_the_vertex_box() {
        let dir = tempfile::tempdir().unwrap();
        write_case(dir.path());

        let mut case = CaseDict::read(dir.path()).unwrap();
        case.apply("domainsize", &KeyValues::list([2.0f64, 3.0, 4.0]))
            .unwrap();

        let text = fs::read_to_string(dir.path().join("constant/polyMesh/blockMeshDict")).unwrap();
        assert!(text.contains("    (0 0 0)\n"));
        assert!(text.contains("    (2 0 0)\n"));
        assert!(text.contains("    (2 3 4)\n"));
        assert!(text.contains("    (0 3 4)\n"));
    }

    #[test]
    fn mapping_values_address_a_file_by_name() {
        let dir = tempfile::tempdir().unwrap();
        write_case(dir.path());

        let mut case = CaseDict::read(dir.path()).unwrap();
        let changes = BTreeMap::from([(
            "method".to_string(),
            DictChange::Scalar(Value::from("scotch")),
        )]);
        case.apply("decomposeParDict", &KeyValues::Mapping(changes))
            .unwrap();

        let text = fs::read_to_string(dir.path().join("system/decomposeParDict")).unwrap();
        assert!(text.contains("method          scotch;\n"));
    }

    #[test]
    fn unknown_dictionary_names_are_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_case(dir.path());

        let mut case = CaseDict::read(dir.path()).unwrap();
        let error = case
            .apply_changes("fvSolution", &DictChangeMap::new())
            .unwrap_err();
        assert!(matches!(error, PatchError::UnknownDictFile { .. }));
    }
}
