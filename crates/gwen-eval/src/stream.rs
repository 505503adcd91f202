//! Assembly of feature units from input paths.
//!
//! Each input path contributes one suite. Directories are walked
//! depth-first in sorted order; every `.feature` file becomes a unit
//! carrying the union of `.meta` files found on the directory path from
//! the input down to it (parent before child). A data file (`.csv` or
//! `.json`) sitting beside a feature file multiplies the unit into one
//! per record.

use crate::bail_eval;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::error::ErrorKind;

/// One record of a data file, bound into feature scope before the unit
/// evaluates.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRecord {
    pub file: PathBuf,
    /// 1-based record number.
    pub number: usize,
    pub total: usize,
    pub fields: Vec<(String, String)>,
}

/// The schedulable atom: a feature file, its inherited meta files, and
/// an optional data record.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureUnit {
    pub feature_file: PathBuf,
    pub meta_files: Vec<PathBuf>,
    pub data_record: Option<DataRecord>,
    /// Position in the overall stream, used for tie-breaking summaries.
    pub index: usize,
}

impl FeatureUnit {
    /// Display name: the feature file plus the record number when data
    /// bound.
    pub fn name(&self) -> String {
        match &self.data_record {
            Some(record) => format!(
                "{} [{} of {}]",
                self.feature_file.display(),
                record.number,
                record.total
            ),
            None => self.feature_file.display().to_string(),
        }
    }
}

/// The units contributed by one input path.
#[derive(Debug, Clone)]
pub struct Suite {
    pub input: PathBuf,
    pub units: Vec<FeatureUnit>,
}

/// The assembled stream of suites.
#[derive(Debug, Clone)]
pub struct FeatureStream {
    pub suites: Vec<Suite>,
}

impl FeatureStream {
    /// All units across all suites, in input order.
    pub fn units(&self) -> impl Iterator<Item = &FeatureUnit> {
        self.suites.iter().flat_map(|suite| suite.units.iter())
    }

    pub fn unit_count(&self) -> usize {
        self.suites.iter().map(|s| s.units.len()).sum()
    }
}

/// Assembles the feature stream. `extra_meta` files (from the CLI) are
/// attached to every unit ahead of discovered ones; an explicit data
/// file overrides any data file discovered beside a feature.
pub fn assemble(
    inputs: &[PathBuf],
    extra_meta: &[PathBuf],
    explicit_data: Option<&Path>,
) -> Result<FeatureStream> {
    let mut suites = Vec::new();
    let mut index = 0;
    for input in inputs {
        let mut units = Vec::new();
        if input.is_dir() {
            walk_directory(input, extra_meta, &[], explicit_data, &mut units, &mut index)?;
        } else {
            let meta = metas_in(input.parent().unwrap_or(Path::new(".")))?;
            let inherited: Vec<PathBuf> =
                extra_meta.iter().cloned().chain(meta.into_iter()).collect();
            push_units(input, &inherited, explicit_data, &mut units, &mut index)?;
        }
        suites.push(Suite {
            input: input.clone(),
            units,
        });
    }
    Ok(FeatureStream { suites })
}

fn walk_directory(
    dir: &Path,
    extra_meta: &[PathBuf],
    inherited: &[PathBuf],
    explicit_data: Option<&Path>,
    units: &mut Vec<FeatureUnit>,
    index: &mut usize,
) -> Result<()> {
    let mut meta_chain: Vec<PathBuf> = inherited.to_vec();
    meta_chain.extend(metas_in(dir)?);

    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    entries.sort();

    for entry in &entries {
        if entry.is_file() && has_extension(entry, "feature") {
            let meta: Vec<PathBuf> = extra_meta
                .iter()
                .cloned()
                .chain(meta_chain.iter().cloned())
                .collect();
            push_units(entry, &meta, explicit_data, units, index)?;
        }
    }
    for entry in &entries {
        if entry.is_dir() {
            walk_directory(entry, extra_meta, &meta_chain, explicit_data, units, index)?;
        }
    }
    Ok(())
}

/// The `.meta` files directly inside `dir`, sorted by path.
fn metas_in(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut metas: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_extension(path, "meta"))
        .collect();
    metas.sort();
    Ok(metas)
}

fn push_units(
    feature_file: &Path,
    meta_files: &[PathBuf],
    explicit_data: Option<&Path>,
    units: &mut Vec<FeatureUnit>,
    index: &mut usize,
) -> Result<()> {
    let data_file = match explicit_data {
        Some(file) => Some(file.to_path_buf()),
        None => discover_data_file(feature_file)?,
    };

    let records = match &data_file {
        Some(file) => load_records(file)?,
        None => Vec::new(),
    };

    if records.is_empty() {
        units.push(FeatureUnit {
            feature_file: feature_file.to_path_buf(),
            meta_files: meta_files.to_vec(),
            data_record: None,
            index: *index,
        });
        *index += 1;
        return Ok(());
    }

    let total = records.len();
    let file = data_file.expect("records imply a data file");
    for (i, fields) in records.into_iter().enumerate() {
        units.push(FeatureUnit {
            feature_file: feature_file.to_path_buf(),
            meta_files: meta_files.to_vec(),
            data_record: Some(DataRecord {
                file: file.clone(),
                number: i + 1,
                total,
                fields,
            }),
            index: *index,
        });
        *index += 1;
    }
    Ok(())
}

/// Finds the single data file beside a feature. Two candidates with no
/// explicit override is ambiguous.
fn discover_data_file(feature_file: &Path) -> Result<Option<PathBuf>> {
    let Some(dir) = feature_file.parent().filter(|d| d.is_dir()) else {
        return Ok(None);
    };
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file() && (has_extension(path, "csv") || has_extension(path, "json"))
        })
        .collect();
    candidates.sort();

    match candidates.len() {
        0 => Ok(None),
        1 => Ok(candidates.pop()),
        _ => bail_eval!(
            ErrorKind::Ambiguous,
            "multiple data files beside {}: {}",
            feature_file.display(),
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

/// Loads the records of a CSV or JSON data file. Values are always
/// strings.
pub fn load_records(file: &Path) -> Result<Vec<Vec<(String, String)>>> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read data file: {}", file.display()))?;
    if has_extension(file, "json") {
        parse_json_records(&content)
    } else {
        parse_csv_records(&content)
    }
}

fn parse_json_records(content: &str) -> Result<Vec<Vec<(String, String)>>> {
    let values: Vec<serde_json::Map<String, serde_json::Value>> =
        serde_json::from_str(content).context("data file is not a JSON array of objects")?;
    Ok(values
        .into_iter()
        .map(|object| {
            object
                .into_iter()
                .map(|(name, value)| {
                    let value = match value {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (name, value)
                })
                .collect()
        })
        .collect())
}

fn parse_csv_records(content: &str) -> Result<Vec<Vec<(String, String)>>> {
    let mut lines = content.lines().filter(|line| !line.trim().is_empty());
    let Some(header) = lines.next() else {
        return Ok(Vec::new());
    };
    let names = split_csv_line(header);
    let mut records = Vec::new();
    for line in lines {
        let cells = split_csv_line(line);
        if cells.len() != names.len() {
            bail_eval!(
                ErrorKind::Syntax,
                "CSV record has {} field(s), header has {}",
                cells.len(),
                names.len()
            );
        }
        records.push(names.iter().cloned().zip(cells).collect());
    }
    Ok(records)
}

/// Splits one CSV line, honouring double-quoted fields with `""`
/// escapes.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if quoted => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    quoted = false;
                }
            }
            '"' if current.is_empty() => quoted = true,
            ',' if !quoted => {
                cells.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(ch),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().map(|e| e == extension).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_split_handles_quotes() {
        assert_eq!(split_csv_line("a,b,c"), vec!["a", "b", "c"]);
        assert_eq!(split_csv_line("\"a,b\",c"), vec!["a,b", "c"]);
        assert_eq!(split_csv_line("\"say \"\"hi\"\"\",x"), vec!["say \"hi\"", "x"]);
    }

    #[test]
    fn csv_records_zip_header_names() {
        let records = parse_csv_records("name,role\nmal,captain\nzoe,first mate\n").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0],
            vec![
                ("name".to_string(), "mal".to_string()),
                ("role".to_string(), "captain".to_string())
            ]
        );
    }

    #[test]
    fn ragged_csv_record_is_rejected() {
        assert!(parse_csv_records("a,b\n1\n").is_err());
    }

    #[test]
    fn json_records_stringify_values() {
        let records =
            parse_json_records(r#"[{"name": "mal", "age": 49}, {"name": "zoe", "age": 33}]"#)
                .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].contains(&("age".to_string(), "49".to_string())));
    }

    #[test]
    fn non_array_json_is_rejected() {
        assert!(parse_json_records(r#"{"name": "mal"}"#).is_err());
    }
}
