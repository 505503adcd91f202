//! Data tables and the `@DataTable(...)` annotation.
//!
//! Three shapes are recognised. Horizontal tables carry their column
//! names in the first row; vertical tables are the transpose of that;
//! matrix tables use both the first row and the first column as
//! headers, with the corner cell naming the "vertex". External name
//! lists (`horizontal="n1,n2"`) replace the header row entirely: every
//! row of the literal table is then a record.

use crate::bail_eval;
use anyhow::Result;
use gwen_syntax::TableRow;

use crate::error::ErrorKind;

/// A record is an ordered list of `(name, value)` fields.
pub type Record = Vec<(String, String)>;

/// A data table resolved against its annotation.
#[derive(Debug, Clone, PartialEq)]
pub enum DataTable {
    /// Horizontal or vertical tables normalise to named records.
    Records { names: Vec<String>, rows: Vec<Vec<String>> },
    /// A matrix indexed by `(top, left)` header values.
    Matrix {
        vertex: String,
        top_names: Vec<String>,
        left_names: Vec<String>,
        cells: Vec<Vec<String>>,
    },
}

#[derive(Debug, Default)]
struct Annotation {
    horizontal: Option<Vec<String>>,
    vertical: Option<Vec<String>>,
    header: Option<String>,
    matrix: bool,
}

fn parse_annotation(value: &str) -> Result<Annotation> {
    let mut annotation = Annotation::default();
    let Some((key, raw)) = value.split_once('=') else {
        bail_eval!(
            ErrorKind::DataTable,
            "malformed @DataTable annotation '{}'",
            value
        );
    };
    let Some(unquoted) = raw
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    else {
        bail_eval!(
            ErrorKind::DataTable,
            "@DataTable value must be quoted in '{}'",
            value
        );
    };
    match key {
        "horizontal" => {
            annotation.horizontal = Some(split_names(unquoted));
        }
        "vertical" => {
            annotation.vertical = Some(split_names(unquoted));
        }
        "header" => match unquoted {
            "top" | "left" => annotation.header = Some(unquoted.to_string()),
            other => bail_eval!(
                ErrorKind::DataTable,
                "@DataTable header must be \"top\" or \"left\", got \"{}\"",
                other
            ),
        },
        "type" => match unquoted {
            "matrix" => annotation.matrix = true,
            other => bail_eval!(
                ErrorKind::DataTable,
                "@DataTable type must be \"matrix\", got \"{}\"",
                other
            ),
        },
        other => bail_eval!(ErrorKind::DataTable, "unknown @DataTable key '{}'", other),
    }
    Ok(annotation)
}

fn split_names(value: &str) -> Vec<String> {
    value.split(',').map(|n| n.trim().to_string()).collect()
}

fn transpose(rows: &[Vec<String>]) -> Vec<Vec<String>> {
    if rows.is_empty() {
        return Vec::new();
    }
    let width = rows[0].len();
    (0..width)
        .map(|col| rows.iter().map(|row| row[col].clone()).collect())
        .collect()
}

impl DataTable {
    /// Builds a data table from the tag annotation value (if any) and
    /// the literal table rows. A bare `@DataTable` defaults to a
    /// horizontal table with a top header.
    pub fn parse(annotation: Option<&str>, table: &[TableRow]) -> Result<DataTable> {
        let rows: Vec<Vec<String>> = table.iter().map(|r| r.cells.clone()).collect();
        if rows.is_empty() {
            bail_eval!(ErrorKind::DataTable, "data table has no rows");
        }

        let annotation = match annotation {
            Some(value) => parse_annotation(value)?,
            None => Annotation {
                header: Some("top".to_string()),
                ..Annotation::default()
            },
        };

        if annotation.matrix {
            return Self::parse_matrix(&rows);
        }

        if let Some(names) = annotation.horizontal {
            return Self::with_external_names(names, rows);
        }
        if let Some(names) = annotation.vertical {
            return Self::with_external_names(names, transpose(&rows));
        }

        let oriented = match annotation.header.as_deref() {
            Some("left") => transpose(&rows),
            _ => rows,
        };
        if oriented.len() < 2 {
            bail_eval!(
                ErrorKind::DataTable,
                "a data table without external names needs a header row and at least one record"
            );
        }
        let mut iter = oriented.into_iter();
        let names = iter.next().unwrap_or_default();
        Ok(DataTable::Records {
            names,
            rows: iter.collect(),
        })
    }

    fn with_external_names(names: Vec<String>, rows: Vec<Vec<String>>) -> Result<DataTable> {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        if names.len() != width {
            bail_eval!(
                ErrorKind::DataTable,
                "{} name(s) declared for a table with {} column(s)",
                names.len(),
                width
            );
        }
        Ok(DataTable::Records { names, rows })
    }

    fn parse_matrix(rows: &[Vec<String>]) -> Result<DataTable> {
        if rows.len() < 2 || rows[0].len() < 2 {
            bail_eval!(
                ErrorKind::DataTable,
                "a matrix table needs a header row, a header column and at least one cell"
            );
        }
        let vertex = rows[0][0].clone();
        let top_names = rows[0][1..].to_vec();
        let left_names: Vec<String> = rows[1..].iter().map(|r| r[0].clone()).collect();
        let cells: Vec<Vec<String>> = rows[1..].iter().map(|r| r[1..].to_vec()).collect();
        Ok(DataTable::Matrix {
            vertex,
            top_names,
            left_names,
            cells,
        })
    }

    /// The record field names. For a matrix these are the vertex name
    /// followed by the top header names.
    pub fn names(&self) -> Vec<String> {
        match self {
            DataTable::Records { names, .. } => names.clone(),
            DataTable::Matrix {
                vertex, top_names, ..
            } => {
                let mut names = vec![vertex.clone()];
                names.extend(top_names.iter().cloned());
                names
            }
        }
    }

    /// The records of this table, one `(name, value)` list each. A
    /// matrix yields one record per left-header row, with the vertex
    /// field carrying the left name.
    pub fn records(&self) -> Vec<Record> {
        match self {
            DataTable::Records { names, rows } => rows
                .iter()
                .map(|row| {
                    names
                        .iter()
                        .cloned()
                        .zip(row.iter().cloned())
                        .collect::<Record>()
                })
                .collect(),
            DataTable::Matrix {
                vertex,
                top_names,
                left_names,
                cells,
            } => left_names
                .iter()
                .zip(cells.iter())
                .map(|(left, row)| {
                    let mut record: Record = vec![(vertex.clone(), left.clone())];
                    record.extend(top_names.iter().cloned().zip(row.iter().cloned()));
                    record
                })
                .collect(),
        }
    }

    /// Matrix lookup by `(top, left)` header values.
    pub fn cell(&self, top: &str, left: &str) -> Option<&str> {
        match self {
            DataTable::Matrix {
                top_names,
                left_names,
                cells,
                ..
            } => {
                let col = top_names.iter().position(|n| n == top)?;
                let row = left_names.iter().position(|n| n == left)?;
                cells.get(row).and_then(|r| r.get(col)).map(String::as_str)
            }
            DataTable::Records { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(data: &[&[&str]]) -> Vec<TableRow> {
        data.iter()
            .enumerate()
            .map(|(i, cells)| {
                TableRow::new(i + 1, cells.iter().map(|c| c.to_string()).collect())
            })
            .collect()
    }

    #[test]
    fn horizontal_default_takes_header_from_first_row() {
        let table = rows(&[&["a", "b"], &["1", "2"], &["3", "4"]]);
        let data = DataTable::parse(None, &table).unwrap();
        assert_eq!(data.names(), vec!["a", "b"]);
        let records = data.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0][0], ("a".to_string(), "1".to_string()));
        assert_eq!(records[1][1], ("b".to_string(), "4".to_string()));
    }

    #[test]
    fn external_horizontal_names_make_every_row_a_record() {
        let table = rows(&[&["1", "2"], &["3", "4"]]);
        let data = DataTable::parse(Some("horizontal=\"x,y\""), &table).unwrap();
        assert_eq!(data.records().len(), 2);
        assert_eq!(data.names(), vec!["x", "y"]);
    }

    #[test]
    fn name_count_must_match_column_count() {
        let table = rows(&[&["1", "2"]]);
        let err = DataTable::parse(Some("horizontal=\"x,y,z\""), &table).unwrap_err();
        assert_eq!(crate::error::kind_of(&err), ErrorKind::DataTable);
    }

    #[test]
    fn vertical_header_transposes() {
        let table = rows(&[&["name", "mal", "zoe"], &["role", "captain", "pilot"]]);
        let data = DataTable::parse(Some("header=\"left\""), &table).unwrap();
        assert_eq!(data.names(), vec!["name", "role"]);
        let records = data.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0][0].1, "mal");
        assert_eq!(records[1][1].1, "pilot");
    }

    #[test]
    fn vertical_external_names() {
        let table = rows(&[&["1", "3"], &["2", "4"]]);
        let data = DataTable::parse(Some("vertical=\"x,y\""), &table).unwrap();
        // transpose: records are the original columns
        let records = data.records();
        assert_eq!(records[0], vec![
            ("x".to_string(), "1".to_string()),
            ("y".to_string(), "2".to_string())
        ]);
    }

    #[test]
    fn single_row_without_names_is_rejected() {
        let table = rows(&[&["a", "b"]]);
        assert!(DataTable::parse(None, &table).is_err());
    }

    #[test]
    fn matrix_indexes_by_top_and_left() {
        let table = rows(&[
            &["size", "S", "M"],
            &["red", "rs", "rm"],
            &["blue", "bs", "bm"],
        ]);
        let data = DataTable::parse(Some("type=\"matrix\""), &table).unwrap();
        assert_eq!(data.cell("S", "red"), Some("rs"));
        assert_eq!(data.cell("M", "blue"), Some("bm"));
        assert_eq!(data.cell("L", "red"), None);
        let records = data.records();
        assert_eq!(records[0][0], ("size".to_string(), "red".to_string()));
        assert_eq!(records[1][2], ("M".to_string(), "bm".to_string()));
    }

    #[test]
    fn malformed_annotation_is_rejected() {
        let table = rows(&[&["a"], &["1"]]);
        assert!(DataTable::parse(Some("bogus"), &table).is_err());
        assert!(DataTable::parse(Some("header=\"middle\""), &table).is_err());
        assert!(DataTable::parse(Some("type=\"cube\""), &table).is_err());
        assert!(DataTable::parse(Some("horizontal=x"), &table).is_err());
    }
}
