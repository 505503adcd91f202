use std::fs;
use std::path::{Path, PathBuf};

use gwen_eval::{assemble, ErrorKind};
use tempfile::TempDir;

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn feature(path: &Path) {
    write(
        path,
        "Feature: f\n\n  Scenario: s\n    Given x is \"1\"\n",
    );
}

fn meta(path: &Path) {
    write(
        path,
        "Feature: m\n\n  @StepDef\n  Scenario: helper\n    Given y is \"2\"\n",
    );
}

#[test]
fn meta_files_are_inherited_parent_before_child() {
    let root = TempDir::new().unwrap();
    let dir_a = root.path().join("dirA");
    meta(&dir_a.join("fileA.meta"));
    meta(&dir_a.join("dirB").join("fileAB.meta"));
    feature(&dir_a.join("dirB").join("dir1").join("fileAB1.feature"));

    let stream = assemble(&[dir_a.clone()], &[], None).unwrap();
    assert_eq!(stream.unit_count(), 1);
    let unit = stream.units().next().unwrap();
    assert_eq!(
        unit.meta_files,
        vec![
            dir_a.join("fileA.meta"),
            dir_a.join("dirB").join("fileAB.meta"),
        ]
    );
}

#[test]
fn extra_meta_files_come_first() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("features");
    meta(&dir.join("local.meta"));
    feature(&dir.join("a.feature"));
    let shared = root.path().join("shared.meta");
    meta(&shared);

    let stream = assemble(&[dir.clone()], &[shared.clone()], None).unwrap();
    let unit = stream.units().next().unwrap();
    assert_eq!(unit.meta_files, vec![shared, dir.join("local.meta")]);
}

#[test]
fn directory_contents_are_sorted_and_inputs_keep_order() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("dir");
    feature(&dir.join("b.feature"));
    feature(&dir.join("a.feature"));
    let single = root.path().join("z.feature");
    feature(&single);

    let stream = assemble(&[single.clone(), dir.clone()], &[], None).unwrap();
    let files: Vec<PathBuf> = stream.units().map(|u| u.feature_file.clone()).collect();
    assert_eq!(
        files,
        vec![single, dir.join("a.feature"), dir.join("b.feature")]
    );
    assert_eq!(stream.suites.len(), 2);
}

#[test]
fn csv_data_file_multiplies_units_per_record() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("data");
    feature(&dir.join("a.feature"));
    write(&dir.join("records.csv"), "name,role\nmal,captain\nzoe,pilot\n");

    let stream = assemble(&[dir], &[], None).unwrap();
    assert_eq!(stream.unit_count(), 2);
    let units: Vec<_> = stream.units().collect();
    let first = units[0].data_record.as_ref().unwrap();
    assert_eq!(first.number, 1);
    assert_eq!(first.total, 2);
    assert_eq!(
        first.fields,
        vec![
            ("name".to_string(), "mal".to_string()),
            ("role".to_string(), "captain".to_string())
        ]
    );
    assert_eq!(units[1].data_record.as_ref().unwrap().number, 2);
}

#[test]
fn json_data_file_is_recognised() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("data");
    feature(&dir.join("a.feature"));
    write(
        &dir.join("records.json"),
        r#"[{"name": "mal"}, {"name": "zoe"}]"#,
    );

    let stream = assemble(&[dir], &[], None).unwrap();
    assert_eq!(stream.unit_count(), 2);
}

#[test]
fn two_sibling_data_files_are_ambiguous() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("data");
    feature(&dir.join("a.feature"));
    write(&dir.join("one.csv"), "a\n1\n");
    write(&dir.join("two.json"), r#"[{"a": "1"}]"#);

    let err = assemble(&[dir], &[], None).unwrap_err();
    assert_eq!(gwen_eval::error::kind_of(&err), ErrorKind::Ambiguous);
}

#[test]
fn explicit_data_file_always_wins() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("data");
    feature(&dir.join("a.feature"));
    write(&dir.join("one.csv"), "a\n1\n");
    write(&dir.join("two.json"), r#"[{"a": "1"}]"#);
    let explicit = root.path().join("explicit.csv");
    write(&explicit, "b\nx\ny\nz\n");

    let stream = assemble(&[dir], &[], Some(&explicit)).unwrap();
    assert_eq!(stream.unit_count(), 3);
    for unit in stream.units() {
        assert_eq!(unit.data_record.as_ref().unwrap().file, explicit);
    }
}

#[test]
fn feature_without_data_yields_single_unit() {
    let root = TempDir::new().unwrap();
    let file = root.path().join("plain.feature");
    feature(&file);

    let stream = assemble(&[file], &[], None).unwrap();
    assert_eq!(stream.unit_count(), 1);
    assert!(stream.units().next().unwrap().data_record.is_none());
}

#[test]
fn unit_indices_are_sequential_across_suites() {
    let root = TempDir::new().unwrap();
    let a = root.path().join("a.feature");
    let b = root.path().join("sub").join("b.feature");
    feature(&a);
    feature(&b);

    let stream = assemble(&[a, b], &[], None).unwrap();
    let indices: Vec<usize> = stream.units().map(|u| u.index).collect();
    assert_eq!(indices, vec![0, 1]);
}
