use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use gwen_eval::launcher::ResultsSummary;
use gwen_eval::{assemble, Engine, FeatureUnit, Launcher, Reporter, Settings, SpecResult};
use tempfile::TempDir;

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn passing_feature(path: &Path, name: &str) {
    write(
        path,
        &format!(
            "Feature: {}\n\n  Scenario: ok\n    Given x is \"1\"\n    Then x should be \"1\"\n",
            name
        ),
    );
}

fn failing_feature(path: &Path, name: &str) {
    write(
        path,
        &format!(
            "Feature: {}\n\n  Scenario: broken\n    Given x is \"1\"\n    Then x should be \"2\"\n",
            name
        ),
    );
}

struct CollectingReporter {
    details: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<bool>>,
}

impl Reporter for CollectingReporter {
    fn report_detail(
        &mut self,
        _unit: &FeatureUnit,
        result: &SpecResult,
    ) -> anyhow::Result<Option<PathBuf>> {
        self.details
            .lock()
            .unwrap()
            .push(format!("{}:{}", result.unit_name, result.status.keyword()));
        Ok(None)
    }

    fn close(
        &mut self,
        _engine: &Engine,
        _status: &gwen_syntax::EvalStatus,
    ) -> anyhow::Result<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

#[test]
fn mixed_results_summarise_and_exit_nonzero() {
    let dir = TempDir::new().unwrap();
    passing_feature(&dir.path().join("a_ok.feature"), "Passing");
    failing_feature(&dir.path().join("b_bad.feature"), "Failing");

    let settings = Settings::default().with_parallel(true).with_max_parallel_units(2);
    let launcher = Launcher::new(settings, Engine::new());
    let stream = assemble(&[dir.path().to_path_buf()], &[], None).unwrap();
    let summary = launcher.run(&stream).unwrap();

    assert_eq!(summary.results.len(), 2);
    let counts = summary.feature_counts();
    assert!(counts.contains(&("Passed", 1)));
    assert!(counts.contains(&("Failed", 1)));
    assert_eq!(summary.exit_code(), 1);
}

#[test]
fn parallel_and_sequential_agree_per_unit() {
    let dir = TempDir::new().unwrap();
    passing_feature(&dir.path().join("a.feature"), "A");
    failing_feature(&dir.path().join("b.feature"), "B");
    passing_feature(&dir.path().join("c.feature"), "C");

    let run = |parallel: bool| -> ResultsSummary {
        let settings = Settings::default()
            .with_parallel(parallel)
            .with_max_parallel_units(3);
        let launcher = Launcher::new(settings, Engine::new());
        let stream = assemble(&[dir.path().to_path_buf()], &[], None).unwrap();
        launcher.run(&stream).unwrap()
    };

    let sequential = run(false);
    let parallel = run(true);

    let mut seq: Vec<(usize, String)> = sequential
        .results
        .iter()
        .map(|r| (r.unit_index, r.status.keyword().to_string()))
        .collect();
    let mut par: Vec<(usize, String)> = parallel
        .results
        .iter()
        .map(|r| (r.unit_index, r.status.keyword().to_string()))
        .collect();
    seq.sort();
    par.sort();
    assert_eq!(seq, par);
    assert_eq!(sequential.status().keyword(), parallel.status().keyword());
}

#[test]
fn failfast_stops_after_first_failure() {
    let dir = TempDir::new().unwrap();
    failing_feature(&dir.path().join("a_bad.feature"), "A");
    passing_feature(&dir.path().join("b.feature"), "B");
    passing_feature(&dir.path().join("c.feature"), "C");

    let settings = Settings::default().with_failfast_exit(true);
    let launcher = Launcher::new(settings, Engine::new());
    let stream = assemble(&[dir.path().to_path_buf()], &[], None).unwrap();
    let summary = launcher.run(&stream).unwrap();

    assert_eq!(summary.results.len(), 1);
    assert_eq!(summary.exit_code(), 1);
}

#[test]
fn failfast_never_applies_in_dry_run() {
    let dir = TempDir::new().unwrap();
    failing_feature(&dir.path().join("a_bad.feature"), "A");
    passing_feature(&dir.path().join("b.feature"), "B");

    let settings = Settings::default().with_failfast_exit(true).with_dry_run(true);
    let launcher = Launcher::new(settings, Engine::new());
    let stream = assemble(&[dir.path().to_path_buf()], &[], None).unwrap();
    let summary = launcher.run(&stream).unwrap();

    assert_eq!(summary.results.len(), 2);
    assert_eq!(summary.exit_code(), 0);
}

#[test]
fn reporters_see_every_unit_and_close() {
    let dir = TempDir::new().unwrap();
    passing_feature(&dir.path().join("a.feature"), "A");
    failing_feature(&dir.path().join("b.feature"), "B");

    let details = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(Mutex::new(false));
    let mut launcher = Launcher::new(Settings::default(), Engine::new());
    launcher.add_reporter(Box::new(CollectingReporter {
        details: Arc::clone(&details),
        closed: Arc::clone(&closed),
    }));

    let stream = assemble(&[dir.path().to_path_buf()], &[], None).unwrap();
    launcher.run(&stream).unwrap();

    let details = details.lock().unwrap();
    assert_eq!(details.len(), 2);
    assert!(details.iter().any(|d| d.ends_with(":Passed")));
    assert!(details.iter().any(|d| d.ends_with(":Failed")));
    assert!(*closed.lock().unwrap());
}

#[test]
fn unparseable_feature_fails_only_its_unit() {
    let dir = TempDir::new().unwrap();
    write(&dir.path().join("a_bad.feature"), "Scenario: no feature header\n");
    passing_feature(&dir.path().join("b.feature"), "B");

    let launcher = Launcher::new(Settings::default(), Engine::new());
    let stream = assemble(&[dir.path().to_path_buf()], &[], None).unwrap();
    let summary = launcher.run(&stream).unwrap();

    assert_eq!(summary.results.len(), 2);
    let bad = summary
        .results
        .iter()
        .find(|r| r.unit_name.contains("a_bad"))
        .unwrap();
    assert!(bad.status.is_failed());
    assert!(bad.status.error().unwrap().contains("syntax"));
    let good = summary
        .results
        .iter()
        .find(|r| r.unit_name.contains("b.feature"))
        .unwrap();
    assert!(good.status.is_passed());
}

#[test]
fn data_records_fan_out_into_unit_results() {
    let dir = TempDir::new().unwrap();
    write(
        &dir.path().join("a.feature"),
        "Feature: f\n\n  Scenario: per record\n    Then name should be \"${name}\"\n",
    );
    write(&dir.path().join("names.csv"), "name\nmal\nzoe\n");

    let launcher = Launcher::new(Settings::default(), Engine::new());
    let stream = assemble(&[dir.path().to_path_buf()], &[], None).unwrap();
    let summary = launcher.run(&stream).unwrap();

    assert_eq!(summary.results.len(), 2);
    assert!(summary.results.iter().all(|r| r.status.is_passed()));
    assert!(summary.results[0].unit_name.contains("[1 of 2]"));
}
