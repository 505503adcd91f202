use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use gwen_eval::{
    assemble, AssertionMode, Engine, EvalContext, FnJsEngine, Settings,
};
use gwen_syntax::EvalStatus;
use tempfile::TempDir;

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn evaluate(dir: &TempDir, settings: Settings) -> gwen_syntax::Spec {
    evaluate_with(dir, EvalContext::new(settings))
}

fn evaluate_with(dir: &TempDir, mut ctx: EvalContext) -> gwen_syntax::Spec {
    let stream = assemble(&[dir.path().to_path_buf()], &[], None).unwrap();
    let unit = stream.units().next().unwrap();
    Engine::new().evaluate_unit(&mut ctx, unit).unwrap()
}

#[test]
fn feature_with_bindings_and_assertions_passes() {
    let dir = TempDir::new().unwrap();
    write(
        &dir.path().join("a.feature"),
        "\
Feature: Bindings

  Scenario: bind and assert
    Given my name is \"world\"
    When my greeting is \"hello ${name}\"
    Then greeting should be \"hello world\"
    And greeting should contain \"hello\"
    And greeting should match regex \"^hello .+$\"
    And nothing should not be defined
",
    );
    let spec = evaluate(&dir, Settings::default());
    assert!(spec.eval_status().is_passed());
}

#[test]
fn stepdef_from_meta_is_dispatched() {
    let dir = TempDir::new().unwrap();
    write(
        &dir.path().join("steps.meta"),
        "\
Feature: Step library

  @StepDef
  Scenario: I prepare a user
    Given my user is \"mal\"
    And my role is \"captain\"
",
    );
    write(
        &dir.path().join("a.feature"),
        "\
Feature: Users

  Scenario: use the library
    Given I prepare a user
    Then user should be \"mal\"
    And role should be \"captain\"
",
    );
    let spec = evaluate(&dir, Settings::default());
    assert!(spec.eval_status().is_passed());

    let step = &spec.scenarios[0].steps[0];
    let body = step.stepdef.as_ref().expect("stepdef bound to the step");
    assert_eq!(body.steps.len(), 2);
    assert!(body.steps.iter().all(|s| s.eval_status.is_passed()));
}

#[test]
fn failing_background_skips_scenario_steps() {
    let dir = TempDir::new().unwrap();
    write(
        &dir.path().join("a.feature"),
        "\
Feature: f

  Background: broken
    Given x is \"1\"
    And x should be \"2\"

  Scenario: never runs
    Given y is \"3\"
",
    );
    let spec = evaluate(&dir, Settings::default());
    assert!(spec.eval_status().is_failed());
    let scenario = &spec.scenarios[0];
    assert_eq!(scenario.steps[0].eval_status, EvalStatus::Skipped);
}

#[test]
fn soft_assertion_mode_sustains_and_continues() {
    let dir = TempDir::new().unwrap();
    write(
        &dir.path().join("a.feature"),
        "\
Feature: f

  Scenario: soft failure
    Given x is \"1\"
    And x should be \"2\"
    And y is \"3\"
",
    );
    let spec = evaluate(
        &dir,
        Settings::default().with_assertion_mode(AssertionMode::Soft),
    );
    let scenario = &spec.scenarios[0];
    assert!(scenario.steps[1].eval_status.is_sustained());
    // Evaluation continued past the soft failure.
    assert!(scenario.steps[2].eval_status.is_passed());
    // Sustained absorbs into Passed at the scenario level.
    assert!(scenario.eval_status().is_passed());
    assert!(spec.eval_status().is_ok_exit());
}

#[test]
fn ignored_scenarios_are_disabled() {
    let dir = TempDir::new().unwrap();
    write(
        &dir.path().join("a.feature"),
        "\
Feature: f

  @Ignore
  Scenario: left out
    Given x is \"1\"

  Scenario: runs
    Given y is \"2\"
",
    );
    let spec = evaluate(&dir, Settings::default());
    assert_eq!(spec.scenarios[0].steps[0].eval_status, EvalStatus::Disabled);
    assert!(spec.scenarios[1].eval_status().is_passed());
}

#[test]
fn dry_run_loads_without_side_effects() {
    let dir = TempDir::new().unwrap();
    write(
        &dir.path().join("a.feature"),
        "\
Feature: f

  Scenario: would fail for real
    Given x is defined by system process \"exit 1\"
    And x should be \"whatever\"
",
    );
    let spec = evaluate(&dir, Settings::default().with_dry_run(true));
    assert!(spec.eval_status().is_ok_exit());
    for scenario in spec.all_scenarios() {
        for step in &scenario.steps {
            assert_eq!(step.eval_status, EvalStatus::Loaded);
        }
    }
}

#[test]
fn expanded_outline_evaluates_per_record() {
    let dir = TempDir::new().unwrap();
    write(
        &dir.path().join("a.feature"),
        "\
Feature: Join

  Scenario Outline: join strings
    Given left is \"<l>\"
    And right is \"<r>\"
    When joined is \"${left}${right}\"
    Then joined should be \"<lr>\"

    Examples: data
      | l     | r   | lr       |
      | howdy | doo | howdydoo |
      | any   | one | anyone   |
",
    );
    let spec = evaluate(&dir, Settings::default());
    assert!(spec.eval_status().is_passed());
    let expanded = &spec.scenarios[0].examples[0].scenarios;
    assert_eq!(expanded.len(), 2);
    assert!(expanded.iter().all(|s| s.eval_status().is_passed()));
}

#[test]
fn data_record_binds_into_feature_scope() {
    let dir = TempDir::new().unwrap();
    write(
        &dir.path().join("a.feature"),
        "\
Feature: f

  Scenario: uses record
    Then name should be \"mal\"
",
    );
    write(&dir.path().join("users.csv"), "name\nmal\n");
    let spec = evaluate(&dir, Settings::default());
    assert!(spec.eval_status().is_passed());
}

#[test]
fn if_defined_composite_abstains_when_unbound() {
    let dir = TempDir::new().unwrap();
    write(
        &dir.path().join("a.feature"),
        "\
Feature: f

  Scenario: conditional
    Given fallback is \"used\" if override is not defined
    Then fallback should be \"used\"
    And marker is \"x\" if override is defined
    And marker should not be defined
",
    );
    let spec = evaluate(&dir, Settings::default());
    assert!(spec.eval_status().is_passed());
    let guarded = &spec.scenarios[0].steps[2];
    assert_eq!(guarded.eval_status, EvalStatus::abstained());
}

#[test]
fn for_each_composite_iterates_elements() {
    let dir = TempDir::new().unwrap();
    write(
        &dir.path().join("a.feature"),
        "\
Feature: f

  Scenario: loop
    Given latest is \"${name}\" for each name in \"mal,zoe,wash\" delimited by \",\"
    Then latest should be \"wash\"
",
    );
    let spec = evaluate(&dir, Settings::default());
    assert!(spec.eval_status().is_passed(), "{:?}", spec.eval_status());
    let loop_step = &spec.scenarios[0].steps[0];
    let iterations = loop_step.stepdef.as_ref().unwrap();
    assert_eq!(iterations.steps.len(), 3);
}

#[test]
fn until_loop_runs_body_then_tests() {
    let dir = TempDir::new().unwrap();
    write(
        &dir.path().join("a.feature"),
        "\
Feature: f

  Scenario: wait for readiness
    Given probe is \"sent\" until \"isReady()\"
    Then probe should be \"sent\"
",
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let js = FnJsEngine::new(move |expression: &str| {
        assert_eq!(expression, "isReady()");
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(if n >= 3 { "true" } else { "false" }.to_string())
    });
    let ctx = EvalContext::new(Settings::default()).with_js_engine(Arc::new(js));
    let spec = evaluate_with(&dir, ctx);

    assert!(spec.eval_status().is_passed());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let loop_step = &spec.scenarios[0].steps[0];
    assert_eq!(loop_step.stepdef.as_ref().unwrap().steps.len(), 3);
}

#[test]
fn bounded_loop_fails_when_condition_never_holds() {
    let dir = TempDir::new().unwrap();
    write(
        &dir.path().join("a.feature"),
        "\
Feature: f

  Scenario: never ready
    Given probe is \"sent\" until \"isReady()\"
",
    );
    let js = FnJsEngine::new(|_: &str| Ok("false".to_string()));
    let ctx = EvalContext::new(
        Settings::default()
            .with_max_loop_iterations(4)
            .with_loop_delay(std::time::Duration::ZERO),
    )
    .with_js_engine(Arc::new(js));
    let spec = evaluate_with(&dir, ctx);

    assert!(spec.eval_status().is_failed());
    let error = spec.scenarios[0].steps[0].eval_status.error().unwrap().to_string();
    assert!(error.contains("4 iteration"), "{}", error);
}

#[test]
fn for_each_stepdef_runs_once_per_table_record() {
    let dir = TempDir::new().unwrap();
    write(
        &dir.path().join("steps.meta"),
        "\
Feature: lib

  @StepDef @ForEach @DataTable(horizontal=\"word,length\")
  Scenario: I check each word
    Given current is \"${word}\"
    Then current should be \"${word}\"
",
    );
    write(
        &dir.path().join("a.feature"),
        "\
Feature: f

  Scenario: table fan-out
    Given I check each word
      | hello | 5 |
      | hi    | 2 |
      | hey   | 3 |
",
    );
    let spec = evaluate(&dir, Settings::default());
    assert!(spec.eval_status().is_passed());
    let call = &spec.scenarios[0].steps[0];
    let iterations = call.stepdef.as_ref().unwrap();
    assert_eq!(iterations.steps.len(), 3);
}

#[test]
fn capture_and_sysproc_bindings_resolve() {
    let dir = TempDir::new().unwrap();
    write(
        &dir.path().join("a.feature"),
        "\
Feature: f

  Scenario: capture a process result
    Given stamp is defined by system process \"echo serenity\"
    When I capture stamp as ship
    Then ship should be \"serenity\"
",
    );
    let spec = evaluate(&dir, Settings::default());
    assert!(spec.eval_status().is_passed());
}

#[test]
fn file_binding_reads_sibling_file() {
    let dir = TempDir::new().unwrap();
    let payload = dir.path().join("payload.txt");
    write(&payload, "file content");
    write(
        &dir.path().join("a.feature"),
        &format!(
            "\
Feature: f

  Scenario: read the file
    Given body is defined by file \"{}\"
    Then body should be \"file content\"
",
            payload.display()
        ),
    );
    let spec = evaluate(&dir, Settings::default());
    assert!(spec.eval_status().is_passed());
}

#[test]
fn error_details_attachment_is_written_on_failure() {
    let dir = TempDir::new().unwrap();
    write(
        &dir.path().join("a.feature"),
        "\
Feature: f

  Scenario: fails
    Given x is \"1\"
    Then x should be \"2\"
",
    );
    let spec = evaluate(&dir, Settings::default());
    let failing = &spec.scenarios[0].steps[1];
    let (name, file) = failing
        .attachments
        .iter()
        .find(|(name, _)| name == "Error details")
        .expect("error details attached");
    assert_eq!(name, "Error details");
    let dump = fs::read_to_string(file).unwrap();
    assert!(dump.contains("should be"));
    assert!(dump.contains("x = 1"));
}
