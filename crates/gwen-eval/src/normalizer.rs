//! Normalisation of parsed specs into evaluable specs.
//!
//! Transformations, in order: outline expansion (one scenario per
//! example record, tagged `@Synthetic`), background replication by
//! copy into each expanded scenario, node-path assignment, and
//! doc-stringification of trailing `"$<param>"` literals. All of it is
//! pure tree rewriting; running it twice is a no-op.

use anyhow::Result;
use gwen_syntax::ast::node_path_segment;
use gwen_syntax::{Background, DocString, Examples, Scenario, Spec, Step, Tag};

use crate::table::DataTable;

/// Normalises a parsed spec. The input tree is consumed; the result is
/// the evaluable tree the engine walks.
pub fn normalise(mut spec: Spec) -> Result<Spec> {
    let feature_background = spec.background.clone();
    for scenario in &mut spec.scenarios {
        expand_outline(scenario, feature_background.as_ref())?;
    }
    for rule in &mut spec.rules {
        let rule_background = rule.background.clone().or_else(|| feature_background.clone());
        for scenario in &mut rule.scenarios {
            expand_outline(scenario, rule_background.as_ref())?;
        }
    }
    docstringify_spec(&mut spec);
    assign_node_paths(&mut spec);
    Ok(spec)
}

/// Expands an outline scenario into one scenario per example record.
/// Already-expanded examples are left alone so normalisation stays
/// idempotent.
fn expand_outline(scenario: &mut Scenario, background: Option<&Background>) -> Result<()> {
    if !scenario.is_outline() {
        return Ok(());
    }
    let data_annotation: Option<Option<String>> =
        scenario.data_table_tag().map(|tag| tag.value.clone());

    let mut examples_list = std::mem::take(&mut scenario.examples);
    for examples in &mut examples_list {
        if !examples.scenarios.is_empty() {
            continue;
        }
        let names = &examples.table[0].cells;
        let records = &examples.table[1..];
        let total = records.len();
        let mut expanded = Vec::with_capacity(total);
        for (index, record) in records.iter().enumerate() {
            let params: Vec<(String, String)> = names
                .iter()
                .cloned()
                .zip(record.cells.iter().cloned())
                .collect();
            expanded.push(expand_record(
                scenario,
                examples,
                &params,
                index + 1,
                total,
                background,
                data_annotation.as_ref().map(|value| value.as_deref()),
            )?);
        }
        examples.scenarios = expanded;
    }
    scenario.examples = examples_list;
    Ok(())
}

fn expand_record(
    outline: &Scenario,
    examples: &Examples,
    params: &[(String, String)],
    record: usize,
    total: usize,
    background: Option<&Background>,
    data_annotation: Option<Option<&str>>,
) -> Result<Scenario> {
    let name = format!(
        "{} -- {} (record {} of {})",
        outline.name, examples.name, record, total
    );

    let mut tags = outline.tags.clone();
    tags.push(Tag::new("Synthetic", examples.source_ref.clone()));

    let steps: Vec<Step> = outline
        .steps
        .iter()
        .map(|step| substitute_step(step, params))
        .collect();

    let mut replicated = background.map(Background::copy_fresh);
    if let Some(annotation) = data_annotation {
        let table = DataTable::parse(annotation, &examples.table)?;
        let records = table.records();
        // External name lists keep the header row as a record; skip it
        // so record numbering stays aligned with the expansion.
        let index = if records.len() > total { record } else { record - 1 };
        let data_record = records.into_iter().nth(index).unwrap_or_default();
        replicated = Some(data_background(&data_record, replicated, examples));
    }

    Ok(Scenario::new(name, examples.source_ref.clone())
        .with_keyword("Scenario")
        .with_tags(tags)
        .with_background(replicated)
        .with_steps(steps)
        .with_params(params.to_vec())
        .with_caller_params(outline.caller_params.clone()))
}

/// Builds the synthetic background that binds one data record through
/// `@Data` steps, prepended to any replicated background steps. The
/// steps are labelled positionally (`string N is "value"`) whatever the
/// column names are.
fn data_background(
    record: &[(String, String)],
    replicated: Option<Background>,
    examples: &Examples,
) -> Background {
    let mut steps: Vec<Step> = record
        .iter()
        .enumerate()
        .map(|(index, (_, value))| {
            Step::new(
                "Given",
                format!("string {} is \"{}\"", index + 1, value),
                examples.source_ref.clone(),
            )
        })
        .collect();
    let name = match &replicated {
        Some(background) => format!("Data + {}", background.name),
        None => "Data".to_string(),
    };
    if let Some(background) = replicated {
        steps.extend(background.steps);
    }
    Background::new(name, examples.source_ref.clone()).with_steps(steps)
}

/// Replaces `<name>` placeholders in step text, table cells and
/// doc-strings with the record's values.
fn substitute_step(step: &Step, params: &[(String, String)]) -> Step {
    let substitute = |text: &str| {
        let mut out = text.to_string();
        for (name, value) in params {
            out = out.replace(&format!("<{}>", name), value);
        }
        out
    };
    let mut copy = step.copy_fresh();
    copy.text = substitute(&step.text);
    copy.table = step
        .table
        .iter()
        .map(|row| gwen_syntax::TableRow::new(
            row.line,
            row.cells.iter().map(|c| substitute(c)).collect(),
        ))
        .collect();
    copy.doc_string = step.doc_string.as_ref().map(|doc| DocString {
        line: doc.line,
        content: substitute(&doc.content),
        media_type: doc.media_type.clone(),
    });
    copy.params = params.to_vec();
    copy
}

fn docstringify_spec(spec: &mut Spec) {
    if let Some(background) = &mut spec.background {
        background.steps.iter_mut().for_each(docstringify);
    }
    for scenario in &mut spec.scenarios {
        docstringify_scenario(scenario);
    }
    for rule in &mut spec.rules {
        if let Some(background) = &mut rule.background {
            background.steps.iter_mut().for_each(docstringify);
        }
        for scenario in &mut rule.scenarios {
            docstringify_scenario(scenario);
        }
    }
}

fn docstringify_scenario(scenario: &mut Scenario) {
    if let Some(background) = &mut scenario.background {
        background.steps.iter_mut().for_each(docstringify);
    }
    scenario.steps.iter_mut().for_each(docstringify);
    for examples in &mut scenario.examples {
        for expanded in &mut examples.scenarios {
            docstringify_scenario(expanded);
        }
    }
}

/// Rewrites `… "$<param>"` tails into a doc-string so long parameter
/// values can be supplied as multi-line bodies.
fn docstringify(step: &mut Step) {
    if step.doc_string.is_some() {
        return;
    }
    let Some(open) = step.text.rfind(" \"$<") else {
        return;
    };
    let literal = &step.text[open + 2..];
    let Some(param) = literal.strip_suffix('"') else {
        return;
    };
    if !step.text.ends_with('"') || !param.ends_with('>') || param[2..].contains('"') {
        return;
    }
    let param = param.to_string();
    step.doc_string = Some(DocString {
        line: step.source_ref.line,
        content: param,
        media_type: None,
    });
    step.text.truncate(open);
}

/// Assigns a unique node path to every node in the spec. Paths are
/// `/`-joined display names; `[k]` suffixes disambiguate repeated
/// sibling names.
fn assign_node_paths(spec: &mut Spec) {
    let feature_path = format!("/{}", spec.feature.name);
    spec.feature.source_ref.node_path = Some(feature_path.clone());

    if let Some(background) = &mut spec.background {
        assign_background_paths(background, &feature_path);
    }

    let names: Vec<String> = spec.scenarios.iter().map(|s| s.name.clone()).collect();
    for (index, scenario) in spec.scenarios.iter_mut().enumerate() {
        let segment = sibling_segment(&names, index);
        assign_scenario_paths(scenario, &format!("{}/{}", feature_path, segment));
    }

    let rule_names: Vec<String> = spec.rules.iter().map(|r| r.name.clone()).collect();
    for (index, rule) in spec.rules.iter_mut().enumerate() {
        let segment = sibling_segment(&rule_names, index);
        let rule_path = format!("{}/{}", feature_path, segment);
        rule.source_ref.node_path = Some(rule_path.clone());
        if let Some(background) = &mut rule.background {
            assign_background_paths(background, &rule_path);
        }
        let names: Vec<String> = rule.scenarios.iter().map(|s| s.name.clone()).collect();
        for (index, scenario) in rule.scenarios.iter_mut().enumerate() {
            let segment = sibling_segment(&names, index);
            assign_scenario_paths(scenario, &format!("{}/{}", rule_path, segment));
        }
    }
}

fn sibling_segment(names: &[String], index: usize) -> String {
    let name = &names[index];
    let same_named = names.iter().filter(|n| *n == name).count();
    let occurrence = names[..index].iter().filter(|n| *n == name).count() + 1;
    node_path_segment(name, occurrence, same_named)
}

fn assign_background_paths(background: &mut Background, parent: &str) {
    let path = format!("{}/{}", parent, background.name);
    background.source_ref.node_path = Some(path.clone());
    assign_step_paths(&mut background.steps, &path);
}

fn assign_scenario_paths(scenario: &mut Scenario, path: &str) {
    scenario.source_ref.node_path = Some(path.to_string());
    if let Some(background) = &mut scenario.background {
        assign_background_paths(background, path);
    }
    assign_step_paths(&mut scenario.steps, path);

    let names: Vec<String> = scenario.examples.iter().map(|e| e.name.clone()).collect();
    for (index, examples) in scenario.examples.iter_mut().enumerate() {
        let segment = sibling_segment(&names, index);
        let examples_path = format!("{}/{}", path, segment);
        examples.source_ref.node_path = Some(examples_path.clone());
        let names: Vec<String> = examples.scenarios.iter().map(|s| s.name.clone()).collect();
        for (index, expanded) in examples.scenarios.iter_mut().enumerate() {
            let segment = sibling_segment(&names, index);
            assign_scenario_paths(expanded, &format!("{}/{}", examples_path, segment));
        }
    }
}

fn assign_step_paths(steps: &mut [Step], parent: &str) {
    let names: Vec<String> = steps.iter().map(|s| s.text.clone()).collect();
    for (index, step) in steps.iter_mut().enumerate() {
        let segment = sibling_segment(&names, index);
        step.source_ref.node_path = Some(format!("{}/{}", parent, segment));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gwen_syntax::parse;

    #[test]
    fn docstringify_moves_trailing_param_literal() {
        let sref = gwen_syntax::SourceRef::new("t.feature", gwen_syntax::Position::new(1, 1));
        let mut step = Step::new("Given", "the body is \"$<content>\"", sref);
        docstringify(&mut step);
        assert_eq!(step.text, "the body is");
        let doc = step.doc_string.unwrap();
        assert_eq!(doc.content, "$<content>");
        assert!(doc.media_type.is_none());
    }

    #[test]
    fn docstringify_leaves_plain_literals() {
        let sref = gwen_syntax::SourceRef::new("t.feature", gwen_syntax::Position::new(1, 1));
        let mut step = Step::new("Given", "x is \"plain\"", sref);
        docstringify(&mut step);
        assert_eq!(step.text, "x is \"plain\"");
        assert!(step.doc_string.is_none());
    }

    #[test]
    fn normalise_is_idempotent() {
        let source = "\
Feature: f

  Background: setup
    Given ready

  Scenario Outline: s
    Given x is \"<x>\"

    Examples: e
      | x |
      | 1 |
      | 2 |
";
        let spec = parse(source, "f.feature").unwrap();
        let once = normalise(spec).unwrap();
        let twice = normalise(once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn expanded_names_follow_record_format() {
        let source = "\
Feature: f

  Scenario Outline: Join
    Given x is \"<x>\"

    Examples: values
      | x |
      | 1 |
      | 2 |
";
        let spec = normalise(parse(source, "f.feature").unwrap()).unwrap();
        let expanded = &spec.scenarios[0].examples[0].scenarios;
        assert_eq!(expanded[0].name, "Join -- values (record 1 of 2)");
        assert_eq!(expanded[1].name, "Join -- values (record 2 of 2)");
        assert!(expanded[0].is_synthetic());
        assert_eq!(expanded[0].params, vec![("x".to_string(), "1".to_string())]);
    }
}
