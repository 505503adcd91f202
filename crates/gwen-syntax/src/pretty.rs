//! Canonical pretty-printer for spec trees.
//!
//! Output uses the canonical layout: feature at column zero, blocks
//! indented two spaces per nesting level, steps two past their block,
//! tables and doc-strings two past their step. `parse` followed by
//! `pretty_print` is the identity on canonically formatted sources.

use crate::ast::{Background, DocString, Examples, Rule, Scenario, Spec, Step, TableRow};
use crate::tags::Tag;

/// Renders a spec tree back to Gherkin source.
pub fn pretty_print(spec: &Spec) -> String {
    let mut out = String::new();
    if spec.feature.language != "en" {
        out.push_str(&format!("# language: {}\n", spec.feature.language));
    }
    push_tags(&mut out, &spec.feature.tags, 0);
    out.push_str(&format!("{}: {}\n", spec.feature.keyword, spec.feature.name));
    push_description(&mut out, &spec.feature.description, 2);

    if let Some(background) = &spec.background {
        out.push('\n');
        push_background(&mut out, background, 2);
    }
    for scenario in &spec.scenarios {
        out.push('\n');
        push_scenario(&mut out, scenario, 2);
    }
    for rule in &spec.rules {
        out.push('\n');
        push_rule(&mut out, rule);
    }
    out
}

fn indent(out: &mut String, width: usize) {
    out.push_str(&" ".repeat(width));
}

fn push_tags(out: &mut String, tags: &[Tag], width: usize) {
    if tags.is_empty() {
        return;
    }
    indent(out, width);
    let rendered: Vec<String> = tags.iter().map(Tag::render).collect();
    out.push_str(&rendered.join(" "));
    out.push('\n');
}

fn push_description(out: &mut String, description: &[String], width: usize) {
    for line in description {
        indent(out, width);
        out.push_str(line);
        out.push('\n');
    }
}

fn push_background(out: &mut String, background: &Background, width: usize) {
    indent(out, width);
    out.push_str(&format!("{}: {}\n", background.keyword, background.name));
    push_description(out, &background.description, width + 2);
    for step in &background.steps {
        push_step(out, step, width + 2);
    }
}

fn push_rule(out: &mut String, rule: &Rule) {
    indent(out, 2);
    out.push_str(&format!("{}: {}\n", rule.keyword, rule.name));
    push_description(out, &rule.description, 4);
    if let Some(background) = &rule.background {
        out.push('\n');
        push_background(out, background, 4);
    }
    for scenario in &rule.scenarios {
        out.push('\n');
        push_scenario(out, scenario, 4);
    }
}

fn push_scenario(out: &mut String, scenario: &Scenario, width: usize) {
    push_tags(out, &scenario.tags, width);
    indent(out, width);
    out.push_str(&format!("{}: {}\n", scenario.keyword, scenario.name));
    push_description(out, &scenario.description, width + 2);
    for step in &scenario.steps {
        push_step(out, step, width + 2);
    }
    for examples in &scenario.examples {
        out.push('\n');
        push_examples(out, examples, width + 2);
    }
}

fn push_examples(out: &mut String, examples: &Examples, width: usize) {
    push_tags(out, &examples.tags, width);
    indent(out, width);
    out.push_str(&format!("{}: {}\n", examples.keyword, examples.name));
    push_description(out, &examples.description, width + 2);
    push_table(out, &examples.table, width + 2);
}

fn push_step(out: &mut String, step: &Step, width: usize) {
    indent(out, width);
    out.push_str(&format!("{} {}\n", step.keyword, step.text));
    push_table(out, &step.table, width + 2);
    if let Some(doc_string) = &step.doc_string {
        push_doc_string(out, doc_string, width + 2);
    }
}

fn push_table(out: &mut String, table: &[TableRow], width: usize) {
    for row in table {
        indent(out, width);
        out.push('|');
        for cell in &row.cells {
            out.push(' ');
            out.push_str(&escape_cell(cell));
            out.push_str(" |");
        }
        out.push('\n');
    }
}

fn push_doc_string(out: &mut String, doc_string: &DocString, width: usize) {
    indent(out, width);
    out.push_str("\"\"\"");
    if let Some(media_type) = &doc_string.media_type {
        out.push_str(media_type);
    }
    out.push('\n');
    for line in doc_string.content.lines() {
        if line.is_empty() {
            out.push('\n');
        } else {
            indent(out, width);
            out.push_str(line);
            out.push('\n');
        }
    }
    indent(out, width);
    out.push_str("\"\"\"\n");
}

fn escape_cell(cell: &str) -> String {
    cell.replace('\\', "\\\\")
        .replace('|', "\\|")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Feature, SpecType, SourceRef};
    use crate::error::Position;

    fn sref() -> SourceRef {
        SourceRef::new("test.feature", Position::new(1, 1))
    }

    #[test]
    fn prints_minimal_feature() {
        let spec = Spec::new(Feature::new("Login", sref()), SpecType::Feature);
        assert_eq!(pretty_print(&spec), "Feature: Login\n");
    }

    #[test]
    fn escapes_table_cells() {
        assert_eq!(escape_cell("a|b"), "a\\|b");
        assert_eq!(escape_cell("line\nbreak"), "line\\nbreak");
    }

    #[test]
    fn prints_language_header_for_non_english() {
        let mut feature = Feature::new("Connexion", sref());
        feature.language = "fr".to_string();
        let spec = Spec::new(feature, SpecType::Feature);
        assert!(pretty_print(&spec).starts_with("# language: fr\n"));
    }
}
