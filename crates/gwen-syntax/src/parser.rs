//! Line-based parser for Gherkin feature and meta sources.
//!
//! The grammar is line-oriented: every structural construct (feature,
//! background, rule, scenario, examples, step, table row, doc-string
//! fence, tag line) starts a line, so the parser classifies lines and
//! descends from there. Indentation is not significant.

use crate::ast::{
    Background, DocString, Examples, Feature, Rule, Scenario, Spec, SpecType, SourceRef, Step,
    TableRow,
};
use crate::error::{ParseError, Position};
use crate::tags::Tag;

const STEP_KEYWORDS: [&str; 5] = ["Given", "When", "Then", "And", "But"];

/// Parses Gherkin source into a [`Spec`]. The spec type is inferred
/// from the uri: `.meta` sources produce [`SpecType::Meta`].
pub fn parse(source: &str, uri: &str) -> Result<Spec, ParseError> {
    let spec_type = if uri.ends_with(".meta") {
        SpecType::Meta
    } else {
        SpecType::Feature
    };
    Parser::new(source, uri).parse_spec(spec_type)
}

/// One classified source line.
#[derive(Debug, Clone, PartialEq)]
enum Line {
    Blank,
    Comment(String),
    Language(String),
    Tags(String),
    Header { keyword: String, name: String },
    Step { keyword: String, text: String },
    TableRow(Vec<String>),
    DocFence { fence: String, media_type: Option<String> },
    Text(String),
}

struct Parser<'a> {
    lines: Vec<&'a str>,
    pos: usize,
    uri: &'a str,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, uri: &'a str) -> Self {
        Self {
            lines: source.lines().collect(),
            pos: 0,
            uri,
        }
    }

    fn position(&self) -> Position {
        let line = (self.pos + 1).min(self.lines.len().max(1));
        let raw = self.lines.get(self.pos).copied().unwrap_or("");
        let column = raw.len() - raw.trim_start().len() + 1;
        Position::new(line, column)
    }

    fn source_ref(&self) -> SourceRef {
        SourceRef::new(self.uri, self.position())
    }

    fn peek(&self) -> Option<Line> {
        self.lines.get(self.pos).map(|raw| classify(raw))
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match self.lines.get(self.pos) {
            Some(raw) => ParseError::UnexpectedLine {
                expected: expected.to_string(),
                found: raw.trim().to_string(),
                position: self.position(),
            },
            None => ParseError::UnexpectedEof {
                expected: expected.to_string(),
            },
        }
    }

    fn parse_spec(mut self, spec_type: SpecType) -> Result<Spec, ParseError> {
        let mut language = "en".to_string();
        let mut tags: Vec<Tag> = Vec::new();

        let mut feature = loop {
            match self.peek() {
                None => return Err(ParseError::MissingFeature { uri: self.uri.to_string() }),
                Some(Line::Blank) | Some(Line::Comment(_)) => self.advance(),
                Some(Line::Language(lang)) => {
                    language = lang;
                    self.advance();
                }
                Some(Line::Tags(raw)) => {
                    tags.extend(self.parse_tags(&raw)?);
                    self.advance();
                }
                Some(Line::Header { keyword, name }) if keyword == "Feature" => {
                    let mut feature = Feature::new(name, self.source_ref());
                    feature.language = language.clone();
                    feature.tags = std::mem::take(&mut tags);
                    self.advance();
                    break feature;
                }
                Some(_) => return Err(self.unexpected("'Feature:'")),
            }
        };
        feature.description = self.parse_description();

        let mut spec = Spec::new(feature, spec_type);
        let mut rule: Option<Rule> = None;
        let mut pending_tags: Vec<Tag> = Vec::new();

        loop {
            match self.peek() {
                None => break,
                Some(Line::Blank) | Some(Line::Comment(_)) => self.advance(),
                Some(Line::Tags(raw)) => {
                    pending_tags.extend(self.parse_tags(&raw)?);
                    self.advance();
                }
                Some(Line::Header { keyword, name }) => match keyword.as_str() {
                    "Background" => {
                        if !pending_tags.is_empty() {
                            return Err(self.unexpected("a scenario after tags"));
                        }
                        let background = self.parse_background(&name)?;
                        match &mut rule {
                            Some(rule) if rule.background.is_none() && rule.scenarios.is_empty() => {
                                rule.background = Some(background)
                            }
                            None if spec.background.is_none() && spec.scenarios.is_empty() => {
                                spec.background = Some(background)
                            }
                            _ => return Err(self.unexpected("at most one leading Background")),
                        }
                    }
                    "Rule" => {
                        if !pending_tags.is_empty() {
                            return Err(self.unexpected("a scenario after tags"));
                        }
                        if let Some(done) = rule.take() {
                            spec.rules.push(done);
                        }
                        let mut next = Rule::new(name, self.source_ref());
                        self.advance();
                        next.description = self.parse_description();
                        rule = Some(next);
                    }
                    "Scenario" | "Example" | "Scenario Outline" | "Scenario Template" => {
                        let scenario =
                            self.parse_scenario(&keyword, &name, std::mem::take(&mut pending_tags))?;
                        match &mut rule {
                            Some(rule) => rule.scenarios.push(scenario),
                            None => spec.scenarios.push(scenario),
                        }
                    }
                    _ => return Err(self.unexpected("a Background, Rule or Scenario")),
                },
                Some(_) => return Err(self.unexpected("a Background, Rule or Scenario")),
            }
        }
        if let Some(done) = rule.take() {
            spec.rules.push(done);
        }
        Ok(spec)
    }

    fn parse_tags(&self, raw: &str) -> Result<Vec<Tag>, ParseError> {
        let position = self.position();
        raw.split_whitespace()
            .map(|token| Tag::parse(token, self.uri, position))
            .collect()
    }

    /// Free-text lines following a header, up to the next structural line.
    fn parse_description(&mut self) -> Vec<String> {
        let mut description = Vec::new();
        while let Some(Line::Text(text)) = self.peek() {
            description.push(text);
            self.advance();
        }
        description
    }

    fn parse_background(&mut self, name: &str) -> Result<Background, ParseError> {
        let mut background = Background::new(name, self.source_ref());
        self.advance();
        background.description = self.parse_description();
        background.steps = self.parse_steps()?;
        Ok(background)
    }

    fn parse_scenario(
        &mut self,
        keyword: &str,
        name: &str,
        tags: Vec<Tag>,
    ) -> Result<Scenario, ParseError> {
        let mut scenario = Scenario::new(name, self.source_ref())
            .with_keyword(keyword)
            .with_tags(tags);
        self.advance();
        scenario.description = self.parse_description();
        scenario.steps = self.parse_steps()?;

        let mut pending_tags: Vec<Tag> = Vec::new();
        loop {
            match self.peek() {
                Some(Line::Blank) | Some(Line::Comment(_)) => self.advance(),
                Some(Line::Tags(raw)) => {
                    let restore = self.pos;
                    let tags = self.parse_tags(&raw)?;
                    self.advance();
                    // Tags may introduce an Examples block or the next
                    // scenario; only the former belongs to us.
                    match self.skip_blank_peek() {
                        Some(Line::Header { keyword, .. })
                            if keyword == "Examples" || keyword == "Scenarios" =>
                        {
                            pending_tags.extend(tags)
                        }
                        _ => {
                            self.pos = restore;
                            break;
                        }
                    }
                }
                Some(Line::Header { keyword, name })
                    if keyword == "Examples" || keyword == "Scenarios" =>
                {
                    let examples =
                        self.parse_examples(&keyword, &name, std::mem::take(&mut pending_tags))?;
                    scenario.examples.push(examples);
                }
                _ => break,
            }
        }
        Ok(scenario)
    }

    /// Skips blank and comment lines, then classifies without consuming.
    fn skip_blank_peek(&mut self) -> Option<Line> {
        while let Some(line) = self.peek() {
            match line {
                Line::Blank | Line::Comment(_) => self.advance(),
                other => return Some(other),
            }
        }
        None
    }

    fn parse_examples(
        &mut self,
        keyword: &str,
        name: &str,
        tags: Vec<Tag>,
    ) -> Result<Examples, ParseError> {
        let mut examples = Examples::new(name, self.source_ref());
        examples.keyword = keyword.to_string();
        examples.tags = tags;
        self.advance();
        examples.description = self.parse_description();
        examples.table = self.parse_table()?;
        if examples.table.len() < 2 {
            return Err(ParseError::UnexpectedLine {
                expected: "an examples table with a header and at least one record".to_string(),
                found: format!("{} row(s)", examples.table.len()),
                position: Position::new(examples.source_ref.line, examples.source_ref.column),
            });
        }
        Ok(examples)
    }

    fn parse_steps(&mut self) -> Result<Vec<Step>, ParseError> {
        let mut steps = Vec::new();
        loop {
            match self.peek() {
                Some(Line::Blank) | Some(Line::Comment(_)) => self.advance(),
                Some(Line::Step { keyword, text }) => {
                    let mut step = Step::new(keyword, text, self.source_ref());
                    self.advance();
                    match self.peek() {
                        Some(Line::TableRow(_)) => step.table = self.parse_table()?,
                        Some(Line::DocFence { .. }) => {
                            step.doc_string = Some(self.parse_doc_string()?)
                        }
                        _ => {}
                    }
                    steps.push(step);
                }
                _ => break,
            }
        }
        Ok(steps)
    }

    fn parse_table(&mut self) -> Result<Vec<TableRow>, ParseError> {
        let mut rows: Vec<TableRow> = Vec::new();
        loop {
            match self.peek() {
                Some(Line::TableRow(cells)) => {
                    if let Some(first) = rows.first() {
                        if cells.len() != first.cells.len() {
                            return Err(ParseError::RaggedTable {
                                expected: first.cells.len(),
                                found: cells.len(),
                                position: self.position(),
                            });
                        }
                    }
                    rows.push(TableRow::new(self.pos + 1, cells));
                    self.advance();
                }
                Some(Line::Comment(_)) => self.advance(),
                _ => break,
            }
        }
        Ok(rows)
    }

    fn parse_doc_string(&mut self) -> Result<DocString, ParseError> {
        let Some(Line::DocFence { fence, media_type }) = self.peek() else {
            return Err(self.unexpected("a doc-string fence"));
        };
        let open_position = self.position();
        let open_line = self.pos + 1;
        let indent = open_position.column - 1;
        self.advance();

        let mut content_lines: Vec<String> = Vec::new();
        loop {
            let Some(raw) = self.lines.get(self.pos) else {
                return Err(ParseError::UnterminatedDocString {
                    position: open_position,
                });
            };
            if raw.trim() == fence {
                self.advance();
                break;
            }
            // Dedent to the opening fence's column; shorter lines are
            // kept as-is.
            let stripped = if raw.len() >= indent && raw[..indent.min(raw.len())].trim().is_empty()
            {
                &raw[indent.min(raw.len())..]
            } else {
                raw.trim_start()
            };
            content_lines.push(stripped.to_string());
            self.advance();
        }

        Ok(DocString {
            line: open_line,
            content: content_lines.join("\n"),
            media_type,
        })
    }
}

fn classify(raw: &str) -> Line {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Line::Blank;
    }
    if let Some(comment) = trimmed.strip_prefix('#') {
        let comment = comment.trim();
        if let Some(lang) = comment.strip_prefix("language:") {
            return Line::Language(lang.trim().to_string());
        }
        return Line::Comment(comment.to_string());
    }
    if trimmed.starts_with('@') {
        return Line::Tags(trimmed.to_string());
    }
    if trimmed.starts_with('|') {
        return Line::TableRow(split_cells(trimmed));
    }
    for fence in ["\"\"\"", "```"] {
        if let Some(rest) = trimmed.strip_prefix(fence) {
            let media = rest.trim();
            return Line::DocFence {
                fence: fence.to_string(),
                media_type: if media.is_empty() {
                    None
                } else {
                    Some(media.to_string())
                },
            };
        }
    }
    for keyword in [
        "Feature",
        "Background",
        "Rule",
        "Scenario Outline",
        "Scenario Template",
        "Scenario",
        "Example",
        "Examples",
        "Scenarios",
    ] {
        if let Some(rest) = trimmed.strip_prefix(keyword) {
            if let Some(name) = rest.strip_prefix(':') {
                return Line::Header {
                    keyword: keyword.to_string(),
                    name: name.trim().to_string(),
                };
            }
        }
    }
    for keyword in STEP_KEYWORDS {
        if let Some(rest) = trimmed.strip_prefix(keyword) {
            if let Some(text) = rest.strip_prefix(' ') {
                return Line::Step {
                    keyword: keyword.to_string(),
                    text: text.trim().to_string(),
                };
            }
        }
    }
    if let Some(text) = trimmed.strip_prefix("* ") {
        return Line::Step {
            keyword: "*".to_string(),
            text: text.trim().to_string(),
        };
    }
    Line::Text(trimmed.to_string())
}

/// Splits a `| a | b |` line into trimmed cells, honouring `\|`, `\n`
/// and `\\` escapes.
fn split_cells(line: &str) -> Vec<String> {
    let inner = line
        .strip_prefix('|')
        .unwrap_or(line)
        .strip_suffix('|')
        .unwrap_or_else(|| line.strip_prefix('|').unwrap_or(line));
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some('|') => current.push('|'),
                Some('n') => current.push('\n'),
                Some('\\') => current.push('\\'),
                Some(other) => {
                    current.push('\\');
                    current.push(other);
                }
                None => current.push('\\'),
            },
            '|' => {
                cells.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(ch),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_recognises_structural_lines() {
        assert_eq!(
            classify("  Feature: Login"),
            Line::Header {
                keyword: "Feature".to_string(),
                name: "Login".to_string()
            }
        );
        assert_eq!(
            classify("    Given a user"),
            Line::Step {
                keyword: "Given".to_string(),
                text: "a user".to_string()
            }
        );
        assert_eq!(classify("# language: fr"), Line::Language("fr".to_string()));
        assert_eq!(classify(""), Line::Blank);
    }

    #[test]
    fn classify_keeps_free_text() {
        assert_eq!(
            classify("  As a user I want things"),
            Line::Text("As a user I want things".to_string())
        );
    }

    #[test]
    fn split_cells_trims_and_unescapes() {
        assert_eq!(split_cells("| a | b c |"), vec!["a", "b c"]);
        assert_eq!(split_cells("| a\\|b | x |"), vec!["a|b", "x"]);
        assert_eq!(split_cells("| line\\nbreak |"), vec!["line\nbreak"]);
    }

    #[test]
    fn star_keyword_is_a_step() {
        assert_eq!(
            classify("* something happens"),
            Line::Step {
                keyword: "*".to_string(),
                text: "something happens".to_string()
            }
        );
    }
}
