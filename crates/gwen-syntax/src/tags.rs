//! Tag grammar and the reserved tag vocabulary.
//!
//! Tags follow `@name` or `@name("value")`. Whitespace anywhere in a tag
//! name or value is rejected at parse time.

use crate::ast::SourceRef;
use crate::error::{ParseError, Position};
use uuid::Uuid;

/// The closed set of tags with engine-level meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedTag {
    /// Marks a scenario as a reusable step definition.
    StepDef,
    /// Invoke the annotated StepDef once per element or table record.
    ForEach,
    /// Conditional composite guard.
    If,
    /// Post-test loop composite.
    Until,
    /// Pre-test loop composite.
    While,
    /// Data-table annotation (carries a value describing the shape).
    DataTable,
    /// Marks examples-backed expansion.
    Examples,
    /// Marks nodes fabricated by the normaliser.
    Synthetic,
    /// Serialise the annotated StepDef across parallel workers.
    Synchronized,
    /// Exclude the annotated node from evaluation.
    Ignore,
}

impl ReservedTag {
    /// Resolves a tag name to its reserved meaning, accepting both the
    /// `Synchronized` and `Synchronised` spellings.
    pub fn parse(name: &str) -> Option<ReservedTag> {
        match name {
            "StepDef" => Some(ReservedTag::StepDef),
            "ForEach" => Some(ReservedTag::ForEach),
            "If" => Some(ReservedTag::If),
            "Until" => Some(ReservedTag::Until),
            "While" => Some(ReservedTag::While),
            "DataTable" => Some(ReservedTag::DataTable),
            "Examples" => Some(ReservedTag::Examples),
            "Synthetic" => Some(ReservedTag::Synthetic),
            "Synchronized" | "Synchronised" => Some(ReservedTag::Synchronized),
            "Ignore" => Some(ReservedTag::Ignore),
            _ => None,
        }
    }

    /// The canonical tag name.
    pub fn name(&self) -> &'static str {
        match self {
            ReservedTag::StepDef => "StepDef",
            ReservedTag::ForEach => "ForEach",
            ReservedTag::If => "If",
            ReservedTag::Until => "Until",
            ReservedTag::While => "While",
            ReservedTag::DataTable => "DataTable",
            ReservedTag::Examples => "Examples",
            ReservedTag::Synthetic => "Synthetic",
            ReservedTag::Synchronized => "Synchronized",
            ReservedTag::Ignore => "Ignore",
        }
    }
}

/// A tag attached to a feature, scenario or examples node.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub uuid: Uuid,
    pub source_ref: SourceRef,
    /// Tag name without the leading `@`.
    pub name: String,
    /// The raw value between the parentheses, if any. For the simple
    /// `@name("value")` form the surrounding quotes are stripped; for
    /// annotation forms like `@DataTable(header="top")` the value is kept
    /// verbatim.
    pub value: Option<String>,
}

impl Tag {
    /// Builds a tag without a value.
    pub fn new(name: impl Into<String>, source_ref: SourceRef) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            source_ref,
            name: name.into(),
            value: None,
        }
    }

    /// Builds a tag carrying a value.
    pub fn with_value(name: impl Into<String>, value: impl Into<String>, source_ref: SourceRef) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            source_ref,
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// Parses one `@…` token.
    pub fn parse(raw: &str, uri: &str, position: Position) -> Result<Tag, ParseError> {
        let source_ref = SourceRef::new(uri, position);
        let invalid = |message: String| ParseError::InvalidTag { message, position };

        let Some(body) = raw.strip_prefix('@') else {
            return Err(invalid(format!("'{}' does not start with '@'", raw)));
        };
        if body.is_empty() {
            return Err(invalid("empty tag name".to_string()));
        }

        let (name, value) = match body.find('(') {
            None => (body.to_string(), None),
            Some(open) => {
                let name = &body[..open];
                let rest = &body[open + 1..];
                let Some(inner) = rest.strip_suffix(')') else {
                    return Err(invalid(format!("unclosed parenthesis in '{}'", raw)));
                };
                if inner.is_empty() {
                    return Err(invalid(format!("empty value in '{}'", raw)));
                }
                let value = inner
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .filter(|v| !v.contains('"'))
                    .unwrap_or(inner);
                (name.to_string(), Some(value.to_string()))
            }
        };

        if name.is_empty() {
            return Err(invalid("empty tag name".to_string()));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(invalid(format!("whitespace in tag name '{}'", name)));
        }
        if let Some(value) = &value {
            if value.chars().any(char::is_whitespace) {
                return Err(invalid(format!("whitespace in tag value '{}'", value)));
            }
        }

        Ok(match value {
            None => Tag::new(name, source_ref),
            Some(value) => Tag::with_value(name, value, source_ref),
        })
    }

    /// True if this tag carries the given reserved meaning.
    pub fn is(&self, reserved: ReservedTag) -> bool {
        ReservedTag::parse(&self.name) == Some(reserved)
    }

    /// Renders the tag back to source form.
    pub fn render(&self) -> String {
        match &self.value {
            None => format!("@{}", self.name),
            Some(value) if value.contains('=') => format!("@{}({})", self.name, value),
            Some(value) => format!("@{}(\"{}\")", self.name, value),
        }
    }
}

/// Looks up a reserved tag in a tag list.
pub fn find_reserved(tags: &[Tag], reserved: ReservedTag) -> Option<&Tag> {
    tags.iter().find(|t| t.is(reserved))
}

/// True if any tag in the list carries the given reserved meaning.
pub fn has_reserved(tags: &[Tag], reserved: ReservedTag) -> bool {
    find_reserved(tags, reserved).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<Tag, ParseError> {
        Tag::parse(raw, "test.feature", Position::new(1, 1))
    }

    #[test]
    fn parses_bare_tag() {
        let tag = parse("@StepDef").unwrap();
        assert_eq!(tag.name, "StepDef");
        assert!(tag.value.is_none());
        assert!(tag.is(ReservedTag::StepDef));
    }

    #[test]
    fn parses_valued_tag() {
        let tag = parse("@Context(\"login\")").unwrap();
        assert_eq!(tag.name, "Context");
        assert_eq!(tag.value.as_deref(), Some("login"));
    }

    #[test]
    fn parses_annotation_value_verbatim() {
        let tag = parse("@DataTable(horizontal=\"a,b,c\")").unwrap();
        assert_eq!(tag.value.as_deref(), Some("horizontal=\"a,b,c\""));
        assert!(tag.is(ReservedTag::DataTable));
    }

    #[test]
    fn rejects_whitespace_in_name() {
        assert!(parse("@Step Def").is_err());
    }

    #[test]
    fn rejects_whitespace_in_value() {
        assert!(parse("@Context(\"two words\")").is_err());
    }

    #[test]
    fn rejects_unclosed_value() {
        assert!(parse("@Context(\"login\"").is_err());
    }

    #[test]
    fn rejects_empty_name() {
        assert!(parse("@").is_err());
        assert!(parse("@(\"v\")").is_err());
    }

    #[test]
    fn both_synchronized_spellings_resolve() {
        assert!(parse("@Synchronized").unwrap().is(ReservedTag::Synchronized));
        assert!(parse("@Synchronised").unwrap().is(ReservedTag::Synchronized));
    }

    #[test]
    fn render_round_trips() {
        for raw in ["@Ignore", "@Context(\"login\")", "@DataTable(header=\"top\")"] {
            assert_eq!(parse(raw).unwrap().render(), raw);
        }
    }
}
