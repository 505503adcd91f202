use std::fmt;

/// A source-code location.
///
/// Tracks the 1-based line and column of a token or node within the
/// original `.feature` or `.meta` source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// 1-based line number.
    pub line: usize,
    /// 1-based column number.
    pub column: usize,
}

impl Position {
    /// Creates a new position from explicit line and column values.
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    /// The start of a line.
    pub fn at_line(line: usize) -> Self {
        Self { line, column: 1 }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// An error produced while parsing Gherkin source.
#[derive(Debug, Clone)]
pub enum ParseError {
    /// A structural line appeared where it is not allowed.
    UnexpectedLine {
        expected: String,
        found: String,
        position: Position,
    },
    /// The source ended inside an open construct.
    UnexpectedEof { expected: String },
    /// A doc-string fence was never closed.
    UnterminatedDocString { position: Position },
    /// A data table row has a different cell count than its header.
    RaggedTable {
        expected: usize,
        found: usize,
        position: Position,
    },
    /// A tag failed the `@name` / `@name("value")` grammar.
    InvalidTag { message: String, position: Position },
    /// The source contains no `Feature:` header.
    MissingFeature { uri: String },
}

impl ParseError {
    /// Returns the source [`Position`] where the error occurred, if available.
    pub fn position(&self) -> Option<Position> {
        match self {
            ParseError::UnexpectedLine { position, .. } => Some(*position),
            ParseError::UnexpectedEof { .. } => None,
            ParseError::UnterminatedDocString { position } => Some(*position),
            ParseError::RaggedTable { position, .. } => Some(*position),
            ParseError::InvalidTag { position, .. } => Some(*position),
            ParseError::MissingFeature { .. } => None,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnexpectedLine {
                expected,
                found,
                position,
            } => {
                write!(
                    f,
                    "expected {}, found '{}' at {}",
                    expected, found, position
                )
            }
            ParseError::UnexpectedEof { expected } => {
                write!(f, "unexpected end of file, expected {}", expected)
            }
            ParseError::UnterminatedDocString { position } => {
                write!(f, "unterminated doc-string opened at {}", position)
            }
            ParseError::RaggedTable {
                expected,
                found,
                position,
            } => {
                write!(
                    f,
                    "table row at {} has {} cells, expected {}",
                    position, found, expected
                )
            }
            ParseError::InvalidTag { message, position } => {
                write!(f, "invalid tag at {}: {}", position, message)
            }
            ParseError::MissingFeature { uri } => {
                write!(f, "no Feature declaration found in {}", uri)
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Formats a parse error with source context (surrounding lines and caret).
pub fn format_error_with_source(error: &ParseError, source: &str) -> String {
    let Some(position) = error.position() else {
        return error.to_string();
    };

    let lines: Vec<&str> = source.lines().collect();
    let line_idx = position.line.saturating_sub(1);
    if line_idx >= lines.len() {
        return format!("{} at line {}", error, position.line);
    }

    let mut output = String::new();
    output.push_str(&format!("error: {}\n", error));
    output.push_str(&format!("  --> line {}:{}\n", position.line, position.column));
    output.push_str("   |\n");
    if line_idx > 0 {
        output.push_str(&format!(" {} | {}\n", position.line - 1, lines[line_idx - 1]));
    }
    output.push_str(&format!(" {} | {}\n", position.line, lines[line_idx]));
    output.push_str(&format!(
        "   | {}^\n",
        " ".repeat(position.column.saturating_sub(1))
    ));
    if line_idx + 1 < lines.len() {
        output.push_str(&format!(" {} | {}\n", position.line + 1, lines[line_idx + 1]));
    }
    output.push_str("   |");
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_display() {
        assert_eq!(format!("{}", Position::new(12, 5)), "12:5");
    }

    #[test]
    fn unexpected_line_display() {
        let err = ParseError::UnexpectedLine {
            expected: "a step".to_string(),
            found: "Examples:".to_string(),
            position: Position::new(3, 1),
        };
        assert_eq!(format!("{err}"), "expected a step, found 'Examples:' at 3:1");
    }

    #[test]
    fn format_with_source_points_at_line() {
        let source = "Feature: f\n  Scenario: s\n    Bogus line\n";
        let err = ParseError::UnexpectedLine {
            expected: "a step".to_string(),
            found: "Bogus line".to_string(),
            position: Position::new(3, 5),
        };
        let rendered = format_error_with_source(&err, source);
        assert!(rendered.contains("--> line 3:5"));
        assert!(rendered.contains("Bogus line"));
    }

    #[test]
    fn format_without_position_falls_back() {
        let err = ParseError::UnexpectedEof {
            expected: "'\"\"\"'".to_string(),
        };
        let rendered = format_error_with_source(&err, "Feature: f");
        assert_eq!(rendered, "unexpected end of file, expected '\"\"\"'");
    }
}
