use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Position of a construct in the decoded text (1-based).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl Location {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    /// The position just past the last character of `text`.
    pub fn end_of(text: &str) -> Self {
        let line = 1 + text.matches('\n').count();
        let last_line = text.rsplit('\n').next().unwrap_or("");
        Self::new(line, last_line.chars().count() + 1)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("syntax error at {location}: {message}")]
    Syntax { location: Location, message: String },

    #[error("error at {location}: {error}")]
    Semantic {
        location: Location,
        error: SemanticError,
    },

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl DecodeError {
    pub fn syntax(location: Location, message: impl Into<String>) -> Self {
        DecodeError::Syntax {
            location,
            message: message.into(),
        }
    }

    pub fn semantic(location: Location, error: SemanticError) -> Self {
        DecodeError::Semantic { location, error }
    }

    /// Source location of a syntax or semantic error.
    pub fn location(&self) -> Option<Location> {
        match self {
            DecodeError::Syntax { location, .. } | DecodeError::Semantic { location, .. } => {
                Some(*location)
            }
            _ => None,
        }
    }
}

/// Well-formed input that is invalid given the interpreter state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SemanticError {
    #[error("unknown aperture D{0}")]
    UnknownAperture(u32),

    #[error("{0} with no aperture selected")]
    NoApertureSelected(&'static str),

    #[error("aperture D{code} cannot be used for plotting: {reason}")]
    InvalidAperture { code: u32, reason: &'static str },

    #[error("unknown aperture macro '{0}'")]
    UnknownMacro(String),

    #[error("unknown tool T{0}")]
    UnknownTool(u32),

    #[error("{0} with no tool selected")]
    NoToolSelected(&'static str),

    #[error("mill command without moving into position")]
    MillWithoutPosition,

    #[error("unsupported units '{0}'")]
    UnsupportedUnits(String),

    #[error("invalid number of outline points: expected {expected}, found {found}")]
    OutlinePointCount { expected: usize, found: usize },

    #[error("coordinate used before a format specification")]
    MissingFormatSpecification,

    #[error("block aperture D{code} flashes itself")]
    RecursiveBlockAperture { code: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_message() {
        let err = DecodeError::syntax(Location::new(3, 7), "missing M02*");
        assert_eq!(err.to_string(), "syntax error at 3:7: missing M02*");
        assert_eq!(err.location(), Some(Location::new(3, 7)));
    }

    #[test]
    fn test_semantic_error_message() {
        let err = DecodeError::semantic(Location::new(12, 1), SemanticError::UnknownAperture(11));
        assert_eq!(err.to_string(), "error at 12:1: unknown aperture D11");
    }

    #[test]
    fn test_end_of_text() {
        assert_eq!(Location::end_of(""), Location::new(1, 1));
        assert_eq!(Location::end_of("M02*"), Location::new(1, 5));
        assert_eq!(Location::end_of("a\nbc\n"), Location::new(3, 1));
    }

    #[test]
    fn test_io_error_has_no_location() {
        let err = DecodeError::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(err.location().is_none());
    }
}
