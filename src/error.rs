//! Error tiers for the IR: recoverable input errors vs. validation reports.
//!
//! Programmer errors (broken invariants: dangling use, destroying a linked
//! node, cross-context operand, inserting past a terminator) are not part of
//! this module at all -- they are `panic!`/`assert!` at the point of
//! violation, kept separate from the recoverable errors returned here.

use thiserror::Error;

/// Recoverable errors: textual-IR parsing and module construction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IrError {
    #[error("parse error at {line}:{col}: {message}")]
    Parse { line: usize, col: usize, message: String },

    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("unknown value: {0}")]
    UnknownValue(String),

    #[error("function '{0}' already exists in this module")]
    DuplicateFunction(String),

    #[error("context error: {0}")]
    Context(String),
}

pub type Result<T> = std::result::Result<T, IrError>;

/// One violation of a validator invariant (spec.md 4.4 / 8). Not an
/// `std::error::Error` -- validation produces a report, collected into a
/// `Vec<ValidationError>`, that the caller chooses to print or treat as
/// fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub function: String,
    pub block: Option<String>,
    pub instruction: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn new(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self { function: function.into(), block: None, instruction: None, message: message.into() }
    }

    pub fn in_block(mut self, block: impl Into<String>) -> Self {
        self.block = Some(block.into());
        self
    }

    pub fn in_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "in function '{}'", self.function)?;
        if let Some(b) = &self.block {
            write!(f, ", block '{b}'")?;
        }
        if let Some(i) = &self.instruction {
            write!(f, ", instruction '{i}'")?;
        }
        write!(f, ": {}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_displays_position() {
        let e = IrError::Parse { line: 3, col: 7, message: "unexpected token".into() };
        assert_eq!(e.to_string(), "parse error at 3:7: unexpected token");
    }

    #[test]
    fn validation_error_builds_up_context() {
        let e = ValidationError::new("main", "terminator missing")
            .in_block("entry")
            .in_instruction("v3");
        assert_eq!(e.to_string(), "in function 'main', block 'entry', instruction 'v3': terminator missing");
    }
}
