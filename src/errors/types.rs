//! Error type definitions for the variant filter engine
//!
//! Two kinds of failure exist: an expression can be rejected at compile
//! time (`ParseError`), or a compiled program can trip an internal
//! invariant while evaluating a record (`EvalError`). Missing data is
//! neither: it is an ordinary value that propagates through evaluation
//! and makes the site fail.

use thiserror::Error;

/// Convenience alias used throughout the engine API.
pub type FilterResult<T> = Result<T, FilterError>;

/// Top-level error type of the filter engine.
#[derive(Error, Debug)]
pub enum FilterError {
    /// The expression was rejected during compilation
    #[error("expression error: {0}")]
    Parse(#[from] ParseError),

    /// A compiled program violated a runtime invariant
    #[error("evaluation error: {0}")]
    Eval(#[from] EvalError),
}

/// Compile-time rejection of a filtering expression.
///
/// Every variant names the offending expression or tag so the diagnostic
/// can be shown to the user as-is.
#[derive(Error, Debug)]
pub enum ParseError {
    /// A string literal was opened but never closed
    #[error("missing quotes in: {expression}")]
    UnterminatedString { expression: String },

    /// Unbalanced parentheses, dangling operators, or a malformed
    /// `%TYPE`/`%FILTER` neighborhood
    #[error("could not parse the expression: {expression}")]
    Malformed { expression: String },

    /// An identifier resolved to nothing in the header and does not
    /// parse as a number
    #[error("the tag \"{tag}\" is not defined in the header: {expression}")]
    UnknownTag { tag: String, expression: String },

    #[error("no such INFO field: {0}")]
    UnknownInfoField(String),

    #[error("no such FORMAT field: {0}")]
    UnknownFormatField(String),

    /// An array-valued field was referenced without a subscript
    #[error("arrays must be subscripted, e.g. {0}[0]")]
    UnsubscriptedArray(String),

    /// Subscripts into string-valued INFO fields are not supported
    #[error("string vectors are not supported: {0}")]
    StringSubscript(String),

    /// The field's declared type has no setter for this position
    #[error("unsupported field type for {0}")]
    UnsupportedField(String),

    /// The `%TYPE` literal is not one of snp/snps, indel/indels,
    /// mnp/mnps, other, ref
    #[error("the type \"{literal}\" is not recognised: {expression}")]
    UnknownTypeLiteral { literal: String, expression: String },

    /// The `%FILTER` literal names a filter the header does not declare
    #[error("the filter \"{0}\" is not present in the header")]
    UnknownFilter(String),
}

/// Violation of a program invariant during evaluation.
///
/// These indicate a bug in the compiler or in a setter, or operands the
/// engine refuses to combine (string/number mixes, unequal-length sample
/// vectors); they are fatal for the evaluation.
#[derive(Error, Debug)]
pub enum EvalError {
    /// An operator found fewer operands on the stack than its arity
    #[error("too few operands while evaluating \"{expression}\"")]
    StackUnderflow { expression: String },

    /// More than one operand was left after the program ran
    #[error("unbalanced program for \"{expression}\"")]
    UnbalancedStack { expression: String },

    /// A logical operator received an operand that never acquired a
    /// boolean result
    #[error("operand of a logical operator is not a boolean in \"{expression}\"")]
    NotBoolean { expression: String },

    /// Equality between a string and a numeric operand
    #[error("comparing string to numeric value: {expression}")]
    TypeMismatch { expression: String },

    /// An ordering comparison (`<`, `<=`, `>`, `>=`) on strings
    #[error("wrong operator in string comparison: {expression}")]
    StringOrdering { expression: String },

    /// Two per-sample vectors of different lengths
    #[error("cannot compare vectors of different length in \"{expression}\"")]
    LengthMismatch { expression: String },
}

impl ParseError {
    /// Create a generic malformed-expression error
    pub fn malformed<S: Into<String>>(expression: S) -> Self {
        Self::Malformed {
            expression: expression.into(),
        }
    }

    /// Create an unknown-tag error
    pub fn unknown_tag<T: Into<String>, E: Into<String>>(tag: T, expression: E) -> Self {
        Self::UnknownTag {
            tag: tag.into(),
            expression: expression.into(),
        }
    }
}

impl EvalError {
    /// Create a stack-underflow error
    pub fn stack_underflow<S: Into<String>>(expression: S) -> Self {
        Self::StackUnderflow {
            expression: expression.into(),
        }
    }

    /// Create a not-boolean error
    pub fn not_boolean<S: Into<String>>(expression: S) -> Self {
        Self::NotBoolean {
            expression: expression.into(),
        }
    }
}
