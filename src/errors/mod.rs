//! Error handling for the filter engine

mod types;

pub use types::{EvalError, FilterError, FilterResult, ParseError};
