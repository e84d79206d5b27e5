//! Program tokens and schema binding
//!
//! A compiled filter is a postfix sequence of [`ProgramToken`]s. Value
//! tokens carry their compile-time binding (setter, schema id, constant)
//! together with the per-record scratch the evaluator mutates: the
//! numeric buffer, the string buffer, the per-sample pass mask and the
//! tri-state site result.

use std::fmt;

use crate::errors::ParseError;
use crate::models::{unpack, FieldType, Schema};

use super::setters::{FilterMatch, Setter};

/// Operator kinds; also used on the shunting-yard operator stack, where
/// the parentheses and the function names live until they are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    LeftParen,
    RightParen,
    Le,
    Lt,
    Eq,
    Gt,
    Ge,
    Ne,
    Or,
    OrVec,
    And,
    AndVec,
    Add,
    Sub,
    Mult,
    Div,
    Max,
    Min,
    Avg,
}

/// Selector of a one-argument aggregate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FuncKind {
    Max,
    Min,
    Avg,
}

impl FuncKind {
    pub(crate) fn stack_kind(self) -> TokenKind {
        match self {
            FuncKind::Max => TokenKind::Max,
            FuncKind::Min => TokenKind::Min,
            FuncKind::Avg => TokenKind::Avg,
        }
    }
}

/// Operator precedence, lowest to highest; parentheses sit below every
/// operator so they stop the shunting-yard pop loop.
pub(crate) fn precedence(kind: TokenKind) -> u8 {
    match kind {
        TokenKind::LeftParen | TokenKind::RightParen => 1,
        TokenKind::Or | TokenKind::OrVec => 2,
        TokenKind::And | TokenKind::AndVec => 3,
        TokenKind::Le
        | TokenKind::Lt
        | TokenKind::Eq
        | TokenKind::Gt
        | TokenKind::Ge
        | TokenKind::Ne => 5,
        TokenKind::Add | TokenKind::Sub => 6,
        TokenKind::Mult | TokenKind::Div => 7,
        TokenKind::Max | TokenKind::Min | TokenKind::Avg => 8,
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::LeftParen => "(",
            TokenKind::RightParen => ")",
            TokenKind::Le => "<=",
            TokenKind::Lt => "<",
            TokenKind::Eq => "==",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::Ne => "!=",
            TokenKind::Or => "|",
            TokenKind::OrVec => "||",
            TokenKind::And => "&",
            TokenKind::AndVec => "&&",
            TokenKind::Add => "+",
            TokenKind::Sub => "-",
            TokenKind::Mult => "*",
            TokenKind::Div => "/",
            TokenKind::Max => "%MAX",
            TokenKind::Min => "%MIN",
            TokenKind::Avg => "%AVG",
        };
        f.write_str(text)
    }
}

impl fmt::Display for FuncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FuncKind::Max => "%MAX",
            FuncKind::Min => "%MIN",
            FuncKind::Avg => "%AVG",
        })
    }
}

/// One token of the compiled postfix program.
#[derive(Debug, Clone)]
pub(crate) enum ProgramToken {
    Value(ValueToken),
    Op(TokenKind),
    Func(FuncKind),
}

/// A value slot of the program: a constant or a bound field reference,
/// plus the scratch state the evaluator fills per record.
#[derive(Debug, Clone, Default)]
pub(crate) struct ValueToken {
    // bound at compile time
    /// Original field name, for diagnostics and the special-form post-pass
    pub tag: Option<String>,
    /// String constant bytes (quotes stripped)
    pub key: Option<Vec<u8>>,
    /// Numeric constant
    pub threshold: f32,
    pub setter: Option<Setter>,
    /// Set on `%FILTER` tokens once the literal operand is resolved
    pub filter_cmp: Option<FilterMatch>,
    /// Subscript into array-valued fields
    pub idx: usize,
    pub is_str: bool,

    // mutated on every record
    /// Numeric buffer; `values[0]` is the slot width for string kinds
    pub values: Vec<f32>,
    /// String bytes copied out of the record
    pub text: Vec<u8>,
    /// Populated entries in `values`; 0 means missing for this record
    pub nvalues: usize,
    /// 0 for site-level state, otherwise the record's sample count
    pub nsamples: usize,
    /// Site result; `None` until a boolean operator produces one
    pub pass_site: Option<bool>,
    /// Per-sample pass mask, allocated iff the expression touches FORMAT
    pub pass_samples: Vec<u8>,
}

impl ValueToken {
    /// Token for an implicit numeric constant (e.g. the `-1` emitted for
    /// unary minus).
    pub(crate) fn constant(value: f32) -> Self {
        Self {
            threshold: value,
            ..Self::default()
        }
    }

    /// Publish a scalar into the numeric buffer.
    pub(crate) fn set_scalar(&mut self, value: f32) {
        if self.values.is_empty() {
            self.values.push(value);
        } else {
            self.values[0] = value;
        }
        self.nvalues = 1;
    }

    /// Grow the numeric buffer so indices below `len` are addressable;
    /// new slots read as missing.
    pub(crate) fn reserve_values(&mut self, len: usize) {
        if self.values.len() < len {
            self.values.resize(len, crate::models::missing_float());
        }
    }
}

/// Bind a value lexeme to the schema, choosing the setter the evaluator
/// will run for it. `inside_func` makes an unprefixed identifier default
/// to per-sample binding.
pub(crate) fn bind_value(
    schema: &Schema,
    lexeme: &str,
    inside_func: bool,
    max_unpack: &mut u8,
    expression: &str,
) -> Result<ValueToken, ParseError> {
    let mut tok = ValueToken::default();

    // string constant; the lexer guarantees the closing quote
    if lexeme.starts_with('"') || lexeme.starts_with('\'') {
        let inner = &lexeme[1..lexeme.len() - 1];
        tok.key = Some(inner.as_bytes().to_vec());
        tok.is_str = true;
        return Ok(tok);
    }

    let mut name = lexeme;
    let mut is_fmt = None;
    if let Some(stripped) = name.strip_prefix("FMT/").or_else(|| name.strip_prefix("FORMAT/")) {
        name = stripped;
        is_fmt = Some(true);
    } else if let Some(stripped) = name.strip_prefix("INFO/") {
        name = stripped;
        is_fmt = Some(false);
    } else if name == "%QUAL" {
        tok.setter = Some(Setter::SiteQual);
        tok.tag = Some(name.to_string());
        return Ok(tok);
    } else if name == "%TYPE" {
        tok.setter = Some(Setter::SiteType);
        tok.tag = Some(name.to_string());
        return Ok(tok);
    } else if name == "%FILTER" {
        // the id is resolved by the post-pass once the literal is known
        tok.filter_cmp = Some(FilterMatch { id: None });
        tok.tag = Some(name.to_string());
        *max_unpack |= unpack::FILTER;
        return Ok(tok);
    }

    let is_fmt = is_fmt.unwrap_or(inside_func);
    if is_fmt {
        *max_unpack |= unpack::FORMAT;
    }

    if let Some(id) = schema.field_id(name) {
        if is_fmt {
            let field = schema
                .format(id)
                .ok_or_else(|| ParseError::UnknownFormatField(name.to_string()))?;
            if !field.arity.is_scalar() {
                return Err(ParseError::UnsubscriptedArray(name.to_string()));
            }
            tok.setter = Some(match field.ty {
                FieldType::Integer => Setter::FormatInt { id },
                FieldType::Float => Setter::FormatFloat { id },
                FieldType::String => {
                    tok.is_str = true;
                    Setter::FormatString { id }
                }
                FieldType::Flag => return Err(ParseError::UnsupportedField(name.to_string())),
            });
        } else {
            let field = schema
                .info(id)
                .ok_or_else(|| ParseError::UnknownInfoField(name.to_string()))?;
            if field.ty == FieldType::Flag {
                tok.setter = Some(Setter::InfoFlag { id });
            } else {
                if field.ty == FieldType::String {
                    tok.is_str = true;
                }
                if !field.arity.is_scalar() {
                    return Err(ParseError::UnsubscriptedArray(name.to_string()));
                }
                tok.setter = Some(Setter::Info { id });
            }
            *max_unpack |= unpack::INFO;
        }
        tok.tag = Some(name.to_string());
        return Ok(tok);
    }

    // subscripted vector tag, NAME[idx]
    if let (Some(open), true) = (name.find('['), name.ends_with(']')) {
        let base = &name[..open];
        if let Some(id) = schema.field_id(base) {
            let idx = name[open + 1..name.len() - 1].parse::<usize>().unwrap_or(0);
            if is_fmt {
                let field = schema
                    .format(id)
                    .ok_or_else(|| ParseError::UnknownFormatField(base.to_string()))?;
                if !field.arity.is_scalar() {
                    return Err(ParseError::UnsubscriptedArray(base.to_string()));
                }
                tok.setter = Some(match field.ty {
                    FieldType::Integer => Setter::FormatInt { id },
                    FieldType::Float => Setter::FormatFloat { id },
                    FieldType::String => {
                        tok.is_str = true;
                        Setter::FormatString { id }
                    }
                    FieldType::Flag => return Err(ParseError::UnsupportedField(base.to_string())),
                });
            } else {
                let field = schema
                    .info(id)
                    .ok_or_else(|| ParseError::UnknownInfoField(base.to_string()))?;
                tok.setter = Some(match field.ty {
                    FieldType::Integer => Setter::InfoInt { id, idx },
                    FieldType::Float => Setter::InfoFloat { id, idx },
                    FieldType::String => {
                        return Err(ParseError::StringSubscript(base.to_string()))
                    }
                    FieldType::Flag => return Err(ParseError::UnsupportedField(base.to_string())),
                });
                *max_unpack |= unpack::INFO;
            }
            tok.idx = idx;
            tok.tag = Some(name.to_string());
            return Ok(tok);
        }
    }

    // plain numeric constant, else the tag is unknown
    match name.parse::<f64>() {
        Ok(value) => {
            tok.threshold = value as f32;
            Ok(tok)
        }
        Err(_) => Err(ParseError::unknown_tag(name, expression)),
    }
}
