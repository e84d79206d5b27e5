//! Filtering expression engine
//!
//! An expression is compiled once against a [`Schema`] into a postfix
//! program (Dijkstra's shunting-yard algorithm) and then evaluated
//! against any number of [`Record`](crate::models::Record)s. The
//! compiled [`Filter`] owns all
//! per-token scratch, so it must not be shared between threads that
//! evaluate concurrently; bind one filter per worker instead. The schema
//! itself is only needed at compile time.
//!
//! ```
//! use vcf_filter::models::{Arity, FieldType, Record, Schema};
//! use vcf_filter::Filter;
//!
//! let mut schema = Schema::new(vec![]);
//! schema.declare_info("DP", FieldType::Integer, Arity::Fixed(1));
//! let mut filter = Filter::new(&schema, "%QUAL>10 & DP>14").unwrap();
//!
//! let mut record = Record::new();
//! record.set_qual(30.0);
//! record.set_info(0, vcf_filter::models::InfoValue::Integer(vec![16]));
//! assert!(filter.evaluate(&record).unwrap());
//! ```

use std::fmt;
use std::io::{self, Write};

use tracing::trace;

use crate::errors::{FilterResult, ParseError};
use crate::models::{
    unpack, Schema, VT_INDEL, VT_MNP, VT_OTHER, VT_REF, VT_SNP,
};

mod eval;
mod lexer;
mod setters;
mod token;

use lexer::{Lexer, RawToken};
use setters::FilterMatch;
use token::{bind_value, precedence, FuncKind, ProgramToken, TokenKind, ValueToken};

/// A compiled filtering expression.
pub struct Filter {
    expression: String,
    program: Vec<ProgramToken>,
    stack: Vec<usize>,
    /// Sample count of the schema, 0 unless the expression touches
    /// FORMAT fields
    n_samples: usize,
    max_unpack: u8,
}

impl Filter {
    /// Compile `expression` against the schema. The returned filter is
    /// reusable across records; compilation failures reject the whole
    /// expression.
    pub fn new(schema: &Schema, expression: &str) -> FilterResult<Self> {
        let mut max_unpack = unpack::STRING;
        let mut ops: Vec<TokenKind> = Vec::new();
        let mut out: Vec<ProgramToken> = Vec::new();
        let mut lexer = Lexer::new(expression);
        let mut last_was_operand = false;
        let mut nfunc = 0usize;

        while let Some(raw) = lexer.next_token()? {
            match raw {
                RawToken::Op(TokenKind::LeftParen) => {
                    ops.push(TokenKind::LeftParen);
                    last_was_operand = false;
                }
                RawToken::Op(TokenKind::RightParen) => {
                    loop {
                        match ops.pop() {
                            None => return Err(ParseError::malformed(expression).into()),
                            Some(TokenKind::LeftParen) => break,
                            Some(kind) => pop_to_output(&mut out, kind, &mut nfunc),
                        }
                    }
                    last_was_operand = true;
                }
                RawToken::Func(func) => {
                    // functions are high-precedence prefix operators
                    ops.push(func.stack_kind());
                    nfunc += 1;
                    last_was_operand = false;
                }
                RawToken::Op(kind) => {
                    if kind == TokenKind::Sub && !last_was_operand {
                        // unary minus: rewrite -x as -1 * x
                        out.push(ProgramToken::Value(ValueToken::constant(-1.0)));
                        ops.push(TokenKind::Mult);
                    } else {
                        while let Some(&top) = ops.last() {
                            if top == TokenKind::LeftParen || precedence(top) < precedence(kind) {
                                break;
                            }
                            pop_to_output(&mut out, top, &mut nfunc);
                            ops.pop();
                        }
                        ops.push(kind);
                    }
                    last_was_operand = false;
                }
                RawToken::Value(lexeme) => {
                    let tok = bind_value(schema, lexeme, nfunc > 0, &mut max_unpack, expression)?;
                    out.push(ProgramToken::Value(tok));
                    last_was_operand = true;
                }
            }
        }
        while let Some(kind) = ops.pop() {
            if kind == TokenKind::LeftParen || kind == TokenKind::RightParen {
                return Err(ParseError::malformed(expression).into());
            }
            pop_to_output(&mut out, kind, &mut nfunc);
        }

        resolve_special_forms(schema, &mut out, expression)?;
        validate_program(&out, expression)?;

        // per-sample masks exist only when the expression reads FORMAT
        // fields; they start all-ones
        let n_samples = if max_unpack & unpack::FORMAT != 0 {
            schema.n_samples()
        } else {
            0
        };
        for tok in out.iter_mut() {
            if let ProgramToken::Value(value) = tok {
                if value.values.is_empty() {
                    value.values.push(0.0);
                }
                value.pass_samples = vec![1; n_samples];
            }
        }

        let filter = Self {
            expression: expression.to_string(),
            stack: Vec::with_capacity(out.len()),
            program: out,
            n_samples,
            max_unpack,
        };
        trace!(
            "compiled '{}' into {} postfix tokens (unpack 0x{:x})\n{:?}",
            filter.expression,
            filter.program.len(),
            filter.max_unpack,
            filter
        );
        Ok(filter)
    }

    /// The original expression text.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// OR of the [`unpack`] hints for the record sections this
    /// expression reads; hand it to the record unpacker to skip the
    /// rest.
    pub fn max_unpack(&self) -> u8 {
        self.max_unpack
    }
}

fn pop_to_output(out: &mut Vec<ProgramToken>, kind: TokenKind, nfunc: &mut usize) {
    let func = match kind {
        TokenKind::Max => FuncKind::Max,
        TokenKind::Min => FuncKind::Min,
        TokenKind::Avg => FuncKind::Avg,
        _ => {
            out.push(ProgramToken::Op(kind));
            return;
        }
    };
    *nfunc = nfunc.saturating_sub(1);
    out.push(ProgramToken::Func(func));
}

fn type_code(literal: &str) -> Option<u32> {
    match literal.to_ascii_lowercase().as_str() {
        "snp" | "snps" => Some(VT_SNP),
        "indel" | "indels" => Some(VT_INDEL),
        "mnp" | "mnps" => Some(VT_MNP),
        "other" => Some(VT_OTHER),
        "ref" => Some(VT_REF),
        _ => None,
    }
}

/// Rewrite the literal operand of the `%TYPE op literal` and
/// `%FILTER op literal` forms. The literal must be the immediately
/// preceding or following program token and the governing operator must
/// be `==`/`!=`; anything else is malformed.
fn resolve_special_forms(
    schema: &Schema,
    out: &mut [ProgramToken],
    expression: &str,
) -> Result<(), ParseError> {
    for i in 0..out.len() {
        let tag = match &out[i] {
            ProgramToken::Value(v) => match v.tag.as_deref() {
                Some(tag @ ("%TYPE" | "%FILTER")) => tag.to_string(),
                _ => continue,
            },
            _ => continue,
        };

        // find the literal: either just before the tag token, with the
        // operator right after the pair, or just after it
        let is_eq_ne = |tok: &ProgramToken| {
            matches!(tok, ProgramToken::Op(TokenKind::Eq) | ProgramToken::Op(TokenKind::Ne))
        };
        let literal_at = if out.get(i + 1).is_some_and(is_eq_ne) {
            match i.checked_sub(1) {
                Some(j) => j,
                None => return Err(ParseError::malformed(expression)),
            }
        } else if i + 2 < out.len() && is_eq_ne(&out[i + 2]) {
            i + 1
        } else {
            return Err(ParseError::malformed(expression));
        };

        let ProgramToken::Value(literal) = &mut out[literal_at] else {
            return Err(ParseError::malformed(expression));
        };
        let Some(key) = literal.key.take() else {
            return Err(ParseError::malformed(expression));
        };
        let key = String::from_utf8_lossy(&key).into_owned();
        literal.is_str = false;

        if tag == "%TYPE" {
            let Some(code) = type_code(&key) else {
                return Err(ParseError::UnknownTypeLiteral {
                    literal: key,
                    expression: expression.to_string(),
                });
            };
            literal.threshold = code as f32;
            literal.tag = Some(key);
        } else {
            let id = if key == "." {
                None
            } else {
                match schema.field_id(&key).filter(|&id| schema.is_filter(id)) {
                    Some(id) => Some(id),
                    None => return Err(ParseError::UnknownFilter(key)),
                }
            };
            literal.tag = Some(key);
            let ProgramToken::Value(tag_tok) = &mut out[i] else {
                return Err(ParseError::malformed(expression));
            };
            tag_tok.filter_cmp = Some(FilterMatch { id });
        }
    }
    Ok(())
}

/// Simulate stack depth over the postfix program so evaluation cannot
/// underflow: values push one, functions need one, binary operators
/// consume one, and exactly one operand must remain.
fn validate_program(out: &[ProgramToken], expression: &str) -> Result<(), ParseError> {
    let mut depth = 0usize;
    for tok in out {
        match tok {
            ProgramToken::Value(_) => depth += 1,
            ProgramToken::Func(_) => {
                if depth == 0 {
                    return Err(ParseError::malformed(expression));
                }
            }
            ProgramToken::Op(_) => {
                if depth < 2 {
                    return Err(ParseError::malformed(expression));
                }
                depth -= 1;
            }
        }
    }
    if depth != 1 {
        return Err(ParseError::malformed(expression));
    }
    Ok(())
}

impl fmt::Debug for Filter {
    /// Renders the postfix program one token per line.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for tok in &self.program {
            match tok {
                ProgramToken::Value(value) => {
                    if let Some(key) = &value.key {
                        writeln!(f, "\"{}\"", String::from_utf8_lossy(key))?;
                    } else if let Some(tag) = &value.tag {
                        writeln!(f, "{tag}")?;
                    } else {
                        writeln!(f, "{:e}", value.threshold)?;
                    }
                }
                ProgramToken::Op(kind) => writeln!(f, "{kind}")?,
                ProgramToken::Func(func) => writeln!(f, "{func}")?,
            }
        }
        Ok(())
    }
}

/// Write the expression-language reference to `writer`; front-ends show
/// this next to their usage text.
pub fn write_expression_help<W: Write>(writer: &mut W) -> io::Result<()> {
    writeln!(writer, "Filter expressions may contain:")?;
    writeln!(writer, "    - numerical constants and string constants")?;
    writeln!(writer, "        .. 1, 1.0, 1e-4")?;
    writeln!(writer, "        .. \"String\"")?;
    writeln!(writer, "    - arithmetic operators: +,*,-,/")?;
    writeln!(
        writer,
        "    - comparison operators: == (same as =), >, >=, <=, <, !="
    )?;
    writeln!(writer, "    - parentheses: (, )")?;
    writeln!(writer, "    - logical operators: &&, &, ||, |")?;
    writeln!(writer, "    - INFO tags, FORMAT tags, column names")?;
    writeln!(writer, "        .. INFO/DP or DP")?;
    writeln!(writer, "        .. FORMAT/DV, FMT/DV, or DV")?;
    writeln!(writer, "        .. %FILTER, %QUAL")?;
    writeln!(
        writer,
        "    - 1 (or 0) to test the presence (or absence) of a flag"
    )?;
    writeln!(writer, "        .. FlagA=1 && FlagB=0")?;
    writeln!(
        writer,
        "    - %TYPE for variant type in REF,ALT columns: indel,snp,mnp,ref,other"
    )?;
    writeln!(writer, "        .. %TYPE=\"indel\" | %TYPE=\"snp\"")?;
    writeln!(writer, "    - array subscripts")?;
    writeln!(writer, "        .. (DP4[0]+DP4[1])/(DP4[2]+DP4[3]) > 0.3")?;
    writeln!(writer, "    - operations on FORMAT fields: MAX, MIN, AVG")?;
    writeln!(writer, "        .. %MIN(DV)>5")?;
    writeln!(writer, "        .. %MIN(DV/DP)>0.3")?;
    writeln!(writer, "        .. %MIN(DP)>10 & %MIN(DV)>3")?;
    writeln!(
        writer,
        "        .. %QUAL>10 |  FMT/GQ>10   .. selects only GQ>10 samples"
    )?;
    writeln!(
        writer,
        "        .. %QUAL>10 || FMT/GQ>10   .. selects all samples at QUAL>10 sites"
    )?;
    Ok(())
}
