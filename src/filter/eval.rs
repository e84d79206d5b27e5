//! Postfix program evaluation
//!
//! The evaluator walks the compiled program once per record, pushing
//! value slots onto an index stack and folding them with the broadcast
//! kernels below. Binary operators write their result into the deeper of
//! the two operands, exactly as the stack discipline demands; all
//! buffers are owned by the program and reused across records.
//!
//! Missing data propagates: it makes slots (and eventually the site)
//! fail, but it is never an error. Errors out of this module mean the
//! program itself is malformed, which the compile-time validation should
//! have prevented.

use crate::errors::{EvalError, FilterResult};
use crate::models::{is_missing, missing_float, unpack, Record};

use super::token::{FuncKind, ProgramToken, TokenKind, ValueToken};
use super::Filter;

impl Filter {
    /// Evaluate the compiled expression against one record, returning
    /// the site-level pass bit.
    pub fn evaluate(&mut self, record: &Record) -> FilterResult<bool> {
        self.run(record)?;
        Ok(self.site_pass())
    }

    /// Evaluate and additionally return the per-sample pass mask. The
    /// mask is `Some` iff the expression references any per-sample
    /// field; when the final state is site-level it is synthesized by
    /// broadcasting the site bit across all samples.
    pub fn evaluate_samples(&mut self, record: &Record) -> FilterResult<(bool, Option<&[u8]>)> {
        self.run(record)?;
        let site = self.site_pass();
        if self.max_unpack & unpack::FORMAT == 0 {
            return Ok((site, None));
        }
        let top = self.stack[0];
        let ProgramToken::Value(tok) = &mut self.program[top] else {
            return Err(EvalError::stack_underflow(self.expression.clone()).into());
        };
        if tok.nsamples == 0 {
            let bit = u8::from(site);
            tok.pass_samples.fill(bit);
        }
        Ok((site, Some(tok.pass_samples.as_slice())))
    }

    fn site_pass(&self) -> bool {
        match self.stack.first().map(|&i| &self.program[i]) {
            Some(ProgramToken::Value(tok)) => tok.pass_site == Some(true),
            _ => false,
        }
    }

    fn run(&mut self, record: &Record) -> FilterResult<()> {
        let Filter {
            expression,
            program,
            stack,
            n_samples,
            ..
        } = self;
        stack.clear();

        for i in 0..program.len() {
            let kind = match &program[i] {
                ProgramToken::Value(_) => {
                    let ProgramToken::Value(tok) = &mut program[i] else {
                        unreachable!()
                    };
                    tok.nvalues = 0;
                    tok.nsamples = 0;
                    tok.pass_site = None;
                    if let Some(setter) = tok.setter {
                        setter.fill(record, *n_samples, tok);
                    } else if let Some(key) = &tok.key {
                        // string constant: width is the byte length
                        let len = key.len();
                        tok.text.clear();
                        tok.text.extend_from_slice(key);
                        tok.set_scalar(len as f32);
                    } else {
                        tok.set_scalar(tok.threshold);
                    }
                    stack.push(i);
                    continue;
                }
                ProgramToken::Func(func) => {
                    let func = *func;
                    let Some(&top) = stack.last() else {
                        return Err(EvalError::stack_underflow(expression.as_str()).into());
                    };
                    let ProgramToken::Value(tok) = &mut program[top] else {
                        unreachable!("stack entries index value tokens")
                    };
                    apply_func(func, tok);
                    continue;
                }
                ProgramToken::Op(kind) => *kind,
            };

            if stack.len() < 2 {
                return Err(EvalError::stack_underflow(expression.as_str()).into());
            }
            let ib = stack.pop().unwrap_or_default();
            let ia = *stack.last().unwrap_or(&0);
            let (a, b) = value_pair(program, ia, ib);
            let strings = u8::from(a.is_str) + u8::from(b.is_str);

            match kind {
                TokenKind::Or | TokenKind::OrVec => {
                    if a.pass_site.is_none() || b.pass_site.is_none() {
                        return Err(EvalError::not_boolean(expression.as_str()).into());
                    }
                    let pass = vector_logic_or(a, b, kind);
                    a.pass_site = Some(pass);
                }
                TokenKind::And | TokenKind::AndVec => {
                    if a.pass_site.is_none() || b.pass_site.is_none() {
                        return Err(EvalError::not_boolean(expression.as_str()).into());
                    }
                    let pass = vector_logic_and(a, b);
                    a.pass_site = Some(pass);
                }
                TokenKind::Add | TokenKind::Sub | TokenKind::Mult | TokenKind::Div => {
                    vector_arith(a, b, kind, expression)?;
                }
                TokenKind::Eq | TokenKind::Ne => {
                    let negated = kind == TokenKind::Ne;
                    let pass = if a.nvalues == 0 || b.nvalues == 0 {
                        a.nvalues = 0;
                        a.nsamples = 0;
                        false
                    } else if let Some(cmp) = b.filter_cmp {
                        cmp.compare(record, negated)
                    } else if let Some(cmp) = a.filter_cmp {
                        cmp.compare(record, negated)
                    } else if strings == 2 {
                        cmp_vector_strings(a, b, negated, expression)?
                    } else if strings == 1 {
                        return Err(EvalError::TypeMismatch {
                            expression: expression.clone(),
                        }
                        .into());
                    } else {
                        cmp_vectors(a, b, kind, expression)?
                    };
                    a.pass_site = Some(pass);
                }
                TokenKind::Le | TokenKind::Lt | TokenKind::Gt | TokenKind::Ge => {
                    let pass = if a.nvalues == 0 || b.nvalues == 0 {
                        a.nvalues = 0;
                        a.nsamples = 0;
                        false
                    } else if strings > 0 {
                        return Err(EvalError::StringOrdering {
                            expression: expression.clone(),
                        }
                        .into());
                    } else {
                        cmp_vectors(a, b, kind, expression)?
                    };
                    a.pass_site = Some(pass);
                }
                _ => {
                    return Err(EvalError::stack_underflow(expression.as_str()).into());
                }
            }
        }

        if stack.len() != 1 {
            return Err(EvalError::UnbalancedStack {
                expression: expression.clone(),
            }
            .into());
        }
        Ok(())
    }
}

/// Mutable access to two distinct value slots; the stack pushes indices
/// in program order, so `a < b` always holds.
fn value_pair(program: &mut [ProgramToken], a: usize, b: usize) -> (&mut ValueToken, &mut ValueToken) {
    debug_assert!(a < b);
    let (low, high) = program.split_at_mut(b);
    match (&mut low[a], &mut high[0]) {
        (ProgramToken::Value(x), ProgramToken::Value(y)) => (x, y),
        _ => unreachable!("stack entries index value tokens"),
    }
}

/// Apply an aggregate function to the stack top in place, collapsing a
/// per-sample vector into a site-level scalar. Max/min of no usable
/// values collapse to the respective infinity; the mean of none is 0.
fn apply_func(func: FuncKind, tok: &mut ValueToken) {
    let value = match func {
        FuncKind::Max => {
            let mut best = f32::NEG_INFINITY;
            for &v in &tok.values[..tok.nvalues] {
                if !is_missing(v) && best < v {
                    best = v;
                }
            }
            best
        }
        FuncKind::Min => {
            let mut best = f32::INFINITY;
            for &v in &tok.values[..tok.nvalues] {
                if !is_missing(v) && best > v {
                    best = v;
                }
            }
            best
        }
        FuncKind::Avg => {
            let mut sum = 0.0f32;
            let mut count = 0usize;
            for &v in &tok.values[..tok.nvalues] {
                if !is_missing(v) {
                    sum += v;
                    count += 1;
                }
            }
            if count > 0 {
                sum / count as f32
            } else {
                0.0
            }
        }
    };
    tok.set_scalar(value);
    tok.nsamples = 0;
}

/// Site-or-vector logical OR. The `|` flavor leaves an existing vector
/// mask untouched and only raises the site bit; the `||` flavor
/// broadcasts the site bit into every mask slot. Missing on one side
/// yields the other side; missing on both yields a failed site.
fn vector_logic_or(a: &mut ValueToken, b: &mut ValueToken, kind: TokenKind) -> bool {
    if a.nvalues == 0 && b.nvalues == 0 {
        a.nsamples = 0;
        return false;
    }
    if a.nvalues == 0 {
        let n = b.nsamples;
        a.pass_samples[..n].copy_from_slice(&b.pass_samples[..n]);
        a.nsamples = n;
        return b.pass_site == Some(true);
    }
    if b.nvalues == 0 {
        return a.pass_site == Some(true);
    }

    let a_site = a.pass_site == Some(true);
    let b_site = b.pass_site == Some(true);
    if a.nsamples == 0 && b.nsamples == 0 {
        return a_site || b_site;
    }

    let mut pass = false;
    if a.nsamples == 0 {
        if kind == TokenKind::Or {
            for i in 0..b.nsamples {
                a.pass_samples[i] = b.pass_samples[i];
                if a_site || a.pass_samples[i] != 0 {
                    pass = true;
                }
            }
        } else {
            for i in 0..b.nsamples {
                a.pass_samples[i] = u8::from(a_site || b.pass_samples[i] != 0);
                if a.pass_samples[i] != 0 {
                    pass = true;
                }
            }
        }
        a.nsamples = b.nsamples;
        return pass;
    }
    if b.nsamples == 0 {
        if kind == TokenKind::Or {
            for i in 0..a.nsamples {
                if b_site || a.pass_samples[i] != 0 {
                    pass = true;
                }
            }
        } else {
            for i in 0..a.nsamples {
                a.pass_samples[i] = u8::from(a.pass_samples[i] != 0 || b_site);
                if a.pass_samples[i] != 0 {
                    pass = true;
                }
            }
        }
        return pass;
    }
    for i in 0..a.nsamples {
        a.pass_samples[i] = u8::from(a.pass_samples[i] != 0 || b.pass_samples[i] != 0);
        if a.pass_samples[i] != 0 {
            pass = true;
        }
    }
    pass
}

/// Site-or-vector logical AND: a missing operand makes the result
/// missing and the site fail; a site bit gates each sample slot.
fn vector_logic_and(a: &mut ValueToken, b: &mut ValueToken) -> bool {
    if a.nvalues == 0 || b.nvalues == 0 {
        a.nvalues = 0;
        a.nsamples = 0;
        return false;
    }
    let a_site = a.pass_site == Some(true);
    let b_site = b.pass_site == Some(true);
    if a.nsamples == 0 && b.nsamples == 0 {
        return a_site && b_site;
    }

    let mut pass = false;
    if a.nsamples != 0 && b.nsamples != 0 {
        for i in 0..a.nsamples {
            a.pass_samples[i] = u8::from(a.pass_samples[i] != 0 && b.pass_samples[i] != 0);
            if a.pass_samples[i] != 0 {
                pass = true;
            }
        }
        return pass;
    }
    if b.nsamples != 0 {
        for i in 0..b.nsamples {
            a.pass_samples[i] = u8::from(a_site && b.pass_samples[i] != 0);
            if a.pass_samples[i] != 0 {
                pass = true;
            }
        }
        a.nsamples = b.nsamples;
        return pass;
    }
    for i in 0..a.nsamples {
        a.pass_samples[i] = u8::from(a.pass_samples[i] != 0 && b_site);
        if a.pass_samples[i] != 0 {
            pass = true;
        }
    }
    pass
}

fn arith_fn(kind: TokenKind) -> fn(f32, f32) -> f32 {
    match kind {
        TokenKind::Add => |x, y| x + y,
        TokenKind::Sub => |x, y| x - y,
        TokenKind::Mult => |x, y| x * y,
        _ => |x, y| x / y,
    }
}

/// Broadcast arithmetic into `a`. Missing on either side makes the whole
/// result missing; an elementwise slot is missing if either contributing
/// slot is, and a result of nothing but missing slots collapses to
/// missing.
fn vector_arith(
    a: &mut ValueToken,
    b: &mut ValueToken,
    kind: TokenKind,
    expression: &str,
) -> Result<(), EvalError> {
    if a.nvalues == 0 || b.nvalues == 0 {
        a.nvalues = 0;
        a.nsamples = 0;
        return Ok(());
    }
    let op = arith_fn(kind);
    let mut has_values = false;

    if (a.nsamples > 0) == (b.nsamples > 0) {
        // two scalars or two equally long vectors
        if a.nvalues != b.nvalues {
            return Err(EvalError::LengthMismatch {
                expression: expression.to_string(),
            });
        }
        for i in 0..a.nvalues {
            if is_missing(a.values[i]) {
                continue;
            }
            if is_missing(b.values[i]) {
                a.values[i] = missing_float();
                continue;
            }
            has_values = true;
            a.values[i] = op(a.values[i], b.values[i]);
        }
    } else if b.nsamples > 0 {
        // broadcast the scalar in a across b
        let scalar = a.values[0];
        a.reserve_values(b.nvalues);
        for i in 0..b.nvalues {
            if is_missing(scalar) || is_missing(b.values[i]) {
                a.values[i] = missing_float();
                continue;
            }
            has_values = true;
            a.values[i] = op(scalar, b.values[i]);
        }
        a.nvalues = b.nvalues;
        a.nsamples = b.nsamples;
    } else {
        // broadcast the scalar in b across a
        let scalar = b.values[0];
        for i in 0..a.nvalues {
            if is_missing(a.values[i]) || is_missing(scalar) {
                a.values[i] = missing_float();
                continue;
            }
            has_values = true;
            a.values[i] = op(a.values[i], scalar);
        }
    }

    if !has_values {
        a.nvalues = 0;
        a.nsamples = 0;
    }
    Ok(())
}

fn cmp_fn(kind: TokenKind) -> fn(f32, f32) -> bool {
    match kind {
        TokenKind::Le => |x, y| x <= y,
        TokenKind::Lt => |x, y| x < y,
        TokenKind::Eq => |x, y| x == y,
        TokenKind::Gt => |x, y| x > y,
        TokenKind::Ge => |x, y| x >= y,
        _ => |x, y| x != y,
    }
}

/// Numeric comparison with scalar broadcast; writes the per-sample mask
/// into `a` and reports whether any slot (or the site) passed. The
/// caller has already ruled out fully missing operands; per-slot missing
/// entries fail their slot, and a comparison with no usable slot at all
/// collapses to missing.
fn cmp_vectors(
    a: &mut ValueToken,
    b: &mut ValueToken,
    kind: TokenKind,
    expression: &str,
) -> Result<bool, EvalError> {
    let cmp = cmp_fn(kind);
    let mut has_values = false;
    let mut pass = false;

    if a.nsamples > 0 && b.nsamples > 0 {
        if a.nvalues != b.nvalues {
            return Err(EvalError::LengthMismatch {
                expression: expression.to_string(),
            });
        }
        for i in 0..a.nsamples {
            if is_missing(a.values[i]) || is_missing(b.values[i]) {
                a.pass_samples[i] = 0;
                continue;
            }
            has_values = true;
            let hit = cmp(a.values[i], b.values[i]);
            a.pass_samples[i] = u8::from(hit);
            if hit {
                pass = true;
            }
        }
        if !has_values {
            a.nvalues = 0;
        }
    } else if a.nsamples > 0 {
        if is_missing(b.values[0]) {
            a.nvalues = 0;
            a.nsamples = 0;
            return Ok(false);
        }
        let scalar = b.values[0];
        for i in 0..a.nsamples {
            if is_missing(a.values[i]) {
                a.pass_samples[i] = 0;
                continue;
            }
            has_values = true;
            let hit = cmp(a.values[i], scalar);
            a.pass_samples[i] = u8::from(hit);
            if hit {
                pass = true;
            }
        }
        if !has_values {
            a.nvalues = 0;
        }
    } else if b.nsamples > 0 {
        if is_missing(a.values[0]) {
            a.nvalues = 0;
            a.nsamples = 0;
            return Ok(false);
        }
        let scalar = a.values[0];
        for i in 0..b.nsamples {
            if is_missing(b.values[i]) {
                a.pass_samples[i] = 0;
                continue;
            }
            has_values = true;
            let hit = cmp(scalar, b.values[i]);
            a.pass_samples[i] = u8::from(hit);
            if hit {
                pass = true;
            }
        }
        a.reserve_values(b.nvalues);
        a.nvalues = b.nvalues;
        a.nsamples = b.nsamples;
        if !has_values {
            a.nvalues = 0;
        }
    } else {
        if is_missing(a.values[0]) || is_missing(b.values[0]) {
            a.nvalues = 0;
            a.nsamples = 0;
            return Ok(false);
        }
        pass = cmp(a.values[0], b.values[0]);
    }
    Ok(pass)
}

/// One slot of a packed fixed-width string region: `width` bytes per
/// entry, effective length up to the first NUL.
fn string_slot(text: &[u8], index: usize, width: usize) -> &[u8] {
    if width == 0 {
        return &[];
    }
    let start = (index * width).min(text.len());
    let end = (start + width).min(text.len());
    let slot = &text[start..end];
    match slot.iter().position(|&b| b == 0) {
        Some(nul) => &slot[..nul],
        None => slot,
    }
}

/// String equality over packed vectors: equal-length vectors compare
/// elementwise, a scalar broadcasts across a vector, and two per-sample
/// vectors of different lengths are unsupported.
fn cmp_vector_strings(
    a: &mut ValueToken,
    b: &mut ValueToken,
    negated: bool,
    expression: &str,
) -> Result<bool, EvalError> {
    if a.nvalues == 0 {
        a.nsamples = 0;
        return Ok(false);
    }
    if b.nvalues == 0 {
        a.nvalues = 0;
        a.nsamples = 0;
        return Ok(false);
    }

    let width_a = a.values[0] as usize;
    let width_b = b.values[0] as usize;
    let mut pass = false;

    if a.nvalues == b.nvalues {
        for i in 0..a.nvalues {
            let hit = (string_slot(&a.text, i, width_a) == string_slot(&b.text, i, width_b))
                != negated;
            if i < a.pass_samples.len() {
                a.pass_samples[i] = u8::from(hit);
            }
            if hit {
                pass = true;
            }
        }
        if a.nsamples == 0 {
            a.nsamples = b.nsamples;
        }
    } else if a.nsamples == 0 || b.nsamples == 0 {
        // broadcast the scalar side across the vector side
        let a_is_scalar = a.nsamples == 0;
        let scalar: Vec<u8> = if a_is_scalar {
            string_slot(&a.text, 0, width_a).to_vec()
        } else {
            string_slot(&b.text, 0, width_b).to_vec()
        };
        let count = if a_is_scalar { b.nvalues } else { a.nvalues };
        for i in 0..count {
            let other = if a_is_scalar {
                string_slot(&b.text, i, width_b)
            } else {
                string_slot(&a.text, i, width_a)
            };
            let hit = (scalar.as_slice() == other) != negated;
            if i < a.pass_samples.len() {
                a.pass_samples[i] = u8::from(hit);
            }
            if hit {
                pass = true;
            }
        }
        if a.nsamples == 0 {
            a.reserve_values(b.nvalues);
            a.nvalues = b.nsamples;
            a.nsamples = b.nsamples;
        }
    } else {
        return Err(EvalError::LengthMismatch {
            expression: expression.to_string(),
        });
    }
    Ok(pass)
}
