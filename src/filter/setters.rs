//! Setters: reading record fields into value tokens
//!
//! Each bound value token carries one `Setter` chosen at compile time;
//! per record the evaluator asks it to fill the token's buffers. Missing
//! data never errors here: it surfaces as `nvalues == 0` or as missing
//! sentinels inside the numeric buffer, and the evaluator kernels take
//! it from there. Integer sentinels are translated to the float missing
//! sentinel so the kernels only ever test the float predicate.

use crate::models::{
    is_missing, is_vector_end, missing_float, FormatValue, InfoValue, Record, MISSING_INT,
    VECTOR_END_INT,
};

use super::token::ValueToken;

/// Compile-time binding of a value token to a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Setter {
    /// Site quality column
    SiteQual,
    /// Variant-type bitmask of the site
    SiteType,
    /// Scalar INFO field (numeric or string)
    Info { id: usize },
    /// Subscripted integer INFO array
    InfoInt { id: usize, idx: usize },
    /// Subscripted float INFO array
    InfoFloat { id: usize, idx: usize },
    /// INFO flag: 1 if present, 0 if absent
    InfoFlag { id: usize },
    /// Per-sample integer FORMAT field
    FormatInt { id: usize },
    /// Per-sample float FORMAT field
    FormatFloat { id: usize },
    /// Per-sample fixed-width string FORMAT field
    FormatString { id: usize },
}

impl Setter {
    pub(crate) fn fill(self, record: &Record, n_samples: usize, tok: &mut ValueToken) {
        match self {
            Setter::SiteQual => match record.qual() {
                Some(qual) => tok.set_scalar(qual),
                None => tok.nvalues = 0,
            },
            Setter::SiteType => tok.set_scalar(record.variant_types() as f32),
            Setter::Info { id } => fill_info_scalar(record, id, tok),
            Setter::InfoInt { id, idx } | Setter::InfoFloat { id, idx } => {
                match info_element(record, id, idx) {
                    Some(value) => tok.set_scalar(value),
                    None => tok.nvalues = 0,
                }
            }
            Setter::InfoFlag { id } => {
                tok.set_scalar(if record.info(id).is_some() { 1.0 } else { 0.0 })
            }
            Setter::FormatInt { id } => {
                match record.format(id) {
                    Some(FormatValue::Integer(values)) if !values.is_empty() => {
                        tok.values.clear();
                        let mut any = false;
                        for &v in values {
                            if v == MISSING_INT || v == VECTOR_END_INT {
                                tok.values.push(missing_float());
                            } else {
                                tok.values.push(v as f32);
                                any = true;
                            }
                        }
                        // a vector of nothing but missing entries counts
                        // as missing for the whole record
                        tok.nvalues = if any { values.len() } else { 0 };
                    }
                    _ => tok.nvalues = 0,
                }
                tok.nsamples = tok.nvalues;
            }
            Setter::FormatFloat { id } => match record.format(id) {
                Some(FormatValue::Float(values)) if !values.is_empty() => {
                    tok.values.clear();
                    tok.values.extend_from_slice(values);
                    tok.nvalues = values.len();
                    tok.nsamples = values.len();
                }
                _ => {
                    tok.nvalues = 0;
                    tok.nsamples = 0;
                }
            },
            Setter::FormatString { id } => match record.format(id) {
                Some(FormatValue::Text { width, bytes }) if !bytes.is_empty() && n_samples > 0 => {
                    tok.text.clear();
                    tok.text.extend_from_slice(bytes);
                    tok.set_scalar(*width as f32);
                    tok.nvalues = n_samples;
                    tok.nsamples = n_samples;
                }
                _ => {
                    tok.nvalues = 0;
                    tok.nsamples = 0;
                }
            },
        }
    }
}

fn fill_info_scalar(record: &Record, id: usize, tok: &mut ValueToken) {
    match record.info(id) {
        None => tok.nvalues = 0,
        Some(InfoValue::Text(bytes)) => {
            tok.text.clear();
            tok.text.extend_from_slice(bytes);
            tok.set_scalar(bytes.len() as f32);
        }
        Some(InfoValue::Float(values)) => match values.first() {
            Some(&v) => tok.set_scalar(v),
            None => tok.nvalues = 0,
        },
        Some(InfoValue::Integer(values)) => match values.first() {
            Some(&MISSING_INT) | None => tok.nvalues = 0,
            Some(&v) => tok.set_scalar(v as f32),
        },
        Some(InfoValue::Flag) => tok.set_scalar(1.0),
    }
}

/// Element `idx` of an INFO array: `None` when the field is absent, the
/// subscript is out of range, a vector-end sentinel terminates the array
/// early, or the element itself is missing. A length-1 entry is an
/// inline scalar and ignores the subscript.
fn info_element(record: &Record, id: usize, idx: usize) -> Option<f32> {
    match record.info(id)? {
        InfoValue::Integer(values) => {
            if values.len() == 1 {
                let v = values[0];
                return (v != MISSING_INT).then(|| v as f32);
            }
            if idx >= values.len() || values[..idx].contains(&VECTOR_END_INT) {
                return None;
            }
            let v = values[idx];
            (v != MISSING_INT && v != VECTOR_END_INT).then(|| v as f32)
        }
        InfoValue::Float(values) => {
            if values.len() == 1 {
                let v = values[0];
                return (!is_missing(v)).then_some(v);
            }
            if idx >= values.len() || values[..idx].iter().any(|&v| is_vector_end(v)) {
                return None;
            }
            let v = values[idx];
            (!is_missing(v) && !is_vector_end(v)).then_some(v)
        }
        _ => None,
    }
}

/// Comparator for `%FILTER` equality tests, bound at compile time with
/// the resolved id of the literal; `id == None` encodes the `"."`
/// literal, i.e. "no filter set".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FilterMatch {
    pub id: Option<usize>,
}

impl FilterMatch {
    /// `==` passes iff the id appears in the record's filter list (the
    /// `"."` id passes iff the list is empty); `!=` is the complement
    /// logic, except that `"."` against a non-empty list passes.
    pub(crate) fn compare(self, record: &Record, negated: bool) -> bool {
        let filters = record.filters();
        if negated {
            if filters.is_empty() {
                return self.id.is_some();
            }
            !filters.iter().any(|&f| Some(f) == self.id)
        } else {
            if filters.is_empty() {
                return self.id.is_none();
            }
            filters.iter().any(|&f| Some(f) == self.id)
        }
    }
}
