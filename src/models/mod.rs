//! Schema and record data model
//!
//! The engine binds expressions against a [`Schema`] (derived from the
//! variant file header) and evaluates them against [`Record`]s. Parsing
//! the variant file format itself is out of scope; this module only
//! defines the shapes the engine consumes, including the missing-value
//! sentinels of the binary record encoding.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod input;

/// Integer "missing" sentinel of the binary record encoding.
pub const MISSING_INT: i32 = i32::MIN;
/// Integer sentinel marking premature termination of a fixed-width vector.
pub const VECTOR_END_INT: i32 = i32::MIN + 1;

const MISSING_FLOAT_BITS: u32 = 0x7f80_0001;
const VECTOR_END_FLOAT_BITS: u32 = 0x7f80_0002;

/// The float "missing" sentinel, a NaN with a reserved payload.
///
/// Distinguished from ordinary NaNs by bit pattern; use [`is_missing`]
/// to test for it, never `==`.
pub fn missing_float() -> f32 {
    f32::from_bits(MISSING_FLOAT_BITS)
}

/// The float vector-end sentinel.
pub fn vector_end_float() -> f32 {
    f32::from_bits(VECTOR_END_FLOAT_BITS)
}

/// True if `value` is the float missing sentinel.
pub fn is_missing(value: f32) -> bool {
    value.to_bits() == MISSING_FLOAT_BITS
}

/// True if `value` is the float vector-end sentinel.
pub fn is_vector_end(value: f32) -> bool {
    value.to_bits() == VECTOR_END_FLOAT_BITS
}

// Variant type classes. A record carries the bitwise OR of the classes
// present in its alternate alleles; a pure-reference record carries 0.
pub const VT_REF: u32 = 0;
pub const VT_SNP: u32 = 1;
pub const VT_MNP: u32 = 2;
pub const VT_INDEL: u32 = 4;
pub const VT_OTHER: u32 = 8;

/// Record-unpack hints. The compiler ORs together the sections of the
/// record an expression touches so the caller can skip decoding the
/// rest; see [`crate::filter::Filter::max_unpack`].
pub mod unpack {
    pub const STRING: u8 = 1;
    pub const FILTER: u8 = 2;
    pub const INFO: u8 = 4;
    pub const FORMAT: u8 = 8;
}

/// Value type of an INFO or FORMAT field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Float,
    Flag,
    String,
}

/// Declared number of values a field carries per record (per sample for
/// FORMAT fields).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    Variable,
}

impl Arity {
    pub fn is_scalar(&self) -> bool {
        matches!(self, Arity::Fixed(1))
    }
}

/// Type and arity of a field within one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    pub ty: FieldType,
    pub arity: Arity,
}

/// One entry of the shared header dictionary. The same name (and id) may
/// exist as an INFO field, a FORMAT field, and a FILTER tag at once.
#[derive(Debug, Clone, Default)]
pub struct SchemaEntry {
    pub name: String,
    pub info: Option<FieldInfo>,
    pub format: Option<FieldInfo>,
    pub is_filter: bool,
}

/// Header-derived schema: a shared name-to-id dictionary plus the sample
/// list. Ids are dense indices handed out in declaration order and are
/// what compiled programs bind to.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    entries: Vec<SchemaEntry>,
    index: HashMap<String, usize>,
    samples: Vec<String>,
}

impl Schema {
    pub fn new(samples: Vec<String>) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            samples,
        }
    }

    fn entry_id(&mut self, name: &str) -> usize {
        if let Some(&id) = self.index.get(name) {
            return id;
        }
        let id = self.entries.len();
        self.entries.push(SchemaEntry {
            name: name.to_string(),
            ..SchemaEntry::default()
        });
        self.index.insert(name.to_string(), id);
        id
    }

    /// Declare an INFO field, returning its id.
    pub fn declare_info(&mut self, name: &str, ty: FieldType, arity: Arity) -> usize {
        let id = self.entry_id(name);
        self.entries[id].info = Some(FieldInfo { ty, arity });
        id
    }

    /// Declare a FORMAT field, returning its id.
    pub fn declare_format(&mut self, name: &str, ty: FieldType, arity: Arity) -> usize {
        let id = self.entry_id(name);
        self.entries[id].format = Some(FieldInfo { ty, arity });
        id
    }

    /// Declare a FILTER tag, returning its id.
    pub fn declare_filter(&mut self, name: &str) -> usize {
        let id = self.entry_id(name);
        self.entries[id].is_filter = true;
        id
    }

    /// Look up the id of a field name in the shared dictionary.
    pub fn field_id(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// INFO metadata of `id`, if the field exists in the INFO category.
    pub fn info(&self, id: usize) -> Option<&FieldInfo> {
        self.entries.get(id).and_then(|e| e.info.as_ref())
    }

    /// FORMAT metadata of `id`, if the field exists in the FORMAT category.
    pub fn format(&self, id: usize) -> Option<&FieldInfo> {
        self.entries.get(id).and_then(|e| e.format.as_ref())
    }

    /// True if `id` is declared as a FILTER tag.
    pub fn is_filter(&self, id: usize) -> bool {
        self.entries.get(id).is_some_and(|e| e.is_filter)
    }

    /// Name of the dictionary entry `id`.
    pub fn name(&self, id: usize) -> &str {
        self.entries.get(id).map(|e| e.name.as_str()).unwrap_or("")
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }
}

/// A site-level annotation value.
#[derive(Debug, Clone, PartialEq)]
pub enum InfoValue {
    /// Presence-only flag
    Flag,
    Integer(Vec<i32>),
    Float(Vec<f32>),
    /// Site-level string, not NUL-terminated
    Text(Vec<u8>),
}

/// A per-sample annotation value; arrays carry one entry per sample.
#[derive(Debug, Clone, PartialEq)]
pub enum FormatValue {
    Integer(Vec<i32>),
    Float(Vec<f32>),
    /// Fixed-width byte matrix: `width` bytes per sample, short entries
    /// NUL-padded
    Text { width: usize, bytes: Vec<u8> },
}

/// One row of the variant table: a genomic site with its annotations.
///
/// Per-sample arrays must carry exactly one entry per schema sample
/// (`width * n_samples` bytes for [`FormatValue::Text`]).
#[derive(Debug, Clone, Default)]
pub struct Record {
    qual: Option<f32>,
    variant_types: u32,
    info: Vec<(usize, InfoValue)>,
    format: Vec<(usize, FormatValue)>,
    filters: Vec<usize>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Site quality; `None` when missing.
    pub fn qual(&self) -> Option<f32> {
        self.qual
    }

    pub fn set_qual(&mut self, qual: f32) {
        self.qual = Some(qual);
    }

    /// Bitmask of `VT_*` variant type classes.
    pub fn variant_types(&self) -> u32 {
        self.variant_types
    }

    pub fn set_variant_types(&mut self, types: u32) {
        self.variant_types = types;
    }

    /// INFO value of field `id`, if present on this record.
    pub fn info(&self, id: usize) -> Option<&InfoValue> {
        self.info.iter().find(|(k, _)| *k == id).map(|(_, v)| v)
    }

    pub fn set_info(&mut self, id: usize, value: InfoValue) {
        if let Some(slot) = self.info.iter_mut().find(|(k, _)| *k == id) {
            slot.1 = value;
        } else {
            self.info.push((id, value));
        }
    }

    /// FORMAT value of field `id`, if present on this record.
    pub fn format(&self, id: usize) -> Option<&FormatValue> {
        self.format.iter().find(|(k, _)| *k == id).map(|(_, v)| v)
    }

    pub fn set_format(&mut self, id: usize, value: FormatValue) {
        if let Some(slot) = self.format.iter_mut().find(|(k, _)| *k == id) {
            slot.1 = value;
        } else {
            self.format.push((id, value));
        }
    }

    /// Ids of the filters applied to this record; an empty list means
    /// "no filter set".
    pub fn filters(&self) -> &[usize] {
        &self.filters
    }

    pub fn set_filters(&mut self, ids: Vec<usize>) {
        self.filters = ids;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_dictionary_ids() {
        let mut schema = Schema::new(vec!["S1".to_string()]);
        let dp_info = schema.declare_info("DP", FieldType::Integer, Arity::Fixed(1));
        let dp_fmt = schema.declare_format("DP", FieldType::Integer, Arity::Fixed(1));
        assert_eq!(dp_info, dp_fmt, "same name shares one dictionary id");
        assert!(schema.info(dp_info).is_some());
        assert!(schema.format(dp_info).is_some());
        assert!(!schema.is_filter(dp_info));

        let pass = schema.declare_filter("PASS");
        assert_ne!(pass, dp_info);
        assert!(schema.is_filter(pass));
        assert_eq!(schema.name(pass), "PASS");
        assert_eq!(schema.field_id("PASS"), Some(pass));
        assert_eq!(schema.field_id("GQ"), None);
    }

    #[test]
    fn test_missing_sentinels_are_bit_patterns() {
        assert!(is_missing(missing_float()));
        assert!(!is_missing(f32::NAN), "ordinary NaN is not the sentinel");
        assert!(!is_missing(0.0));
        assert!(is_vector_end(vector_end_float()));
        assert!(!is_vector_end(missing_float()));
    }

    #[test]
    fn test_record_replaces_existing_field() {
        let mut record = Record::new();
        record.set_info(0, InfoValue::Integer(vec![1]));
        record.set_info(0, InfoValue::Integer(vec![2]));
        assert_eq!(record.info(0), Some(&InfoValue::Integer(vec![2])));
        assert_eq!(record.info(1), None);
        assert!(record.qual().is_none());
    }
}
