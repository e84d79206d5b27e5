//! JSON interchange format for sites files
//!
//! A small self-describing format carrying a schema and a list of
//! records, so the CLI and the tests can drive the engine without a
//! variant-file parser. Values are coerced to the declared field types;
//! `null` entries become missing sentinels.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;

use super::{
    missing_float, Arity, FieldType, FormatValue, InfoValue, Record, Schema, MISSING_INT, VT_INDEL,
    VT_MNP, VT_OTHER, VT_REF, VT_SNP,
};

/// Top level of a sites file.
#[derive(Debug, Deserialize)]
pub struct SitesFile {
    #[serde(default)]
    pub samples: Vec<String>,
    #[serde(default)]
    pub info: Vec<FieldDecl>,
    #[serde(default)]
    pub format: Vec<FieldDecl>,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub records: Vec<RecordDecl>,
}

/// Declaration of one INFO or FORMAT field. `number` defaults to 1; a
/// negative number declares variable arity.
#[derive(Debug, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
    #[serde(default = "default_number")]
    pub number: i64,
}

fn default_number() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct RecordDecl {
    #[serde(default)]
    pub qual: Option<f32>,
    #[serde(default, rename = "type")]
    pub types: Vec<String>,
    #[serde(default)]
    pub info: HashMap<String, Value>,
    #[serde(default)]
    pub format: HashMap<String, Value>,
    #[serde(default)]
    pub filter: Vec<String>,
}

impl SitesFile {
    /// Build the schema and the record list. `PASS` is implicitly
    /// declared as a filter, as variant headers always define it.
    pub fn into_parts(self) -> Result<(Schema, Vec<Record>)> {
        let mut schema = Schema::new(self.samples);
        for decl in &self.info {
            schema.declare_info(&decl.name, decl.ty, arity_of(decl.number));
        }
        for decl in &self.format {
            if decl.ty == FieldType::Flag {
                bail!("FORMAT field '{}' cannot be a flag", decl.name);
            }
            schema.declare_format(&decl.name, decl.ty, arity_of(decl.number));
        }
        schema.declare_filter("PASS");
        for name in &self.filters {
            schema.declare_filter(name);
        }

        let mut records = Vec::with_capacity(self.records.len());
        for (index, decl) in self.records.into_iter().enumerate() {
            let record =
                convert_record(&schema, decl).with_context(|| format!("record {index}"))?;
            records.push(record);
        }
        Ok((schema, records))
    }
}

fn arity_of(number: i64) -> Arity {
    if number < 0 {
        Arity::Variable
    } else {
        Arity::Fixed(number as usize)
    }
}

fn type_bit(name: &str) -> Option<u32> {
    match name.to_ascii_lowercase().as_str() {
        "ref" => Some(VT_REF),
        "snp" => Some(VT_SNP),
        "mnp" => Some(VT_MNP),
        "indel" => Some(VT_INDEL),
        "other" => Some(VT_OTHER),
        _ => None,
    }
}

fn convert_record(schema: &Schema, decl: RecordDecl) -> Result<Record> {
    let mut record = Record::new();
    if let Some(qual) = decl.qual {
        record.set_qual(qual);
    }

    let mut types = 0u32;
    for name in &decl.types {
        types |= type_bit(name).ok_or_else(|| anyhow!("unknown variant type '{name}'"))?;
    }
    record.set_variant_types(types);

    for (name, value) in decl.info {
        let id = schema
            .field_id(&name)
            .ok_or_else(|| anyhow!("INFO field '{name}' is not declared"))?;
        let field = schema
            .info(id)
            .ok_or_else(|| anyhow!("'{name}' is not an INFO field"))?;
        record.set_info(id, convert_info(&name, field.ty, value)?);
    }

    for (name, value) in decl.format {
        let id = schema
            .field_id(&name)
            .ok_or_else(|| anyhow!("FORMAT field '{name}' is not declared"))?;
        let field = schema
            .format(id)
            .ok_or_else(|| anyhow!("'{name}' is not a FORMAT field"))?;
        record.set_format(
            id,
            convert_format(&name, field.ty, value, schema.n_samples())?,
        );
    }

    let mut filters = Vec::with_capacity(decl.filter.len());
    for name in &decl.filter {
        let id = schema
            .field_id(name)
            .filter(|&id| schema.is_filter(id))
            .ok_or_else(|| anyhow!("filter '{name}' is not declared"))?;
        filters.push(id);
    }
    record.set_filters(filters);
    Ok(record)
}

fn convert_info(name: &str, ty: FieldType, value: Value) -> Result<InfoValue> {
    match ty {
        FieldType::Flag => match value {
            Value::Bool(true) => Ok(InfoValue::Flag),
            other => bail!("flag '{name}' must be declared with true, got {other}"),
        },
        FieldType::Integer => Ok(InfoValue::Integer(int_values(name, value)?)),
        FieldType::Float => Ok(InfoValue::Float(float_values(name, value)?)),
        FieldType::String => match value {
            Value::String(text) => Ok(InfoValue::Text(text.into_bytes())),
            other => bail!("string field '{name}' must be a string, got {other}"),
        },
    }
}

fn convert_format(name: &str, ty: FieldType, value: Value, n_samples: usize) -> Result<FormatValue> {
    let Value::Array(items) = value else {
        bail!("FORMAT field '{name}' must be an array with one entry per sample");
    };
    if items.len() != n_samples {
        bail!(
            "FORMAT field '{name}' has {} entries for {} samples",
            items.len(),
            n_samples
        );
    }
    match ty {
        FieldType::Integer => Ok(FormatValue::Integer(int_values(
            name,
            Value::Array(items),
        )?)),
        FieldType::Float => Ok(FormatValue::Float(float_values(name, Value::Array(items))?)),
        FieldType::String => {
            let mut slots = Vec::with_capacity(items.len());
            for item in &items {
                match item {
                    Value::String(text) => slots.push(text.as_bytes().to_vec()),
                    Value::Null => slots.push(Vec::new()),
                    other => bail!("string field '{name}' entries must be strings, got {other}"),
                }
            }
            let width = slots.iter().map(Vec::len).max().unwrap_or(0).max(1);
            let mut bytes = vec![0u8; width * slots.len()];
            for (i, slot) in slots.iter().enumerate() {
                bytes[i * width..i * width + slot.len()].copy_from_slice(slot);
            }
            Ok(FormatValue::Text { width, bytes })
        }
        FieldType::Flag => bail!("FORMAT field '{name}' cannot be a flag"),
    }
}

fn int_values(name: &str, value: Value) -> Result<Vec<i32>> {
    let items = match value {
        Value::Array(items) => items,
        single => vec![single],
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Null => Ok(MISSING_INT),
            Value::Number(n) => n
                .as_i64()
                .map(|v| v as i32)
                .ok_or_else(|| anyhow!("integer field '{name}' holds a non-integer number")),
            other => bail!("integer field '{name}' holds {other}"),
        })
        .collect()
}

fn float_values(name: &str, value: Value) -> Result<Vec<f32>> {
    let items = match value {
        Value::Array(items) => items,
        single => vec![single],
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Null => Ok(missing_float()),
            Value::Number(n) => n
                .as_f64()
                .map(|v| v as f32)
                .ok_or_else(|| anyhow!("float field '{name}' holds a bad number")),
            other => bail!("float field '{name}' holds {other}"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "samples": ["S1", "S2"],
        "info": [
            {"name": "DP", "type": "integer"},
            {"name": "DP4", "type": "integer", "number": 4},
            {"name": "DB", "type": "flag", "number": 0}
        ],
        "format": [{"name": "GQ", "type": "integer"}],
        "filters": ["q10"],
        "records": [
            {"qual": 15.0, "type": ["snp"],
             "info": {"DP": 14, "DP4": [10, 10, 30, 30], "DB": true},
             "format": {"GQ": [15, null]},
             "filter": ["PASS"]}
        ]
    }"#;

    #[test]
    fn test_fixture_round_trip() {
        let sites: SitesFile = serde_json::from_str(FIXTURE).unwrap();
        let (schema, records) = sites.into_parts().unwrap();
        assert_eq!(schema.n_samples(), 2);
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(record.qual(), Some(15.0));
        assert_eq!(record.variant_types(), VT_SNP);

        let dp = schema.field_id("DP").unwrap();
        assert_eq!(record.info(dp), Some(&InfoValue::Integer(vec![14])));
        let db = schema.field_id("DB").unwrap();
        assert_eq!(record.info(db), Some(&InfoValue::Flag));

        let gq = schema.field_id("GQ").unwrap();
        assert_eq!(
            record.format(gq),
            Some(&FormatValue::Integer(vec![15, MISSING_INT]))
        );

        let pass = schema.field_id("PASS").unwrap();
        assert!(schema.is_filter(pass));
        assert_eq!(record.filters(), &[pass]);
    }

    #[test]
    fn test_format_entry_count_must_match_samples() {
        let bad = r#"{
            "samples": ["S1", "S2"],
            "format": [{"name": "GQ", "type": "integer"}],
            "records": [{"format": {"GQ": [1]}}]
        }"#;
        let sites: SitesFile = serde_json::from_str(bad).unwrap();
        assert!(sites.into_parts().is_err());
    }

    #[test]
    fn test_undeclared_fields_are_rejected() {
        let bad = r#"{"records": [{"info": {"XX": 1}}]}"#;
        let sites: SitesFile = serde_json::from_str(bad).unwrap();
        assert!(sites.into_parts().is_err());

        let bad = r#"{"records": [{"filter": ["nosuch"]}]}"#;
        let sites: SitesFile = serde_json::from_str(bad).unwrap();
        assert!(sites.into_parts().is_err());
    }

    #[test]
    fn test_string_format_packs_fixed_width() {
        let src = r#"{
            "samples": ["S1", "S2", "S3"],
            "format": [{"name": "TT", "type": "string"}],
            "records": [{"format": {"TT": ["ab", "cdef", null]}}]
        }"#;
        let sites: SitesFile = serde_json::from_str(src).unwrap();
        let (schema, records) = sites.into_parts().unwrap();
        let tt = schema.field_id("TT").unwrap();
        match records[0].format(tt) {
            Some(FormatValue::Text { width, bytes }) => {
                assert_eq!(*width, 4);
                assert_eq!(bytes.as_slice(), b"ab\0\0cdef\0\0\0\0");
            }
            other => panic!("unexpected format value: {other:?}"),
        }
    }
}
