//! End-to-end tests of the expression engine over sites-file fixtures.

use vcf_filter::models::input::SitesFile;
use vcf_filter::models::{Record, Schema};
use vcf_filter::Filter;

fn load(json: &str) -> (Schema, Vec<Record>) {
    let sites: SitesFile = serde_json::from_str(json).expect("fixture parses");
    sites.into_parts().expect("fixture converts")
}

/// Three samples, the usual depth/quality fields, one q10 filter tag.
const SITES: &str = r#"{
    "samples": ["S1", "S2", "S3"],
    "info": [
        {"name": "DP", "type": "integer"},
        {"name": "DP4", "type": "integer", "number": 4},
        {"name": "DB", "type": "flag", "number": 0},
        {"name": "GENE", "type": "string"}
    ],
    "format": [
        {"name": "DP", "type": "integer"},
        {"name": "DV", "type": "integer"},
        {"name": "GQ", "type": "integer"}
    ],
    "filters": ["q10"],
    "records": [
        {"qual": 15.0, "type": ["snp"],
         "info": {"DP": 14, "DP4": [10, 10, 30, 30], "DB": true, "GENE": "BRCA2"},
         "format": {"DP": [8, 12, null], "DV": [6, 6, 6], "GQ": [15, 8, 20]},
         "filter": ["PASS"]},
        {"type": ["indel"],
         "info": {"DP": 3},
         "format": {"DP": [11, 11, 9], "DV": [2, null, 1], "GQ": [null, null, null]},
         "filter": ["q10"]},
        {"qual": 42.0, "type": ["snp", "mnp"],
         "format": {"DP": [null, null, null], "DV": [9, 9, 9], "GQ": [50, 50, 50]},
         "filter": []}
    ]
}"#;

fn eval(expression: &str, record_index: usize) -> bool {
    let (schema, records) = load(SITES);
    let mut filter = Filter::new(&schema, expression).expect("expression compiles");
    filter.evaluate(&records[record_index]).expect("evaluates")
}

fn eval_samples(expression: &str, record_index: usize) -> (bool, Option<Vec<u8>>) {
    let (schema, records) = load(SITES);
    let mut filter = Filter::new(&schema, expression).expect("expression compiles");
    let (site, mask) = filter
        .evaluate_samples(&records[record_index])
        .expect("evaluates");
    (site, mask.map(|m| m.to_vec()))
}

#[test]
fn test_qual_threshold() {
    assert!(eval("%QUAL>10", 0), "qual 15 is above 10");
    assert!(!eval("%QUAL>20", 0));
}

#[test]
fn test_missing_qual_fails_site() {
    assert!(!eval("%QUAL>10", 1), "missing qual can never pass");
    assert!(!eval("%QUAL<=10", 1), "not even against <=");
}

#[test]
fn test_variant_type_literal() {
    assert!(eval("%TYPE=\"snp\"", 0));
    assert!(!eval("%TYPE=\"snp\"", 1), "indel record is not a snp");
    assert!(eval("%TYPE=\"indel\"", 1));
    assert!(eval("%TYPE!=\"snp\"", 1));
    // the bitmask must match exactly; a snp+mnp record is neither alone
    assert!(!eval("%TYPE=\"snp\"", 2));
}

#[test]
fn test_filter_tag_matching() {
    assert!(eval("%FILTER=\"PASS\"", 0));
    assert!(!eval("%FILTER=\"q10\"", 0));
    assert!(eval("%FILTER=\"q10\"", 1));
    assert!(eval("%FILTER!=\"PASS\"", 1));
    // "." means an empty filter list
    assert!(eval("%FILTER=\".\"", 2));
    assert!(!eval("%FILTER=\".\"", 0));
    assert!(eval("%FILTER!=\".\"", 0));
    assert!(!eval("%FILTER!=\".\"", 2));
}

#[test]
fn test_per_sample_mask() {
    let (site, mask) = eval_samples("FMT/DP>10", 0);
    assert!(site, "one passing sample passes the site");
    assert_eq!(mask.as_deref(), Some([0, 1, 0].as_ref()));
}

#[test]
fn test_site_only_expression_has_no_mask() {
    let (site, mask) = eval_samples("%QUAL>10", 0);
    assert!(site);
    assert!(mask.is_none(), "no FORMAT field, no mask");
}

#[test]
fn test_site_result_broadcasts_into_mask() {
    // %MIN collapses the vector to a site scalar; the mask is then the
    // site bit broadcast across all samples
    let (site, mask) = eval_samples("%MIN(DV)>5", 0);
    assert!(site);
    assert_eq!(mask.as_deref(), Some([1, 1, 1].as_ref()));

    let (site, mask) = eval_samples("%MIN(DV)>9", 0);
    assert!(!site);
    assert_eq!(mask.as_deref(), Some([0, 0, 0].as_ref()));
}

#[test]
fn test_min_over_samples() {
    // min(DV)=6>5 holds but min(DP)=8>10 does not
    assert!(eval("%MIN(DV)>5", 0));
    assert!(!eval("%MIN(DP)>10", 0));
    assert!(!eval("%MIN(DV)>5 & %MIN(DP)>10", 0));
    assert!(eval("%MIN(DP)>7", 0), "missing sample entries are skipped");
}

#[test]
fn test_subscript_arithmetic() {
    assert!(eval("(DP4[0]+DP4[1])/(DP4[2]+DP4[3]) > 0.3", 0));
    assert!(!eval("(DP4[0]+DP4[1])/(DP4[2]+DP4[3]) > 0.4", 0));
}

#[test]
fn test_or_flavors_and_masks() {
    // qual fails, GQ passes for sample 0 only; `|` keeps the vector mask
    let (site, mask) = eval_samples("%QUAL>100 | FMT/GQ>10", 0);
    assert!(site);
    assert_eq!(mask.as_deref(), Some([1, 0, 1].as_ref()));

    // qual passes; `||` broadcasts the site bit into every slot
    let (site, mask) = eval_samples("%QUAL>10 || FMT/GQ>10", 0);
    assert!(site);
    assert_eq!(mask.as_deref(), Some([1, 1, 1].as_ref()));

    // with `|` the vector mask survives even when the site bit is set
    let (site, mask) = eval_samples("%QUAL>10 | FMT/GQ>10", 0);
    assert!(site);
    assert_eq!(mask.as_deref(), Some([1, 0, 1].as_ref()));
}

#[test]
fn test_and_gates_mask_by_site() {
    let (site, mask) = eval_samples("%QUAL>10 && FMT/GQ>10", 0);
    assert!(site);
    assert_eq!(mask.as_deref(), Some([1, 0, 1].as_ref()));

    let (site, mask) = eval_samples("%QUAL>100 && FMT/GQ>10", 0);
    assert!(!site);
    assert_eq!(mask.as_deref(), Some([0, 0, 0].as_ref()));
}

#[test]
fn test_missing_vector_in_logical_or() {
    // record 1: GQ is missing for every sample, DP is present
    let (site, mask) = eval_samples("FMT/GQ>5 | FMT/DP>10", 1);
    assert!(site);
    assert_eq!(mask.as_deref(), Some([1, 1, 0].as_ref()));

    let (site, _) = eval_samples("FMT/GQ>5 & FMT/DP>10", 1);
    assert!(!site, "missing side poisons a conjunction");
}

#[test]
fn test_info_flag_and_string() {
    assert!(eval("DB=1", 0));
    assert!(eval("DB=0", 1), "flag absent reads as 0");
    assert!(eval("GENE==\"BRCA2\"", 0));
    assert!(!eval("GENE==\"BRCA1\"", 0));
    assert!(eval("GENE!=\"BRCA1\"", 0));
    assert!(!eval("GENE==\"BRCA2\"", 1), "missing string fails the site");
}

#[test]
fn test_missing_info_propagates() {
    assert!(!eval("DP>1", 2), "absent INFO/DP fails");
    assert!(!eval("DP+1>0", 2), "arithmetic over missing stays missing");
    assert!(!eval("DP4[0]>0", 1), "absent array fails");
}

#[test]
fn test_unprefixed_name_is_info_outside_functions() {
    // INFO/DP on record 1 is 3; FMT/DP would pass for two samples
    assert!(!eval("DP>10", 1));
    assert!(eval("FMT/DP>10", 1));
}

#[test]
fn test_idempotent_evaluation() {
    let (schema, records) = load(SITES);
    let mut filter = Filter::new(&schema, "%QUAL>10 | FMT/GQ>10").expect("compiles");
    let (first_site, first_mask) = {
        let (s, m) = filter.evaluate_samples(&records[0]).expect("evaluates");
        (s, m.map(|m| m.to_vec()))
    };
    for _ in 0..3 {
        let (site, mask) = filter.evaluate_samples(&records[0]).expect("evaluates");
        assert_eq!(site, first_site);
        assert_eq!(mask.map(|m| m.to_vec()), first_mask);
    }
}

#[test]
fn test_streaming_reuses_one_filter() {
    let (schema, records) = load(SITES);
    let mut filter = Filter::new(&schema, "FMT/DP>10").expect("compiles");
    let sites: Vec<bool> = records
        .iter()
        .map(|r| filter.evaluate(r).expect("evaluates"))
        .collect();
    assert_eq!(sites, vec![true, true, false]);
}

#[test]
fn test_no_short_circuit_division_by_zero() {
    // the right operand is dead under short-circuit but must still
    // evaluate; infinity compares normally
    assert!(eval("%QUAL>100 | 1/0 > 0", 0));
    assert!(!eval("%QUAL>100 | 0/0 > 0", 0), "NaN comparisons fail");
    assert!(eval("%QUAL>10 & 1/0 > 1e30", 0));
}

#[test]
fn test_broadcast_commutativity() {
    // symmetric operators give the same result with operands swapped
    assert_eq!(eval("DP+1>14", 0), eval("1+DP>14", 0));
    assert_eq!(eval("DP*2==28", 0), eval("2*DP==28", 0));
    let (site_a, mask_a) = eval_samples("FMT/DP+1>12", 0);
    let (site_b, mask_b) = eval_samples("1+FMT/DP>12", 0);
    assert_eq!(site_a, site_b);
    assert_eq!(mask_a, mask_b);
}

#[test]
fn test_and_identity_preserves_mask() {
    let (site_x, mask_x) = eval_samples("FMT/GQ>10", 0);
    let (site_id, mask_id) = eval_samples("FMT/GQ>10 && 1==1", 0);
    assert_eq!(site_x, site_id);
    assert_eq!(mask_x, mask_id);
}

#[test]
fn test_unary_minus() {
    assert!(eval("-DP<0", 0));
    assert!(eval("DP>-1", 0));
    assert!(eval("0-DP==-14", 0));
}

#[test]
fn test_scientific_notation_thresholds() {
    assert!(eval("%QUAL>1e1", 0));
    assert!(eval("%QUAL<1.5e3", 0));
    assert!(!eval("%QUAL>1.5e1", 0));
}

#[test]
fn test_compile_errors_name_the_expression() {
    let (schema, _) = load(SITES);
    let err = Filter::new(&schema, "NOSUCH>10").unwrap_err();
    assert!(err.to_string().contains("NOSUCH"));
    let err = Filter::new(&schema, "%FILTER=\"PASS").unwrap_err();
    assert!(err.to_string().contains("%FILTER"));
    assert!(Filter::new(&schema, "DP4>1").is_err());
    assert!(Filter::new(&schema, "(DP>1").is_err());
}

#[test]
fn test_string_numeric_mix_is_fatal() {
    let (schema, records) = load(SITES);
    let mut filter = Filter::new(&schema, "GENE==1").expect("compiles");
    assert!(filter.evaluate(&records[0]).is_err());
    // but a missing string operand never reaches the comparison
    assert!(!filter.evaluate(&records[1]).expect("missing short-circuits to fail"));
}
