//! Equality match with numeric widening and case-insensitive strings (§4.1),
//! plus the `intersect` primitive the index planner builds on.

use crate::core::types::{Document, Value};
use roaring::RoaringTreemap;
use std::collections::HashMap;

pub type Filter = HashMap<String, Value>;

/// Compares two values under the match rules: null equals only null, strings
/// compare case-insensitively, any pair of numeric variants widens to f64,
/// everything else falls back to structural equality.
pub fn values_match(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(x), Value::String(y)) => case_fold_eq(x, y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
    }
}

fn case_fold_eq(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// A document matches a filter iff every filter field is present in the
/// document and equal to the expected value under [`values_match`].
pub fn matches(doc: &Document, filter: &Filter) -> bool {
    filter.iter().all(|(field, expected)| {
        doc.get(field)
            .map(|actual| values_match(actual, expected))
            .unwrap_or(false)
    })
}

/// Intersects a set of id bitmaps (64-bit, since document ids are `u64`).
/// Returns an empty bitmap for an empty input, matching "no constraint"
/// rather than "match everything" — callers that need the latter should
/// special-case a missing index list instead of calling `intersect` with
/// zero operands.
pub fn intersect(sets: &[RoaringTreemap]) -> RoaringTreemap {
    let mut iter = sets.iter();
    let Some(first) = iter.next() else {
        return RoaringTreemap::new();
    };
    let mut result = first.clone();
    for set in iter {
        result &= set;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_equals_only_null() {
        assert!(values_match(&Value::Null, &Value::Null));
        assert!(!values_match(&Value::Null, &Value::Bool(false)));
        assert!(!values_match(&Value::Int(0), &Value::Null));
    }

    #[test]
    fn strings_compare_case_insensitively() {
        assert!(values_match(
            &Value::String("NY".into()),
            &Value::String("ny".into())
        ));
        assert!(!values_match(
            &Value::String("NY".into()),
            &Value::String("Boston".into())
        ));
    }

    #[test]
    fn numeric_widening_compares_int_and_float() {
        assert!(values_match(&Value::Int(25), &Value::Float(25.0)));
        assert!(!values_match(&Value::Int(25), &Value::Float(25.1)));
    }

    #[test]
    fn structural_equality_for_arrays_and_documents() {
        let a = Value::Array(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::Array(vec![Value::Int(1), Value::Int(2)]);
        let c = Value::Array(vec![Value::Int(2), Value::Int(1)]);
        assert!(values_match(&a, &b));
        assert!(!values_match(&a, &c));
    }

    #[test]
    fn matches_requires_every_filter_field_present_and_equal() {
        let mut doc = Document::new();
        doc.insert("age".into(), Value::Int(25));
        doc.insert("city".into(), Value::String("NY".into()));

        let mut filter = Filter::new();
        filter.insert("age".into(), Value::Int(25));
        filter.insert("city".into(), Value::String("ny".into()));
        assert!(matches(&doc, &filter));

        filter.insert("country".into(), Value::String("US".into()));
        assert!(!matches(&doc, &filter));
    }

    #[test]
    fn intersect_combines_multiple_bitmaps() {
        let mut a = RoaringTreemap::new();
        a.insert(1);
        a.insert(2);
        a.insert(3);
        let mut b = RoaringTreemap::new();
        b.insert(2);
        b.insert(3);
        b.insert(4);
        let result = intersect(&[a, b]);
        assert_eq!(result.iter().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn intersect_of_empty_slice_is_empty() {
        assert!(intersect(&[]).is_empty());
    }
}
