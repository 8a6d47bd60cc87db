//! Property-based tests for query parsing and scalar semantics

use std::collections::BTreeMap;

use bitacora::value::Scalar;
use bitacora::Query;
use proptest::prelude::*;

proptest! {
    /// Arbitrary input never panics the parser; it parses or errors.
    #[test]
    fn prop_parser_never_panics(input in ".{0,64}") {
        let _ = Query::parse(&input);
    }

    /// An equality query matches a row holding exactly that value.
    #[test]
    fn prop_equality_matches_own_value(value in -1_000_000i64..1_000_000) {
        let query = Query::parse(&format!("config.x == {value}")).unwrap();
        let row = BTreeMap::from([("config.x".to_string(), Scalar::Int(value))]);
        prop_assert!(query.matches(&row));

        let other = BTreeMap::from([("config.x".to_string(), Scalar::Int(value + 1))]);
        prop_assert!(!query.matches(&other));
    }

    /// Integer comparison agrees with `i64::cmp` exactly, even where an f64
    /// round trip would lose precision.
    #[test]
    fn prop_int_compare_is_exact(a in any::<i64>(), b in any::<i64>()) {
        prop_assert_eq!(Scalar::Int(a).compare(&Scalar::Int(b)), Some(a.cmp(&b)));
    }

    /// On rows that carry the field, a predicate and its negation partition.
    #[test]
    fn prop_negation_partitions(value in any::<i32>(), threshold in any::<i32>()) {
        let positive = Query::parse(&format!("config.x < {threshold}")).unwrap();
        let negative = Query::parse(&format!("~(config.x < {threshold})")).unwrap();
        let row = BTreeMap::from([("config.x".to_string(), Scalar::Int(i64::from(value)))]);
        prop_assert_ne!(positive.matches(&row), negative.matches(&row));
    }

    /// Membership agrees with pointwise equality.
    #[test]
    fn prop_membership_matches_pointwise(needle in 0i64..10, items in proptest::collection::vec(0i64..10, 0..6)) {
        let list = items
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let query = Query::parse(&format!("config.x in [{list}]")).unwrap();
        let row = BTreeMap::from([("config.x".to_string(), Scalar::Int(needle))]);
        prop_assert_eq!(query.matches(&row), items.contains(&needle));
    }

    /// Numeric equality ignores the integer/float distinction.
    #[test]
    fn prop_int_float_equality(value in -1_000_000i64..1_000_000) {
        #[allow(clippy::cast_precision_loss)]
        let as_float = Scalar::Float(value as f64);
        prop_assert!(Scalar::Int(value).loose_eq(&as_float));
    }
}
