//! Scalar values and dotted-path flattening
//!
//! Run configurations and info documents are nested JSON-like mappings. Both
//! the logger (writing) and the database builder (reading) address leaves by
//! dotted paths (`config.optimizer.lr`), so the flattening algorithm lives
//! here and is shared by both sides.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A scalar-like leaf value of a configuration or metric record.
///
/// Lists are permitted as configuration leaves (e.g. layer sizes) but only
/// support equality, not ordering, in query predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Absent or explicit null
    Null,
    /// Boolean flag
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating-point number
    Float(f64),
    /// String value
    Str(String),
    /// Homogeneous or mixed list of scalars
    List(Vec<Scalar>),
}

/// The kind of a [`Scalar`], used for schema typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    /// Null leaf
    Null,
    /// Boolean leaf
    Bool,
    /// Integer leaf
    Int,
    /// Float leaf
    Float,
    /// String leaf
    Str,
    /// List leaf
    List,
}

impl Scalar {
    /// The schema kind of this value.
    #[must_use]
    pub const fn kind(&self) -> ScalarKind {
        match self {
            Self::Null => ScalarKind::Null,
            Self::Bool(_) => ScalarKind::Bool,
            Self::Int(_) => ScalarKind::Int,
            Self::Float(_) => ScalarKind::Float,
            Self::Str(_) => ScalarKind::Str,
            Self::List(_) => ScalarKind::List,
        }
    }

    /// Numeric view of the value, if it is a number.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Compare two scalars for query evaluation.
    ///
    /// Numbers compare numerically regardless of integer/float kind. Strings
    /// and booleans compare within their own kind. Everything else (including
    /// comparisons across kinds) is unordered and yields `None`, which query
    /// evaluation treats as non-matching.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        if let (Self::Int(a), Self::Int(b)) = (self, other) {
            return Some(a.cmp(b));
        }
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return a.partial_cmp(&b);
        }
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Equality for query evaluation: numeric-aware, otherwise structural.
    #[must_use]
    pub fn loose_eq(&self, other: &Self) -> bool {
        self.compare(other) == Some(Ordering::Equal)
            || (self.compare(other).is_none() && self == other)
    }

    /// Convert a JSON leaf into a scalar.
    ///
    /// Objects are not leaves and must be flattened first; they map to `Null`
    /// only when empty.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null | serde_json::Value::Object(_) => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => n.as_i64().map_or_else(
                || Self::Float(n.as_f64().unwrap_or(f64::NAN)),
                Self::Int,
            ),
            serde_json::Value::String(s) => Self::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Self::List(items.iter().map(Self::from_json).collect())
            }
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Flatten a nested JSON document into dotted-path scalar leaves.
///
/// `{"optimizer": {"lr": 0.1}}` with prefix `config` yields
/// `{"config.optimizer.lr": 0.1}`. Arrays are leaves, not branches.
#[must_use]
pub fn flatten(doc: &serde_json::Value, prefix: &str) -> BTreeMap<String, Scalar> {
    let mut out = BTreeMap::new();
    flatten_into(doc, prefix, &mut out);
    out
}

fn flatten_into(doc: &serde_json::Value, prefix: &str, out: &mut BTreeMap<String, Scalar>) {
    match doc {
        serde_json::Value::Object(map) => {
            for (key, value) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(value, &path, out);
            }
        }
        leaf => {
            if !prefix.is_empty() {
                out.insert(prefix.to_string(), Scalar::from_json(leaf));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_nested() {
        let doc = json!({"optimizer": {"lr": 0.1, "name": "sgd"}, "seed": 3});
        let flat = flatten(&doc, "config");

        assert_eq!(flat["config.optimizer.lr"], Scalar::Float(0.1));
        assert_eq!(flat["config.optimizer.name"], Scalar::Str("sgd".into()));
        assert_eq!(flat["config.seed"], Scalar::Int(3));
    }

    #[test]
    fn test_flatten_array_is_leaf() {
        let doc = json!({"layers": [64, 32]});
        let flat = flatten(&doc, "config");

        assert_eq!(
            flat["config.layers"],
            Scalar::List(vec![Scalar::Int(64), Scalar::Int(32)])
        );
    }

    #[test]
    fn test_flatten_empty_prefix() {
        let doc = json!({"a": {"b": 1}});
        let flat = flatten(&doc, "");
        assert_eq!(flat["a.b"], Scalar::Int(1));
    }

    #[test]
    fn test_numeric_compare_across_kinds() {
        assert_eq!(
            Scalar::Int(1).compare(&Scalar::Float(1.0)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            Scalar::Float(0.5).compare(&Scalar::Int(1)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_mismatched_kinds_unordered() {
        assert!(Scalar::Str("a".into()).compare(&Scalar::Int(1)).is_none());
        assert!(Scalar::Bool(true).compare(&Scalar::Str("true".into())).is_none());
    }

    #[test]
    fn test_loose_eq_lists() {
        let a = Scalar::List(vec![Scalar::Int(1), Scalar::Int(2)]);
        let b = Scalar::List(vec![Scalar::Int(1), Scalar::Int(2)]);
        assert!(a.loose_eq(&b));
    }

    #[test]
    fn test_scalar_json_round_trip() {
        let values = vec![
            Scalar::Null,
            Scalar::Bool(true),
            Scalar::Int(-7),
            Scalar::Float(2.5),
            Scalar::Str("hello".into()),
            Scalar::List(vec![Scalar::Int(1), Scalar::Str("x".into())]),
        ];
        for value in values {
            let json = serde_json::to_string(&value).unwrap();
            let back: Scalar = serde_json::from_str(&json).unwrap();
            assert_eq!(value, back);
        }
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_doc() -> impl Strategy<Value = serde_json::Value> {
            let leaf = prop_oneof![
                any::<i64>().prop_map(|i| json!(i)),
                any::<bool>().prop_map(|b| json!(b)),
                "[a-z]{1,8}".prop_map(|s| json!(s)),
            ];
            leaf.prop_recursive(3, 32, 4, |inner| {
                prop::collection::btree_map("[a-z]{1,6}", inner, 1..4)
                    .prop_map(|m| serde_json::to_value(m).unwrap())
            })
        }

        proptest! {
            /// Every leaf of the document appears exactly once in the output.
            #[test]
            fn prop_flatten_preserves_leaf_count(doc in arb_doc()) {
                fn count_leaves(v: &serde_json::Value) -> usize {
                    match v {
                        serde_json::Value::Object(m) => m.values().map(count_leaves).sum(),
                        _ => 1,
                    }
                }
                let flat = flatten(&doc, "config");
                let expected = match &doc {
                    serde_json::Value::Object(_) => count_leaves(&doc),
                    _ => 1,
                };
                prop_assert_eq!(flat.len(), expected);
            }

            /// Dotted paths always carry the requested prefix.
            #[test]
            fn prop_flatten_paths_prefixed(doc in arb_doc()) {
                for key in flatten(&doc, "info").keys() {
                    prop_assert!(key == "info" || key.starts_with("info."));
                }
            }
        }
    }
}
