//! Field constraints - output の値に対する述語
//!
//! 宣言的な variant は TOML からそのまま読み込めます。
//! コードから登録する場合は `Constraint::custom` で任意のクロージャを使えます。

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A predicate over one output field.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    /// Not null, not an empty/blank string, not an empty array or object.
    NonEmpty,
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    OneOf { values: Vec<Value> },
    Range {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    MinItems { min: usize },
    /// Counted in chars.
    MaxLength { max: usize },
    AllOf { of: Vec<Constraint> },
    #[serde(skip)]
    Custom(CustomPredicate),
}

/// Named closure predicate; the name is what shows up in violation messages.
#[derive(Clone)]
pub struct CustomPredicate {
    name: String,
    check: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
}

impl Constraint {
    pub fn custom<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Constraint::Custom(CustomPredicate {
            name: name.into(),
            check: Arc::new(check),
        })
    }

    pub fn check(&self, value: &Value) -> bool {
        match self {
            Constraint::NonEmpty => match value {
                Value::Null => false,
                Value::String(s) => !s.trim().is_empty(),
                Value::Array(a) => !a.is_empty(),
                Value::Object(o) => !o.is_empty(),
                Value::Bool(_) | Value::Number(_) => true,
            },
            Constraint::String => value.is_string(),
            Constraint::Number => value.is_number(),
            Constraint::Integer => value.is_i64() || value.is_u64(),
            Constraint::Boolean => value.is_boolean(),
            Constraint::Array => value.is_array(),
            Constraint::Object => value.is_object(),
            Constraint::OneOf { values } => values.contains(value),
            Constraint::Range { min, max } => value.as_f64().is_some_and(|x| {
                min.is_none_or(|lo| x >= lo) && max.is_none_or(|hi| x <= hi)
            }),
            Constraint::MinItems { min } => value.as_array().is_some_and(|a| a.len() >= *min),
            Constraint::MaxLength { max } => {
                value.as_str().is_some_and(|s| s.chars().count() <= *max)
            }
            Constraint::AllOf { of } => of.iter().all(|c| c.check(value)),
            Constraint::Custom(p) => (p.check)(value),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::NonEmpty => f.write_str("non_empty"),
            Constraint::String => f.write_str("string"),
            Constraint::Number => f.write_str("number"),
            Constraint::Integer => f.write_str("integer"),
            Constraint::Boolean => f.write_str("boolean"),
            Constraint::Array => f.write_str("array"),
            Constraint::Object => f.write_str("object"),
            Constraint::OneOf { values } => {
                let list: Vec<String> = values.iter().map(Value::to_string).collect();
                write!(f, "one_of [{}]", list.join(", "))
            }
            Constraint::Range { min, max } => match (min, max) {
                (Some(lo), Some(hi)) => write!(f, "range {lo}..={hi}"),
                (Some(lo), None) => write!(f, "range >= {lo}"),
                (None, Some(hi)) => write!(f, "range <= {hi}"),
                (None, None) => f.write_str("range (any number)"),
            },
            Constraint::MinItems { min } => write!(f, "min_items {min}"),
            Constraint::MaxLength { max } => write!(f, "max_length {max}"),
            Constraint::AllOf { of } => {
                let list: Vec<String> = of.iter().map(ToString::to_string).collect();
                write!(f, "all_of [{}]", list.join(", "))
            }
            Constraint::Custom(p) => write!(f, "custom '{}'", p.name),
        }
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Constraint({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::blank_string(Constraint::NonEmpty, json!("  "), false)]
    #[case::text(Constraint::NonEmpty, json!("x"), true)]
    #[case::empty_array(Constraint::NonEmpty, json!([]), false)]
    #[case::null(Constraint::NonEmpty, json!(null), false)]
    #[case::zero_is_present(Constraint::NonEmpty, json!(0), true)]
    #[case::integer(Constraint::Integer, json!(4), true)]
    #[case::float_is_not_integer(Constraint::Integer, json!(4.5), false)]
    #[case::in_range(Constraint::Range { min: Some(0.0), max: Some(10.0) }, json!(4), true)]
    #[case::above_range(Constraint::Range { min: Some(0.0), max: Some(10.0) }, json!(11), false)]
    #[case::range_needs_number(Constraint::Range { min: None, max: None }, json!("4"), false)]
    #[case::min_items(Constraint::MinItems { min: 1 }, json!(["extract method"]), true)]
    #[case::too_few_items(Constraint::MinItems { min: 2 }, json!(["a"]), false)]
    #[case::max_length(Constraint::MaxLength { max: 3 }, json!("abcd"), false)]
    #[case::one_of(Constraint::OneOf { values: vec![json!("low"), json!("high")] }, json!("low"), true)]
    #[case::not_one_of(Constraint::OneOf { values: vec![json!("low")] }, json!("mid"), false)]
    fn constraint_checks(#[case] c: Constraint, #[case] value: Value, #[case] expected: bool) {
        assert_eq!(c.check(&value), expected, "{c} on {value}");
    }

    #[test]
    fn all_of_requires_every_member() {
        let c = Constraint::AllOf {
            of: vec![Constraint::Array, Constraint::MinItems { min: 1 }],
        };
        assert!(c.check(&json!([1])));
        assert!(!c.check(&json!([])));
        assert!(!c.check(&json!({"a": 1})));
    }

    #[test]
    fn custom_predicate_runs_closure() {
        let c = Constraint::custom("even", |v| v.as_i64().is_some_and(|n| n % 2 == 0));
        assert!(c.check(&json!(4)));
        assert!(!c.check(&json!(3)));
        assert_eq!(c.to_string(), "custom 'even'");
    }

    #[test]
    fn deserializes_from_toml_inline_tables() {
        #[derive(Deserialize)]
        struct Holder {
            c: Vec<Constraint>,
        }

        let parsed: Holder = toml::from_str(
            r#"
            c = [
                { kind = "non_empty" },
                { kind = "range", min = 1.0 },
                { kind = "one_of", values = ["low", "high"] },
            ]
            "#,
        )
        .unwrap();

        assert!(!parsed.c[0].check(&json!("")));
        assert!(parsed.c[1].check(&json!(2)));
        assert!(!parsed.c[1].check(&json!(0)));
        assert!(parsed.c[2].check(&json!("high")));
    }
}
