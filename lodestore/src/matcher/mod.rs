//! Compiles a query tree against a schema and context into a reusable
//! predicate over an element's raw properties.
//!
//! Compilation resolves every field's declared kind and coerces every
//! externally supplied value exactly once; evaluating the resulting
//! [`Match`] against an element never walks the query tree again. Unknown
//! fields (on the element or in the schema) make every positive operator
//! evaluate false silently. `NOT` is defined as the negation of `EQ` for
//! the same field and value, so a missing property makes `NOT` match.

use crate::codec::{self, PropKind};
use crate::element::Element;
use crate::error::Result;
use crate::query::Query;
use crate::schema::Schema;
use std::cmp::Ordering;
use std::sync::Arc;

/// Reserved field name resolving to the element's id, with text semantics,
/// regardless of the schema. Scope-limiting and index lookups rely on it.
pub const ID_FIELD: &str = "id";

/// Observer invoked after every leaf and branch evaluation with the node
/// kind, the element under evaluation, and the boolean outcome. Supports
/// explain tooling; it cannot affect the result.
pub type OnMatch = Arc<dyn Fn(&str, &Element, bool) + Send + Sync>;

type Pred = Box<dyn Fn(&Element) -> bool + Send + Sync>;
type BytesPred = Box<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// A compiled, stateless predicate. Build once per (query, schema, context)
/// triple, reuse across many elements.
pub struct Match {
    pred: Pred,
}

impl Match {
    pub fn matches(&self, element: &Element) -> bool {
        (self.pred)(element)
    }
}

/// Compile a query into a predicate for the given context. An unknown
/// context is a structural error; unknown fields are silent no-matches.
pub fn compile(
    query: &Query,
    schema: &Schema,
    context: &str,
    observer: Option<OnMatch>,
) -> Result<Match> {
    schema.context(context)?;
    Ok(Match {
        pred: build(query, schema, context, &observer),
    })
}

fn build(query: &Query, schema: &Schema, context: &str, observer: &Option<OnMatch>) -> Pred {
    let inner: Pred = match query {
        Query::All => Box::new(|_| true),
        Query::None => Box::new(|_| false),
        Query::And(children) => {
            let preds: Vec<Pred> = children
                .iter()
                .map(|c| build(c, schema, context, observer))
                .collect();
            Box::new(move |el| preds.iter().all(|p| p(el)))
        }
        Query::Or(children) => {
            let preds: Vec<Pred> = children
                .iter()
                .map(|c| build(c, schema, context, observer))
                .collect();
            Box::new(move |el| preds.iter().any(|p| p(el)))
        }
        Query::Not { field, value } => {
            let eq = positive_leaf(schema, context, field, |kind| {
                compare_pred(CmpOp::Eq, kind, value)
            });
            Box::new(move |el| !eq(el))
        }
        Query::Eq { field, value } => positive_leaf(schema, context, field, |kind| {
            compare_pred(CmpOp::Eq, kind, value)
        }),
        Query::Gt { field, value } => positive_leaf(schema, context, field, |kind| {
            compare_pred(CmpOp::Gt, kind, value)
        }),
        Query::Gte { field, value } => positive_leaf(schema, context, field, |kind| {
            compare_pred(CmpOp::Gte, kind, value)
        }),
        Query::Lt { field, value } => positive_leaf(schema, context, field, |kind| {
            compare_pred(CmpOp::Lt, kind, value)
        }),
        Query::Lte { field, value } => positive_leaf(schema, context, field, |kind| {
            compare_pred(CmpOp::Lte, kind, value)
        }),
        Query::Contains { field, value } => {
            positive_leaf(schema, context, field, |kind| contains_pred(kind, value))
        }
        Query::In { field, values } => positive_leaf(schema, context, field, |kind| {
            let members: Vec<BytesPred> = values
                .iter()
                .map(|v| compare_pred(CmpOp::Eq, kind, v))
                .collect();
            Box::new(move |bytes| members.iter().any(|m| m(bytes)))
        }),
    };

    match observer {
        Some(obs) => {
            let obs = obs.clone();
            let kind = query.kind();
            Box::new(move |el| {
                let result = inner(el);
                obs(kind, el, result);
                result
            })
        }
        None => inner,
    }
}

/// Build a leaf predicate: resolve the field's declared kind once, then
/// apply the byte-level predicate to the property's content. A field the
/// element lacks, or the schema never declared, evaluates false.
fn positive_leaf(
    schema: &Schema,
    context: &str,
    field: &str,
    mk: impl Fn(PropKind) -> BytesPred,
) -> Pred {
    if field == ID_FIELD {
        let pred = mk(PropKind::Text);
        return Box::new(move |el| pred(el.id().as_bytes()));
    }
    match schema.kind_of(context, field) {
        Some(kind) => {
            let pred = mk(kind);
            let field = field.to_string();
            Box::new(move |el| el.prop(&field).map(|bytes| pred(bytes)).unwrap_or(false))
        }
        None => Box::new(|_| false),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

fn ord_matches(op: CmpOp, ord: Ordering) -> bool {
    match op {
        CmpOp::Eq => ord == Ordering::Equal,
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::Gte => ord != Ordering::Less,
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::Lte => ord != Ordering::Greater,
    }
}

/// Comparison predicate for one operator and kind. The supplied value is
/// coerced here, once; an unparseable numeric value never matches.
fn compare_pred(op: CmpOp, kind: PropKind, value: &str) -> BytesPred {
    match kind {
        PropKind::Integer => {
            let want = value.trim().parse::<i64>().ok();
            Box::new(move |bytes| match (codec::decode_i64(bytes), want) {
                (Some(stored), Some(want)) => ord_matches(op, stored.cmp(&want)),
                _ => false,
            })
        }
        PropKind::Decimal => {
            let want = value.trim().parse::<f64>().ok();
            Box::new(move |bytes| match (codec::decode_f64(bytes), want) {
                (Some(stored), Some(want)) => stored
                    .partial_cmp(&want)
                    .map(|ord| ord_matches(op, ord))
                    .unwrap_or(false),
                _ => false,
            })
        }
        PropKind::Date => {
            let want = value.trim().parse::<i64>().ok();
            Box::new(move |bytes| match (codec::decode_ticks(bytes), want) {
                (Some(stored), Some(want)) => ord_matches(op, stored.cmp(&want)),
                _ => false,
            })
        }
        PropKind::Switch => {
            let want = match value.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            };
            Box::new(move |bytes| {
                let Some(want) = want else { return false };
                let stored = codec::decode_switch(bytes);
                // Boolean ordering treats true as greater. GT stays
                // always-false; LT/LTE are the strict complements of the
                // GTE/GT rules.
                match op {
                    CmpOp::Eq => stored == want,
                    CmpOp::Gte => stored || !want,
                    CmpOp::Lt => !stored && want,
                    CmpOp::Lte => !stored || want,
                    CmpOp::Gt => false,
                }
            })
        }
        PropKind::Text | PropKind::Options | PropKind::Complex => {
            let want = value.to_string();
            Box::new(move |bytes| {
                let stored = String::from_utf8_lossy(bytes);
                ord_matches(op, stored.as_ref().cmp(want.as_str()))
            })
        }
    }
}

/// Substring predicate over the kind's canonical text rendering. Dates have
/// no defined substring semantics and never match.
fn contains_pred(kind: PropKind, value: &str) -> BytesPred {
    if kind == PropKind::Date {
        return Box::new(|_| false);
    }
    let want = value.to_string();
    Box::new(move |bytes| codec::render(kind, bytes).contains(&want))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Prop;
    use std::sync::Mutex;

    fn bike_schema() -> Schema {
        Schema::parse_str(
            r#"
contexts:
  bike:
    attributes:
      Name: { type: text }
      MaxSpeed: { type: integer }
      Weight: { type: decimal }
      Bought: { type: date }
      Electric: { type: switch }
      Kind: { type: options, choices: [road, mountain] }
"#,
        )
        .unwrap()
    }

    fn viper() -> Element {
        Element::new(
            "1",
            vec![
                Prop::text("Name", "Viper"),
                Prop::integer("MaxSpeed", 120),
                Prop::decimal("Weight", 8.5),
                Prop::date("Bought", 638_000_000_000_000_000),
                Prop::switch("Electric", true),
                Prop::text("Kind", "road"),
            ],
        )
    }

    fn taurus() -> Element {
        Element::new(
            "2",
            vec![
                Prop::text("Name", "Taurus"),
                Prop::integer("MaxSpeed", 95),
                Prop::decimal("Weight", 11.25),
                Prop::switch("Electric", false),
                Prop::text("Kind", "mountain"),
            ],
        )
    }

    fn matches(query: Query, element: &Element) -> bool {
        compile(&query, &bike_schema(), "bike", None)
            .unwrap()
            .matches(element)
    }

    #[test]
    fn all_and_none() {
        assert!(matches(Query::All, &viper()));
        assert!(!matches(Query::None, &viper()));
    }

    #[test]
    fn unknown_context_is_structural() {
        let err = compile(&Query::All, &bike_schema(), "car", None);
        assert!(err.is_err());
    }

    #[test]
    fn bike_scenario_from_text_rendering() {
        // "120" contains "2"; "95" does not.
        assert!(matches(Query::contains("MaxSpeed", "2"), &viper()));
        assert!(!matches(Query::contains("MaxSpeed", "2"), &taurus()));

        assert!(matches(Query::gte("MaxSpeed", "100"), &viper()));
        assert!(!matches(Query::gte("MaxSpeed", "100"), &taurus()));
    }

    #[test]
    fn integer_ordering_and_equality() {
        assert!(matches(Query::eq("MaxSpeed", "120"), &viper()));
        assert!(!matches(Query::eq("MaxSpeed", "121"), &viper()));
        assert!(matches(Query::gt("MaxSpeed", "119"), &viper()));
        assert!(matches(Query::lt("MaxSpeed", "121"), &viper()));
        assert!(matches(Query::lte("MaxSpeed", "120"), &viper()));
        assert!(!matches(Query::lt("MaxSpeed", "120"), &viper()));
    }

    #[test]
    fn unparseable_numeric_value_never_matches() {
        assert!(!matches(Query::eq("MaxSpeed", "fast"), &viper()));
        assert!(!matches(Query::gt("MaxSpeed", "fast"), &viper()));
        // But NOT of an unparseable EQ matches, by negation.
        assert!(matches(Query::not("MaxSpeed", "fast"), &viper()));
    }

    #[test]
    fn decimal_semantics() {
        assert!(matches(Query::eq("Weight", "8.5"), &viper()));
        assert!(matches(Query::gt("Weight", "8"), &viper()));
        assert!(matches(Query::lt("Weight", "10"), &viper()));
        // "8.5" rendering contains ".5"
        assert!(matches(Query::contains("Weight", ".5"), &viper()));
    }

    #[test]
    fn decimal_accepts_integer_typed_bytes() {
        let legacy = Element::new("3", vec![Prop::integer("Weight", 9)]);
        assert!(matches(Query::eq("Weight", "9"), &legacy));
        assert!(matches(Query::gt("Weight", "8.5"), &legacy));
    }

    #[test]
    fn date_tick_semantics() {
        let q = Query::eq("Bought", "638000000000000000");
        assert!(matches(q, &viper()));
        assert!(matches(Query::gt("Bought", "637000000000000000"), &viper()));
        // Substring match is not defined for dates.
        assert!(!matches(Query::contains("Bought", "638"), &viper()));
        // Missing prop on taurus.
        assert!(!matches(Query::eq("Bought", "638000000000000000"), &taurus()));
    }

    #[test]
    fn switch_semantics() {
        assert!(matches(Query::eq("Electric", "true"), &viper()));
        assert!(matches(Query::eq("Electric", "false"), &taurus()));

        // true >= anything; false >= only false.
        assert!(matches(Query::gte("Electric", "true"), &viper()));
        assert!(matches(Query::gte("Electric", "false"), &viper()));
        assert!(!matches(Query::gte("Electric", "true"), &taurus()));
        assert!(matches(Query::gte("Electric", "false"), &taurus()));

        // LT is the strict complement of GTE: only false < true.
        assert!(matches(Query::lt("Electric", "true"), &taurus()));
        assert!(!matches(Query::lt("Electric", "false"), &taurus()));
        assert!(!matches(Query::lt("Electric", "true"), &viper()));

        // GT keeps the reference behavior: never meaningful, never true.
        assert!(!matches(Query::gt("Electric", "false"), &viper()));
        assert!(!matches(Query::gt("Electric", "true"), &viper()));

        // Boolean text rendering substring.
        assert!(matches(Query::contains("Electric", "ru"), &viper()));
        assert!(matches(Query::contains("Electric", "als"), &taurus()));
    }

    #[test]
    fn text_semantics() {
        assert!(matches(Query::eq("Name", "Viper"), &viper()));
        assert!(!matches(Query::eq("Name", "viper"), &viper()));
        assert!(matches(Query::contains("Name", "ipe"), &viper()));
        assert!(matches(Query::gt("Name", "Taurus"), &viper()));
        assert!(matches(Query::lt("Name", "Zebra"), &viper()));
    }

    #[test]
    fn eq_and_not_are_asymmetric_on_missing_props() {
        // Taurus has no Bought prop: EQ is false, NOT is true.
        let field_value = ("Bought", "638000000000000000");
        assert!(!matches(Query::eq(field_value.0, field_value.1), &taurus()));
        assert!(matches(Query::not(field_value.0, field_value.1), &taurus()));

        // Unknown in the schema entirely: same asymmetry.
        assert!(!matches(Query::eq("Unknown", "x"), &viper()));
        assert!(matches(Query::not("Unknown", "x"), &viper()));
    }

    #[test]
    fn in_matches_iff_some_eq_matches() {
        let values = vec!["95".to_string(), "120".to_string()];
        assert!(matches(Query::is_in("MaxSpeed", values.clone()), &viper()));
        assert!(matches(Query::is_in("MaxSpeed", values), &taurus()));
        assert!(!matches(
            Query::is_in("MaxSpeed", vec!["96".into(), "121".into()]),
            &viper()
        ));
        assert!(matches(
            Query::is_in("Kind", vec!["road".into(), "gravel".into()]),
            &viper()
        ));
    }

    #[test]
    fn id_field_resolves_to_element_id() {
        assert!(matches(Query::eq("id", "1"), &viper()));
        assert!(!matches(Query::eq("id", "2"), &viper()));
        assert!(matches(
            Query::is_in("id", vec!["1".into(), "2".into()]),
            &taurus()
        ));
    }

    #[test]
    fn and_or_associativity() {
        let a = Query::gt("MaxSpeed", "90");
        let b = Query::eq("Kind", "road");
        let c = Query::contains("Name", "V");

        let nested = a.clone().and(b.clone().and(c.clone()));
        let flat = Query::all_of(vec![a.clone(), b.clone(), c.clone()]).unwrap();

        for el in [viper(), taurus()] {
            assert_eq!(matches(nested.clone(), &el), matches(flat.clone(), &el));
        }

        let nested_or = a.clone().or(b.clone().or(c.clone()));
        let flat_or = Query::any_of(vec![a, b, c]).unwrap();
        for el in [viper(), taurus()] {
            assert_eq!(matches(nested_or.clone(), &el), matches(flat_or.clone(), &el));
        }
    }

    #[test]
    fn match_is_reusable_across_elements() {
        let compiled = compile(&Query::gte("MaxSpeed", "100"), &bike_schema(), "bike", None).unwrap();
        assert!(compiled.matches(&viper()));
        assert!(!compiled.matches(&taurus()));
        assert!(compiled.matches(&viper()));
    }

    #[test]
    fn observer_sees_evaluations_without_changing_results() {
        let seen: Arc<Mutex<Vec<(String, bool)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: OnMatch = Arc::new(move |kind, _el, result| {
            sink.lock().unwrap().push((kind.to_string(), result));
        });

        let query = Query::eq("Kind", "road").and(Query::gte("MaxSpeed", "100"));
        let compiled = compile(&query, &bike_schema(), "bike", Some(observer)).unwrap();

        assert!(compiled.matches(&viper()));
        let events = seen.lock().unwrap().clone();
        assert!(events.contains(&("EQ".to_string(), true)));
        assert!(events.contains(&("GTE".to_string(), true)));
        assert!(events.contains(&("AND".to_string(), true)));
    }
}
