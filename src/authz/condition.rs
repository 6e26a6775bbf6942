//! ABAC condition parsing and evaluation.
//!
//! A condition is a JSON object mapping attribute paths to operator objects:
//!
//! ```json
//! {
//!     "resource.owner_id": { "==": "{{user.id}}" },
//!     "user.level": { ">=": 3, "<": 10 }
//! }
//! ```
//!
//! Every path entry and every operator under it must hold (implicit AND).
//! A path that cannot be resolved against the context fails the condition.
//! Expected values that are strings may embed `{{path}}` templates, which are
//! substituted from the context before comparison; templates that do not
//! resolve stay in the string verbatim.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveTime;
use regex::Regex;
use serde_json::Value;

use crate::authz::errors::AuthzError;
use crate::authz::value::{AttrPath, AttrValue, Attributes};

// ─── Operators ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    NotIn,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Matches,
}

impl Operator {
    pub const ALL: [Operator; 13] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Ge,
        Operator::Lt,
        Operator::Le,
        Operator::In,
        Operator::NotIn,
        Operator::Contains,
        Operator::NotContains,
        Operator::StartsWith,
        Operator::EndsWith,
        Operator::Matches,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::StartsWith => "startswith",
            Operator::EndsWith => "endswith",
            Operator::Matches => "matches",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operator::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| {
                let supported: Vec<&str> = Operator::ALL.iter().map(|op| op.as_str()).collect();
                AuthzError::PolicyEvaluation(format!(
                    "unknown operator `{s}` (supported: {})",
                    supported.join(", ")
                ))
            })
    }
}

// ─── Parsed form ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub op: Operator,
    pub expected: AttrValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub path: AttrPath,
    pub checks: Vec<Check>,
}

/// A parsed condition expression: clauses AND-ed together.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Condition {
    pub clauses: Vec<Clause>,
}

impl Condition {
    /// Parse the serialized condition stored on a permission.
    ///
    /// `null` and `{}` parse to the empty condition, which always holds.
    pub fn parse(raw: &Value) -> Result<Self, AuthzError> {
        let obj = match raw {
            Value::Null => return Ok(Self::default()),
            Value::Object(obj) => obj,
            other => {
                return Err(AuthzError::Validation(format!(
                    "conditions must be an object, got {}",
                    json_kind(other)
                )));
            }
        };

        let mut clauses = Vec::with_capacity(obj.len());
        for (path, ops) in obj {
            let Value::Object(ops) = ops else {
                return Err(AuthzError::PolicyEvaluation(format!(
                    "operators for `{path}` must be an object"
                )));
            };
            let path = AttrPath::parse(path)?;
            let mut checks = Vec::with_capacity(ops.len());
            for (op, expected) in ops {
                checks.push(Check {
                    op: op.parse()?,
                    expected: AttrValue::from(expected.clone()),
                });
            }
            clauses.push(Clause { path, checks });
        }
        Ok(Self { clauses })
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Evaluate against a flattened context. Stops at the first failing check.
    pub fn evaluate(&self, context: &Attributes) -> Result<bool, AuthzError> {
        for clause in &self.clauses {
            let Some(actual) = clause.path.resolve(context) else {
                return Ok(false);
            };
            for check in &clause.checks {
                let expected = resolve_template(&check.expected, context);
                if !apply_operator(check.op, actual, &expected)? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─── Evaluator facade ───────────────────────────────────────────────────

/// Stateless evaluator over serialized conditions.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyEvaluator;

impl PolicyEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(
        &self,
        conditions: Option<&Value>,
        context: &Attributes,
    ) -> Result<bool, AuthzError> {
        let Some(raw) = conditions else {
            return Ok(true);
        };
        Condition::parse(raw)?.evaluate(context)
    }

    pub fn evaluate_batch(
        &self,
        conditions: Option<&Value>,
        contexts: &[Attributes],
    ) -> Result<Vec<bool>, AuthzError> {
        let Some(raw) = conditions else {
            return Ok(vec![true; contexts.len()]);
        };
        let condition = Condition::parse(raw)?;
        contexts.iter().map(|ctx| condition.evaluate(ctx)).collect()
    }

    /// Static check of a condition, for use when a permission is authored.
    ///
    /// Beyond parsing, literal `matches` patterns are compiled so that a bad
    /// regex is reported here rather than silently failing every check.
    pub fn validate_conditions(&self, conditions: &Value) -> Result<(), AuthzError> {
        let condition = Condition::parse(conditions)?;
        for clause in &condition.clauses {
            for check in &clause.checks {
                if check.op != Operator::Matches {
                    continue;
                }
                if let AttrValue::String(pattern) = &check.expected {
                    if !has_template(pattern) {
                        compile_anchored(pattern)?;
                    }
                }
            }
        }
        Ok(())
    }
}

// ─── Templates ──────────────────────────────────────────────────────────

fn has_template(s: &str) -> bool {
    s.find("{{")
        .is_some_and(|start| s[start + 2..].contains("}}"))
}

/// Substitute `{{path}}` markers in a string expected value.
fn resolve_template(expected: &AttrValue, context: &Attributes) -> AttrValue {
    let AttrValue::String(s) = expected else {
        return expected.clone();
    };
    if !has_template(s) {
        return expected.clone();
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s.as_str();
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        let inner = &after[..end];
        out.push_str(&rest[..start]);
        let resolved = if inner.is_empty() || inner.contains('}') {
            None
        } else {
            AttrPath::parse(inner.trim())
                .ok()
                .and_then(|path| path.resolve(context))
        };
        match resolved {
            Some(value) => out.push_str(&value.to_template_string()),
            None => {
                out.push_str("{{");
                out.push_str(inner);
                out.push_str("}}");
            }
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    AttrValue::String(out)
}

// ─── Coercion ───────────────────────────────────────────────────────────

fn same_kind(a: &AttrValue, b: &AttrValue) -> bool {
    a.kind() == b.kind()
}

fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}

/// Bring `actual` and `expected` to comparable kinds. The expected side is
/// converted toward the actual side's kind; stringification is the fallback.
fn coerce(actual: &AttrValue, expected: &AttrValue) -> (AttrValue, AttrValue) {
    if same_kind(actual, expected) {
        return (actual.clone(), expected.clone());
    }

    if let (true, AttrValue::String(s)) = (actual.is_numeric(), expected) {
        if let Ok(f) = s.trim().parse::<f64>() {
            return (actual.clone(), AttrValue::Float(f));
        }
    }

    if let (AttrValue::Bool(_), AttrValue::String(s)) = (actual, expected) {
        let truthy = matches!(s.to_ascii_lowercase().as_str(), "true" | "1" | "yes");
        return (actual.clone(), AttrValue::Bool(truthy));
    }

    if let AttrValue::String(s) = expected {
        if let Some(t) = parse_time_of_day(s) {
            match actual {
                AttrValue::Time(a) => return (AttrValue::Time(*a), AttrValue::Time(t)),
                AttrValue::Timestamp(ts) => return (AttrValue::Time(ts.time()), AttrValue::Time(t)),
                _ => {}
            }
        }
    }

    if matches!(actual, AttrValue::List(_)) || matches!(expected, AttrValue::List(_)) {
        return (actual.clone(), expected.clone());
    }

    (
        AttrValue::String(actual.to_template_string()),
        AttrValue::String(expected.to_template_string()),
    )
}

// ─── Operator application ───────────────────────────────────────────────

fn loose_eq(a: &AttrValue, b: &AttrValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(op: Operator, a: &AttrValue, b: &AttrValue) -> Result<Ordering, AuthzError> {
    let ordering = match (a, b) {
        _ if a.is_numeric() && b.is_numeric() => {
            let (x, y) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
            x.partial_cmp(&y)
        }
        (AttrValue::String(x), AttrValue::String(y)) => Some(x.cmp(y)),
        (AttrValue::Bool(x), AttrValue::Bool(y)) => Some(x.cmp(y)),
        (AttrValue::Time(x), AttrValue::Time(y)) => Some(x.cmp(y)),
        (AttrValue::Timestamp(x), AttrValue::Timestamp(y)) => Some(x.cmp(y)),
        _ => None,
    };
    ordering.ok_or_else(|| {
        AuthzError::PolicyEvaluation(format!(
            "cannot compare {} with {} using `{op}`",
            a.kind(),
            b.kind()
        ))
    })
}

/// `needle in haystack`: list membership, substring, or map key.
fn membership(op: Operator, needle: &AttrValue, haystack: &AttrValue) -> Result<bool, AuthzError> {
    match (haystack, needle) {
        (AttrValue::List(items), _) => Ok(items.iter().any(|item| loose_eq(item, needle))),
        (AttrValue::String(h), AttrValue::String(n)) => Ok(h.contains(n.as_str())),
        (AttrValue::Map(map), AttrValue::String(key)) => Ok(map.contains_key(key)),
        _ => Err(AuthzError::PolicyEvaluation(format!(
            "`{op}` cannot look for a {} in a {}",
            needle.kind(),
            haystack.kind()
        ))),
    }
}

fn compile_anchored(pattern: &str) -> Result<Regex, AuthzError> {
    Regex::new(&format!("^(?:{pattern})"))
        .map_err(|e| AuthzError::PolicyEvaluation(format!("invalid pattern `{pattern}`: {e}")))
}

fn apply_operator(op: Operator, actual: &AttrValue, expected: &AttrValue) -> Result<bool, AuthzError> {
    let (a, e) = coerce(actual, expected);
    match op {
        Operator::Eq => Ok(loose_eq(&a, &e)),
        Operator::Ne => Ok(!loose_eq(&a, &e)),
        Operator::Gt => Ok(compare(op, &a, &e)? == Ordering::Greater),
        Operator::Ge => Ok(compare(op, &a, &e)? != Ordering::Less),
        Operator::Lt => Ok(compare(op, &a, &e)? == Ordering::Less),
        Operator::Le => Ok(compare(op, &a, &e)? != Ordering::Greater),
        Operator::In => membership(op, &a, &e),
        Operator::NotIn => membership(op, &a, &e).map(|found| !found),
        Operator::Contains => membership(op, &e, &a),
        Operator::NotContains => membership(op, &e, &a).map(|found| !found),
        Operator::StartsWith => Ok(a
            .to_template_string()
            .starts_with(&e.to_template_string())),
        Operator::EndsWith => Ok(a.to_template_string().ends_with(&e.to_template_string())),
        Operator::Matches => {
            let re = compile_anchored(&e.to_template_string())?;
            Ok(re.is_match(&a.to_template_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::value::attributes_from_json;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn eval(cond: Value, ctx: Value) -> Result<bool, AuthzError> {
        PolicyEvaluator::new().evaluate(Some(&cond), &attributes_from_json(ctx))
    }

    #[test]
    fn test_absent_and_empty_conditions_hold() {
        let ev = PolicyEvaluator::new();
        let ctx = Attributes::new();
        assert!(ev.evaluate(None, &ctx).unwrap());
        assert!(ev.evaluate(Some(&Value::Null), &ctx).unwrap());
        assert!(ev.evaluate(Some(&json!({})), &ctx).unwrap());
    }

    #[test]
    fn test_non_object_condition_is_validation_error() {
        let err = eval(json!(["user.id"]), json!({})).unwrap_err();
        assert!(matches!(err, AuthzError::Validation(_)));
        let err = PolicyEvaluator::new()
            .validate_conditions(&json!("user.id == 1"))
            .unwrap_err();
        assert!(matches!(err, AuthzError::Validation(_)));
    }

    #[test]
    fn test_empty_non_object_condition_is_still_rejected() {
        // Only null and {} mean "no conditions"; other empty values are malformed
        for raw in [json!([]), json!(""), json!(false), json!(0)] {
            let err = Condition::parse(&raw).unwrap_err();
            assert!(matches!(err, AuthzError::Validation(_)), "{raw}");
            assert!(PolicyEvaluator::new()
                .evaluate(Some(&raw), &Attributes::new())
                .is_err());
        }
    }

    #[test]
    fn test_whole_float_template_keeps_decimal_point() {
        assert!(eval(
            json!({ "order.label": { "==": "qty={{order.qty}}" } }),
            json!({ "order": { "qty": 5.0, "label": "qty=5.0" } })
        )
        .unwrap());
    }

    #[test]
    fn test_unknown_operator_rejected_eagerly() {
        let err = PolicyEvaluator::new()
            .validate_conditions(&json!({ "user.level": { "~=": 3 } }))
            .unwrap_err();
        assert!(matches!(err, AuthzError::PolicyEvaluation(msg) if msg.contains("~=")));
    }

    #[test]
    fn test_operator_object_required() {
        let err = PolicyEvaluator::new()
            .validate_conditions(&json!({ "user.level": 3 }))
            .unwrap_err();
        assert!(matches!(err, AuthzError::PolicyEvaluation(_)));
    }

    #[test]
    fn test_validate_catches_bad_literal_regex() {
        let ev = PolicyEvaluator::new();
        assert!(ev
            .validate_conditions(&json!({ "user.email": { "matches": "(" } }))
            .is_err());
        assert!(ev
            .validate_conditions(&json!({ "user.email": { "matches": ".*@{{org.domain}}" } }))
            .is_ok());
    }

    #[test]
    fn test_equality_and_template() {
        let cond = json!({ "resource.owner_id": { "==": "{{user.id}}" } });
        assert!(eval(cond.clone(), json!({ "user": { "id": "u1" }, "resource": { "owner_id": "u1" } })).unwrap());
        assert!(!eval(cond, json!({ "user": { "id": "u1" }, "resource": { "owner_id": "u2" } })).unwrap());
    }

    #[test]
    fn test_missing_attribute_fails_closed() {
        let cond = json!({ "resource.owner_id": { "==": "{{user.id}}" } });
        assert!(!eval(cond, json!({ "user": { "id": "u1" }, "resource": {} })).unwrap());

        let cond = json!({ "user.level": { "!=": 5 } });
        assert!(!eval(cond, json!({ "user": {} })).unwrap());
    }

    #[test]
    fn test_unresolved_template_left_literal() {
        let cond = json!({ "resource.owner_id": { "==": "{{user.id}}" } });
        let ctx = json!({ "resource": { "owner_id": "{{user.id}}" } });
        assert!(eval(cond, ctx).unwrap());
    }

    #[test]
    fn test_multiple_templates_in_one_value() {
        let cond = json!({ "resource.path": { "==": "/{{user.org}}/{{user.id}}" } });
        let ctx = json!({ "user": { "id": "u1", "org": "acme" }, "resource": { "path": "/acme/u1" } });
        assert!(eval(cond, ctx).unwrap());
    }

    #[test]
    fn test_numeric_template_coerced() {
        let cond = json!({ "resource.level": { "<=": "{{user.clearance}}" } });
        let ctx = json!({ "user": { "clearance": 5 }, "resource": { "level": 3 } });
        assert!(eval(cond, ctx).unwrap());
    }

    #[test]
    fn test_numeric_comparisons() {
        let ctx = json!({ "user": { "level": 7 } });
        assert!(eval(json!({ "user.level": { ">": 5, "<": 10 } }), ctx.clone()).unwrap());
        assert!(eval(json!({ "user.level": { ">=": 7.0 } }), ctx.clone()).unwrap());
        assert!(!eval(json!({ "user.level": { ">": "9" } }), ctx.clone()).unwrap());
        assert!(eval(json!({ "user.level": { "==": "7" } }), ctx).unwrap());
    }

    #[test]
    fn test_bool_coercion() {
        let ctx = json!({ "user": { "verified": true } });
        assert!(eval(json!({ "user.verified": { "==": "yes" } }), ctx.clone()).unwrap());
        assert!(eval(json!({ "user.verified": { "==": "TRUE" } }), ctx.clone()).unwrap());
        assert!(!eval(json!({ "user.verified": { "==": "no" } }), ctx).unwrap());
    }

    #[test]
    fn test_time_of_day_coercion() {
        let mut ctx = Attributes::new();
        let mut time = Attributes::new();
        time.insert(
            "current".into(),
            AttrValue::Timestamp(Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap()),
        );
        ctx.insert("time".into(), AttrValue::Map(time));

        let business_hours = json!({ "time.current": { ">=": "09:00", "<": "17:00" } });
        assert!(PolicyEvaluator::new()
            .evaluate(Some(&business_hours), &ctx)
            .unwrap());

        let evening = json!({ "time.current": { ">=": "18:00" } });
        assert!(!PolicyEvaluator::new().evaluate(Some(&evening), &ctx).unwrap());
    }

    #[test]
    fn test_membership_operators() {
        let ctx = json!({ "user": { "department": "eng", "roles": ["admin", "dev"] } });
        assert!(eval(json!({ "user.department": { "in": ["eng", "ops"] } }), ctx.clone()).unwrap());
        assert!(eval(json!({ "user.department": { "not_in": ["sales"] } }), ctx.clone()).unwrap());
        assert!(eval(json!({ "user.roles": { "contains": "admin" } }), ctx.clone()).unwrap());
        assert!(eval(json!({ "user.roles": { "not_contains": "root" } }), ctx.clone()).unwrap());
        assert!(eval(json!({ "user.department": { "in": "engineering" } }), ctx).unwrap());
    }

    #[test]
    fn test_list_membership_numeric() {
        let ctx = json!({ "resource": { "level": 2 } });
        assert!(eval(json!({ "resource.level": { "in": [1, 2.0, 3] } }), ctx).unwrap());
    }

    #[test]
    fn test_string_operators() {
        let ctx = json!({ "user": { "email": "alice@example.com" } });
        assert!(eval(json!({ "user.email": { "endswith": "@example.com" } }), ctx.clone()).unwrap());
        assert!(eval(json!({ "user.email": { "startswith": "alice" } }), ctx.clone()).unwrap());
        assert!(eval(json!({ "user.email": { "matches": "[a-z]+@" } }), ctx.clone()).unwrap());
        // Anchored at the start
        assert!(!eval(json!({ "user.email": { "matches": "example" } }), ctx).unwrap());
    }

    #[test]
    fn test_indexed_path_in_condition() {
        let ctx = json!({ "resource": { "tags": ["public", "draft"] } });
        assert!(eval(json!({ "resource.tags[0]": { "==": "public" } }), ctx).unwrap());
    }

    #[test]
    fn test_incomparable_ordering_is_error() {
        let ctx = json!({ "user": { "tags": ["a"] } });
        let err = eval(json!({ "user.tags": { ">": [1] } }), ctx).unwrap_err();
        assert!(matches!(err, AuthzError::PolicyEvaluation(_)));
    }

    #[test]
    fn test_all_entries_anded() {
        let cond = json!({
            "user.department": { "==": "eng" },
            "resource.status": { "==": "published" }
        });
        let both = json!({ "user": { "department": "eng" }, "resource": { "status": "published" } });
        let one = json!({ "user": { "department": "eng" }, "resource": { "status": "draft" } });
        assert!(eval(cond.clone(), both).unwrap());
        assert!(!eval(cond, one).unwrap());
    }

    #[test]
    fn test_evaluate_batch() {
        let cond = json!({ "user.level": { ">": 3 } });
        let contexts = vec![
            attributes_from_json(json!({ "user": { "level": 5 } })),
            attributes_from_json(json!({ "user": { "level": 1 } })),
            attributes_from_json(json!({})),
        ];
        let results = PolicyEvaluator::new()
            .evaluate_batch(Some(&cond), &contexts)
            .unwrap();
        assert_eq!(results, vec![true, false, false]);
    }

    #[test]
    fn test_operator_names_roundtrip() {
        for op in Operator::ALL {
            assert_eq!(op.as_str().parse::<Operator>().unwrap(), op);
        }
    }
}
