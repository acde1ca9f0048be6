//! Filter types for scalar queries.
//!
//! A [`Filter`] renders to a Milvus boolean expression with
//! [`Filter::to_expr`] and can be evaluated against a stored row with
//! [`Filter::matches`]. Expressions are parsed back with [`crate::expr::parse`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use super::schema::Entity;

/// Filter operator for scalar queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    /// Equal to.
    Eq(Value),
    /// Not equal to.
    Ne(Value),
    /// Greater than.
    Gt(Value),
    /// Greater than or equal to.
    Gte(Value),
    /// Less than.
    Lt(Value),
    /// Less than or equal to.
    Lte(Value),
    /// In list.
    In(Vec<Value>),
    /// Not in list.
    Nin(Vec<Value>),
    /// String pattern with `%` wildcards.
    Like(String),
}

/// A single filter condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    /// Field name to filter on.
    pub field: String,
    /// Operator to apply.
    pub operator: FilterOperator,
}

impl FilterCondition {
    /// Create an equality condition.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::Eq(value.into()),
        }
    }

    /// Create an inequality condition.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::Ne(value.into()),
        }
    }

    /// Create a greater than condition.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::Gt(value.into()),
        }
    }

    /// Create a greater than or equal condition.
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::Gte(value.into()),
        }
    }

    /// Create a less than condition.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::Lt(value.into()),
        }
    }

    /// Create a less than or equal condition.
    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::Lte(value.into()),
        }
    }

    /// Create an in-list condition.
    pub fn in_list(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::In(values),
        }
    }

    /// Create a not-in-list condition.
    pub fn not_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::Nin(values),
        }
    }

    /// Create a pattern condition.
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::Like(pattern.into()),
        }
    }

    fn to_expr(&self) -> String {
        let field = &self.field;
        match &self.operator {
            FilterOperator::Eq(v) => format!("{} == {}", field, render_literal(v)),
            FilterOperator::Ne(v) => format!("{} != {}", field, render_literal(v)),
            FilterOperator::Gt(v) => format!("{} > {}", field, render_literal(v)),
            FilterOperator::Gte(v) => format!("{} >= {}", field, render_literal(v)),
            FilterOperator::Lt(v) => format!("{} < {}", field, render_literal(v)),
            FilterOperator::Lte(v) => format!("{} <= {}", field, render_literal(v)),
            FilterOperator::In(vs) => format!("{} in {}", field, render_list(vs)),
            FilterOperator::Nin(vs) => format!("{} not in {}", field, render_list(vs)),
            FilterOperator::Like(p) => format!("{} like {}", field, quote(p)),
        }
    }

    fn matches(&self, entity: &Entity) -> bool {
        let value = entity.get(&self.field).filter(|v| !v.is_null());
        match &self.operator {
            FilterOperator::Eq(v) => value.is_some_and(|fv| values_equal(fv, v)),
            FilterOperator::Ne(v) => value.map_or(true, |fv| !values_equal(fv, v)),
            FilterOperator::Gt(v) => compare(value, v) == Some(Ordering::Greater),
            FilterOperator::Gte(v) => {
                matches!(compare(value, v), Some(Ordering::Greater | Ordering::Equal))
            }
            FilterOperator::Lt(v) => compare(value, v) == Some(Ordering::Less),
            FilterOperator::Lte(v) => {
                matches!(compare(value, v), Some(Ordering::Less | Ordering::Equal))
            }
            FilterOperator::In(vs) => {
                value.is_some_and(|fv| vs.iter().any(|v| values_equal(fv, v)))
            }
            FilterOperator::Nin(vs) => {
                value.map_or(true, |fv| !vs.iter().any(|v| values_equal(fv, v)))
            }
            FilterOperator::Like(p) => value
                .and_then(Value::as_str)
                .is_some_and(|s| like_match(s, p)),
        }
    }
}

/// Composite filter with AND/OR/NOT logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// Single condition.
    Condition(FilterCondition),
    /// AND of multiple filters.
    And(Vec<Filter>),
    /// OR of multiple filters.
    Or(Vec<Filter>),
    /// NOT of a filter.
    Not(Box<Filter>),
}

impl Filter {
    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition(FilterCondition::eq(field, value))
    }

    /// Create an inequality filter.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition(FilterCondition::ne(field, value))
    }

    /// Create a greater than filter.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition(FilterCondition::gt(field, value))
    }

    /// Create a greater than or equal filter.
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition(FilterCondition::gte(field, value))
    }

    /// Create a less than filter.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition(FilterCondition::lt(field, value))
    }

    /// Create a less than or equal filter.
    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition(FilterCondition::lte(field, value))
    }

    /// Create an in-list filter.
    pub fn in_list(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::Condition(FilterCondition::in_list(field, values))
    }

    /// Create a not-in-list filter.
    pub fn not_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::Condition(FilterCondition::not_in(field, values))
    }

    /// Create a pattern filter.
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Filter::Condition(FilterCondition::like(field, pattern))
    }

    /// Create an AND filter.
    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    /// Create an OR filter.
    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    /// Create a NOT filter.
    pub fn not(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Render as a Milvus boolean expression.
    ///
    /// An empty `And`/`Or` renders as an empty string, which matches every row.
    /// So does an `Or` with any branch that matches every row.
    pub fn to_expr(&self) -> String {
        match self {
            Filter::Condition(cond) => cond.to_expr(),
            Filter::And(filters) => {
                let parts: Vec<String> = render_children(filters)
                    .into_iter()
                    .filter(|s| !s.is_empty())
                    .collect();
                parts.join(" and ")
            }
            Filter::Or(filters) => {
                let parts = render_children(filters);
                if parts.iter().any(String::is_empty) {
                    String::new()
                } else {
                    parts.join(" or ")
                }
            }
            Filter::Not(inner) => {
                let rendered = inner.to_expr();
                if rendered.is_empty() {
                    // not(match-all) matches nothing
                    "false".to_string()
                } else {
                    format!("not ({})", rendered)
                }
            }
        }
    }

    /// Evaluate against a stored row.
    pub fn matches(&self, entity: &Entity) -> bool {
        match self {
            Filter::Condition(cond) => cond.matches(entity),
            Filter::And(filters) => filters.iter().all(|f| f.matches(entity)),
            Filter::Or(filters) => filters.is_empty() || filters.iter().any(|f| f.matches(entity)),
            Filter::Not(inner) => !inner.matches(entity),
        }
    }
}

/// Render each child, parenthesizing nested composites. Match-all children
/// come back as empty strings.
fn render_children(filters: &[Filter]) -> Vec<String> {
    filters
        .iter()
        .map(|f| {
            let rendered = f.to_expr();
            match f {
                Filter::And(children) | Filter::Or(children)
                    if children.len() > 1 && !rendered.is_empty() =>
                {
                    format!("({})", rendered)
                }
                _ => rendered,
            }
        })
        .collect()
}

/// Quote a string literal for an expression.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn render_literal(value: &Value) -> String {
    match value {
        Value::String(s) => quote(s),
        Value::Array(items) => render_list(items),
        other => other.to_string(),
    }
}

fn render_list(values: &[Value]) -> String {
    let items: Vec<String> = values.iter().map(render_literal).collect();
    format!("[{}]", items.join(", "))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

fn compare(field_value: Option<&Value>, other: &Value) -> Option<Ordering> {
    match (field_value?, other) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Match `text` against a pattern where `%` stands for any run of characters.
fn like_match(text: &str, pattern: &str) -> bool {
    let parts: Vec<&str> = pattern.split('%').collect();
    if parts.len() == 1 {
        return text == pattern;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !text.starts_with(first) {
        return false;
    }
    let mut rest = &text[first.len()..];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row() -> Entity {
        let mut e = Entity::new();
        e.insert("personality_id".into(), json!("alice"));
        e.insert("session_id".into(), json!("s-1"));
        e.insert("create_time".into(), json!(1_700_000_000));
        e.insert("content".into(), json!("likes green tea"));
        e
    }

    #[test]
    fn test_to_expr_simple() {
        assert_eq!(Filter::eq("session_id", "s-1").to_expr(), r#"session_id == "s-1""#);
        assert_eq!(Filter::gte("create_time", 10).to_expr(), "create_time >= 10");
        assert_eq!(
            Filter::in_list("id", vec![json!(1), json!(2)]).to_expr(),
            "id in [1, 2]"
        );
    }

    #[test]
    fn test_to_expr_escapes_strings() {
        assert_eq!(
            Filter::eq("content", r#"say "hi""#).to_expr(),
            r#"content == "say \"hi\"""#
        );
    }

    #[test]
    fn test_to_expr_nested() {
        let filter = Filter::and(vec![
            Filter::eq("personality_id", "alice"),
            Filter::or(vec![
                Filter::eq("session_id", "s-1"),
                Filter::eq("session_id", "s-2"),
            ]),
        ]);
        assert_eq!(
            filter.to_expr(),
            r#"personality_id == "alice" and (session_id == "s-1" or session_id == "s-2")"#
        );
        assert_eq!(
            Filter::not(Filter::eq("a", 1)).to_expr(),
            "not (a == 1)"
        );
    }

    #[test]
    fn test_empty_composite_matches_all() {
        assert_eq!(Filter::and(vec![]).to_expr(), "");
        assert!(Filter::and(vec![]).matches(&row()));
        assert!(Filter::or(vec![]).matches(&row()));
    }

    #[test]
    fn test_or_with_match_all_branch() {
        let filter = Filter::or(vec![Filter::eq("a", 1), Filter::and(vec![])]);
        assert_eq!(filter.to_expr(), "");
        assert!(filter.matches(&row()));

        let negated = Filter::not(filter);
        assert_eq!(negated.to_expr(), "false");
        assert!(!negated.matches(&row()));

        let scoped = Filter::and(vec![
            Filter::eq("personality_id", "alice"),
            Filter::or(vec![Filter::eq("session_id", "s-9"), Filter::and(vec![])]),
        ]);
        assert_eq!(scoped.to_expr(), r#"personality_id == "alice""#);
    }

    #[test]
    fn test_matches() {
        let e = row();
        assert!(Filter::eq("personality_id", "alice").matches(&e));
        assert!(!Filter::eq("personality_id", "bob").matches(&e));
        assert!(Filter::gt("create_time", 1_000).matches(&e));
        assert!(Filter::lte("create_time", 1_700_000_000.0).matches(&e));
        assert!(Filter::in_list("session_id", vec![json!("s-0"), json!("s-1")]).matches(&e));
        assert!(Filter::not(Filter::eq("session_id", "s-2")).matches(&e));
    }

    #[test]
    fn test_missing_field_semantics() {
        let e = row();
        assert!(!Filter::eq("missing", 1).matches(&e));
        assert!(!Filter::gt("missing", 1).matches(&e));
        assert!(Filter::ne("missing", 1).matches(&e));
        assert!(Filter::not_in("missing", vec![json!(1)]).matches(&e));
    }

    #[test]
    fn test_like() {
        let e = row();
        assert!(Filter::like("content", "likes%").matches(&e));
        assert!(Filter::like("content", "%tea").matches(&e));
        assert!(Filter::like("content", "%green%").matches(&e));
        assert!(!Filter::like("content", "%coffee%").matches(&e));
        assert!(!Filter::like("content", "likes").matches(&e));
    }
}
