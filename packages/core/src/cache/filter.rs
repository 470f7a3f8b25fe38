//! Typed filter expressions.
//!
//! Callers pass generic field → value filters; each backend compiles them to
//! its own query form. The type dispatch (text vs numeric vs boolean vs list)
//! is explicit here so neither engine does stringly-typed value formatting.

use crate::cache::CacheError;
use crate::schema::{self, FieldType, DOCUMENT_FIELD};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single filter value. Lists compile to `IN` clauses; everything else is
/// exact equality.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
    TextList(Vec<String>),
}

/// Field → value filter set, AND-combined. Ordered map so compiled
/// expressions are deterministic.
pub type FilterMap = BTreeMap<String, FilterValue>;

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for FilterValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Vec<String>> for FilterValue {
    fn from(v: Vec<String>) -> Self {
        Self::TextList(v)
    }
}

impl FilterValue {
    /// Convert a JSON value into a filter value, when it has a scalar (or
    /// string-list) shape.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Integer(i))
                } else {
                    n.as_f64().map(Self::Real)
                }
            }
            Value::Array(items) => {
                let strings: Option<Vec<String>> = items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string))
                    .collect();
                strings.map(Self::TextList)
            }
            _ => None,
        }
    }
}

/// The filterable fields for a category: declared indexed fields plus the
/// implicit `document`, `name`, and `slug` columns both engines carry.
pub fn allowed_fields(category: &str) -> Option<Vec<&'static str>> {
    let declared = schema::indexed_fields(category)?;
    let mut allowed: Vec<&'static str> = declared.iter().map(|(name, _)| *name).collect();
    allowed.push(DOCUMENT_FIELD);
    allowed.push("name");
    allowed.push("slug");
    Some(allowed)
}

/// Reject any filter field outside the allow-list, naming the bad field and
/// the allowed set.
pub fn ensure_allowed(
    category: &str,
    filters: &FilterMap,
    allowed: &[&str],
) -> Result<(), CacheError> {
    for field in filters.keys() {
        if !allowed.contains(&field.as_str()) {
            return Err(CacheError::unknown_filter_field(category, field, allowed));
        }
    }
    Ok(())
}

/// Compile filters to a SQL `WHERE` fragment with bound parameters.
///
/// Returns an empty string (and no parameters) for an empty filter set.
pub fn sql_where(filters: &FilterMap) -> (String, Vec<libsql::Value>) {
    if filters.is_empty() {
        return (String::new(), Vec::new());
    }

    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<libsql::Value> = Vec::new();

    for (field, value) in filters {
        match value {
            FilterValue::Text(s) => {
                clauses.push(format!("{} = ?", field));
                params.push(libsql::Value::Text(s.clone()));
            }
            FilterValue::Integer(i) => {
                clauses.push(format!("{} = ?", field));
                params.push(libsql::Value::Integer(*i));
            }
            FilterValue::Real(r) => {
                clauses.push(format!("{} = ?", field));
                params.push(libsql::Value::Real(*r));
            }
            // Booleans are stored as 0/1 integer columns
            FilterValue::Bool(b) => {
                clauses.push(format!("{} = ?", field));
                params.push(libsql::Value::Integer(i64::from(*b)));
            }
            FilterValue::TextList(items) => {
                let placeholders = vec!["?"; items.len()].join(", ");
                clauses.push(format!("{} IN ({})", field, placeholders));
                for item in items {
                    params.push(libsql::Value::Text(item.clone()));
                }
            }
        }
    }

    (format!(" WHERE {}", clauses.join(" AND ")), params)
}

/// Compile filters to a LanceDB boolean filter expression (`only_if` input).
///
/// String equality is quoted (with `'` escaping), boolean equality uses the
/// `true`/`false` literals, numeric equality is unquoted, and list values
/// compile to an `IN` clause. Returns `None` for an empty filter set.
pub fn lance_expr(filters: &FilterMap) -> Option<String> {
    if filters.is_empty() {
        return None;
    }

    let clauses: Vec<String> = filters
        .iter()
        .map(|(field, value)| match value {
            FilterValue::Text(s) => format!("{} = '{}'", field, escape(s)),
            FilterValue::Integer(i) => format!("{} = {}", field, i),
            FilterValue::Real(r) => format!("{} = {}", field, r),
            FilterValue::Bool(b) => format!("{} = {}", field, b),
            FilterValue::TextList(items) => {
                let quoted: Vec<String> =
                    items.iter().map(|s| format!("'{}'", escape(s))).collect();
                format!("{} IN ({})", field, quoted.join(", "))
            }
        })
        .collect();

    Some(clauses.join(" AND "))
}

fn escape(s: &str) -> String {
    s.replace('\'', "''")
}

/// Coerce a JSON field value to the declared column type, falling back to the
/// category defaults (empty string / zero / false) when the entity omits the
/// field or carries an incompatible value.
pub fn coerce(value: Option<&Value>, field_type: FieldType) -> FilterValue {
    match field_type {
        FieldType::Text => FilterValue::Text(
            value
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
        FieldType::Integer => FilterValue::Integer(value.and_then(Value::as_i64).unwrap_or(0)),
        FieldType::Real => FilterValue::Real(value.and_then(Value::as_f64).unwrap_or(0.0)),
        FieldType::Boolean => FilterValue::Bool(value.and_then(Value::as_bool).unwrap_or(false)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filters(pairs: Vec<(&str, FilterValue)>) -> FilterMap {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn test_sql_where_empty() {
        let (clause, params) = sql_where(&FilterMap::new());
        assert!(clause.is_empty());
        assert!(params.is_empty());
    }

    #[test]
    fn test_sql_where_types() {
        let (clause, params) = sql_where(&filters(vec![
            ("concentration", FilterValue::Bool(true)),
            ("level", FilterValue::Integer(3)),
            ("school", FilterValue::Text("Evocation".into())),
        ]));

        // BTreeMap iteration order: concentration, level, school
        assert_eq!(
            clause,
            " WHERE concentration = ? AND level = ? AND school = ?"
        );
        assert_eq!(params.len(), 3);
        assert!(matches!(params[0], libsql::Value::Integer(1)));
        assert!(matches!(params[1], libsql::Value::Integer(3)));
        assert!(matches!(&params[2], libsql::Value::Text(s) if s == "Evocation"));
    }

    #[test]
    fn test_sql_where_list() {
        let (clause, params) = sql_where(&filters(vec![(
            "document",
            FilterValue::TextList(vec!["srd".into(), "homebrew".into()]),
        )]));
        assert_eq!(clause, " WHERE document IN (?, ?)");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_lance_expr_types() {
        let expr = lance_expr(&filters(vec![
            ("level", FilterValue::Integer(3)),
            ("ritual", FilterValue::Bool(false)),
            ("school", FilterValue::Text("Evocation".into())),
        ]))
        .unwrap();

        assert_eq!(expr, "level = 3 AND ritual = false AND school = 'Evocation'");
    }

    #[test]
    fn test_lance_expr_list_and_escaping() {
        let expr = lance_expr(&filters(vec![(
            "document",
            FilterValue::TextList(vec!["srd".into(), "vob'ji".into()]),
        )]))
        .unwrap();
        assert_eq!(expr, "document IN ('srd', 'vob''ji')");

        assert!(lance_expr(&FilterMap::new()).is_none());
    }

    #[test]
    fn test_ensure_allowed() {
        let allowed = allowed_fields("spells").unwrap();
        let ok = filters(vec![("level", FilterValue::Integer(3))]);
        assert!(ensure_allowed("spells", &ok, &allowed).is_ok());

        let bad = filters(vec![("armor_class", FilterValue::Integer(15))]);
        let err = ensure_allowed("spells", &bad, &allowed).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("armor_class"));
        assert!(message.contains("level"));
    }

    #[test]
    fn test_from_json() {
        assert_eq!(
            FilterValue::from_json(&json!("srd")),
            Some(FilterValue::Text("srd".into()))
        );
        assert_eq!(
            FilterValue::from_json(&json!(3)),
            Some(FilterValue::Integer(3))
        );
        assert_eq!(
            FilterValue::from_json(&json!(["a", "b"])),
            Some(FilterValue::TextList(vec!["a".into(), "b".into()]))
        );
        assert_eq!(FilterValue::from_json(&json!({"nested": true})), None);
    }

    #[test]
    fn test_coerce_defaults() {
        assert_eq!(coerce(None, FieldType::Text), FilterValue::Text("".into()));
        assert_eq!(coerce(None, FieldType::Integer), FilterValue::Integer(0));
        assert_eq!(coerce(None, FieldType::Boolean), FilterValue::Bool(false));
        assert_eq!(
            coerce(Some(&json!(5)), FieldType::Integer),
            FilterValue::Integer(5)
        );
    }
}
