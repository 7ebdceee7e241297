//! Parameterized WHERE-clause compiler
//!
//! The only component allowed to render filter SQL. Admin-configured
//! raw fragments are emitted verbatim (wrapped in parentheses);
//! structured filters compile to whitelisted operators with `$k`
//! positional placeholders. User-supplied values are never
//! interpolated into the SQL text - they only ever enter the argument
//! vector.

use pgrag_common::errors::{AppError, Result};
use pgrag_common::types::{ConfigFilter, Filter, FilterCondition};
use sea_orm::Value;

/// Operators accepted in structured filters
const OPERATOR_WHITELIST: &[&str] = &[
    "=", "!=", "<", ">", "<=", ">=", "LIKE", "ILIKE", "IN", "NOT IN", "IS NULL", "IS NOT NULL",
];

/// A compiled filter: SQL fragment plus its ordered argument vector
#[derive(Debug)]
pub struct CompiledFilter {
    clause: String,
    values: Vec<Value>,
    next_index: usize,
}

impl CompiledFilter {
    pub fn is_empty(&self) -> bool {
        self.clause.is_empty()
    }

    /// The fragment prefixed with ` WHERE `, or empty
    pub fn where_clause(&self) -> String {
        if self.clause.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clause)
        }
    }

    /// The fragment prefixed with ` AND `, for queries with their own
    /// WHERE scaffolding; empty when there are no conditions
    pub fn and_clause(&self) -> String {
        if self.clause.is_empty() {
            String::new()
        } else {
            format!(" AND {}", self.clause)
        }
    }

    /// Index the next placeholder after this filter would take
    pub fn next_index(&self) -> usize {
        self.next_index
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// Compile the pipeline-configured filter and the request filter into
/// one fragment.
///
/// `start_index` is the first `$k` placeholder to use; the caller owns
/// any lower-numbered parameters (vector search reserves `$1` for the
/// query vector and `$2` for the limit). Distinct fragments are joined
/// with AND.
pub fn compile(
    config: Option<&ConfigFilter>,
    request: Option<&Filter>,
    start_index: usize,
) -> Result<CompiledFilter> {
    let mut fragments: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    let mut index = start_index;

    if let Some(config) = config {
        match config {
            // Admin-controlled, emitted verbatim
            ConfigFilter::RawSql(sql) => {
                if !sql.trim().is_empty() {
                    fragments.push(format!("({})", sql));
                }
            }
            ConfigFilter::Structured(filter) => {
                if let Some(fragment) = compile_structured(filter, &mut index, &mut values)? {
                    fragments.push(fragment);
                }
            }
        }
    }

    if let Some(filter) = request {
        if let Some(fragment) = compile_structured(filter, &mut index, &mut values)? {
            fragments.push(fragment);
        }
    }

    Ok(CompiledFilter {
        clause: fragments.join(" AND "),
        values,
        next_index: index,
    })
}

/// Compile one structured filter to `(c1 L c2 L ...)`
fn compile_structured(
    filter: &Filter,
    index: &mut usize,
    values: &mut Vec<Value>,
) -> Result<Option<String>> {
    if filter.conditions.is_empty() {
        return Ok(None);
    }

    let mut parts = Vec::with_capacity(filter.conditions.len());
    for condition in &filter.conditions {
        parts.push(compile_condition(condition, index, values)?);
    }

    Ok(Some(format!(
        "({})",
        parts.join(&format!(" {} ", filter.logic.as_sql()))
    )))
}

fn compile_condition(
    condition: &FilterCondition,
    index: &mut usize,
    values: &mut Vec<Value>,
) -> Result<String> {
    if condition.column.is_empty() {
        return Err(AppError::invalid_request("filter condition without a column"));
    }

    let column = quote_ident(&condition.column);
    let operator = condition.operator.trim().to_uppercase();
    let operator = normalize_spaces(&operator);

    if !OPERATOR_WHITELIST.contains(&operator.as_str()) {
        return Err(AppError::UnsupportedOperator {
            operator: condition.operator.clone(),
        });
    }

    match operator.as_str() {
        "IS NULL" | "IS NOT NULL" => Ok(format!("{column} {operator}")),

        "IN" | "NOT IN" => {
            let Some(serde_json::Value::Array(items)) = &condition.value else {
                return Err(AppError::invalid_request(format!(
                    "{operator} requires a list value for column {}",
                    condition.column
                )));
            };
            if items.is_empty() {
                return Err(AppError::invalid_request(format!(
                    "{operator} requires a non-empty list for column {}",
                    condition.column
                )));
            }
            let mut placeholders = Vec::with_capacity(items.len());
            for item in items {
                values.push(bind_value(item, &condition.column)?);
                placeholders.push(format!("${}", *index));
                *index += 1;
            }
            Ok(format!("{column} {operator} ({})", placeholders.join(", ")))
        }

        _ => {
            let Some(value) = &condition.value else {
                return Err(AppError::invalid_request(format!(
                    "operator {operator} requires a value for column {}",
                    condition.column
                )));
            };
            values.push(bind_value(value, &condition.column)?);
            let placeholder = *index;
            *index += 1;
            Ok(format!("{column} {operator} ${placeholder}"))
        }
    }
}

/// Convert a JSON scalar into a bound SQL value
fn bind_value(value: &serde_json::Value, column: &str) -> Result<Value> {
    match value {
        serde_json::Value::Bool(b) => Ok((*b).into()),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i.into())
            } else if let Some(f) = n.as_f64() {
                Ok(f.into())
            } else {
                Err(AppError::invalid_request(format!(
                    "unrepresentable numeric filter value for column {column}"
                )))
            }
        }
        serde_json::Value::String(s) => Ok(s.clone().into()),
        serde_json::Value::Null => Err(AppError::invalid_request(format!(
            "null filter value for column {column}; use IS NULL"
        ))),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
            Err(AppError::invalid_request(format!(
                "unsupported filter value type for column {column}"
            )))
        }
    }
}

/// Quote an identifier, doubling embedded quotes
///
/// Dots are preserved as part of the name, not treated as schema
/// separators: `a.b` becomes `"a.b"`.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn normalize_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgrag_common::types::FilterLogic;
    use serde_json::json;

    fn condition(column: &str, operator: &str, value: Option<serde_json::Value>) -> FilterCondition {
        FilterCondition {
            column: column.into(),
            operator: operator.into(),
            value,
        }
    }

    fn filter(conditions: Vec<FilterCondition>, logic: FilterLogic) -> Filter {
        Filter { conditions, logic }
    }

    #[test]
    fn empty_input_compiles_to_empty_clause() {
        let compiled = compile(None, None, 1).unwrap();
        assert!(compiled.is_empty());
        assert_eq!(compiled.where_clause(), "");
        assert_eq!(compiled.and_clause(), "");
        assert_eq!(compiled.next_index(), 1);
    }

    #[test]
    fn raw_config_sql_is_wrapped_verbatim() {
        let raw = ConfigFilter::RawSql("tenant_id = 7".into());
        let compiled = compile(Some(&raw), None, 3).unwrap();
        assert_eq!(compiled.where_clause(), " WHERE (tenant_id = 7)");
        assert!(compiled.values().is_empty());
        assert_eq!(compiled.next_index(), 3);
    }

    #[test]
    fn simple_equality_binds_one_parameter() {
        let f = filter(
            vec![condition("product", "=", Some(json!("widget")))],
            FilterLogic::And,
        );
        let compiled = compile(None, Some(&f), 3).unwrap();
        assert_eq!(compiled.where_clause(), " WHERE (\"product\" = $3)");
        assert_eq!(compiled.values().len(), 1);
        assert_eq!(compiled.next_index(), 4);
    }

    #[test]
    fn values_never_appear_in_sql_text() {
        let malicious = "'; DROP TABLE documents; --";
        let f = filter(
            vec![condition("product", "=", Some(json!(malicious)))],
            FilterLogic::And,
        );
        let compiled = compile(None, Some(&f), 3).unwrap();
        assert!(!compiled.where_clause().contains(malicious));
        assert!(!compiled.where_clause().contains("DROP"));
        assert_eq!(compiled.values().len(), 1);
    }

    #[test]
    fn config_and_request_fragments_join_with_and() {
        let raw = ConfigFilter::RawSql("lang = 'en'".into());
        let f = filter(
            vec![
                condition("status", "=", Some(json!("published"))),
                condition("stars", ">", Some(json!(3))),
            ],
            FilterLogic::Or,
        );
        let compiled = compile(Some(&raw), Some(&f), 3).unwrap();
        assert_eq!(
            compiled.where_clause(),
            " WHERE (lang = 'en') AND (\"status\" = $3 OR \"stars\" > $4)"
        );
        assert_eq!(compiled.values().len(), 2);
        assert_eq!(compiled.next_index(), 5);
    }

    #[test]
    fn in_operator_expands_one_placeholder_per_element() {
        let f = filter(
            vec![condition("region", "IN", Some(json!(["eu", "us", "apac"])))],
            FilterLogic::And,
        );
        let compiled = compile(None, Some(&f), 1).unwrap();
        assert_eq!(
            compiled.where_clause(),
            " WHERE (\"region\" IN ($1, $2, $3))"
        );
        assert_eq!(compiled.values().len(), 3);
        assert_eq!(compiled.next_index(), 4);
    }

    #[test]
    fn in_operator_rejects_empty_and_non_list_values() {
        let empty = filter(
            vec![condition("region", "IN", Some(json!([])))],
            FilterLogic::And,
        );
        assert!(compile(None, Some(&empty), 1).is_err());

        let scalar = filter(
            vec![condition("region", "NOT IN", Some(json!("eu")))],
            FilterLogic::And,
        );
        assert!(compile(None, Some(&scalar), 1).is_err());
    }

    #[test]
    fn null_operators_bind_nothing() {
        let f = filter(
            vec![
                condition("deleted_at", "IS NULL", None),
                condition("reviewed_at", "is not null", None),
            ],
            FilterLogic::And,
        );
        let compiled = compile(None, Some(&f), 5).unwrap();
        assert_eq!(
            compiled.where_clause(),
            " WHERE (\"deleted_at\" IS NULL AND \"reviewed_at\" IS NOT NULL)"
        );
        assert!(compiled.values().is_empty());
        assert_eq!(compiled.next_index(), 5);
    }

    #[test]
    fn operators_are_case_insensitive() {
        let f = filter(
            vec![condition("title", "ilike", Some(json!("%rust%")))],
            FilterLogic::And,
        );
        let compiled = compile(None, Some(&f), 1).unwrap();
        assert_eq!(compiled.where_clause(), " WHERE (\"title\" ILIKE $1)");
    }

    #[test]
    fn unknown_operators_are_rejected() {
        let f = filter(
            vec![condition("stars", "BETWEEN", Some(json!(1)))],
            FilterLogic::And,
        );
        let err = compile(None, Some(&f), 1).unwrap_err();
        assert!(matches!(err, AppError::UnsupportedOperator { .. }));
    }

    #[test]
    fn scalar_operators_reject_missing_and_null_values() {
        let missing = filter(vec![condition("stars", "=", None)], FilterLogic::And);
        assert!(compile(None, Some(&missing), 1).is_err());

        let null = filter(
            vec![condition("stars", "=", Some(json!(null)))],
            FilterLogic::And,
        );
        assert!(compile(None, Some(&null), 1).is_err());
    }

    #[test]
    fn columns_are_quoted_with_dots_preserved() {
        let f = filter(
            vec![condition("meta.lang", "=", Some(json!("en")))],
            FilterLogic::And,
        );
        let compiled = compile(None, Some(&f), 1).unwrap();
        assert_eq!(compiled.where_clause(), " WHERE (\"meta.lang\" = $1)");

        let quoted = filter(
            vec![condition("we\"ird", "=", Some(json!(1)))],
            FilterLogic::And,
        );
        let compiled = compile(None, Some(&quoted), 1).unwrap();
        assert!(compiled.where_clause().contains("\"we\"\"ird\""));
    }

    #[test]
    fn placeholders_increase_strictly_from_start_index() {
        let f = filter(
            vec![
                condition("a", "=", Some(json!(1))),
                condition("b", "IN", Some(json!([1, 2]))),
                condition("c", "!=", Some(json!("x"))),
            ],
            FilterLogic::And,
        );
        let compiled = compile(None, Some(&f), 7).unwrap();
        let clause = compiled.where_clause();
        for (i, expected) in (7..=10).enumerate() {
            assert!(
                clause.contains(&format!("${expected}")),
                "missing ${expected} in {clause} (position {i})"
            );
        }
        // argument count equals highest placeholder minus start plus one
        assert_eq!(compiled.values().len(), 10 - 7 + 1);
        assert_eq!(compiled.next_index(), 11);
    }

    #[test]
    fn structured_config_filter_compiles_like_request_filter() {
        let config = ConfigFilter::Structured(filter(
            vec![condition("tenant", "=", Some(json!("acme")))],
            FilterLogic::And,
        ));
        let compiled = compile(Some(&config), None, 3).unwrap();
        assert_eq!(compiled.where_clause(), " WHERE (\"tenant\" = $3)");
        assert_eq!(compiled.values().len(), 1);
    }
}
