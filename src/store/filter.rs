//! Metadata filter language for similarity search.
//!
//! Filters express equality, numeric ranges (`$gte`/`$lte`), substring
//! containment (`$contains`), and conjunction (`$and`) over chunk
//! metadata. Known fields compile to indexed columns; anything else falls
//! back to `json_extract` over the stored metadata document. A filter that
//! matches nothing yields an empty result set, never an error.

use serde_json::Value;

use crate::types::{Result, StashError};

/// A metadata predicate applied during search.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataFilter {
    Eq(String, Value),
    Gte(String, Value),
    Lte(String, Value),
    Contains(String, String),
    And(Vec<MetadataFilter>),
}

impl MetadataFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        MetadataFilter::Eq(field.into(), value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        MetadataFilter::Gte(field.into(), value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        MetadataFilter::Lte(field.into(), value.into())
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        MetadataFilter::Contains(field.into(), needle.into())
    }

    pub fn and(filters: Vec<MetadataFilter>) -> Self {
        MetadataFilter::And(filters)
    }

    /// Parse the JSON filter syntax:
    /// `{"file_type": ".pdf"}`, `{"structural_info_tables_count": {"$gte": 1}}`,
    /// `{"$and": [f1, f2]}`. An object with several keys is an implicit
    /// conjunction.
    pub fn from_value(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| StashError::Input("filter must be a JSON object".into()))?;
        if object.is_empty() {
            return Err(StashError::Input("filter object is empty".into()));
        }

        let mut clauses = Vec::new();
        for (key, val) in object {
            if key == "$and" {
                let list = val.as_array().ok_or_else(|| {
                    StashError::Input("$and expects an array of filters".into())
                })?;
                let mut parsed = Vec::with_capacity(list.len());
                for entry in list {
                    parsed.push(MetadataFilter::from_value(entry)?);
                }
                clauses.push(MetadataFilter::And(parsed));
                continue;
            }
            if key.starts_with('$') {
                return Err(StashError::Input(format!("unknown operator '{key}'")));
            }

            match val {
                Value::Object(ops) => {
                    for (op, operand) in ops {
                        match op.as_str() {
                            "$gte" => {
                                clauses.push(MetadataFilter::Gte(key.clone(), operand.clone()))
                            }
                            "$lte" => {
                                clauses.push(MetadataFilter::Lte(key.clone(), operand.clone()))
                            }
                            "$contains" => {
                                let needle = operand.as_str().ok_or_else(|| {
                                    StashError::Input("$contains expects a string".into())
                                })?;
                                clauses.push(MetadataFilter::Contains(
                                    key.clone(),
                                    needle.to_string(),
                                ));
                            }
                            other => {
                                return Err(StashError::Input(format!(
                                    "unknown operator '{other}' for field '{key}'"
                                )))
                            }
                        }
                    }
                }
                scalar => clauses.push(MetadataFilter::Eq(key.clone(), scalar.clone())),
            }
        }

        match clauses.len() {
            0 => Err(StashError::Input("filter carried no conditions".into())),
            1 => Ok(clauses.pop().expect("one clause")),
            _ => Ok(MetadataFilter::And(clauses)),
        }
    }

    /// Serialize back to the JSON syntax, for echoing in answers.
    pub fn to_value(&self) -> Value {
        match self {
            MetadataFilter::Eq(field, value) => serde_json::json!({ field: value }),
            MetadataFilter::Gte(field, value) => serde_json::json!({ field: { "$gte": value } }),
            MetadataFilter::Lte(field, value) => serde_json::json!({ field: { "$lte": value } }),
            MetadataFilter::Contains(field, needle) => {
                serde_json::json!({ field: { "$contains": needle } })
            }
            MetadataFilter::And(filters) => {
                serde_json::json!({ "$and": filters.iter().map(Self::to_value).collect::<Vec<_>>() })
            }
        }
    }

    /// Append this predicate as SQL over the `chunks` alias `c`.
    pub(crate) fn push_sql(
        &self,
        sql: &mut String,
        params: &mut Vec<rusqlite::types::Value>,
    ) -> Result<()> {
        match self {
            MetadataFilter::Eq(field, value) => {
                sql.push_str(&column_expr(field)?);
                sql.push_str(" = ?");
                params.push(to_sql_value(value)?);
            }
            MetadataFilter::Gte(field, value) => {
                sql.push_str(&column_expr(field)?);
                sql.push_str(" >= ?");
                params.push(to_sql_value(value)?);
            }
            MetadataFilter::Lte(field, value) => {
                sql.push_str(&column_expr(field)?);
                sql.push_str(" <= ?");
                params.push(to_sql_value(value)?);
            }
            MetadataFilter::Contains(field, needle) => {
                sql.push_str("instr(");
                sql.push_str(&column_expr(field)?);
                sql.push_str(", ?) > 0");
                params.push(rusqlite::types::Value::Text(needle.clone()));
            }
            MetadataFilter::And(filters) => {
                if filters.is_empty() {
                    sql.push_str("1 = 1");
                    return Ok(());
                }
                sql.push('(');
                for (i, filter) in filters.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(" AND ");
                    }
                    filter.push_sql(sql, params)?;
                }
                sql.push(')');
            }
        }
        Ok(())
    }
}

/// Map a filter field to its SQL expression. Known fields hit dedicated
/// columns; the rest go through the metadata JSON document.
fn column_expr(field: &str) -> Result<String> {
    if !field
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
        || field.is_empty()
    {
        return Err(StashError::Input(format!(
            "invalid filter field name '{field}'"
        )));
    }
    let expr = match field {
        "source" => "c.source".to_string(),
        "file_path" => "c.file_path".to_string(),
        "file_type" => "c.file_type".to_string(),
        "processing_method" => "c.processing_method".to_string(),
        "processed_date" => "c.processed_date".to_string(),
        "chunk_index" => "c.chunk_index".to_string(),
        "chunk_total" => "c.chunk_total".to_string(),
        "oversized" => "c.oversized".to_string(),
        "structural_info_titles_count" => "c.titles_count".to_string(),
        "structural_info_tables_count" => "c.tables_count".to_string(),
        "structural_info_lists_count" => "c.lists_count".to_string(),
        other => format!("json_extract(c.metadata, '$.{other}')"),
    };
    Ok(expr)
}

fn to_sql_value(value: &Value) -> Result<rusqlite::types::Value> {
    match value {
        Value::String(s) => Ok(rusqlite::types::Value::Text(s.clone())),
        Value::Bool(b) => Ok(rusqlite::types::Value::Integer(i64::from(*b))),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(rusqlite::types::Value::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(rusqlite::types::Value::Real(f))
            } else {
                Err(StashError::Input(format!("unrepresentable number {n}")))
            }
        }
        Value::Null => Ok(rusqlite::types::Value::Null),
        other => Err(StashError::Input(format!(
            "filter values must be scalars, got {other}"
        ))),
    }
}
