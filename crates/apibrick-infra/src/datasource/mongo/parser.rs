//! Condition-list query configs to MongoDB filters.

use apibrick_core::datasource::source::QueryParser;
use apibrick_types::ValueMap;
use apibrick_types::datasource::DataSourceError;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{Bson, Document, doc};
use serde_json::Value;

/// A parsed document query.
#[derive(Debug, Clone, PartialEq)]
pub struct MongoQuery {
    /// Logical collection name, before tenant namespacing.
    pub collection: String,
    pub filter: Document,
    /// `None` means "first matching document".
    pub limit: Option<i64>,
}

/// Builds filters from
/// `{collection, conditions: [{field, operator, value}], limit}`.
///
/// Operators (case-insensitive): `eq`/`equals`, `ne`/`not_equals`,
/// `gt`/`greater_than`, `gte`/`greater_than_or_equal`, `lt`/`less_than`,
/// `lte`/`less_than_or_equal`, `in`, `nin`/`not_in`, and `like`/`contains`
/// (case-insensitive regex). Anything else is treated as equality.
#[derive(Debug, Default, Clone, Copy)]
pub struct MongoQueryParser;

impl QueryParser for MongoQueryParser {
    type Query = MongoQuery;

    fn parse(&self, query_config: &ValueMap) -> Result<MongoQuery, DataSourceError> {
        let collection = query_config
            .get("collection")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| DataSourceError::InvalidQuery("Collection name is required".into()))?;

        let conditions = match query_config.get("conditions") {
            None | Some(Value::Null) => &[][..],
            Some(Value::Array(items)) => items.as_slice(),
            Some(_) => {
                return Err(DataSourceError::InvalidQuery("conditions must be an array".into()));
            }
        };

        let limit = match query_config.get("limit") {
            None | Some(Value::Null) => None,
            Some(value) => match value.as_i64() {
                Some(n) if n > 0 => Some(n),
                _ => {
                    return Err(DataSourceError::InvalidQuery(format!(
                        "limit must be a positive integer, got {value}"
                    )));
                }
            },
        };

        let mut filter = Document::new();
        for condition in conditions {
            let Some(condition) = condition.as_object() else {
                return Err(DataSourceError::InvalidQuery("each condition must be an object".into()));
            };
            let field = condition.get("field").and_then(Value::as_str);
            let operator = condition.get("operator").and_then(Value::as_str);
            let (Some(field), Some(operator)) = (field, operator) else {
                tracing::debug!("Skipping condition without field or operator");
                continue;
            };
            let value = condition.get("value").cloned().unwrap_or(Value::Null);
            add_condition(&mut filter, field, operator, &value)?;
        }

        let query = MongoQuery {
            collection: collection.to_string(),
            filter,
            limit,
        };
        self.validate(&query)?;
        Ok(query)
    }

    fn validate(&self, query: &MongoQuery) -> Result<(), DataSourceError> {
        if query.collection.starts_with('$') || query.collection.contains('\0') {
            return Err(DataSourceError::InvalidQuery(format!(
                "invalid collection name: {}",
                query.collection
            )));
        }
        for field in query.filter.keys() {
            if field.is_empty() || field.starts_with('$') {
                return Err(DataSourceError::InvalidQuery(format!(
                    "invalid field name: '{field}'"
                )));
            }
        }
        Ok(())
    }
}

fn add_condition(
    filter: &mut Document,
    field: &str,
    operator: &str,
    value: &Value,
) -> Result<(), DataSourceError> {
    reject_operator_keys(value)?;
    let bson = to_filter_value(field, value)?;

    let clause = match operator.to_ascii_lowercase().as_str() {
        "eq" | "equals" => {
            filter.insert(field, bson);
            return Ok(());
        }
        "ne" | "not_equals" => doc! { "$ne": bson },
        "gt" | "greater_than" => doc! { "$gt": bson },
        "gte" | "greater_than_or_equal" => doc! { "$gte": bson },
        "lt" | "less_than" => doc! { "$lt": bson },
        "lte" | "less_than_or_equal" => doc! { "$lte": bson },
        "in" => doc! { "$in": as_array(bson) },
        "nin" | "not_in" => doc! { "$nin": as_array(bson) },
        "like" | "contains" => doc! { "$regex": bson, "$options": "i" },
        other => {
            tracing::debug!(operator = other, field, "Unknown operator, using equality");
            filter.insert(field, bson);
            return Ok(());
        }
    };

    // Range clauses on the same field merge, e.g. gte + lt.
    match filter.get_mut(field) {
        Some(Bson::Document(existing)) if existing.keys().all(|k| k.starts_with('$')) => {
            for (op, operand) in clause {
                existing.insert(op, operand);
            }
        }
        _ => {
            filter.insert(field, clause);
        }
    }
    Ok(())
}

/// Values are data, never operators.
fn reject_operator_keys(value: &Value) -> Result<(), DataSourceError> {
    match value {
        Value::Object(map) => {
            if let Some(key) = map.keys().find(|k| k.starts_with('$')) {
                return Err(DataSourceError::InvalidQuery(format!(
                    "operator key '{key}' is not allowed in condition values"
                )));
            }
            map.values().try_for_each(reject_operator_keys)
        }
        Value::Array(items) => items.iter().try_for_each(reject_operator_keys),
        _ => Ok(()),
    }
}

/// JSON to BSON; 24-hex strings compared against `_id` become ObjectIds.
fn to_filter_value(field: &str, value: &Value) -> Result<Bson, DataSourceError> {
    if field == "_id" {
        if let Some(oid) = value.as_str().and_then(|s| ObjectId::parse_str(s).ok()) {
            return Ok(Bson::ObjectId(oid));
        }
    }
    mongodb::bson::to_bson(value).map_err(|e| DataSourceError::InvalidQuery(e.to_string()))
}

fn as_array(value: Bson) -> Bson {
    match value {
        Bson::Array(_) => value,
        single => Bson::Array(vec![single]),
    }
}
