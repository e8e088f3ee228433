//! Shared relational plumbing for the MySQL and SQLite backends.
//!
//! [`SqlQueryParser`] screens `{sql, params}` query configs down to a single
//! parameterized read statement. [`SqlValue`] is the backend-neutral cell
//! value each backend decodes its rows into, and [`RelationalConverter`]
//! turns those cells into JSON-safe primitives.

use std::str::FromStr;
use std::sync::LazyLock;

use apibrick_core::datasource::source::{DataConverter, QueryParser, apply_field_mapping};
use apibrick_types::ValueMap;
use apibrick_types::datasource::DataSourceError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Value, json};

static DANGEROUS_SQL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(DROP\s+TABLE|DROP\s+DATABASE|TRUNCATE|DELETE\s+FROM|UPDATE\s+.*SET|ALTER\s+TABLE|CREATE\s+TABLE|INSERT\s+INTO)",
    )
    .ok()
});

// ---------------------------------------------------------------------------
// Query parsing
// ---------------------------------------------------------------------------

/// A bind parameter, already narrowed to what both backends can encode.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlParam {
    /// Numbers that fit neither `i64` nor exactly `f64` are bound as text;
    /// arrays and objects are bound as their JSON encoding.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlParam::Null,
            Value::Bool(b) => SqlParam::Bool(*b),
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => SqlParam::Int(i),
                (None, Some(f)) if n.is_f64() => SqlParam::Float(f),
                _ => SqlParam::Text(n.to_string()),
            },
            Value::String(s) => SqlParam::Text(s.clone()),
            other => SqlParam::Text(other.to_string()),
        }
    }
}

/// A screened read statement with positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

/// String literal rules of the target backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    /// Backslash escapes the next character inside a literal.
    MySql,
    /// Backslash is an ordinary character; only doubled quotes escape.
    Sqlite,
}

/// Parser for `{sql, params}` query configs. `parameters` is accepted as an
/// alias of `params`.
#[derive(Debug, Clone, Copy)]
pub struct SqlQueryParser {
    dialect: SqlDialect,
}

impl SqlQueryParser {
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }
}

impl QueryParser for SqlQueryParser {
    type Query = SqlQuery;

    fn parse(&self, query_config: &ValueMap) -> Result<SqlQuery, DataSourceError> {
        let sql = query_config
            .get("sql")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DataSourceError::InvalidQuery("SQL query is required".into()))?;

        let params = match query_config.get("params").or_else(|| query_config.get("parameters")) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.iter().map(SqlParam::from_json).collect(),
            Some(_) => {
                return Err(DataSourceError::InvalidQuery("params must be an array".into()));
            }
        };

        let query = SqlQuery {
            sql: sql.to_string(),
            params,
        };
        self.validate(&query)?;
        Ok(query)
    }

    fn validate(&self, query: &SqlQuery) -> Result<(), DataSourceError> {
        let sql = query.sql.as_str();

        let leading = sql
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .trim_start_matches('(')
            .to_ascii_uppercase();
        if leading != "SELECT" && leading != "WITH" {
            return Err(DataSourceError::InvalidQuery(
                "Only SELECT queries are allowed".into(),
            ));
        }

        // Fails closed if the pattern could not be built.
        if DANGEROUS_SQL.as_ref().is_none_or(|re| re.is_match(sql)) {
            return Err(DataSourceError::InvalidQuery(
                "Dangerous SQL operation detected. Only SELECT queries are allowed for security reasons."
                    .into(),
            ));
        }

        if sql.contains("--") || sql.contains("/*") || sql.contains("*/") {
            return Err(DataSourceError::InvalidQuery(
                "SQL comments are not allowed for security reasons.".into(),
            ));
        }

        let scan = scan_unquoted(sql.strip_suffix(';').unwrap_or(sql), self.dialect);
        if scan.semicolons > 0 {
            return Err(DataSourceError::InvalidQuery(
                "Multiple SQL statements detected. Only single statement allowed.".into(),
            ));
        }
        if scan.placeholders != query.params.len() {
            return Err(DataSourceError::InvalidQuery(format!(
                "Parameter count mismatch: SQL has {} placeholders but {} parameters provided",
                scan.placeholders,
                query.params.len()
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Default, PartialEq)]
struct UnquotedScan {
    placeholders: usize,
    semicolons: usize,
}

/// Count `?` and `;` outside single-quoted, double-quoted and backquoted
/// literals. Doubled quotes inside a literal are escapes, and so is a
/// backslash under [`SqlDialect::MySql`].
fn scan_unquoted(sql: &str, dialect: SqlDialect) -> UnquotedScan {
    let mut scan = UnquotedScan::default();
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => {
                if chars.peek() == Some(&q) {
                    chars.next();
                } else {
                    quote = None;
                }
            }
            Some(_) => {
                if c == '\\' && dialect == SqlDialect::MySql {
                    chars.next();
                }
            }
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                '?' => scan.placeholders += 1,
                ';' => scan.semicolons += 1,
                _ => {}
            },
        }
    }

    scan
}

// ---------------------------------------------------------------------------
// Values and conversion
// ---------------------------------------------------------------------------

/// One decoded cell, independent of the backend it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Timestamp(DateTime<Utc>),
    Json(Value),
}

/// Converts [`SqlValue`] cells into JSON.
///
/// - Decimals with scale 0 become integers, or strings when they overflow
///   `i64`. Other decimals become floats when the float round-trips exactly,
///   strings otherwise.
/// - Dates, times and datetimes become ISO-8601 strings.
/// - Binary becomes base64.
#[derive(Debug, Default, Clone, Copy)]
pub struct RelationalConverter;

impl DataConverter for RelationalConverter {
    type Raw = SqlValue;

    fn convert(&self, raw: SqlValue) -> Value {
        match raw {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(b) => json!(b),
            SqlValue::Int(i) => json!(i),
            SqlValue::UInt(u) => json!(u),
            SqlValue::Float(f) => json!(f),
            SqlValue::Decimal(d) => convert_decimal(d),
            SqlValue::Text(s) => json!(s),
            SqlValue::Bytes(bytes) => json!(BASE64.encode(bytes)),
            SqlValue::Date(d) => json!(d.format("%Y-%m-%d").to_string()),
            SqlValue::Time(t) => json!(t.format("%H:%M:%S%.f").to_string()),
            SqlValue::DateTime(dt) => json!(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            SqlValue::Timestamp(ts) => json!(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            SqlValue::Json(v) => v,
        }
    }
}

fn convert_decimal(d: Decimal) -> Value {
    if d.scale() == 0 {
        return d.to_i64().map_or_else(|| json!(d.to_string()), |i| json!(i));
    }
    match d.to_f64() {
        Some(f) if Decimal::from_str(&f.to_string()).is_ok_and(|back| back == d) => json!(f),
        _ => json!(d.normalize().to_string()),
    }
}

impl RelationalConverter {
    pub fn convert_row(&self, row: Vec<(String, SqlValue)>) -> ValueMap {
        row.into_iter()
            .map(|(column, cell)| (column, self.convert(cell)))
            .collect()
    }

    /// Shape converted rows into the query result.
    ///
    /// A single row is returned as the (optionally mapped) record itself;
    /// any other count becomes `{data: [...], count: n}`.
    pub fn shape(&self, rows: Vec<Vec<(String, SqlValue)>>, mapping: Option<&ValueMap>) -> Value {
        let mut records: Vec<ValueMap> = rows
            .into_iter()
            .map(|row| apply_field_mapping(self.convert_row(row), mapping))
            .collect();

        if records.len() == 1 {
            return Value::Object(records.remove(0));
        }

        let count = records.len();
        json!({
            "data": records,
            "count": count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(value: Value) -> ValueMap {
        value.as_object().cloned().unwrap()
    }

    fn parse(value: Value) -> Result<SqlQuery, DataSourceError> {
        SqlQueryParser::new(SqlDialect::MySql).parse(&config(value))
    }

    fn rejection(value: Value) -> String {
        match parse(value) {
            Err(DataSourceError::InvalidQuery(msg)) => msg,
            other => panic!("expected InvalidQuery, got {other:?}"),
        }
    }

    #[test]
    fn parses_select_with_params() {
        let query = parse(json!({
            "sql": "  SELECT * FROM users WHERE id = ? AND name = ?  ",
            "params": [7, "Ada"]
        }))
        .unwrap();
        assert_eq!(query.sql, "SELECT * FROM users WHERE id = ? AND name = ?");
        assert_eq!(query.params, vec![SqlParam::Int(7), SqlParam::Text("Ada".into())]);
    }

    #[test]
    fn accepts_parameters_alias_and_cte() {
        let query = parse(json!({
            "sql": "WITH t AS (SELECT 1 AS x) SELECT x FROM t WHERE x = ?;",
            "parameters": [1]
        }))
        .unwrap();
        assert_eq!(query.params.len(), 1);
    }

    #[test]
    fn requires_sql() {
        assert_eq!(rejection(json!({"sql": "   "})), "SQL query is required");
        assert_eq!(rejection(json!({})), "SQL query is required");
    }

    #[test]
    fn rejects_writes() {
        assert_eq!(
            rejection(json!({"sql": "DELETE FROM users"})),
            "Only SELECT queries are allowed"
        );
        let msg = rejection(json!({"sql": "SELECT 1 FROM t WHERE x IN (SELECT 1); DROP TABLE t"}));
        assert!(msg.starts_with("Dangerous SQL operation detected"));
    }

    #[test]
    fn rejects_comments() {
        let msg = rejection(json!({"sql": "SELECT * FROM users -- trailing"}));
        assert_eq!(msg, "SQL comments are not allowed for security reasons.");
        assert!(parse(json!({"sql": "SELECT /* hint */ 1"})).is_err());
    }

    #[test]
    fn rejects_multiple_statements() {
        let msg = rejection(json!({"sql": "SELECT 1; SELECT 2"}));
        assert_eq!(msg, "Multiple SQL statements detected. Only single statement allowed.");
        assert!(parse(json!({"sql": "SELECT 1;"})).is_ok());
    }

    #[test]
    fn placeholder_count_ignores_literals() {
        let query = parse(json!({
            "sql": "SELECT * FROM t WHERE note = 'why?; really?' AND id = ?",
            "params": ["x"]
        }));
        assert!(query.is_ok());

        let msg = rejection(json!({"sql": "SELECT * FROM t WHERE a = ? AND b = ?", "params": [1]}));
        assert_eq!(
            msg,
            "Parameter count mismatch: SQL has 2 placeholders but 1 parameters provided"
        );
    }

    #[test]
    fn scan_handles_escaped_quotes() {
        let scan = scan_unquoted("SELECT 'it''s ?' , \"a?\" , `b?` , ?", SqlDialect::Sqlite);
        assert_eq!(scan, UnquotedScan { placeholders: 1, semicolons: 0 });
    }

    #[test]
    fn backslash_escapes_only_in_mysql() {
        let scan = scan_unquoted(r"SELECT 'it\'s', ?", SqlDialect::MySql);
        assert_eq!(scan, UnquotedScan { placeholders: 1, semicolons: 0 });

        // In SQLite the backslash is literal and the quote after it closes.
        let scan = scan_unquoted(r"SELECT '\' AS b, ? AS v", SqlDialect::Sqlite);
        assert_eq!(scan, UnquotedScan { placeholders: 1, semicolons: 0 });
    }

    #[test]
    fn sqlite_backslash_literal_keeps_placeholder_count() {
        let query = SqlQueryParser::new(SqlDialect::Sqlite)
            .parse(&config(json!({"sql": r"SELECT '\' AS b, ? AS v", "params": [1]})))
            .unwrap();
        assert_eq!(query.params, vec![SqlParam::Int(1)]);

        let err = SqlQueryParser::new(SqlDialect::Sqlite)
            .parse(&config(json!({"sql": r"SELECT '\'; SELECT 2"})))
            .unwrap_err();
        assert!(matches!(err, DataSourceError::InvalidQuery(ref m) if m.starts_with("Multiple SQL")));
    }

    #[test]
    fn params_must_be_array() {
        assert_eq!(
            rejection(json!({"sql": "SELECT 1", "params": "x"})),
            "params must be an array"
        );
    }

    #[test]
    fn param_narrowing() {
        assert_eq!(SqlParam::from_json(&json!(null)), SqlParam::Null);
        assert_eq!(SqlParam::from_json(&json!(1.5)), SqlParam::Float(1.5));
        assert_eq!(
            SqlParam::from_json(&json!(u64::MAX)),
            SqlParam::Text(u64::MAX.to_string())
        );
        assert_eq!(SqlParam::from_json(&json!([1, 2])), SqlParam::Text("[1,2]".into()));
    }

    #[test]
    fn decimal_conversion() {
        let c = RelationalConverter;
        assert_eq!(c.convert(SqlValue::Decimal(Decimal::from_str("42").unwrap())), json!(42));
        assert_eq!(c.convert(SqlValue::Decimal(Decimal::from_str("12.50").unwrap())), json!(12.5));
        assert_eq!(
            c.convert(SqlValue::Decimal(Decimal::from_str("99999999999999999999").unwrap())),
            json!("99999999999999999999")
        );
        assert_eq!(
            c.convert(SqlValue::Decimal(
                Decimal::from_str("0.1234567890123456789012345").unwrap()
            )),
            json!("0.1234567890123456789012345")
        );
    }

    #[test]
    fn temporal_and_binary_conversion() {
        let c = RelationalConverter;
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let dt = date.and_hms_opt(8, 5, 0).unwrap();
        assert_eq!(c.convert(SqlValue::Date(date)), json!("2024-03-09"));
        assert_eq!(c.convert(SqlValue::DateTime(dt)), json!("2024-03-09T08:05:00"));
        assert_eq!(
            c.convert(SqlValue::Time(NaiveTime::from_hms_opt(23, 59, 1).unwrap())),
            json!("23:59:01")
        );
        assert_eq!(
            c.convert(SqlValue::Timestamp(dt.and_utc())),
            json!("2024-03-09T08:05:00Z")
        );
        assert_eq!(c.convert(SqlValue::Bytes(b"hi".to_vec())), json!("aGk="));
        assert_eq!(c.convert(SqlValue::Json(json!({"a": 1}))), json!({"a": 1}));
    }

    #[test]
    fn shape_single_and_many_rows() {
        let c = RelationalConverter;
        let row = |id: i64| vec![("id".to_string(), SqlValue::Int(id)), ("name".to_string(), SqlValue::Null)];

        assert_eq!(c.shape(vec![row(1)], None), json!({"id": 1, "name": null}));
        assert_eq!(
            c.shape(vec![row(1), row(2)], None),
            json!({"data": [{"id": 1, "name": null}, {"id": 2, "name": null}], "count": 2})
        );
        assert_eq!(c.shape(vec![], None), json!({"data": [], "count": 0}));

        let mapping = config(json!({"userId": "id"}));
        assert_eq!(c.shape(vec![row(5)], Some(&mapping)), json!({"userId": 5}));
    }
}
