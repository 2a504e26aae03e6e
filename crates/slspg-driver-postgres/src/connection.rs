//! PostgreSQL client implementation

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::BytesMut;
use slspg_core::{PgClient, QueryResult, Result, Row, SlsError, StatementResult, Value};
use tokio::sync::Mutex;
use tokio_postgres::types::{FromSql, IsNull, ToSql, Type};
use tokio_postgres::{Client, Row as PgRow, Statement};

pub(crate) fn format_postgres_error(error: &tokio_postgres::Error) -> String {
    let Some(db_error) = error.as_db_error() else {
        return error.to_string();
    };

    let mut message = db_error.message().to_string();

    if let Some(detail) = db_error.detail() {
        if !detail.trim().is_empty() {
            message.push_str(&format!(" (detail: {})", detail));
        }
    }

    if let Some(hint) = db_error.hint() {
        if !hint.trim().is_empty() {
            message.push_str(&format!(" (hint: {})", hint));
        }
    }

    format!("{} (code: {})", message, db_error.code().code())
}

/// An established tokio-postgres client
///
/// Statements run one at a time. Closing drops the underlying client, which
/// ends the session and the background connection task.
pub struct PostgresClient {
    client: Mutex<Option<Client>>,
    closed: AtomicBool,
}

impl PostgresClient {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            client: Mutex::new(Some(client)),
            closed: AtomicBool::new(false),
        }
    }

    /// Backend process id of this session
    pub async fn backend_pid(&self) -> Result<i32> {
        self.query("SELECT pg_backend_pid()", &[])
            .await?
            .scalar()
            .and_then(Value::as_i64)
            .and_then(|pid| i32::try_from(pid).ok())
            .ok_or_else(|| SlsError::UnexpectedResult("pg_backend_pid returned no pid".into()))
    }

    async fn prepare(client: &Client, sql: &str) -> Result<Statement> {
        client.prepare(sql).await.map_err(|e| {
            let message = format_postgres_error(&e);
            SlsError::Query(format!("Failed to prepare statement: {}", message))
        })
    }
}

fn bind(statement: &Statement, params: &[Value]) -> Result<Vec<PgValue>> {
    let param_types = statement.params();
    params
        .iter()
        .enumerate()
        .map(|(i, value)| match param_types.get(i) {
            Some(target_type) => PgValue::from_value_for_type(value, target_type)
                .map_err(|e| SlsError::Validation(format!("parameter ${}: {}", i + 1, e))),
            None => PgValue::from_value(value)
                .map_err(|e| SlsError::Validation(format!("parameter ${}: {}", i + 1, e))),
        })
        .collect()
}

#[async_trait]
impl PgClient for PostgresClient {
    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let start_time = std::time::Instant::now();

        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(SlsError::NotConnected)?;

        let statement = Self::prepare(client, sql).await?;
        let pg_params = bind(&statement, params)?;
        let param_refs: Vec<&(dyn ToSql + Sync)> =
            pg_params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        let pg_rows = client.query(&statement, &param_refs).await.map_err(|e| {
            let message = format_postgres_error(&e);
            SlsError::Query(format!("Failed to execute query: {}", message))
        })?;

        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect();

        let rows = pg_rows
            .iter()
            .map(|pg_row| {
                let values = (0..columns.len())
                    .map(|idx| postgres_to_value(pg_row, idx))
                    .collect();
                Row::new(columns.clone(), values)
            })
            .collect::<Vec<_>>();

        let execution_time_ms = start_time.elapsed().as_millis() as u64;
        tracing::debug!(row_count = rows.len(), execution_time_ms, "query executed");

        Ok(QueryResult {
            columns,
            rows,
            execution_time_ms,
        })
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(SlsError::NotConnected)?;

        let statement = Self::prepare(client, sql).await?;
        let pg_params = bind(&statement, params)?;
        let param_refs: Vec<&(dyn ToSql + Sync)> =
            pg_params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        let affected_rows = client.execute(&statement, &param_refs).await.map_err(|e| {
            let message = format_postgres_error(&e);
            SlsError::Query(format!("Failed to execute statement: {}", message))
        })?;

        tracing::debug!(affected_rows, "statement executed");
        Ok(StatementResult { affected_rows })
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.client.lock().await.take().is_some() {
            tracing::debug!("closing PostgreSQL client");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return true;
        }
        // A busy client is in use, so it cannot have been closed locally
        match self.client.try_lock() {
            Ok(guard) => guard.as_ref().is_none_or(Client::is_closed),
            Err(_) => false,
        }
    }
}

/// Owned parameter value bound to a prepared statement
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PgValue {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Int32Array(Vec<Option<i32>>),
    Int64Array(Vec<Option<i64>>),
    TextArray(Vec<Option<String>>),
}

impl PgValue {
    /// Convert a `Value` into the variant matching the statement's parameter
    /// type, so integers are written with the width the server expects.
    ///
    /// Integers that do not fit the target width are rejected rather than
    /// truncated.
    pub(crate) fn from_value_for_type(
        value: &Value,
        target_type: &Type,
    ) -> std::result::Result<Self, String> {
        let converted = match value {
            Value::Null => PgValue::Null,
            Value::Bool(v) => PgValue::Bool(*v),
            Value::Int16(v) => Self::coerce_int(i64::from(*v), target_type)?,
            Value::Int32(v) => Self::coerce_int(i64::from(*v), target_type)?,
            Value::Int64(v) => Self::coerce_int(*v, target_type)?,
            Value::Float32(v) => match *target_type {
                Type::FLOAT8 => PgValue::Float64(f64::from(*v)),
                _ => PgValue::Float32(*v),
            },
            Value::Float64(v) => match *target_type {
                Type::FLOAT4 => PgValue::Float32(*v as f32),
                _ => PgValue::Float64(*v),
            },
            Value::String(v) => match *target_type {
                Type::JSON | Type::JSONB => serde_json::from_str(v)
                    .map(PgValue::Json)
                    .unwrap_or_else(|_| PgValue::String(v.clone())),
                _ => PgValue::String(v.clone()),
            },
            Value::Bytes(v) => PgValue::Bytes(v.clone()),
            Value::Json(v) => PgValue::Json(v.clone()),
            Value::Array(items) => Self::coerce_array(items, target_type)?,
        };
        Ok(converted)
    }

    /// Used when the statement reports fewer parameters than were given.
    pub(crate) fn from_value(value: &Value) -> std::result::Result<Self, String> {
        let converted = match value {
            Value::Null => PgValue::Null,
            Value::Bool(v) => PgValue::Bool(*v),
            Value::Int16(v) => PgValue::Int16(*v),
            Value::Int32(v) => PgValue::Int32(*v),
            Value::Int64(v) => PgValue::Int64(*v),
            Value::Float32(v) => PgValue::Float32(*v),
            Value::Float64(v) => PgValue::Float64(*v),
            Value::String(v) => PgValue::String(v.clone()),
            Value::Bytes(v) => PgValue::Bytes(v.clone()),
            Value::Json(v) => PgValue::Json(v.clone()),
            Value::Array(items) => Self::coerce_array(items, &Type::TEXT_ARRAY)?,
        };
        Ok(converted)
    }

    fn coerce_int(value: i64, target_type: &Type) -> std::result::Result<Self, String> {
        match *target_type {
            Type::INT2 => i16::try_from(value)
                .map(PgValue::Int16)
                .map_err(|_| format!("{} is out of range for int2", value)),
            Type::INT4 => i32::try_from(value)
                .map(PgValue::Int32)
                .map_err(|_| format!("{} is out of range for int4", value)),
            Type::FLOAT8 => Ok(PgValue::Float64(value as f64)),
            _ => Ok(PgValue::Int64(value)),
        }
    }

    fn coerce_array(items: &[Value], target_type: &Type) -> std::result::Result<Self, String> {
        match *target_type {
            Type::INT4_ARRAY => items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    array_int(item, i)?
                        .map(|v| {
                            i32::try_from(v).map_err(|_| {
                                format!("element {} ({}) is out of range for int4", i, v)
                            })
                        })
                        .transpose()
                })
                .collect::<std::result::Result<_, _>>()
                .map(PgValue::Int32Array),
            Type::INT8_ARRAY => items
                .iter()
                .enumerate()
                .map(|(i, item)| array_int(item, i))
                .collect::<std::result::Result<_, _>>()
                .map(PgValue::Int64Array),
            _ => items
                .iter()
                .enumerate()
                .map(|(i, item)| match item {
                    Value::Null => Ok(None),
                    Value::Array(_) | Value::Bytes(_) => {
                        Err(format!("element {} cannot be bound as text", i))
                    }
                    other => Ok(Some(other.to_string())),
                })
                .collect::<std::result::Result<_, _>>()
                .map(PgValue::TextArray),
        }
    }
}

/// Integer array element; NULL stays NULL, anything non-integer is an error.
fn array_int(item: &Value, index: usize) -> std::result::Result<Option<i64>, String> {
    if item.is_null() {
        return Ok(None);
    }
    item.as_i64()
        .map(Some)
        .ok_or_else(|| format!("element {} ({}) is not an integer", index, item))
}

impl ToSql for PgValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            PgValue::Null => Ok(IsNull::Yes),
            PgValue::Bool(v) => v.to_sql(ty, out),
            PgValue::Int16(v) => v.to_sql(ty, out),
            PgValue::Int32(v) => v.to_sql(ty, out),
            PgValue::Int64(v) => v.to_sql(ty, out),
            PgValue::Float32(v) => v.to_sql(ty, out),
            PgValue::Float64(v) => v.to_sql(ty, out),
            PgValue::String(v) => v.to_sql(ty, out),
            PgValue::Bytes(v) => v.to_sql(ty, out),
            PgValue::Json(v) => v.to_sql(ty, out),
            PgValue::Int32Array(v) => v.to_sql(ty, out),
            PgValue::Int64Array(v) => v.to_sql(ty, out),
            PgValue::TextArray(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    postgres_types::to_sql_checked!();
}

/// Raw column payload for types without a dedicated conversion
struct RawColumn(Vec<u8>);

impl<'a> FromSql<'a> for RawColumn {
    fn from_sql(
        _: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(Self(raw.to_vec()))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

fn get<'a, T: FromSql<'a>>(row: &'a PgRow, idx: usize) -> Option<T> {
    row.try_get::<_, Option<T>>(idx).ok().flatten()
}

/// Convert one column of a result row into a `Value`.
///
/// Unsupported types come back as text when their payload is UTF-8 and as
/// bytes otherwise; cast in SQL for anything more specific.
pub(crate) fn postgres_to_value(row: &PgRow, idx: usize) -> Value {
    let ty = row.columns()[idx].type_();

    let value = match *ty {
        Type::BOOL => get(row, idx).map(Value::Bool),
        Type::INT2 => get(row, idx).map(Value::Int16),
        Type::INT4 => get(row, idx).map(Value::Int32),
        Type::INT8 => get(row, idx).map(Value::Int64),
        Type::OID => get::<u32>(row, idx).map(|v| Value::Int64(i64::from(v))),
        Type::FLOAT4 => get(row, idx).map(Value::Float32),
        Type::FLOAT8 => get(row, idx).map(Value::Float64),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => get(row, idx).map(Value::String),
        Type::BYTEA => get(row, idx).map(Value::Bytes),
        Type::JSON | Type::JSONB => get(row, idx).map(Value::Json),
        Type::INT4_ARRAY => get::<Vec<i32>>(row, idx)
            .map(|arr| Value::Array(arr.into_iter().map(Value::Int32).collect())),
        Type::INT8_ARRAY => get::<Vec<i64>>(row, idx)
            .map(|arr| Value::Array(arr.into_iter().map(Value::Int64).collect())),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => get::<Vec<String>>(row, idx)
            .map(|arr| Value::Array(arr.into_iter().map(Value::String).collect())),
        _ => get::<RawColumn>(row, idx).map(|raw| match String::from_utf8(raw.0) {
            Ok(text) => Value::String(text),
            Err(e) => Value::Bytes(e.into_bytes()),
        }),
    };

    value.unwrap_or(Value::Null)
}
