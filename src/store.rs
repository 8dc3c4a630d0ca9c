//! Connection pool setup, database bootstrap, and statement execution with row decoding.

use crate::config::{EntityDescriptor, ScalarType, Settings};
use crate::error::AppError;
use crate::sql::{QueryBuf, DATETIME_FORMAT, DATE_FORMAT};
use crate::service::Values;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions, PgRow, Postgres};
use sqlx::query::Query;
use sqlx::{ConnectOptions, PgConnection, PgPool, Row};
use std::str::FromStr;

fn connect_options(settings: &Settings) -> Result<PgConnectOptions, AppError> {
    let opts = PgConnectOptions::from_str(&settings.database_url)
        .map_err(|e| AppError::BadRequest(format!("invalid DATABASE_URL: {}", e)))?
        .application_name(&settings.application_name)
        .options([
            ("statement_timeout", settings.statement_timeout_ms.to_string()),
            (
                "idle_in_transaction_session_timeout",
                settings.idle_in_transaction_timeout_ms.to_string(),
            ),
        ]);
    Ok(opts)
}

/// Pool with per-session timeouts and application name applied on connect.
pub async fn connect(settings: &Settings) -> Result<PgPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect_with(connect_options(settings)?)
        .await?;
    tracing::info!(
        max_connections = settings.max_connections,
        application_name = %settings.application_name,
        "database pool ready"
    );
    Ok(pool)
}

/// Pool that connects on first use.
pub fn connect_lazy(settings: &Settings) -> Result<PgPool, AppError> {
    Ok(PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect_lazy_with(connect_options(settings)?))
}

/// Ensure the database in `database_url` exists; create it if not. Connects to the
/// default `postgres` database to run CREATE DATABASE. Call before creating the main pool.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), AppError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = PgConnectOptions::from_str(&admin_url)
        .map_err(|e| AppError::BadRequest(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        sqlx::query(&format!("CREATE DATABASE {}", crate::sql::quoted(&db_name)))
            .execute(&mut conn)
            .await?;
        tracing::info!(database = %db_name, "database created");
    }
    Ok(())
}

/// Split a connection URL into (URL of the `postgres` admin database, target database name).
fn parse_db_name_from_url(url: &str) -> Result<(String, String), AppError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| AppError::BadRequest("DATABASE_URL: no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let mut parts = path_and_query.splitn(2, '?');
    let db_name = parts.next().unwrap_or("").trim();
    let query = parts.next().map(|q| format!("?{}", q)).unwrap_or_default();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres{}", base, query), db_name.to_string()))
}

fn bind_all(q: &QueryBuf) -> Query<'_, Postgres, PgArguments> {
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(p.clone());
    }
    query
}

/// Decode the entity's selectable columns present in `row`.
pub fn decode_row(entity: &EntityDescriptor, row: &PgRow) -> Result<Values, AppError> {
    let mut map = Values::new();
    for col in entity.selectable_columns() {
        let name = col.name.as_str();
        if row.try_column(name).is_err() {
            continue;
        }
        let v = match col.scalar {
            ScalarType::Text => row.try_get::<Option<String>, _>(name)?.map(Value::String),
            ScalarType::Integer => row.try_get::<Option<i64>, _>(name)?.map(|n| Value::Number(n.into())),
            ScalarType::Float => row
                .try_get::<Option<f64>, _>(name)?
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            ScalarType::Boolean => row.try_get::<Option<bool>, _>(name)?.map(Value::Bool),
            ScalarType::Date => row
                .try_get::<Option<chrono::NaiveDate>, _>(name)?
                .map(|d| Value::String(d.format(DATE_FORMAT).to_string())),
            ScalarType::DateTime => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(name)?
                .map(|d| Value::String(d.format(DATETIME_FORMAT).to_string())),
            ScalarType::Json => row.try_get::<Option<Value>, _>(name)?,
            ScalarType::SearchVector => continue,
        };
        map.insert(name.to_string(), v.unwrap_or(Value::Null));
    }
    Ok(map)
}

pub async fn fetch_all(
    conn: &mut PgConnection,
    entity: &EntityDescriptor,
    q: &QueryBuf,
) -> Result<Vec<Values>, AppError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let rows = bind_all(q).fetch_all(&mut *conn).await?;
    rows.iter().map(|r| decode_row(entity, r)).collect()
}

pub async fn fetch_optional(
    conn: &mut PgConnection,
    entity: &EntityDescriptor,
    q: &QueryBuf,
) -> Result<Option<Values>, AppError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let row = bind_all(q).fetch_optional(&mut *conn).await?;
    row.map(|r| decode_row(entity, &r)).transpose()
}

/// Single `count` column.
pub async fn fetch_count(conn: &mut PgConnection, q: &QueryBuf) -> Result<u64, AppError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let row = bind_all(q).fetch_one(&mut *conn).await?;
    let n: i64 = row.try_get("count")?;
    Ok(n.max(0) as u64)
}

/// Single `exists` column.
pub async fn fetch_exists(conn: &mut PgConnection, q: &QueryBuf) -> Result<bool, AppError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let row = bind_all(q).fetch_one(&mut *conn).await?;
    Ok(row.try_get("exists")?)
}

/// Run a statement; returns rows affected.
pub async fn execute(conn: &mut PgConnection, q: &QueryBuf) -> Result<u64, AppError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "execute");
    let done = bind_all(q).execute(&mut *conn).await?;
    Ok(done.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_url_keeps_query_string() {
        let (admin, db) = parse_db_name_from_url("postgres://u:p@localhost:5432/partners?sslmode=disable").unwrap();
        assert_eq!(admin, "postgres://u:p@localhost:5432/postgres?sslmode=disable");
        assert_eq!(db, "partners");
    }

    #[test]
    fn connect_options_accept_settings() {
        let settings = Settings {
            database_url: "postgres://localhost/partners".into(),
            ..Settings::default()
        };
        assert!(connect_options(&settings).is_ok());
        let bad = Settings {
            database_url: "not a url".into(),
            ..Settings::default()
        };
        assert!(matches!(connect_options(&bad), Err(AppError::BadRequest(_))));
    }
}
