use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Client, NoTls, Row};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cfg::{DatabaseConfig, SslMode};
use crate::error::{SyncError, SyncResult};
use crate::health::ConnectionHealth;
use crate::snapshot::{CellValue, TableSnapshot};

/// Where table snapshots come from.
#[async_trait]
pub trait TableSource: Send + Sync {
    /// Schema the table names are resolved in.
    fn schema(&self) -> &str;

    async fn health(&self) -> ConnectionHealth;

    async fn connect(&mut self) -> SyncResult<()>;

    /// Case-sensitive lookup of `table` inside [`TableSource::schema`].
    async fn table_exists(&self, table: &str) -> SyncResult<bool>;

    /// Reads every row of `table`, ordered by its first column.
    async fn fetch_table(&self, table: &str) -> SyncResult<TableSnapshot>;

    /// Server version, current database and the tables in the schema.
    async fn server_info(&self) -> SyncResult<ServerInfo>;

    /// Column layout and row count of `table`.
    async fn describe_table(&self, table: &str) -> SyncResult<TableInfo>;

    async fn close(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub version: String,
    pub database: String,
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub columns: Vec<ColumnInfo>,
    pub row_count: i64,
}

/// Checks the table exists, then reads it in full.
///
/// An empty table comes back as `Ok` with zero rows so callers can tell it
/// apart from a failed read.
pub async fn read_table<S>(source: &S, table: &str) -> SyncResult<TableSnapshot>
where
    S: TableSource + ?Sized,
{
    info!("Downloading data from table '{}'", table);

    if !source.table_exists(table).await? {
        return Err(SyncError::NotFound {
            schema: source.schema().to_string(),
            table: table.to_string(),
        });
    }

    let snapshot = source.fetch_table(table).await?;
    if snapshot.is_empty() {
        info!("No data found in table '{}'", table);
    } else {
        info!(
            "Retrieved {} rows and {} columns from table '{}'",
            snapshot.row_count(),
            snapshot.column_count(),
            table
        );
    }
    Ok(snapshot)
}

/// Quotes an identifier for literal inclusion in SQL.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// PostgreSQL-backed [`TableSource`].
pub struct PgTableSource {
    config: DatabaseConfig,
    client: Option<Client>,
    connection_task: Option<JoinHandle<()>>,
}

impl PgTableSource {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            client: None,
            connection_task: None,
        }
    }

    fn client(&self) -> SyncResult<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| SyncError::Connection("database session is not open".to_string()))
    }

    fn pg_config(&self) -> tokio_postgres::Config {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.config.host)
            .port(self.config.port)
            .dbname(&self.config.database)
            .user(&self.config.user)
            .password(&self.config.password)
            .application_name("table_mirror");
        pg.ssl_mode(match self.config.ssl_mode {
            SslMode::Require => tokio_postgres::config::SslMode::Require,
            SslMode::Disable => tokio_postgres::config::SslMode::Disable,
        });
        pg
    }
}

#[async_trait]
impl TableSource for PgTableSource {
    fn schema(&self) -> &str {
        &self.config.schema
    }

    async fn health(&self) -> ConnectionHealth {
        match &self.client {
            None => ConnectionHealth::Absent,
            Some(client) if client.is_closed() => ConnectionHealth::Stale,
            Some(client) => match client.simple_query("SELECT 1").await {
                Ok(_) => ConnectionHealth::Healthy,
                Err(e) => {
                    debug!("Database health probe failed: {}", e);
                    ConnectionHealth::Stale
                }
            },
        }
    }

    async fn connect(&mut self) -> SyncResult<()> {
        self.close().await;

        let pg = self.pg_config();
        let client = match self.config.ssl_mode {
            SslMode::Disable => {
                warn!("Connecting to PostgreSQL without TLS");
                let (client, connection) = pg
                    .connect(NoTls)
                    .await
                    .map_err(|e| SyncError::Connection(format!("failed to connect to database: {}", e)))?;
                self.connection_task = Some(spawn_connection(connection));
                client
            }
            SslMode::Require => {
                let tls = make_tls_connector()?;
                let (client, connection) = pg
                    .connect(tls)
                    .await
                    .map_err(|e| SyncError::Connection(format!("failed to connect to database: {}", e)))?;
                self.connection_task = Some(spawn_connection(connection));
                client
            }
        };

        info!(
            "Successfully connected to PostgreSQL database '{}' on {}:{}",
            self.config.database, self.config.host, self.config.port
        );
        self.client = Some(client);
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> SyncResult<bool> {
        let client = self.client()?;
        let row = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema::text = $1 AND table_name::text = $2)",
                &[&self.config.schema, &table],
            )
            .await
            .map_err(map_query_error)?;
        row.try_get::<_, bool>(0).map_err(map_query_error)
    }

    async fn fetch_table(&self, table: &str) -> SyncResult<TableSnapshot> {
        let client = self.client()?;
        let sql = select_all_sql(&self.config.schema, table);
        debug!("Executing: {}", sql);

        let statement = client.prepare(&sql).await.map_err(map_query_error)?;
        let plan: Vec<ColumnPlan> = statement
            .columns()
            .iter()
            .map(|c| ColumnPlan::new(c.name(), c.type_()))
            .collect();

        let statement = if plan.iter().all(|c| c.projection == Projection::Native) {
            statement
        } else {
            let projected = projected_select_sql(&self.config.schema, table, &plan);
            debug!("Executing: {}", projected);
            client.prepare(&projected).await.map_err(map_query_error)?
        };

        let columns: Vec<String> = plan.iter().map(|c| c.name.clone()).collect();
        let rows = client.query(&statement, &[]).await.map_err(map_query_error)?;
        if rows.is_empty() {
            return Ok(TableSnapshot::empty(columns));
        }

        let values = rows.iter().map(|row| decode_row(row, &plan)).collect();
        TableSnapshot::new(columns, values)
    }

    async fn server_info(&self) -> SyncResult<ServerInfo> {
        let client = self.client()?;
        let row = client
            .query_one("SELECT version(), current_database()::text", &[])
            .await
            .map_err(map_query_error)?;
        let version: String = row.try_get(0).map_err(map_query_error)?;
        let database: String = row.try_get(1).map_err(map_query_error)?;

        let tables = client
            .query(
                "SELECT table_name::text FROM information_schema.tables \
                 WHERE table_schema::text = $1 ORDER BY table_name",
                &[&self.config.schema],
            )
            .await
            .map_err(map_query_error)?
            .iter()
            .map(|row| row.try_get::<_, String>(0))
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_query_error)?;

        Ok(ServerInfo {
            version,
            database,
            tables,
        })
    }

    async fn describe_table(&self, table: &str) -> SyncResult<TableInfo> {
        let client = self.client()?;
        let rows = client
            .query(
                "SELECT column_name::text, data_type::text, is_nullable::text = 'YES', \
                 column_default::text \
                 FROM information_schema.columns \
                 WHERE table_schema::text = $1 AND table_name::text = $2 \
                 ORDER BY ordinal_position",
                &[&self.config.schema, &table],
            )
            .await
            .map_err(map_query_error)?;
        if rows.is_empty() {
            return Err(SyncError::NotFound {
                schema: self.config.schema.clone(),
                table: table.to_string(),
            });
        }

        let columns = rows
            .iter()
            .map(|row| -> Result<ColumnInfo, tokio_postgres::Error> {
                Ok(ColumnInfo {
                    name: row.try_get(0)?,
                    data_type: row.try_get(1)?,
                    nullable: row.try_get(2)?,
                    default: row.try_get(3)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_query_error)?;

        let count_sql = format!(
            "SELECT count(*) FROM {}.{}",
            quote_ident(&self.config.schema),
            quote_ident(table)
        );
        let row_count: i64 = client
            .query_one(&count_sql, &[])
            .await
            .and_then(|row| row.try_get(0))
            .map_err(map_query_error)?;

        Ok(TableInfo { columns, row_count })
    }

    async fn close(&mut self) {
        if self.client.take().is_some() {
            info!("Database connection closed");
        }
        if let Some(task) = self.connection_task.take() {
            // Dropping the client ends the connection future; abort covers a hung socket.
            task.abort();
        }
    }
}

fn spawn_connection<F>(connection: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), tokio_postgres::Error>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("PostgreSQL connection error: {}", e);
        }
    })
}

fn make_tls_connector() -> SyncResult<MakeRustlsConnect> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| SyncError::Connection(format!("failed to set up TLS: {}", e)))?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    Ok(MakeRustlsConnect::new(config))
}

fn map_query_error(e: tokio_postgres::Error) -> SyncError {
    query_error(e.is_closed(), e.to_string())
}

fn query_error(connection_closed: bool, message: String) -> SyncError {
    if connection_closed {
        SyncError::Connection(format!("database connection lost: {}", message))
    } else {
        SyncError::Query(message)
    }
}

fn select_all_sql(schema: &str, table: &str) -> String {
    format!(
        "SELECT * FROM {}.{} ORDER BY 1",
        quote_ident(schema),
        quote_ident(table)
    )
}

/// Same rows and order as [`select_all_sql`], with every column lacking a
/// binary decoder cast to its text form.
fn projected_select_sql(schema: &str, table: &str, plan: &[ColumnPlan]) -> String {
    let list = plan
        .iter()
        .map(|column| {
            let ident = quote_ident(&column.name);
            match column.projection {
                Projection::Native => ident,
                Projection::Numeric | Projection::Text => format!("{0}::text AS {0}", ident),
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    // Qualified so the sort uses the stored column, not its text cast.
    let order = plan
        .first()
        .map(|column| format!(" ORDER BY src.{}", quote_ident(&column.name)))
        .unwrap_or_default();
    format!(
        "SELECT {} FROM {}.{} AS src{}",
        list,
        quote_ident(schema),
        quote_ident(table),
        order
    )
}

/// How a column travels over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Projection {
    /// Binary form, decoded by [`PgCell`].
    Native,
    /// Text form, kept as a decimal when it fits one.
    Numeric,
    /// Text form as the server renders it.
    Text,
}

impl Projection {
    fn for_type(ty: &Type) -> Self {
        match *ty {
            Type::BOOL
            | Type::INT2
            | Type::INT4
            | Type::INT8
            | Type::OID
            | Type::FLOAT4
            | Type::FLOAT8
            | Type::TEXT
            | Type::VARCHAR
            | Type::BPCHAR
            | Type::NAME
            | Type::BYTEA
            | Type::DATE
            | Type::TIME
            | Type::TIMESTAMP
            | Type::TIMESTAMPTZ
            | Type::UUID
            | Type::JSON
            | Type::JSONB => Projection::Native,
            Type::NUMERIC => Projection::Numeric,
            _ => Projection::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnPlan {
    name: String,
    projection: Projection,
}

impl ColumnPlan {
    fn new(name: &str, ty: &Type) -> Self {
        Self {
            name: name.to_string(),
            projection: Projection::for_type(ty),
        }
    }
}

fn decode_row(row: &Row, plan: &[ColumnPlan]) -> Vec<CellValue> {
    plan.iter()
        .enumerate()
        .map(|(idx, column)| {
            let value = match row.try_get::<_, PgCell>(idx) {
                Ok(PgCell(value)) => value,
                Err(e) => {
                    let ty = row.columns()[idx].type_().name();
                    debug!("Cannot decode column '{}' of type {}: {}", column.name, ty, e);
                    CellValue::Unsupported(ty.to_string())
                }
            };
            from_projection(column.projection, value)
        })
        .collect()
}

fn from_projection(projection: Projection, value: CellValue) -> CellValue {
    match (projection, value) {
        (Projection::Numeric, CellValue::Text(text)) if text == "NaN" => CellValue::Null,
        (Projection::Numeric, CellValue::Text(text)) => match Decimal::from_str_exact(&text) {
            Ok(decimal) => CellValue::Numeric(decimal),
            // Wider than 28 digits, or infinite.
            Err(_) => CellValue::Text(text),
        },
        (_, value) => value,
    }
}

/// One cell decoded from the binary wire format.
///
/// Only accepts the types [`Projection::Native`] covers; every other column
/// reaches the client already cast to text.
#[derive(Debug)]
struct PgCell(CellValue);

impl<'a> FromSql<'a> for PgCell {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        let value = match *ty {
            Type::BOOL => CellValue::Bool(bool::from_sql(ty, raw)?),
            Type::INT2 => CellValue::Int(i16::from_sql(ty, raw)?.into()),
            Type::INT4 => CellValue::Int(i32::from_sql(ty, raw)?.into()),
            Type::INT8 => CellValue::Int(i64::from_sql(ty, raw)?),
            Type::OID => CellValue::Int(u32::from_sql(ty, raw)?.into()),
            Type::FLOAT4 => CellValue::Float(f32::from_sql(ty, raw)?.into()),
            Type::FLOAT8 => CellValue::Float(f64::from_sql(ty, raw)?),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
                CellValue::Text(String::from_sql(ty, raw)?)
            }
            Type::BYTEA => CellValue::Bytes(Vec::<u8>::from_sql(ty, raw)?),
            Type::DATE => CellValue::Date(NaiveDate::from_sql(ty, raw)?),
            Type::TIME => CellValue::Time(NaiveTime::from_sql(ty, raw)?),
            Type::TIMESTAMP => CellValue::Timestamp(NaiveDateTime::from_sql(ty, raw)?),
            Type::TIMESTAMPTZ => CellValue::TimestampTz(DateTime::<Utc>::from_sql(ty, raw)?),
            Type::UUID => CellValue::Uuid(Uuid::from_sql(ty, raw)?),
            Type::JSON | Type::JSONB => CellValue::Json(serde_json::Value::from_sql(ty, raw)?),
            _ => return Err(format!("no binary decoder for type {}", ty.name()).into()),
        };
        Ok(PgCell(value))
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        Ok(PgCell(CellValue::Null))
    }

    fn accepts(ty: &Type) -> bool {
        Projection::for_type(ty) == Projection::Native
    }
}
