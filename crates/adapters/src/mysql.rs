use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use mysql_async::consts::ColumnType;
use mysql_async::prelude::Queryable;
use mysql_async::{Column, Conn, OptsBuilder, Pool, Row, SslOpts, Value};
use sqlpad_core::config::{ConnectionProfile, PasswordSource, TlsMode, WorkbenchConfig};
use sqlpad_core::query_result::{
    ColumnInfo, PageInfo, QueryEngine, QueryEngineError, QueryRequest, QueryResult,
};
use sqlpad_core::safety::{classify, StatementAssessment, StatementKind};
use sqlpad_core::schema::{
    ColumnSummary, ConnectionInfo, SchemaProvider, SchemaProviderError, SchemaSummary,
    TableSummary,
};
use sqlpad_core::ConnectionId;
use tracing::{debug, info, warn};

const PASSWORD_ENV: &str = "SQLPAD_DB_PASSWORD";
const KEYRING_SERVICE: &str = "sqlpad";
const DANGEROUS_REFUSAL: &str = "Dangerous query detected. Please review and confirm execution.";
const MULTIPLE_REFUSAL: &str =
    "Multiple statements detected. Enable 'Allow Multiple Statements' to execute.";

#[derive(Debug, Clone)]
struct PooledConnection {
    profile: ConnectionProfile,
    pool: Pool,
}

/// One lazily connecting pool per configured connection profile, shared by
/// the query engine and the schema provider.
#[derive(Debug, Clone, Default)]
pub struct MysqlPools {
    connections: Arc<BTreeMap<ConnectionId, PooledConnection>>,
}

impl MysqlPools {
    #[must_use]
    pub fn from_profiles(profiles: &[ConnectionProfile]) -> Self {
        let connections = profiles
            .iter()
            .map(|profile| {
                (
                    profile.id,
                    PooledConnection {
                        profile: profile.clone(),
                        pool: Pool::new(opts_from_profile(profile)),
                    },
                )
            })
            .collect();
        Self {
            connections: Arc::new(connections),
        }
    }

    #[must_use]
    pub fn from_config(config: &WorkbenchConfig) -> Self {
        Self::from_profiles(&config.connections)
    }

    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    pub async fn disconnect(&self) -> Result<(), mysql_async::Error> {
        for connection in self.connections.values() {
            connection.pool.clone().disconnect().await?;
        }
        Ok(())
    }

    fn connection(&self, connection_id: ConnectionId) -> Option<&PooledConnection> {
        self.connections.get(&connection_id)
    }
}

#[derive(Debug, Clone)]
pub struct MysqlQueryEngine {
    pools: MysqlPools,
    max_execution_time_ms: u64,
}

impl MysqlQueryEngine {
    #[must_use]
    pub fn new(pools: MysqlPools, max_execution_time_ms: u64) -> Self {
        Self {
            pools,
            max_execution_time_ms,
        }
    }

    #[must_use]
    pub fn from_config(config: &WorkbenchConfig) -> Self {
        Self::new(
            MysqlPools::from_config(config),
            config.workbench.max_execution_time_ms,
        )
    }

    #[must_use]
    pub fn pools(&self) -> &MysqlPools {
        &self.pools
    }

    async fn checkout(&self, connection_id: ConnectionId) -> Result<Conn, QueryEngineError> {
        let connection = self.pools.connection(connection_id).ok_or_else(|| {
            QueryEngineError::new(format!("connection {connection_id} is not configured"))
        })?;
        let mut conn = connection
            .pool
            .get_conn()
            .await
            .map_err(to_engine_error)?;

        if self.max_execution_time_ms > 0 {
            let statement = format!(
                "SET SESSION max_execution_time={}",
                self.max_execution_time_ms
            );
            if let Err(error) = conn.query_drop(statement).await {
                warn!(connection_id, %error, "server does not accept max_execution_time");
            }
        }
        Ok(conn)
    }
}

#[async_trait]
impl QueryEngine for MysqlQueryEngine {
    async fn execute(&self, request: &QueryRequest) -> Result<QueryResult, QueryEngineError> {
        let started = Instant::now();
        let classification = match classify(&request.sql) {
            Ok(classification) => classification,
            Err(error) => return Ok(QueryResult::error(error.to_string())),
        };
        let warnings = classification
            .all_warnings()
            .map(str::to_string)
            .collect::<Vec<_>>();

        if classification.is_dangerous && !request.confirm_dangerous {
            debug!(connection_id = request.connection_id, "refusing unconfirmed dangerous query");
            return Ok(QueryResult::error(DANGEROUS_REFUSAL)
                .with_warnings(classification.warnings.clone(), true));
        }
        if classification.is_multi_statement && !request.allow_multiple {
            debug!(connection_id = request.connection_id, "refusing unconfirmed multi-statement query");
            return Ok(QueryResult::error(MULTIPLE_REFUSAL)
                .with_warnings(warnings, classification.is_dangerous));
        }

        let mut conn = self.checkout(request.connection_id).await?;
        let page = request.page.max(1);
        let page_size = request.page_size.max(1);
        let result = if classification.is_multi_statement {
            run_batch(&mut conn, &classification.statements, page, page_size).await?
        } else {
            let statement = classification
                .statements
                .first()
                .ok_or_else(|| QueryEngineError::new("no statement to execute"))?;
            run_statement(&mut conn, statement, page, page_size)
                .await
                .map_err(to_engine_error)?
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(
            connection_id = request.connection_id,
            statements = classification.statement_count,
            elapsed_ms,
            "mysql round trip finished"
        );
        Ok(result
            .with_execution_time_ms(elapsed_ms)
            .with_warnings(warnings, classification.is_dangerous))
    }
}

/// Runs statements in order and stops at the first failure. The page only
/// applies to the last statement.
async fn run_batch(
    conn: &mut Conn,
    statements: &[StatementAssessment],
    page: u32,
    page_size: u32,
) -> Result<QueryResult, QueryEngineError> {
    let total = statements.len();
    let mut results = Vec::with_capacity(total);
    for (index, statement) in statements.iter().enumerate() {
        let statement_page = if index + 1 == total { page } else { 1 };
        match run_statement(conn, statement, statement_page, page_size).await {
            Ok(result) => results.push(result),
            Err(error) => {
                warn!(statement = index + 1, total, %error, "batch stopped");
                return Err(QueryEngineError::new(format!(
                    "Statement {} of {total} failed after {index} succeeded: {error}",
                    index + 1
                )));
            }
        }
    }
    Ok(QueryResult::multi(results))
}

async fn run_statement(
    conn: &mut Conn,
    statement: &StatementAssessment,
    page: u32,
    page_size: u32,
) -> Result<QueryResult, mysql_async::Error> {
    let mut result = conn.query_iter(statement.sql.as_str()).await?;
    let columns = result.columns().filter(|columns| !columns.is_empty());

    let Some(columns) = columns else {
        let affected_rows = result.affected_rows();
        result.drop_result().await?;
        return Ok(command_result(statement.kind, affected_rows));
    };

    let offset = u64::from(page - 1) * u64::from(page_size);
    let mut total_rows = 0_u64;
    let mut rows = Vec::new();
    while let Some(row) = result.next().await? {
        if total_rows >= offset && rows.len() < page_size as usize {
            rows.push(row_to_json(row, &columns));
        }
        total_rows += 1;
    }
    result.drop_result().await?;

    let mut select = QueryResult::select(
        columns.iter().map(column_info).collect(),
        rows,
        PageInfo::new(page, page_size, total_rows),
    );
    if statement.kind != StatementKind::Unknown {
        select.query_type = Some(statement.kind.as_str().to_string());
    }
    Ok(select)
}

fn command_result(kind: StatementKind, affected_rows: u64) -> QueryResult {
    if kind.is_write() {
        return QueryResult::write(kind.as_str(), affected_rows);
    }
    let label = kind
        .as_str()
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_ascii_uppercase().to_string() + chars.as_str()
            })
        })
        .collect::<Vec<_>>()
        .join(" ");
    QueryResult::ddl(kind.as_str(), format!("{label} completed successfully"))
}

fn column_info(column: &Column) -> ColumnInfo {
    let type_name = format!("{:?}", column.column_type());
    ColumnInfo::new(
        column.name_str(),
        type_name.trim_start_matches("MYSQL_TYPE_"),
    )
}

fn row_to_json(row: Row, columns: &[Column]) -> Vec<serde_json::Value> {
    row.unwrap_raw()
        .into_iter()
        .zip(columns)
        .map(|(value, column)| cell_to_json(value.unwrap_or(Value::NULL), column.column_type()))
        .collect()
}

/// The text protocol sends every cell as bytes; numeric columns are parsed
/// back into JSON numbers. Decimals stay strings to keep their precision.
fn cell_to_json(value: Value, column_type: ColumnType) -> serde_json::Value {
    match value {
        Value::NULL => serde_json::Value::Null,
        Value::Bytes(bytes) => bytes_to_json(bytes, column_type),
        Value::Int(value) => value.into(),
        Value::UInt(value) => value.into(),
        Value::Float(value) => serde_json::Number::from_f64(f64::from(value))
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Double(value) => serde_json::Number::from_f64(value)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let mut rendered = format!(
                "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
            );
            if micros > 0 {
                rendered.push_str(&format!(".{micros:06}"));
            }
            rendered.into()
        }
        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if is_negative { "-" } else { "" };
            let hours = days * 24 + u32::from(hours);
            let mut rendered = format!("{sign}{hours:02}:{minutes:02}:{seconds:02}");
            if micros > 0 {
                rendered.push_str(&format!(".{micros:06}"));
            }
            rendered.into()
        }
    }
}

fn bytes_to_json(bytes: Vec<u8>, column_type: ColumnType) -> serde_json::Value {
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(error) => {
            let hex = error
                .into_bytes()
                .iter()
                .map(|byte| format!("{byte:02x}"))
                .collect::<String>();
            return format!("0x{hex}").into();
        }
    };

    let number = match column_type {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR => text
            .parse::<i64>()
            .map(serde_json::Number::from)
            .or_else(|_| text.parse::<u64>().map(serde_json::Number::from))
            .ok(),
        ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64),
        _ => None,
    };
    number.map_or_else(|| text.into(), serde_json::Value::Number)
}

#[derive(Debug, Clone)]
pub struct MysqlSchemaProvider {
    pools: MysqlPools,
}

impl MysqlSchemaProvider {
    #[must_use]
    pub fn new(pools: MysqlPools) -> Self {
        Self { pools }
    }
}

#[async_trait]
impl SchemaProvider for MysqlSchemaProvider {
    async fn list_connections(&self) -> Result<Vec<ConnectionInfo>, SchemaProviderError> {
        Ok(self
            .pools
            .connections
            .values()
            .map(|connection| ConnectionInfo {
                id: connection.profile.id,
                name: connection.profile.name.clone(),
                host: connection.profile.host.clone(),
                database: connection.profile.database.clone(),
            })
            .collect())
    }

    async fn get_schema(
        &self,
        connection_id: ConnectionId,
    ) -> Result<SchemaSummary, SchemaProviderError> {
        let connection = self.pools.connection(connection_id).ok_or_else(|| {
            SchemaProviderError::new(format!("connection {connection_id} is not configured"))
        })?;
        let mut conn = connection
            .pool
            .get_conn()
            .await
            .map_err(to_schema_error)?;

        let database = match &connection.profile.database {
            Some(database) => Some(database.clone()),
            None => conn
                .query_first::<Option<String>, _>("SELECT DATABASE()")
                .await
                .map_err(to_schema_error)?
                .flatten(),
        };
        let Some(database) = database else {
            debug!(connection_id, "no default database, schema is empty");
            return Ok(SchemaSummary::default());
        };

        let mut tables = conn
            .exec_map(
                "SELECT TABLE_NAME, TABLE_ROWS \
                 FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = ? \
                 ORDER BY TABLE_NAME",
                (database.clone(),),
                |(name, row_count): (String, Option<u64>)| TableSummary {
                    name,
                    row_count,
                    columns: Vec::new(),
                },
            )
            .await
            .map_err(to_schema_error)?;

        let columns = conn
            .exec_map(
                "SELECT TABLE_NAME, COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE \
                 FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = ? \
                 ORDER BY TABLE_NAME, ORDINAL_POSITION",
                (database,),
                |(table, name, data_type, nullable): (String, String, String, String)| {
                    (
                        table,
                        ColumnSummary {
                            name,
                            data_type,
                            nullable: nullable.eq_ignore_ascii_case("YES"),
                        },
                    )
                },
            )
            .await
            .map_err(to_schema_error)?;

        let mut by_table: HashMap<String, Vec<ColumnSummary>> = HashMap::new();
        for (table, column) in columns {
            by_table.entry(table).or_default().push(column);
        }
        for table in &mut tables {
            table.columns = by_table.remove(&table.name).unwrap_or_default();
        }

        debug!(connection_id, tables = tables.len(), "schema loaded");
        Ok(SchemaSummary { tables })
    }
}

fn opts_from_profile(profile: &ConnectionProfile) -> OptsBuilder {
    let mut builder = OptsBuilder::default()
        .ip_or_hostname(profile.host.clone())
        .tcp_port(profile.port)
        .user(Some(profile.user.clone()));

    if let Some(password) = resolve_password(profile) {
        builder = builder.pass(Some(password));
    }

    if let Some(database) = non_empty(profile.database.as_deref()) {
        builder = builder.db_name(Some(database.to_string()));
    }

    if let Some(ssl_opts) = ssl_opts_from_profile(profile) {
        builder = builder.ssl_opts(ssl_opts);
    }

    builder
}

fn resolve_password(profile: &ConnectionProfile) -> Option<String> {
    let env_password = std::env::var(PASSWORD_ENV)
        .ok()
        .filter(|password| !password.is_empty());

    match profile.password_source {
        PasswordSource::EnvVar => env_password,
        PasswordSource::Keyring => {
            if let Some(password) = load_keyring_password(profile) {
                return Some(password);
            }

            // First use: seed the keyring from the environment.
            if let Some(password) = env_password {
                store_keyring_password(profile, &password);
                return Some(password);
            }

            None
        }
    }
}

fn ssl_opts_from_profile(profile: &ConnectionProfile) -> Option<SslOpts> {
    if !profile_requests_tls(profile) {
        return None;
    }

    let mut ssl_opts = SslOpts::default();
    if let Some(ca_cert_path) = non_empty(profile.tls_ca_cert_path.as_deref()) {
        ssl_opts = ssl_opts.with_root_certs(vec![PathBuf::from(ca_cert_path).into()]);
    }
    Some(ssl_opts)
}

fn profile_requests_tls(profile: &ConnectionProfile) -> bool {
    match profile.tls_mode {
        TlsMode::Disabled => false,
        TlsMode::Prefer => non_empty(profile.tls_ca_cert_path.as_deref()).is_some(),
        TlsMode::Require => true,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    })
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn load_keyring_password(profile: &ConnectionProfile) -> Option<String> {
    let entry = keyring_entry(profile)?;
    entry
        .get_password()
        .ok()
        .filter(|password| !password.is_empty())
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn load_keyring_password(_profile: &ConnectionProfile) -> Option<String> {
    None
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn store_keyring_password(profile: &ConnectionProfile, password: &str) {
    if let Some(entry) = keyring_entry(profile) {
        if let Err(error) = entry.set_password(password) {
            warn!(profile = %profile.name, %error, "failed to store password in keyring");
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn store_keyring_password(_profile: &ConnectionProfile, _password: &str) {}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn keyring_entry(profile: &ConnectionProfile) -> Option<keyring::Entry> {
    keyring::Entry::new(KEYRING_SERVICE, &profile.name).ok()
}

fn to_engine_error(error: mysql_async::Error) -> QueryEngineError {
    QueryEngineError::new(error.to_string())
}

fn to_schema_error(error: mysql_async::Error) -> SchemaProviderError {
    SchemaProviderError::new(error.to_string())
}
