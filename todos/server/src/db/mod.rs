//! Database adapter.
//!
//! Owns the process-wide connection to whichever backend `DB_TYPE` selects:
//! a pooled `sea_orm::DatabaseConnection` for MariaDB and Postgres, or a
//! multiplexed `mongodb::Client` for MongoDB. The connection is created at
//! most once through a [`tokio::sync::OnceCell`]; concurrent first callers
//! wait on the same connect attempt instead of racing to build their own.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use migration::MigratorTrait;
use mongodb::bson::doc;
use mongodb::options::{ClientOptions, Credential, ServerAddress};
use sea_orm::sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sea_orm::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sea_orm::sqlx::{ConnectOptions, Connection};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DbBackend, QueryResult, SqlxMySqlConnector,
    SqlxPostgresConnector, Statement,
};
use serde::Serialize;
use tokio::sync::OnceCell;
use utoipa::ToSchema;

const SQL_POOL_SIZE: u32 = 10;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// The database engine family selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseKind {
    MariaDb,
    Postgres,
    Mongo,
}

impl DatabaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::MariaDb => "mariadb",
            DatabaseKind::Postgres => "postgres",
            DatabaseKind::Mongo => "mongo",
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseKind {
    type Err = DatabaseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mariadb" => Ok(DatabaseKind::MariaDb),
            "postgres" => Ok(DatabaseKind::Postgres),
            "mongo" => Ok(DatabaseKind::Mongo),
            "" => Err(DatabaseError::Configuration("DB_TYPE is not set".to_string())),
            other => Err(DatabaseError::Configuration(format!(
                "Invalid DB_TYPE '{other}'"
            ))),
        }
    }
}

/// Host, port and credentials for one backend.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

/// Backend selector plus connection settings for every supported engine.
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    pub db_type: Option<String>,
    pub run_migrations: bool,
    pub mariadb: ConnectionSettings,
    pub postgres: ConnectionSettings,
    pub mongo: ConnectionSettings,
    /// Upper bound for one connect attempt. `None` means five seconds.
    pub connect_timeout: Option<Duration>,
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT)
    }

    /// Parses the configured selector.
    pub fn kind(&self) -> Result<DatabaseKind, DatabaseError> {
        self.db_type.as_deref().unwrap_or_default().parse()
    }

    /// Name reported by the status endpoint: the parsed kind, else the raw
    /// selector, else `"unknown"`.
    pub fn label(&self) -> String {
        match (self.kind(), self.db_type.as_deref().map(str::trim)) {
            (Ok(kind), _) => kind.to_string(),
            (Err(_), Some(raw)) if !raw.is_empty() => raw.to_string(),
            _ => "unknown".to_string(),
        }
    }
}

/// Error type for adapter operations.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// The backend selector is missing or names an unsupported engine.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// The configured backend could not be reached.
    #[error("Could not connect to {kind}: {source}")]
    Connection {
        kind: DatabaseKind,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// The operation is not available for the configured backend.
    #[error("Operation is not supported by the {0} backend")]
    BackendMismatch(DatabaseKind),
    /// A SQL statement failed.
    #[error("SQL error: {0}")]
    Sql(#[from] sea_orm::DbErr),
    /// A document command failed.
    #[error("Document store error: {0}")]
    Document(#[from] mongodb::error::Error),
}

/// Result of a liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Body of the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DatabaseStatus {
    pub status: ConnectionState,
    pub database: String,
}

impl DatabaseStatus {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionState::Connected
    }
}

#[derive(Debug)]
enum Backend {
    Sql(DatabaseConnection),
    Document(mongodb::Client),
}

/// Lazily connected handle to the configured backend.
#[derive(Debug)]
pub struct Database {
    config: DatabaseConfig,
    backend: OnceCell<Backend>,
    connect_attempts: AtomicU64,
}

impl Database {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            backend: OnceCell::new(),
            connect_attempts: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn kind(&self) -> Result<DatabaseKind, DatabaseError> {
        self.config.kind()
    }

    /// Number of times this adapter has tried to reach its backend.
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Connects to the configured backend unless already connected.
    ///
    /// A failed attempt leaves the adapter unconnected, so a later call
    /// tries again.
    pub async fn initialize(&self) -> Result<(), DatabaseError> {
        self.backend().await.map(|_| ())
    }

    /// Runs a parameterized statement against a SQL backend and returns its
    /// rows. Statements without a result set yield an empty vector.
    ///
    /// Placeholders follow the backend dialect: `?` for MariaDB, `$1..$n`
    /// for Postgres.
    #[tracing::instrument(skip(self, params))]
    pub async fn execute(
        &self,
        statement: &str,
        params: Vec<sea_orm::Value>,
    ) -> Result<Vec<QueryResult>, DatabaseError> {
        let (conn, backend) = self.sql_connection().await?;
        let statement = Statement::from_sql_and_values(backend, statement, params);
        Ok(conn.query_all(statement).await?)
    }

    /// Runs an INSERT against MariaDB and returns the auto-increment id the
    /// server assigned.
    #[tracing::instrument(skip(self, params))]
    pub async fn execute_insert(
        &self,
        statement: &str,
        params: Vec<sea_orm::Value>,
    ) -> Result<u64, DatabaseError> {
        let kind = self.kind()?;
        if kind != DatabaseKind::MariaDb {
            return Err(DatabaseError::BackendMismatch(kind));
        }
        let (conn, backend) = self.sql_connection().await?;
        let statement = Statement::from_sql_and_values(backend, statement, params);
        Ok(conn.execute(statement).await?.last_insert_id())
    }

    /// Returns a typed collection handle on the configured MongoDB database.
    pub async fn collection<T: Send + Sync>(
        &self,
        name: &str,
    ) -> Result<mongodb::Collection<T>, DatabaseError> {
        let kind = self.kind()?;
        if kind != DatabaseKind::Mongo {
            return Err(DatabaseError::BackendMismatch(kind));
        }
        match self.backend().await? {
            Backend::Document(client) => Ok(client
                .database(&self.config.mongo.database)
                .collection::<T>(name)),
            Backend::Sql(_) => Err(DatabaseError::BackendMismatch(kind)),
        }
    }

    /// Probes the backend with the lightest available command.
    ///
    /// Never fails: any error is logged and reported as disconnected.
    #[tracing::instrument(skip(self))]
    pub async fn status(&self) -> DatabaseStatus {
        let status = match self.ping().await {
            Ok(()) => ConnectionState::Connected,
            Err(err) => {
                tracing::warn!("Database status check failed: {}", err);
                ConnectionState::Disconnected
            }
        };
        DatabaseStatus {
            status,
            database: self.config.label(),
        }
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        match self.backend().await? {
            Backend::Sql(conn) => {
                conn.execute_unprepared("SELECT 1").await?;
            }
            Backend::Document(client) => {
                client
                    .database("admin")
                    .run_command(doc! { "ping": 1 })
                    .await?;
            }
        }
        Ok(())
    }

    async fn sql_connection(&self) -> Result<(&DatabaseConnection, DbBackend), DatabaseError> {
        let kind = self.kind()?;
        let backend = match kind {
            DatabaseKind::MariaDb => DbBackend::MySql,
            DatabaseKind::Postgres => DbBackend::Postgres,
            DatabaseKind::Mongo => return Err(DatabaseError::BackendMismatch(kind)),
        };
        match self.backend().await? {
            Backend::Sql(conn) => Ok((conn, backend)),
            Backend::Document(_) => Err(DatabaseError::BackendMismatch(kind)),
        }
    }

    async fn backend(&self) -> Result<&Backend, DatabaseError> {
        let kind = self.kind()?;
        self.backend.get_or_try_init(|| self.connect(kind)).await
    }

    async fn connect(&self, kind: DatabaseKind) -> Result<Backend, DatabaseError> {
        let settings = match kind {
            DatabaseKind::MariaDb => &self.config.mariadb,
            DatabaseKind::Postgres => &self.config.postgres,
            DatabaseKind::Mongo => &self.config.mongo,
        };
        let timeout = self.config.connect_timeout();
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
        let connected = match kind {
            DatabaseKind::MariaDb => connect_mariadb(settings, timeout).await.map(Backend::Sql),
            DatabaseKind::Postgres => connect_postgres(settings, timeout).await.map(Backend::Sql),
            DatabaseKind::Mongo => connect_mongo(settings, timeout).await.map(Backend::Document),
        };
        let backend = match connected {
            Ok(backend) => backend,
            Err(source) => {
                tracing::error!("Connection failed ({}): {}", kind, source);
                return Err(DatabaseError::Connection { kind, source });
            }
        };

        if let Backend::Sql(conn) = &backend {
            if self.config.run_migrations {
                migration::Migrator::up(conn, None).await?;
                tracing::info!("Database migrations applied successfully");
            }
        }

        tracing::info!(
            "{} -> {}@{}/{}",
            kind,
            settings.user,
            settings.host,
            settings.database
        );
        Ok(backend)
    }
}

type ConnectResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

// One direct connection first: a pool alone retries refused connects until
// its acquire timeout and reports only the timeout.
async fn connect_mariadb(
    settings: &ConnectionSettings,
    timeout: Duration,
) -> ConnectResult<DatabaseConnection> {
    let options = MySqlConnectOptions::new()
        .host(&settings.host)
        .port(settings.port)
        .username(&settings.user)
        .password(&settings.password)
        .database(&settings.database);
    tokio::time::timeout(timeout, options.connect())
        .await??
        .close()
        .await?;
    let pool = MySqlPoolOptions::new()
        .max_connections(SQL_POOL_SIZE)
        .acquire_timeout(timeout)
        .connect_lazy_with(options);
    Ok(SqlxMySqlConnector::from_sqlx_mysql_pool(pool))
}

async fn connect_postgres(
    settings: &ConnectionSettings,
    timeout: Duration,
) -> ConnectResult<DatabaseConnection> {
    let options = PgConnectOptions::new()
        .host(&settings.host)
        .port(settings.port)
        .username(&settings.user)
        .password(&settings.password)
        .database(&settings.database);
    tokio::time::timeout(timeout, options.connect())
        .await??
        .close()
        .await?;
    let pool = PgPoolOptions::new()
        .max_connections(SQL_POOL_SIZE)
        .acquire_timeout(timeout)
        .connect_lazy_with(options);
    Ok(SqlxPostgresConnector::from_sqlx_postgres_pool(pool))
}

async fn connect_mongo(
    settings: &ConnectionSettings,
    timeout: Duration,
) -> ConnectResult<mongodb::Client> {
    let mut options = ClientOptions::default();
    options.hosts = vec![ServerAddress::Tcp {
        host: settings.host.clone(),
        port: Some(settings.port),
    }];
    options.connect_timeout = Some(timeout);
    options.server_selection_timeout = Some(timeout);
    if !settings.user.is_empty() {
        let mut credential = Credential::default();
        credential.username = Some(settings.user.clone());
        credential.password = Some(settings.password.clone());
        options.credential = Some(credential);
    }
    let client = mongodb::Client::with_options(options)?;
    // The driver connects lazily; ping so an unreachable server fails here.
    client
        .database("admin")
        .run_command(doc! { "ping": 1 })
        .await?;
    Ok(client)
}
