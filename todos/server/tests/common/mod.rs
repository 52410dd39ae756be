use std::sync::Arc;
use testcontainers_modules::testcontainers::runners::AsyncRunner;
use testcontainers_modules::testcontainers::{ContainerAsync, Image};
use testcontainers_modules::{mariadb, mongo, postgres};
use todos_server::db::{ConnectionSettings, Database, DatabaseConfig};

/// A running backend container and an adapter pointed at it. The container
/// stops when this is dropped.
pub struct TestDatabase<I: Image> {
    pub container: ContainerAsync<I>,
    pub db: Arc<Database>,
}

async fn connect<I: Image>(
    container: ContainerAsync<I>,
    db_type: &str,
    internal_port: u16,
    user: &str,
    password: &str,
    database: &str,
) -> anyhow::Result<TestDatabase<I>> {
    let settings = ConnectionSettings {
        host: container.get_host().await?.to_string(),
        port: container.get_host_port_ipv4(internal_port).await?,
        user: user.to_string(),
        password: password.to_string(),
        database: database.to_string(),
    };
    let mut config = DatabaseConfig {
        db_type: Some(db_type.to_string()),
        run_migrations: true,
        ..Default::default()
    };
    match db_type {
        "mariadb" => config.mariadb = settings,
        "postgres" => config.postgres = settings,
        _ => config.mongo = settings,
    }
    let db = Arc::new(Database::new(config));
    db.initialize().await?;
    Ok(TestDatabase { container, db })
}

pub async fn setup_postgres() -> anyhow::Result<TestDatabase<postgres::Postgres>> {
    let container = postgres::Postgres::default().start().await?;
    connect(container, "postgres", 5432, "postgres", "postgres", "postgres").await
}

pub async fn setup_mariadb() -> anyhow::Result<TestDatabase<mariadb::Mariadb>> {
    let container = mariadb::Mariadb::default().start().await?;
    connect(container, "mariadb", 3306, "root", "", "test").await
}

pub async fn setup_mongo() -> anyhow::Result<TestDatabase<mongo::Mongo>> {
    let container = mongo::Mongo::default().start().await?;
    connect(container, "mongo", 27017, "", "", "todos").await
}
