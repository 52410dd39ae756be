pub mod config {
    use serde::Deserialize;
    use std::time::Duration;

    use crate::db::{ConnectionSettings, DatabaseConfig};

    /// Application settings, read from the process environment.
    ///
    /// Every field maps to an upper-case environment variable of the same
    /// name, e.g. `DB_TYPE`, `POSTGRES_HOST` or `VISIT_WINDOW_SECS`.
    #[derive(Deserialize, Debug, Clone)]
    pub struct Config {
        #[serde(default = "default_port")]
        pub port: u16,
        #[serde(default)]
        pub db_type: Option<String>,
        #[serde(default = "default_run_migrations")]
        pub run_migrations: bool,
        #[serde(default = "default_db_connect_timeout_secs")]
        pub db_connect_timeout_secs: u64,

        #[serde(default = "default_host")]
        pub mariadb_host: String,
        #[serde(default)]
        pub mariadb_user: String,
        #[serde(default)]
        pub mariadb_password: String,
        #[serde(default)]
        pub mariadb_database: String,
        #[serde(default = "default_mariadb_port")]
        pub mariadb_port: u16,

        #[serde(default = "default_host")]
        pub postgres_host: String,
        #[serde(default)]
        pub postgres_user: String,
        #[serde(default)]
        pub postgres_password: String,
        #[serde(default)]
        pub postgres_database: String,
        #[serde(default = "default_postgres_port")]
        pub postgres_port: u16,

        #[serde(default = "default_host")]
        pub mongo_host: String,
        #[serde(default)]
        pub mongo_user: String,
        #[serde(default)]
        pub mongo_password: String,
        #[serde(default)]
        pub mongo_database: String,
        #[serde(default = "default_mongo_port")]
        pub mongo_port: u16,

        #[serde(default = "default_visit_window_secs")]
        pub visit_window_secs: u64,
        #[serde(default = "default_visit_max_ips")]
        pub visit_max_ips: usize,
    }

    impl Config {
        /// Loads configuration from environment variables.
        pub fn from_env() -> anyhow::Result<Self> {
            let settings = config::Config::builder()
                .add_source(config::Environment::default())
                .build()?;
            Self::from_settings(settings)
        }

        /// Deserializes configuration from already-built settings.
        pub fn from_settings(settings: config::Config) -> anyhow::Result<Self> {
            let config: Config = settings.try_deserialize()?;
            Ok(config)
        }

        /// Connection parameters for every supported backend plus the selector.
        pub fn database_config(&self) -> DatabaseConfig {
            DatabaseConfig {
                db_type: self.db_type.clone(),
                run_migrations: self.run_migrations,
                mariadb: ConnectionSettings {
                    host: self.mariadb_host.clone(),
                    port: self.mariadb_port,
                    user: self.mariadb_user.clone(),
                    password: self.mariadb_password.clone(),
                    database: self.mariadb_database.clone(),
                },
                postgres: ConnectionSettings {
                    host: self.postgres_host.clone(),
                    port: self.postgres_port,
                    user: self.postgres_user.clone(),
                    password: self.postgres_password.clone(),
                    database: self.postgres_database.clone(),
                },
                mongo: ConnectionSettings {
                    host: self.mongo_host.clone(),
                    port: self.mongo_port,
                    user: self.mongo_user.clone(),
                    password: self.mongo_password.clone(),
                    database: self.mongo_database.clone(),
                },
                connect_timeout: Some(Duration::from_secs(self.db_connect_timeout_secs)),
            }
        }

        pub fn visit_window(&self) -> Duration {
            Duration::from_secs(self.visit_window_secs)
        }
    }

    fn default_port() -> u16 {
        8080
    }

    fn default_run_migrations() -> bool {
        true
    }

    fn default_db_connect_timeout_secs() -> u64 {
        5
    }

    fn default_host() -> String {
        "localhost".to_string()
    }

    fn default_mariadb_port() -> u16 {
        3306
    }

    fn default_postgres_port() -> u16 {
        5432
    }

    fn default_mongo_port() -> u16 {
        27017
    }

    fn default_visit_window_secs() -> u64 {
        60 * 60
    }

    fn default_visit_max_ips() -> usize {
        10_000
    }

}

pub mod db;
pub mod todo;
pub mod web;
