//! Postgres backing for the repository.
//!
//! [`Database`] owns the pool and the schema; [`PgRepository`] is the SQL
//! implementation of [`crate::repository::Repository`] on top of it.

mod error;
mod repository;

pub use error::DbError;
pub use repository::PgRepository;

use std::path::PathBuf;
use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

/// Pool settings.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// Idle connections kept open between scheduler and reconciler ticks.
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/zonefleet".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl DbConfig {
    fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(Some(self.idle_timeout))
    }
}

/// Directories searched for the schema, in order: relative to the working
/// directory (crate or workspace root) and then next to this crate's
/// manifest.
fn migration_dirs() -> [PathBuf; 3] {
    [
        PathBuf::from("migrations"),
        PathBuf::from("services/control-plane/migrations"),
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    ]
}

/// Handle on the control plane's Postgres database.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        debug!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Opening database pool"
        );

        let pool = config
            .pool_options()
            .connect(&config.database_url)
            .await
            .map_err(DbError::Connect)?;

        info!("Connected to database");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip a trivial query.
    pub async fn health_check(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(DbError::Query)
    }

    /// Apply the zone and node schema.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        let dirs = migration_dirs();
        let Some(dir) = dirs.iter().find(|dir| dir.is_dir()) else {
            return Err(DbError::MigrationDirNotFound {
                tried: dirs
                    .iter()
                    .map(|dir| dir.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        };

        let migrator = Migrator::new(dir.as_path())
            .await
            .map_err(DbError::Migration)?;
        migrator.run(&self.pool).await.map_err(DbError::Migration)?;

        info!(
            migrations_dir = %dir.display(),
            migrations = migrator.iter().count(),
            "Schema up to date"
        );
        Ok(())
    }

    /// Repository sharing this pool.
    pub fn repository(&self) -> PgRepository {
        PgRepository::new(self.pool.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_config_defaults() {
        let config = DbConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
        assert!(config.database_url.ends_with("/zonefleet"));
    }

    #[test]
    fn test_schema_ships_with_crate() {
        let dirs = migration_dirs();
        let dir = dirs.iter().find(|dir| dir.is_dir()).unwrap();
        assert!(dir.join("0001_zones_and_nodes.sql").is_file());
    }
}
