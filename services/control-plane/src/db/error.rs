use thiserror::Error;

/// Errors from opening the pool or applying the schema.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("could not connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("database query failed: {0}")]
    Query(#[source] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// None of the searched directories holds the schema.
    #[error("no migrations directory found (searched {tried})")]
    MigrationDirNotFound { tried: String },
}
