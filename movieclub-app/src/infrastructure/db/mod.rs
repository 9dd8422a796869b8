pub mod entities;
mod pg_store;

pub use pg_store::PgClubStore;

use movieclub_errors::ClubError;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Statement};
use std::time::Duration;

pub async fn create_connection(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(database_url);
    opt.max_connections(10)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(false);

    Database::connect(opt).await
}

/// Apply the bundled schema. Statements are idempotent, so this runs on every start.
pub async fn run_migrations(db: &DatabaseConnection) -> Result<(), DbErr> {
    let migration = include_str!("../../../../migrations/001_initial.sql");

    for statement in migration.split(';') {
        let statement = strip_comments(statement);
        if statement.is_empty() {
            continue;
        }
        db.execute(Statement::from_string(
            sea_orm::DatabaseBackend::Postgres,
            statement,
        ))
        .await?;
    }

    tracing::info!("Database schema is up to date");
    Ok(())
}

fn strip_comments(statement: &str) -> String {
    statement
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Map a database failure onto the club error taxonomy.
///
/// Unique violations are left to the call site, which knows which key clashed.
pub(crate) fn map_db_err(err: DbErr) -> ClubError {
    match err {
        DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => {
            tracing::error!(error = %err, "Database unreachable");
            ClubError::StoreUnavailable(err.to_string())
        }
        DbErr::RecordNotFound(what) => ClubError::NotFound(what),
        other => {
            tracing::error!(error = %other, "Database query failed");
            ClubError::Internal(other.to_string())
        }
    }
}
