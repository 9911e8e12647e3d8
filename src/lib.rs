use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tracing::debug;

pub mod cli;
pub mod collaborators;
pub mod conflict;
pub mod display;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod models;
pub mod records;
pub mod scheduler;
pub mod schedules;
pub mod schema;
pub mod sessions;
pub mod settings;
pub mod summary;
pub mod time;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{Error, Result};

use crate::manager::AttendanceManager;
use crate::settings::{DatabaseSettings, Settings};

/// The SQL migrations under `migrations/`, compiled into the binary.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Opens a connection to the `sqlite3` database at `settings.url`, enables foreign keys and the
/// busy timeout, and applies any pending migrations.
pub fn establish_connection(settings: &DatabaseSettings) -> Result<SqliteConnection> {
    let mut connection = SqliteConnection::establish(&settings.url)?;

    connection.batch_execute(&format!(
        "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {};",
        settings.busy_timeout_ms
    ))?;

    run_migrations(&mut connection)?;
    debug!(url = %settings.url, "connected to database");

    Ok(connection)
}

/// Applies every migration that has not been run yet.
pub fn run_migrations(connection: &mut SqliteConnection) -> Result<()> {
    let applied = connection
        .run_pending_migrations(MIGRATIONS)
        .map_err(|err| Error::Migration(err.to_string()))?;

    for version in applied {
        debug!(%version, "applied migration");
    }

    Ok(())
}

/// Creates an [`AttendanceManager`] from `config.toml` and the environment.
pub fn create_default_manager() -> Result<AttendanceManager> {
    let settings = Settings::load()?;

    AttendanceManager::connect(&settings)
}
