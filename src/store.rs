// SQLite persistence layer for the settings record.
//
// One logical record lives under a fixed key in a key-value table. The
// application loop owns the only canonical in-memory copy; this module
// is purely the durable layer underneath it. Writes are whole-object
// replacements: last writer wins, no field-level merge.

use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection};
use thiserror::Error;
use tracing::info;

use crate::settings::{Settings, SCHEMA_VERSION};

/// Key under which the settings record is stored.
const SETTINGS_KEY: &str = "rafflewatch";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    /// The persistence layer is unreachable. Surfaced to the caller,
    /// never retried here.
    #[error("settings storage unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),

    /// The stored payload does not deserialize.
    #[error("stored settings are corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// The stored payload was written by a newer schema than this build
    /// understands.
    #[error("stored settings use unsupported schema version {0}")]
    Unsupported(u32),
}

// ---------------------------------------------------------------------------
// SettingsStore
// ---------------------------------------------------------------------------

/// SQLite-backed persistence for the settings record.
pub struct SettingsStore {
    conn: Mutex<Connection>,
}

impl SettingsStore {
    /// Open (or create) the database at `path` and ensure the schema
    /// exists. Pass `":memory:"` for an ephemeral database in tests.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS settings (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("settings store mutex poisoned")
    }

    /// Return the persisted settings, or the default value if nothing
    /// was ever written. Legacy payloads (schema version 0) are upgraded
    /// in memory; the upgraded form is persisted on the next `write`.
    /// `is_loading` is always false on the returned value: a successful
    /// read *is* hydration.
    pub fn read(&self) -> Result<Settings, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
        let mut rows = stmt.query(params![SETTINGS_KEY])?;

        let mut settings = match rows.next()? {
            Some(row) => {
                let json_str: String = row.get(0)?;
                let stored: Settings = serde_json::from_str(&json_str)?;
                migrate(stored)?
            }
            None => Settings::default(),
        };

        settings.is_loading = false;
        Ok(settings)
    }

    /// Replace the persisted settings atomically. The stored payload is
    /// stamped with the current schema version regardless of what the
    /// caller's copy carries.
    pub fn write(&self, settings: &Settings) -> Result<(), StoreError> {
        let mut stamped = settings.clone();
        stamped.schema_version = SCHEMA_VERSION;
        let json_str = serde_json::to_string(&stamped)?;

        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![SETTINGS_KEY, json_str],
        )?;
        Ok(())
    }

    /// Reset to the default settings value. Not a delete: dependent
    /// surfaces observe a well-formed object rather than an absence.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.write(&Settings::default())
    }
}

/// Upgrade a stored payload to the current schema version.
///
/// Version 0 payloads predate versioning; their missing fields were
/// already filled with defaults during deserialization, so the upgrade
/// is just a stamp. Versions newer than this build are refused.
fn migrate(mut settings: Settings) -> Result<Settings, StoreError> {
    match settings.schema_version {
        0 => {
            info!("migrating stored settings from schema version 0");
            settings.schema_version = SCHEMA_VERSION;
            Ok(settings)
        }
        SCHEMA_VERSION => Ok(settings),
        other => Err(StoreError::Unsupported(other)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
