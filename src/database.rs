use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

use crate::error::StoreError;

/// Локальное долговременное хранилище (ключ → значение), привязанное к устройству.
/// Переживает перезапуск до того, как сервер успел ответить.
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Log IO-related DB errors for easier diagnosis (disk full, permission denied).
/// Does not change error propagation: caller still returns Err.
fn log_io_error_if_any(context: &str, e: &rusqlite::Error) {
    use rusqlite::ffi::ErrorCode;
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = e {
        match ffi_err.code {
            ErrorCode::DiskFull => {
                error!(
                    "[DB] {}: Disk full. Free space on drive or check data directory.",
                    context
                );
            }
            ErrorCode::ReadOnly | ErrorCode::CannotOpen => {
                error!(
                    "[DB] {}: Permission denied or read-only. Check data directory is writable.",
                    context
                );
            }
            ErrorCode::SystemIoFailure => {
                error!("[DB] {}: I/O error. Check disk and permissions.", context);
            }
            _ => {}
        }
    }
}

/// SQLite-реализация локального хранилища
pub struct Database {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Current schema version (PRAGMA user_version). Bump when adding migrations.
    const SCHEMA_VERSION: i32 = 1;

    /// Безопасная блокировка соединения с обработкой poisoned mutex
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    pub fn new(db_path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;

        // GUARD: Integrity check on startup, detect corruption before init
        let integrity: String = conn.query_row("PRAGMA integrity_check", [], |r| r.get(0))?;
        if integrity.to_lowercase() != "ok" {
            return Err(StoreError::Sqlite(rusqlite::Error::InvalidParameterName(
                format!("Database corruption detected: {}", integrity),
            )));
        }

        // WAL лучше переживает обрывы записи; не критично, если не включился
        if let Err(e) = conn.pragma_update(None, "journal_mode", "WAL") {
            warn!(
                "[DB] Failed to enable WAL mode: {}. Continuing with default journal mode.",
                e
            );
        }
        // Запись идёт каждую секунду - NORMAL безопасен с WAL
        if let Err(e) = conn.pragma_update(None, "synchronous", "NORMAL") {
            warn!(
                "[DB] Failed to set synchronous=NORMAL: {}. Continuing with default.",
                e
            );
        }

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Versioned migrations using SQLite user_version pragma.
    fn run_migrations(&self) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        let current: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

        if current < 1 {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS local_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
                [],
            )?;
        }

        conn.pragma_update(None, "user_version", Self::SCHEMA_VERSION)?;
        Ok(())
    }
}

impl LocalStore for Database {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.lock_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM local_store WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|e| {
                log_io_error_if_any("local_store get", &e);
                e
            })?;
        Ok(value)
    }

    /// Upsert одного ключа. Один statement - атомарен сам по себе.
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        let now = chrono::Utc::now().timestamp();
        conn.execute(
            "INSERT INTO local_store (key, value, updated_at) VALUES (?1, ?2, ?3)
     ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            params![key, value, now],
        )
        .map_err(|e| {
            log_io_error_if_any("local_store put", &e);
            e
        })?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM local_store WHERE key = ?1", params![key])
            .map_err(|e| {
                log_io_error_if_any("local_store remove", &e);
                e
            })?;
        Ok(())
    }
}
