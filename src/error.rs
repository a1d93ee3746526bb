//! Ошибки движка рабочей сессии.
//!
//! До пользователя доходят только [`FinishError`]; всё остальное логируется
//! и передаётся наблюдателю синхронизации, не прерывая учёт времени.

/// Ошибки обращения к серверу (зеркало сессии, создание записи времени)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("Network: {0}")]
    Network(String),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Decode: {0}")]
    Decode(String),
    #[error("Encode: {0}")]
    Encode(String),
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SyncError::Decode(e.to_string())
        } else {
            SyncError::Network(e.to_string())
        }
    }
}

/// Ошибки локального хранилища
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialize: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Database mutex poisoned: {0}")]
    Poisoned(String),
}

/// Ошибки завершения сессии (видны пользователю)
#[derive(Debug, thiserror::Error)]
pub enum FinishError {
    /// Нечего коммитить: после округления до сотых часа получилось 0.00
    #[error("Session has no tracked time yet ({elapsed_seconds}s elapsed)")]
    EmptyDuration { elapsed_seconds: u64 },
    /// Сервер не создал запись времени; состояние сессии не тронуто, можно повторить
    #[error("Failed to create time entry: {0}")]
    Commit(#[source] SyncError),
}

/// Ошибки очистки после успешного коммита. Никогда не всплывают наверх.
#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    #[error("Remote session delete failed: {0}")]
    RemoteDelete(#[source] SyncError),
    #[error("Local session clear failed: {0}")]
    LocalClear(#[source] StoreError),
}
