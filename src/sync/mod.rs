use crate::error::{CleanupError, SyncError};
use crate::models::{CreatedTimeEntry, NewTimeEntry, RemoteSessionRecord};
use async_trait::async_trait;
use scopeguard::guard;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

mod http;
mod memory;

pub use http::HttpBackend;
pub use memory::MemoryMirror;

/// Конфигурация синхронизации (api_base_url, таймауты, app_version)
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub http_timeout_secs: u64,
    /// App version sent in X-App-Version header for debugging version skew
    pub app_version: String,
    /// Bearer-токен от провайдера аутентификации (если есть)
    pub auth_token: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            http_timeout_secs: 30,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            auth_token: None,
        }
    }
}

/// Серверное зеркало сессии: Hydrate / Upsert / Delete по user id
#[async_trait]
pub trait RemoteMirror: Send + Sync {
    /// None - записи нет (404)
    async fn hydrate(&self, user_id: &str) -> Result<Option<RemoteSessionRecord>, SyncError>;
    async fn upsert(&self, user_id: &str, record: &RemoteSessionRecord) -> Result<(), SyncError>;
    /// Идемпотентно: отсутствие записи - не ошибка
    async fn delete(&self, user_id: &str) -> Result<(), SyncError>;
}

/// Создание постоянной записи времени (system of record)
#[async_trait]
pub trait TimeEntryApi: Send + Sync {
    async fn create_entry(&self, entry: &NewTimeEntry) -> Result<CreatedTimeEntry, SyncError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOp {
    Hydrate,
    Upsert,
    Delete,
}

impl fmt::Display for SyncOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOp::Hydrate => f.write_str("hydrate"),
            SyncOp::Upsert => f.write_str("upsert"),
            SyncOp::Delete => f.write_str("delete"),
        }
    }
}

/// Наблюдатель за проглоченными ошибками синхронизации.
/// Ошибки не ретраятся и не всплывают - только сюда.
pub trait SyncObserver: Send + Sync {
    fn on_sync_failure(&self, op: SyncOp, err: &SyncError);
    fn on_cleanup_failure(&self, err: &CleanupError);
    fn on_sync_success(&self, _op: SyncOp) {}
}

/// Наблюдатель по умолчанию: лог + счётчики
#[derive(Debug, Default)]
pub struct SyncStats {
    upserts_sent: AtomicU64,
    upsert_failures: AtomicU64,
    hydrate_failures: AtomicU64,
    cleanup_failures: AtomicU64,
    last_sync_at: Mutex<Option<i64>>,
    last_error: Mutex<Option<String>>,
}

/// Снимок статистики для статус-строки
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatusResponse {
    pub upserts_sent: u64,
    pub upsert_failures: u64,
    pub hydrate_failures: u64,
    pub cleanup_failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SyncStats {
    pub fn status(&self) -> SyncStatusResponse {
        SyncStatusResponse {
            upserts_sent: self.upserts_sent.load(Ordering::Relaxed),
            upsert_failures: self.upsert_failures.load(Ordering::Relaxed),
            hydrate_failures: self.hydrate_failures.load(Ordering::Relaxed),
            cleanup_failures: self.cleanup_failures.load(Ordering::Relaxed),
            last_sync_at: self.last_sync_at.lock().ok().and_then(|v| *v),
            last_error: self.last_error.lock().ok().and_then(|v| v.clone()),
        }
    }

    fn remember_error(&self, message: String) {
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(message);
        }
    }
}

impl SyncObserver for SyncStats {
    fn on_sync_failure(&self, op: SyncOp, err: &SyncError) {
        match op {
            SyncOp::Upsert => self.upsert_failures.fetch_add(1, Ordering::Relaxed),
            SyncOp::Hydrate => self.hydrate_failures.fetch_add(1, Ordering::Relaxed),
            SyncOp::Delete => self.cleanup_failures.fetch_add(1, Ordering::Relaxed),
        };
        warn!("[SYNC] {} failed (will not retry): {}", op, err);
        self.remember_error(format!("{}: {}", op, err));
    }

    fn on_cleanup_failure(&self, err: &CleanupError) {
        self.cleanup_failures.fetch_add(1, Ordering::Relaxed);
        warn!("[COMMIT] Cleanup after commit failed (ignored): {}", err);
        self.remember_error(err.to_string());
    }

    fn on_sync_success(&self, op: SyncOp) {
        if op == SyncOp::Upsert {
            self.upserts_sent.fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(mut last) = self.last_sync_at.lock() {
            *last = Some(chrono::Utc::now().timestamp());
        }
    }
}

/// Менеджер синхронизации с серверным зеркалом.
/// Upsert - fire-and-forget: без очереди, без ретраев, без backoff.
/// Следующий естественный триггер отправит актуальное состояние.
#[derive(Clone)]
pub struct SyncManager {
    pub(crate) mirror: Arc<dyn RemoteMirror>,
    pub(crate) observer: Arc<dyn SyncObserver>,
    pub(crate) user_id: String,
    /// Отправки в полёте (для drain при завершении)
    in_flight: Arc<Mutex<JoinSet<()>>>,
    /// Single-flight для гидрации
    is_hydrating: Arc<AtomicBool>,
}

impl SyncManager {
    pub fn new(
        mirror: Arc<dyn RemoteMirror>,
        observer: Arc<dyn SyncObserver>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            mirror,
            observer,
            user_id: user_id.into(),
            in_flight: Arc::new(Mutex::new(JoinSet::new())),
            is_hydrating: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn observer(&self) -> &Arc<dyn SyncObserver> {
        &self.observer
    }

    /// Запустить upsert в фоне. Без tokio runtime - пропускаем (следующий триггер догонит).
    pub fn push(&self, record: RemoteSessionRecord) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                debug!("[SYNC] No async runtime, skipping upsert");
                return;
            }
        };

        let mirror = self.mirror.clone();
        let observer = self.observer.clone();
        let user_id = self.user_id.clone();
        let task = async move {
            match mirror.upsert(&user_id, &record).await {
                Ok(()) => {
                    debug!(
                        "[SYNC] Upsert ok (generation {:?})",
                        record.generation
                    );
                    observer.on_sync_success(SyncOp::Upsert);
                }
                Err(e) => observer.on_sync_failure(SyncOp::Upsert, &e),
            }
        };

        match self.in_flight.lock() {
            Ok(mut set) => {
                // Убираем завершённые, чтобы JoinSet не рос бесконечно
                while set.try_join_next().is_some() {}
                set.spawn_on(task, &handle);
            }
            Err(_) => {
                handle.spawn(task);
            }
        }
    }

    /// Upsert с ожиданием ответа (финальная запись перед удалением зеркала)
    pub async fn push_now(&self, record: RemoteSessionRecord) -> Result<(), SyncError> {
        match self.mirror.upsert(&self.user_id, &record).await {
            Ok(()) => {
                self.observer.on_sync_success(SyncOp::Upsert);
                Ok(())
            }
            Err(e) => {
                self.observer.on_sync_failure(SyncOp::Upsert, &e);
                Err(e)
            }
        }
    }

    /// Дождаться всех отправок в полёте
    pub async fn drain(&self) {
        let mut pending = match self.in_flight.lock() {
            Ok(mut set) => std::mem::take(&mut *set),
            Err(_) => return,
        };
        while pending.join_next().await.is_some() {}
    }

    /// Прочитать зеркало. Ошибка - не фатальна: остаётся локальное состояние.
    /// Повторный вызов во время гидрации пропускается.
    pub async fn fetch(&self) -> Option<RemoteSessionRecord> {
        if self
            .is_hydrating
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("[HYDRATE] Another hydrate already in progress, skipping");
            return None;
        }

        let _guard = guard((), |_| {
            self.is_hydrating.store(false, Ordering::Release);
        });

        match self.mirror.hydrate(&self.user_id).await {
            Ok(Some(record)) => {
                self.observer.on_sync_success(SyncOp::Hydrate);
                Some(record)
            }
            Ok(None) => {
                info!("[HYDRATE] No remote session for user, keeping local state");
                self.observer.on_sync_success(SyncOp::Hydrate);
                None
            }
            Err(e) => {
                self.observer.on_sync_failure(SyncOp::Hydrate, &e);
                None
            }
        }
    }

    /// Удалить зеркало (после коммита). Ошибку решает вызывающий.
    pub async fn delete(&self) -> Result<(), SyncError> {
        self.mirror.delete(&self.user_id).await?;
        self.observer.on_sync_success(SyncOp::Delete);
        Ok(())
    }
}
