use super::transition;
use super::{SessionEngine, LOCAL_SESSION_KEY};
use crate::error::StoreError;
use crate::models::{LocalSessionRecord, SessionState};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

impl SessionEngine {
    /// Сохранить текущее состояние локально.
    /// Публичный метод для явного сохранения (например, при закрытии или панике)
    pub fn save_state(&self) -> Result<(), StoreError> {
        let snapshot = self.snapshot();
        self.write_local(&snapshot)
    }

    fn write_local(&self, state: &SessionState) -> Result<(), StoreError> {
        let store = match &self.store {
            Some(store) => store,
            None => return Ok(()), // Нет хранилища - пропускаем
        };
        let json = serde_json::to_string(&LocalSessionRecord::from(state))?;
        store.put(LOCAL_SESSION_KEY, &json)
    }

    /// Локальная запись после перехода/tick'а. Ошибка не должна мешать учёту времени.
    pub(crate) fn persist_local(&self, state: &SessionState) {
        if let Err(e) = self.write_local(state) {
            error!("[DB] Failed to persist session locally: {}", e);
        }
    }

    pub(crate) fn clear_local(&self) -> Result<(), StoreError> {
        match &self.store {
            Some(store) => store.remove(LOCAL_SESSION_KEY),
            None => Ok(()),
        }
    }

    /// Прочитать локальную запись
    /// GUARD: повреждённая запись логируется и игнорируется, не крашимся
    fn load_local(&self) -> Option<LocalSessionRecord> {
        let store = self.store.as_ref()?;
        let raw = match store.get(LOCAL_SESSION_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                error!("[RECOVERY] Failed to read local session: {}", e);
                return None;
            }
        };
        match serde_json::from_str::<LocalSessionRecord>(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("[RECOVERY] Ignoring unreadable local session record: {}", e);
                None
            }
        }
    }

    /// Синхронная часть активации: локальная запись или свежая сессия.
    /// Возвращает true, если состояние восстановлено из хранилища.
    pub fn restore_local(&self) -> bool {
        let now = self.clock.now_ms();
        let (restored, state) = match self.load_local() {
            Some(record) => {
                info!(
                    "[RECOVERY] Restored local session: {}s elapsed, running={}",
                    record.elapsed_seconds, record.is_running
                );
                (true, record.into_state())
            }
            None => {
                info!(
                    "[RECOVERY] No saved session, starting fresh ({}s seed)",
                    self.config.seed_elapsed_seconds
                );
                (
                    false,
                    SessionState::fresh_running(self.config.seed_elapsed_seconds, now),
                )
            }
        };
        let state = transition::reanchor(state, now);
        *self.lock_state() = state.clone();
        if !restored {
            self.persist_local(&state);
        }
        restored
    }

    /// Асинхронная гидрация с сервера. Ответ перезаписывает присутствующие поля целиком.
    /// Ошибка - остаётся локальное состояние, пользователю ничего не показываем.
    pub async fn hydrate_remote(&self) -> bool {
        let record = match self.sync.fetch().await {
            Some(record) => record,
            None => return false,
        };

        let now = self.clock.now_ms();
        let snapshot = {
            let mut state = self.lock_state();
            let mut next = state.clone();
            record.apply_to(&mut next);
            *state = transition::reanchor(next, now);
            state.clone()
        };
        info!(
            "[HYDRATE] Applied remote session: {}s elapsed, {}s paused, running={}",
            snapshot.elapsed_seconds, snapshot.paused_seconds, snapshot.is_running
        );
        self.persist_local(&snapshot);
        true
    }

    /// Активация: локальная запись сразу, сервер - в фоне (побеждает, когда ответит)
    pub fn activate(self: &Arc<Self>) {
        self.restore_local();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let engine = Arc::clone(self);
                handle.spawn(async move {
                    engine.hydrate_remote().await;
                });
            }
            Err(_) => {
                debug!("[HYDRATE] No async runtime, skipping remote hydrate");
            }
        }
    }
}
