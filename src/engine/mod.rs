use crate::clock::Clock;
use crate::database::LocalStore;
use crate::models::SessionState;
use crate::sync::{SyncManager, TimeEntryApi};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

mod core;
mod db;
pub mod ticker;
pub mod transition;

/// Ключ локальной записи сессии
pub const LOCAL_SESSION_KEY: &str = "work_session";

/// Как считается elapsed_seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElapsedMode {
    /// +1 за каждый tick. Пропущенные tick'и (сон, фон) не досчитываются.
    #[default]
    Ticks,
    /// elapsed = elapsed_at_anchor + (now - anchor). Без дрейфа.
    Anchored,
}

impl FromStr for ElapsedMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ticks" => Ok(ElapsedMode::Ticks),
            "anchored" => Ok(ElapsedMode::Anchored),
            other => Err(format!("unknown elapsed mode: {}", other)),
        }
    }
}

/// Настройки движка сессии
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Пользователь, чья сессия (приходит от провайдера идентичности)
    pub user_id: String,
    /// Цель для progress_ratio (по умолчанию рабочий день)
    pub target_seconds: u64,
    /// Upsert каждые N секунд работы
    pub push_every_secs: u64,
    /// elapsed при самом первом запуске, когда нет сохранённой записи
    pub seed_elapsed_seconds: u64,
    pub elapsed_mode: ElapsedMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            target_seconds: 8 * 3600,
            push_every_secs: 15,
            seed_elapsed_seconds: 0,
            elapsed_mode: ElapsedMode::Ticks,
        }
    }
}

/// Фаза FSM, выводится из полей состояния.
/// Finished - транзиентна: после коммита сразу свежая не идущая сессия.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    Running,
    Paused,
}

impl SessionPhase {
    pub fn of(state: &SessionState) -> Self {
        if state.is_running {
            SessionPhase::Running
        } else {
            SessionPhase::Paused
        }
    }
}

/// Снимок для отображения (ничего из этого не сохраняется)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub phase: SessionPhase,
    pub elapsed_seconds: u64,
    pub paused_seconds: u64,
    pub display_pause_seconds: u64,
    /// Плавное значение для анимации (якорь + wall clock)
    pub display_elapsed_ms: u64,
    pub progress_ratio: f64,
    pub pause_started_at: Option<i64>,
    pub last_known_now: i64,
}

/// Движок рабочей сессии.
/// Единственный владелец SessionState; mutex не держится через .await
pub struct SessionEngine {
    pub(crate) state: Mutex<SessionState>,
    pub(crate) config: EngineConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) store: Option<Arc<dyn LocalStore>>,
    pub(crate) sync: SyncManager,
    pub(crate) entries: Arc<dyn TimeEntryApi>,
    /// Идёт коммит: tick'и не считаются, чтобы reset не выбросил их молча
    pub(crate) committing: AtomicBool,
}

impl SessionEngine {
    /// Движок без локального хранилища. Состояние пустое до activate().
    pub fn new(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        sync: SyncManager,
        entries: Arc<dyn TimeEntryApi>,
    ) -> Self {
        Self {
            state: Mutex::new(SessionState::default()),
            config,
            clock,
            store: None,
            sync,
            entries,
            committing: AtomicBool::new(false),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sync(&self) -> &SyncManager {
        &self.sync
    }

    /// Копия канонического состояния
    pub fn snapshot(&self) -> SessionState {
        self.lock_state().clone()
    }

    /// Poisoned mutex не должен останавливать учёт времени - забираем данные как есть
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("[TIMER] State mutex poisoned, recovering inner state");
            poisoned.into_inner()
        })
    }
}
