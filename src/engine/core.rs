use super::transition;
use super::{SessionEngine, SessionPhase, SessionView};
use crate::error::{CleanupError, FinishError};
use crate::models::{
    ms_to_datetime, EntryStatus, FinishOutcome, NewTimeEntry, RemoteSessionRecord, SessionState,
};
use chrono::Local;
use scopeguard::guard;
use std::sync::atomic::Ordering;
use tracing::{debug, error, info, warn};

/// Следующее поколение + полный снимок для upsert. Вызывать под lock'ом.
fn stamp_for_push(state: &mut SessionState) -> RemoteSessionRecord {
    state.generation = state.generation.saturating_add(1);
    RemoteSessionRecord::from_state(state)
}

impl SessionEngine {
    /// Переход: Running → Paused.
    /// Возвращает false, если таймер уже стоит (no-op).
    pub fn pause(&self) -> bool {
        let now = self.clock.now_ms();
        let (snapshot, record) = {
            let mut state = self.lock_state();
            if !state.is_running {
                warn!("[FSM] Ignored pause: timer is not running");
                return false;
            }
            let mut next = transition::pause(state.clone(), now);
            let record = stamp_for_push(&mut next);
            *state = next;
            (state.clone(), record)
        };

        info!(
            "[TIMER] Paused at {}s elapsed ({}s paused so far)",
            snapshot.elapsed_seconds, snapshot.paused_seconds
        );
        self.persist_local(&snapshot);
        self.sync.push(record);
        true
    }

    /// Переход: Paused → Running. Длительность паузы уходит в paused_seconds.
    /// Возвращает false, если таймер уже идёт (no-op).
    pub fn resume(&self) -> bool {
        let now = self.clock.now_ms();
        let (snapshot, record) = {
            let mut state = self.lock_state();
            if state.is_running {
                warn!("[FSM] Ignored transition: Running → Running (already running)");
                return false;
            }
            let mut next = transition::resume(state.clone(), now);
            let record = stamp_for_push(&mut next);
            *state = next;
            (state.clone(), record)
        };

        info!(
            "[TIMER] Resumed at {}s elapsed ({}s paused total)",
            snapshot.elapsed_seconds, snapshot.paused_seconds
        );
        self.persist_local(&snapshot);
        self.sync.push(record);
        true
    }

    /// Секундный tick (вызывается раз в секунду независимо от паузы).
    /// Сохраняет локально при каждом приросте, пушит на границе push_every_secs.
    pub fn tick(&self) {
        if self.committing.load(Ordering::Acquire) {
            debug!("[TIMER] Tick skipped: commit in progress");
            return;
        }
        let now = self.clock.now_ms();
        let (snapshot, advanced, record) = {
            let mut state = self.lock_state();
            let before = state.elapsed_seconds;
            let mut next = transition::tick(state.clone(), now, self.config.elapsed_mode);
            let after = next.elapsed_seconds;
            let record = if next.is_running
                && transition::crossed_push_boundary(before, after, self.config.push_every_secs)
            {
                Some(stamp_for_push(&mut next))
            } else {
                None
            };
            *state = next;
            (state.clone(), after != before, record)
        };

        if advanced {
            self.persist_local(&snapshot);
        }
        if let Some(record) = record {
            debug!(
                "[TIMER] Push boundary at {}s elapsed",
                snapshot.elapsed_seconds
            );
            self.sync.push(record);
        }
    }

    /// Текущее состояние для отображения
    pub fn view(&self) -> SessionView {
        let now = self.clock.now_ms();
        let state = self.snapshot();
        SessionView {
            phase: SessionPhase::of(&state),
            elapsed_seconds: state.elapsed_seconds,
            paused_seconds: state.paused_seconds,
            display_pause_seconds: transition::display_pause_seconds(&state, now),
            display_elapsed_ms: transition::display_elapsed_ms(&state, now),
            progress_ratio: transition::progress_ratio(&state, self.config.target_seconds),
            pause_started_at: state.pause_started_at,
            last_known_now: state.last_known_now,
        }
    }

    /// Завершить сессию и закоммитить запись времени.
    ///
    /// 1. Создать запись (обязательно; при ошибке состояние не меняется)
    /// 2. Сбросить состояние, записать нули локально и на сервер
    /// 3. Удалить зеркало на сервере (best-effort)
    /// 4. Очистить локальное хранилище (best-effort)
    pub async fn finish(&self, description: &str) -> Result<FinishOutcome, FinishError> {
        let now = self.clock.now_ms();

        // Пауза сворачивается только в копии - при ошибке оригинал остаётся как был
        let candidate = transition::flush_pause(self.snapshot(), now);
        let hours = transition::finish_hours(&candidate);
        if hours.is_zero() {
            warn!(
                "[COMMIT] Refusing to finish empty session ({}s elapsed)",
                candidate.elapsed_seconds
            );
            return Err(FinishError::EmptyDuration {
                elapsed_seconds: candidate.elapsed_seconds,
            });
        }

        let date = ms_to_datetime(now)
            .map(|dt| dt.with_timezone(&Local).date_naive())
            .unwrap_or_else(|| Local::now().date_naive());
        let entry = NewTimeEntry {
            user_id: self.config.user_id.clone(),
            description: description.to_string(),
            hours,
            date,
            status: EntryStatus::Pending,
        };

        // GUARD: время ожидания ответа не считается ни в эту сессию, ни в следующую
        self.committing.store(true, Ordering::Release);
        let _committing = guard((), |_| {
            self.committing.store(false, Ordering::Release);
        });

        let created = self.entries.create_entry(&entry).await.map_err(|e| {
            error!("[COMMIT] Failed to create time entry ({}h): {}", hours, e);
            FinishError::Commit(e)
        })?;
        info!(
            "[COMMIT] Time entry {} created: {}h, {}s paused",
            created.id, hours, candidate.paused_seconds
        );

        let (reset_state, zero_record) = {
            let mut state = self.lock_state();
            let mut next = transition::reset(state.clone(), self.clock.now_ms());
            let record = stamp_for_push(&mut next);
            *state = next;
            (state.clone(), record)
        };

        // Сначала нулевая запись: если очистка не пройдёт, перезагрузка увидит 0, а не
        // уже закоммиченное время
        self.persist_local(&reset_state);
        // Отправки в полёте могли бы воскресить удалённую запись - дожидаемся их
        self.sync.drain().await;
        if let Err(e) = self.sync.push_now(zero_record).await {
            warn!("[COMMIT] Failed to zero remote session before delete: {}", e);
        }
        if let Err(e) = self.sync.delete().await {
            self.sync
                .observer()
                .on_cleanup_failure(&CleanupError::RemoteDelete(e));
        }
        if let Err(e) = self.clear_local() {
            self.sync
                .observer()
                .on_cleanup_failure(&CleanupError::LocalClear(e));
        }

        Ok(FinishOutcome {
            entry_id: created.id.to_string(),
            hours,
            paused_seconds: candidate.paused_seconds,
        })
    }
}
