use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Каноническое состояние рабочей сессии.
/// Владелец - только движок; наружу отдаётся копиями.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Секунды работы (пишет только tick)
    pub elapsed_seconds: u64,
    /// Секунды паузы, накопленные за сессию
    pub paused_seconds: u64,
    pub is_running: bool,
    /// Unix ms начала текущей паузы. Some только на паузе.
    pub pause_started_at: Option<i64>,
    /// Последний tick (ms), только для отображения
    pub last_known_now: i64,
    /// Якорь текущего отрезка работы (для anchored-режима и плавного отображения)
    pub run_anchor: Option<RunAnchor>,
    /// Номер поколения для upsert; растёт с каждой отправкой
    pub generation: u64,
}

/// Точка отсчёта отрезка работы: wall clock + elapsed на этот момент
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunAnchor {
    pub wall_ms: i64,
    pub elapsed_at: u64,
}

impl SessionState {
    /// Свежая сессия, идущая с первого запуска
    pub fn fresh_running(seed_elapsed_seconds: u64, now: i64) -> Self {
        Self {
            elapsed_seconds: seed_elapsed_seconds,
            is_running: true,
            last_known_now: now,
            run_anchor: Some(RunAnchor {
                wall_ms: now,
                elapsed_at: seed_elapsed_seconds,
            }),
            ..Default::default()
        }
    }
}

/// Локальная запись (один ключ, JSON). pauseStartedAt - epoch ms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalSessionRecord {
    pub elapsed_seconds: u64,
    pub paused_seconds: u64,
    pub is_running: bool,
    pub pause_started_at: Option<i64>,
    pub generation: u64,
}

impl From<&SessionState> for LocalSessionRecord {
    fn from(state: &SessionState) -> Self {
        Self {
            elapsed_seconds: state.elapsed_seconds,
            paused_seconds: state.paused_seconds,
            is_running: state.is_running,
            pause_started_at: state.pause_started_at,
            generation: state.generation,
        }
    }
}

impl LocalSessionRecord {
    /// Восстановить состояние. Якорь и last_known_now выставляет движок.
    pub fn into_state(self) -> SessionState {
        SessionState {
            elapsed_seconds: self.elapsed_seconds,
            paused_seconds: self.paused_seconds,
            is_running: self.is_running,
            // Инвариант: метка паузы бывает только у остановленного таймера
            pause_started_at: if self.is_running {
                None
            } else {
                self.pause_started_at
            },
            generation: self.generation,
            ..Default::default()
        }
    }
}

/// Серверное зеркало сессии.
/// Все поля опциональны: при гидрации перезаписываются только присутствующие в ответе.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSessionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_running: Option<bool>,
    /// None - поля нет в ответе; Some(None) - явный null
    #[serde(
        default,
        deserialize_with = "present_nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub pause_started_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
}

fn present_nullable<'de, D>(deserializer: D) -> Result<Option<Option<DateTime<Utc>>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<DateTime<Utc>>::deserialize(deserializer).map(Some)
}

impl RemoteSessionRecord {
    /// Полный снимок состояния для upsert
    pub fn from_state(state: &SessionState) -> Self {
        Self {
            elapsed_seconds: Some(state.elapsed_seconds),
            paused_seconds: Some(state.paused_seconds),
            is_running: Some(state.is_running),
            pause_started_at: Some(state.pause_started_at.and_then(ms_to_datetime)),
            generation: Some(state.generation),
        }
    }

    /// Перезаписать поля состояния, присутствующие в записи. Без слияния и без сравнения времени.
    pub fn apply_to(&self, state: &mut SessionState) {
        if let Some(elapsed) = self.elapsed_seconds {
            state.elapsed_seconds = elapsed;
        }
        if let Some(paused) = self.paused_seconds {
            state.paused_seconds = paused;
        }
        if let Some(running) = self.is_running {
            state.is_running = running;
        }
        if let Some(pause_started_at) = self.pause_started_at {
            state.pause_started_at = pause_started_at.map(|dt| dt.timestamp_millis());
        }
        if let Some(generation) = self.generation {
            state.generation = generation;
        }
        if state.is_running {
            state.pause_started_at = None;
        }
    }
}

pub(crate) fn ms_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Часы с точностью до сотых (хранятся в сотых долях часа)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Hours(u64);

impl Hours {
    /// round(seconds / 3600, 2), половина округляется вверх
    pub fn from_seconds(seconds: u64) -> Self {
        Hours(seconds.saturating_add(18) / 36)
    }

    pub fn from_hundredths(hundredths: u64) -> Self {
        Hours(hundredths)
    }

    pub fn hundredths(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl fmt::Display for Hours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Hours {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(self.as_f64())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
}

/// Тело POST time-entry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTimeEntry {
    pub user_id: String,
    pub description: String,
    pub hours: Hours,
    pub date: NaiveDate,
    pub status: EntryStatus,
}

/// Сервер отдаёт id то числом, то строкой
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryId {
    Num(i64),
    Str(String),
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryId::Num(n) => write!(f, "{}", n),
            EntryId::Str(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedTimeEntry {
    pub id: EntryId,
}

/// Результат успешного завершения сессии (для навигации/уведомления)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishOutcome {
    pub entry_id: String,
    pub hours: Hours,
    pub paused_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hours_rounding() {
        assert_eq!(Hours::from_seconds(0).hundredths(), 0);
        assert_eq!(Hours::from_seconds(17).hundredths(), 0);
        assert_eq!(Hours::from_seconds(18).hundredths(), 1);
        assert_eq!(Hours::from_seconds(3600).hundredths(), 100);
        assert_eq!(Hours::from_seconds(5400).to_string(), "1.50");
        assert_eq!(Hours::from_seconds(3600 + 53).to_string(), "1.01");
    }

    #[test]
    fn test_hours_serialize_as_number() {
        let json = serde_json::to_string(&Hours::from_seconds(5400)).unwrap();
        assert_eq!(json, "1.5");
    }

    #[test]
    fn test_local_record_uses_epoch_ms_and_camel_case() {
        let record = LocalSessionRecord {
            elapsed_seconds: 42,
            paused_seconds: 7,
            is_running: false,
            pause_started_at: Some(1_700_000_000_123),
            generation: 3,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["elapsedSeconds"], 42);
        assert_eq!(json["pauseStartedAt"], 1_700_000_000_123i64);
        assert_eq!(json["isRunning"], false);
    }

    #[test]
    fn test_local_record_missing_fields_default() {
        let record: LocalSessionRecord =
            serde_json::from_str(r#"{"elapsedSeconds": 10, "isRunning": true}"#).unwrap();
        assert_eq!(record.elapsed_seconds, 10);
        assert_eq!(record.paused_seconds, 0);
        assert_eq!(record.pause_started_at, None);
        assert_eq!(record.generation, 0);
    }

    #[test]
    fn test_local_record_drops_pause_mark_when_running() {
        let record = LocalSessionRecord {
            is_running: true,
            pause_started_at: Some(5),
            ..Default::default()
        };
        assert_eq!(record.into_state().pause_started_at, None);
    }

    #[test]
    fn test_remote_record_iso_8601() {
        let state = SessionState {
            elapsed_seconds: 90,
            paused_seconds: 30,
            is_running: false,
            pause_started_at: Some(1_700_000_000_000),
            generation: 4,
            ..Default::default()
        };
        let json = serde_json::to_value(RemoteSessionRecord::from_state(&state)).unwrap();
        assert_eq!(json["pauseStartedAt"], "2023-11-14T22:13:20Z");
        assert_eq!(json["generation"], 4);
    }

    #[test]
    fn test_remote_record_absent_vs_null_pause() {
        let absent: RemoteSessionRecord =
            serde_json::from_str(r#"{"elapsedSeconds": 5}"#).unwrap();
        assert_eq!(absent.pause_started_at, None);

        let null: RemoteSessionRecord =
            serde_json::from_str(r#"{"pauseStartedAt": null}"#).unwrap();
        assert_eq!(null.pause_started_at, Some(None));
    }

    #[test]
    fn test_remote_apply_overwrites_present_fields_only() {
        let mut state = SessionState {
            elapsed_seconds: 100,
            paused_seconds: 20,
            is_running: false,
            pause_started_at: Some(1_000),
            ..Default::default()
        };
        let record: RemoteSessionRecord =
            serde_json::from_str(r#"{"elapsedSeconds": 500}"#).unwrap();
        record.apply_to(&mut state);
        assert_eq!(state.elapsed_seconds, 500);
        assert_eq!(state.paused_seconds, 20);
        assert_eq!(state.pause_started_at, Some(1_000));
    }

    #[test]
    fn test_entry_id_number_or_string() {
        let num: CreatedTimeEntry = serde_json::from_str(r#"{"id": 17}"#).unwrap();
        let text: CreatedTimeEntry = serde_json::from_str(r#"{"id": "te_17"}"#).unwrap();
        assert_eq!(num.id.to_string(), "17");
        assert_eq!(text.id.to_string(), "te_17");
    }

    #[test]
    fn test_new_time_entry_shape() {
        let entry = NewTimeEntry {
            user_id: "u1".into(),
            description: "Case review".into(),
            hours: Hours::from_seconds(3600),
            date: NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
            status: EntryStatus::Pending,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["hours"], 1.0);
        assert_eq!(json["date"], "2026-10-16");
        assert_eq!(json["status"], "pending");
    }
}
