//! Чистые переходы FSM: `fn(state, now) -> state`.
//!
//! Никакого I/O и глобального состояния - всё время приходит аргументом (Unix ms),
//! поэтому переходы проверяются без реальных часов.

use super::ElapsedMode;
use crate::models::{Hours, RunAnchor, SessionState};

/// Целые секунды между двумя метками, отрицательная разница (часы назад) → 0
fn whole_seconds_between(from_ms: i64, to_ms: i64) -> u64 {
    let delta = to_ms.saturating_sub(from_ms).max(0);
    (delta / 1000) as u64
}

/// Running → Paused. На паузе - no-op.
pub fn pause(mut state: SessionState, now: i64) -> SessionState {
    if !state.is_running {
        return state;
    }
    state.is_running = false;
    state.pause_started_at = Some(now);
    state.run_anchor = None;
    state
}

/// Paused → Running. Время паузы добавляется в paused_seconds.
pub fn resume(state: SessionState, now: i64) -> SessionState {
    if state.is_running {
        return state;
    }
    let mut state = flush_pause(state, now);
    state.is_running = true;
    state.run_anchor = Some(RunAnchor {
        wall_ms: now,
        elapsed_at: state.elapsed_seconds,
    });
    state
}

/// Свернуть текущую паузу в paused_seconds, не запуская таймер
pub fn flush_pause(mut state: SessionState, now: i64) -> SessionState {
    if let Some(started) = state.pause_started_at.take() {
        state.paused_seconds = state
            .paused_seconds
            .saturating_add(whole_seconds_between(started, now));
    }
    state
}

/// Секундный tick. Единственный писатель elapsed_seconds.
pub fn tick(mut state: SessionState, now: i64, mode: ElapsedMode) -> SessionState {
    state.last_known_now = now;
    if !state.is_running {
        return state;
    }
    match (mode, state.run_anchor) {
        (ElapsedMode::Anchored, Some(anchor)) => {
            let anchored = anchor
                .elapsed_at
                .saturating_add(whole_seconds_between(anchor.wall_ms, now));
            // Часы могли уйти назад - elapsed не убывает
            state.elapsed_seconds = state.elapsed_seconds.max(anchored);
        }
        _ => {
            state.elapsed_seconds = state.elapsed_seconds.saturating_add(1);
        }
    }
    state
}

/// Привязать якорь к текущему моменту (после гидрации/активации)
pub fn reanchor(mut state: SessionState, now: i64) -> SessionState {
    state.last_known_now = now;
    state.run_anchor = if state.is_running {
        Some(RunAnchor {
            wall_ms: now,
            elapsed_at: state.elapsed_seconds,
        })
    } else {
        None
    };
    state
}

/// Сброс после коммита: не идёт, без паузы. Поколение сохраняется - оно только растёт.
pub fn reset(state: SessionState, now: i64) -> SessionState {
    SessionState {
        last_known_now: now,
        generation: state.generation,
        ..Default::default()
    }
}

/// round(elapsed / 3600, 2)
pub fn finish_hours(state: &SessionState) -> Hours {
    Hours::from_seconds(state.elapsed_seconds)
}

/// Пересёк ли elapsed границу очередного upsert (каждые `every` секунд)
pub fn crossed_push_boundary(before: u64, after: u64, every: u64) -> bool {
    if every == 0 || after <= before {
        return false;
    }
    after / every != before / every
}

pub fn display_pause_seconds(state: &SessionState, now: i64) -> u64 {
    let current = match (state.is_running, state.pause_started_at) {
        (false, Some(started)) => whole_seconds_between(started, now),
        _ => 0,
    };
    state.paused_seconds.saturating_add(current)
}

pub fn progress_ratio(state: &SessionState, target_seconds: u64) -> f64 {
    if target_seconds == 0 {
        return 1.0;
    }
    (state.elapsed_seconds as f64 / target_seconds as f64).min(1.0)
}

/// Плавный elapsed для кадра: якорь + wall clock, но не меньше авторитетного счётчика
pub fn display_elapsed_ms(state: &SessionState, now: i64) -> u64 {
    let authoritative = state.elapsed_seconds.saturating_mul(1000);
    match (state.is_running, state.run_anchor) {
        (true, Some(anchor)) => {
            let since = now.saturating_sub(anchor.wall_ms).max(0) as u64;
            anchor
                .elapsed_at
                .saturating_mul(1000)
                .saturating_add(since)
                .max(authoritative)
        }
        _ => authoritative,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_760_000_000_000;

    fn running(elapsed: u64) -> SessionState {
        SessionState::fresh_running(elapsed, T0)
    }

    #[test]
    fn test_ticks_accumulate_only_while_running() {
        let mut state = running(10);
        for i in 1..=5 {
            state = tick(state, T0 + i * 1000, ElapsedMode::Ticks);
        }
        assert_eq!(state.elapsed_seconds, 15);

        state = pause(state, T0 + 6000);
        for i in 7..=9 {
            state = tick(state, T0 + i * 1000, ElapsedMode::Ticks);
        }
        assert_eq!(state.elapsed_seconds, 15);
        assert_eq!(state.last_known_now, T0 + 9000);
    }

    #[test]
    fn test_missed_ticks_are_not_backfilled_in_ticks_mode() {
        let state = running(0);
        // Один tick после часа простоя - всё равно +1
        let state = tick(state, T0 + 3_600_000, ElapsedMode::Ticks);
        assert_eq!(state.elapsed_seconds, 1);
    }

    #[test]
    fn test_anchored_mode_catches_up_missed_ticks() {
        let state = running(100);
        let state = tick(state, T0 + 3_600_000, ElapsedMode::Anchored);
        assert_eq!(state.elapsed_seconds, 3_700);
    }

    #[test]
    fn test_anchored_mode_never_goes_backwards() {
        let state = running(100);
        let state = tick(state, T0 - 50_000, ElapsedMode::Anchored);
        assert_eq!(state.elapsed_seconds, 100);
    }

    #[test]
    fn test_pause_sets_mark_and_is_idempotent() {
        let state = pause(running(5), T0 + 1000);
        assert!(!state.is_running);
        assert_eq!(state.pause_started_at, Some(T0 + 1000));

        let again = pause(state.clone(), T0 + 9000);
        assert_eq!(again, state);
    }

    #[test]
    fn test_resume_adds_pause_duration() {
        let state = pause(running(5), T0);
        let state = resume(state, T0 + 30_000);
        assert!(state.is_running);
        assert_eq!(state.paused_seconds, 30);
        assert_eq!(state.pause_started_at, None);
    }

    #[test]
    fn test_resume_clamps_negative_pause() {
        let state = pause(running(5), T0);
        let state = resume(state, T0 - 10_000);
        assert_eq!(state.paused_seconds, 0);
        assert_eq!(state.pause_started_at, None);
    }

    #[test]
    fn test_resume_without_pause_mark_just_starts() {
        let idle = SessionState::default();
        let state = resume(idle, T0);
        assert!(state.is_running);
        assert_eq!(state.paused_seconds, 0);
        assert_eq!(
            state.run_anchor,
            Some(RunAnchor {
                wall_ms: T0,
                elapsed_at: 0
            })
        );
    }

    #[test]
    fn test_resume_while_running_is_noop() {
        let state = running(5);
        assert_eq!(resume(state.clone(), T0 + 5000), state);
    }

    #[test]
    fn test_flush_pause_keeps_timer_stopped() {
        let state = pause(running(5), T0);
        let state = flush_pause(state, T0 + 12_500);
        assert!(!state.is_running);
        assert_eq!(state.paused_seconds, 12);
        assert_eq!(state.pause_started_at, None);
    }

    #[test]
    fn test_reset_keeps_generation() {
        let mut state = running(500);
        state.generation = 9;
        state.paused_seconds = 20;
        let state = reset(state, T0);
        assert_eq!(state.elapsed_seconds, 0);
        assert_eq!(state.paused_seconds, 0);
        assert!(!state.is_running);
        assert_eq!(state.pause_started_at, None);
        assert_eq!(state.generation, 9);
    }

    #[test]
    fn test_push_boundary() {
        assert!(crossed_push_boundary(14, 15, 15));
        assert!(!crossed_push_boundary(15, 16, 15));
        assert!(crossed_push_boundary(13, 31, 15));
        assert!(!crossed_push_boundary(15, 15, 15));
        assert!(!crossed_push_boundary(14, 15, 0));
    }

    #[test]
    fn test_display_pause_includes_current_pause() {
        let mut state = pause(running(0), T0);
        state.paused_seconds = 40;
        assert_eq!(display_pause_seconds(&state, T0 + 20_000), 60);

        let state = resume(state, T0 + 20_000);
        assert_eq!(display_pause_seconds(&state, T0 + 99_000), 60);
    }

    #[test]
    fn test_progress_ratio_is_capped() {
        let state = running(4 * 3600);
        assert!((progress_ratio(&state, 8 * 3600) - 0.5).abs() < f64::EPSILON);
        let state = running(10 * 3600);
        assert_eq!(progress_ratio(&state, 8 * 3600), 1.0);
        assert_eq!(progress_ratio(&state, 0), 1.0);
    }

    #[test]
    fn test_display_elapsed_is_smooth_and_never_behind() {
        let state = running(10);
        assert_eq!(display_elapsed_ms(&state, T0 + 1_500), 11_500);

        let ticked = tick(state, T0 + 1000, ElapsedMode::Ticks);
        let ticked = tick(ticked, T0 + 2000, ElapsedMode::Ticks);
        // Якорь отстаёт от авторитетного счётчика - берём максимум
        assert_eq!(display_elapsed_ms(&ticked, T0), 12_000);

        let paused = pause(ticked, T0 + 2_000);
        assert_eq!(display_elapsed_ms(&paused, T0 + 60_000), 12_000);
    }

    #[test]
    fn test_finish_hours_rounding() {
        assert!(finish_hours(&running(0)).is_zero());
        assert!(finish_hours(&running(17)).is_zero());
        assert_eq!(finish_hours(&running(3600)).hundredths(), 100);
    }
}
