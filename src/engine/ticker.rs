//! Планировщики: авторитетный секундный tick и частый кадр для отображения.
//! Оба на tokio::time, поэтому в тестах время можно остановить и промотать.

use super::{SessionEngine, SessionView};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Частота кадра для плавного отображения (~30 fps)
pub const FRAME_PERIOD: Duration = Duration::from_millis(33);

/// Авторитетный tick. Пропущенные срабатывания не догоняются (Skip).
pub fn spawn_ticker(engine: Arc<SessionEngine>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Первый tick interval'а срабатывает сразу - это не секунда работы
        interval.tick().await;
        loop {
            interval.tick().await;
            engine.tick();
        }
    })
}

/// Кадры для отображения. Best-effort: не пишет в состояние, останавливается,
/// когда все получатели закрыты.
pub fn spawn_frame_clock(
    engine: Arc<SessionEngine>,
    period: Duration,
) -> (JoinHandle<()>, watch::Receiver<SessionView>) {
    let (tx, rx) = watch::channel(engine.view());
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if tx.send(engine.view()).is_err() {
                debug!("[TIMER] Frame clock has no receivers, stopping");
                break;
            }
        }
    });
    (handle, rx)
}
