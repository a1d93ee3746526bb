use std::panic;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

mod clock;
mod config;
mod database;
mod engine;
mod error;
mod models;
mod sync;

pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::{AppConfig, ConfigError};
pub use crate::database::{Database, LocalStore};
pub use crate::engine::ticker::{spawn_frame_clock, spawn_ticker, FRAME_PERIOD, TICK_PERIOD};
pub use crate::engine::transition;
pub use crate::engine::{
    ElapsedMode, EngineConfig, SessionEngine, SessionPhase, SessionView, LOCAL_SESSION_KEY,
};
pub use crate::error::{CleanupError, FinishError, StoreError, SyncError};
pub use crate::models::{
    CreatedTimeEntry, EntryId, EntryStatus, FinishOutcome, Hours, LocalSessionRecord,
    NewTimeEntry, RemoteSessionRecord, RunAnchor, SessionState,
};
pub use crate::sync::{
    HttpBackend, MemoryMirror, RemoteMirror, SyncConfig, SyncManager, SyncObserver, SyncOp,
    SyncStats, SyncStatusResponse, TimeEntryApi,
};

/// Panic recovery: persist the session when a panic occurs.
static PANIC_ENGINE: OnceLock<Arc<SessionEngine>> = OnceLock::new();


/// Команда из stdin
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Pause,
    Resume,
    Status,
    Finish(String),
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    let (name, rest) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };
    match name.to_ascii_lowercase().as_str() {
        "pause" | "p" => Some(Command::Pause),
        "resume" | "r" => Some(Command::Resume),
        "status" | "s" => Some(Command::Status),
        "finish" | "f" => Some(Command::Finish(rest.to_string())),
        "quit" | "q" | "exit" => Some(Command::Quit),
        _ => None,
    }
}

fn format_clock(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

fn print_status(engine: &SessionEngine, stats: &SyncStats) {
    let view = engine.view();
    println!(
        "{:?} worked {} paused {} progress {:.0}%",
        view.phase,
        format_clock(view.elapsed_seconds),
        format_clock(view.display_pause_seconds),
        view.progress_ratio * 100.0
    );
    let sync = stats.status();
    println!(
        "sync: {} upserts, {} failed, {} hydrate failures, {} cleanup failures",
        sync.upserts_sent, sync.upsert_failures, sync.hydrate_failures, sync.cleanup_failures
    );
}

/// Точка входа бинаря: логирование, конфиг, runtime, цикл команд
pub fn run() {
    // Panic recovery: attempt to persist the session before panic unwinds
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        if let Some(engine) = PANIC_ENGINE.get() {
            if let Err(e) = engine.save_state() {
                eprintln!("[PANIC_RECOVERY] Failed to persist session: {}", e);
            } else {
                eprintln!("[PANIC_RECOVERY] Session persisted before panic");
            }
        }
        default_hook(info);
    }));

    // Инициализация логирования: по умолчанию info (если RUST_LOG не задан)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("[SETUP] Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("[SETUP] Failed to create Tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run_session(config)) {
        error!("[SETUP] {}", e);
        std::process::exit(1);
    }
}

async fn run_session(config: AppConfig) -> Result<(), StoreError> {
    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("[SETUP] Failed to create data directory {:?}: {}", parent, e);
            }
        }
    }
    let db = Arc::new(Database::new(&config.db_path.to_string_lossy())?);
    info!("[SETUP] Local store at {:?}", config.db_path);

    let (mirror, entries): (Arc<dyn RemoteMirror>, Arc<dyn TimeEntryApi>) = if config.offline {
        warn!("[SETUP] WORKTIMER_API_URL not set: offline mode, entries stay in memory");
        let memory = Arc::new(MemoryMirror::new());
        let mirror: Arc<dyn RemoteMirror> = memory.clone();
        let entries: Arc<dyn TimeEntryApi> = memory;
        (mirror, entries)
    } else {
        let http = Arc::new(HttpBackend::new(&config.sync));
        let mirror: Arc<dyn RemoteMirror> = http.clone();
        let entries: Arc<dyn TimeEntryApi> = http;
        (mirror, entries)
    };

    let stats = Arc::new(SyncStats::default());
    let sync = SyncManager::new(mirror, stats.clone(), config.engine.user_id.clone());
    let engine = Arc::new(
        SessionEngine::new(config.engine.clone(), Arc::new(SystemClock), sync, entries)
            .with_store(db),
    );
    let _ = PANIC_ENGINE.set(engine.clone());

    engine.activate();
    let ticker = spawn_ticker(engine.clone(), TICK_PERIOD);
    print_status(&engine, &stats);
    println!("commands: pause | resume | status | finish <description> | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut finished = false;
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                info!("[SETUP] Interrupted");
                break;
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("[SETUP] Failed to read stdin: {}", e);
                break;
            }
        };
        match parse_command(&line) {
            Some(Command::Pause) => {
                if !engine.pause() {
                    println!("already paused");
                }
            }
            Some(Command::Resume) => {
                if !engine.resume() {
                    println!("already running");
                }
            }
            Some(Command::Status) => print_status(&engine, &stats),
            Some(Command::Finish(description)) => match engine.finish(&description).await {
                Ok(outcome) => {
                    println!(
                        "committed entry {}: {}h ({}s paused)",
                        outcome.entry_id, outcome.hours, outcome.paused_seconds
                    );
                    finished = true;
                    break;
                }
                Err(FinishError::EmptyDuration { .. }) => {
                    println!("nothing to commit yet, keep working");
                }
                Err(e) => println!("{} (session kept, try again)", e),
            },
            Some(Command::Quit) => break,
            None if line.trim().is_empty() => {}
            None => println!("unknown command: {}", line.trim()),
        }
    }

    ticker.abort();
    // После коммита локальная запись уже очищена - не записываем её обратно
    if !finished {
        if let Err(e) = engine.save_state() {
            error!("[SETUP] Failed to save session on exit: {}", e);
        }
    }
    engine.sync().drain().await;
    Ok(())
}
