//! FocusGuard: a focus/break session engine coupled to an external
//! distraction-detection service.
//!
//! The engine runs a 1 Hz countdown through focus and break phases, persists
//! sessions and their distraction events in SQLite, and forwards captured
//! frames to an HTTP classification bridge. A dead bridge only degrades
//! detection; the countdown always runs.

mod engine;
mod error;
mod gateway;
mod models;
mod notify;
mod settings;
mod store;
mod throttle;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};

pub use engine::{EngineSnapshot, Phase, SessionEngine, StartConfig};
pub use error::EngineError;
pub use gateway::{Detection, GatewayError, HttpDetectionGateway};
pub use models::{format_elapsed, CycleCount, Event, Session, SessionMode};
pub use notify::{LogNotifier, Notifier};
pub use settings::{Settings, SettingsStore};
pub use store::SessionStore;

/// Initialize logging from `RUST_LOG`, defaulting to info.
pub fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
}

/// Wire up the stores, the detection gateway, and the engine.
///
/// Sessions left open by a crash are closed here, before the engine can start
/// a new one.
pub async fn bootstrap(data_dir: &Path, detection_base_url: &str) -> Result<SessionEngine> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let store = SessionStore::new(data_dir.join("focusguard.sqlite3"))?;

    let recovered = store.close_dangling_sessions(Utc::now()).await?;
    if recovered > 0 {
        warn!("closed {recovered} session(s) left open by a previous run");
    }

    let settings = Arc::new(SettingsStore::new(data_dir.join("settings.json"))?);
    let gateway = HttpDetectionGateway::new(detection_base_url);
    let notifier = Arc::new(LogNotifier);

    info!("focusguard initialized, data dir {}", data_dir.display());

    Ok(SessionEngine::new(store, settings, gateway, notifier))
}
