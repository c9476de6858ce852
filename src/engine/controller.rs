use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{error, info, warn};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    engine::state::{EngineState, EngineSnapshot, Phase, Transition},
    error::EngineError,
    gateway::HttpDetectionGateway,
    models::{format_elapsed, CycleCount, Event, Session, SessionMode},
    notify::Notifier,
    settings::SettingsStore,
    store::SessionStore,
};

/// Parameters for one session run.
#[derive(Debug, Clone)]
pub struct StartConfig {
    pub mode: SessionMode,
    pub focus_duration: u64,
    pub break_duration: u64,
    pub cycles: Option<CycleCount>,
}

impl StartConfig {
    pub fn pomodoro(focus_duration: u64, break_duration: u64, cycles: CycleCount) -> Self {
        Self {
            mode: SessionMode::Pomodoro,
            focus_duration,
            break_duration,
            cycles: Some(cycles),
        }
    }

    pub fn single_session(duration: u64) -> Self {
        Self {
            mode: SessionMode::SingleSession,
            focus_duration: duration,
            break_duration: 0,
            cycles: None,
        }
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.focus_duration == 0 {
            return Err(EngineError::Config(
                "focus duration must be greater than zero".into(),
            ));
        }
        if self.mode == SessionMode::Pomodoro {
            if self.break_duration == 0 {
                return Err(EngineError::Config(
                    "break duration must be greater than zero".into(),
                ));
            }
            if matches!(self.cycles, None | Some(CycleCount::Finite(0))) {
                return Err(EngineError::Config(
                    "pomodoro sessions need a positive or infinite cycle count".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Why a session is being finalized; picks the closing notification.
enum StopReason {
    Manual,
    FocusComplete,
    CyclesComplete,
}

struct TickerHandle {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Session/timer engine.
///
/// One 1 Hz ticker and one sample-ingestion path are the only mutation
/// sources, serialized behind a single state mutex. The mutex is held across
/// persistence writes (strict per-entity write ordering) but never across a
/// detection call, so the countdown keeps ticking whatever the gateway does.
#[derive(Clone)]
pub struct SessionEngine {
    state: Arc<Mutex<EngineState>>,
    store: SessionStore,
    settings: Arc<SettingsStore>,
    gateway: HttpDetectionGateway,
    notifier: Arc<dyn Notifier>,
    ticker: Arc<Mutex<Option<TickerHandle>>>,
    tick_interval: Duration,
}

impl SessionEngine {
    pub fn new(
        store: SessionStore,
        settings: Arc<SettingsStore>,
        gateway: HttpDetectionGateway,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(EngineState::new())),
            store,
            settings,
            gateway,
            notifier,
            ticker: Arc::new(Mutex::new(None)),
            tick_interval: Duration::from_secs(1),
        }
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn sessions(&self) -> Result<Vec<Session>, EngineError> {
        self.store
            .list_sessions()
            .await
            .map_err(EngineError::Persistence)
    }

    /// Start a session. Requires a configured capture device; a dead detection
    /// backend only degrades detection, the countdown runs regardless.
    ///
    /// Calling while a session is active is a no-op returning the active
    /// session.
    pub async fn start(&self, config: StartConfig) -> Result<Session, EngineError> {
        config.validate()?;

        if self.settings.last_selected_camera().is_none() {
            return Err(EngineError::InputUnavailable);
        }

        // Probe the bridge before taking the state lock; this can take up to
        // the full detect timeout.
        let detection_available = match self.gateway.ensure_ready().await {
            Ok(()) => true,
            Err(err) => {
                warn!("detection backend unavailable, timer runs degraded: {err}");
                false
            }
        };

        let session = {
            let mut state = self.state.lock().await;
            if state.phase != Phase::Off {
                if let Some(active) = &state.session {
                    warn!("start requested while session {} is active, ignoring", active.id);
                    return Ok(active.clone());
                }
            }

            let session = Session::new(
                config.mode,
                config.focus_duration,
                config.break_duration,
                config.cycles,
            );

            if let Err(err) = self.store.save_session(&session).await {
                // In-memory state stays authoritative until the next write.
                error!("failed to persist new session {}: {err:#}", session.id);
            }

            state.begin(session.clone());
            state.detection_available = detection_available;
            session
        };

        self.spawn_ticker().await;

        info!(
            "session {} started: mode={}, focus={}s",
            session.id,
            session.mode.as_str(),
            session.focus_duration
        );
        self.notifier.notify(
            "Session started",
            &format!("Focus for {} minutes", session.focus_duration / 60),
        );

        Ok(session)
    }

    /// Stop the active session, if any. Safe to call at any time, including
    /// mid-tick and mid-detection; idempotent when already off.
    pub async fn stop(&self) -> Result<Option<Session>, EngineError> {
        let finalized = {
            let mut state = self.state.lock().await;
            if state.phase == Phase::Off {
                None
            } else {
                Some(self.finalize_locked(&mut state, StopReason::Manual).await)
            }
        };

        self.cancel_ticker().await;

        match finalized {
            None => Ok(None),
            Some(Ok(session)) => Ok(Some(session)),
            Some(Err(err)) => Err(err),
        }
    }

    /// Feed one captured sample. Dropped unless a session is in Focus with a
    /// live detection backend; samples are never queued.
    pub async fn on_sample(&self, frame: &str) {
        let (session_id, start_time) = {
            let state = self.state.lock().await;
            if state.phase != Phase::Focus || !state.detection_available {
                return;
            }
            let Some(session) = &state.session else {
                return;
            };
            (session.id.clone(), session.start_time)
        };

        let threshold = self.settings.probability_threshold();

        // The state lock is NOT held here: the tick must outrun the gateway.
        let detection = match self.gateway.detect(frame, threshold).await {
            Ok(detection) => detection,
            Err(err) => {
                warn!("detection call failed, dropping sample: {err}");
                return;
            }
        };

        if !detection.detected {
            return;
        }
        let Some(reason) = detection.action else {
            warn!("positive detection without an action, dropping");
            return;
        };
        let confidence = detection.confidence.unwrap_or(0.0);
        if confidence < threshold {
            // Below-threshold positives count as "not detected".
            return;
        }

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        // The session may have rolled over or stopped while the gateway call
        // was in flight; a stale result must not touch the new state.
        if state.phase != Phase::Focus {
            return;
        }
        let Some(session) = state.session.as_mut() else {
            return;
        };
        if session.id != session_id {
            return;
        }

        if !state.throttle.accept(&reason, Instant::now()) {
            return;
        }

        let elapsed = (Utc::now() - start_time).num_seconds().max(0) as u64;
        let event = Event {
            reason: reason.clone(),
            confidence,
            timestamp: format_elapsed(elapsed),
        };
        session.events.push(event.clone());
        let session_snapshot = session.clone();

        info!(
            "event accepted for session {session_id}: {reason} ({confidence:.2}) at {}",
            event.timestamp
        );

        match self.store.append_event(&session_id, &event).await {
            Ok(true) => {}
            Ok(false) => warn!("event append skipped, session {session_id} missing from store"),
            Err(err) => error!("failed to persist event for {session_id}: {err:#}"),
        }
        if let Err(err) = self.store.save_session(&session_snapshot).await {
            error!("failed to persist session {session_id}: {err:#}");
        }

        self.gateway.trigger_action(&reason);
    }

    /// One logical tick. Returns false when the ticker should shut down.
    pub(crate) async fn handle_tick(&self) -> bool {
        let mut state = self.state.lock().await;
        match state.on_tick() {
            Transition::Idle => false,
            Transition::Counting => true,
            Transition::BreakStarted { break_secs } => {
                self.persist_progress(&state).await;
                self.notifier.notify(
                    "Break time",
                    &format!("Focus complete. Break for {} minutes", break_secs / 60),
                );
                true
            }
            Transition::CycleStarted { cycle, cycles_left } => {
                self.persist_progress(&state).await;
                let left = match cycles_left {
                    Some(n) => n.to_string(),
                    None => "Infinite".to_string(),
                };
                self.notifier.notify(
                    "Back to focus",
                    &format!("Cycle {cycle} started, cycles left: {left}"),
                );
                true
            }
            Transition::Completed => {
                let reason = match state.session.as_ref().map(|s| s.mode) {
                    Some(SessionMode::Pomodoro) => StopReason::CyclesComplete,
                    _ => StopReason::FocusComplete,
                };
                if let Err(err) = self.finalize_locked(&mut state, reason).await {
                    error!("failed to finalize completed session: {err}");
                }
                false
            }
        }
    }

    /// Finalize the active session under the state lock: stamp `end_time`,
    /// persist, clear all engine-local state, reload the session log, notify.
    /// State is cleared even when the persist fails.
    async fn finalize_locked(
        &self,
        state: &mut EngineState,
        reason: StopReason,
    ) -> Result<Session, EngineError> {
        let mut session = match state.session.take() {
            Some(session) => session,
            None => {
                state.reset();
                return Err(EngineError::Persistence(anyhow::anyhow!(
                    "no active session to finalize"
                )));
            }
        };

        session.end_time = Some(Utc::now());
        let persisted = self.store.save_session(&session).await;
        state.reset();

        match self.store.list_sessions().await {
            Ok(all) => info!("session log reloaded, {} sessions", all.len()),
            Err(err) => warn!("failed to reload session log: {err:#}"),
        }

        let body = match reason {
            StopReason::Manual => "Session stopped".to_string(),
            StopReason::FocusComplete => "Focus session complete".to_string(),
            StopReason::CyclesComplete => "All cycles complete".to_string(),
        };
        self.notifier.notify("Session ended", &body);
        info!("session {} finalized ({} events)", session.id, session.events.len());

        match persisted {
            Ok(()) => Ok(session),
            Err(err) => {
                error!("failed to persist finalized session {}: {err:#}", session.id);
                Err(EngineError::Persistence(err))
            }
        }
    }

    /// Keep the stored row in step with cycle/phase boundaries.
    async fn persist_progress(&self, state: &EngineState) {
        if let Some(session) = &state.session {
            if let Err(err) = self.store.save_session(session).await {
                error!("failed to persist session progress for {}: {err:#}", session.id);
            }
        }
    }

    async fn spawn_ticker(&self) {
        let mut guard = self.ticker.lock().await;
        if let Some(previous) = guard.take() {
            previous.cancel.cancel();
            previous.handle.abort();
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let engine = self.clone();
        let tick_interval = self.tick_interval;

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first interval tick completes immediately; swallow it so
            // the countdown starts one full period after start().
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if !engine.handle_tick().await {
                            break;
                        }
                    }
                }
            }
        });

        *guard = Some(TickerHandle { handle, cancel });
    }

    async fn cancel_ticker(&self) {
        if let Some(ticker) = self.ticker.lock().await.take() {
            ticker.cancel.cancel();
            ticker.handle.abort();
        }
    }
}
