use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::warn;
use rusqlite::{params, Connection, Row};

use super::{parse_datetime, to_i64, to_u64, SessionStore};
use crate::models::{CycleCount, Event, Session, SessionMode};

fn mode_from_str(value: &str) -> Result<SessionMode> {
    SessionMode::from_str(value).ok_or_else(|| anyhow!("unknown session mode '{value}'"))
}

fn cycles_from_stored(value: Option<String>) -> Result<Option<CycleCount>> {
    match value {
        None => Ok(None),
        Some(raw) => CycleCount::from_stored(&raw)
            .map(Some)
            .ok_or_else(|| anyhow!("invalid cycle count '{raw}'")),
    }
}

fn row_to_session(row: &Row<'_>) -> Result<Session> {
    let start_time: String = row.get("start_time")?;
    let end_time: Option<String> = row.get("end_time")?;
    let mode: String = row.get("mode")?;
    let cycles: Option<String> = row.get("pomodoro_cycles")?;

    Ok(Session {
        id: row.get("id")?,
        start_time: parse_datetime(&start_time)?,
        end_time: end_time.map(|raw| parse_datetime(&raw)).transpose()?,
        mode: mode_from_str(&mode)?,
        focus_duration: to_u64(row.get::<_, i64>("focus_duration")?)?,
        break_duration: to_u64(row.get::<_, i64>("break_duration")?)?,
        pomodoro_cycles: cycles_from_stored(cycles)?,
        events: Vec::new(),
    })
}

fn load_events(conn: &Connection, session_id: &str) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT reason, confidence, timestamp FROM events
         WHERE session_id = ?1
         ORDER BY id ASC",
    )?;

    let mut rows = stmt.query(params![session_id])?;
    let mut events = Vec::new();
    while let Some(row) = rows.next()? {
        events.push(Event {
            reason: row.get(0)?,
            confidence: row.get(1)?,
            timestamp: row.get(2)?,
        });
    }
    Ok(events)
}

impl SessionStore {
    /// All sessions, newest first by start time, each with its events in
    /// insertion order.
    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.execute(|conn| {
            let mut sessions = {
                let mut stmt = conn.prepare(
                    "SELECT id, start_time, end_time, mode, focus_duration, break_duration,
                            pomodoro_cycles
                     FROM sessions
                     ORDER BY start_time DESC",
                )?;

                let mut rows = stmt.query([])?;
                let mut sessions = Vec::new();
                while let Some(row) = rows.next()? {
                    sessions.push(row_to_session(row)?);
                }
                sessions
            };

            for session in &mut sessions {
                session.events = load_events(conn, &session.id)?;
            }

            Ok(sessions)
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, start_time, end_time, mode, focus_duration, break_duration,
                        pomodoro_cycles
                 FROM sessions
                 WHERE id = ?1",
            )?;

            let mut rows = stmt.query(params![session_id])?;
            let Some(row) = rows.next()? else {
                return Ok(None);
            };

            let mut session = row_to_session(row)?;
            session.events = load_events(conn, &session.id)?;
            Ok(Some(session))
        })
        .await
    }

    /// Upsert by id. The row and its event list are replaced in one
    /// transaction, so readers never observe a half-written session.
    pub async fn save_session(&self, session: &Session) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open session upsert transaction")?;

            tx.execute(
                "INSERT INTO sessions (id, start_time, end_time, mode, focus_duration,
                                       break_duration, pomodoro_cycles)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                     start_time = excluded.start_time,
                     end_time = excluded.end_time,
                     mode = excluded.mode,
                     focus_duration = excluded.focus_duration,
                     break_duration = excluded.break_duration,
                     pomodoro_cycles = excluded.pomodoro_cycles",
                params![
                    record.id,
                    record.start_time.to_rfc3339(),
                    record.end_time.as_ref().map(|dt| dt.to_rfc3339()),
                    record.mode.as_str(),
                    to_i64(record.focus_duration)?,
                    to_i64(record.break_duration)?,
                    record.pomodoro_cycles.as_ref().map(|c| c.as_stored()),
                ],
            )
            .context("failed to upsert session")?;

            tx.execute(
                "DELETE FROM events WHERE session_id = ?1",
                params![record.id],
            )?;

            {
                let mut insert = tx.prepare(
                    "INSERT INTO events (session_id, reason, confidence, timestamp)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for event in &record.events {
                    insert.execute(params![
                        record.id,
                        event.reason,
                        event.confidence,
                        event.timestamp
                    ])?;
                }
            }

            tx.commit().context("failed to commit session upsert")?;
            Ok(())
        })
        .await
    }

    /// Append one event to a stored session. An unknown id is a no-op that
    /// reports `false` rather than an error.
    pub async fn append_event(&self, session_id: &str, event: &Event) -> Result<bool> {
        let session_id = session_id.to_string();
        let record = event.clone();
        self.execute(move |conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?1)",
                params![session_id],
                |row| row.get(0),
            )?;

            if !exists {
                warn!("append_event: session {session_id} not found, skipping");
                return Ok(false);
            }

            conn.execute(
                "INSERT INTO events (session_id, reason, confidence, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![session_id, record.reason, record.confidence, record.timestamp],
            )
            .context("failed to append event")?;

            Ok(true)
        })
        .await
    }

    /// Finalize sessions a crash left open. Returns how many were closed.
    pub async fn close_dangling_sessions(&self, ended_at: DateTime<Utc>) -> Result<usize> {
        let ended_at = ended_at.to_rfc3339();
        self.execute(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE sessions SET end_time = ?1 WHERE end_time IS NULL",
                    params![ended_at],
                )
                .context("failed to close dangling sessions")?;
            Ok(changed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionMode;
    use chrono::Duration;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("focusguard.sqlite3")).unwrap();
        (dir, store)
    }

    fn sample_session() -> Session {
        let mut session = Session::new(
            SessionMode::Pomodoro,
            1800,
            300,
            Some(CycleCount::Finite(3)),
        );
        session.events.push(Event {
            reason: "doomscrolling".into(),
            confidence: 0.91,
            timestamp: "00:42".into(),
        });
        session.events.push(Event {
            reason: "slouching".into(),
            confidence: 0.84,
            timestamp: "01:10".into(),
        });
        session
    }

    #[tokio::test]
    async fn round_trip_preserves_fields_and_event_order() {
        let (_dir, store) = store();
        let session = sample_session();
        store.save_session(&session).await.unwrap();

        let loaded = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.start_time, session.start_time);
        assert_eq!(loaded.mode, session.mode);
        assert_eq!(loaded.focus_duration, 1800);
        assert_eq!(loaded.break_duration, 300);
        assert_eq!(loaded.pomodoro_cycles, Some(CycleCount::Finite(3)));
        assert_eq!(loaded.events, session.events);
    }

    #[tokio::test]
    async fn infinite_cycles_survive_storage() {
        let (_dir, store) = store();
        let session = Session::new(SessionMode::Pomodoro, 60, 30, Some(CycleCount::Infinite));
        store.save_session(&session).await.unwrap();

        let loaded = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.pomodoro_cycles, Some(CycleCount::Infinite));
    }

    #[tokio::test]
    async fn saving_an_existing_id_replaces_in_place() {
        let (_dir, store) = store();
        let mut session = sample_session();
        store.save_session(&session).await.unwrap();

        session.end_time = Some(Utc::now());
        session.events.push(Event {
            reason: "doomscrolling".into(),
            confidence: 0.99,
            timestamp: "02:00".into(),
        });
        store.save_session(&session).await.unwrap();

        let all = store.list_sessions().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].end_time.is_some());
        assert_eq!(all[0].events.len(), 3);
    }

    #[tokio::test]
    async fn list_returns_newest_first_regardless_of_save_order() {
        let (_dir, store) = store();
        let base = Utc::now();

        let mut oldest = Session::new(SessionMode::SingleSession, 60, 0, None);
        oldest.start_time = base - Duration::hours(2);
        let mut middle = Session::new(SessionMode::SingleSession, 60, 0, None);
        middle.start_time = base - Duration::hours(1);
        let mut newest = Session::new(SessionMode::SingleSession, 60, 0, None);
        newest.start_time = base;

        store.save_session(&middle).await.unwrap();
        store.save_session(&newest).await.unwrap();
        store.save_session(&oldest).await.unwrap();

        let all = store.list_sessions().await.unwrap();
        let ids: Vec<_> = all.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec![newest.id.as_str(), middle.id.as_str(), oldest.id.as_str()]);
    }

    #[tokio::test]
    async fn append_event_to_unknown_session_is_a_soft_no_op() {
        let (_dir, store) = store();
        let event = Event {
            reason: "doomscrolling".into(),
            confidence: 0.9,
            timestamp: "00:10".into(),
        };

        let appended = store.append_event("no-such-session", &event).await.unwrap();
        assert!(!appended);
    }

    #[tokio::test]
    async fn append_event_preserves_insertion_order() {
        let (_dir, store) = store();
        let session = Session::new(SessionMode::SingleSession, 600, 0, None);
        store.save_session(&session).await.unwrap();

        for (i, ts) in ["00:05", "00:20", "01:40"].iter().enumerate() {
            let appended = store
                .append_event(
                    &session.id,
                    &Event {
                        reason: format!("reason-{i}"),
                        confidence: 0.8,
                        timestamp: ts.to_string(),
                    },
                )
                .await
                .unwrap();
            assert!(appended);
        }

        let loaded = store.get_session(&session.id).await.unwrap().unwrap();
        let stamps: Vec<_> = loaded.events.iter().map(|e| e.timestamp.as_str()).collect();
        assert_eq!(stamps, vec!["00:05", "00:20", "01:40"]);
    }

    #[tokio::test]
    async fn dangling_sessions_are_closed_at_bootstrap() {
        let (_dir, store) = store();
        let open = Session::new(SessionMode::SingleSession, 600, 0, None);
        let mut closed = Session::new(SessionMode::SingleSession, 600, 0, None);
        closed.end_time = Some(Utc::now());

        store.save_session(&open).await.unwrap();
        store.save_session(&closed).await.unwrap();

        let recovered = store.close_dangling_sessions(Utc::now()).await.unwrap();
        assert_eq!(recovered, 1);

        let all = store.list_sessions().await.unwrap();
        assert!(all.iter().all(|s| s.end_time.is_some()));
    }
}
