use std::fmt;

use chrono::{DateTime, Utc};
use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};
use uuid::Uuid;

/// Sentinel used on disk and over the wire for an unbounded cycle count.
pub const INFINITE_SENTINEL: &str = "infinite";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionMode {
    Pomodoro,
    SingleSession,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Pomodoro => "pomodoro",
            SessionMode::SingleSession => "singleSession",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pomodoro" => Some(SessionMode::Pomodoro),
            "singleSession" => Some(SessionMode::SingleSession),
            _ => None,
        }
    }
}

/// Number of focus/break cycles in a pomodoro session.
///
/// Serialized as a plain positive integer, or the string `"infinite"` for an
/// unbounded run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleCount {
    Finite(u32),
    Infinite,
}

impl CycleCount {
    pub fn as_stored(&self) -> String {
        match self {
            CycleCount::Finite(n) => n.to_string(),
            CycleCount::Infinite => INFINITE_SENTINEL.to_string(),
        }
    }

    pub fn from_stored(value: &str) -> Option<Self> {
        if value == INFINITE_SENTINEL {
            return Some(CycleCount::Infinite);
        }
        value
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .map(CycleCount::Finite)
    }
}

impl Serialize for CycleCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CycleCount::Finite(n) => serializer.serialize_u32(*n),
            CycleCount::Infinite => serializer.serialize_str(INFINITE_SENTINEL),
        }
    }
}

impl<'de> Deserialize<'de> for CycleCount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CycleCountVisitor;

        impl<'de> Visitor<'de> for CycleCountVisitor {
            type Value = CycleCount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a positive integer or the string \"{INFINITE_SENTINEL}\"")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<CycleCount, E> {
                u32::try_from(value)
                    .ok()
                    .filter(|n| *n > 0)
                    .map(CycleCount::Finite)
                    .ok_or_else(|| E::custom(format!("cycle count {value} out of range")))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<CycleCount, E> {
                u64::try_from(value)
                    .map_err(|_| E::custom(format!("cycle count {value} must be positive")))
                    .and_then(|v| self.visit_u64(v))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<CycleCount, E> {
                if value == INFINITE_SENTINEL {
                    Ok(CycleCount::Infinite)
                } else {
                    Err(E::custom(format!("unknown cycle count '{value}'")))
                }
            }
        }

        deserializer.deserialize_any(CycleCountVisitor)
    }
}

/// One accepted distraction detection. Immutable once created; `timestamp` is
/// elapsed time since session start as `mm:ss` (minutes are unbounded).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub reason: String,
    pub confidence: f64,
    pub timestamp: String,
}

/// One timed run from start to finalization. `end_time` is absent while the
/// session is active; `events` is append-only in chronological order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub mode: SessionMode,
    pub focus_duration: u64,
    pub break_duration: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pomodoro_cycles: Option<CycleCount>,
    pub events: Vec<Event>,
}

impl Session {
    pub fn new(
        mode: SessionMode,
        focus_duration: u64,
        break_duration: u64,
        pomodoro_cycles: Option<CycleCount>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            start_time: Utc::now(),
            end_time: None,
            mode,
            focus_duration,
            break_duration,
            pomodoro_cycles,
            events: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }
}

/// Format elapsed seconds as `mm:ss`. Minutes keep counting past 99 with no
/// upper bound.
pub fn format_elapsed(elapsed_secs: u64) -> String {
    let mins = elapsed_secs / 60;
    let secs = elapsed_secs % 60;
    format!("{mins:02}:{secs:02}")
}
