//! Event identifiers and the hybrid logical clock.
//!
//! Identifiers are UUIDv7: time-ordered, collision-resistant, and
//! decomposable back to their creation timestamp for diagnostics. The HLC
//! provides the total order used for replay and projection rebuild across
//! devices with unsynchronized wall clocks.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::Utc;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::errors::{Error, Result};

/// Globally unique, time-ordered event identifier.
///
/// Identifiers generated later by the same process sort after earlier ones;
/// identifiers from different processes sort consistently with real time to
/// within clock-skew tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Millisecond unix timestamp embedded in the identifier, if present.
    pub fn timestamp_ms(&self) -> Option<u64> {
        self.0.get_timestamp().map(|ts| {
            let (secs, nanos) = ts.to_unix();
            secs.saturating_mul(1_000) + u64::from(nanos) / 1_000_000
        })
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EventId {
    type Err = uuid::Error;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(raw)?))
    }
}

/// Hybrid logical clock value: wall time plus a logical counter, tie-broken
/// by device id. `Ord` over (wall, counter, device) is the `compare` total
/// order used everywhere events are sorted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hlc {
    pub wall_ms: u64,
    pub counter: u16,
    pub device_id: String,
}

impl Hlc {
    /// Canonical encoding: `{wall:016x}-{counter:04x}-{device_id}`.
    ///
    /// Fixed-width hex means lexicographic order over encoded values equals
    /// `Ord` over the decoded values, so SQL `ORDER BY` and keyset cursors
    /// work on the raw strings.
    pub fn encode(&self) -> String {
        format!("{:016x}-{:04x}-{}", self.wall_ms, self.counter, self.device_id)
    }

    pub fn decode(raw: &str) -> Option<Self> {
        let wall_part = raw.get(..16)?;
        let counter_part = raw.get(17..21)?;
        let device_part = raw.get(22..)?;
        if raw.get(16..17)? != "-" || raw.get(21..22)? != "-" || device_part.is_empty() {
            return None;
        }
        Some(Self {
            wall_ms: u64::from_str_radix(wall_part, 16).ok()?,
            counter: u16::from_str_radix(counter_part, 16).ok()?,
            device_id: device_part.to_string(),
        })
    }

    /// Decode with a validation error for caller-supplied cursors.
    pub fn parse(raw: &str) -> Result<Self> {
        Self::decode(raw).ok_or_else(|| Error::Validation(format!("invalid HLC value '{raw}'")))
    }
}

impl Ord for Hlc {
    fn cmp(&self, other: &Self) -> Ordering {
        self.wall_ms
            .cmp(&other.wall_ms)
            .then_with(|| self.counter.cmp(&other.counter))
            .then_with(|| self.device_id.cmp(&other.device_id))
    }
}

impl PartialOrd for Hlc {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Hlc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl Serialize for Hlc {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Hlc {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::decode(&raw).ok_or_else(|| D::Error::custom(format!("invalid HLC value '{raw}'")))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct HlcState {
    wall_ms: u64,
    counter: u16,
}

/// Per-process hybrid logical clock.
///
/// Clock functions never fail: skew between devices is absorbed by the
/// max() rule, never rejected.
#[derive(Debug)]
pub struct HlcClock {
    device_id: String,
    state: Mutex<HlcState>,
}

impl HlcClock {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            state: Mutex::new(HlcState::default()),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Next value for a locally generated event: strictly greater than both
    /// the local wall clock and the last value this device emitted.
    pub fn on_send(&self) -> Hlc {
        self.on_send_at(wall_now())
    }

    /// Advance past an observed remote value: max(local, remote, now) + tick,
    /// so this device's future events causally follow everything it has seen.
    pub fn on_receive(&self, remote: &Hlc) -> Hlc {
        self.on_receive_at(remote, wall_now())
    }

    fn on_send_at(&self, now: u64) -> Hlc {
        let mut state = lock_state(&self.state);
        if now > state.wall_ms {
            state.wall_ms = now;
            state.counter = 0;
        } else {
            match state.counter.checked_add(1) {
                Some(counter) => state.counter = counter,
                None => {
                    // Counter saturated within one wall tick; roll the wall forward.
                    state.wall_ms += 1;
                    state.counter = 0;
                }
            }
        }
        Hlc {
            wall_ms: state.wall_ms,
            counter: state.counter,
            device_id: self.device_id.clone(),
        }
    }

    fn on_receive_at(&self, remote: &Hlc, now: u64) -> Hlc {
        let mut state = lock_state(&self.state);
        let wall = now.max(state.wall_ms).max(remote.wall_ms);
        let counter = if wall == state.wall_ms && wall == remote.wall_ms {
            state.counter.max(remote.counter).checked_add(1)
        } else if wall == state.wall_ms {
            state.counter.checked_add(1)
        } else if wall == remote.wall_ms {
            remote.counter.checked_add(1)
        } else {
            Some(0)
        };
        let (wall, counter) = match counter {
            Some(counter) => (wall, counter),
            None => (wall + 1, 0),
        };
        state.wall_ms = wall;
        state.counter = counter;
        Hlc {
            wall_ms: wall,
            counter,
            device_id: self.device_id.clone(),
        }
    }
}

fn wall_now() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

fn lock_state(state: &Mutex<HlcState>) -> std::sync::MutexGuard<'_, HlcState> {
    state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
