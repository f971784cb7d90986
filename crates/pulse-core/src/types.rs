//! Core types for the pulse runtime
//!
//! This module defines the identifiers and time primitives shared by the
//! scheduler, the correlation registries and both transports, using newtype
//! patterns for type safety.

use core::fmt;
use core::time::Duration;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Engine Identifier
// ----------------------------------------------------------------------------

/// Identifies one feature engine registered with the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EngineId(u16);

impl EngineId {
    /// Engine id used when a response cannot be attributed to any engine
    pub const UNDEFINED: Self = Self(0);
    pub const LOGIN: Self = Self(1);
    pub const CONTACT_SYNC: Self = Self(2);
    pub const IDENTITIES: Self = Self(3);
    pub const PRESENCE: Self = Self(4);
    pub const ACTIVITIES: Self = Self(5);
    pub const GROUPS: Self = Self(6);
    pub const CONTENT: Self = Self(7);

    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    fn well_known_name(&self) -> Option<&'static str> {
        match self.0 {
            0 => Some("undefined"),
            1 => Some("login"),
            2 => Some("contact-sync"),
            3 => Some("identities"),
            4 => Some("presence"),
            5 => Some("activities"),
            6 => Some("groups"),
            7 => Some("content"),
            _ => None,
        }
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.well_known_name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "engine-{}", self.0),
        }
    }
}

// ----------------------------------------------------------------------------
// Request Identifier
// ----------------------------------------------------------------------------

/// Correlation id binding an outgoing request to its eventual response
///
/// Ids are unique among in-flight requests only; they are recycled once a
/// request retires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(i32);

impl RequestId {
    /// Sentinel meaning "no id requested" / "no request outstanding"
    pub const NONE: Self = Self(-1);

    /// Id carried by unsolicited push messages
    pub const PUSH: Self = Self(0);

    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    pub const fn as_i32(&self) -> i32 {
        self.0
    }

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }

    pub fn is_push(&self) -> bool {
        *self == Self::PUSH
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Milliseconds since the UNIX epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }

    pub fn saturating_add(&self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.as_millis() as u64))
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later
    pub fn saturating_duration_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// ----------------------------------------------------------------------------
// Time Sources
// ----------------------------------------------------------------------------

/// Abstraction over the clock so scheduling can be driven deterministically
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Standard library implementation of TimeSource
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Manually advanced clock, shared between clones
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    millis: Arc<AtomicU64>,
}

impl ManualTimeSource {
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(start.as_millis())),
        }
    }

    pub fn set(&self, at: Timestamp) {
        self.millis.store(at.as_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp(self.millis.load(Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------------------
// Scheduling
// ----------------------------------------------------------------------------

/// When an engine (or the whole scheduler) next needs to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextRun {
    /// No pending work
    Never,
    /// Run as soon as possible
    Now,
    /// Run at the given absolute time
    At(Timestamp),
}

impl NextRun {
    /// Whether this wake time has been reached at `now`
    pub fn is_due(&self, now: Timestamp) -> bool {
        match self {
            NextRun::Never => false,
            NextRun::Now => true,
            NextRun::At(at) => *at <= now,
        }
    }

    /// The earlier of two wake times
    pub fn earliest(self, other: NextRun) -> NextRun {
        match (self, other) {
            (NextRun::Now, _) | (_, NextRun::Now) => NextRun::Now,
            (NextRun::Never, x) | (x, NextRun::Never) => x,
            (NextRun::At(a), NextRun::At(b)) => NextRun::At(a.min(b)),
        }
    }
}

// ----------------------------------------------------------------------------
// Connectivity
// ----------------------------------------------------------------------------

/// State of the logical session to the back end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// Data connectivity as reported by the hosting platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    Available,
    Unavailable,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_sentinels() {
        assert!(RequestId::NONE.is_none());
        assert!(RequestId::PUSH.is_push());
        assert!(!RequestId::new(7).is_none());
        assert_eq!(RequestId::default(), RequestId::NONE);
    }

    #[test]
    fn test_engine_id_display() {
        assert_eq!(EngineId::PRESENCE.to_string(), "presence");
        assert_eq!(EngineId::new(42).to_string(), "engine-42");
    }

    #[test]
    fn test_next_run_earliest() {
        let a = NextRun::At(Timestamp::from_millis(100));
        let b = NextRun::At(Timestamp::from_millis(50));
        assert_eq!(a.earliest(b), b);
        assert_eq!(a.earliest(NextRun::Never), a);
        assert_eq!(NextRun::Never.earliest(NextRun::Never), NextRun::Never);
        assert_eq!(a.earliest(NextRun::Now), NextRun::Now);
    }

    #[test]
    fn test_next_run_is_due() {
        let now = Timestamp::from_millis(1_000);
        assert!(NextRun::Now.is_due(now));
        assert!(NextRun::At(Timestamp::from_millis(1_000)).is_due(now));
        assert!(!NextRun::At(Timestamp::from_millis(1_001)).is_due(now));
        assert!(!NextRun::Never.is_due(now));
    }

    #[test]
    fn test_manual_time_source() {
        let clock = ManualTimeSource::new(Timestamp::from_millis(10));
        let shared = clock.clone();
        clock.advance(Duration::from_millis(5));
        assert_eq!(shared.now(), Timestamp::from_millis(15));
        shared.set(Timestamp::from_millis(3));
        assert_eq!(clock.now(), Timestamp::from_millis(3));
    }
}
