//! Services the hosting platform provides to the runtime
//!
//! Power management and OS-level wake alarms are platform specific; the
//! runtime only depends on these traits. Connectivity reaches the runtime
//! through `PulseHandle::set_connectivity`.

use std::sync::Arc;

use crate::types::Timestamp;

/// Keeps the device awake while held
pub trait PowerAssertion: Send + Sync {
    fn acquire(&self, reason: &'static str);
    fn release(&self, reason: &'static str);
}

/// OS timer that fires even while the device sleeps
pub trait WakeAlarm: Send + Sync {
    fn arm(&self, at: Timestamp);
    fn cancel(&self);
}

/// Platform without power management
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPlatform;

impl PowerAssertion for NoopPlatform {
    fn acquire(&self, _reason: &'static str) {}
    fn release(&self, _reason: &'static str) {}
}

impl WakeAlarm for NoopPlatform {
    fn arm(&self, _at: Timestamp) {}
    fn cancel(&self) {}
}

/// Bundle of platform services handed to transports
#[derive(Clone)]
pub struct Platform {
    pub power: Arc<dyn PowerAssertion>,
    pub alarm: Arc<dyn WakeAlarm>,
}

impl Platform {
    pub fn new(power: Arc<dyn PowerAssertion>, alarm: Arc<dyn WakeAlarm>) -> Self {
        Self { power, alarm }
    }

    pub fn noop() -> Self {
        Self {
            power: Arc::new(NoopPlatform),
            alarm: Arc::new(NoopPlatform),
        }
    }

    /// Hold a power assertion for the lifetime of the returned guard
    pub fn power_guard(&self, reason: &'static str) -> PowerGuard {
        self.power.acquire(reason);
        PowerGuard {
            power: Arc::clone(&self.power),
            reason,
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::noop()
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}

/// Releases its power assertion on drop
pub struct PowerGuard {
    power: Arc<dyn PowerAssertion>,
    reason: &'static str,
}

impl Drop for PowerGuard {
    fn drop(&mut self) {
        self.power.release(self.reason);
    }
}
