//! Authenticated session handle
//!
//! The login collaborator owns the session and is its only writer. Everything
//! else (heartbeat sender, poller, engines) holds a cloned handle and reads.

use std::sync::{Arc, PoisonError, RwLock};

/// Credentials of the active session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub user_id: u64,
    pub session_id: String,
    pub secret: Vec<u8>,
}

/// Read-mostly shared view of the active session
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    inner: Arc<RwLock<Option<AuthSession>>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a freshly authenticated session
    pub fn establish(&self, session: AuthSession) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    /// Drop the session, e.g. on logout or credential rejection
    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn current(&self) -> Option<AuthSession> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_established(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_shared_between_clones() {
        let owner = SessionHandle::new();
        let reader = owner.clone();
        assert!(!reader.is_established());

        owner.establish(AuthSession {
            user_id: 7,
            session_id: "abc".to_string(),
            secret: vec![1, 2],
        });
        assert_eq!(reader.current().map(|s| s.user_id), Some(7));

        owner.clear();
        assert!(reader.current().is_none());
    }
}
