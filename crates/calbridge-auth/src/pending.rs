//! Correlation of authorization callbacks to waiting profiles.
//!
//! Each interactive authorization registers its random state token here
//! before the consent URL is handed to the user. When the provider redirects
//! back, the callback endpoint resolves the state token to the profile that
//! started the flow and wakes the waiting task.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::debug;

use calbridge_core::ProfileId;

use crate::error::AuthError;

/// What a resolved callback carried.
#[derive(Debug)]
pub enum CallbackOutcome {
    /// The user granted consent; here is the authorization code.
    Code(String),
    /// The provider reported an error (e.g. the user denied consent).
    Denied(String),
}

struct Pending {
    profile: ProfileId,
    tx: oneshot::Sender<CallbackOutcome>,
}

/// The set of authorization flows waiting on a callback.
#[derive(Default)]
pub struct PendingAuthorizations {
    // Sync mutex: held only for map operations, never across an await.
    inner: Mutex<HashMap<String, Pending>>,
}

impl PendingAuthorizations {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a flow under its state token and returns the receiver the
    /// initiating task waits on.
    pub fn register(
        &self,
        state: impl Into<String>,
        profile: ProfileId,
    ) -> oneshot::Receiver<CallbackOutcome> {
        let state = state.into();
        let (tx, rx) = oneshot::channel();
        debug!(%profile, "registered pending authorization");
        self.lock().insert(state, Pending { profile, tx });
        rx
    }

    /// Resolves a callback by state token, waking the waiting task.
    ///
    /// Returns the profile the flow belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnknownState`] when no flow is registered under
    /// the state token (expired, already resolved, or forged).
    pub fn resolve(
        &self,
        state: &str,
        outcome: CallbackOutcome,
    ) -> Result<ProfileId, AuthError> {
        let pending = self
            .lock()
            .remove(state)
            .ok_or_else(|| AuthError::UnknownState(state.to_string()))?;

        let profile = pending.profile.clone();
        debug!(%profile, "resolved pending authorization");
        // The waiter may have timed out and dropped its receiver; that is fine.
        let _ = pending.tx.send(outcome);
        Ok(profile)
    }

    /// Removes a flow that gave up waiting. Unknown states are ignored.
    pub fn cancel(&self, state: &str) {
        self.lock().remove(state);
    }

    /// Number of flows currently waiting.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// State tokens currently waiting, for diagnostics.
    pub fn states(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Returns true if no flows are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Pending>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str) -> ProfileId {
        ProfileId::new(id).unwrap()
    }

    #[tokio::test]
    async fn resolve_delivers_code_to_waiter() {
        let pending = PendingAuthorizations::new();
        let rx = pending.register("state-1", profile("work"));

        let resolved = pending
            .resolve("state-1", CallbackOutcome::Code("auth-code".to_string()))
            .unwrap();
        assert_eq!(resolved.as_str(), "work");

        match rx.await.unwrap() {
            CallbackOutcome::Code(code) => assert_eq!(code, "auth-code"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn unknown_state_is_rejected() {
        let pending = PendingAuthorizations::new();
        let err = pending
            .resolve("forged", CallbackOutcome::Code("code".to_string()))
            .unwrap_err();
        assert!(matches!(err, AuthError::UnknownState(_)));
    }

    #[tokio::test]
    async fn state_cannot_be_resolved_twice() {
        let pending = PendingAuthorizations::new();
        let _rx = pending.register("state-1", profile("work"));

        pending
            .resolve("state-1", CallbackOutcome::Code("code".to_string()))
            .unwrap();
        let err = pending
            .resolve("state-1", CallbackOutcome::Code("code".to_string()))
            .unwrap_err();
        assert!(matches!(err, AuthError::UnknownState(_)));
    }

    #[tokio::test]
    async fn cancel_removes_flow() {
        let pending = PendingAuthorizations::new();
        let _rx = pending.register("state-1", profile("work"));
        assert_eq!(pending.len(), 1);

        pending.cancel("state-1");
        assert!(pending.is_empty());
        assert!(
            pending
                .resolve("state-1", CallbackOutcome::Code("late".to_string()))
                .is_err()
        );
    }

    #[tokio::test]
    async fn resolve_after_waiter_dropped_is_ok() {
        let pending = PendingAuthorizations::new();
        let rx = pending.register("state-1", profile("work"));
        drop(rx);

        // The waiter timed out; resolution still succeeds and clears the entry.
        let resolved = pending
            .resolve("state-1", CallbackOutcome::Code("code".to_string()))
            .unwrap();
        assert_eq!(resolved.as_str(), "work");
    }
}
