//! Per-user session state and the admission gate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use parley_core::types::{ChatId, UserId};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Mutable state for one user, created on first contact and kept for the
/// lifetime of the process.
#[derive(Debug, Clone)]
pub struct UserSessionState {
    /// Upstream session to resume on the next request.
    pub active_conversation_id: Option<String>,
    pub in_flight: bool,
    /// Present exactly while `in_flight` is true.
    pub cancellation: Option<CancellationToken>,
    pub last_prompt: Option<String>,
    pub last_chat: Option<ChatId>,
    pub model_preference: Option<String>,
    pub cumulative_cost_usd: f64,
    pub request_count: u64,
    /// Whether a missing `active_conversation_id` may be filled from the
    /// store's most recent session. Off after /new until the next success.
    pub resume_from_store: bool,
}

impl Default for UserSessionState {
    fn default() -> Self {
        Self {
            active_conversation_id: None,
            in_flight: false,
            cancellation: None,
            last_prompt: None,
            last_chat: None,
            model_preference: None,
            cumulative_cost_usd: 0.0,
            request_count: 0,
            resume_from_store: true,
        }
    }
}

/// Read-only view of a user's state for status displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserSummary {
    pub user_id: UserId,
    pub in_flight: bool,
    pub active_conversation_id: Option<String>,
    pub model_preference: Option<String>,
    pub request_count: u64,
    pub cumulative_cost_usd: f64,
}

/// All users' state behind one lock.
///
/// The lock is never held across an `.await`; every access is a short
/// lookup-or-insert followed by a synchronous mutation.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    users: Mutex<HashMap<UserId, UserSessionState>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, UserSessionState>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a request for `user_id` unless one is already running.
    ///
    /// On success the user is marked in flight with a fresh cancellation token.
    /// The returned guard clears both when dropped.
    pub fn try_begin(self: &Arc<Self>, user_id: UserId) -> Option<Admission> {
        let mut users = self.lock();
        let state = users.entry(user_id).or_default();
        if state.in_flight {
            return None;
        }

        let token = CancellationToken::new();
        state.in_flight = true;
        state.cancellation = Some(token.clone());

        Some(Admission {
            registry: Arc::clone(self),
            user_id,
            token,
        })
    }

    /// Clear the in-flight flag and drop the cancellation token.
    pub fn end(&self, user_id: UserId) {
        let mut users = self.lock();
        if let Some(state) = users.get_mut(&user_id) {
            state.in_flight = false;
            state.cancellation = None;
        }
    }

    /// Signal the running request's token. False when nothing is in flight.
    pub fn cancel(&self, user_id: UserId) -> bool {
        let users = self.lock();
        match users.get(&user_id) {
            Some(UserSessionState {
                in_flight: true,
                cancellation: Some(token),
                ..
            }) => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn is_in_flight(&self, user_id: UserId) -> bool {
        self.lock().get(&user_id).is_some_and(|s| s.in_flight)
    }

    /// Mutate a user's state, creating it if needed.
    pub fn update<R>(&self, user_id: UserId, f: impl FnOnce(&mut UserSessionState) -> R) -> R {
        let mut users = self.lock();
        f(users.entry(user_id).or_default())
    }

    /// Snapshot of a user's state (defaults for unknown users).
    pub fn get(&self, user_id: UserId) -> UserSessionState {
        self.lock().get(&user_id).cloned().unwrap_or_default()
    }

    pub fn summaries(&self) -> Vec<UserSummary> {
        let users = self.lock();
        let mut out: Vec<UserSummary> = users
            .iter()
            .map(|(id, s)| UserSummary {
                user_id: *id,
                in_flight: s.in_flight,
                active_conversation_id: s.active_conversation_id.clone(),
                model_preference: s.model_preference.clone(),
                request_count: s.request_count,
                cumulative_cost_usd: s.cumulative_cost_usd,
            })
            .collect();
        out.sort_by_key(|s| s.user_id);
        out
    }
}

/// Proof that a request was admitted. Releases the admission on drop, so every
/// exit path (including early returns and panics) ends the request exactly once.
#[derive(Debug)]
pub struct Admission {
    registry: Arc<SessionRegistry>,
    user_id: UserId,
    token: CancellationToken,
}

impl Admission {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.registry.end(self.user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_begin_rejected_until_released() {
        let registry = Arc::new(SessionRegistry::new());

        let first = registry.try_begin(1).expect("first admission");
        assert!(registry.try_begin(1).is_none());
        assert!(registry.is_in_flight(1));

        drop(first);
        assert!(!registry.is_in_flight(1));
        assert!(registry.get(1).cancellation.is_none());
        assert!(registry.try_begin(1).is_some());
    }

    #[test]
    fn test_users_are_independent() {
        let registry = Arc::new(SessionRegistry::new());
        let _a = registry.try_begin(1).unwrap();
        assert!(registry.try_begin(2).is_some());
    }

    #[test]
    fn test_flag_and_token_set_together() {
        let registry = Arc::new(SessionRegistry::new());
        let admission = registry.try_begin(5).unwrap();
        let state = registry.get(5);
        assert!(state.in_flight);
        assert!(state.cancellation.is_some());
        assert!(!admission.token().is_cancelled());
    }

    #[test]
    fn test_cancel_signals_only_when_in_flight() {
        let registry = Arc::new(SessionRegistry::new());
        assert!(!registry.cancel(3));

        let admission = registry.try_begin(3).unwrap();
        assert!(registry.cancel(3));
        assert!(admission.token().is_cancelled());

        drop(admission);
        assert!(!registry.cancel(3));
    }

    #[test]
    fn test_fresh_token_per_admission() {
        let registry = Arc::new(SessionRegistry::new());
        let first = registry.try_begin(4).unwrap();
        registry.cancel(4);
        drop(first);

        let second = registry.try_begin(4).unwrap();
        assert!(!second.token().is_cancelled());
    }

    #[test]
    fn test_update_creates_lazily_and_summaries_sorted() {
        let registry = SessionRegistry::new();
        registry.update(9, |s| s.model_preference = Some("opus".to_string()));
        registry.update(2, |s| s.request_count = 3);

        let summaries = registry.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].user_id, 2);
        assert_eq!(summaries[0].request_count, 3);
        assert_eq!(summaries[1].model_preference.as_deref(), Some("opus"));
    }

    #[test]
    fn test_concurrent_begin_admits_exactly_one() {
        let registry = Arc::new(SessionRegistry::new());
        let admitted: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    let registry = Arc::clone(&registry);
                    scope.spawn(move || registry.try_begin(11))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(admitted.iter().filter(|a| a.is_some()).count(), 1);
    }
}
