//! Scriptable in-memory credential backend for tests.

use super::{CredentialBackend, CredentialContext, FactorReply, SessionIntent, StartSessionReply};
use crate::account::AccountId;
use crate::error::BackendError;
use crate::factor::{AuthFactorKind, AuthFactorSet, FactorConfiguration};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

const DEFAULT_PIN_LOCKOUT_THRESHOLD: u32 = 3;

#[derive(Default)]
struct FakeAccount {
    secrets: HashMap<AuthFactorKind, String>,
    locked: AuthFactorSet,
    failed_pin_attempts: u32,
}

struct FakeInner {
    accounts: HashMap<AccountId, FakeAccount>,
    next_session: u64,
    open_sessions: HashSet<String>,
    invalidated_sessions: Vec<String>,
    start_session_error: Option<BackendError>,
    factor_config_error: Option<BackendError>,
    authenticate_delay: Option<Duration>,
    pin_lockout_threshold: u32,
    last_ephemeral: Option<bool>,
    last_intent: Option<SessionIntent>,
}

/// In-memory [`CredentialBackend`] with scriptable failures, PIN lockout
/// after repeated wrong submissions, and session bookkeeping for assertions.
pub struct FakeCredentialBackend {
    inner: Mutex<FakeInner>,
}

impl FakeCredentialBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(FakeInner {
                accounts: HashMap::new(),
                next_session: 0,
                open_sessions: HashSet::new(),
                invalidated_sessions: Vec::new(),
                start_session_error: None,
                factor_config_error: None,
                authenticate_delay: None,
                pin_lockout_threshold: DEFAULT_PIN_LOCKOUT_THRESHOLD,
                last_ephemeral: None,
                last_intent: None,
            }),
        }
    }

    /// Configure a factor with its expected secret for `account`.
    pub fn register_factor(&self, account: &AccountId, kind: AuthFactorKind, secret: &str) {
        let mut inner = self.lock();
        inner
            .accounts
            .entry(account.clone())
            .or_default()
            .secrets
            .insert(kind, secret.to_string());
    }

    /// Mark a factor as locked out, as the real backend would after repeated
    /// failures elsewhere.
    pub fn lock_factor(&self, account: &AccountId, kind: AuthFactorKind) {
        let mut inner = self.lock();
        inner
            .accounts
            .entry(account.clone())
            .or_default()
            .locked
            .insert(kind);
    }

    /// Fail every subsequent `start_session` call with `error`.
    pub fn set_start_session_error(&self, error: BackendError) {
        self.lock().start_session_error = Some(error);
    }

    /// Fail every subsequent `get_factor_configuration` call with `error`.
    pub fn set_factor_config_error(&self, error: BackendError) {
        self.lock().factor_config_error = Some(error);
    }

    /// Delay `authenticate_with_factor` replies, for cancellation tests.
    pub fn set_authenticate_delay(&self, delay: Duration) {
        self.lock().authenticate_delay = Some(delay);
    }

    /// Wrong PIN submissions before the PIN factor locks out.
    pub fn set_pin_lockout_threshold(&self, threshold: u32) {
        self.lock().pin_lockout_threshold = threshold;
    }

    #[must_use]
    pub fn open_session_count(&self) -> usize {
        self.lock().open_sessions.len()
    }

    #[must_use]
    pub fn invalidated_session_count(&self) -> usize {
        self.lock().invalidated_sessions.len()
    }

    #[must_use]
    pub fn last_ephemeral(&self) -> Option<bool> {
        self.lock().last_ephemeral
    }

    #[must_use]
    pub fn last_intent(&self) -> Option<SessionIntent> {
        self.lock().last_intent
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeInner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn snapshot_for(inner: &FakeInner, account: &AccountId) -> FactorConfiguration {
        match inner.accounts.get(account) {
            Some(entry) => {
                let configured = entry.secrets.keys().copied().collect();
                FactorConfiguration::new(configured, entry.locked)
            }
            None => FactorConfiguration::new(AuthFactorSet::empty(), AuthFactorSet::empty()),
        }
    }
}

impl Default for FakeCredentialBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialBackend for FakeCredentialBackend {
    async fn start_session(
        &self,
        account: &AccountId,
        ephemeral: bool,
        intent: SessionIntent,
    ) -> Result<StartSessionReply, BackendError> {
        let mut inner = self.lock();
        if let Some(error) = inner.start_session_error.clone() {
            return Err(error);
        }
        inner.last_ephemeral = Some(ephemeral);
        inner.last_intent = Some(intent);
        inner.next_session += 1;
        let handle = format!("session-{}", inner.next_session);
        inner.open_sessions.insert(handle.clone());
        let user_exists = inner.accounts.contains_key(account);
        let factors = Self::snapshot_for(&inner, account);
        Ok(StartSessionReply {
            user_exists,
            context: CredentialContext::new(handle, account.clone(), factors),
        })
    }

    async fn get_factor_configuration(
        &self,
        context: CredentialContext,
    ) -> Result<CredentialContext, BackendError> {
        let inner = self.lock();
        if let Some(error) = inner.factor_config_error.clone() {
            return Err(error);
        }
        if !inner.open_sessions.contains(context.session_handle()) {
            return Err(BackendError::SessionInvalidated);
        }
        let factors = Self::snapshot_for(&inner, context.account());
        drop(inner);
        Ok(context.with_factors(factors))
    }

    async fn authenticate_with_factor(
        &self,
        kind: AuthFactorKind,
        secret: SecretString,
        context: CredentialContext,
    ) -> FactorReply {
        let delay = self.lock().authenticate_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        if !inner.open_sessions.contains(context.session_handle()) {
            return FactorReply {
                context,
                error: Some(BackendError::SessionInvalidated),
            };
        }
        let threshold = inner.pin_lockout_threshold;
        let Some(entry) = inner.accounts.get_mut(context.account()) else {
            return FactorReply {
                context,
                error: Some(BackendError::SessionInvalidated),
            };
        };
        if entry.locked.contains(kind) {
            return FactorReply {
                context,
                error: Some(BackendError::FactorLockedOut),
            };
        }
        let matches = entry
            .secrets
            .get(&kind)
            .is_some_and(|expected| expected == secret.expose_secret());
        if matches {
            if kind == AuthFactorKind::Pin {
                entry.failed_pin_attempts = 0;
            }
            return FactorReply {
                context,
                error: None,
            };
        }
        if kind == AuthFactorKind::Pin {
            entry.failed_pin_attempts += 1;
            if entry.failed_pin_attempts >= threshold {
                entry.locked.insert(AuthFactorKind::Pin);
            }
        }
        FactorReply {
            context,
            error: Some(BackendError::VerificationFailed),
        }
    }

    async fn invalidate_session(&self, context: CredentialContext) {
        let mut inner = self.lock();
        inner.open_sessions.remove(context.session_handle());
        inner
            .invalidated_sessions
            .push(context.session_handle().to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> AccountId {
        AccountId::new("fake-user")
    }

    #[tokio::test]
    async fn start_session_reports_unknown_users() {
        let backend = FakeCredentialBackend::new();
        let reply = backend
            .start_session(&account(), false, SessionIntent::VerifyOnly)
            .await
            .unwrap();
        assert!(!reply.user_exists);
        assert!(reply.context.factors().configured().is_empty());
    }

    #[tokio::test]
    async fn wrong_pin_locks_out_after_threshold() {
        let backend = FakeCredentialBackend::new();
        let account = account();
        backend.register_factor(&account, AuthFactorKind::Pin, "1234");
        backend.set_pin_lockout_threshold(2);

        let reply = backend
            .start_session(&account, false, SessionIntent::VerifyOnly)
            .await
            .unwrap();
        assert!(reply.user_exists);
        let mut context = reply.context;

        for _ in 0..2 {
            let reply = backend
                .authenticate_with_factor(
                    AuthFactorKind::Pin,
                    SecretString::from("0000".to_string()),
                    context,
                )
                .await;
            assert_eq!(reply.error, Some(BackendError::VerificationFailed));
            context = reply.context;
        }

        let context = backend.get_factor_configuration(context).await.unwrap();
        assert!(context.factors().locked().contains(AuthFactorKind::Pin));
        assert!(!context.factors().available().contains(AuthFactorKind::Pin));

        let reply = backend
            .authenticate_with_factor(
                AuthFactorKind::Pin,
                SecretString::from("1234".to_string()),
                context,
            )
            .await;
        assert_eq!(reply.error, Some(BackendError::FactorLockedOut));
    }

    #[tokio::test]
    async fn invalidated_sessions_fail_structurally() {
        let backend = FakeCredentialBackend::new();
        let account = account();
        backend.register_factor(&account, AuthFactorKind::Password, "hunter2");

        let reply = backend
            .start_session(&account, false, SessionIntent::VerifyOnly)
            .await
            .unwrap();
        let handle = reply.context.session_handle().to_string();
        backend.invalidate_session(reply.context).await;
        assert_eq!(backend.invalidated_session_count(), 1);
        assert_eq!(backend.open_session_count(), 0);

        let context = CredentialContext::new(
            handle,
            account,
            FactorConfiguration::new(AuthFactorSet::empty(), AuthFactorSet::empty()),
        );
        let err = backend.get_factor_configuration(context).await.unwrap_err();
        assert_eq!(err, BackendError::SessionInvalidated);
    }

    #[tokio::test]
    async fn records_session_flags() {
        let backend = FakeCredentialBackend::new();
        backend
            .start_session(&account(), true, SessionIntent::Decrypt)
            .await
            .unwrap();
        assert_eq!(backend.last_ephemeral(), Some(true));
        assert_eq!(backend.last_intent(), Some(SessionIntent::Decrypt));
    }
}
