//! Per-request authentication attempt state machine.
//!
//! Flow Overview: `start` opens a credential session and fetches the factor
//! configuration; `submit_factor` drives one verification round against the
//! backend; success exchanges the credential context for a proof token and
//! tears the attempt down; failure returns the attempt to the ready state so
//! another factor can be tried.
//!
//! Security boundaries: secrets pass through as [`SecretString`] and are
//! never stored or logged; the credential context has exactly one owner at
//! any instant; the completion callback fires at most once per `start`.
//!
//! Concurrency: all mutation happens behind one async mutex, which is never
//! held across a backend await. Every continuation captures the attempt
//! epoch at the point it issued its request; `close` advances the epoch, so
//! late backend replies are detected and ignored rather than acted upon.

use crate::account::AccountId;
use crate::backend::{CredentialBackend, CredentialContext, SessionIntent};
use crate::config::ArbiterConfig;
use crate::error::BackendError;
use crate::factor::{AuthFactorKind, AuthFactorSet};
use crate::metrics::MetricsRecorder;
use crate::purpose::{AuthAttemptVector, AuthPurpose};
use crate::token_store::{ProofToken, ProofTokenStore};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lifecycle states of one attempt.
///
/// The transition table is strict; anything else is a programming error and
/// fails a hard assertion:
///
/// ```text
/// WaitForInit  --(session + factors ok)-->  Initialized
/// Initialized  --(submit factor X)------->  AuthStarted(X)
/// AuthStarted(X) --(backend error)------->  Initialized
/// AuthStarted(X) --(backend success)----->  AuthSucceeded(X)
/// any state    --(close)----------------->  WaitForInit
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptState {
    WaitForInit,
    Initialized,
    AuthStarted(AuthFactorKind),
    AuthSucceeded(AuthFactorKind),
}

impl AttemptState {
    fn can_advance_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::WaitForInit, Self::Initialized) => true,
            (Self::Initialized, Self::AuthStarted(_)) => true,
            (Self::AuthStarted(_), Self::Initialized) => true,
            (Self::AuthStarted(started), Self::AuthSucceeded(succeeded)) => started == succeeded,
            _ => false,
        }
    }
}

/// Why a factor verification round failed, as surfaced to the UI observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FactorFailureReason {
    IncorrectCredential,
    LockedOut,
}

/// UI-facing events for one attempt.
///
/// Implementations belong to the presentation layer; the core only pushes
/// coarse state changes, never backend error codes.
pub trait AttemptObserver: Send + Sync {
    fn on_available_factors_changed(&self, available: AuthFactorSet);
    fn on_factor_attempt_started(&self, kind: AuthFactorKind);
    fn on_factor_attempt_failed(&self, kind: AuthFactorKind, reason: FactorFailureReason);
    fn on_factor_attempt_succeeded(&self, kind: AuthFactorKind);
    fn on_closed(&self);
}

/// Observer that ignores every event, for callers without a UI.
#[derive(Clone, Debug)]
pub struct NoopObserver;

impl AttemptObserver for NoopObserver {
    fn on_available_factors_changed(&self, _available: AuthFactorSet) {}

    fn on_factor_attempt_started(&self, _kind: AuthFactorKind) {}

    fn on_factor_attempt_failed(&self, _kind: AuthFactorKind, _reason: FactorFailureReason) {}

    fn on_factor_attempt_succeeded(&self, _kind: AuthFactorKind) {}

    fn on_closed(&self) {}
}

/// Final result of one attempt, delivered through the completion callback.
#[derive(Clone, Debug)]
pub struct AttemptOutcome {
    pub success: bool,
    pub token: Option<ProofToken>,
    pub ttl: Duration,
}

impl AttemptOutcome {
    #[must_use]
    pub(crate) fn succeeded(token: ProofToken, ttl: Duration) -> Self {
        Self {
            success: true,
            token: Some(token),
            ttl,
        }
    }

    #[must_use]
    pub(crate) fn failed() -> Self {
        Self {
            success: false,
            token: None,
            ttl: Duration::ZERO,
        }
    }
}

/// Invoked exactly once per admitted `start`, with success or failure.
pub type CompletionCallback = Box<dyn FnOnce(AttemptOutcome) + Send + 'static>;

struct Inner {
    state: AttemptState,
    /// Advances on every `start` and `close`; continuations compare against
    /// the value they captured and drop out when it moved on.
    epoch: u64,
    shown: bool,
    vector: Option<AuthAttemptVector>,
    context: Option<CredentialContext>,
    observer: Option<Arc<dyn AttemptObserver>>,
    completion: Option<CompletionCallback>,
    started_at: Option<Instant>,
}

impl Inner {
    fn advance(&mut self, id: Uuid, next: AttemptState) {
        assert!(
            self.state.can_advance_to(next),
            "illegal attempt state transition: {:?} -> {next:?}",
            self.state
        );
        debug!(attempt = %id, from = ?self.state, to = ?next, "attempt state transition");
        self.state = next;
    }
}

/// Drives one authentication flow from `start` to success or close.
pub struct AuthAttempt {
    id: Uuid,
    backend: Arc<dyn CredentialBackend>,
    tokens: Arc<ProofTokenStore>,
    metrics: Arc<dyn MetricsRecorder>,
    config: ArbiterConfig,
    inner: Mutex<Inner>,
}

impl AuthAttempt {
    #[must_use]
    pub fn new(
        backend: Arc<dyn CredentialBackend>,
        tokens: Arc<ProofTokenStore>,
        metrics: Arc<dyn MetricsRecorder>,
        config: ArbiterConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            backend,
            tokens,
            metrics,
            config,
            inner: Mutex::new(Inner {
                state: AttemptState::WaitForInit,
                epoch: 0,
                shown: false,
                vector: None,
                context: None,
                observer: None,
                completion: None,
                started_at: None,
            }),
        }
    }

    /// Open the attempt for `account` and drive it to the ready state.
    ///
    /// Returns `false` without touching any session state when an attempt is
    /// already open on this instance; `on_complete` still fires (with
    /// failure) exactly once in that case. Otherwise the backend session is
    /// opened and the factor configuration fetched; the attempt reaches
    /// `Initialized` only if both succeed, and closes with failure otherwise.
    pub async fn start(
        &self,
        account: AccountId,
        purpose: AuthPurpose,
        observer: Arc<dyn AttemptObserver>,
        on_complete: CompletionCallback,
    ) -> bool {
        let epoch = {
            let mut inner = self.inner.lock().await;
            if inner.shown {
                drop(inner);
                warn!(attempt = %self.id, %account, "attempt already in flight, rejecting start");
                on_complete(AttemptOutcome::failed());
                return false;
            }
            inner.shown = true;
            inner.epoch += 1;
            inner.vector = Some(AuthAttemptVector::new(account.clone(), purpose));
            inner.observer = Some(observer);
            inner.completion = Some(on_complete);
            inner.started_at = Some(Instant::now());
            inner.epoch
        };
        self.metrics.attempt_started(purpose);
        info!(attempt = %self.id, %account, purpose = %purpose, "authentication attempt started");

        let intent = match purpose {
            AuthPurpose::ScreenUnlock => SessionIntent::Decrypt,
            _ => SessionIntent::VerifyOnly,
        };
        let reply = match self
            .backend
            .start_session(&account, self.config.ephemeral_sessions(), intent)
            .await
        {
            Ok(reply) => reply,
            Err(err) => {
                error!(attempt = %self.id, %account, "failed to open credential session: {err}");
                self.close_if_current(epoch).await;
                return true;
            }
        };
        if !reply.user_exists {
            error!(attempt = %self.id, %account, "credential backend does not know this account");
            self.spawn_invalidate(reply.context);
            self.close_if_current(epoch).await;
            return true;
        }
        let context = match self.backend.get_factor_configuration(reply.context).await {
            Ok(context) => context,
            Err(err) => {
                error!(attempt = %self.id, %account, "failed to fetch factor configuration: {err}");
                self.close_if_current(epoch).await;
                return true;
            }
        };

        let observer = {
            let mut inner = self.inner.lock().await;
            if inner.epoch != epoch || !inner.shown {
                drop(inner);
                self.spawn_invalidate(context);
                return true;
            }
            inner.advance(self.id, AttemptState::Initialized);
            let available = context.factors().available();
            inner.context = Some(context);
            let observer = inner.observer.clone();
            drop(inner);
            observer.map(|observer| (observer, available))
        };
        if let Some((observer, available)) = observer {
            observer.on_available_factors_changed(available);
        }
        true
    }

    /// Verify `secret` against `kind`.
    ///
    /// On a recoverable backend error the attempt returns to `Initialized`,
    /// refetching the factor configuration first when the factor has
    /// lockout-sensitive state (PIN); the completion callback does not fire
    /// and the user may retry. A structural backend error closes the attempt
    /// with failure. Success exchanges the context for a proof token and
    /// completes the attempt.
    ///
    /// # Panics
    ///
    /// Panics when the attempt is not in the `Initialized` state or when
    /// `kind` is not in the currently available factor set; both are
    /// programming errors in the caller (the UI must disable unavailable
    /// factor inputs, and the arbiter rejects re-entrant submissions).
    pub async fn submit_factor(&self, kind: AuthFactorKind, secret: SecretString) {
        let (epoch, context, observer) = {
            let mut inner = self.inner.lock().await;
            assert!(inner.shown, "factor submitted on a closed attempt");
            assert!(
                inner.state == AttemptState::Initialized,
                "factor submitted while in state {:?}",
                inner.state
            );
            let Some(context) = inner.context.take() else {
                unreachable!("initialized attempt without a credential context");
            };
            assert!(
                context.factors().available().contains(kind),
                "{kind} factor is not available for this attempt"
            );
            inner.advance(self.id, AttemptState::AuthStarted(kind));
            let Some(observer) = inner.observer.clone() else {
                unreachable!("open attempt without an observer");
            };
            (inner.epoch, context, observer)
        };
        observer.on_factor_attempt_started(kind);
        debug!(attempt = %self.id, factor = %kind, "factor verification started");

        let reply = self
            .backend
            .authenticate_with_factor(kind, secret, context)
            .await;
        match reply.error {
            None => {
                self.finish_success(kind, reply.context, epoch, observer)
                    .await;
            }
            Some(err) if err.is_fatal() => {
                error!(attempt = %self.id, factor = %kind, "factor verification failed structurally: {err}");
                self.metrics.factor_result(kind, false);
                self.spawn_invalidate(reply.context);
                self.close_if_current(epoch).await;
            }
            Some(err) => {
                self.metrics.factor_result(kind, false);
                let reason = match err {
                    BackendError::FactorLockedOut => FactorFailureReason::LockedOut,
                    _ => FactorFailureReason::IncorrectCredential,
                };
                self.recover_after_failure(kind, reason, reply.context, epoch, observer)
                    .await;
            }
        }
    }

    /// Close the attempt from any state.
    ///
    /// Invalidates any backend session the attempt still owns, resets local
    /// state, and fires the completion callback with failure if it has not
    /// fired yet. Safe to call repeatedly; later calls are no-ops.
    pub async fn close(&self) {
        self.close_internal(None).await;
    }

    /// Whether an attempt is currently open on this instance.
    pub async fn is_shown(&self) -> bool {
        self.inner.lock().await.shown
    }

    /// Current lifecycle state, for diagnostics and tests.
    pub async fn state(&self) -> AttemptState {
        self.inner.lock().await.state
    }

    /// Close only if the attempt is still the one that captured `epoch`.
    async fn close_if_current(&self, epoch: u64) {
        self.close_internal(Some(epoch)).await;
    }

    async fn close_internal(&self, expected_epoch: Option<u64>) {
        let (context, completion, observer, vector, started_at) = {
            let mut inner = self.inner.lock().await;
            if let Some(expected) = expected_epoch {
                if inner.epoch != expected {
                    return;
                }
            }
            if !inner.shown {
                return;
            }
            inner.epoch += 1;
            inner.shown = false;
            inner.state = AttemptState::WaitForInit;
            (
                inner.context.take(),
                inner.completion.take(),
                inner.observer.take(),
                inner.vector.take(),
                inner.started_at.take(),
            )
        };
        if let Some(context) = context {
            self.spawn_invalidate(context);
        }
        if let Some(on_complete) = completion {
            if let (Some(vector), Some(started_at)) = (&vector, started_at) {
                self.metrics
                    .attempt_finished(vector.purpose, false, started_at.elapsed());
            }
            on_complete(AttemptOutcome::failed());
        }
        info!(attempt = %self.id, "authentication attempt closed");
        if let Some(observer) = observer {
            observer.on_closed();
        }
    }

    async fn finish_success(
        &self,
        kind: AuthFactorKind,
        context: CredentialContext,
        epoch: u64,
        observer: Arc<dyn AttemptObserver>,
    ) {
        {
            let mut inner = self.inner.lock().await;
            if inner.epoch != epoch || !inner.shown {
                drop(inner);
                self.spawn_invalidate(context);
                return;
            }
            inner.advance(self.id, AttemptState::AuthSucceeded(kind));
        }
        self.metrics.factor_result(kind, true);
        observer.on_factor_attempt_succeeded(kind);

        let stored = self.tokens.store(context).await;
        let (completion, vector, started_at) = {
            let mut inner = self.inner.lock().await;
            if inner.epoch != epoch {
                // Closed while the exchange was in flight; the store owns the
                // context now, so retire the token it issued.
                drop(inner);
                if let Ok((token, _)) = stored {
                    let tokens = self.tokens.clone();
                    tokio::spawn(async move {
                        tokens.invalidate(&token).await;
                    });
                }
                return;
            }
            inner.epoch += 1;
            inner.shown = false;
            inner.state = AttemptState::WaitForInit;
            inner.context = None;
            inner.observer = None;
            (
                inner.completion.take(),
                inner.vector.take(),
                inner.started_at.take(),
            )
        };
        let elapsed = started_at.map_or(Duration::ZERO, |at| at.elapsed());
        let purpose = vector.map(|vector| vector.purpose);
        match stored {
            Ok((token, ttl)) => {
                info!(attempt = %self.id, factor = %kind, "authentication attempt succeeded");
                if let Some(purpose) = purpose {
                    self.metrics.attempt_finished(purpose, true, elapsed);
                }
                if let Some(on_complete) = completion {
                    on_complete(AttemptOutcome::succeeded(token, ttl));
                }
            }
            Err(err) => {
                error!(attempt = %self.id, "failed to issue proof token: {err}");
                if let Some(purpose) = purpose {
                    self.metrics.attempt_finished(purpose, false, elapsed);
                }
                if let Some(on_complete) = completion {
                    on_complete(AttemptOutcome::failed());
                }
            }
        }
        observer.on_closed();
    }

    async fn recover_after_failure(
        &self,
        kind: AuthFactorKind,
        reason: FactorFailureReason,
        context: CredentialContext,
        epoch: u64,
        observer: Arc<dyn AttemptObserver>,
    ) {
        // Lockout counters may have changed; refetch before re-enabling
        // input. Password has no such state and skips the round trip.
        let refreshed = kind.lockout_sensitive();
        let context = if refreshed {
            match self.backend.get_factor_configuration(context).await {
                Ok(context) => context,
                Err(err) => {
                    error!(attempt = %self.id, "failed to refresh factor configuration: {err}");
                    self.close_if_current(epoch).await;
                    return;
                }
            }
        } else {
            context
        };

        let available = {
            let mut inner = self.inner.lock().await;
            if inner.epoch != epoch || !inner.shown {
                drop(inner);
                self.spawn_invalidate(context);
                return;
            }
            inner.advance(self.id, AttemptState::Initialized);
            let available = context.factors().available();
            inner.context = Some(context);
            available
        };
        if refreshed {
            observer.on_available_factors_changed(available);
        }
        observer.on_factor_attempt_failed(kind, reason);
        info!(attempt = %self.id, factor = %kind, "factor verification failed, ready for retry");
    }

    fn spawn_invalidate(&self, context: CredentialContext) {
        let backend = self.backend.clone();
        tokio::spawn(async move {
            backend.invalidate_session(context).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AttemptObserver, AttemptOutcome, AttemptState, AuthAttempt, FactorFailureReason,
    };
    use crate::account::AccountId;
    use crate::backend::fake::FakeCredentialBackend;
    use crate::config::ArbiterConfig;
    use crate::error::BackendError;
    use crate::factor::{AuthFactorKind, AuthFactorSet};
    use crate::metrics::NoopMetrics;
    use crate::purpose::AuthPurpose;
    use crate::token_store::ProofTokenStore;
    use secrecy::SecretString;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<String>>,
        available: Mutex<Option<AuthFactorSet>>,
    }

    impl RecordingObserver {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn available(&self) -> Option<AuthFactorSet> {
            *self.available.lock().unwrap()
        }
    }

    impl AttemptObserver for RecordingObserver {
        fn on_available_factors_changed(&self, available: AuthFactorSet) {
            *self.available.lock().unwrap() = Some(available);
            self.events.lock().unwrap().push("factors".to_string());
        }

        fn on_factor_attempt_started(&self, kind: AuthFactorKind) {
            self.events.lock().unwrap().push(format!("started:{kind}"));
        }

        fn on_factor_attempt_failed(&self, kind: AuthFactorKind, reason: FactorFailureReason) {
            self.events
                .lock()
                .unwrap()
                .push(format!("failed:{kind}:{reason:?}"));
        }

        fn on_factor_attempt_succeeded(&self, kind: AuthFactorKind) {
            self.events
                .lock()
                .unwrap()
                .push(format!("succeeded:{kind}"));
        }

        fn on_closed(&self) {
            self.events.lock().unwrap().push("closed".to_string());
        }
    }

    struct Fixture {
        backend: Arc<FakeCredentialBackend>,
        tokens: Arc<ProofTokenStore>,
        attempt: Arc<AuthAttempt>,
        observer: Arc<RecordingObserver>,
        outcomes: Arc<Mutex<Vec<AttemptOutcome>>>,
    }

    impl Fixture {
        fn new() -> Self {
            let backend = Arc::new(FakeCredentialBackend::new());
            let tokens = Arc::new(ProofTokenStore::new(
                backend.clone(),
                Duration::from_secs(300),
            ));
            let attempt = Arc::new(AuthAttempt::new(
                backend.clone(),
                tokens.clone(),
                Arc::new(NoopMetrics),
                ArbiterConfig::new(),
            ));
            Self {
                backend,
                tokens,
                attempt,
                observer: Arc::new(RecordingObserver::default()),
                outcomes: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn completion(&self) -> super::CompletionCallback {
            let outcomes = self.outcomes.clone();
            Box::new(move |outcome| outcomes.lock().unwrap().push(outcome))
        }

        fn outcomes(&self) -> Vec<AttemptOutcome> {
            self.outcomes.lock().unwrap().clone()
        }

        async fn start(&self, account: &AccountId) -> bool {
            self.attempt
                .start(
                    account.clone(),
                    AuthPurpose::SettingsReauth,
                    self.observer.clone(),
                    self.completion(),
                )
                .await
        }
    }

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    #[tokio::test]
    async fn password_success_issues_token() {
        let fixture = Fixture::new();
        let account = AccountId::new("alice");
        fixture
            .backend
            .register_factor(&account, AuthFactorKind::Password, "hunter2");

        assert!(fixture.start(&account).await);
        assert_eq!(fixture.attempt.state().await, AttemptState::Initialized);
        assert!(fixture
            .observer
            .available()
            .unwrap()
            .contains(AuthFactorKind::Password));

        fixture
            .attempt
            .submit_factor(AuthFactorKind::Password, secret("hunter2"))
            .await;

        let outcomes = fixture.outcomes();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].success);
        assert_eq!(outcomes[0].ttl, Duration::from_secs(300));
        let token = outcomes[0].token.clone().unwrap();
        assert!(fixture.tokens.is_valid(&token).await);
        assert!(!fixture.attempt.is_shown().await);
        assert!(fixture
            .observer
            .events()
            .contains(&"succeeded:password".to_string()));
    }

    #[tokio::test]
    async fn double_start_is_rejected_without_touching_state() {
        let fixture = Fixture::new();
        let account = AccountId::new("alice");
        fixture
            .backend
            .register_factor(&account, AuthFactorKind::Password, "hunter2");

        assert!(fixture.start(&account).await);
        assert!(!fixture.start(&account).await);

        // The second completion fired with failure; the first attempt is
        // still open and usable.
        let outcomes = fixture.outcomes();
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].success);
        assert!(fixture.attempt.is_shown().await);
        assert_eq!(fixture.attempt.state().await, AttemptState::Initialized);
    }

    #[tokio::test]
    async fn session_open_failure_closes_with_failure() {
        let fixture = Fixture::new();
        let account = AccountId::new("alice");
        fixture
            .backend
            .set_start_session_error(BackendError::ServiceUnavailable("down".to_string()));

        assert!(fixture.start(&account).await);
        let outcomes = fixture.outcomes();
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].success);
        assert!(!fixture.attempt.is_shown().await);
        assert!(fixture.observer.events().contains(&"closed".to_string()));
    }

    #[tokio::test]
    async fn unknown_account_is_fatal() {
        let fixture = Fixture::new();
        let account = AccountId::new("nobody");

        assert!(fixture.start(&account).await);
        let outcomes = fixture.outcomes();
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].success);
        // The session the backend opened for the probe is torn down.
        tokio::task::yield_now().await;
        assert_eq!(fixture.backend.open_session_count(), 0);
    }

    #[tokio::test]
    async fn wrong_pin_refreshes_factors_and_allows_retry() {
        let fixture = Fixture::new();
        let account = AccountId::new("alice");
        fixture
            .backend
            .register_factor(&account, AuthFactorKind::Password, "hunter2");
        fixture
            .backend
            .register_factor(&account, AuthFactorKind::Pin, "1234");
        fixture.backend.set_pin_lockout_threshold(1);

        assert!(fixture.start(&account).await);
        fixture
            .attempt
            .submit_factor(AuthFactorKind::Pin, secret("0000"))
            .await;

        // Lockout tripped: the refreshed set no longer offers the PIN.
        let available = fixture.observer.available().unwrap();
        assert!(!available.contains(AuthFactorKind::Pin));
        assert!(available.contains(AuthFactorKind::Password));
        assert_eq!(fixture.attempt.state().await, AttemptState::Initialized);
        assert!(fixture.outcomes().is_empty());
        assert!(fixture
            .observer
            .events()
            .contains(&"failed:pin:IncorrectCredential".to_string()));

        fixture
            .attempt
            .submit_factor(AuthFactorKind::Password, secret("hunter2"))
            .await;
        let outcomes = fixture.outcomes();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].success);
    }

    #[tokio::test]
    async fn wrong_password_does_not_refetch_factors() {
        let fixture = Fixture::new();
        let account = AccountId::new("alice");
        fixture
            .backend
            .register_factor(&account, AuthFactorKind::Password, "hunter2");

        assert!(fixture.start(&account).await);
        let factor_events_before = fixture
            .observer
            .events()
            .iter()
            .filter(|event| *event == "factors")
            .count();

        fixture
            .attempt
            .submit_factor(AuthFactorKind::Password, secret("wrong"))
            .await;

        let factor_events_after = fixture
            .observer
            .events()
            .iter()
            .filter(|event| *event == "factors")
            .count();
        assert_eq!(factor_events_before, factor_events_after);
        assert_eq!(fixture.attempt.state().await, AttemptState::Initialized);
        assert!(fixture.outcomes().is_empty());
    }

    #[tokio::test]
    async fn close_fires_callback_once_and_is_idempotent() {
        let fixture = Fixture::new();
        let account = AccountId::new("alice");
        fixture
            .backend
            .register_factor(&account, AuthFactorKind::Password, "hunter2");

        assert!(fixture.start(&account).await);
        fixture.attempt.close().await;
        fixture.attempt.close().await;

        let outcomes = fixture.outcomes();
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].success);
        assert_eq!(
            fixture
                .observer
                .events()
                .iter()
                .filter(|event| *event == "closed")
                .count(),
            1
        );
        tokio::task::yield_now().await;
        assert_eq!(fixture.backend.open_session_count(), 0);
    }

    #[tokio::test]
    async fn close_during_in_flight_verification_ignores_late_reply() {
        let fixture = Fixture::new();
        let account = AccountId::new("alice");
        fixture
            .backend
            .register_factor(&account, AuthFactorKind::Pin, "1234");
        assert!(fixture.start(&account).await);
        fixture
            .backend
            .set_authenticate_delay(Duration::from_millis(50));

        let attempt = fixture.attempt.clone();
        let submission = tokio::spawn(async move {
            attempt
                .submit_factor(AuthFactorKind::Pin, secret("1234"))
                .await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        fixture.attempt.close().await;
        submission.await.unwrap();

        // Exactly one failure outcome, triggered by close; the late success
        // reply was dropped and no token was issued.
        let outcomes = fixture.outcomes();
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].success);
        assert_eq!(fixture.tokens.live_tokens().await, 0);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fixture.backend.open_session_count(), 0);
    }

    #[tokio::test]
    #[should_panic(expected = "factor submitted on a closed attempt")]
    async fn submitting_on_closed_attempt_panics() {
        let fixture = Fixture::new();
        fixture
            .attempt
            .submit_factor(AuthFactorKind::Password, secret("hunter2"))
            .await;
    }

    #[tokio::test]
    #[should_panic(expected = "factor is not available")]
    async fn submitting_unavailable_factor_panics() {
        let fixture = Fixture::new();
        let account = AccountId::new("alice");
        fixture
            .backend
            .register_factor(&account, AuthFactorKind::Password, "hunter2");
        fixture.backend.lock_factor(&account, AuthFactorKind::Pin);

        assert!(fixture.start(&account).await);
        fixture
            .attempt
            .submit_factor(AuthFactorKind::Pin, secret("1234"))
            .await;
    }

    #[test]
    fn transition_table_is_strict() {
        use AttemptState::{AuthStarted, AuthSucceeded, Initialized, WaitForInit};
        let pin = AuthFactorKind::Pin;
        let password = AuthFactorKind::Password;

        assert!(WaitForInit.can_advance_to(Initialized));
        assert!(Initialized.can_advance_to(AuthStarted(pin)));
        assert!(AuthStarted(pin).can_advance_to(Initialized));
        assert!(AuthStarted(pin).can_advance_to(AuthSucceeded(pin)));

        assert!(!WaitForInit.can_advance_to(AuthStarted(pin)));
        assert!(!Initialized.can_advance_to(AuthSucceeded(pin)));
        assert!(!AuthStarted(pin).can_advance_to(AuthSucceeded(password)));
        assert!(!AuthSucceeded(pin).can_advance_to(Initialized));
        assert!(!Initialized.can_advance_to(WaitForInit));
    }
}
