//! Process-wide coordination of authentication attempts.
//!
//! Flow Overview: callers ask the arbiter to re-verify a user for a given
//! purpose. The arbiter checks purpose/mode compatibility and the strict
//! preemption order, then either rejects the request, preempts the active
//! attempt, or admits the request and drives a fresh [`AuthAttempt`].
//!
//! At most one attempt is active at a time and at most one request is
//! buffered as pending; login-screen and in-session authentication are
//! mutually exclusive operating modes, and a requested mode switch is
//! deferred until the active attempt reports idle.

use crate::account::AccountId;
use crate::attempt::{AttemptObserver, AttemptOutcome, AuthAttempt, CompletionCallback};
use crate::backend::CredentialBackend;
use crate::config::ArbiterConfig;
use crate::metrics::MetricsRecorder;
use crate::purpose::{AuthAttemptVector, AuthMode, AuthPurpose};
use crate::token_store::ProofTokenStore;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Caller-side interface for one authentication request.
///
/// Exactly one terminal callback fires per request: `on_attempt_rejected`
/// at admission time, or `on_attempt_finished` once the admitted attempt
/// completes or is cancelled. `on_attempt_started` precedes
/// `on_attempt_finished` and hands over the attempt the caller drives
/// factor submissions through.
pub trait AuthRequestConsumer: Send + Sync {
    /// The request was not admitted: arbiter not ready, purpose/mode
    /// mismatch, or priority loss against a live request.
    fn on_attempt_rejected(&self);
    /// The request was admitted (possibly after waiting out a preemption)
    /// and its attempt is being initialized.
    fn on_attempt_started(&self, attempt: Arc<AuthAttempt>);
    /// The admitted attempt finished; `outcome.success` tells whether a
    /// proof token was issued.
    fn on_attempt_finished(&self, outcome: AttemptOutcome);
}

/// One readiness waiter queued by [`FactorArbiter::ensure_initialized`].
pub type ReadyCallback = Box<dyn FnOnce() + Send + 'static>;

struct ActiveAttempt {
    vector: AuthAttemptVector,
    attempt: Arc<AuthAttempt>,
}

struct PendingRequest {
    vector: AuthAttemptVector,
    observer: Arc<dyn AttemptObserver>,
    consumer: Arc<dyn AuthRequestConsumer>,
}

#[derive(Default)]
struct Inner {
    mode: AuthMode,
    ready: bool,
    target_mode: Option<AuthMode>,
    current: Option<ActiveAttempt>,
    pending: Option<PendingRequest>,
    ready_waiters: Vec<ReadyCallback>,
}

enum Admission {
    Reject,
    /// The newcomer outranked the active attempt and was stashed as
    /// pending; cancel the active attempt. Carries a displaced pending
    /// request to reject, if the newcomer outranked that too.
    Preempt(Arc<AuthAttempt>, Option<PendingRequest>),
    /// No active attempt, but the pending slot was occupied and the
    /// newcomer outranked it; reject the displaced request.
    ReplacePending(PendingRequest),
    Admit(Arc<AuthAttempt>),
}

/// Serializes authentication attempts across all call sites.
///
/// Construct once at startup via [`FactorArbiter::new`]; all admission,
/// preemption, and mode decisions go through the returned handle.
pub struct FactorArbiter {
    backend: Arc<dyn CredentialBackend>,
    tokens: Arc<ProofTokenStore>,
    metrics: Arc<dyn MetricsRecorder>,
    config: ArbiterConfig,
    weak_self: Weak<FactorArbiter>,
    inner: Mutex<Inner>,
}

impl FactorArbiter {
    #[must_use]
    pub fn new(
        backend: Arc<dyn CredentialBackend>,
        tokens: Arc<ProofTokenStore>,
        metrics: Arc<dyn MetricsRecorder>,
        config: ArbiterConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            backend,
            tokens,
            metrics,
            config,
            weak_self: weak_self.clone(),
            inner: Mutex::new(Inner::default()),
        })
    }

    /// Switch the operating mode.
    ///
    /// When an attempt is active the switch is cooperative: the attempt is
    /// asked to close and the mode changes only once it reports idle. Any
    /// stashed pending request is rejected as part of the switch.
    pub async fn initialize_for_mode(&self, mode: AuthMode) {
        enum Action {
            Deferred(Arc<AuthAttempt>),
            Switched(Option<PendingRequest>, Vec<ReadyCallback>),
        }

        let action = {
            let mut inner = self.inner.lock().await;
            if let Some(current) = &inner.current {
                let attempt = current.attempt.clone();
                inner.target_mode = Some(mode);
                inner.ready = false;
                Action::Deferred(attempt)
            } else {
                let pending = inner.pending.take();
                let waiters = Self::switch_mode(&mut inner, mode);
                Action::Switched(pending, waiters)
            }
        };
        match action {
            Action::Deferred(attempt) => {
                info!(?mode, "mode switch deferred until the active attempt closes");
                attempt.close().await;
            }
            Action::Switched(pending, waiters) => {
                if let Some(pending) = pending {
                    self.reject_pending(pending);
                }
                for waiter in waiters {
                    waiter();
                }
            }
        }
    }

    /// Invoke `on_ready` now if the arbiter is ready for its current mode,
    /// otherwise queue it to fire once a mode switch completes.
    pub async fn ensure_initialized(&self, on_ready: ReadyCallback) {
        let mut inner = self.inner.lock().await;
        if !inner.ready {
            inner.ready_waiters.push(on_ready);
            return;
        }
        drop(inner);
        on_ready();
    }

    /// Request re-authentication of `account` for `purpose`.
    ///
    /// Admission rules, in order: purposes incompatible with the current mode
    /// are rejected immediately; a new attempt that outranks the active one
    /// preempts it (the newcomer starts once the cancellation completes);
    /// priority ties lose to whichever attempt came first. Rejection is
    /// surfaced through [`AuthRequestConsumer::on_attempt_rejected`], never
    /// by silently hanging.
    pub async fn start_authentication(
        &self,
        account: AccountId,
        purpose: AuthPurpose,
        observer: Arc<dyn AttemptObserver>,
        consumer: Arc<dyn AuthRequestConsumer>,
    ) {
        let vector = AuthAttemptVector::new(account.clone(), purpose);
        let decision = {
            let mut inner = self.inner.lock().await;
            if !inner.ready || purpose.required_mode() != inner.mode {
                Admission::Reject
            } else if let Some(current) = &inner.current {
                if !purpose.overrides(current.vector.purpose) {
                    Admission::Reject
                } else if inner
                    .pending
                    .as_ref()
                    .is_some_and(|pending| !purpose.overrides(pending.vector.purpose))
                {
                    Admission::Reject
                } else {
                    let active = current.attempt.clone();
                    let displaced = inner.pending.replace(PendingRequest {
                        vector,
                        observer: observer.clone(),
                        consumer: consumer.clone(),
                    });
                    Admission::Preempt(active, displaced)
                }
            } else if let Some(pending) = &inner.pending {
                if purpose.overrides(pending.vector.purpose) {
                    match inner.pending.replace(PendingRequest {
                        vector,
                        observer: observer.clone(),
                        consumer: consumer.clone(),
                    }) {
                        Some(displaced) => Admission::ReplacePending(displaced),
                        None => unreachable!("pending slot emptied while locked"),
                    }
                } else {
                    Admission::Reject
                }
            } else {
                let attempt = self.new_attempt();
                inner.current = Some(ActiveAttempt {
                    vector,
                    attempt: attempt.clone(),
                });
                Admission::Admit(attempt)
            }
        };

        match decision {
            Admission::Reject => {
                warn!(%account, purpose = %purpose, "authentication request rejected");
                self.metrics.attempt_rejected(purpose);
                consumer.on_attempt_rejected();
            }
            Admission::Preempt(active, displaced) => {
                info!(%account, purpose = %purpose, "preempting active attempt");
                if let Some(displaced) = displaced {
                    self.reject_pending(displaced);
                }
                active.close().await;
            }
            Admission::ReplacePending(displaced) => {
                info!(%account, purpose = %purpose, "replacing pending attempt");
                self.reject_pending(displaced);
            }
            Admission::Admit(attempt) => {
                info!(%account, purpose = %purpose, "authentication attempt admitted");
                let completion = self.completion_for(
                    AuthAttemptVector::new(account.clone(), purpose),
                    consumer.clone(),
                );
                consumer.on_attempt_started(attempt.clone());
                attempt.start(account, purpose, observer, completion).await;
            }
        }
    }

    /// Current operating mode.
    pub async fn mode(&self) -> AuthMode {
        self.inner.lock().await.mode
    }

    /// Whether no attempt is active or buffered.
    pub async fn is_idle(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.current.is_none() && inner.pending.is_none()
    }

    /// Called (via the completion wrapper) once an attempt is over; performs
    /// the deferred mode switch or promotes the pending request.
    async fn attempt_finished(&self, vector: AuthAttemptVector) {
        enum Followup {
            None,
            Switch(AuthMode, Option<PendingRequest>, Vec<ReadyCallback>),
            Promote(Arc<AuthAttempt>, PendingRequest),
        }

        let followup = {
            let mut inner = self.inner.lock().await;
            if !inner
                .current
                .as_ref()
                .is_some_and(|current| current.vector == vector)
            {
                return;
            }
            inner.current = None;
            if let Some(mode) = inner.target_mode.take() {
                let pending = inner.pending.take();
                let waiters = Self::switch_mode(&mut inner, mode);
                Followup::Switch(mode, pending, waiters)
            } else if let Some(pending) = inner.pending.take() {
                let attempt = self.new_attempt();
                inner.current = Some(ActiveAttempt {
                    vector: pending.vector.clone(),
                    attempt: attempt.clone(),
                });
                Followup::Promote(attempt, pending)
            } else {
                Followup::None
            }
        };

        match followup {
            Followup::None => {}
            Followup::Switch(mode, pending, waiters) => {
                info!(?mode, "deferred mode switch completed");
                if let Some(pending) = pending {
                    self.reject_pending(pending);
                }
                for waiter in waiters {
                    waiter();
                }
            }
            Followup::Promote(attempt, pending) => {
                info!(
                    account = %pending.vector.account,
                    purpose = %pending.vector.purpose,
                    "promoting pending attempt"
                );
                let completion =
                    self.completion_for(pending.vector.clone(), pending.consumer.clone());
                pending.consumer.on_attempt_started(attempt.clone());
                attempt
                    .start(
                        pending.vector.account,
                        pending.vector.purpose,
                        pending.observer,
                        completion,
                    )
                    .await;
            }
        }
    }

    /// Flip to `mode` and drain the readiness waiters. The caller runs the
    /// returned waiters after releasing the inner lock.
    fn switch_mode(inner: &mut Inner, mode: AuthMode) -> Vec<ReadyCallback> {
        inner.mode = mode;
        inner.target_mode = None;
        inner.ready = mode != AuthMode::None;
        if !inner.ready {
            return Vec::new();
        }
        info!(?mode, "operating mode switched");
        std::mem::take(&mut inner.ready_waiters)
    }

    fn new_attempt(&self) -> Arc<AuthAttempt> {
        Arc::new(AuthAttempt::new(
            self.backend.clone(),
            self.tokens.clone(),
            self.metrics.clone(),
            self.config.clone(),
        ))
    }

    fn reject_pending(&self, pending: PendingRequest) {
        warn!(
            account = %pending.vector.account,
            purpose = %pending.vector.purpose,
            "pending attempt rejected"
        );
        self.metrics.attempt_rejected(pending.vector.purpose);
        pending.consumer.on_attempt_rejected();
    }

    fn completion_for(
        &self,
        vector: AuthAttemptVector,
        consumer: Arc<dyn AuthRequestConsumer>,
    ) -> CompletionCallback {
        let weak = self.weak_self.clone();
        Box::new(move |outcome| {
            consumer.on_attempt_finished(outcome);
            if let Some(arbiter) = weak.upgrade() {
                tokio::spawn(async move {
                    arbiter.attempt_finished(vector).await;
                });
            }
        })
    }
}
