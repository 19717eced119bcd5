//! Trait boundary for the external credential verification service.
//!
//! The backend is consumed as a black-box async contract: the core never sees
//! wire formats or hashing details, only session handles and coarse error
//! categories. [`fake::FakeCredentialBackend`] provides a scriptable
//! in-memory implementation for tests.

pub mod fake;

use crate::account::AccountId;
use crate::error::BackendError;
use crate::factor::{AuthFactorKind, FactorConfiguration};
use async_trait::async_trait;
use secrecy::SecretString;

/// What the opened session will be used for.
///
/// Re-auth flows only need verification; unlock flows need the backend to
/// decrypt the user's credential state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionIntent {
    Decrypt,
    VerifyOnly,
}

/// Authenticated (or in-progress) backend session state.
///
/// Exactly one owner holds a context at any instant: the in-flight attempt,
/// then the proof-token store after a successful exchange. The type is not
/// `Clone` on purpose.
#[derive(Debug)]
pub struct CredentialContext {
    session_handle: String,
    account: AccountId,
    factors: FactorConfiguration,
}

impl CredentialContext {
    #[must_use]
    pub fn new(
        session_handle: impl Into<String>,
        account: AccountId,
        factors: FactorConfiguration,
    ) -> Self {
        Self {
            session_handle: session_handle.into(),
            account,
            factors,
        }
    }

    #[must_use]
    pub fn session_handle(&self) -> &str {
        &self.session_handle
    }

    #[must_use]
    pub fn account(&self) -> &AccountId {
        &self.account
    }

    #[must_use]
    pub fn factors(&self) -> &FactorConfiguration {
        &self.factors
    }

    /// Replace the factor snapshot after a configuration fetch.
    #[must_use]
    pub fn with_factors(mut self, factors: FactorConfiguration) -> Self {
        self.factors = factors;
        self
    }
}

/// Reply from [`CredentialBackend::start_session`].
#[derive(Debug)]
pub struct StartSessionReply {
    /// Whether the account is known to the backend. `false` is fatal for
    /// in-session purposes; the returned context must still be invalidated.
    pub user_exists: bool,
    pub context: CredentialContext,
}

/// Reply from [`CredentialBackend::authenticate_with_factor`].
///
/// The context always comes back so the caller can keep it (retry) or
/// invalidate it (fatal error), mirroring the backend's move-in/move-out
/// session handling.
#[derive(Debug)]
pub struct FactorReply {
    pub context: CredentialContext,
    pub error: Option<BackendError>,
}

/// Async contract of the credential verification service.
///
/// Completion ordering for a single session follows request order; every call
/// is a suspension point for the attempt driving it.
#[async_trait]
pub trait CredentialBackend: Send + Sync {
    /// Open a verification session for `account`.
    async fn start_session(
        &self,
        account: &AccountId,
        ephemeral: bool,
        intent: SessionIntent,
    ) -> Result<StartSessionReply, BackendError>;

    /// Fetch the current factor configuration, including lockout state.
    async fn get_factor_configuration(
        &self,
        context: CredentialContext,
    ) -> Result<CredentialContext, BackendError>;

    /// Verify `secret` against the given factor.
    async fn authenticate_with_factor(
        &self,
        kind: AuthFactorKind,
        secret: SecretString,
        context: CredentialContext,
    ) -> FactorReply;

    /// Tear down a session. Fire-and-forget from the caller's point of view;
    /// errors are the backend's to log.
    async fn invalidate_session(&self, context: CredentialContext);
}
