//! # Proofgate (Authentication Orchestration Core)
//!
//! `proofgate` coordinates user re-authentication for a multi-purpose desktop
//! session: login, screen unlock, `WebAuthn` user verification, and settings or
//! password-manager re-auth. It owns the policy of *when* an authentication
//! attempt may run and *what* a successful attempt yields; the actual
//! credential verification is delegated to a pluggable backend.
//!
//! ## Arbitration Model
//!
//! All requests funnel through a single [`arbiter::FactorArbiter`]. At most one
//! attempt is active at a time; a strict preemption order decides what happens
//! when requests collide:
//!
//! - a new login attempt replaces an existing login attempt;
//! - screen unlock replaces any other in-session attempt and is itself never
//!   replaced;
//! - every other pairing is a tie, and ties keep whichever attempt came first.
//!
//! Login-screen and in-session authentication are mutually exclusive operating
//! modes. Switching modes while an attempt is active is cooperative: the
//! attempt is cancelled and the switch lands once it reports idle.
//!
//! ## Attempt Lifecycle
//!
//! Each admitted request is driven by an [`attempt::AuthAttempt`], a strict
//! state machine (`WaitForInit -> Initialized -> AuthStarted -> AuthSucceeded`,
//! with `close` legal from any state). Factor verification failures return the
//! attempt to the ready state for retry; structural backend failures close it.
//! Cancellation is race-free: every backend continuation carries the attempt
//! epoch it was issued under, and replies from a superseded epoch are dropped
//! and their sessions invalidated.
//!
//! ## Proof Tokens
//!
//! A successful attempt does not hand the credential session to the caller.
//! Instead the session is exchanged for an opaque, time-limited proof token
//! held by the [`token_store::ProofTokenStore`]; privileged operations redeem
//! the token within its TTL. Tokens are 256 bits of fresh randomness and are
//! redacted from all logs.

pub mod account;
pub mod arbiter;
pub mod attempt;
pub mod backend;
pub mod config;
pub mod error;
pub mod factor;
pub mod metrics;
pub mod purpose;
pub mod token_store;

pub use account::AccountId;
pub use arbiter::{AuthRequestConsumer, FactorArbiter};
pub use attempt::{
    AttemptObserver, AttemptOutcome, AttemptState, AuthAttempt, FactorFailureReason, NoopObserver,
};
pub use backend::{CredentialBackend, CredentialContext, SessionIntent};
pub use config::ArbiterConfig;
pub use error::{BackendError, Error};
pub use factor::{AuthFactorKind, AuthFactorSet, FactorConfiguration};
pub use metrics::{MetricsRecorder, NoopMetrics};
pub use purpose::{AuthAttemptVector, AuthMode, AuthPurpose};
pub use token_store::{ProofToken, ProofTokenStore};
