//! Observability seam consumed by the attempt state machine and the arbiter.

use crate::factor::AuthFactorKind;
use crate::purpose::AuthPurpose;
use std::time::Duration;

/// Records counters and durations for authentication flows.
///
/// The recorder is an external collaborator; histogram names and wire formats
/// belong to the embedding application.
pub trait MetricsRecorder: Send + Sync {
    fn attempt_started(&self, purpose: AuthPurpose);
    fn attempt_rejected(&self, purpose: AuthPurpose);
    fn factor_result(&self, kind: AuthFactorKind, success: bool);
    fn attempt_finished(&self, purpose: AuthPurpose, success: bool, elapsed: Duration);
}

#[derive(Clone, Debug)]
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {
    fn attempt_started(&self, _purpose: AuthPurpose) {}

    fn attempt_rejected(&self, _purpose: AuthPurpose) {}

    fn factor_result(&self, _kind: AuthFactorKind, _success: bool) {}

    fn attempt_finished(&self, _purpose: AuthPurpose, _success: bool, _elapsed: Duration) {}
}
