//! Authentication factor kinds and fixed-capacity factor sets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A specific authentication method.
///
/// The enum is closed: set capacity is fixed at compile time and the bitset
/// below indexes by discriminant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFactorKind {
    Password,
    Pin,
}

impl AuthFactorKind {
    pub const ALL: [Self; 2] = [Self::Password, Self::Pin];

    /// Whether a failed verification can change backend-side state that must
    /// be refetched (e.g. PIN lockout counters). Password has no such state.
    #[must_use]
    pub fn lockout_sensitive(self) -> bool {
        matches!(self, Self::Pin)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Pin => "pin",
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for AuthFactorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-size set over [`AuthFactorKind`].
#[derive(Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthFactorSet(u8);

impl AuthFactorSet {
    #[must_use]
    pub fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub fn contains(self, kind: AuthFactorKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn insert(&mut self, kind: AuthFactorKind) {
        self.0 |= kind.bit();
    }

    pub fn remove(&mut self, kind: AuthFactorKind) {
        self.0 &= !kind.bit();
    }

    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Factors in `self` that are not in `other`.
    #[must_use]
    pub fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = AuthFactorKind> {
        AuthFactorKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }
}

impl FromIterator<AuthFactorKind> for AuthFactorSet {
    fn from_iter<I: IntoIterator<Item = AuthFactorKind>>(iter: I) -> Self {
        let mut set = Self::empty();
        for kind in iter {
            set.insert(kind);
        }
        set
    }
}

impl fmt::Debug for AuthFactorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Snapshot of the backend's factor configuration for one session.
///
/// Rebuilt on every fetch, since lockout state can change after any failed
/// verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FactorConfiguration {
    configured: AuthFactorSet,
    locked: AuthFactorSet,
}

impl FactorConfiguration {
    #[must_use]
    pub fn new(configured: AuthFactorSet, locked: AuthFactorSet) -> Self {
        Self { configured, locked }
    }

    #[must_use]
    pub fn configured(&self) -> AuthFactorSet {
        self.configured
    }

    #[must_use]
    pub fn locked(&self) -> AuthFactorSet {
        self.locked
    }

    /// Factors the user may submit right now: configured minus locked out.
    #[must_use]
    pub fn available(&self) -> AuthFactorSet {
        self.configured.difference(self.locked)
    }
}
