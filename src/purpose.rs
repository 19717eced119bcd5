//! Authentication purposes, operating modes, and the preemption order.

use crate::account::AccountId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad operating context that restricts which purposes may run.
///
/// Login-screen and in-session authentication are mutually exclusive; `None`
/// means the coordinator has not been initialized yet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    None,
    LoginScreen,
    InSession,
}

/// Why the caller wants the user re-verified.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPurpose {
    Login,
    ScreenUnlock,
    #[serde(rename = "webauthn")]
    WebAuthn,
    SettingsReauth,
    PasswordManagerReauth,
}

impl AuthPurpose {
    pub const ALL: [Self; 5] = [
        Self::Login,
        Self::ScreenUnlock,
        Self::WebAuthn,
        Self::SettingsReauth,
        Self::PasswordManagerReauth,
    ];

    /// The only mode this purpose may run in. Mismatches are rejected at
    /// admission, before any attempt state is created.
    #[must_use]
    pub fn required_mode(self) -> AuthMode {
        match self {
            Self::Login => AuthMode::LoginScreen,
            _ => AuthMode::InSession,
        }
    }

    /// Strict preemption order between a new attempt (`self`) and an existing
    /// one (`other`):
    ///
    /// - a new login attempt replaces an existing login attempt (there is only
    ///   ever one login flow);
    /// - screen unlock replaces any other in-session attempt but is never
    ///   itself replaced;
    /// - every other pairing is a tie, and ties keep whichever attempt came
    ///   first.
    #[must_use]
    pub fn overrides(self, other: Self) -> bool {
        match self {
            Self::Login => other == Self::Login,
            Self::ScreenUnlock => other != Self::Login && other != Self::ScreenUnlock,
            _ => false,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::ScreenUnlock => "screen_unlock",
            Self::WebAuthn => "webauthn",
            Self::SettingsReauth => "settings_reauth",
            Self::PasswordManagerReauth => "password_manager_reauth",
        }
    }
}

impl fmt::Display for AuthPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one logical authentication attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthAttemptVector {
    pub account: AccountId,
    pub purpose: AuthPurpose,
}

impl AuthAttemptVector {
    #[must_use]
    pub fn new(account: AccountId, purpose: AuthPurpose) -> Self {
        Self { account, purpose }
    }
}
