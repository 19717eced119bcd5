//! Orchestration configuration loaded at startup.

use std::time::Duration;

const DEFAULT_PROOF_TOKEN_TTL_SECONDS: u64 = 5 * 60;
const ENV_PROOF_TOKEN_TTL: &str = "PROOFGATE_TOKEN_TTL_SECONDS";
const ENV_EPHEMERAL_SESSIONS: &str = "PROOFGATE_EPHEMERAL_SESSIONS";

/// Configuration for the arbiter and the attempts it spawns.
#[derive(Clone, Debug)]
pub struct ArbiterConfig {
    proof_token_ttl_seconds: u64,
    ephemeral_sessions: bool,
}

impl ArbiterConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            proof_token_ttl_seconds: DEFAULT_PROOF_TOKEN_TTL_SECONDS,
            ephemeral_sessions: false,
        }
    }

    #[must_use]
    pub fn with_proof_token_ttl_seconds(mut self, seconds: u64) -> Self {
        self.proof_token_ttl_seconds = seconds;
        self
    }

    /// Ephemeral backend sessions leave no persistent credential state behind
    /// (guest-style sign-in).
    #[must_use]
    pub fn with_ephemeral_sessions(mut self, ephemeral: bool) -> Self {
        self.ephemeral_sessions = ephemeral;
        self
    }

    #[must_use]
    pub fn proof_token_ttl(&self) -> Duration {
        Duration::from_secs(self.proof_token_ttl_seconds)
    }

    #[must_use]
    pub fn ephemeral_sessions(&self) -> bool {
        self.ephemeral_sessions
    }

    /// Load configuration from environment variables. Unset or unparsable
    /// values fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Some(seconds) = parse_u64_env(ENV_PROOF_TOKEN_TTL) {
            config.proof_token_ttl_seconds = seconds;
        }
        if let Some(ephemeral) = parse_bool_env(ENV_EPHEMERAL_SESSIONS) {
            config.ephemeral_sessions = ephemeral;
        }
        config
    }
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_bool_env(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|value| match value.trim() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
}

fn parse_u64_env(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
}
