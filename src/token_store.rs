//! Proof-token exchange and redemption store.
//!
//! Converts an authenticated [`CredentialContext`] into an opaque,
//! unguessable, time-limited token that other subsystems can redeem to
//! perform privileged operations without re-prompting the user.
//!
//! Security boundaries: the raw token is only ever handed to the caller that
//! completed authentication; the store keeps the credential context and the
//! expiry. Tokens carry no embedded semantics and are never recycled (256
//! bits of fresh randomness per token).

use crate::backend::{CredentialBackend, CredentialContext};
use crate::error::Error;
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Opaque, unguessable proof-of-recent-authentication token.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProofToken(String);

impl ProofToken {
    /// Raw form for passing across process/component boundaries.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn generate() -> Result<Self, Error> {
        let mut bytes = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|_| Error::TokenGeneration)?;
        Ok(Self(Base64UrlUnpadded::encode_string(&bytes)))
    }
}

impl From<String> for ProofToken {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for ProofToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Token values never reach logs.
        f.write_str("ProofToken(..)")
    }
}

struct TokenEntry {
    context: CredentialContext,
    issued_at: Instant,
}

/// Maps live proof tokens to the credential contexts they were exchanged for.
///
/// The store is the only long-lived owner of credential state; each context
/// has exactly one owner at any instant (the attempt, then this store).
pub struct ProofTokenStore {
    backend: Arc<dyn CredentialBackend>,
    ttl: Duration,
    entries: Mutex<HashMap<ProofToken, TokenEntry>>,
}

impl ProofTokenStore {
    #[must_use]
    pub fn new(backend: Arc<dyn CredentialBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Exchange an authenticated context for a fresh token and its TTL.
    ///
    /// Takes ownership of `context`; the caller keeps only the token.
    pub async fn store(&self, context: CredentialContext) -> Result<(ProofToken, Duration), Error> {
        let token = ProofToken::generate()?;
        let expired = {
            let mut entries = self.entries.lock().await;
            let expired = purge_expired(&mut entries, self.ttl);
            entries.insert(
                token.clone(),
                TokenEntry {
                    context,
                    issued_at: Instant::now(),
                },
            );
            expired
        };
        self.invalidate_expired(expired);
        debug!(ttl_seconds = self.ttl.as_secs(), "proof token issued");
        Ok((token, self.ttl))
    }

    /// Whether the token maps to a live context. Does not extend the TTL.
    pub async fn is_valid(&self, token: &ProofToken) -> bool {
        let (valid, expired) = {
            let mut entries = self.entries.lock().await;
            let expired = purge_expired(&mut entries, self.ttl);
            (entries.contains_key(token), expired)
        };
        self.invalidate_expired(expired);
        valid
    }

    /// Run a privileged operation against the stored context.
    ///
    /// The token is not consumed; redemption is allowed repeatedly within the
    /// TTL window. Returns `None` for unknown or expired tokens.
    pub async fn redeem<R>(
        &self,
        token: &ProofToken,
        op: impl FnOnce(&CredentialContext) -> R,
    ) -> Option<R> {
        let mut entries = self.entries.lock().await;
        let expired = purge_expired(&mut entries, self.ttl);
        let result = entries.get(token).map(|entry| op(&entry.context));
        drop(entries);
        self.invalidate_expired(expired);
        result
    }

    /// Remove the token immediately. Completes after the backend session
    /// teardown finishes. Idempotent on unknown or already-expired tokens.
    pub async fn invalidate(&self, token: &ProofToken) {
        let removed = self.entries.lock().await.remove(token);
        match removed {
            Some(entry) => {
                self.backend.invalidate_session(entry.context).await;
                debug!("proof token invalidated");
            }
            None => warn!("ignored invalidation of unknown proof token"),
        }
    }

    /// Number of live tokens (expired entries are swept first).
    pub async fn live_tokens(&self) -> usize {
        let (count, expired) = {
            let mut entries = self.entries.lock().await;
            let expired = purge_expired(&mut entries, self.ttl);
            (entries.len(), expired)
        };
        self.invalidate_expired(expired);
        count
    }

    fn invalidate_expired(&self, expired: Vec<CredentialContext>) {
        for context in expired {
            let backend = self.backend.clone();
            tokio::spawn(async move {
                backend.invalidate_session(context).await;
            });
        }
    }
}

fn purge_expired(
    entries: &mut HashMap<ProofToken, TokenEntry>,
    ttl: Duration,
) -> Vec<CredentialContext> {
    let now = Instant::now();
    let dead: Vec<ProofToken> = entries
        .iter()
        .filter(|(_, entry)| now.duration_since(entry.issued_at) >= ttl)
        .map(|(token, _)| token.clone())
        .collect();
    dead.into_iter()
        .filter_map(|token| entries.remove(&token))
        .map(|entry| entry.context)
        .collect()
}
