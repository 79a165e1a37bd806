/// Credential issuance and caching.
///
/// Two policies, chosen by `CredentialScope`:
/// - per-connection: every connection is its own identity and gets a fresh
///   credential; nothing is cached or shared
/// - shared: one identity for the whole run; its credential is cached until
///   expiry and refreshed under a lock, so concurrent stale readers wait for
///   the single in-flight refresh instead of issuing their own
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use reqwest::header::{CONTENT_TYPE, SET_COOKIE};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use sse_protocol::credential::{extract_token, Token, TokenError};

use crate::config::{AuthSection, CredentialScope, IssueMethod};
use crate::outcome::ConnectionId;

#[derive(Debug, Clone)]
pub struct Credential {
    pub identity: u64,
    pub token: Token,
    pub issued_at: Instant,
    /// `None` when the credential is not cached, or its TTL runs past the
    /// clock's range
    pub expires_at: Option<Instant>,
}

impl Credential {
    pub fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires| now < expires)
    }
}

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("credential request failed: {0}")]
    Network(String),
    #[error("credential endpoint answered HTTP {0}")]
    Status(u16),
    #[error(transparent)]
    Token(#[from] TokenError),
}

pub struct Authenticator {
    http: reqwest::Client,
    base_url: String,
    settings: AuthSection,
    /// Shared-scope cache; the lock is held across a refresh
    cache: Mutex<Option<Credential>>,
    /// Issuance requests sent so far
    issued: AtomicU64,
}

impl Authenticator {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, settings: AuthSection) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            settings,
            cache: Mutex::new(None),
            issued: AtomicU64::new(0),
        }
    }

    /// Identity a connection authenticates as.
    pub fn identity_for(&self, connection: ConnectionId) -> u64 {
        match self.settings.scope {
            CredentialScope::PerConnection => connection,
            CredentialScope::Shared => self.settings.shared_identity,
        }
    }

    /// Number of issuance requests sent to the target service.
    pub fn issued_count(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }

    /// Credential for `identity`, from cache when the policy allows it.
    pub async fn obtain(&self, identity: u64) -> Result<Credential, AuthError> {
        match self.settings.scope {
            CredentialScope::PerConnection => self.issue(identity, None).await,
            CredentialScope::Shared => {
                let mut cached = self.cache.lock().await;
                if let Some(credential) = cached.as_ref().filter(|c| c.is_fresh(Instant::now())) {
                    return Ok(credential.clone());
                }
                let ttl = Duration::from_secs(self.settings.ttl_secs);
                let credential = self.issue(identity, Some(ttl)).await?;
                *cached = Some(credential.clone());
                Ok(credential)
            }
        }
    }

    /// `obtain`, re-fetching once on failure.
    pub async fn obtain_with_retry(&self, identity: u64) -> Result<Credential, AuthError> {
        match self.obtain(identity).await {
            Ok(credential) => Ok(credential),
            Err(e) => {
                debug!(identity, error = %e, "credential issuance failed, retrying once");
                self.obtain(identity).await
            }
        }
    }

    /// Drop the cached credential if it is still `credential` (the server
    /// rejected it). A newer cached credential is left alone.
    pub async fn invalidate(&self, credential: &Credential) {
        if self.settings.scope != CredentialScope::Shared {
            return;
        }
        let mut cached = self.cache.lock().await;
        if cached.as_ref().is_some_and(|c| c.token == credential.token) {
            debug!(identity = credential.identity, "cached credential invalidated");
            *cached = None;
        }
    }

    async fn issue(&self, identity: u64, ttl: Option<Duration>) -> Result<Credential, AuthError> {
        self.issued.fetch_add(1, Ordering::Relaxed);

        let path = sse_protocol::expand_identity(&self.settings.issue_path, identity);
        let url = sse_protocol::join_url(&self.base_url, &path);
        let request = match self.settings.issue_method {
            IssueMethod::Get => self.http.get(&url),
            IssueMethod::Post => self.http.post(&url).header(CONTENT_TYPE, "application/json"),
        };

        let response = request
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(AuthError::Status(status.as_u16()));
        }

        let cookies: Vec<String> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_owned)
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let token = extract_token(
            cookies.iter().map(String::as_str),
            &body[..],
            self.settings.cookie_names.as_slice(),
            self.settings.token_pointers.as_slice(),
        )?;

        let issued_at = Instant::now();
        debug!(identity, kind = token.kind(), "credential issued");
        Ok(Credential {
            identity,
            token,
            issued_at,
            expires_at: ttl.and_then(|ttl| issued_at.checked_add(ttl)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator(scope: CredentialScope) -> Authenticator {
        let settings = AuthSection {
            scope,
            shared_identity: 7,
            ..AuthSection::default()
        };
        Authenticator::new(reqwest::Client::new(), "http://127.0.0.1:9", settings)
    }

    #[test]
    fn test_identity_per_scope() {
        assert_eq!(authenticator(CredentialScope::PerConnection).identity_for(12), 12);
        assert_eq!(authenticator(CredentialScope::Shared).identity_for(12), 7);
    }

    #[test]
    fn test_freshness() {
        let now = Instant::now();
        let mut credential = Credential {
            identity: 1,
            token: Token::Bearer("t".into()),
            issued_at: now,
            expires_at: None,
        };
        assert!(credential.is_fresh(now + Duration::from_secs(3600)));

        credential.expires_at = Some(now + Duration::from_secs(60));
        assert!(credential.is_fresh(now));
        assert!(!credential.is_fresh(now + Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_unreachable_issuer_is_a_network_error() {
        let auth = authenticator(CredentialScope::PerConnection);
        let err = auth.obtain_with_retry(1).await.unwrap_err();
        assert!(matches!(err, AuthError::Network(_)));
        assert_eq!(auth.issued_count(), 2);
    }
}
