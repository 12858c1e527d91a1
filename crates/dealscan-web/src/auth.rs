//! Credential checks for the scan endpoints. Secrets are held only as SHA-256
//! digests so they cannot end up in a response or a log line.

use std::collections::HashSet;
use std::sync::Arc;

use axum::http::{header, HeaderMap, StatusCode};
use dealscan_sync::{ScanConfig, ScanTrigger};
use sha2::{Digest, Sha256};

pub const SESSION_COOKIE: &str = "dealscan_session";

type SecretDigest = [u8; 32];

fn digest(value: &str) -> SecretDigest {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Anonymous,
    Member,
    Admin,
}

/// Resolves a session token to a role.
pub trait SessionResolver: Send + Sync {
    fn resolve(&self, token: &str) -> SessionRole;
}

/// Fixed list of admin session tokens; anything else is anonymous.
#[derive(Debug, Default)]
pub struct StaticSessions {
    admins: HashSet<SecretDigest>,
}

impl StaticSessions {
    pub fn new<'a>(admin_tokens: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            admins: admin_tokens.into_iter().map(digest).collect(),
        }
    }
}

impl SessionResolver for StaticSessions {
    fn resolve(&self, token: &str) -> SessionRole {
        if self.admins.contains(&digest(token)) {
            SessionRole::Admin
        } else {
            SessionRole::Anonymous
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    Unauthorized,
    Forbidden,
}

impl AuthRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthRejection::Unauthorized => StatusCode::UNAUTHORIZED,
            AuthRejection::Forbidden => StatusCode::FORBIDDEN,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            AuthRejection::Unauthorized => "Unauthorized",
            AuthRejection::Forbidden => "Admin access required",
        }
    }
}

#[derive(Clone)]
pub struct ScanAuth {
    cron_secret: Option<SecretDigest>,
    internal_secret: Option<SecretDigest>,
    sessions: Arc<dyn SessionResolver>,
}

impl ScanAuth {
    pub fn new(
        cron_secret: Option<&str>,
        internal_secret: Option<&str>,
        sessions: Arc<dyn SessionResolver>,
    ) -> Self {
        Self {
            cron_secret: cron_secret.map(digest),
            internal_secret: internal_secret.map(digest),
            sessions,
        }
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(
            config.cron_secret.as_deref(),
            config.internal_secret.as_deref(),
            Arc::new(StaticSessions::new(
                config.admin_sessions.iter().map(String::as_str),
            )),
        )
    }

    fn has_shared_secret(&self) -> bool {
        self.cron_secret.is_some() || self.internal_secret.is_some()
    }

    fn session_role(&self, headers: &HeaderMap) -> SessionRole {
        session_token(headers)
            .map(|token| self.sessions.resolve(&token))
            .unwrap_or(SessionRole::Anonymous)
    }

    /// Admin session or nothing.
    pub fn require_admin(&self, headers: &HeaderMap) -> Result<(), AuthRejection> {
        match self.session_role(headers) {
            SessionRole::Admin => Ok(()),
            SessionRole::Member => Err(AuthRejection::Forbidden),
            SessionRole::Anonymous => Err(AuthRejection::Unauthorized),
        }
    }

    /// `GET /scan`. An internal continuation is signed with the internal
    /// secret, or with the scheduler secret when no internal secret exists.
    /// Otherwise either secret is accepted. An admin session counts only when
    /// no shared secret is configured at all.
    pub fn authorize_step(&self, headers: &HeaderMap, internal: bool) -> Result<ScanTrigger, AuthRejection> {
        let presented = bearer_token(headers).map(|token| digest(&token));
        let matches = |secret: Option<SecretDigest>| secret.is_some() && secret == presented;

        if internal && self.has_shared_secret() {
            let signing = self.internal_secret.or(self.cron_secret);
            return if matches(signing) {
                Ok(ScanTrigger::Continuation)
            } else {
                Err(AuthRejection::Unauthorized)
            };
        }
        if matches(self.cron_secret) {
            return Ok(ScanTrigger::Scheduler);
        }
        if matches(self.internal_secret) {
            return Ok(ScanTrigger::Continuation);
        }
        if self.has_shared_secret() {
            return Err(AuthRejection::Unauthorized);
        }
        self.require_admin(headers).map(|()| ScanTrigger::Admin)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
