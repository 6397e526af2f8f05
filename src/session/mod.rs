//! Authenticated session acquisition
//!
//! A [`SessionProvider`] hands out cookies and headers to attach to requests
//! for a host. [`StaticSessionProvider`] serves a fixed cookie string or bearer
//! token from configuration.

use crate::config::AuthConfig;
use crate::url::host_matches;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session unavailable: {0}")]
    Unavailable(String),
}

/// Credentials attached to outgoing requests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub cookies: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl Session {
    /// Parses a `name=value; other=value` cookie string
    ///
    /// Pairs without `=` or with an empty name are ignored.
    pub fn from_cookie_string(raw: &str) -> Self {
        let cookies = raw
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                Some((name.to_string(), value.trim().to_string()))
            })
            .collect();

        Self {
            cookies,
            headers: Vec::new(),
        }
    }

    pub fn bearer(token: &str) -> Self {
        Self {
            cookies: Vec::new(),
            headers: vec![("Authorization".to_string(), format!("Bearer {}", token))],
        }
    }

    /// The `Cookie` header value, if any cookies are set
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Session for requests to `host`, or `None` to fetch anonymously
    async fn get_session(&self, host: &str) -> Result<Option<Session>, SessionError>;
}

/// Always anonymous
pub struct NoSession;

#[async_trait]
impl SessionProvider for NoSession {
    async fn get_session(&self, _host: &str) -> Result<Option<Session>, SessionError> {
        Ok(None)
    }
}

/// Serves one fixed session to every matching host
pub struct StaticSessionProvider {
    session: Session,
    hosts: Vec<String>,
}

impl StaticSessionProvider {
    pub fn new(session: Session, hosts: Vec<String>) -> Self {
        Self { session, hosts }
    }

    /// Builds a provider from `[auth]`; `None` when no credentials are set
    pub fn from_config(auth: &AuthConfig) -> Option<Self> {
        let session = match (&auth.cookie, &auth.token) {
            (Some(cookie), _) => Session::from_cookie_string(cookie),
            (None, Some(token)) => Session::bearer(token),
            (None, None) => return None,
        };
        Some(Self::new(session, auth.hosts.clone()))
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn get_session(&self, host: &str) -> Result<Option<Session>, SessionError> {
        let applies =
            self.hosts.is_empty() || self.hosts.iter().any(|pattern| host_matches(pattern, host));
        Ok(applies.then(|| self.session.clone()))
    }
}
