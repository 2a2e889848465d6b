//! Logs a resolved account into ZenTao on the gateway side and hands the
//! resulting session cookies to the user's browser.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{ACCEPT, LOCATION, SET_COOKIE, USER_AGENT};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, SameSite};
use reqwest::cookie::{CookieStore, Jar};
use url::Url;

use crate::error::RelayError;

const FALLBACK_IP: &str = "127.0.0.1";
const FALLBACK_USER_AGENT: &str = "Mozilla/5.0";
const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Who the end user looks like to ZenTao.
///
/// ZenTao ties sessions to the client address and user agent, so the relay
/// presents the browser's values rather than the gateway's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    pub ip: String,
    pub user_agent: String,
}

impl ClientContext {
    #[must_use]
    pub fn new(ip: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            ip: ip
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| FALLBACK_IP.to_owned()),
            user_agent: user_agent
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| FALLBACK_USER_AGENT.to_owned()),
        }
    }
}

/// Session state captured from ZenTao, ready to be written to the browser.
#[derive(Debug, Default)]
pub struct RelayedSession {
    /// Cookies from the relay's jar, by name.
    pub cookies: BTreeMap<String, String>,
    /// Final-hop `Set-Cookie` headers whose cookie the jar did not keep.
    pub passthrough: Vec<HeaderValue>,
}

/// Result of a relay attempt.
///
/// A failed relay is not an error for the user: they still get redirected,
/// just without a session.
#[derive(Debug)]
pub enum RelayOutcome {
    Established(RelayedSession),
    Degraded(RelayError),
}

/// Performs the impersonation handshake against ZenTao.
#[derive(Debug, Clone)]
pub struct SessionRelay {
    timeout: Duration,
    secure_cookies: bool,
}

impl Default for SessionRelay {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(8),
            secure_cookies: false,
        }
    }
}

impl SessionRelay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Mark re-issued cookies `Secure` (HTTPS deployments).
    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    /// Open a ZenTao session at `home`, then log in through `impersonation`.
    pub async fn relay(&self, home: &Url, impersonation: &Url, client: &ClientContext) -> RelayOutcome {
        match self.try_relay(home, impersonation, client).await {
            Ok(session) => RelayOutcome::Established(session),
            Err(e) => RelayOutcome::Degraded(e),
        }
    }

    /// Relay, then redirect to `destination` carrying whatever session was obtained.
    pub async fn redirect(
        &self,
        home: &Url,
        impersonation: &Url,
        client: &ClientContext,
        destination: &str,
    ) -> Response {
        match self.relay(home, impersonation, client).await {
            RelayOutcome::Established(session) => {
                tracing::info!(
                    cookies = ?session.cookies.keys().collect::<Vec<_>>(),
                    passthrough = session.passthrough.len(),
                    "relayed ZenTao session"
                );
                self.session_redirect(&session, destination)
            }
            RelayOutcome::Degraded(e) => {
                tracing::warn!(error = %e, "session relay failed, redirecting without session");
                found(destination)
            }
        }
    }

    async fn try_relay(
        &self,
        home: &Url,
        impersonation: &Url,
        client: &ClientContext,
    ) -> Result<RelayedSession, RelayError> {
        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .timeout(self.timeout)
            .build()?;

        let headers = forwarded_headers(client)?;

        http.get(home.clone())
            .headers(headers.clone())
            .send()
            .await?;
        let response = http
            .get(impersonation.clone())
            .headers(headers)
            .send()
            .await?;

        let mut session = RelayedSession::default();
        for url in [home, impersonation, response.url()] {
            if let Some(header) = jar.cookies(url) {
                let header = header
                    .to_str()
                    .map_err(|e| RelayError::Header(e.to_string()))?;
                for (name, value) in parse_cookie_header(header) {
                    session.cookies.entry(name).or_insert(value);
                }
            }
        }
        for raw in response.headers().get_all(SET_COOKIE) {
            let captured = raw
                .to_str()
                .ok()
                .and_then(set_cookie_name)
                .is_some_and(|name| session.cookies.contains_key(name));
            if !captured {
                session.passthrough.push(raw.clone());
            }
        }
        Ok(session)
    }

    fn session_redirect(&self, session: &RelayedSession, destination: &str) -> Response {
        let mut response = found(destination);
        let headers = response.headers_mut();
        for (name, value) in &session.cookies {
            let cookie = Cookie::build((name.clone(), value.clone()))
                .path("/")
                .http_only(true)
                .secure(self.secure_cookies)
                .same_site(SameSite::Lax)
                .build();
            match HeaderValue::from_str(&cookie.to_string()) {
                Ok(value) => {
                    headers.append(SET_COOKIE, value);
                }
                Err(e) => tracing::warn!(cookie = %name, error = %e, "dropping unencodable cookie"),
            }
        }
        for raw in &session.passthrough {
            headers.append(SET_COOKIE, raw.clone());
        }
        response
    }
}

/// `302 Found` to `destination`, falling back to `/` for unencodable targets.
pub(crate) fn found(destination: &str) -> Response {
    let location =
        HeaderValue::from_str(destination).unwrap_or_else(|_| HeaderValue::from_static("/"));
    (StatusCode::FOUND, [(LOCATION, location)]).into_response()
}

fn forwarded_headers(client: &ClientContext) -> Result<reqwest::header::HeaderMap, RelayError> {
    let invalid = |e: reqwest::header::InvalidHeaderValue| RelayError::Header(e.to_string());
    let ip = HeaderValue::from_str(&client.ip).map_err(invalid)?;
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert("x-real-ip", ip.clone());
    headers.insert("x-forwarded-for", ip);
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&client.user_agent).map_err(invalid)?,
    );
    headers.insert(ACCEPT, HeaderValue::from_static(HTML_ACCEPT));
    Ok(headers)
}

/// Split a `Cookie` request header into name/value pairs.
fn parse_cookie_header(header: &str) -> impl Iterator<Item = (String, String)> + '_ {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, value)| (name.to_owned(), value.to_owned()))
}

/// Cookie name of a `Set-Cookie` header value.
fn set_cookie_name(header: &str) -> Option<&str> {
    header
        .split(';')
        .next()
        .and_then(|pair| pair.split_once('='))
        .map(|(name, _)| name.trim())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_header_parses_pairs() {
        let pairs: Vec<_> = parse_cookie_header("zentaosid=abc; za=admin; lang=zh-cn").collect();
        assert_eq!(
            pairs,
            vec![
                ("zentaosid".to_string(), "abc".to_string()),
                ("za".to_string(), "admin".to_string()),
                ("lang".to_string(), "zh-cn".to_string()),
            ]
        );
    }

    #[test]
    fn set_cookie_name_ignores_attributes() {
        assert_eq!(set_cookie_name("zp=tok; Path=/; HttpOnly"), Some("zp"));
        assert_eq!(set_cookie_name("=orphan; Path=/"), None);
        assert_eq!(set_cookie_name("garbage"), None);
    }

    #[test]
    fn client_context_defaults() {
        let ctx = ClientContext::new(None, Some(String::new()));
        assert_eq!(ctx.ip, "127.0.0.1");
        assert_eq!(ctx.user_agent, "Mozilla/5.0");
    }

    #[test]
    fn session_redirect_sets_safe_cookie_attributes() {
        let mut session = RelayedSession::default();
        session.cookies.insert("zentaosid".into(), "abc".into());
        session
            .passthrough
            .push(HeaderValue::from_static("other=1; Domain=example.org"));

        let response = SessionRelay::new().session_redirect(&session, "/my.html");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[LOCATION], "/my.html");

        let cookies: Vec<_> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].starts_with("zentaosid=abc"));
        assert!(cookies[0].contains("HttpOnly"));
        assert!(cookies[0].contains("SameSite=Lax"));
        assert!(cookies[0].contains("Path=/"));
        assert!(!cookies[0].contains("Secure"));
        assert_eq!(cookies[1], "other=1; Domain=example.org");
    }

    #[test]
    fn found_falls_back_on_unencodable_location() {
        let response = found("/bad\nheader");
        assert_eq!(response.headers()[LOCATION], "/");
    }
}
