use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use url::Url;

use crate::error::ProviderError;
use crate::provider::IdentityProvider;
use crate::types::{AccessToken, ExternalIdentity};
use crate::with_trailing_slash;

const ACCESS_TOKEN_HEADER: &str = "x-acs-dingtalk-access-token";

/// DingTalk open platform configuration.
///
/// Required fields are constructor parameters; endpoints default to the
/// public DingTalk hosts.
///
/// ```rust,ignore
/// let config = DingTalkConfig::new("ding-app-key", "ding-app-secret")
///     .with_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct DingTalkConfig {
    pub(crate) app_key: String,
    pub(crate) app_secret: String,
    pub(crate) api_base: Url,
    pub(crate) auth_url: Url,
    pub(crate) timeout: Duration,
}

impl DingTalkConfig {
    #[must_use]
    pub fn new(app_key: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            app_secret: app_secret.into(),
            api_base: "https://api.dingtalk.com/"
                .parse()
                .expect("valid default URL"),
            auth_url: "https://login.dingtalk.com/oauth2/auth"
                .parse()
                .expect("valid default URL"),
            timeout: Duration::from_secs(10),
        }
    }

    /// Override the REST API host (`https://api.dingtalk.com/`).
    #[must_use]
    pub fn with_api_base(mut self, url: Url) -> Self {
        self.api_base = with_trailing_slash(url);
        self
    }

    /// Override the authorization page.
    #[must_use]
    pub fn with_auth_url(mut self, url: Url) -> Self {
        self.auth_url = url;
        self
    }

    /// Per-request timeout (default: 10 seconds).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    #[must_use]
    pub fn api_base(&self) -> &Url {
        &self.api_base
    }
}

/// DingTalk OAuth2 and contact API client.
pub struct DingTalkClient {
    config: DingTalkConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserAccessTokenResponse {
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirectoryResponse {
    #[serde(default)]
    users: Vec<JsonValue>,
}

impl DingTalkClient {
    #[must_use]
    pub fn new(config: DingTalkConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    fn endpoint(&self, path: &str) -> Url {
        self.config
            .api_base
            .join(path)
            .unwrap_or_else(|_| self.config.api_base.clone())
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, ProviderError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let detail = response.text().await.unwrap_or_default();
        Err(ProviderError::Status {
            operation,
            status,
            detail,
        })
    }
}

#[async_trait]
impl IdentityProvider for DingTalkClient {
    async fn exchange_code(&self, code: &str) -> Result<AccessToken, ProviderError> {
        let body = serde_json::json!({
            "clientId": self.config.app_key,
            "clientSecret": self.config.app_secret,
            "code": code,
            "grantType": "authorization_code",
        });

        let response = self
            .http
            .post(self.endpoint("v1.0/oauth2/userAccessToken"))
            .timeout(self.config.timeout)
            .json(&body)
            .send()
            .await?;

        let response = Self::ensure_success(response, "token exchange").await?;
        let token: UserAccessTokenResponse = response.json().await?;
        token
            .access_token
            .filter(|t| !t.is_empty())
            .map(AccessToken)
            .ok_or(ProviderError::MissingAccessToken)
    }

    async fn fetch_profile(&self, token: &AccessToken) -> Result<ExternalIdentity, ProviderError> {
        let response = self
            .http
            .get(self.endpoint("v1.0/contact/users/me"))
            .timeout(self.config.timeout)
            .header(ACCESS_TOKEN_HEADER, token.as_str())
            .send()
            .await?;

        let response = Self::ensure_success(response, "profile request").await?;
        let profile: JsonValue = response.json().await?;
        identity_from_profile(profile).ok_or(ProviderError::MissingIdentity)
    }

    async fn list_directory(
        &self,
        token: &AccessToken,
    ) -> Result<Vec<ExternalIdentity>, ProviderError> {
        let response = self
            .http
            .get(self.endpoint("v1.0/contact/users"))
            .timeout(self.config.timeout * 2)
            .header(ACCESS_TOKEN_HEADER, token.as_str())
            .send()
            .await?;

        let response = Self::ensure_success(response, "directory listing").await?;
        let directory: DirectoryResponse = response.json().await?;
        Ok(directory
            .users
            .into_iter()
            .filter_map(identity_from_profile)
            .collect())
    }

    fn authorization_url(&self, redirect_uri: &Url, state: &str) -> Url {
        let mut url = self.config.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.app_key)
            .append_pair("redirect_uri", redirect_uri.as_str())
            .append_pair("response_type", "code")
            .append_pair("scope", "openid")
            .append_pair("state", state)
            .append_pair("prompt", "consent");
        url
    }
}

/// Builds an identity from a DingTalk user object.
///
/// Returns `None` when the payload carries neither `userId`, `openId` nor `unionId`.
fn identity_from_profile(profile: JsonValue) -> Option<ExternalIdentity> {
    let id = ["userId", "openId", "unionId"]
        .iter()
        .find_map(|key| non_empty_str(&profile, key))?;
    let name = ["name", "nick"]
        .iter()
        .find_map(|key| non_empty_str(&profile, key))
        .unwrap_or_default();
    let department = ["departmentId", "deptId"]
        .iter()
        .find_map(|key| scalar_to_string(profile.get(*key)?));

    let mut identity = ExternalIdentity::new(id).with_display_name(name);
    if let Some(department) = department {
        identity = identity.with_department(department);
    }
    Some(identity.with_raw(profile))
}

fn non_empty_str(value: &JsonValue, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn scalar_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> DingTalkClient {
        DingTalkClient::new(DingTalkConfig::new("ding-key", "ding-secret"))
    }

    #[test]
    fn authorization_url_carries_state_and_redirect() {
        let redirect: Url = "https://pm.example.com/dingtalk/callback".parse().unwrap();
        let url = client().authorization_url(&redirect, "Q|abc");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert_eq!(url.host_str(), Some("login.dingtalk.com"));
        assert!(pairs.contains(&("client_id".into(), "ding-key".into())));
        assert!(pairs.contains(&("state".into(), "Q|abc".into())));
        assert!(pairs.contains(&(
            "redirect_uri".into(),
            "https://pm.example.com/dingtalk/callback".into()
        )));
        assert!(pairs.contains(&("prompt".into(), "consent".into())));
    }

    #[test]
    fn profile_prefers_user_id_and_name() {
        let identity = identity_from_profile(serde_json::json!({
            "userId": "u001",
            "openId": "open-1",
            "name": "张三",
            "nick": "zs",
            "departmentId": 42
        }))
        .unwrap();

        assert_eq!(identity.id.as_str(), "u001");
        assert_eq!(identity.display_name.as_deref(), Some("张三"));
        assert_eq!(identity.department.as_deref(), Some("42"));
    }

    #[test]
    fn profile_falls_back_to_open_id_and_nick() {
        let identity = identity_from_profile(serde_json::json!({
            "openId": "open-1",
            "nick": " Alice ",
            "deptId": "d-7"
        }))
        .unwrap();

        assert_eq!(identity.id.as_str(), "open-1");
        assert_eq!(identity.display_name.as_deref(), Some("Alice"));
        assert_eq!(identity.department.as_deref(), Some("d-7"));
    }

    #[test]
    fn profile_without_id_is_rejected() {
        assert!(identity_from_profile(serde_json::json!({ "nick": "ghost" })).is_none());
        assert!(identity_from_profile(serde_json::json!({ "userId": "" })).is_none());
    }

    #[test]
    fn api_base_gets_trailing_slash() {
        let config = DingTalkConfig::new("k", "s")
            .with_api_base("http://127.0.0.1:8080/mock".parse().unwrap());
        assert_eq!(config.api_base().as_str(), "http://127.0.0.1:8080/mock/");
    }
}
