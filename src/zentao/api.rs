use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::RwLock;
use url::Url;

use super::{ApiLoginSigner, TargetSystem};
use crate::error::TargetError;
use crate::types::{AccountName, NewAccount};

const TOKEN_HEADER: &str = "Token";

/// Administrator login used to mint a REST token when none is configured.
#[derive(Clone)]
pub struct AdminCredentials {
    pub account: String,
    pub password: String,
}

impl std::fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

/// ZenTao backend over the `api.php/v1` REST API.
///
/// Only existence checks and creation are available here; display-name
/// search and membership management stay [`TargetError::Unsupported`].
pub struct ZenTaoApi {
    signer: ApiLoginSigner,
    http: reqwest::Client,
    credentials: Option<AdminCredentials>,
    default_password: String,
    timeout: Duration,
    token: RwLock<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
}

impl ZenTaoApi {
    #[must_use]
    pub fn new(signer: ApiLoginSigner) -> Self {
        Self {
            signer,
            http: reqwest::Client::new(),
            credentials: None,
            default_password: "ChangeMe!2025".into(),
            timeout: Duration::from_secs(8),
            token: RwLock::new(None),
        }
    }

    /// Static admin token (`ZENTAO_ADMIN_TOKEN`).
    #[must_use]
    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        self.token = RwLock::new(Some(token.into()));
        self
    }

    /// Credentials used to obtain (and renew) the admin token.
    #[must_use]
    pub fn with_admin_credentials(mut self, credentials: AdminCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Initial password for accounts created through the API.
    #[must_use]
    pub fn with_default_password(mut self, password: impl Into<String>) -> Self {
        self.default_password = password.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn current_token(&self) -> Result<Option<String>, TargetError> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(Some(token));
        }
        self.login().await
    }

    /// Log in with the admin credentials and cache the token.
    async fn login(&self) -> Result<Option<String>, TargetError> {
        let Some(credentials) = &self.credentials else {
            return Ok(None);
        };
        let response = self
            .http
            .post(self.signer.endpoint("api.php/v1/tokens"))
            .timeout(self.timeout)
            .json(&serde_json::json!({
                "account": credentials.account,
                "password": credentials.password,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TargetError::Rejected {
                operation: "admin login",
                status: status.as_u16(),
                detail,
            });
        }
        let token = response
            .json::<TokenResponse>()
            .await?
            .token
            .filter(|t| !t.is_empty());
        if token.is_some() {
            tracing::info!(account = %credentials.account, "obtained ZenTao admin token");
        }
        *self.token.write().await = token.clone();
        Ok(token)
    }

    /// Send a request with the admin token, logging in again once on 401/403.
    async fn send_authorized(
        &self,
        build: impl Fn(Option<&str>) -> reqwest::RequestBuilder + Send + Sync,
    ) -> Result<reqwest::Response, TargetError> {
        let token = self.current_token().await?;
        let response = build(token.as_deref()).send().await?;
        if !matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) || self.credentials.is_none()
        {
            return Ok(response);
        }

        tracing::debug!(status = %response.status(), "ZenTao token rejected, logging in again");
        *self.token.write().await = None;
        let token = self.login().await?;
        Ok(build(token.as_deref()).send().await?)
    }

    fn authorized(
        &self,
        builder: reqwest::RequestBuilder,
        token: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let builder = builder.timeout(self.timeout);
        match token {
            Some(token) => builder.header(TOKEN_HEADER, token),
            None => builder,
        }
    }

    fn user_url(&self, account: &AccountName) -> Url {
        let mut url = self.signer.endpoint("api.php/v1/users");
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(account.as_str());
        }
        url
    }
}

#[async_trait]
impl TargetSystem for ZenTaoApi {
    async fn account_exists(&self, account: &AccountName) -> Result<bool, TargetError> {
        let url = self.user_url(account);
        let response = self
            .send_authorized(|token| self.authorized(self.http.get(url.clone()), token))
            .await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(TargetError::Rejected {
                operation: "user lookup",
                status: status.as_u16(),
                detail: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn create_account(&self, account: &NewAccount) -> Result<(), TargetError> {
        let url = self.signer.endpoint("api.php/v1/users");
        let payload = serde_json::json!({
            "account": account.account.as_str(),
            "realname": account.display_name,
            "role": account.role,
            "dept": account.department,
            "visions": account.visions,
            "gender": "m",
            "password": self.default_password,
        });
        let response = self
            .send_authorized(|token| {
                self.authorized(self.http.post(url.clone()), token)
                    .json(&payload)
            })
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = response.text().await.unwrap_or_default();
        // A concurrent or earlier create makes this one fail; that still counts.
        if self.account_exists(&account.account).await? {
            tracing::debug!(account = %account.account, %status, "user already present");
            return Ok(());
        }
        Err(TargetError::Rejected {
            operation: "user create",
            status: status.as_u16(),
            detail,
        })
    }

    fn impersonation_url(&self, account: &AccountName) -> Url {
        self.signer.url(account)
    }

    fn home_url(&self) -> Url {
        self.signer.base().clone()
    }
}
