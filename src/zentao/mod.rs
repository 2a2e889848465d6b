//! ZenTao adapters.
//!
//! [`TargetSystem`] is the contract the resolver and the gateway need from
//! ZenTao. Display-name search and membership management are optional: a
//! backend that can not provide them keeps the default implementation, which
//! reports [`TargetError::Unsupported`].

mod api;
#[cfg(feature = "mysql")]
mod mysql;

use async_trait::async_trait;
use md5::{Digest, Md5};
use url::Url;

use crate::error::TargetError;
use crate::types::{AccountName, NewAccount, unix_now};
use crate::with_trailing_slash;

pub use api::{AdminCredentials, ZenTaoApi};
#[cfg(feature = "mysql")]
pub use mysql::ZenTaoMysql;

#[async_trait]
pub trait TargetSystem: Send + Sync + 'static {
    /// Whether a non-deleted account with this name exists.
    async fn account_exists(&self, account: &AccountName) -> Result<bool, TargetError>;

    /// Create the account. Creating an account that already exists succeeds
    /// without touching the existing record.
    async fn create_account(&self, account: &NewAccount) -> Result<(), TargetError>;

    /// Accounts whose display name (`realname`) equals `display_name` exactly.
    async fn find_accounts_by_display_name(
        &self,
        _display_name: &str,
    ) -> Result<Vec<AccountName>, TargetError> {
        Err(TargetError::Unsupported("find_accounts_by_display_name"))
    }

    /// Ensure membership in each named group; unknown group names are skipped.
    async fn add_to_groups(
        &self,
        _account: &AccountName,
        _groups: &[String],
    ) -> Result<(), TargetError> {
        Err(TargetError::Unsupported("add_to_groups"))
    }

    /// Ensure membership in a project team with the given role.
    async fn add_to_project(
        &self,
        _project_id: u64,
        _account: &AccountName,
        _role: &str,
    ) -> Result<(), TargetError> {
        Err(TargetError::Unsupported("add_to_project"))
    }

    /// Signed URL that logs `account` in when fetched.
    fn impersonation_url(&self, account: &AccountName) -> Url;

    /// ZenTao home page, fetched before impersonating to open a session.
    fn home_url(&self) -> Url;
}

/// Signs ZenTao `apilogin` URLs.
///
/// The token is `md5(code + key + time)`; ZenTao only honours it close to
/// the signing time.
#[derive(Clone)]
pub struct ApiLoginSigner {
    base: Url,
    app_code: String,
    app_key: String,
}

impl std::fmt::Debug for ApiLoginSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiLoginSigner")
            .field("base", &self.base.as_str())
            .field("app_code", &self.app_code)
            .finish_non_exhaustive()
    }
}

impl ApiLoginSigner {
    /// How long after signing ZenTao is expected to accept a URL.
    pub const SIGNATURE_WINDOW: time::Duration = time::Duration::seconds(60);

    #[must_use]
    pub fn new(base: Url, app_code: impl Into<String>, app_key: impl Into<String>) -> Self {
        Self {
            base: with_trailing_slash(base),
            app_code: app_code.into(),
            app_key: app_key.into(),
        }
    }

    /// ZenTao base URL, always ending in `/`.
    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// URL under the ZenTao base, e.g. `api.php/v1/users`.
    pub(crate) fn endpoint(&self, path: &str) -> Url {
        self.base.join(path).unwrap_or_else(|_| self.base.clone())
    }

    #[must_use]
    pub fn token_at(&self, timestamp: i64) -> String {
        let digest = Md5::digest(format!("{}{}{timestamp}", self.app_code, self.app_key));
        hex::encode(digest)
    }

    /// Impersonation URL signed for `timestamp` (unix seconds).
    #[must_use]
    pub fn url_at(&self, account: &AccountName, timestamp: i64) -> Url {
        let mut url = self.endpoint("api.php");
        let timestamp_str = timestamp.to_string();
        url.query_pairs_mut()
            .append_pair("m", "user")
            .append_pair("f", "apilogin")
            .append_pair("account", account.as_str())
            .append_pair("code", &self.app_code)
            .append_pair("time", &timestamp_str)
            .append_pair("token", &self.token_at(timestamp))
            // Land on the dashboard, not on whatever restricted page bounced the user here.
            .append_pair("referer", "/");
        url
    }

    #[must_use]
    pub fn url(&self, account: &AccountName) -> Url {
        self.url_at(account, unix_now())
    }
}
