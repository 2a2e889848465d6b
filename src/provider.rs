use async_trait::async_trait;
use url::Url;

use crate::error::ProviderError;
use crate::types::{AccessToken, ExternalIdentity};

/// Identity provider the gateway authenticates users against.
///
/// Implementations make one bounded network call per method and never retry.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Exchange an authorization code for a user access token.
    ///
    /// An empty token in an otherwise successful response is an error.
    async fn exchange_code(&self, code: &str) -> Result<AccessToken, ProviderError>;

    /// Fetch the profile of the token's owner.
    async fn fetch_profile(&self, token: &AccessToken) -> Result<ExternalIdentity, ProviderError>;

    /// List every user visible to the token, for directory sync.
    async fn list_directory(
        &self,
        _token: &AccessToken,
    ) -> Result<Vec<ExternalIdentity>, ProviderError> {
        Err(ProviderError::Unsupported("list_directory"))
    }

    /// Authorization page URL the browser is sent to.
    fn authorization_url(&self, redirect_uri: &Url, state: &str) -> Url;
}
