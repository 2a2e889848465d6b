use url::Url;

use crate::with_trailing_slash;

/// Routing settings of the gateway.
///
/// `public_base` is where browsers reach the gateway; DingTalk redirects to
/// `{public_base}{base_path}/callback`.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub(crate) public_base: Url,
    pub(crate) base_path: String,
    pub(crate) sync_enabled: bool,
}

impl GatewaySettings {
    #[must_use]
    pub fn new(public_base: Url) -> Self {
        Self {
            public_base: with_trailing_slash(public_base),
            base_path: "/dingtalk".into(),
            sync_enabled: false,
        }
    }

    /// Route prefix (default `/dingtalk`).
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        let trimmed = path.trim_matches('/');
        self.base_path = if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        };
        self
    }

    /// Register the directory sync route.
    #[must_use]
    pub fn with_sync_enabled(mut self, enabled: bool) -> Self {
        self.sync_enabled = enabled;
        self
    }

    #[must_use]
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    #[must_use]
    pub fn public_base(&self) -> &Url {
        &self.public_base
    }

    pub(crate) fn route(&self, name: &str) -> String {
        format!("{}/{name}", self.base_path)
    }

    /// OAuth redirect URI; carries `return` unless it is the root.
    #[must_use]
    pub fn callback_url(&self, return_to: &str) -> Url {
        let path = self.route("callback");
        let mut url = self
            .public_base
            .join(path.trim_start_matches('/'))
            .unwrap_or_else(|_| self.public_base.clone());
        if return_to != "/" {
            url.query_pairs_mut().append_pair("return", return_to);
        }
        url
    }
}
