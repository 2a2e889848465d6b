use crate::types::ExternalId;

/// DingTalk code exchange or profile fetch failed.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{operation} failed with status {status}: {detail}")]
    Status {
        operation: &'static str,
        status: u16,
        detail: String,
    },

    #[error("token exchange returned no access token")]
    MissingAccessToken,

    #[error("profile carries no user id")]
    MissingIdentity,

    #[error("{0} is not supported by this identity provider")]
    Unsupported(&'static str),
}

/// A ZenTao adapter call failed.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TargetError {
    #[cfg(any(feature = "mysql", feature = "sqlite"))]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{operation} rejected with status {status}: {detail}")]
    Rejected {
        operation: &'static str,
        status: u16,
        detail: String,
    },

    #[error("{0} is not supported by this ZenTao backend")]
    Unsupported(&'static str),
}

/// Binding or ticket persistence failed.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store file {path} is corrupt: {source}")]
    Corrupt {
        path: String,
        source: serde_json::Error,
    },

    #[error("store encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("store database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Account resolution or provisioning failed.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ResolveError {
    /// The identity maps to no existing account and auto-creation is off.
    #[error("DingTalk user {external_id} is not mapped and auto-create is disabled")]
    Permission { external_id: ExternalId },

    #[error("provisioning failed: {0}")]
    Provisioning(#[from] TargetError),

    #[error("binding store failed: {0}")]
    Store(#[from] StoreError),
}

/// Impersonation or cookie transfer failed; the relay degrades instead of failing.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RelayError {
    #[error("relay HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("relay produced an unusable header: {0}")]
    Header(String),
}

/// Missing or invalid configuration.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{name}: {detail}")]
    Invalid { name: &'static str, detail: String },

    #[error("mapping file {path}: {detail}")]
    Mapping { path: String, detail: String },
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, detail: impl std::fmt::Display) -> Self {
        Self::Invalid {
            name,
            detail: detail.to_string(),
        }
    }
}
