#![doc = include_str!("../README.md")]

pub mod config;
pub mod dingtalk;
pub mod error;
pub mod gateway;
pub mod provider;
pub mod relay;
pub mod resolver;
pub mod store;
pub mod types;
pub mod zentao;

// Re-exports for convenient access
pub use config::{AppConfig, StoreBackend, ZenTaoBackend};
pub use dingtalk::{DingTalkClient, DingTalkConfig};
pub use error::{ConfigError, ProviderError, RelayError, ResolveError, StoreError, TargetError};
pub use gateway::{FlowState, GatewayError, GatewaySettings, GatewayState, gateway_routes};
pub use provider::IdentityProvider;
pub use relay::{ClientContext, RelayOutcome, RelayedSession, SessionRelay};
pub use resolver::{AccountResolver, AccountStrategy, ProjectMembership, ResolverPolicy};
pub use store::{BindingStore, DEFAULT_TICKET_TTL, TicketStore};
pub use types::{
    AccessToken, AccountName, ExternalId, ExternalIdentity, Fulfillment, NewAccount, Ticket,
    TicketId,
};
pub use zentao::{AdminCredentials, ApiLoginSigner, TargetSystem, ZenTaoApi};

use url::Url;

/// `Url::join` drops the last path segment unless the base ends in `/`.
pub(crate) fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
