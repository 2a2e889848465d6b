use std::sync::Arc;

use super::config::GatewaySettings;
use crate::provider::IdentityProvider;
use crate::relay::SessionRelay;
use crate::resolver::AccountResolver;
use crate::store::TicketStore;
use crate::zentao::TargetSystem;

/// Shared state for gateway route handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub(super) provider: Arc<dyn IdentityProvider>,
    pub(super) resolver: Arc<AccountResolver>,
    pub(super) target: Arc<dyn TargetSystem>,
    pub(super) tickets: Arc<dyn TicketStore>,
    pub(super) relay: SessionRelay,
    pub(super) settings: GatewaySettings,
}

impl GatewayState {
    #[must_use]
    pub fn new(
        settings: GatewaySettings,
        provider: Arc<dyn IdentityProvider>,
        resolver: Arc<AccountResolver>,
        target: Arc<dyn TargetSystem>,
        tickets: Arc<dyn TicketStore>,
    ) -> Self {
        Self {
            provider,
            resolver,
            target,
            tickets,
            relay: SessionRelay::default(),
            settings,
        }
    }

    #[must_use]
    pub fn with_relay(mut self, relay: SessionRelay) -> Self {
        self.relay = relay;
        self
    }
}
