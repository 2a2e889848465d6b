//! Durable state shared by every request handler.
//!
//! Two backends implement both stores:
//!
//! - [`file`]: flat JSON maps, one lock around each read-modify-write.
//!   Correct for a single gateway process only.
//! - [`sqlite`]: one row per key with atomic upserts, safe for several
//!   workers sharing the database file.

pub mod file;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{AccountName, ExternalId, Ticket, TicketId};

/// Default lifetime of a handshake ticket.
pub const DEFAULT_TICKET_TTL: time::Duration = time::Duration::minutes(10);

/// DingTalk user → ZenTao account bindings.
#[async_trait]
pub trait BindingStore: Send + Sync + 'static {
    async fn get(&self, external_id: &ExternalId) -> Result<Option<AccountName>, StoreError>;

    /// Insert or overwrite the binding for `external_id`.
    async fn put(&self, external_id: &ExternalId, account: &AccountName) -> Result<(), StoreError>;
}

/// Short-lived handshake tickets for the scan-to-login flow.
///
/// Tickets move from pending to fulfilled exactly once. Expired tickets read
/// as absent and can no longer be fulfilled.
#[async_trait]
pub trait TicketStore: Send + Sync + 'static {
    /// Create a pending ticket remembering where the user wants to land.
    async fn create(&self, return_to: &str) -> Result<TicketId, StoreError>;

    /// Mark a pending ticket fulfilled.
    ///
    /// Returns `false`, without creating anything, when the ticket is
    /// unknown, expired or already fulfilled.
    async fn fulfill(
        &self,
        id: &TicketId,
        account: &AccountName,
        redirect: &str,
    ) -> Result<bool, StoreError>;

    async fn get(&self, id: &TicketId) -> Result<Option<Ticket>, StoreError>;

    /// Delete expired tickets, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize, StoreError>;
}
