use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use super::{BindingStore, DEFAULT_TICKET_TTL, TicketStore};
use crate::error::StoreError;
use crate::types::{AccountName, ExternalId, Fulfillment, Ticket, TicketId, unix_now};

/// Bindings and tickets in SQLite, one row per key.
///
/// Every write is a single statement, so concurrent workers never lose each
/// other's updates.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    ttl: time::Duration,
}

impl SqliteStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            ttl: DEFAULT_TICKET_TTL,
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: time::Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Create the tables if they do not exist yet.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sso_bindings (
                external_id TEXT PRIMARY KEY,
                account TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sso_tickets (
                id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL,
                return_to TEXT NOT NULL,
                account TEXT,
                redirect TEXT,
                fulfilled_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sso_tickets_created ON sso_tickets (created_at)")
            .execute(&self.pool)
            .await?;

        tracing::info!("SQLite SSO store schema initialized");
        Ok(())
    }

    /// Oldest `created_at` still alive at `now`.
    fn alive_since(&self, now: i64) -> i64 {
        now.saturating_sub(self.ttl.whole_seconds())
    }
}

#[async_trait]
impl BindingStore for SqliteStore {
    async fn get(&self, external_id: &ExternalId) -> Result<Option<AccountName>, StoreError> {
        let row = sqlx::query("SELECT account FROM sso_bindings WHERE external_id = ?")
            .bind(external_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .map(|r| r.try_get::<String, _>("account"))
            .transpose()?
            .map(AccountName))
    }

    async fn put(&self, external_id: &ExternalId, account: &AccountName) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sso_bindings (external_id, account, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (external_id) DO UPDATE
            SET account = excluded.account, updated_at = excluded.updated_at
            "#,
        )
        .bind(external_id.as_str())
        .bind(account.as_str())
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TicketStore for SqliteStore {
    async fn create(&self, return_to: &str) -> Result<TicketId, StoreError> {
        let id = TicketId::generate();
        sqlx::query("INSERT INTO sso_tickets (id, created_at, return_to) VALUES (?, ?, ?)")
            .bind(id.as_str())
            .bind(unix_now())
            .bind(return_to)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    async fn fulfill(
        &self,
        id: &TicketId,
        account: &AccountName,
        redirect: &str,
    ) -> Result<bool, StoreError> {
        let now = unix_now();
        let result = sqlx::query(
            r#"
            UPDATE sso_tickets
            SET account = ?, redirect = ?, fulfilled_at = ?
            WHERE id = ? AND fulfilled_at IS NULL AND created_at > ?
            "#,
        )
        .bind(account.as_str())
        .bind(redirect)
        .bind(now)
        .bind(id.as_str())
        .bind(self.alive_since(now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, id: &TicketId) -> Result<Option<Ticket>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, created_at, return_to, account, redirect, fulfilled_at
            FROM sso_tickets
            WHERE id = ? AND created_at > ?
            "#,
        )
        .bind(id.as_str())
        .bind(self.alive_since(unix_now()))
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let account: Option<String> = row.try_get("account")?;
        let redirect: Option<String> = row.try_get("redirect")?;
        let fulfilled_at: Option<i64> = row.try_get("fulfilled_at")?;
        let fulfillment = match (account, redirect, fulfilled_at) {
            (Some(account), Some(redirect), Some(fulfilled_at)) => Some(Fulfillment {
                account: AccountName(account),
                redirect,
                fulfilled_at,
            }),
            _ => None,
        };

        Ok(Some(Ticket {
            id: TicketId(row.try_get("id")?),
            created_at: row.try_get("created_at")?,
            return_to: row.try_get("return_to")?,
            fulfillment,
        }))
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM sso_tickets WHERE created_at <= ?")
            .bind(self.alive_since(unix_now()))
            .execute(&self.pool)
            .await?;
        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }
}
