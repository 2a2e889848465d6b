use async_trait::async_trait;
use sqlx::mysql::MySqlPool;
use sqlx::{MySql, QueryBuilder, Row};
use url::Url;

use super::{ApiLoginSigner, TargetSystem};
use crate::error::{ConfigError, TargetError};
use crate::types::{AccountName, NewAccount};

/// ZenTao backend writing straight into its MySQL schema.
///
/// Every insert is `INSERT IGNORE`, so repeating a provisioning step is
/// harmless.
pub struct ZenTaoMysql {
    pool: MySqlPool,
    prefix: String,
    signer: ApiLoginSigner,
}

impl ZenTaoMysql {
    /// Wrap an existing pool.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `table_prefix` contains anything
    /// but ASCII letters, digits or `_` (it is spliced into SQL).
    pub fn new(
        pool: MySqlPool,
        table_prefix: impl Into<String>,
        signer: ApiLoginSigner,
    ) -> Result<Self, ConfigError> {
        let prefix = table_prefix.into();
        if !prefix
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            return Err(ConfigError::invalid(
                "ZENTAO_TABLE_PREFIX",
                format!("{prefix:?} may only contain letters, digits and '_'"),
            ));
        }
        Ok(Self {
            pool,
            prefix,
            signer,
        })
    }

    fn table(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }

    async fn user_id(&self, account: &AccountName) -> Result<Option<i64>, TargetError> {
        let sql = format!(
            "SELECT CAST(id AS SIGNED) AS id FROM {} WHERE account = ? AND deleted = '0' LIMIT 1",
            self.table("user")
        );
        let row = sqlx::query(&sql)
            .bind(account.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.try_get::<i64, _>("id")).transpose()?)
    }
}

#[async_trait]
impl TargetSystem for ZenTaoMysql {
    async fn account_exists(&self, account: &AccountName) -> Result<bool, TargetError> {
        Ok(self.user_id(account).await?.is_some())
    }

    async fn create_account(&self, account: &NewAccount) -> Result<(), TargetError> {
        let sql = format!(
            "INSERT IGNORE INTO {} (dept, account, realname, role, visions, deleted) \
             VALUES (?, ?, ?, ?, ?, '0')",
            self.table("user")
        );
        let result = sqlx::query(&sql)
            .bind(account.department)
            .bind(account.account.as_str())
            .bind(&account.display_name)
            .bind(&account.role)
            .bind(&account.visions)
            .execute(&self.pool)
            .await?;
        tracing::debug!(
            account = %account.account,
            inserted = result.rows_affected(),
            "ZenTao user insert"
        );
        Ok(())
    }

    async fn find_accounts_by_display_name(
        &self,
        display_name: &str,
    ) -> Result<Vec<AccountName>, TargetError> {
        let sql = format!(
            "SELECT account FROM {} WHERE realname = ? AND deleted = '0'",
            self.table("user")
        );
        let rows = sqlx::query(&sql)
            .bind(display_name)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| Ok(AccountName(row.try_get::<String, _>("account")?)))
            .collect()
    }

    async fn add_to_groups(
        &self,
        account: &AccountName,
        groups: &[String],
    ) -> Result<(), TargetError> {
        if groups.is_empty() {
            return Ok(());
        }
        let Some(user_id) = self.user_id(account).await? else {
            return Ok(());
        };

        let mut lookup: QueryBuilder<'_, MySql> = QueryBuilder::new(format!(
            "SELECT CAST(id AS SIGNED) AS id FROM {} WHERE `name` IN (",
            self.table("group")
        ));
        let mut names = lookup.separated(", ");
        for group in groups {
            names.push_bind(group.as_str());
        }
        names.push_unseparated(")");
        let group_ids = lookup
            .build()
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| row.try_get::<i64, _>("id"))
            .collect::<Result<Vec<_>, _>>()?;

        let sql = format!(
            "INSERT IGNORE INTO {} (`user`, `group`) VALUES (?, ?)",
            self.table("usergroup")
        );
        for group_id in group_ids {
            sqlx::query(&sql)
                .bind(user_id)
                .bind(group_id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn add_to_project(
        &self,
        project_id: u64,
        account: &AccountName,
        role: &str,
    ) -> Result<(), TargetError> {
        let sql = format!(
            "INSERT IGNORE INTO {} (`root`, `type`, `account`, `role`, `join`, `days`) \
             VALUES (?, 'project', ?, ?, NOW(), 36500)",
            self.table("team")
        );
        sqlx::query(&sql)
            .bind(project_id)
            .bind(account.as_str())
            .bind(role)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn impersonation_url(&self, account: &AccountName) -> Url {
        self.signer.url(account)
    }

    fn home_url(&self) -> Url {
        self.signer.base().clone()
    }
}
