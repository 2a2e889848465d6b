//! Turns a DingTalk identity into a ZenTao account that exists.
//!
//! Lookup order, first hit wins:
//!
//! 1. static `accounts` mapping from configuration;
//! 2. the [`BindingStore`];
//! 3. a unique ZenTao account whose display name equals the DingTalk name
//!    (only with [`ResolverPolicy::with_bind_by_display_name`]);
//! 4. a name derived by [`AccountStrategy`].
//!
//! The chosen account is created when missing (unless auto-creation is off
//! and the identity has no binding), then group and project memberships are
//! granted on a best-effort basis.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{ResolveError, TargetError};
use crate::provider::IdentityProvider;
use crate::store::BindingStore;
use crate::types::{AccessToken, AccountName, ExternalIdentity, NewAccount};
use crate::zentao::TargetSystem;

/// How a fresh account name is derived when nothing else matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStrategy {
    /// Use the DingTalk user id verbatim.
    #[default]
    ExternalId,
    /// Normalize the display name, falling back to the user id.
    DisplayName,
}

impl std::str::FromStr for AccountStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "external_id" | "ding_userid" => Ok(Self::ExternalId),
            "display_name" | "realname" => Ok(Self::DisplayName),
            other => Err(format!("unknown account strategy {other:?}")),
        }
    }
}

/// Project team every provisioned account joins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMembership {
    pub project_id: u64,
    pub role: String,
}

/// Resolution and provisioning policy.
#[derive(Debug, Clone)]
pub struct ResolverPolicy {
    pub(crate) static_accounts: HashMap<String, String>,
    pub(crate) bind_by_display_name: bool,
    pub(crate) strategy: AccountStrategy,
    pub(crate) allow_auto_create: bool,
    pub(crate) default_role: String,
    pub(crate) visions: String,
    pub(crate) department_map: HashMap<String, u64>,
    pub(crate) default_department: u64,
    pub(crate) default_groups: Vec<String>,
    pub(crate) project: Option<ProjectMembership>,
    pub(crate) max_account_len: usize,
    pub(crate) min_account_len: usize,
}

impl Default for ResolverPolicy {
    fn default() -> Self {
        Self {
            static_accounts: HashMap::new(),
            bind_by_display_name: false,
            strategy: AccountStrategy::ExternalId,
            allow_auto_create: true,
            default_role: "pm".into(),
            visions: "rnd".into(),
            department_map: HashMap::new(),
            default_department: 0,
            default_groups: vec!["pm".into()],
            project: None,
            max_account_len: 30,
            min_account_len: 3,
        }
    }
}

impl ResolverPolicy {
    #[must_use]
    pub fn with_static_accounts(mut self, accounts: HashMap<String, String>) -> Self {
        self.static_accounts = accounts;
        self
    }

    /// Adopt a unique same-named ZenTao account on first login.
    #[must_use]
    pub fn with_bind_by_display_name(mut self, enabled: bool) -> Self {
        self.bind_by_display_name = enabled;
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: AccountStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Allow creating accounts for identities that have no binding yet.
    #[must_use]
    pub fn with_allow_auto_create(mut self, allowed: bool) -> Self {
        self.allow_auto_create = allowed;
        self
    }

    #[must_use]
    pub fn with_department_map(mut self, map: HashMap<String, u64>) -> Self {
        self.department_map = map;
        self
    }

    #[must_use]
    pub fn with_default_department(mut self, department: u64) -> Self {
        self.default_department = department;
        self
    }

    #[must_use]
    pub fn with_default_groups(mut self, groups: Vec<String>) -> Self {
        self.default_groups = groups;
        self
    }

    #[must_use]
    pub fn with_project(mut self, project: Option<ProjectMembership>) -> Self {
        self.project = project;
        self
    }

    #[must_use]
    pub fn with_account_len(mut self, min: usize, max: usize) -> Self {
        self.min_account_len = min;
        self.max_account_len = max;
        self
    }
}

/// Which rule picked the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Static,
    Binding,
    DisplayName,
    Derived,
}

impl Source {
    fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Binding => "binding",
            Self::DisplayName => "display_name",
            Self::Derived => "derived",
        }
    }
}

pub struct AccountResolver {
    policy: ResolverPolicy,
    target: Arc<dyn TargetSystem>,
    bindings: Arc<dyn BindingStore>,
}

impl AccountResolver {
    #[must_use]
    pub fn new(
        policy: ResolverPolicy,
        target: Arc<dyn TargetSystem>,
        bindings: Arc<dyn BindingStore>,
    ) -> Self {
        Self {
            policy,
            target,
            bindings,
        }
    }

    /// Resolve `identity` to an account that exists in ZenTao.
    ///
    /// # Errors
    ///
    /// - [`ResolveError::Permission`] when the account is missing, auto-create
    ///   is disabled and the identity has no binding.
    /// - [`ResolveError::Provisioning`] when ZenTao can not be queried or the
    ///   account can not be created.
    /// - [`ResolveError::Store`] when the binding store fails.
    pub async fn resolve(&self, identity: &ExternalIdentity) -> Result<AccountName, ResolveError> {
        let (account, source) = self.select(identity).await?;
        tracing::info!(
            account = %account,
            external_id = %identity.id,
            display_name = ?identity.display_name,
            source = source.as_str(),
            "resolved DingTalk identity"
        );

        if !self.target.account_exists(&account).await? {
            if !self.policy.allow_auto_create && !self.has_binding(identity, source).await? {
                tracing::warn!(
                    account = %account,
                    external_id = %identity.id,
                    "refusing to create unmapped account"
                );
                return Err(ResolveError::Permission {
                    external_id: identity.id.clone(),
                });
            }

            self.target
                .create_account(&self.new_account(identity, &account))
                .await?;
            tracing::info!(account = %account, external_id = %identity.id, "created ZenTao account");
            self.bindings.put(&identity.id, &account).await?;
        }

        self.grant_memberships(&account).await;
        Ok(account)
    }

    /// Resolve every user of the DingTalk directory, returning how many succeeded.
    ///
    /// Individual failures are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns the provider error when the directory can not be listed.
    pub async fn sync_directory(
        &self,
        provider: &dyn IdentityProvider,
        token: &AccessToken,
    ) -> Result<usize, crate::error::ProviderError> {
        let users = provider.list_directory(token).await?;
        let total = users.len();
        let mut synced = 0;
        for identity in &users {
            match self.resolve(identity).await {
                Ok(_) => synced += 1,
                Err(e) => {
                    tracing::warn!(external_id = %identity.id, error = %e, "directory sync skipped user");
                }
            }
        }
        tracing::info!(synced, total, "directory sync finished");
        Ok(synced)
    }

    async fn select(
        &self,
        identity: &ExternalIdentity,
    ) -> Result<(AccountName, Source), ResolveError> {
        if let Some(account) = self.policy.static_accounts.get(identity.id.as_str()) {
            return Ok((AccountName(account.clone()), Source::Static));
        }

        if let Some(account) = self.bindings.get(&identity.id).await? {
            return Ok((account, Source::Binding));
        }

        if self.policy.bind_by_display_name {
            if let Some(account) = self.match_display_name(identity).await? {
                self.bindings.put(&identity.id, &account).await?;
                return Ok((account, Source::DisplayName));
            }
        }

        Ok((self.derive_name(identity), Source::Derived))
    }

    async fn has_binding(
        &self,
        identity: &ExternalIdentity,
        source: Source,
    ) -> Result<bool, ResolveError> {
        Ok(match source {
            Source::Binding | Source::DisplayName => true,
            Source::Derived => false,
            Source::Static => self.bindings.get(&identity.id).await?.is_some(),
        })
    }

    /// The unique ZenTao account carrying the identity's display name, if any.
    async fn match_display_name(
        &self,
        identity: &ExternalIdentity,
    ) -> Result<Option<AccountName>, ResolveError> {
        let Some(name) = identity.display_name.as_deref() else {
            return Ok(None);
        };
        let mut matches = match self.target.find_accounts_by_display_name(name).await {
            Ok(matches) => matches,
            Err(TargetError::Unsupported(op)) => {
                tracing::debug!(op, "display-name matching unavailable");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if matches.len() != 1 {
            tracing::debug!(display_name = name, matches = matches.len(), "no unique display-name match");
            return Ok(None);
        }
        Ok(matches.pop())
    }

    fn derive_name(&self, identity: &ExternalIdentity) -> AccountName {
        let fallback = || AccountName(identity.id.to_string());
        match self.policy.strategy {
            AccountStrategy::ExternalId => fallback(),
            AccountStrategy::DisplayName => identity
                .display_name
                .as_deref()
                .and_then(|name| {
                    normalize_account_name(
                        name,
                        self.policy.max_account_len,
                        self.policy.min_account_len,
                    )
                })
                .map(AccountName)
                .unwrap_or_else(fallback),
        }
    }

    fn new_account(&self, identity: &ExternalIdentity, account: &AccountName) -> NewAccount {
        let department = identity
            .department
            .as_deref()
            .and_then(|raw| self.policy.department_map.get(raw).copied())
            .unwrap_or(self.policy.default_department);

        NewAccount {
            account: account.clone(),
            display_name: identity
                .display_name
                .clone()
                .unwrap_or_else(|| account.to_string()),
            role: self.policy.default_role.clone(),
            department,
            visions: self.policy.visions.clone(),
        }
    }

    /// Grant default groups and project membership. Never fails the login.
    async fn grant_memberships(&self, account: &AccountName) {
        if !self.policy.default_groups.is_empty() {
            log_membership(
                account,
                "groups",
                self.target
                    .add_to_groups(account, &self.policy.default_groups)
                    .await,
            );
        }
        if let Some(project) = &self.policy.project {
            log_membership(
                account,
                "project",
                self.target
                    .add_to_project(project.project_id, account, &project.role)
                    .await,
            );
        }
    }
}

fn log_membership(account: &AccountName, what: &'static str, result: Result<(), TargetError>) {
    match result {
        Ok(()) => {}
        Err(TargetError::Unsupported(op)) => {
            tracing::debug!(account = %account, op, "membership step unsupported");
        }
        Err(e) => {
            tracing::warn!(account = %account, what, error = %e, "post-provision step failed");
        }
    }
}

/// Derive an account name from a display name.
///
/// Keeps ASCII letters, digits and `_`, lowercases, and truncates to
/// `max_len`. Returns `None` when fewer than `min_len` characters survive.
#[must_use]
pub fn normalize_account_name(display_name: &str, max_len: usize, min_len: usize) -> Option<String> {
    let normalized: String = display_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .map(|c| c.to_ascii_lowercase())
        .take(max_len)
        .collect();
    (normalized.len() >= min_len).then_some(normalized)
}
