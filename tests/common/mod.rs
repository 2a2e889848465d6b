#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use url::Url;
use zentao_sso::error::{ProviderError, TargetError};
use zentao_sso::{
    AccessToken, AccountName, ApiLoginSigner, ExternalIdentity, IdentityProvider, NewAccount,
    TargetSystem,
};

/// In-memory ZenTao with call counters.
pub struct FakeZenTao {
    signer: ApiLoginSigner,
    accounts: Mutex<HashMap<String, NewAccount>>,
    pub creates: AtomicUsize,
    pub group_grants: AtomicUsize,
    pub project_grants: AtomicUsize,
    pub searches: AtomicUsize,
    searchable: bool,
    fail_memberships: bool,
}

impl FakeZenTao {
    pub fn new(base: &str) -> Self {
        Self {
            signer: ApiLoginSigner::new(base.parse().unwrap(), "DingTalk_Login", "secret"),
            accounts: Mutex::new(HashMap::new()),
            creates: AtomicUsize::new(0),
            group_grants: AtomicUsize::new(0),
            project_grants: AtomicUsize::new(0),
            searches: AtomicUsize::new(0),
            searchable: true,
            fail_memberships: false,
        }
    }

    /// Like a backend that only knows existence and creation.
    pub fn without_search(mut self) -> Self {
        self.searchable = false;
        self
    }

    pub fn with_failing_memberships(mut self) -> Self {
        self.fail_memberships = true;
        self
    }

    pub fn with_account(self, account: &str, realname: &str) -> Self {
        self.accounts.lock().unwrap().insert(
            account.to_string(),
            NewAccount {
                account: AccountName::from(account),
                display_name: realname.to_string(),
                role: "dev".into(),
                department: 0,
                visions: "rnd".into(),
            },
        );
        self
    }

    pub fn account(&self, account: &str) -> Option<NewAccount> {
        self.accounts.lock().unwrap().get(account).cloned()
    }

    pub fn account_count(&self) -> usize {
        self.accounts.lock().unwrap().len()
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TargetSystem for FakeZenTao {
    async fn account_exists(&self, account: &AccountName) -> Result<bool, TargetError> {
        Ok(self.accounts.lock().unwrap().contains_key(account.as_str()))
    }

    async fn create_account(&self, account: &NewAccount) -> Result<(), TargetError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.accounts
            .lock()
            .unwrap()
            .entry(account.account.to_string())
            .or_insert_with(|| account.clone());
        Ok(())
    }

    async fn find_accounts_by_display_name(
        &self,
        display_name: &str,
    ) -> Result<Vec<AccountName>, TargetError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if !self.searchable {
            return Err(TargetError::Unsupported("find_accounts_by_display_name"));
        }
        let mut found: Vec<AccountName> = self
            .accounts
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.display_name == display_name)
            .map(|a| a.account.clone())
            .collect();
        found.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(found)
    }

    async fn add_to_groups(
        &self,
        _account: &AccountName,
        _groups: &[String],
    ) -> Result<(), TargetError> {
        self.group_grants.fetch_add(1, Ordering::SeqCst);
        if self.fail_memberships {
            return Err(TargetError::Rejected {
                operation: "add_to_groups",
                status: 500,
                detail: "group table locked".into(),
            });
        }
        Ok(())
    }

    async fn add_to_project(
        &self,
        _project_id: u64,
        _account: &AccountName,
        _role: &str,
    ) -> Result<(), TargetError> {
        self.project_grants.fetch_add(1, Ordering::SeqCst);
        if self.fail_memberships {
            return Err(TargetError::Rejected {
                operation: "add_to_project",
                status: 500,
                detail: "team table locked".into(),
            });
        }
        Ok(())
    }

    fn impersonation_url(&self, account: &AccountName) -> Url {
        self.signer.url_at(account, 1_700_000_000)
    }

    fn home_url(&self) -> Url {
        self.signer.base().clone()
    }
}

/// Identity provider answering from a fixed code → identity table.
#[derive(Default)]
pub struct FakeProvider {
    identities: HashMap<String, ExternalIdentity>,
    directory: Vec<ExternalIdentity>,
}

impl FakeProvider {
    pub fn with_identity(mut self, code: &str, identity: ExternalIdentity) -> Self {
        self.identities.insert(code.to_string(), identity);
        self
    }

    pub fn with_directory(mut self, users: Vec<ExternalIdentity>) -> Self {
        self.directory = users;
        self
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    async fn exchange_code(&self, code: &str) -> Result<AccessToken, ProviderError> {
        if self.identities.contains_key(code) || code == "directory" {
            Ok(AccessToken(format!("token-{code}")))
        } else {
            Err(ProviderError::Status {
                operation: "token exchange",
                status: 400,
                detail: "invalid code".into(),
            })
        }
    }

    async fn fetch_profile(&self, token: &AccessToken) -> Result<ExternalIdentity, ProviderError> {
        let code = token.as_str().trim_start_matches("token-");
        self.identities
            .get(code)
            .cloned()
            .ok_or(ProviderError::MissingIdentity)
    }

    async fn list_directory(
        &self,
        _token: &AccessToken,
    ) -> Result<Vec<ExternalIdentity>, ProviderError> {
        Ok(self.directory.clone())
    }

    fn authorization_url(&self, redirect_uri: &Url, state: &str) -> Url {
        let mut url: Url = "https://login.example.test/oauth2/auth".parse().unwrap();
        url.query_pairs_mut()
            .append_pair("redirect_uri", redirect_uri.as_str())
            .append_pair("state", state);
        url
    }
}
