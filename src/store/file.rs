use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use super::{BindingStore, DEFAULT_TICKET_TTL, TicketStore};
use crate::error::StoreError;
use crate::types::{AccountName, ExternalId, Fulfillment, Ticket, TicketId, unix_now};

/// A JSON object on disk, rewritten whole under a lock.
///
/// Writes land in a sibling temp file first and are renamed over the
/// target, so readers never see a half-written map.
struct JsonMapFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonMapFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    async fn load<V: DeserializeOwned>(&self) -> Result<BTreeMap<String, V>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(BTreeMap::new());
        }
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            path: self.path.display().to_string(),
            source,
        })
    }

    async fn save<V: Serialize>(&self, map: &BTreeMap<String, V>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(map)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Bindings kept in a flat `{"external_id": "account"}` JSON file.
pub struct FileBindingStore {
    file: JsonMapFile,
}

impl FileBindingStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonMapFile::new(path.into()),
        }
    }

    /// `bindings.json` inside `dir`.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("bindings.json"))
    }
}

#[async_trait]
impl BindingStore for FileBindingStore {
    async fn get(&self, external_id: &ExternalId) -> Result<Option<AccountName>, StoreError> {
        let _guard = self.file.lock.lock().await;
        let mut map: BTreeMap<String, AccountName> = self.file.load().await?;
        Ok(map.remove(external_id.as_str()))
    }

    async fn put(&self, external_id: &ExternalId, account: &AccountName) -> Result<(), StoreError> {
        let _guard = self.file.lock.lock().await;
        let mut map: BTreeMap<String, AccountName> = self.file.load().await?;
        map.insert(external_id.to_string(), account.clone());
        self.file.save(&map).await
    }
}

/// Tickets kept in a flat `{"ticket_id": {...}}` JSON file.
pub struct FileTicketStore {
    file: JsonMapFile,
    ttl: time::Duration,
}

impl FileTicketStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonMapFile::new(path.into()),
            ttl: DEFAULT_TICKET_TTL,
        }
    }

    /// `tickets.json` inside `dir`.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("tickets.json"))
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: time::Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[async_trait]
impl TicketStore for FileTicketStore {
    async fn create(&self, return_to: &str) -> Result<TicketId, StoreError> {
        let id = TicketId::generate();
        let _guard = self.file.lock.lock().await;
        let mut map: BTreeMap<String, Ticket> = self.file.load().await?;
        map.insert(
            id.to_string(),
            Ticket::new(id.clone(), return_to, unix_now()),
        );
        self.file.save(&map).await?;
        Ok(id)
    }

    async fn fulfill(
        &self,
        id: &TicketId,
        account: &AccountName,
        redirect: &str,
    ) -> Result<bool, StoreError> {
        let now = unix_now();
        let _guard = self.file.lock.lock().await;
        let mut map: BTreeMap<String, Ticket> = self.file.load().await?;
        let Some(ticket) = map.get_mut(id.as_str()) else {
            return Ok(false);
        };
        if ticket.is_fulfilled() || ticket.is_expired(now, self.ttl) {
            return Ok(false);
        }
        ticket.fulfillment = Some(Fulfillment {
            account: account.clone(),
            redirect: redirect.to_owned(),
            fulfilled_at: now,
        });
        self.file.save(&map).await?;
        Ok(true)
    }

    async fn get(&self, id: &TicketId) -> Result<Option<Ticket>, StoreError> {
        let now = unix_now();
        let _guard = self.file.lock.lock().await;
        let mut map: BTreeMap<String, Ticket> = self.file.load().await?;
        Ok(map
            .remove(id.as_str())
            .filter(|ticket| !ticket.is_expired(now, self.ttl)))
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = unix_now();
        let _guard = self.file.lock.lock().await;
        let mut map: BTreeMap<String, Ticket> = self.file.load().await?;
        let before = map.len();
        map.retain(|_, ticket| !ticket.is_expired(now, self.ttl));
        let removed = before - map.len();
        if removed > 0 {
            self.file.save(&map).await?;
        }
        Ok(removed)
    }
}
