use derive_more::{Display, From, Into};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// DingTalk user identifier (`userId`, falling back to `openId`).
///
/// The only piece of a DingTalk identity this gateway keeps, as the key of
/// an account binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct ExternalId(pub String);

impl ExternalId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ExternalId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// ZenTao account name (`zt_user.account`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct AccountName(pub String);

impl AccountName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AccountName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Opaque handshake ticket identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct TicketId(pub String);

impl TicketId {
    /// Generates an unguessable ticket id (128 random bits, hex encoded).
    #[must_use]
    pub fn generate() -> Self {
        let random_bytes: [u8; 16] = rand::rng().random();
        Self(hex::encode(random_bytes))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TicketId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// User access token returned by the DingTalk code exchange.
#[derive(Clone, PartialEq, Eq, From, Into)]
pub struct AccessToken(pub String);

impl AccessToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(..)")
    }
}

/// A verified DingTalk identity, built per login attempt and never persisted.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct ExternalIdentity {
    pub id: ExternalId,
    pub display_name: Option<String>,
    /// Raw department code as reported by DingTalk.
    pub department: Option<String>,
    /// Untouched profile payload.
    pub raw: serde_json::Value,
}

impl ExternalIdentity {
    /// Create an identity with only the required id.
    #[must_use]
    pub fn new(id: impl Into<ExternalId>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            department: None,
            raw: serde_json::Value::Null,
        }
    }

    /// Set the display name; blank names are treated as absent.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        let trimmed = name.trim();
        self.display_name = (!trimmed.is_empty()).then(|| trimmed.to_owned());
        self
    }

    #[must_use]
    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    #[must_use]
    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = raw;
        self
    }
}

/// Fields written when a ZenTao account is provisioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub account: AccountName,
    pub display_name: String,
    pub role: String,
    pub department: u64,
    pub visions: String,
}

/// Handshake record shared between the scanning device and the polling one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    /// Unix seconds.
    pub created_at: i64,
    pub return_to: String,
    #[serde(default)]
    pub fulfillment: Option<Fulfillment>,
}

impl Ticket {
    #[must_use]
    pub fn new(id: TicketId, return_to: impl Into<String>, created_at: i64) -> Self {
        Self {
            id,
            created_at,
            return_to: return_to.into(),
            fulfillment: None,
        }
    }

    #[must_use]
    pub fn is_fulfilled(&self) -> bool {
        self.fulfillment.is_some()
    }

    /// Whether the ticket is past its lifetime at `now` (unix seconds).
    #[must_use]
    pub fn is_expired(&self, now: i64, ttl: time::Duration) -> bool {
        now >= self.created_at.saturating_add(ttl.whole_seconds())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fulfillment {
    pub account: AccountName,
    /// Signed impersonation URL built for `account`.
    pub redirect: String,
    pub fulfilled_at: i64,
}

impl Fulfillment {
    /// Seconds the signature has aged past `window` at `now`, if it has.
    #[must_use]
    pub fn signature_overdue(&self, now: i64, window: time::Duration) -> Option<i64> {
        let age = now.saturating_sub(self.fulfilled_at);
        (age > window.whole_seconds()).then_some(age)
    }
}

/// Current time in unix seconds.
pub(crate) fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}
