use serde::Serialize;
use url::Url;

use crate::types::TicketId;

/// Which device completes the DingTalk redirect, decoded from `state`.
///
/// `state` is `"J|"` for the one-click flow and `"Q|<ticket>"` for the
/// scan-to-login flow. Anything not starting with `J` is a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    /// The user's own browser gets the session directly.
    Primary,
    /// A scanner authorizes; a polling device collects the session.
    Secondary { ticket: Option<TicketId> },
}

impl FlowState {
    pub const PRIMARY_FLAG: char = 'J';
    pub const SECONDARY_FLAG: char = 'Q';

    #[must_use]
    pub fn parse(state: &str) -> Self {
        let (flag, tail) = state.split_once('|').unwrap_or((state, ""));
        if flag.starts_with(Self::PRIMARY_FLAG) {
            return Self::Primary;
        }
        let tail = tail.trim();
        Self::Secondary {
            ticket: (!tail.is_empty()).then(|| TicketId::from(tail)),
        }
    }

    /// Value for the OAuth `state` parameter.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Primary => format!("{}|", Self::PRIMARY_FLAG),
            Self::Secondary { ticket } => format!(
                "{}|{}",
                Self::SECONDARY_FLAG,
                ticket.as_ref().map(TicketId::as_str).unwrap_or_default()
            ),
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct NewTicketBody {
    pub(super) ticket: TicketId,
    #[serde(rename = "return")]
    pub(super) return_to: String,
    pub(super) auth_url: String,
}

#[derive(Debug, Serialize)]
pub(super) struct TicketStatusBody {
    pub(super) ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) redirect: Option<String>,
}

/// Where to send the user after login.
///
/// The candidate is resolved against the first of `allowed` and kept only
/// when it lands on one of their origins. Whitespace or control characters
/// anywhere in the candidate send the user to `/`.
pub(super) fn sanitize_return(candidate: Option<&str>, allowed: &[&Url]) -> String {
    let Some(candidate) = candidate.map(str::trim).filter(|s| !s.is_empty()) else {
        return "/".into();
    };
    if candidate.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return "/".into();
    }
    let Some(resolved) = allowed.first().and_then(|base| base.join(candidate).ok()) else {
        return "/".into();
    };
    if !allowed.iter().any(|base| base.origin() == resolved.origin()) {
        return "/".into();
    }
    if candidate.starts_with('/') && !candidate.starts_with("//") && !candidate.contains('\\') {
        candidate.to_owned()
    } else {
        resolved.into()
    }
}
