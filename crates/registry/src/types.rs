use std::{collections::BTreeSet, fmt, str::FromStr};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use crate::{Error, Result};

/// Placeholder written by the verification flow before a session id is known.
pub const PENDING_SESSION_ID: &str = "pending";

/// Which correlation strategy resolved a record's session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSource {
    RecentIp,
    IpPending,
    DisplayName,
    SoleCandidate,
}

impl SessionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecentIp => "recent_ip",
            Self::IpPending => "ip_pending",
            Self::DisplayName => "display_name",
            Self::SoleCandidate => "sole_candidate",
        }
    }
}

impl fmt::Display for SessionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "recent_ip" => Ok(Self::RecentIp),
            "ip_pending" => Ok(Self::IpPending),
            "display_name" => Ok(Self::DisplayName),
            "sole_candidate" => Ok(Self::SoleCandidate),
            other => Err(format!("unknown session source: {other}")),
        }
    }
}

/// Identity and verification state of one player, keyed by `account_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    /// Stable external account id (Steam id).
    pub account_id: String,
    /// Every account id ever linked to this player, including `account_id`.
    pub known_account_ids: BTreeSet<String>,
    pub chat_account_id: Option<String>,
    pub chat_tag: Option<String>,
    pub web_identity_verified: bool,
    pub device_verified: bool,
    /// `None` or [`PENDING_SESSION_ID`] until the correlator resolves it.
    pub session_id: Option<String>,
    pub display_name: Option<String>,
    pub awaiting_session_id: bool,
    pub last_ip: Option<String>,
    pub last_device_check: Option<DateTime<Utc>>,
    pub session_id_source: Option<SessionSource>,
    pub last_seen_in_session: Option<DateTime<Utc>>,
    pub reward_issued: bool,
}

impl PlayerRecord {
    /// A fresh, unverified record.
    pub fn new(account_id: impl Into<String>) -> Self {
        let account_id = account_id.into();
        Self {
            known_account_ids: BTreeSet::from([account_id.clone()]),
            account_id,
            chat_account_id: None,
            chat_tag: None,
            web_identity_verified: false,
            device_verified: false,
            session_id: None,
            display_name: None,
            awaiting_session_id: false,
            last_ip: None,
            last_device_check: None,
            session_id_source: None,
            last_seen_in_session: None,
            reward_issued: false,
        }
    }

    /// Both web-identity and device verification are done.
    pub fn is_fully_verified(&self) -> bool {
        self.web_identity_verified && self.device_verified
    }

    /// The session id, unless absent or still the pending placeholder.
    pub fn resolved_session_id(&self) -> Option<&str> {
        self.session_id
            .as_deref()
            .filter(|sid| !sid.is_empty() && *sid != PENDING_SESSION_ID)
    }

    pub fn session_pending(&self) -> bool {
        self.resolved_session_id().is_none()
    }

    /// Check the cross-field rules every stored record must satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.account_id.trim().is_empty() {
            return Err(Error::invariant(&self.account_id, "account id is empty"));
        }
        if self.awaiting_session_id && !self.is_fully_verified() {
            return Err(Error::invariant(
                &self.account_id,
                "awaiting a session id without being fully verified",
            ));
        }
        if self.reward_issued && (self.session_pending() || !self.is_fully_verified()) {
            return Err(Error::invariant(
                &self.account_id,
                "reward issued without a resolved session and full verification",
            ));
        }
        Ok(())
    }
}

/// Field update applied when a session id is matched to a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMapping {
    pub session_id: String,
    pub display_name: String,
    pub source: SessionSource,
    pub at: DateTime<Utc>,
}

/// A session id nobody could be matched to, kept for operator follow-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmappedSession {
    pub session_id: String,
    pub display_name: String,
    pub last_ip: Option<String>,
    pub last_seen: DateTime<Utc>,
}
