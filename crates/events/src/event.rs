use std::{fmt, net::IpAddr};

use {
    chrono::NaiveTime,
    serde::{Deserialize, Serialize},
};

/// Length of a game-assigned session id in hex characters.
pub const SESSION_ID_LEN: usize = 32;

/// Hardware-bound session id assigned by the game server, lower-cased hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Accepts exactly [`SESSION_ID_LEN`] hex digits, any case.
    pub fn parse(raw: &str) -> Option<Self> {
        (raw.len() == SESSION_ID_LEN && raw.bytes().all(|b| b.is_ascii_hexdigit()))
            .then(|| Self(raw.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningLevel {
    Warning,
    Error,
}

/// One recognised log line. `at` is the time of day written in the line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEvent {
    Connected {
        at: NaiveTime,
        connection_id: u32,
        display_name: String,
        ip: IpAddr,
    },
    SessionIdAssigned {
        at: NaiveTime,
        connection_id: u32,
        display_name: String,
        session_id: SessionId,
        /// Present when the server writes the address on the same line.
        ip: Option<IpAddr>,
    },
    Disconnected {
        at: NaiveTime,
        connection_id: u32,
        display_name: String,
        reason: Option<String>,
    },
    AdminLogin {
        at: NaiveTime,
        display_name: String,
        ip: IpAddr,
    },
    ChatMessage {
        at: NaiveTime,
        channel: String,
        display_name: String,
        text: String,
    },
    Warning {
        at: NaiveTime,
        level: WarningLevel,
        message: String,
    },
}

impl LogEvent {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::SessionIdAssigned { .. } => "session_id_assigned",
            Self::Disconnected { .. } => "disconnected",
            Self::AdminLogin { .. } => "admin_login",
            Self::ChatMessage { .. } => "chat_message",
            Self::Warning { .. } => "warning",
        }
    }

    pub fn at(&self) -> NaiveTime {
        match self {
            Self::Connected { at, .. }
            | Self::SessionIdAssigned { at, .. }
            | Self::Disconnected { at, .. }
            | Self::AdminLogin { at, .. }
            | Self::ChatMessage { at, .. }
            | Self::Warning { at, .. } => *at,
        }
    }
}
