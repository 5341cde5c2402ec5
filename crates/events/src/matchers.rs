//! Named line matchers, tried in order by [`extract`].
//!
//! Every matcher is a plain function from a trimmed line to an optional
//! event. A line that has the right shape but carries an unusable capture
//! (impossible time, id overflow, bad session id, bad address) does not match.

use std::{net::IpAddr, sync::LazyLock};

use {chrono::NaiveTime, regex::Regex};

use crate::event::{LogEvent, SessionId, WarningLevel};

pub type Matcher = fn(&str) -> Option<LogEvent>;

/// Matchers in evaluation order.
pub const MATCHERS: &[(&str, Matcher)] = &[
    ("connect", connect),
    ("session_id", session_id),
    ("disconnect", disconnect),
    ("admin_login", admin_login),
    ("chat", chat),
    ("warning", warning),
];

/// Classify a line. First matching grammar wins; noise yields `None`.
pub fn extract(line: &str) -> Option<LogEvent> {
    extract_named(line).map(|(_, event)| event)
}

/// Like [`extract`], also returning the name of the matcher that fired.
pub fn extract_named(line: &str) -> Option<(&'static str, LogEvent)> {
    MATCHERS
        .iter()
        .find_map(|(name, matcher)| matcher(line).map(|event| (*name, event)))
}

static CONNECT: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"^(?P<ts>\d{2}:\d{2}:\d{2}) : Player #(?P<conn>\d+) (?P<name>.+?) connected from (?P<ip>\d{1,3}(?:\.\d{1,3}){3})(?::\d+)?$",
    )
});

static SESSION_ID: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"^(?P<ts>\d{2}:\d{2}:\d{2}) : Player #(?P<conn>\d+) (?P<name>.+?)(?: \((?P<ip>\d{1,3}(?:\.\d{1,3}){3})\))? - SID: (?P<sid>[0-9A-Za-z]+)$",
    )
});

static DISCONNECT: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"^(?P<ts>\d{2}:\d{2}:\d{2}) : Player #(?P<conn>\d+) (?P<name>.+?) disconnected(?: \((?P<reason>[^)]*)\))?$",
    )
});

static ADMIN_LOGIN: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"^(?P<ts>\d{2}:\d{2}:\d{2}) : Admin login: (?P<name>.+?) from (?P<ip>\d{1,3}(?:\.\d{1,3}){3})$")
});

static CHAT: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"^(?P<ts>\d{2}:\d{2}:\d{2}) : \[Chat:(?P<channel>[A-Za-z]+)\] (?P<name>[^:]+): (?P<text>.*)$",
    )
});

static WARNING: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"^(?P<ts>\d{2}:\d{2}:\d{2}) : (?P<level>Warning|Error): (?P<msg>.+)$")
});

#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    // Patterns are literals covered by the tests below.
    Regex::new(pattern).expect("valid line pattern")
}

fn time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S").ok()
}

pub fn connect(line: &str) -> Option<LogEvent> {
    let caps = CONNECT.captures(line)?;
    Some(LogEvent::Connected {
        at: time(&caps["ts"])?,
        connection_id: caps["conn"].parse().ok()?,
        display_name: caps["name"].to_string(),
        ip: caps["ip"].parse::<IpAddr>().ok()?,
    })
}

pub fn session_id(line: &str) -> Option<LogEvent> {
    let caps = SESSION_ID.captures(line)?;
    let ip = match caps.name("ip") {
        Some(raw) => Some(raw.as_str().parse::<IpAddr>().ok()?),
        None => None,
    };
    Some(LogEvent::SessionIdAssigned {
        at: time(&caps["ts"])?,
        connection_id: caps["conn"].parse().ok()?,
        display_name: caps["name"].to_string(),
        session_id: SessionId::parse(&caps["sid"])?,
        ip,
    })
}

pub fn disconnect(line: &str) -> Option<LogEvent> {
    let caps = DISCONNECT.captures(line)?;
    Some(LogEvent::Disconnected {
        at: time(&caps["ts"])?,
        connection_id: caps["conn"].parse().ok()?,
        display_name: caps["name"].to_string(),
        reason: caps
            .name("reason")
            .map(|r| r.as_str().trim().to_string())
            .filter(|r| !r.is_empty()),
    })
}

pub fn admin_login(line: &str) -> Option<LogEvent> {
    let caps = ADMIN_LOGIN.captures(line)?;
    Some(LogEvent::AdminLogin {
        at: time(&caps["ts"])?,
        display_name: caps["name"].to_string(),
        ip: caps["ip"].parse::<IpAddr>().ok()?,
    })
}

pub fn chat(line: &str) -> Option<LogEvent> {
    let caps = CHAT.captures(line)?;
    Some(LogEvent::ChatMessage {
        at: time(&caps["ts"])?,
        channel: caps["channel"].to_string(),
        display_name: caps["name"].to_string(),
        text: caps["text"].to_string(),
    })
}

pub fn warning(line: &str) -> Option<LogEvent> {
    let caps = WARNING.captures(line)?;
    let level = match &caps["level"] {
        "Error" => WarningLevel::Error,
        _ => WarningLevel::Warning,
    };
    Some(LogEvent::Warning {
        at: time(&caps["ts"])?,
        level,
        message: caps["msg"].to_string(),
    })
}
