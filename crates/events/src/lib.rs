//! Typed events extracted from game server log lines.
//!
//! [`extract`] runs an ordered list of named matchers over a line; the first
//! match wins and unrecognised lines yield `None`.

pub mod event;
pub mod matchers;

pub use {
    event::{LogEvent, SessionId, WarningLevel},
    matchers::{MATCHERS, Matcher, extract, extract_named},
};
