//! Shared error plumbing used across the gatekeeper crates.

pub mod error;

pub use error::FromMessage;
