//! Short-lived bookkeeping of live game connections.
//!
//! Connect lines carry the client address, session-id lines usually do not.
//! The tracker bridges the two by connection id (then by display name) for
//! the few seconds between them. Entries expire after a fixed TTL.

use std::{collections::HashMap, net::IpAddr, time::Duration};

use {tokio::time::Instant, tracing::debug};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub display_name: String,
    pub ip: IpAddr,
    pub seen: Instant,
}

pub struct ConnectionTracker {
    ttl: Duration,
    by_id: HashMap<u32, ConnectionInfo>,
}

impl ConnectionTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            by_id: HashMap::new(),
        }
    }

    /// Record a connect line. A reused connection id replaces the old entry.
    pub fn connected(&mut self, connection_id: u32, display_name: &str, ip: IpAddr, now: Instant) {
        self.by_id.insert(connection_id, ConnectionInfo {
            display_name: display_name.to_string(),
            ip,
            seen: now,
        });
    }

    pub fn disconnected(&mut self, connection_id: u32) {
        self.by_id.remove(&connection_id);
    }

    /// Address for a session-id line: by connection id when the names agree,
    /// else the freshest entry with that display name.
    pub fn address_for(&self, connection_id: u32, display_name: &str) -> Option<IpAddr> {
        if let Some(info) = self
            .by_id
            .get(&connection_id)
            .filter(|info| info.display_name == display_name)
        {
            return Some(info.ip);
        }
        self.by_id
            .values()
            .filter(|info| info.display_name == display_name)
            .max_by_key(|info| info.seen)
            .map(|info| info.ip)
    }

    /// Drop entries older than the TTL. Returns how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.by_id.len();
        self.by_id
            .retain(|_, info| now.saturating_duration_since(info.seen) < ttl);
        let expired = before - self.by_id.len();
        if expired > 0 {
            debug!(expired, remaining = self.by_id.len(), "expired connection entries");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
