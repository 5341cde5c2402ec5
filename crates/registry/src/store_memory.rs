//! In-memory registry for tests and dry runs.

use std::{collections::BTreeMap, sync::Mutex};

use {
    async_trait::async_trait,
    chrono::{DateTime, TimeDelta, Utc},
};

use crate::{
    Error, Result,
    store::PlayerRegistry,
    types::{PlayerRecord, SessionMapping, UnmappedSession},
};

/// Registry backed by ordered maps. Nothing is persisted.
#[derive(Default)]
pub struct InMemoryRegistry {
    players: Mutex<BTreeMap<String, PlayerRecord>>,
    unmapped: Mutex<BTreeMap<String, UnmappedSession>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn verified_where(&self, pred: impl Fn(&PlayerRecord) -> bool) -> Vec<PlayerRecord> {
        let players = self.players.lock().unwrap_or_else(|e| e.into_inner());
        players
            .values()
            .filter(|r| r.is_fully_verified() && pred(r))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PlayerRegistry for InMemoryRegistry {
    async fn upsert_player(&self, record: &PlayerRecord) -> Result<()> {
        record.validate()?;
        let mut players = self.players.lock().unwrap_or_else(|e| e.into_inner());
        let mut record = record.clone();
        if players.get(&record.account_id).is_some_and(|p| p.reward_issued) {
            record.reward_issued = true;
            record.validate()?;
        }
        record.known_account_ids.insert(record.account_id.clone());
        players.insert(record.account_id.clone(), record);
        Ok(())
    }

    async fn get_player(&self, account_id: &str) -> Result<Option<PlayerRecord>> {
        let players = self.players.lock().unwrap_or_else(|e| e.into_inner());
        Ok(players.get(account_id).cloned())
    }

    async fn list_players(&self) -> Result<Vec<PlayerRecord>> {
        let players = self.players.lock().unwrap_or_else(|e| e.into_inner());
        Ok(players.values().cloned().collect())
    }

    async fn find_by_ip(&self, ip: &str) -> Result<Vec<PlayerRecord>> {
        Ok(self.verified_where(|r| r.last_ip.as_deref() == Some(ip)))
    }

    async fn find_by_display_name(&self, display_name: &str) -> Result<Vec<PlayerRecord>> {
        Ok(self.verified_where(|r| r.display_name.as_deref() == Some(display_name)))
    }

    async fn find_awaiting_within_window(
        &self,
        window: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<Vec<PlayerRecord>> {
        let cutoff = now - window;
        Ok(self.verified_where(|r| {
            r.awaiting_session_id && r.last_device_check.is_some_and(|at| at >= cutoff)
        }))
    }

    async fn find_by_session_id(&self, session_id: &str) -> Result<Option<PlayerRecord>> {
        let players = self.players.lock().unwrap_or_else(|e| e.into_inner());
        Ok(players
            .values()
            .find(|r| r.resolved_session_id() == Some(session_id))
            .cloned())
    }

    async fn apply_session_id_mapping(
        &self,
        account_id: &str,
        mapping: &SessionMapping,
    ) -> Result<PlayerRecord> {
        let mut players = self.players.lock().unwrap_or_else(|e| e.into_inner());
        let record = players
            .get_mut(account_id)
            .ok_or_else(|| Error::player_not_found(account_id))?;
        record.session_id = Some(mapping.session_id.clone());
        record.display_name = Some(mapping.display_name.clone());
        record.session_id_source = Some(mapping.source);
        record.last_seen_in_session = Some(mapping.at);
        record.awaiting_session_id = false;
        Ok(record.clone())
    }

    async fn touch_session(
        &self,
        account_id: &str,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Result<PlayerRecord> {
        let mut players = self.players.lock().unwrap_or_else(|e| e.into_inner());
        let record = players
            .get_mut(account_id)
            .ok_or_else(|| Error::player_not_found(account_id))?;
        record.display_name = Some(display_name.to_string());
        record.last_seen_in_session = Some(now);
        Ok(record.clone())
    }

    async fn mark_reward_issued(&self, account_id: &str) -> Result<bool> {
        let mut players = self.players.lock().unwrap_or_else(|e| e.into_inner());
        let record = players
            .get_mut(account_id)
            .ok_or_else(|| Error::player_not_found(account_id))?;
        if record.reward_issued {
            return Ok(false);
        }
        let mut updated = record.clone();
        updated.reward_issued = true;
        updated.validate()?;
        *record = updated;
        Ok(true)
    }

    async fn upsert_unmapped(
        &self,
        session_id: &str,
        display_name: &str,
        ip: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut unmapped = self.unmapped.lock().unwrap_or_else(|e| e.into_inner());
        unmapped.insert(session_id.to_string(), UnmappedSession {
            session_id: session_id.to_string(),
            display_name: display_name.to_string(),
            last_ip: ip.map(str::to_string),
            last_seen: now,
        });
        Ok(())
    }

    async fn delete_unmapped(&self, session_id: &str) -> Result<bool> {
        let mut unmapped = self.unmapped.lock().unwrap_or_else(|e| e.into_inner());
        Ok(unmapped.remove(session_id).is_some())
    }

    async fn get_unmapped(&self, session_id: &str) -> Result<Option<UnmappedSession>> {
        let unmapped = self.unmapped.lock().unwrap_or_else(|e| e.into_inner());
        Ok(unmapped.get(session_id).cloned())
    }

    async fn list_unmapped(&self) -> Result<Vec<UnmappedSession>> {
        let unmapped = self.unmapped.lock().unwrap_or_else(|e| e.into_inner());
        Ok(unmapped.values().cloned().collect())
    }
}
