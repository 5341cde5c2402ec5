//! Persistence trait for player records and unmapped sessions.

use {
    async_trait::async_trait,
    chrono::{DateTime, TimeDelta, Utc},
};

use crate::{
    Result,
    types::{PlayerRecord, SessionMapping, UnmappedSession},
};

/// Keyed store of verification records.
///
/// Lookups used by the correlator only return fully-verified records
/// (web identity and device both verified) unless documented otherwise.
#[async_trait]
pub trait PlayerRegistry: Send + Sync {
    /// Insert or replace a record. Rejects records that break the field invariants.
    async fn upsert_player(&self, record: &PlayerRecord) -> Result<()>;
    async fn get_player(&self, account_id: &str) -> Result<Option<PlayerRecord>>;
    async fn list_players(&self) -> Result<Vec<PlayerRecord>>;

    async fn find_by_ip(&self, ip: &str) -> Result<Vec<PlayerRecord>>;
    async fn find_by_display_name(&self, display_name: &str) -> Result<Vec<PlayerRecord>>;
    /// Awaiting records whose last device check is no older than `window` at `now`.
    async fn find_awaiting_within_window(
        &self,
        window: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<Vec<PlayerRecord>>;
    /// Any record holding `session_id`, regardless of verification flags.
    async fn find_by_session_id(&self, session_id: &str) -> Result<Option<PlayerRecord>>;

    /// Resolve a record's session id and clear its awaiting flag in one update.
    async fn apply_session_id_mapping(
        &self,
        account_id: &str,
        mapping: &SessionMapping,
    ) -> Result<PlayerRecord>;
    /// Refresh display name and last-seen time of an already mapped record.
    async fn touch_session(
        &self,
        account_id: &str,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Result<PlayerRecord>;
    /// Flip `reward_issued` from false to true. Returns `false` if it was already set.
    async fn mark_reward_issued(&self, account_id: &str) -> Result<bool>;

    async fn upsert_unmapped(
        &self,
        session_id: &str,
        display_name: &str,
        ip: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()>;
    async fn delete_unmapped(&self, session_id: &str) -> Result<bool>;
    async fn get_unmapped(&self, session_id: &str) -> Result<Option<UnmappedSession>>;
    async fn list_unmapped(&self) -> Result<Vec<UnmappedSession>>;
}
