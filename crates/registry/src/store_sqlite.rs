//! SQLite-backed registry using sqlx.
//!
//! Timestamps are stored as Unix milliseconds, `known_account_ids` as a JSON
//! array. Every mutation is a single statement so concurrent writers cannot
//! interleave partial updates of one record.

use std::collections::BTreeSet;

use {
    async_trait::async_trait,
    chrono::{DateTime, TimeDelta, Utc},
    sqlx::SqlitePool,
    tracing::debug,
};

use crate::{
    Error, Result,
    store::PlayerRegistry,
    types::{PENDING_SESSION_ID, PlayerRecord, SessionMapping, SessionSource, UnmappedSession},
};

const PLAYER_COLUMNS: &str = "account_id, known_account_ids, chat_account_id, chat_tag, \
     web_identity_verified, device_verified, session_id, display_name, awaiting_session_id, \
     last_ip, last_device_check, session_id_source, last_seen_in_session, reward_issued";

/// Registry stored in the `players` and `unmapped_sessions` tables.
pub struct SqliteRegistry {
    pool: SqlitePool,
}

impl SqliteRegistry {
    /// Use an existing pool. Call [`crate::run_migrations`] first.
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_players(&self, filter: &str, bind: &str) -> Result<Vec<PlayerRecord>> {
        let sql = format!(
            "SELECT {PLAYER_COLUMNS} FROM players \
             WHERE web_identity_verified = 1 AND device_verified = 1 AND {filter} \
             ORDER BY account_id"
        );
        let rows: Vec<PlayerRow> = sqlx::query_as(&sql)
            .bind(bind)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(PlayerRecord::try_from).collect()
    }

    async fn require_player(&self, account_id: &str) -> Result<PlayerRecord> {
        self.get_player(account_id)
            .await?
            .ok_or_else(|| Error::player_not_found(account_id))
    }
}

#[async_trait]
impl PlayerRegistry for SqliteRegistry {
    async fn upsert_player(&self, record: &PlayerRecord) -> Result<()> {
        record.validate()?;
        if !record.reward_issued {
            let stored = self.get_player(&record.account_id).await?;
            if stored.is_some_and(|p| p.reward_issued) {
                // The flag survives the write, so the rest must still satisfy it.
                PlayerRecord {
                    reward_issued: true,
                    ..record.clone()
                }
                .validate()?;
            }
        }
        let mut known = record.known_account_ids.clone();
        known.insert(record.account_id.clone());
        let known = serde_json::to_string(&known)?;
        sqlx::query(
            "INSERT INTO players (account_id, known_account_ids, chat_account_id, chat_tag,
                 web_identity_verified, device_verified, session_id, display_name,
                 awaiting_session_id, last_ip, last_device_check, session_id_source,
                 last_seen_in_session, reward_issued)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(account_id) DO UPDATE SET
                 known_account_ids = excluded.known_account_ids,
                 chat_account_id = excluded.chat_account_id,
                 chat_tag = excluded.chat_tag,
                 web_identity_verified = excluded.web_identity_verified,
                 device_verified = excluded.device_verified,
                 session_id = excluded.session_id,
                 display_name = excluded.display_name,
                 awaiting_session_id = excluded.awaiting_session_id,
                 last_ip = excluded.last_ip,
                 last_device_check = excluded.last_device_check,
                 session_id_source = excluded.session_id_source,
                 last_seen_in_session = excluded.last_seen_in_session,
                 reward_issued = MAX(players.reward_issued, excluded.reward_issued)",
        )
        .bind(&record.account_id)
        .bind(&known)
        .bind(&record.chat_account_id)
        .bind(&record.chat_tag)
        .bind(record.web_identity_verified)
        .bind(record.device_verified)
        .bind(&record.session_id)
        .bind(&record.display_name)
        .bind(record.awaiting_session_id)
        .bind(&record.last_ip)
        .bind(record.last_device_check.map(|t| t.timestamp_millis()))
        .bind(record.session_id_source.map(|s| s.as_str()))
        .bind(record.last_seen_in_session.map(|t| t.timestamp_millis()))
        .bind(record.reward_issued)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_player(&self, account_id: &str) -> Result<Option<PlayerRecord>> {
        let sql = format!("SELECT {PLAYER_COLUMNS} FROM players WHERE account_id = ?");
        let row: Option<PlayerRow> = sqlx::query_as(&sql)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(PlayerRecord::try_from).transpose()
    }

    async fn list_players(&self) -> Result<Vec<PlayerRecord>> {
        let sql = format!("SELECT {PLAYER_COLUMNS} FROM players ORDER BY account_id");
        let rows: Vec<PlayerRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(PlayerRecord::try_from).collect()
    }

    async fn find_by_ip(&self, ip: &str) -> Result<Vec<PlayerRecord>> {
        self.fetch_players("last_ip = ?", ip).await
    }

    async fn find_by_display_name(&self, display_name: &str) -> Result<Vec<PlayerRecord>> {
        self.fetch_players("display_name = ?", display_name).await
    }

    async fn find_awaiting_within_window(
        &self,
        window: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<Vec<PlayerRecord>> {
        let cutoff = (now - window).timestamp_millis();
        let sql = format!(
            "SELECT {PLAYER_COLUMNS} FROM players
             WHERE web_identity_verified = 1 AND device_verified = 1
               AND awaiting_session_id = 1 AND last_device_check >= ?
             ORDER BY account_id"
        );
        let rows: Vec<PlayerRow> = sqlx::query_as(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(PlayerRecord::try_from).collect()
    }

    async fn find_by_session_id(&self, session_id: &str) -> Result<Option<PlayerRecord>> {
        if session_id.is_empty() || session_id == PENDING_SESSION_ID {
            return Ok(None);
        }
        let sql = format!(
            "SELECT {PLAYER_COLUMNS} FROM players WHERE session_id = ? \
             ORDER BY account_id LIMIT 1"
        );
        let row: Option<PlayerRow> = sqlx::query_as(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(PlayerRecord::try_from).transpose()
    }

    async fn apply_session_id_mapping(
        &self,
        account_id: &str,
        mapping: &SessionMapping,
    ) -> Result<PlayerRecord> {
        let result = sqlx::query(
            "UPDATE players SET session_id = ?, display_name = ?, session_id_source = ?,
                 last_seen_in_session = ?, awaiting_session_id = 0
             WHERE account_id = ?",
        )
        .bind(&mapping.session_id)
        .bind(&mapping.display_name)
        .bind(mapping.source.as_str())
        .bind(mapping.at.timestamp_millis())
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::player_not_found(account_id));
        }
        self.require_player(account_id).await
    }

    async fn touch_session(
        &self,
        account_id: &str,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Result<PlayerRecord> {
        let result = sqlx::query(
            "UPDATE players SET display_name = ?, last_seen_in_session = ? WHERE account_id = ?",
        )
        .bind(display_name)
        .bind(now.timestamp_millis())
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::player_not_found(account_id));
        }
        self.require_player(account_id).await
    }

    async fn mark_reward_issued(&self, account_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE players SET reward_issued = 1
             WHERE account_id = ? AND reward_issued = 0
               AND web_identity_verified = 1 AND device_verified = 1
               AND session_id IS NOT NULL AND session_id != '' AND session_id != ?",
        )
        .bind(account_id)
        .bind(PENDING_SESSION_ID)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let record = self.require_player(account_id).await?;
        if record.reward_issued {
            debug!(account_id, "reward flag already set");
            Ok(false)
        } else {
            Err(Error::invariant(
                account_id,
                "reward issued without a resolved session and full verification",
            ))
        }
    }

    async fn upsert_unmapped(
        &self,
        session_id: &str,
        display_name: &str,
        ip: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO unmapped_sessions (session_id, display_name, last_ip, last_seen)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET
                 display_name = excluded.display_name,
                 last_ip = excluded.last_ip,
                 last_seen = excluded.last_seen",
        )
        .bind(session_id)
        .bind(display_name)
        .bind(ip)
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_unmapped(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM unmapped_sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_unmapped(&self, session_id: &str) -> Result<Option<UnmappedSession>> {
        let row: Option<UnmappedRow> = sqlx::query_as(
            "SELECT session_id, display_name, last_ip, last_seen
             FROM unmapped_sessions WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UnmappedSession::from))
    }

    async fn list_unmapped(&self) -> Result<Vec<UnmappedSession>> {
        let rows: Vec<UnmappedRow> = sqlx::query_as(
            "SELECT session_id, display_name, last_ip, last_seen
             FROM unmapped_sessions ORDER BY last_seen DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(UnmappedSession::from).collect())
    }
}

/// Internal row type for sqlx mapping.
#[derive(sqlx::FromRow)]
struct PlayerRow {
    account_id: String,
    known_account_ids: String,
    chat_account_id: Option<String>,
    chat_tag: Option<String>,
    web_identity_verified: bool,
    device_verified: bool,
    session_id: Option<String>,
    display_name: Option<String>,
    awaiting_session_id: bool,
    last_ip: Option<String>,
    last_device_check: Option<i64>,
    session_id_source: Option<String>,
    last_seen_in_session: Option<i64>,
    reward_issued: bool,
}

impl TryFrom<PlayerRow> for PlayerRecord {
    type Error = Error;

    fn try_from(r: PlayerRow) -> Result<Self> {
        let known_account_ids: BTreeSet<String> = serde_json::from_str(&r.known_account_ids)?;
        let session_id_source = r
            .session_id_source
            .as_deref()
            .map(str::parse::<SessionSource>)
            .transpose()
            .map_err(|message| Error::invariant(&r.account_id, message))?;
        Ok(Self {
            known_account_ids,
            chat_account_id: r.chat_account_id,
            chat_tag: r.chat_tag,
            web_identity_verified: r.web_identity_verified,
            device_verified: r.device_verified,
            session_id: r.session_id,
            display_name: r.display_name,
            awaiting_session_id: r.awaiting_session_id,
            last_ip: r.last_ip,
            last_device_check: r.last_device_check.and_then(DateTime::from_timestamp_millis),
            session_id_source,
            last_seen_in_session: r
                .last_seen_in_session
                .and_then(DateTime::from_timestamp_millis),
            reward_issued: r.reward_issued,
            account_id: r.account_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UnmappedRow {
    session_id: String,
    display_name: String,
    last_ip: Option<String>,
    last_seen: i64,
}

impl From<UnmappedRow> for UnmappedSession {
    fn from(r: UnmappedRow) -> Self {
        Self {
            session_id: r.session_id,
            display_name: r.display_name,
            last_ip: r.last_ip,
            last_seen: DateTime::from_timestamp_millis(r.last_seen).unwrap_or_default(),
        }
    }
}
