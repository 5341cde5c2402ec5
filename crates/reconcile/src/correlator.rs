//! Matches a session id seen in the logs to exactly one pending player record.
//!
//! Strategies are tried in order and the first that yields a record wins:
//!
//! 1. `recent_ip`: same address, awaiting, device check inside the recent window.
//! 2. `ip_pending`: same address, session still pending, any age.
//! 3. `display_name`: same in-game name, session still pending, any age.
//! 4. `sole_candidate`: the only awaiting record inside the wider window.
//!    Several candidates make the correlator abstain without touching anything.
//!
//! A session id that already belongs to a record never reaches the strategies:
//! it only refreshes that record. An id nobody claims is parked as an
//! unmapped session.

use std::{net::IpAddr, sync::Arc, time::Duration};

use {
    chrono::{DateTime, TimeDelta, Utc},
    gatekeeper_config::CorrelationConfig,
    gatekeeper_events::SessionId,
    gatekeeper_registry::{PlayerRecord, PlayerRegistry, SessionMapping, SessionSource},
    serde::Serialize,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use gatekeeper_metrics::{correlation as correlation_metrics, counter, labels};

use crate::{
    Result,
    lifecycle::{Evaluation, StateMachine},
};

/// A session-id assignment ready for correlation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionObservation {
    pub session_id: SessionId,
    pub display_name: String,
    pub ip: Option<IpAddr>,
    pub arrived_at: DateTime<Utc>,
}

/// Emitted when several records qualify for the sole-candidate strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbstentionEvent {
    pub session_id: String,
    pub display_name: String,
    /// Account ids of every qualifying record.
    pub candidates: Vec<String>,
    pub at: DateTime<Utc>,
}

pub type AbstentionHandler = Arc<dyn Fn(&AbstentionEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationOutcome {
    /// A strategy resolved the record. `evaluation` is `None` when the
    /// completion handoff failed (logged, retried on re-entry).
    Matched {
        account_id: String,
        strategy: SessionSource,
        evaluation: Option<Evaluation>,
    },
    /// The session id already belonged to this record.
    Reentered {
        account_id: String,
        evaluation: Option<Evaluation>,
    },
    Abstained(AbstentionEvent),
    Unmapped,
}

impl CorrelationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Matched { .. } => "matched",
            Self::Reentered { .. } => "reentered",
            Self::Abstained(_) => "abstained",
            Self::Unmapped => "unmapped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelatorSettings {
    pub recent_window: TimeDelta,
    pub sole_candidate_window: TimeDelta,
}

impl Default for CorrelatorSettings {
    fn default() -> Self {
        Self::from(&CorrelationConfig::default())
    }
}

impl From<&CorrelationConfig> for CorrelatorSettings {
    fn from(config: &CorrelationConfig) -> Self {
        let window = |secs: u64| {
            TimeDelta::from_std(Duration::from_secs(secs)).unwrap_or(TimeDelta::MAX)
        };
        Self {
            recent_window: window(config.recent_window_secs),
            sole_candidate_window: window(config.sole_candidate_window_secs),
        }
    }
}

enum Selection {
    Found(PlayerRecord, SessionSource),
    Ambiguous(Vec<String>),
    Nothing,
}

pub struct Correlator {
    registry: Arc<dyn PlayerRegistry>,
    state_machine: Arc<StateMachine>,
    settings: CorrelatorSettings,
    on_abstain: Option<AbstentionHandler>,
}

impl Correlator {
    pub fn new(
        registry: Arc<dyn PlayerRegistry>,
        state_machine: Arc<StateMachine>,
        settings: CorrelatorSettings,
    ) -> Self {
        Self {
            registry,
            state_machine,
            settings,
            on_abstain: None,
        }
    }

    /// Callback invoked for every abstention, in addition to the returned outcome.
    #[must_use]
    pub fn with_abstention_handler(mut self, handler: AbstentionHandler) -> Self {
        self.on_abstain = Some(handler);
        self
    }

    pub fn state_machine(&self) -> &Arc<StateMachine> {
        &self.state_machine
    }

    pub async fn correlate(&self, obs: &SessionObservation) -> Result<CorrelationOutcome> {
        let session_id = obs.session_id.as_str();
        if let Some(owner) = self.registry.find_by_session_id(session_id).await? {
            return self.reenter(owner, obs).await;
        }

        let outcome = match self.select(obs).await? {
            Selection::Found(record, strategy) => {
                let mapping = SessionMapping {
                    session_id: session_id.to_string(),
                    display_name: obs.display_name.clone(),
                    source: strategy,
                    at: obs.arrived_at,
                };
                let record = self
                    .registry
                    .apply_session_id_mapping(&record.account_id, &mapping)
                    .await?;
                self.registry.delete_unmapped(session_id).await?;
                info!(
                    account_id = %record.account_id,
                    session_id,
                    display_name = %obs.display_name,
                    strategy = %strategy,
                    "session id mapped"
                );
                let evaluation = self.hand_off(&record.account_id).await;
                CorrelationOutcome::Matched {
                    account_id: record.account_id,
                    strategy,
                    evaluation,
                }
            },
            Selection::Ambiguous(candidates) => {
                let event = AbstentionEvent {
                    session_id: session_id.to_string(),
                    display_name: obs.display_name.clone(),
                    candidates,
                    at: obs.arrived_at,
                };
                warn!(
                    session_id,
                    display_name = %obs.display_name,
                    candidates = ?event.candidates,
                    "several awaiting players could own this session id, not guessing"
                );
                #[cfg(feature = "metrics")]
                counter!(correlation_metrics::ABSTENTIONS_TOTAL).increment(1);
                if let Some(handler) = &self.on_abstain {
                    handler(&event);
                }
                CorrelationOutcome::Abstained(event)
            },
            Selection::Nothing => {
                let ip = obs.ip.map(|ip| ip.to_string());
                self.registry
                    .upsert_unmapped(session_id, &obs.display_name, ip.as_deref(), obs.arrived_at)
                    .await?;
                info!(
                    session_id,
                    display_name = %obs.display_name,
                    ip = ?ip,
                    "no player matches session id, parked as unmapped"
                );
                CorrelationOutcome::Unmapped
            },
        };

        #[cfg(feature = "metrics")]
        {
            let strategy = match &outcome {
                CorrelationOutcome::Matched { strategy, .. } => strategy.as_str(),
                _ => "none",
            };
            counter!(
                correlation_metrics::OUTCOMES_TOTAL,
                labels::OUTCOME => outcome.label(),
                labels::STRATEGY => strategy
            )
            .increment(1);
        }

        Ok(outcome)
    }

    /// Refresh the record that already owns the session id and let the state
    /// machine retry a failed completion (no-op once rewarded).
    async fn reenter(
        &self,
        owner: PlayerRecord,
        obs: &SessionObservation,
    ) -> Result<CorrelationOutcome> {
        self.registry
            .touch_session(&owner.account_id, &obs.display_name, obs.arrived_at)
            .await?;
        debug!(
            account_id = %owner.account_id,
            session_id = %obs.session_id,
            "known session id seen again"
        );
        let evaluation = self.hand_off(&owner.account_id).await;
        let outcome = CorrelationOutcome::Reentered {
            account_id: owner.account_id,
            evaluation,
        };

        #[cfg(feature = "metrics")]
        counter!(
            correlation_metrics::OUTCOMES_TOTAL,
            labels::OUTCOME => outcome.label(),
            labels::STRATEGY => "none"
        )
        .increment(1);

        Ok(outcome)
    }

    async fn select(&self, obs: &SessionObservation) -> Result<Selection> {
        let now = obs.arrived_at;

        if let Some(ip) = obs.ip.map(|ip| ip.to_string()) {
            let by_ip = self.registry.find_by_ip(&ip).await?;

            let recent_cutoff = now - self.settings.recent_window;
            let recent = by_ip.iter().filter(|r| {
                r.awaiting_session_id && r.last_device_check.is_some_and(|at| at >= recent_cutoff)
            });
            if let Some(record) = most_recent(recent, SessionSource::RecentIp) {
                return Ok(Selection::Found(record, SessionSource::RecentIp));
            }

            let pending = by_ip.iter().filter(|r| r.session_pending());
            if let Some(record) = most_recent(pending, SessionSource::IpPending) {
                return Ok(Selection::Found(record, SessionSource::IpPending));
            }
        }

        let by_name = self
            .registry
            .find_by_display_name(&obs.display_name)
            .await?;
        let pending = by_name.iter().filter(|r| r.session_pending());
        if let Some(record) = most_recent(pending, SessionSource::DisplayName) {
            return Ok(Selection::Found(record, SessionSource::DisplayName));
        }

        let mut awaiting = self
            .registry
            .find_awaiting_within_window(self.settings.sole_candidate_window, now)
            .await?;
        match awaiting.len() {
            0 => Ok(Selection::Nothing),
            1 => Ok(awaiting
                .pop()
                .map_or(Selection::Nothing, |r| Selection::Found(r, SessionSource::SoleCandidate))),
            _ => Ok(Selection::Ambiguous(
                awaiting.into_iter().map(|r| r.account_id).collect(),
            )),
        }
    }

    async fn hand_off(&self, account_id: &str) -> Option<Evaluation> {
        match self.state_machine.evaluate(account_id).await {
            Ok(evaluation) => Some(evaluation),
            Err(e) => {
                warn!(account_id, error = %e, "completion handoff failed");
                None
            },
        }
    }
}

/// Pick the record with the latest device check, logging when there was a choice.
fn most_recent<'a>(
    candidates: impl Iterator<Item = &'a PlayerRecord>,
    strategy: SessionSource,
) -> Option<PlayerRecord> {
    let candidates: Vec<&PlayerRecord> = candidates.collect();
    let chosen = candidates
        .iter()
        .max_by(|a, b| {
            a.last_device_check
                .cmp(&b.last_device_check)
                .then_with(|| b.account_id.cmp(&a.account_id))
        })
        .map(|r| (*r).clone())?;
    if candidates.len() > 1 {
        info!(
            strategy = %strategy,
            chosen = %chosen.account_id,
            candidates = ?candidates.iter().map(|r| r.account_id.as_str()).collect::<Vec<_>>(),
            "several records matched, using the most recent device check"
        );
    }
    Some(chosen)
}
