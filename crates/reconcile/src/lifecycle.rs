//! Verification state machine and the one-time completion sequence.

use std::{fmt, sync::Arc};

use {
    gatekeeper_registry::{PlayerRecord, PlayerRegistry},
    serde::Serialize,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use gatekeeper_metrics::{completion as completion_metrics, counter};

use crate::{
    Result,
    effects::{CompletionEvent, CompletionSink, deliver_all},
    locks::KeyedLocks,
};

/// Progression of a player record, derived from its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    Unverified,
    WebVerified,
    /// Both verification flags set, session id still pending.
    DeviceVerified,
    /// Session id resolved but a verification flag is missing.
    SessionMapped,
    /// Everything resolved, reward not yet issued.
    Complete,
    Rewarded,
}

impl VerificationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unverified => "unverified",
            Self::WebVerified => "web_verified",
            Self::DeviceVerified => "device_verified",
            Self::SessionMapped => "session_mapped",
            Self::Complete => "complete",
            Self::Rewarded => "rewarded",
        }
    }
}

impl fmt::Display for VerificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn derive_state(record: &PlayerRecord) -> VerificationState {
    let verified = record.is_fully_verified();
    let mapped = !record.session_pending();
    if record.reward_issued {
        VerificationState::Rewarded
    } else if verified && mapped {
        VerificationState::Complete
    } else if mapped {
        VerificationState::SessionMapped
    } else if verified {
        VerificationState::DeviceVerified
    } else if record.web_identity_verified {
        VerificationState::WebVerified
    } else {
        VerificationState::Unverified
    }
}

/// Result of [`StateMachine::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// Not complete yet; nothing dispatched.
    NotReady(VerificationState),
    /// Reward already issued; nothing dispatched.
    AlreadyRewarded,
    /// Every sink succeeded and `reward_issued` was committed.
    Completed(CompletionEvent),
}

/// Runs the completion sequence for accounts that reach [`VerificationState::Complete`].
pub struct StateMachine {
    registry: Arc<dyn PlayerRegistry>,
    sinks: Vec<Arc<dyn CompletionSink>>,
    locks: KeyedLocks,
}

impl StateMachine {
    pub fn new(registry: Arc<dyn PlayerRegistry>, sinks: Vec<Arc<dyn CompletionSink>>) -> Self {
        Self {
            registry,
            sinks,
            locks: KeyedLocks::new(),
        }
    }

    /// Re-read the record under the account lock and complete it if due.
    ///
    /// A sink failure aborts the sequence with [`crate::Error::Sink`] and leaves
    /// `reward_issued` unset, so the next evaluation retries from the first sink.
    pub async fn evaluate(&self, account_id: &str) -> Result<Evaluation> {
        let _guard = self.locks.lock(account_id).await;

        let record = self
            .registry
            .get_player(account_id)
            .await?
            .ok_or_else(|| gatekeeper_registry::Error::player_not_found(account_id))?;

        let state = derive_state(&record);
        match state {
            VerificationState::Rewarded => {
                debug!(account_id, "already rewarded, nothing to do");
                return Ok(Evaluation::AlreadyRewarded);
            },
            VerificationState::Complete => {},
            other => {
                debug!(account_id, state = %other, "not complete yet");
                return Ok(Evaluation::NotReady(other));
            },
        }

        let event = CompletionEvent {
            account_id: record.account_id.clone(),
            session_id: record
                .resolved_session_id()
                .unwrap_or_default()
                .to_string(),
            chat_account_id: record.chat_account_id.clone(),
        };

        if let Err(e) = deliver_all(&self.sinks, &event).await {
            warn!(account_id, error = %e, "completion sequence failed, reward not issued");
            return Err(e);
        }

        if !self.registry.mark_reward_issued(account_id).await? {
            // Another process committed first; sinks tolerate the repeat.
            warn!(account_id, "reward flag was already set after delivery");
            return Ok(Evaluation::AlreadyRewarded);
        }

        #[cfg(feature = "metrics")]
        counter!(completion_metrics::COMPLETED_TOTAL).increment(1);

        info!(account_id, session_id = %event.session_id, "verification complete, reward issued");
        Ok(Evaluation::Completed(event))
    }

    /// Drop lock entries of idle accounts.
    pub fn prune_locks(&self) -> usize {
        self.locks.prune()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::Error,
        async_trait::async_trait,
        gatekeeper_registry::InMemoryRegistry,
        std::sync::atomic::{AtomicUsize, Ordering},
    };

    const SID: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    #[derive(Default)]
    struct CountingSink {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl CompletionSink for CountingSink {
        fn name(&self) -> &str {
            "counting"
        }

        async fn deliver(&self, _event: &CompletionEvent) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::message("target unavailable"));
            }
            Ok(())
        }
    }

    fn complete_record(account_id: &str) -> PlayerRecord {
        PlayerRecord {
            web_identity_verified: true,
            device_verified: true,
            session_id: Some(SID.into()),
            ..PlayerRecord::new(account_id)
        }
    }

    #[test]
    fn states_follow_record_fields() {
        let mut record = PlayerRecord::new("a");
        assert_eq!(derive_state(&record), VerificationState::Unverified);
        record.device_verified = true;
        assert_eq!(derive_state(&record), VerificationState::Unverified);
        record.device_verified = false;
        record.web_identity_verified = true;
        assert_eq!(derive_state(&record), VerificationState::WebVerified);
        record.device_verified = true;
        assert_eq!(derive_state(&record), VerificationState::DeviceVerified);
        record.session_id = Some("pending".into());
        assert_eq!(derive_state(&record), VerificationState::DeviceVerified);
        record.session_id = Some(SID.into());
        assert_eq!(derive_state(&record), VerificationState::Complete);
        record.reward_issued = true;
        assert_eq!(derive_state(&record), VerificationState::Rewarded);

        let mut mapped_only = PlayerRecord::new("b");
        mapped_only.session_id = Some(SID.into());
        assert_eq!(derive_state(&mapped_only), VerificationState::SessionMapped);
    }

    #[tokio::test]
    async fn completes_once() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.upsert_player(&complete_record("a")).await.unwrap();
        let sink = Arc::new(CountingSink::default());
        let sinks: Vec<Arc<dyn CompletionSink>> = vec![sink.clone()];
        let machine = StateMachine::new(registry.clone(), sinks);

        assert!(matches!(
            machine.evaluate("a").await.unwrap(),
            Evaluation::Completed(_)
        ));
        assert_eq!(
            machine.evaluate("a").await.unwrap(),
            Evaluation::AlreadyRewarded
        );
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        assert!(registry.get_player("a").await.unwrap().unwrap().reward_issued);
    }

    #[tokio::test]
    async fn concurrent_evaluations_dispatch_once() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.upsert_player(&complete_record("a")).await.unwrap();
        let sink = Arc::new(CountingSink::default());
        let sinks: Vec<Arc<dyn CompletionSink>> = vec![sink.clone()];
        let machine = Arc::new(StateMachine::new(registry, sinks));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let machine = Arc::clone(&machine);
                tokio::spawn(async move { machine.evaluate("a").await.unwrap() })
            })
            .collect();
        let mut completed = 0;
        for task in tasks {
            if matches!(task.await.unwrap(), Evaluation::Completed(_)) {
                completed += 1;
            }
        }
        assert_eq!(completed, 1);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sink_failure_leaves_reward_unset() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.upsert_player(&complete_record("a")).await.unwrap();
        let first = Arc::new(CountingSink::default());
        let failing = Arc::new(CountingSink {
            fail: true,
            ..Default::default()
        });
        let sinks: Vec<Arc<dyn CompletionSink>> = vec![first.clone(), failing];
        let machine = StateMachine::new(registry.clone(), sinks);

        let err = machine.evaluate("a").await.unwrap_err();
        assert!(matches!(err, Error::Sink { .. }));
        assert!(!registry.get_player("a").await.unwrap().unwrap().reward_issued);
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn incomplete_record_dispatches_nothing() {
        let registry = Arc::new(InMemoryRegistry::new());
        let mut record = complete_record("a");
        record.session_id = None;
        registry.upsert_player(&record).await.unwrap();
        let sink = Arc::new(CountingSink::default());
        let sinks: Vec<Arc<dyn CompletionSink>> = vec![sink.clone()];
        let machine = StateMachine::new(registry, sinks);

        assert_eq!(
            machine.evaluate("a").await.unwrap(),
            Evaluation::NotReady(VerificationState::DeviceVerified)
        );
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    }
}
