//! Single-writer pipeline: lines in, registry mutations out.
//!
//! All readers feed one channel. This task extracts events, keeps the
//! connection tracker current and correlates session ids strictly in arrival
//! order. A sweep tick expires stale connection entries.

use std::{sync::Arc, time::Duration};

use {
    chrono::Utc,
    gatekeeper_config::ConnectionsConfig,
    gatekeeper_events::{LogEvent, extract},
    gatekeeper_tail::SourcedLine,
    tokio::{
        sync::mpsc,
        time::{Instant, MissedTickBehavior},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, trace, warn},
};

#[cfg(feature = "metrics")]
use gatekeeper_metrics::{correlation as correlation_metrics, counter, events, gauge, labels};

use crate::{
    connections::ConnectionTracker,
    correlator::{CorrelationOutcome, Correlator, SessionObservation},
};

pub struct Pipeline {
    correlator: Arc<Correlator>,
    tracker: ConnectionTracker,
    sweep_interval: Duration,
}

impl Pipeline {
    pub fn new(correlator: Arc<Correlator>, connections: &ConnectionsConfig) -> Self {
        Self {
            correlator,
            tracker: ConnectionTracker::new(Duration::from_secs(connections.ttl_secs)),
            sweep_interval: Duration::from_secs(connections.sweep_interval_secs.max(1)),
        }
    }

    /// Process one line. Returns the correlation outcome for session-id lines.
    pub async fn handle_line(&mut self, line: &SourcedLine) -> Option<CorrelationOutcome> {
        let Some(event) = extract(&line.line) else {
            trace!(source = %line.source, "unrecognised line dropped");
            #[cfg(feature = "metrics")]
            counter!(events::DROPPED_TOTAL, labels::SOURCE => line.source.to_string())
                .increment(1);
            return None;
        };

        #[cfg(feature = "metrics")]
        counter!(events::EXTRACTED_TOTAL, labels::KIND => event.kind()).increment(1);

        match event {
            LogEvent::Connected {
                connection_id,
                display_name,
                ip,
                ..
            } => {
                self.tracker
                    .connected(connection_id, &display_name, ip, Instant::now());
                None
            },
            LogEvent::Disconnected { connection_id, .. } => {
                self.tracker.disconnected(connection_id);
                None
            },
            LogEvent::SessionIdAssigned {
                connection_id,
                display_name,
                session_id,
                ip,
                ..
            } => {
                let ip = ip.or_else(|| self.tracker.address_for(connection_id, &display_name));
                let obs = SessionObservation {
                    session_id,
                    display_name,
                    ip,
                    arrived_at: Utc::now(),
                };
                match self.correlator.correlate(&obs).await {
                    Ok(outcome) => Some(outcome),
                    Err(e) => {
                        warn!(
                            source = %line.source,
                            session_id = %obs.session_id,
                            display_name = %obs.display_name,
                            error = %e,
                            "correlation failed"
                        );
                        #[cfg(feature = "metrics")]
                        counter!(correlation_metrics::ERRORS_TOTAL).increment(1);
                        None
                    },
                }
            },
            other => {
                debug!(source = %line.source, kind = other.kind(), "event ignored");
                None
            },
        }
    }

    /// Expire connection entries past their TTL and drop idle account locks.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let expired = self.tracker.sweep(now);
        self.correlator.state_machine().prune_locks();

        #[cfg(feature = "metrics")]
        {
            counter!(correlation_metrics::CONNECTIONS_EXPIRED_TOTAL).increment(expired as u64);
            gauge!(correlation_metrics::CONNECTIONS_TRACKED).set(self.tracker.len() as f64);
        }

        expired
    }

    pub fn tracked_connections(&self) -> usize {
        self.tracker.len()
    }

    /// Consume lines until the channel closes or `cancel` fires.
    pub async fn run(mut self, mut rx: mpsc::Receiver<SourcedLine>, cancel: CancellationToken) {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(sweep_secs = self.sweep_interval.as_secs(), "reconciliation pipeline started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                line = rx.recv() => match line {
                    Some(line) => {
                        self.handle_line(&line).await;
                    },
                    None => {
                        debug!("line channel closed");
                        break;
                    },
                },
                now = sweep.tick() => {
                    self.sweep(now);
                },
            }
        }
        info!("reconciliation pipeline stopped");
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            correlator::CorrelatorSettings,
            effects::{CompletionSink, LogSink},
            lifecycle::StateMachine,
        },
        chrono::TimeDelta,
        gatekeeper_registry::{
            InMemoryRegistry, PENDING_SESSION_ID, PlayerRecord, PlayerRegistry, SessionSource,
        },
    };

    const SID: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn pipeline(registry: Arc<InMemoryRegistry>) -> Pipeline {
        let sinks: Vec<Arc<dyn CompletionSink>> = vec![Arc::new(LogSink::new("test"))];
        let machine = Arc::new(StateMachine::new(registry.clone(), sinks));
        let correlator = Arc::new(Correlator::new(
            registry,
            machine,
            CorrelatorSettings::default(),
        ));
        Pipeline::new(correlator, &ConnectionsConfig::default())
    }

    fn line(text: &str) -> SourcedLine {
        SourcedLine {
            source: Arc::from("login"),
            line: text.to_string(),
        }
    }

    #[tokio::test]
    async fn connect_line_supplies_address_for_session_line() {
        let registry = Arc::new(InMemoryRegistry::new());
        // Two awaiting records: only the address tells them apart.
        for (id, ip) in [("a", "1.2.3.4"), ("b", "5.6.7.8")] {
            registry
                .upsert_player(&PlayerRecord {
                    web_identity_verified: true,
                    device_verified: true,
                    awaiting_session_id: true,
                    last_ip: Some(ip.into()),
                    last_device_check: Some(Utc::now() - TimeDelta::minutes(1)),
                    session_id: Some(PENDING_SESSION_ID.into()),
                    ..PlayerRecord::new(id)
                })
                .await
                .unwrap();
        }
        let mut pipeline = pipeline(registry.clone());

        assert!(
            pipeline
                .handle_line(&line("12:00:00 : Player #3 JohnDoe connected from 5.6.7.8:7777"))
                .await
                .is_none()
        );
        let outcome = pipeline
            .handle_line(&line(&format!("12:00:01 : Player #3 JohnDoe - SID: {SID}")))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            CorrelationOutcome::Matched { ref account_id, strategy: SessionSource::RecentIp, .. }
                if account_id == "b"
        ));
        let b = registry.get_player("b").await.unwrap().unwrap();
        assert_eq!(b.resolved_session_id(), Some(SID));
        assert!(registry.get_player("a").await.unwrap().unwrap().session_pending());
    }

    #[tokio::test]
    async fn noise_and_unrelated_events_produce_nothing() {
        let mut pipeline = pipeline(Arc::new(InMemoryRegistry::new()));
        for text in [
            "garbage",
            "09:00:00 : Admin login: Overseer from 10.0.0.2",
            "09:01:00 : [Chat:Global] JohnDoe: hello",
            "09:02:00 : Warning: tick took 250ms",
        ] {
            assert!(pipeline.handle_line(&line(text)).await.is_none());
        }
    }

    #[tokio::test]
    async fn disconnect_and_sweep_drop_connections() {
        let mut pipeline = pipeline(Arc::new(InMemoryRegistry::new()));
        pipeline
            .handle_line(&line("12:00:00 : Player #3 JohnDoe connected from 1.2.3.4"))
            .await;
        pipeline
            .handle_line(&line("12:00:00 : Player #4 Anna connected from 5.6.7.8"))
            .await;
        assert_eq!(pipeline.tracked_connections(), 2);

        pipeline
            .handle_line(&line("12:10:00 : Player #3 JohnDoe disconnected (quit)"))
            .await;
        assert_eq!(pipeline.tracked_connections(), 1);

        let later = Instant::now() + Duration::from_secs(301);
        assert_eq!(pipeline.sweep(later), 1);
        assert_eq!(pipeline.tracked_connections(), 0);
    }

    #[tokio::test]
    async fn run_stops_when_cancelled() {
        let pipeline = pipeline(Arc::new(InMemoryRegistry::new()));
        let (_tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(pipeline.run(rx, cancel.clone()));
        cancel.cancel();
        assert!(
            tokio::time::timeout(Duration::from_secs(1), task)
                .await
                .is_ok()
        );
    }
}
