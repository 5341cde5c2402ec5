#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end reconciliation scenarios against the SQLite registry.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    chrono::{DateTime, TimeDelta, Utc},
    gatekeeper_config::ConnectionsConfig,
    gatekeeper_reconcile::{
        AbstentionEvent, CompletionEvent, CompletionSink, CorrelationOutcome, Correlator,
        CorrelatorSettings, Error, Evaluation, Pipeline, Result, StateMachine,
    },
    gatekeeper_registry::{
        PENDING_SESSION_ID, PlayerRecord, PlayerRegistry, SessionSource, SqliteRegistry,
    },
    gatekeeper_tail::{
        CursorStore, FixedPath, InMemoryCursorStore, ReaderRegistry, TailOptions, TailReader,
    },
    sqlx::sqlite::SqlitePoolOptions,
    tokio::sync::mpsc,
};

const SID: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const STEAM_S: &str = "76561198000000001";

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<CompletionEvent>>,
    failing: AtomicBool,
}

impl RecordingSink {
    fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, event: &CompletionEvent) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::message("reward service unavailable"));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

struct Harness {
    registry: Arc<SqliteRegistry>,
    sink: Arc<RecordingSink>,
    abstentions: Arc<Mutex<Vec<AbstentionEvent>>>,
    pipeline: Pipeline,
}

impl Harness {
    async fn new() -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        gatekeeper_registry::run_migrations(&pool).await.unwrap();
        let registry = Arc::new(SqliteRegistry::with_pool(pool));

        let sink = Arc::new(RecordingSink::default());
        let sinks: Vec<Arc<dyn CompletionSink>> = vec![sink.clone()];
        let machine = Arc::new(StateMachine::new(registry.clone(), sinks));

        let abstentions = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&abstentions);
        let correlator = Correlator::new(registry.clone(), machine, CorrelatorSettings::default())
            .with_abstention_handler(Arc::new(move |event: &AbstentionEvent| {
                seen.lock().unwrap().push(event.clone());
            }));
        let pipeline = Pipeline::new(Arc::new(correlator), &ConnectionsConfig::default());

        Self {
            registry,
            sink,
            abstentions,
            pipeline,
        }
    }

    async fn feed(&mut self, text: &str) -> Option<CorrelationOutcome> {
        self.pipeline
            .handle_line(&gatekeeper_tail::SourcedLine {
                source: Arc::from("login"),
                line: text.to_string(),
            })
            .await
    }

    async fn player(&self, account_id: &str) -> PlayerRecord {
        self.registry.get_player(account_id).await.unwrap().unwrap()
    }
}

/// Millisecond precision, as stored by the SQLite backend.
fn ago(delta: TimeDelta) -> DateTime<Utc> {
    DateTime::from_timestamp_millis((Utc::now() - delta).timestamp_millis()).unwrap()
}

fn awaiting(account_id: &str, ip: &str, checked_ago: TimeDelta) -> PlayerRecord {
    PlayerRecord {
        web_identity_verified: true,
        device_verified: true,
        awaiting_session_id: true,
        last_ip: Some(ip.into()),
        last_device_check: Some(ago(checked_ago)),
        session_id: Some(PENDING_SESSION_ID.into()),
        chat_account_id: Some(format!("chat-{account_id}")),
        ..PlayerRecord::new(account_id)
    }
}

fn sid_line(name: &str) -> String {
    format!("12:00:00 : Player #3 {name} - SID: {SID}")
}

#[tokio::test]
async fn scenario_a_recent_ip_maps_and_completes_once() {
    let mut h = Harness::new().await;
    h.registry
        .upsert_player(&awaiting(STEAM_S, "1.2.3.4", TimeDelta::zero()))
        .await
        .unwrap();

    h.feed("11:59:58 : Player #3 JohnDoe connected from 1.2.3.4:7777")
        .await;
    let outcome = h.feed(&sid_line("JohnDoe")).await.unwrap();

    let CorrelationOutcome::Matched {
        account_id,
        strategy,
        evaluation,
    } = outcome
    else {
        panic!("expected a match, got {outcome:?}");
    };
    assert_eq!(account_id, STEAM_S);
    assert_eq!(strategy, SessionSource::RecentIp);
    assert!(matches!(evaluation, Some(Evaluation::Completed(_))));

    let s = h.player(STEAM_S).await;
    assert_eq!(s.session_id.as_deref(), Some(SID));
    assert_eq!(s.display_name.as_deref(), Some("JohnDoe"));
    assert!(!s.awaiting_session_id);
    assert!(s.reward_issued);

    let events = h.sink.events.lock().unwrap().clone();
    assert_eq!(events, vec![CompletionEvent {
        account_id: STEAM_S.into(),
        session_id: SID.into(),
        chat_account_id: Some(format!("chat-{STEAM_S}")),
    }]);
}

#[tokio::test]
async fn inline_address_is_used_without_a_connect_line() {
    let mut h = Harness::new().await;
    h.registry
        .upsert_player(&awaiting(STEAM_S, "1.2.3.4", TimeDelta::minutes(3)))
        .await
        .unwrap();
    h.registry
        .upsert_player(&awaiting("other", "4.4.4.4", TimeDelta::minutes(3)))
        .await
        .unwrap();

    let outcome = h
        .feed(&format!("12:00:00 : Player #3 JohnDoe (1.2.3.4) - SID: {SID}"))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        CorrelationOutcome::Matched { ref account_id, .. } if account_id == STEAM_S
    ));
    assert!(h.player("other").await.session_pending());
}

#[tokio::test]
async fn replaying_a_rewarded_session_dispatches_nothing() {
    let mut h = Harness::new().await;
    h.registry
        .upsert_player(&awaiting(STEAM_S, "1.2.3.4", TimeDelta::zero()))
        .await
        .unwrap();
    h.feed("11:59:58 : Player #3 JohnDoe connected from 1.2.3.4:7777")
        .await;
    h.feed(&sid_line("JohnDoe")).await;
    assert_eq!(h.sink.count(), 1);

    for _ in 0..3 {
        let outcome = h.feed(&sid_line("JohnDoe")).await.unwrap();
        assert!(matches!(outcome, CorrelationOutcome::Reentered {
            evaluation: Some(Evaluation::AlreadyRewarded),
            ..
        }));
    }
    assert_eq!(h.sink.count(), 1);
    assert!(h.player(STEAM_S).await.reward_issued);
}

#[tokio::test]
async fn replayed_session_is_not_claimed_by_a_lone_awaiting_player() {
    let mut h = Harness::new().await;
    h.registry
        .upsert_player(&awaiting(STEAM_S, "1.2.3.4", TimeDelta::zero()))
        .await
        .unwrap();
    h.feed("11:59:58 : Player #3 JohnDoe connected from 1.2.3.4:7777")
        .await;
    h.feed(&sid_line("JohnDoe")).await;
    assert_eq!(h.sink.count(), 1);

    // Another player finishes verification; they would be the sole candidate.
    let y = awaiting("76561198000000002", "5.5.5.5", TimeDelta::minutes(2));
    h.registry.upsert_player(&y).await.unwrap();

    let outcome = h
        .feed(&format!("12:05:00 : Player #7 JohnDoe (9.9.9.9) - SID: {SID}"))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        CorrelationOutcome::Reentered {
            ref account_id,
            evaluation: Some(Evaluation::AlreadyRewarded),
        } if account_id == STEAM_S
    ));

    assert_eq!(h.sink.count(), 1);
    assert_eq!(h.player(&y.account_id).await, y);
    let owners: Vec<String> = h
        .registry
        .list_players()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.session_id.as_deref() == Some(SID))
        .map(|r| r.account_id)
        .collect();
    assert_eq!(owners, vec![STEAM_S.to_string()]);
}

#[tokio::test]
async fn ambiguous_sole_candidates_abstain_without_mutation() {
    let mut h = Harness::new().await;
    let a = awaiting("76561198000000010", "10.0.0.1", TimeDelta::minutes(12));
    let b = awaiting("76561198000000020", "10.0.0.2", TimeDelta::minutes(25));
    h.registry.upsert_player(&a).await.unwrap();
    h.registry.upsert_player(&b).await.unwrap();

    h.feed("12:00:00 : Player #3 Stranger connected from 192.168.1.50")
        .await;
    let outcome = h.feed(&sid_line("Stranger")).await.unwrap();

    let CorrelationOutcome::Abstained(event) = outcome else {
        panic!("expected an abstention, got {outcome:?}");
    };
    let mut candidates = event.candidates.clone();
    candidates.sort();
    assert_eq!(candidates, vec![a.account_id.clone(), b.account_id.clone()]);
    assert_eq!(h.abstentions.lock().unwrap().as_slice(), [event]);

    assert_eq!(h.player(&a.account_id).await, a);
    assert_eq!(h.player(&b.account_id).await, b);
    assert!(h.registry.list_unmapped().await.unwrap().is_empty());
    assert_eq!(h.sink.count(), 0);
}

#[tokio::test]
async fn scenario_b_known_session_only_refreshes_name() {
    let mut h = Harness::new().await;
    let mut x = PlayerRecord {
        web_identity_verified: true,
        device_verified: true,
        session_id: Some(SID.into()),
        display_name: Some("JohnDoe".into()),
        session_id_source: Some(SessionSource::RecentIp),
        last_seen_in_session: Some(ago(TimeDelta::hours(1))),
        ..PlayerRecord::new("76561198000000099")
    };
    x.reward_issued = true;
    h.registry.upsert_player(&x).await.unwrap();

    let outcome = h.feed(&sid_line("Johnny")).await.unwrap();
    assert!(matches!(
        outcome,
        CorrelationOutcome::Reentered { ref account_id, .. } if *account_id == x.account_id
    ));

    let after = h.player(&x.account_id).await;
    assert_eq!(after.display_name.as_deref(), Some("Johnny"));
    assert!(after.last_seen_in_session > x.last_seen_in_session);
    assert_eq!(after.session_id, x.session_id);
    assert_eq!(after.session_id_source, x.session_id_source);
    assert!(after.reward_issued);
    assert_eq!(h.sink.count(), 0);
}

#[tokio::test]
async fn scenario_c_unknown_session_is_parked() {
    let mut h = Harness::new().await;
    h.feed("12:00:00 : Player #3 Nobody connected from 8.8.8.8:1234")
        .await;
    let outcome = h.feed(&sid_line("Nobody")).await.unwrap();
    assert_eq!(outcome, CorrelationOutcome::Unmapped);

    let parked = h.registry.get_unmapped(SID).await.unwrap().unwrap();
    assert_eq!(parked.display_name, "Nobody");
    assert_eq!(parked.last_ip.as_deref(), Some("8.8.8.8"));
}

#[tokio::test]
async fn later_match_clears_the_unmapped_entry() {
    let mut h = Harness::new().await;
    h.feed(&sid_line("JohnDoe")).await;
    assert!(h.registry.get_unmapped(SID).await.unwrap().is_some());

    let mut record = awaiting(STEAM_S, "1.2.3.4", TimeDelta::hours(2));
    record.display_name = Some("JohnDoe".into());
    h.registry.upsert_player(&record).await.unwrap();

    let outcome = h.feed(&sid_line("JohnDoe")).await.unwrap();
    assert!(matches!(outcome, CorrelationOutcome::Matched {
        strategy: SessionSource::DisplayName,
        ..
    }));
    assert!(h.registry.get_unmapped(SID).await.unwrap().is_none());
}

#[tokio::test]
async fn failed_completion_is_retried_on_the_next_sighting() {
    let mut h = Harness::new().await;
    h.registry
        .upsert_player(&awaiting(STEAM_S, "1.2.3.4", TimeDelta::zero()))
        .await
        .unwrap();
    h.sink.failing.store(true, Ordering::SeqCst);

    let outcome = h
        .feed(&format!("12:00:00 : Player #3 JohnDoe (1.2.3.4) - SID: {SID}"))
        .await
        .unwrap();
    assert!(matches!(outcome, CorrelationOutcome::Matched {
        evaluation: None,
        ..
    }));
    let s = h.player(STEAM_S).await;
    assert_eq!(s.resolved_session_id(), Some(SID));
    assert!(!s.reward_issued);

    h.sink.failing.store(false, Ordering::SeqCst);
    let outcome = h.feed(&sid_line("JohnDoe")).await.unwrap();
    assert!(matches!(outcome, CorrelationOutcome::Reentered {
        evaluation: Some(Evaluation::Completed(_)),
        ..
    }));
    assert!(h.player(STEAM_S).await.reward_issued);
    assert_eq!(h.sink.count(), 1);
}

#[tokio::test]
async fn tailed_file_drives_the_pipeline() {
    let h = Harness::new().await;
    h.registry
        .upsert_player(&awaiting(STEAM_S, "1.2.3.4", TimeDelta::zero()))
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("login_2026-01-15.log");
    std::fs::write(
        &log,
        format!(
            "\u{feff}11:59:58 : Player #3 JohnDoe connected from 1.2.3.4:7777\n\
             noise line\n{}\n",
            sid_line("JohnDoe")
        ),
    )
    .unwrap();

    let cursors: Arc<dyn CursorStore> = Arc::new(InMemoryCursorStore::new());
    let mut readers = ReaderRegistry::new(TailOptions {
        poll_interval: Duration::from_millis(10),
        probe_interval: Duration::from_millis(10),
        watch: false,
    });
    readers
        .register(TailReader::new("login", FixedPath(log), cursors))
        .unwrap();

    let (tx, rx) = mpsc::channel(64);
    readers.spawn(tx);
    let cancel = readers.cancellation();
    let Harness {
        registry,
        sink,
        pipeline,
        ..
    } = h;
    let task = tokio::spawn(pipeline.run(rx, cancel));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let s = registry.get_player(STEAM_S).await.unwrap().unwrap();
        if s.reward_issued {
            assert_eq!(s.resolved_session_id(), Some(SID));
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "pipeline never completed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(sink.count(), 1);

    readers.shutdown().await;
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
}
