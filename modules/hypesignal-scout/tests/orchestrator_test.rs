//! End-to-end orchestrator scenarios against in-memory collaborators:
//! scripted feeds, a mock session backend and a mock classifier.

use std::sync::Arc;
use std::time::Duration;

use hypesignal_common::{Record, Source};
use hypesignal_scout::fetcher::{Continuation, FeedPage};
use hypesignal_scout::retry::RetryPolicy;
use hypesignal_scout::session::SessionConfig;
use hypesignal_scout::store::{IdAllocator, Store};
use hypesignal_scout::testing::{
    raw_record, MockClassifier, MockConnector, MockSessionBackend, ScriptedFetcher, TaskScript,
};
use hypesignal_scout::{Orchestrator, ScoutConfig, ScoutError};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn config() -> ScoutConfig {
    ScoutConfig {
        stagger: (Duration::ZERO, Duration::ZERO),
        scrape_comments: false,
        session: SessionConfig {
            start_retry: RetryPolicy::immediate(2),
            readiness_timeout: Duration::from_secs(5),
            navigation_settle: Duration::ZERO,
            ..SessionConfig::default()
        },
        ..ScoutConfig::default()
    }
}

struct Run {
    sessions: Arc<MockSessionBackend>,
    connector: Arc<MockConnector>,
    fetcher: Arc<ScriptedFetcher>,
    classifier: Arc<MockClassifier>,
    store: Arc<Store>,
    orchestrator: Orchestrator,
}

impl Run {
    fn new(config: ScoutConfig, sessions: MockSessionBackend, fetcher: ScriptedFetcher) -> Self {
        Self::with_store(
            config,
            sessions,
            fetcher,
            MockClassifier::new(),
            Store::in_memory(Arc::new(IdAllocator::new())),
        )
    }

    fn with_store(
        config: ScoutConfig,
        sessions: MockSessionBackend,
        fetcher: ScriptedFetcher,
        classifier: MockClassifier,
        store: Store,
    ) -> Self {
        let sessions = Arc::new(sessions);
        let fetcher = Arc::new(fetcher);
        let classifier = Arc::new(classifier);
        let store = Arc::new(store);
        let connector = Arc::new(MockConnector::new());
        let orchestrator = Orchestrator::new(
            config,
            sessions.clone(),
            connector.clone(),
            fetcher.clone(),
            store.clone(),
            classifier.clone(),
        );
        Self {
            sessions,
            connector,
            fetcher,
            classifier,
            store,
            orchestrator,
        }
    }
}

fn titles(store: &Store) -> Vec<String> {
    store
        .snapshot()
        .into_iter()
        .filter_map(|e| e.title)
        .collect()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn stops_at_first_out_of_horizon_record() {
    let source = Source::reddit("pumpfun");
    let fetcher = ScriptedFetcher::new().on_pages(
        &source,
        vec![
            FeedPage {
                records: vec![
                    raw_record("fresh post", "2 hours ago", "https://r/1"),
                    raw_record("recent post", "3 days ago", "https://r/2"),
                    raw_record("stale post", "10 days ago", "https://r/3"),
                ],
                continuation: Continuation::More,
            },
            FeedPage {
                records: vec![raw_record("never fetched", "1 hour ago", "https://r/4")],
                continuation: Continuation::Exhausted,
            },
        ],
    );
    let config = ScoutConfig {
        horizon_days: 7,
        skip_threshold: 1,
        ..config()
    };
    let run = Run::new(config, MockSessionBackend::new(), fetcher);

    let summary = run.orchestrator.run(&[source.clone()], &CancellationToken::new()).await;

    assert_eq!(titles(&run.store), vec!["fresh post", "recent post"]);
    assert_eq!(summary.records_collected, 2);
    assert_eq!(run.fetcher.page_calls(&source), 1);
    assert_eq!(run.sessions.sessions_outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn ticker_in_title_is_labelled_without_classifier() {
    let source = Source::reddit("CryptoMoonShots");
    let fetcher = ScriptedFetcher::new().on_source(
        &source,
        vec![vec![raw_record("Huge pump incoming $ABCD", "1 hour ago", "https://r/abcd")]],
    );
    let run = Run::new(config(), MockSessionBackend::new(), fetcher);

    let summary = run.orchestrator.run(&[source], &CancellationToken::new()).await;

    let entry = &run.store.snapshot()[0];
    assert_eq!(entry.token_name.as_deref(), Some("ABCD"));
    assert_eq!(run.classifier.create_calls(), 0);
    assert_eq!(summary.labels_quick, 1);
    assert_eq!(summary.missing_labels, 0);
}

#[tokio::test(start_paused = true)]
async fn classifier_labels_land_in_the_persisted_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scraped_posts.json");
    let source = Source::reddit("SolanaMemeCoins");
    let fetcher = ScriptedFetcher::new().on_source(
        &source,
        vec![vec![raw_record("what is everyone aping into", "5 min. ago", "https://r/ape")]],
    );
    let classifier = MockClassifier::new().script(TaskScript::CompletesAfter {
        pending_polls: 1,
        result: serde_json::json!("The token mentioned is BONK"),
    });
    let run = Run::with_store(
        config(),
        MockSessionBackend::new(),
        fetcher,
        classifier,
        Store::open(&path, Arc::new(IdAllocator::new())),
    );

    let summary = run.orchestrator.run(&[source], &CancellationToken::new()).await;

    assert!(summary.enrichment_drained);
    assert_eq!(summary.labels_remote, 1);
    assert_eq!(run.classifier.stop_calls(), 1);

    let persisted: Vec<Record> =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].token_name.as_deref(), Some("BONK"));
}

#[tokio::test(start_paused = true)]
async fn failing_source_releases_its_session_and_others_continue() {
    let broken = Source::reddit("broken");
    let healthy = Source::hashtag("solana");
    let fetcher = ScriptedFetcher::new()
        .failing(&broken, || ScoutError::Protocol("extraction script threw".into()))
        .on_source(&healthy, vec![vec![raw_record("gm $SOL", "1 hour ago", "https://x.com/s/1")]]);
    let run = Run::new(config(), MockSessionBackend::new(), fetcher);

    let summary = run
        .orchestrator
        .run(&[broken, healthy], &CancellationToken::new())
        .await;

    assert_eq!(summary.sources_failed.len(), 1);
    assert_eq!(summary.sources_failed[0].0, "r/broken");
    assert_eq!(summary.sources_completed, 1);
    assert_eq!(summary.records_collected, 1);
    assert_eq!(run.sessions.create_calls(), 2);
    assert_eq!(run.sessions.sessions_outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn session_that_never_becomes_active_fails_the_source_only() {
    let source = Source::reddit("altcoin");
    let run = Run::new(
        config(),
        MockSessionBackend::new().with_statuses(&["starting"]),
        ScriptedFetcher::new(),
    );

    let summary = run.orchestrator.run(&[source.clone()], &CancellationToken::new()).await;

    assert_eq!(summary.sources_failed.len(), 1);
    assert!(summary.sources_failed[0].1.contains("not active"));
    assert_eq!(run.sessions.release_calls(), 1);
    assert_eq!(run.fetcher.page_calls(&source), 0);
}

#[tokio::test(start_paused = true)]
async fn interrupt_mid_page_releases_every_live_session() {
    let sources: Vec<Source> = ["a", "b", "c"].iter().map(|n| Source::reddit(n)).collect();
    let fetcher = sources
        .iter()
        .fold(ScriptedFetcher::new(), |fetcher, source| fetcher.hanging(source));
    let run = Run::new(config(), MockSessionBackend::new(), fetcher);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        interrupt.cancel();
    });

    let summary = run.orchestrator.run(&sources, &cancel).await;

    assert_eq!(summary.sources_skipped, 3);
    assert_eq!(run.sessions.create_calls(), 3);
    assert_eq!(run.sessions.sessions_outstanding(), 0);
    assert!(summary.elapsed < Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn exhausted_budget_skips_later_batches() {
    let sources: Vec<Source> = ["a", "b", "c"].iter().map(|n| Source::reddit(n)).collect();
    let fetcher = sources
        .iter()
        .fold(ScriptedFetcher::new(), |fetcher, source| fetcher.hanging(source));
    let config = ScoutConfig {
        max_parallel: 1,
        global_timeout: Duration::from_secs(25),
        ..config()
    };
    let run = Run::new(config, MockSessionBackend::new(), fetcher);

    let summary = run.orchestrator.run(&sources, &CancellationToken::new()).await;

    // 25s over 3 batches: a gets 10s, b gets 10s, c finds 5s left
    assert_eq!(summary.sources_completed, 2);
    assert_eq!(summary.sources_skipped, 1);
    assert_eq!(run.sessions.sessions_outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn screenshots_are_written_per_page_and_linked_from_records() {
    let dir = tempfile::tempdir().unwrap();
    let shots = dir.path().join("shots");
    let source = Source::reddit("memecoin");
    let fetcher = ScriptedFetcher::new().on_source(
        &source,
        vec![
            vec![raw_record("page one post", "1 hour ago", "https://r/1")],
            vec![raw_record("page two post", "2 hours ago", "https://r/2")],
        ],
    );
    let config = ScoutConfig {
        screenshot_dir: Some(shots.clone()),
        ..config()
    };
    let run = Run::new(config, MockSessionBackend::new(), fetcher);

    run.orchestrator.run(&[source], &CancellationToken::new()).await;

    assert_eq!(run.connector.channel().screenshot_calls(), 2);
    assert!(shots.join("r-memecoin-page1.png").exists());
    assert!(shots.join("r-memecoin-page2.png").exists());

    let snapshot = run.store.snapshot();
    assert!(snapshot[0]
        .screenshot_path
        .as_deref()
        .is_some_and(|p| p.ends_with("r-memecoin-page1.png")));
    assert!(snapshot[1]
        .screenshot_path
        .as_deref()
        .is_some_and(|p| p.ends_with("r-memecoin-page2.png")));
}
