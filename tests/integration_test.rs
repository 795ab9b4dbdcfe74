use async_trait::async_trait;
use livetrivia::auth::{Authenticator, StoreAuthenticator};
use livetrivia::config::GameConfig;
use livetrivia::protocol::{Broadcast, ClientMessage, GameSnapshot, ServerMessage};
use livetrivia::source::{EntrySource, SourceError, SourceResult};
use livetrivia::state::{AppState, Outbound};
use livetrivia::store::{MemoryStore, Store, StoreError, StoreResult};
use livetrivia::types::*;
use livetrivia::ws::handlers::handle_message;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Entry source that replays a fixed script, then keeps failing
struct ScriptedSource {
    script: Mutex<VecDeque<SourceResult<CandidateEntry>>>,
}

impl ScriptedSource {
    fn new(script: Vec<SourceResult<CandidateEntry>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }

    fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

#[async_trait]
impl EntrySource for ScriptedSource {
    async fn fetch_random_entry(&self) -> SourceResult<CandidateEntry> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(SourceError::Empty))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Store that is down for good
struct BrokenStore;

fn down<T>() -> StoreResult<T> {
    Err(StoreError::Unavailable("connection refused".to_string()))
}

#[async_trait]
impl Store for BrokenStore {
    async fn find_player(&self, _: &PlayerId) -> StoreResult<Option<PlayerRecord>> {
        down()
    }
    async fn find_player_by_token(&self, _: &str) -> StoreResult<Option<PlayerRecord>> {
        down()
    }
    async fn upsert_player(&self, _: PlayerRecord) -> StoreResult<()> {
        down()
    }
    async fn delete_player(&self, _: &PlayerId) -> StoreResult<bool> {
        down()
    }
    async fn find_report(&self, _: &ReportId) -> StoreResult<Option<ReportRecord>> {
        down()
    }
    async fn find_report_by_entry(&self, _: EntryId) -> StoreResult<Option<ReportRecord>> {
        down()
    }
    async fn upsert_report(&self, _: ReportRecord) -> StoreResult<()> {
        down()
    }
    async fn delete_report(&self, _: &ReportId) -> StoreResult<bool> {
        down()
    }
    async fn list_reports(&self) -> StoreResult<Vec<ReportRecord>> {
        down()
    }
}

/// Memory store with added latency on report lookups and player saves
struct SlowStore {
    inner: MemoryStore,
    report_lookup_delay: Duration,
    player_save_delay: Duration,
}

impl SlowStore {
    fn new(report_lookup_delay: Duration, player_save_delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            report_lookup_delay,
            player_save_delay,
        }
    }
}

#[async_trait]
impl Store for SlowStore {
    async fn find_player(&self, id: &PlayerId) -> StoreResult<Option<PlayerRecord>> {
        self.inner.find_player(id).await
    }
    async fn find_player_by_token(&self, token: &str) -> StoreResult<Option<PlayerRecord>> {
        self.inner.find_player_by_token(token).await
    }
    async fn upsert_player(&self, player: PlayerRecord) -> StoreResult<()> {
        tokio::time::sleep(self.player_save_delay).await;
        self.inner.upsert_player(player).await
    }
    async fn delete_player(&self, id: &PlayerId) -> StoreResult<bool> {
        self.inner.delete_player(id).await
    }
    async fn find_report(&self, id: &ReportId) -> StoreResult<Option<ReportRecord>> {
        self.inner.find_report(id).await
    }
    async fn find_report_by_entry(&self, entry_id: EntryId) -> StoreResult<Option<ReportRecord>> {
        tokio::time::sleep(self.report_lookup_delay).await;
        self.inner.find_report_by_entry(entry_id).await
    }
    async fn upsert_report(&self, report: ReportRecord) -> StoreResult<()> {
        self.inner.upsert_report(report).await
    }
    async fn delete_report(&self, id: &ReportId) -> StoreResult<bool> {
        self.inner.delete_report(id).await
    }
    async fn list_reports(&self) -> StoreResult<Vec<ReportRecord>> {
        self.inner.list_reports().await
    }
}

/// Timers long enough to never fire on their own during a test
fn test_config() -> GameConfig {
    GameConfig {
        split_interval: Duration::from_secs(3600),
        round_end_delay: Duration::from_secs(3600),
        source_retry_interval: Duration::from_secs(3600),
        ..GameConfig::default()
    }
}

fn candidate(id: EntryId, answer: &str, value: f64) -> CandidateEntry {
    CandidateEntry {
        id: Some(id),
        category: Some("Animals".to_string()),
        clue: format!("Clue number {}", id),
        answer: answer.to_string(),
        value: Some(value),
    }
}

struct Harness {
    state: Arc<AppState>,
    store: Arc<MemoryStore>,
    events: broadcast::Receiver<Broadcast>,
}

fn harness(config: GameConfig, script: Vec<SourceResult<CandidateEntry>>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let state = Arc::new(AppState::new(
        config,
        store.clone(),
        Arc::new(ScriptedSource::new(script)),
    ));
    let events = state.broadcast.subscribe();
    Harness {
        state,
        store,
        events,
    }
}

/// Everything broadcast so far
fn drain(events: &mut broadcast::Receiver<Broadcast>) -> Vec<Broadcast> {
    let mut out = Vec::new();
    while let Ok(envelope) = events.try_recv() {
        out.push(envelope);
    }
    out
}

fn messages(events: &mut broadcast::Receiver<Broadcast>) -> Vec<ServerMessage> {
    drain(events).into_iter().map(|b| b.msg).collect()
}

/// Store a player and admit it on `connection_id`
async fn connect(
    state: &Arc<AppState>,
    store: &MemoryStore,
    connection_id: &str,
    username: &str,
    coins: f64,
) -> (PlayerRecord, GameSnapshot, mpsc::UnboundedReceiver<Outbound>) {
    let mut player = PlayerRecord::new(username, format!("tok-{}", username));
    player.coins = coins;
    store.upsert_player(player.clone()).await.unwrap();
    let (snapshot, rx) = reconnect(state, connection_id, &player).await;
    (player, snapshot, rx)
}

async fn reconnect(
    state: &Arc<AppState>,
    connection_id: &str,
    player: &PlayerRecord,
) -> (GameSnapshot, mpsc::UnboundedReceiver<Outbound>) {
    let (tx, rx) = mpsc::unbounded_channel();
    match state.join(&connection_id.to_string(), player.clone(), tx).await {
        Some(ServerMessage::Welcome(snapshot)) => (snapshot, rx),
        other => panic!("Expected Welcome, got {:?}", other),
    }
}

async fn phase(state: &AppState) -> RoundPhase {
    state.round.lock().await.phase()
}

#[tokio::test]
async fn test_full_round_reveals_letter_by_letter() {
    let mut h = harness(test_config(), vec![Ok(candidate(1, "CAT", 30.0))]);

    // 1. Fetch and announce
    h.state.request_new_entry().await;
    match messages(&mut h.events).as_slice() {
        [ServerMessage::Round {
            entry_id,
            category,
            answer,
            current_value,
            ..
        }] => {
            assert_eq!(*entry_id, 1);
            assert_eq!(category.as_deref(), Some("Animals"));
            assert_eq!(answer, "___");
            assert_eq!(*current_value, 3.0);
        }
        other => panic!("Expected a single Round, got {:?}", other),
    }
    assert_eq!(phase(&h.state).await, RoundPhase::Revealing);
    assert!(h.state.source_running());

    // 2. Two partial reveals
    for (blanks, value) in [(2, 2.0), (1, 1.0)] {
        h.state.advance_split().await;
        match messages(&mut h.events).as_slice() {
            [ServerMessage::Split {
                answer,
                current_value,
            }] => {
                assert_eq!(answer.len(), 3);
                assert_eq!(answer.matches('_').count(), blanks);
                assert_eq!(*current_value, value);
            }
            other => panic!("Expected a single Split, got {:?}", other),
        }
    }

    // 3. One blank left: full reveal instead of a split
    h.state.advance_split().await;
    assert_eq!(
        messages(&mut h.events),
        vec![ServerMessage::Reveal {
            answer: "CAT".to_string()
        }]
    );
    assert_eq!(phase(&h.state).await, RoundPhase::Transitioning);
    assert_eq!(h.state.current_entry_id().await, Some(1));

    // 4. Nothing happens after the round is over
    h.state.advance_split().await;
    assert!(messages(&mut h.events).is_empty());
}

#[tokio::test]
async fn test_reveal_timer_drives_round_to_reveal() {
    let config = GameConfig {
        split_interval: Duration::from_millis(30),
        ..test_config()
    };
    let mut h = harness(config, vec![Ok(candidate(1, "CAT", 30.0))]);

    // 1. Announcement arms the reveal timer only
    h.state.request_new_entry().await;
    assert!(matches!(
        messages(&mut h.events).as_slice(),
        [ServerMessage::Round { .. }]
    ));
    {
        let round = h.state.round.lock().await;
        assert!(round.reveal_timer_armed());
        assert!(!round.fetch_timer_armed());
    }

    // 2. The timer alone produces SPLIT, SPLIT, REVEAL
    let mut steps = Vec::new();
    for _ in 0..3 {
        let envelope = tokio::time::timeout(Duration::from_secs(2), h.events.recv())
            .await
            .expect("Reveal timer should keep firing")
            .unwrap();
        steps.push(envelope.msg);
    }
    match steps.as_slice() {
        [ServerMessage::Split { answer: first, .. }, ServerMessage::Split { answer: second, .. }, ServerMessage::Reveal { answer }] =>
        {
            assert_eq!(first.matches('_').count(), 2);
            assert_eq!(second.matches('_').count(), 1);
            assert_eq!(answer, "CAT");
        }
        other => panic!("Expected Split, Split, Reveal, got {:?}", other),
    }

    // 3. Reveal timer done, transition delay armed
    assert_eq!(phase(&h.state).await, RoundPhase::Transitioning);
    {
        let round = h.state.round.lock().await;
        assert!(!round.reveal_timer_armed());
        assert!(round.fetch_timer_armed());
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(messages(&mut h.events).is_empty());
}

#[tokio::test]
async fn test_correct_attempt_pays_out_and_ends_round() {
    let mut h = harness(test_config(), vec![Ok(candidate(1, "CAT", 30.0))]);
    h.state.request_new_entry().await;
    let (alice, _, _rx) = connect(&h.state, &h.store, "c-alice", "alice", 0.0).await;
    let conn = "c-alice".to_string();

    // 1. One reveal, prize drops to 2.00
    h.state.advance_split().await;
    drain(&mut h.events);

    // 2. Wrong guess is free and broadcast
    let reply = handle_message(
        ClientMessage::Attempt {
            message: "dog".to_string(),
        },
        &conn,
        &h.state,
    )
    .await;
    assert!(reply.is_none(), "Free attempt should not move coins");

    {
        let round = h.state.round.lock().await;
        assert!(round.reveal_timer_armed());
        assert!(!round.fetch_timer_armed());
    }

    // 3. Correct guess, case-insensitive
    let reply = handle_message(
        ClientMessage::Attempt {
            message: "cat".to_string(),
        },
        &conn,
        &h.state,
    )
    .await;
    match reply {
        Some(ServerMessage::CoinDiff { coin_diff }) => assert_eq!(coin_diff, 2.0),
        other => panic!("Expected CoinDiff, got {:?}", other),
    }

    let events = messages(&mut h.events);
    assert_eq!(events.len(), 2, "Two attempts and no reveal: {:?}", events);
    match &events[1] {
        ServerMessage::PeerAttempt(record) => {
            assert_eq!(record.ordinal, 1);
            assert_eq!(record.player_id, alice.id);
            assert!(record.correct);
            assert_eq!(record.correct_answer.as_deref(), Some("CAT"));
        }
        other => panic!("Expected PeerAttempt, got {:?}", other),
    }
    assert_eq!(phase(&h.state).await, RoundPhase::Transitioning);
    {
        // Reveal stopped, next round scheduled
        let round = h.state.round.lock().await;
        assert!(!round.reveal_timer_armed());
        assert!(round.fetch_timer_armed());
    }

    // 4. Stale reveal and late attempts have no effect
    h.state.advance_split().await;
    let late = h.state.submit_attempt(&conn, "cat".to_string()).await;
    assert!(late.is_none());
    assert!(messages(&mut h.events).is_empty());

    let session = h.state.registry.session(&conn).await.unwrap();
    assert_eq!(session.player.coins, 2.0);
}

#[tokio::test]
async fn test_attempt_without_funds_is_dropped() {
    let mut h = harness(test_config(), vec![Ok(candidate(1, "CAT", 30.0))]);
    h.state.request_new_entry().await;
    let (_, snapshot, _rx) = connect(&h.state, &h.store, "c-broke", "broke", 0.0).await;
    assert_eq!(snapshot.free_attempts_left, Some(3));
    let (_, _, _rx2) = connect(&h.state, &h.store, "c-rich", "rich", 1.5).await;
    drain(&mut h.events);

    let broke = "c-broke".to_string();
    let rich = "c-rich".to_string();

    // 1. Three free attempts each
    for guess in ["dog", "cow", "owl"] {
        assert!(h.state.submit_attempt(&broke, guess.to_string()).await.is_none());
        assert!(h.state.submit_attempt(&rich, guess.to_string()).await.is_none());
    }
    assert_eq!(messages(&mut h.events).len(), 6);

    // 2. Fourth attempt with a balance of 0: silently dropped
    assert!(h.state.submit_attempt(&broke, "pig".to_string()).await.is_none());
    assert!(messages(&mut h.events).is_empty());
    let session = h.state.registry.session(&broke).await.unwrap();
    assert_eq!(session.player.coins, 0.0);

    // 3. Fourth attempt with 1.50: charged
    match h.state.submit_attempt(&rich, "pig".to_string()).await {
        Some(ServerMessage::CoinDiff { coin_diff }) => assert_eq!(coin_diff, -1.0),
        other => panic!("Expected CoinDiff, got {:?}", other),
    }
    match messages(&mut h.events).as_slice() {
        [ServerMessage::PeerAttempt(record)] => assert_eq!(record.ordinal, 6),
        other => panic!("Expected a single PeerAttempt, got {:?}", other),
    }

    // 4. Empty and oversized messages are dropped too
    assert!(h.state.submit_attempt(&rich, String::new()).await.is_none());
    let long = "x".repeat(101);
    assert!(h.state.submit_attempt(&rich, long).await.is_none());
    assert!(messages(&mut h.events).is_empty());
}

#[tokio::test]
async fn test_paid_correct_attempt_reports_net_coin_diff() {
    let config = GameConfig {
        free_attempts_per_round: 0,
        ..test_config()
    };
    let mut h = harness(config, vec![Ok(candidate(1, "CAT", 30.0))]);
    h.state.request_new_entry().await;
    let (_, _, _rx) = connect(&h.state, &h.store, "c-alice", "alice", 1.0).await;
    let conn = "c-alice".to_string();
    drain(&mut h.events);

    // Charged 1.00, paid 3.00
    match h.state.submit_attempt(&conn, "cat".to_string()).await {
        Some(ServerMessage::CoinDiff { coin_diff }) => assert_eq!(coin_diff, 2.0),
        other => panic!("Expected CoinDiff, got {:?}", other),
    }
    let session = h.state.registry.session(&conn).await.unwrap();
    assert_eq!(session.player.coins, 3.0);
}

#[tokio::test]
async fn test_reconnect_evicts_previous_connection() {
    let mut h = harness(test_config(), vec![Ok(candidate(1, "CAT", 30.0))]);
    h.state.request_new_entry().await;
    drain(&mut h.events);

    // 1. First connection
    let (mut alice, _, mut first_rx) = connect(&h.state, &h.store, "c-first", "alice", 5.0).await;
    alice.last_seen_at = "2020-01-01T00:00:00+00:00".to_string();
    h.store.upsert_player(alice.clone()).await.unwrap();
    h.state.registry.credit(&"c-first".to_string(), 2.5).await;

    // 2. Second connection before the first one closed
    let (snapshot, _second_rx) = reconnect(&h.state, "c-second", &alice).await;
    assert_eq!(snapshot.coins, 7.5, "Live balance carries over");
    assert_eq!(snapshot.players, 1);
    assert!(matches!(first_rx.try_recv(), Ok(Outbound::Close)));

    // 3. The evicted socket closes
    h.state.handle_disconnect(&"c-first".to_string()).await;

    let events = drain(&mut h.events);
    let joins: Vec<&Broadcast> = events
        .iter()
        .filter(|b| matches!(b.msg, ServerMessage::PeerJoin { .. }))
        .collect();
    assert_eq!(joins.len(), 1, "Only the first admission announces a join");
    assert!(!joins[0].is_for(&"c-first".to_string()));
    assert!(!events
        .iter()
        .any(|b| matches!(b.msg, ServerMessage::PeerLeft { .. })));
    assert_eq!(h.state.registry.player_count().await, 1);

    // 4. Last connection closes: departure announced and balance saved
    h.state.handle_disconnect(&"c-second".to_string()).await;
    match messages(&mut h.events).as_slice() {
        [ServerMessage::PeerLeft { player_id, username }] => {
            assert_eq!(player_id, &alice.id);
            assert_eq!(username, "alice");
        }
        other => panic!("Expected a single PeerLeft, got {:?}", other),
    }
    let stored = h.store.find_player(&alice.id).await.unwrap().unwrap();
    assert_eq!(stored.coins, 7.5);
    assert_ne!(stored.last_seen_at, "2020-01-01T00:00:00+00:00");
}

#[tokio::test]
async fn test_banned_and_invalid_entries_are_skipped() {
    let config = GameConfig {
        invalid_words: vec!["forbidden".to_string()],
        ..test_config()
    };
    let mut missing_clue = candidate(3, "Cat", 30.0);
    missing_clue.clue = "  ".to_string();
    let mut no_id = candidate(0, "Cat", 30.0);
    no_id.id = None;

    let mut h = harness(
        config,
        vec![
            Ok(candidate(42, "Banned", 30.0)),
            Ok(candidate(2, "C_T", 30.0)),
            Ok(missing_clue),
            Ok(no_id),
            Ok(candidate(4, "Forbidden fruit", 30.0)),
            Ok(candidate(7, "Dog", 0.0)),
        ],
    );

    h.store
        .upsert_report(ReportRecord {
            id: "r42".to_string(),
            entry_id: 42,
            category: None,
            clue: "Clue number 42".to_string(),
            answer: "Banned".to_string(),
            reporters: vec!["someone".to_string()],
            banned: true,
            last_reported_at: chrono::Utc::now().to_rfc3339(),
        })
        .await
        .unwrap();

    h.state.request_new_entry().await;

    match messages(&mut h.events).as_slice() {
        [ServerMessage::Round {
            entry_id,
            current_value,
            ..
        }] => {
            assert_eq!(*entry_id, 7);
            // No provider value: random multiple of 10 between 10 and 100
            assert!((10.0..=100.0).contains(current_value));
            assert_eq!(current_value % 10.0, 0.0);
        }
        other => panic!("Expected a single Round for entry 7, got {:?}", other),
    }
    assert_eq!(phase(&h.state).await, RoundPhase::Revealing);
}

#[tokio::test]
async fn test_long_run_of_rejected_entries_does_not_block_runtime() {
    let mut script: Vec<SourceResult<CandidateEntry>> = (1..=500)
        .map(|id| Ok(candidate(id, "C_T", 30.0)))
        .collect();
    script.push(Ok(candidate(501, "Dog", 30.0)));
    let source = Arc::new(ScriptedSource::new(script));
    let state = Arc::new(AppState::new(
        test_config(),
        Arc::new(MemoryStore::new()),
        source.clone(),
    ));
    let mut events = state.broadcast.subscribe();

    // Same single-threaded runtime: the fetch loop runs first and has to
    // let the other task in before the script is used up
    let fetch = tokio::spawn({
        let state = state.clone();
        async move { state.request_new_entry().await }
    });
    let ticker = tokio::spawn({
        let source = source.clone();
        async move { source.remaining() }
    });
    let left_when_ticked = ticker.await.unwrap();
    assert!(left_when_ticked > 0, "Fetch loop never yielded");
    fetch.await.unwrap();

    assert_eq!(source.remaining(), 0);
    match messages(&mut events).as_slice() {
        [ServerMessage::Round { entry_id, .. }] => assert_eq!(*entry_id, 501),
        other => panic!("Expected a single Round for entry 501, got {:?}", other),
    }
}

#[tokio::test]
async fn test_provider_error_retries_after_fixed_delay() {
    let config = GameConfig {
        source_retry_interval: Duration::from_millis(50),
        ..test_config()
    };
    let mut h = harness(
        config,
        vec![
            Err(SourceError::Status(503)),
            Ok(candidate(1, "CAT", 30.0)),
        ],
    );

    // 1. First fetch fails: idle, no announcement
    h.state.request_new_entry().await;
    assert_eq!(phase(&h.state).await, RoundPhase::Idle);
    assert!(!h.state.source_running());
    assert!(messages(&mut h.events).is_empty());

    // 2. Retry timer fetches again
    let envelope = tokio::time::timeout(Duration::from_secs(2), h.events.recv())
        .await
        .expect("Retry should announce a round")
        .unwrap();
    match envelope.msg {
        ServerMessage::Round { entry_id, .. } => assert_eq!(entry_id, 1),
        other => panic!("Expected Round, got {:?}", other),
    }
    assert!(h.state.source_running());
    assert_eq!(phase(&h.state).await, RoundPhase::Revealing);
}

#[tokio::test]
async fn test_round_end_delay_starts_next_round() {
    let config = GameConfig {
        round_end_delay: Duration::from_millis(50),
        ..test_config()
    };
    let mut h = harness(
        config,
        vec![Ok(candidate(1, "Ox", 30.0)), Ok(candidate(2, "Yak", 30.0))],
    );

    h.state.request_new_entry().await;
    h.state.advance_split().await;
    h.state.advance_split().await;
    let events = messages(&mut h.events);
    assert!(matches!(events.last(), Some(ServerMessage::Reveal { answer }) if answer == "Ox"));

    let envelope = tokio::time::timeout(Duration::from_secs(2), h.events.recv())
        .await
        .expect("Next round should start after the delay")
        .unwrap();
    match envelope.msg {
        ServerMessage::Round { entry_id, answer, .. } => {
            assert_eq!(entry_id, 2);
            assert_eq!(answer, "___");
        }
        other => panic!("Expected Round, got {:?}", other),
    }
}

#[tokio::test]
async fn test_duplicate_report_keeps_single_reporter() {
    let mut h = harness(test_config(), vec![Ok(candidate(5, "CAT", 30.0))]);
    h.state.request_new_entry().await;
    let (alice, _, _rx) = connect(&h.state, &h.store, "c-alice", "alice", 0.0).await;
    let (bob, _, _rx2) = connect(&h.state, &h.store, "c-bob", "bob", 0.0).await;
    let conn = "c-alice".to_string();

    // 1. Report twice
    for _ in 0..2 {
        let reply = handle_message(ClientMessage::ReportEntry, &conn, &h.state).await;
        assert_eq!(reply, Some(ServerMessage::EntryReportedOk));
    }
    let record = h.store.find_report_by_entry(5).await.unwrap().unwrap();
    assert_eq!(record.reporters, vec![alice.id.clone()]);
    assert_eq!(record.clue, "Clue number 5");
    assert!(!record.banned);

    // 2. Another player joins the record
    let reply = h.state.report_entry(&"c-bob".to_string()).await;
    assert_eq!(reply, Some(ServerMessage::EntryReportedOk));
    let record = h.store.find_report_by_entry(5).await.unwrap().unwrap();
    assert_eq!(record.reporters, vec![alice.id.clone(), bob.id]);

    // 3. Reports are private; WELCOME remembers them
    assert!(messages(&mut h.events)
        .iter()
        .all(|m| !matches!(m, ServerMessage::EntryReportedOk)));
    let (snapshot, _rx3) = reconnect(&h.state, "c-alice-2", &alice).await;
    assert!(snapshot.entry_reported);
}

#[tokio::test]
async fn test_concurrent_reports_keep_both_reporters() {
    let store = Arc::new(SlowStore::new(Duration::from_millis(50), Duration::ZERO));
    let state = Arc::new(AppState::new(
        test_config(),
        store.clone(),
        Arc::new(ScriptedSource::new(vec![Ok(candidate(5, "CAT", 30.0))])),
    ));
    state.request_new_entry().await;
    let (alice, _, _rx) = connect(&state, &store.inner, "c1", "alice", 0.0).await;
    let (bob, _, _rx2) = connect(&state, &store.inner, "c2", "bob", 0.0).await;

    let (c1, c2) = ("c1".to_string(), "c2".to_string());
    let (first, second) = tokio::join!(state.report_entry(&c1), state.report_entry(&c2));
    assert_eq!(first, Some(ServerMessage::EntryReportedOk));
    assert_eq!(second, Some(ServerMessage::EntryReportedOk));

    assert_eq!(store.inner.list_reports().await.unwrap().len(), 1);
    let record = store.inner.find_report_by_entry(5).await.unwrap().unwrap();
    let mut reporters = record.reporters;
    reporters.sort();
    let mut expected = vec![alice.id, bob.id];
    expected.sort();
    assert_eq!(reporters, expected);
}

#[tokio::test]
async fn test_reconnect_during_disconnect_save_keeps_winnings() {
    let store = Arc::new(SlowStore::new(Duration::ZERO, Duration::from_millis(50)));
    let state = Arc::new(AppState::new(
        test_config(),
        store.clone(),
        Arc::new(ScriptedSource::new(vec![])),
    ));
    let mut events = state.broadcast.subscribe();
    let (alice, _, _rx) = connect(&state, &store.inner, "c1", "alice", 0.0).await;
    state.registry.credit(&"c1".to_string(), 10.0).await;
    drain(&mut events);

    // 1. Last connection closes, the balance save is slow
    let leaving = {
        let state = state.clone();
        tokio::spawn(async move { state.handle_disconnect(&"c1".to_string()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    // 2. Reconnect while saving: the store still has the old balance
    let authenticator = StoreAuthenticator::new(store.clone());
    let resolved = authenticator.authenticate("tok-alice").await.unwrap();
    assert_eq!(resolved.coins, 0.0);
    let (snapshot, _rx2) = reconnect(&state, "c2", &resolved).await;
    assert_eq!(snapshot.coins, 10.0, "Live balance carries over");

    leaving.await.unwrap();
    assert!(!messages(&mut events)
        .iter()
        .any(|m| matches!(m, ServerMessage::PeerLeft { .. })));
    assert_eq!(state.registry.player_count().await, 1);

    // 3. The final disconnect saves the winnings
    state.handle_disconnect(&"c2".to_string()).await;
    let stored = store.inner.find_player(&alice.id).await.unwrap().unwrap();
    assert_eq!(stored.coins, 10.0);
}

#[tokio::test]
async fn test_report_failure_only_reaches_reporter() {
    let store = Arc::new(BrokenStore);
    let state = Arc::new(AppState::new(
        test_config(),
        store,
        Arc::new(ScriptedSource::new(vec![Ok(candidate(1, "CAT", 30.0))])),
    ));
    let mut events = state.broadcast.subscribe();

    // Ban lookup fails, the entry is still played
    state.request_new_entry().await;
    assert_eq!(phase(&state).await, RoundPhase::Revealing);
    drain(&mut events);

    let player = PlayerRecord::new("alice", "tok-alice");
    let (_snapshot, _rx) = reconnect(&state, "c-alice", &player).await;
    drain(&mut events);

    let reply = state.report_entry(&"c-alice".to_string()).await;
    assert_eq!(reply, Some(ServerMessage::EntryReportedError));
    assert!(messages(&mut events).is_empty());
    assert_eq!(phase(&state).await, RoundPhase::Revealing);

    // Not cached as reported, the player can try again
    let reply = state.report_entry(&"c-alice".to_string()).await;
    assert_eq!(reply, Some(ServerMessage::EntryReportedError));
}

#[tokio::test]
async fn test_welcome_snapshot() {
    let mut h = harness(test_config(), vec![Ok(candidate(1, "CAT", 30.0))]);

    // 1. Before any entry: no entry fields, connection still admitted
    let (_, idle, _rx) = connect(&h.state, &h.store, "c-early", "early", 1.0).await;
    assert_eq!(idle.phase, RoundPhase::Idle);
    assert_eq!(idle.entry_id, None);
    assert_eq!(idle.answer, None);
    assert_eq!(idle.free_attempts_left, None);
    assert_eq!(idle.players, 1);
    assert_eq!(idle.total_split_seconds, 3600);

    // 2. Mid-round
    h.state.request_new_entry().await;
    h.state.advance_split().await;
    h.state
        .submit_attempt(&"c-early".to_string(), "dog".to_string())
        .await;
    drain(&mut h.events);

    let (_, snapshot, _rx2) = connect(&h.state, &h.store, "c-late", "late", 4.0).await;
    assert_eq!(snapshot.phase, RoundPhase::Revealing);
    assert_eq!(snapshot.coins, 4.0);
    assert_eq!(snapshot.entry_id, Some(1));
    assert_eq!(snapshot.clue.as_deref(), Some("Clue number 1"));
    assert_eq!(snapshot.answer.as_ref().map(|a| a.matches('_').count()), Some(2));
    assert_eq!(snapshot.current_value, 2.0);
    assert_eq!(snapshot.elapsed_split_seconds, Some(0));
    assert_eq!(snapshot.free_attempts_left, Some(3));
    assert!(!snapshot.entry_reported);
    assert_eq!(snapshot.players, 2);
    assert_eq!(snapshot.attempts.len(), 1);

    // 3. After the reveal the full answer is shown
    h.state.advance_split().await;
    h.state.advance_split().await;
    let (_, done, _rx3) = connect(&h.state, &h.store, "c-last", "last", 0.0).await;
    assert_eq!(done.phase, RoundPhase::Transitioning);
    assert_eq!(done.answer.as_deref(), Some("CAT"));
    assert_eq!(done.elapsed_split_seconds, None);
    assert_eq!(done.free_attempts_left, None);
}

#[tokio::test]
async fn test_player_list_and_reactions() {
    let mut h = harness(test_config(), vec![]);
    let (_, _, _rx1) = connect(&h.state, &h.store, "c1", "ann", 2.0).await;
    let (_, _, _rx2) = connect(&h.state, &h.store, "c2", "ben", 9.0).await;
    let (_, _, _rx3) = connect(&h.state, &h.store, "c3", "cat", 2.0).await;
    drain(&mut h.events);

    // 1. Private player list, richest first, ties by join order
    let reply = handle_message(ClientMessage::RequestPlayerList, &"c1".to_string(), &h.state).await;
    match reply {
        Some(ServerMessage::PlayerList { players }) => {
            let names: Vec<&str> = players.iter().map(|p| p.username.as_str()).collect();
            assert_eq!(names, vec!["ben", "ann", "cat"]);
        }
        other => panic!("Expected PlayerList, got {:?}", other),
    }
    assert!(messages(&mut h.events).is_empty());

    // 2. Reactions are broadcast, empty ones dropped
    handle_message(
        ClientMessage::Reaction {
            emoji: "🎉".to_string(),
        },
        &"c2".to_string(),
        &h.state,
    )
    .await;
    handle_message(
        ClientMessage::Reaction {
            emoji: String::new(),
        },
        &"c2".to_string(),
        &h.state,
    )
    .await;
    match messages(&mut h.events).as_slice() {
        [ServerMessage::PeerReaction { username, emoji, .. }] => {
            assert_eq!(username, "ben");
            assert_eq!(emoji, "🎉");
        }
        other => panic!("Expected a single PeerReaction, got {:?}", other),
    }

    // 3. Repeated handshake is a no-op
    let reply = handle_message(
        ClientMessage::Authenticate {
            token: "tok-ann".to_string(),
        },
        &"c1".to_string(),
        &h.state,
    )
    .await;
    assert!(reply.is_none());
    let session = h.state.registry.session(&"c1".to_string()).await.unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    assert!(h.state.join(&"c1".to_string(), session.player, tx).await.is_none());
    assert!(messages(&mut h.events).is_empty());
    assert_eq!(h.state.registry.player_count().await, 3);
}

#[tokio::test]
async fn test_moderation_queue_excludes_live_entry() {
    let h = harness(test_config(), vec![Ok(candidate(5, "CAT", 30.0))]);
    h.state.request_new_entry().await;
    let (_, _, _rx) = connect(&h.state, &h.store, "c-alice", "alice", 0.0).await;

    // 1. Live entry reported, older entry already in the store
    h.state.report_entry(&"c-alice".to_string()).await;
    h.store
        .upsert_report(ReportRecord {
            id: "r9".to_string(),
            entry_id: 9,
            category: None,
            clue: "Old clue".to_string(),
            answer: "Old answer".to_string(),
            reporters: vec!["someone".to_string()],
            banned: false,
            last_reported_at: "2026-01-01T00:00:00+00:00".to_string(),
        })
        .await
        .unwrap();

    let queue = h.state.review_reports(None).await.unwrap();
    let ids: Vec<EntryId> = queue.iter().map(|r| r.entry_id).collect();
    assert_eq!(ids, vec![9]);

    // 2. Ban it and filter by flag
    h.state.reports.ban(&"r9".to_string()).await.unwrap();
    assert!(h.state.reports.is_banned(9).await);
    assert_eq!(h.state.review_reports(Some(false)).await.unwrap().len(), 0);
    assert_eq!(h.state.review_reports(Some(true)).await.unwrap().len(), 1);

    // 3. Dismiss removes the record
    h.state.reports.dismiss(&"r9".to_string()).await.unwrap();
    assert!(h.store.find_report(&"r9".to_string()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_account_operations() {
    let mut h = harness(test_config(), vec![]);
    let (alice, _, mut alice_rx) = connect(&h.state, &h.store, "c-alice", "alice", 3.0).await;
    let (bob, _, mut bob_rx) = connect(&h.state, &h.store, "c-bob", "bob", 0.0).await;
    drain(&mut h.events);

    // 1. Rights change reaches store and live session
    assert!(h.state.set_player_rights(&bob.id, Rights::Moderator).await.unwrap());
    assert!(!h
        .state
        .set_player_rights(&"unknown".to_string(), Rights::Admin)
        .await
        .unwrap());
    let session = h.state.registry.session(&"c-bob".to_string()).await.unwrap();
    assert_eq!(session.player.rights, Rights::Moderator);
    let stored = h.store.find_player(&bob.id).await.unwrap().unwrap();
    assert_eq!(stored.rights, Rights::Moderator);

    // 2. Deleting a player closes its connection and is not undone on disconnect
    assert!(h.state.delete_player(&alice.id).await.unwrap());
    assert!(matches!(alice_rx.try_recv(), Ok(Outbound::Close)));
    h.state.handle_disconnect(&"c-alice".to_string()).await;
    assert!(h.store.find_player(&alice.id).await.unwrap().is_none());
    assert!(matches!(
        messages(&mut h.events).as_slice(),
        [ServerMessage::PeerLeft { .. }]
    ));

    // 3. Disconnect everyone
    assert_eq!(h.state.disconnect_everyone().await, 1);
    assert!(matches!(bob_rx.try_recv(), Ok(Outbound::Close)));
}
