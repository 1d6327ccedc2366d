//! End-to-end tests of the session controller against in-memory stores.
//!
//! Timer behavior runs on a paused clock: `sleep` only returns once every
//! runnable task has settled, so each check sees the state after all
//! messages up to that instant were handled.

use docsync_document::{Document, Value};
use docsync_session::{
    publish_action, EventName, EventStream, MemorySettingsStore, PublishError, RetryConfig,
    SessionConfig, SessionController, SessionError, SessionStatus, Settings, StatusLog,
};
use docsync_store::{DocumentStore, MemoryProvider, MemoryStore, StoreError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep;

const REMOTE: &str = "http://remote/db";

struct Harness {
    controller: SessionController,
    provider: Arc<MemoryProvider>,
    remote: Arc<MemoryStore>,
    stores: Arc<MemorySettingsStore>,
}

impl Harness {
    async fn new(config: SessionConfig, settings: Settings) -> Self {
        Self::with_stores(config, Arc::new(MemorySettingsStore::with_settings(settings))).await
    }

    async fn with_stores(config: SessionConfig, stores: Arc<MemorySettingsStore>) -> Self {
        let provider = Arc::new(MemoryProvider::new());
        let remote = Arc::new(MemoryStore::new(REMOTE).with_user("alice", "pw"));
        provider.add_remote(REMOTE, remote.clone());

        let controller =
            SessionController::initialize(config, provider.clone(), stores.clone(), stores.clone())
                .await
                .unwrap();

        Self {
            controller,
            provider,
            remote,
            stores,
        }
    }

    fn local(&self) -> Arc<MemoryStore> {
        self.provider.local("LocalDB").unwrap()
    }
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn connected_settings() -> Settings {
    Settings::new()
        .with_address(REMOTE)
        .with_credentials("alice", "pw")
}

fn note(id: &str, text: &str) -> Document {
    Document::with_id(id)
        .field("encrypted", false)
        .field("text", text)
}

/// A document the local hook leaves alone when no password is set.
fn unflagged(id: &str) -> Document {
    Document::with_id(id).field("text", id)
}

/// Lets every runnable task finish its work.
async fn settle() {
    sleep(ms(1)).await;
}

#[tokio::test(start_paused = true)]
async fn backoff_grows_by_increment_while_unreachable() {
    let config = SessionConfig::default().with_retry(RetryConfig::new().with_base_delay(ms(10)));
    let settings = Settings::new()
        .with_address("http://nowhere/db")
        .with_stay_connected(true);
    let h = Harness::new(config, settings).await;

    assert_eq!(h.controller.session_state().await.unwrap().current_retry_delay, ms(1010));

    sleep(ms(1011)).await;
    let state = h.controller.session_state().await.unwrap();
    assert_eq!(state.current_retry_delay, ms(2010));
    assert_eq!(state.status, SessionStatus::Connecting);
    assert!(state.last_connection_attempt.is_some());
    assert_eq!(state.live_links, 0);

    sleep(ms(800)).await;
    assert_eq!(h.controller.current_status().await.unwrap(), SessionStatus::Offline);

    sleep(ms(1210)).await;
    assert_eq!(h.controller.session_state().await.unwrap().current_retry_delay, ms(3010));
}

#[tokio::test(start_paused = true)]
async fn scheduled_attempt_connects_and_settles_idle() {
    let h = Harness::new(
        SessionConfig::default(),
        connected_settings().with_stay_connected(true),
    )
    .await;
    assert_eq!(h.controller.session_state().await.unwrap().current_retry_delay, ms(2000));

    sleep(ms(2001)).await;
    let state = h.controller.session_state().await.unwrap();
    assert_eq!(state.live_links, 2);
    assert_eq!(state.status, SessionStatus::Connecting);
    assert_eq!(state.current_retry_delay, state.max_retry_delay);
    assert_eq!(h.remote.session().map(|s| s.name), Some("alice".to_string()));

    sleep(ms(800)).await;
    assert_eq!(h.controller.current_status().await.unwrap(), SessionStatus::Idle);
    assert_eq!(h.controller.current_status_label().await.unwrap(), "Connected");
}

#[tokio::test(start_paused = true)]
async fn up_to_date_maxes_delay_and_goes_idle_after_settle() {
    let h = Harness::new(SessionConfig::default(), connected_settings()).await;
    h.controller.connect().await.unwrap();
    settle().await;

    let state = h.controller.session_state().await.unwrap();
    assert_eq!(state.live_links, 2);
    assert_eq!(state.current_retry_delay, Duration::from_secs(600));
    assert_eq!(state.status, SessionStatus::Offline);

    let log = h.controller.status_log().await.unwrap();
    assert!(log.last(EventStream::ReplicationTo, EventName::UpToDate).is_some());
    assert!(log.last(EventStream::ReplicationFrom, EventName::UpToDate).is_some());

    sleep(ms(800)).await;
    assert_eq!(h.controller.current_status().await.unwrap(), SessionStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn local_write_is_sent_encrypted() {
    let h = Harness::new(SessionConfig::default(), connected_settings()).await;
    h.controller.connect().await.unwrap();
    settle().await;

    h.local().put(note("n1", "meet at noon")).await.unwrap();
    settle().await;

    let state = h.controller.session_state().await.unwrap();
    assert_eq!(state.docs_sent, 1);
    assert_eq!(state.docs_received, 0);
    assert_eq!(state.status, SessionStatus::Sending);
    assert_eq!(h.controller.current_status_label().await.unwrap(), "Sending Data");

    let at_rest = h.remote.get_raw("n1").unwrap();
    assert_eq!(at_rest.encrypted(), Some(true));
    assert_ne!(at_rest.get("text"), Some(&Value::from("meet at noon")));

    sleep(ms(800)).await;
    assert_eq!(h.controller.current_status().await.unwrap(), SessionStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn remote_write_is_received_and_readable() {
    let h = Harness::new(SessionConfig::default(), connected_settings()).await;
    h.controller.connect().await.unwrap();
    settle().await;

    h.remote.put(note("r1", "from the server")).await.unwrap();
    settle().await;

    let state = h.controller.session_state().await.unwrap();
    assert_eq!(state.docs_received, 1);
    assert_eq!(state.status, SessionStatus::Receiving);

    let read = h.local().get("r1").await.unwrap().unwrap();
    assert_eq!(read.encrypted(), Some(false));
    assert_eq!(read.get("text"), Some(&Value::from("from the server")));
}

#[tokio::test(start_paused = true)]
async fn counters_reset_on_connect() {
    let h = Harness::new(SessionConfig::default(), connected_settings()).await;
    h.controller.connect().await.unwrap();
    settle().await;
    h.local().put(note("n1", "a")).await.unwrap();
    settle().await;
    assert_eq!(h.controller.session_state().await.unwrap().docs_sent, 1);

    h.controller.connect().await.unwrap();
    let state = h.controller.session_state().await.unwrap();
    assert_eq!(state.docs_sent, 0);
    assert_eq!(state.docs_received, 0);
}

#[tokio::test(start_paused = true)]
async fn connecting_flash_reverts_to_prior_status() {
    let h = Harness::new(SessionConfig::default(), connected_settings()).await;
    h.controller.connect().await.unwrap();
    sleep(ms(900)).await;
    assert_eq!(h.controller.current_status().await.unwrap(), SessionStatus::Idle);

    // No address: the scheduled attempt fails without touching the status
    h.controller
        .set_settings(Settings::new().with_stay_connected(true))
        .await
        .unwrap();
    sleep(ms(2001)).await;
    let state = h.controller.session_state().await.unwrap();
    assert_eq!(state.status, SessionStatus::Connecting);
    assert!(state.last_connection_attempt.is_some());
    assert_eq!(state.live_links, 0);

    sleep(ms(1998)).await;
    assert_eq!(h.controller.current_status().await.unwrap(), SessionStatus::Connecting);

    sleep(ms(2)).await;
    assert_eq!(h.controller.current_status().await.unwrap(), SessionStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn pull_up_to_date_keeps_local_change_count() {
    let h = Harness::new(SessionConfig::default(), connected_settings()).await;
    h.local().put(note("a", "1")).await.unwrap();
    h.local().put(note("b", "2")).await.unwrap();
    settle().await;
    assert_eq!(h.controller.pending_local_change_count().await.unwrap(), 2);

    // Local documents were sealed with another password, so push fails
    let mut settings = Settings::new().with_address(REMOTE);
    settings.password = Some("other".to_string());
    h.controller.set_settings(settings).await.unwrap();
    h.controller.connect().await.unwrap();
    settle().await;

    let log = h.controller.status_log().await.unwrap();
    assert!(log.last(EventStream::ReplicationFrom, EventName::UpToDate).is_some());
    assert!(log.last(EventStream::ReplicationTo, EventName::Error).is_some());
    assert!(log.last(EventStream::ReplicationTo, EventName::UpToDate).is_none());
    assert_eq!(log.local_change_count, 2);
    assert_eq!(h.stores.saved_status().unwrap().local_change_count, 2);
    assert_eq!(h.controller.session_state().await.unwrap().live_links, 1);
}

#[tokio::test(start_paused = true)]
async fn replication_complete_is_logged_without_status_change() {
    let h = Harness::new(SessionConfig::default(), connected_settings()).await;
    h.controller.connect().await.unwrap();
    sleep(ms(900)).await;
    assert_eq!(h.controller.current_status().await.unwrap(), SessionStatus::Idle);

    h.remote.destroy().await.unwrap();
    settle().await;

    let log = h.controller.status_log().await.unwrap();
    assert!(log.last(EventStream::ReplicationFrom, EventName::Complete).is_some());
    let state = h.controller.session_state().await.unwrap();
    assert_eq!(state.status, SessionStatus::Idle);
    assert_eq!(state.live_links, 1);

    sleep(ms(2500)).await;
    assert_eq!(h.controller.current_status().await.unwrap(), SessionStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn local_changes_count_until_pushed() {
    let h = Harness::new(SessionConfig::default(), connected_settings()).await;

    h.local().put(note("a", "1")).await.unwrap();
    h.local().put(note("b", "2")).await.unwrap();
    settle().await;
    assert_eq!(h.controller.pending_local_change_count().await.unwrap(), 2);
    assert_eq!(h.stores.saved_status().unwrap().local_change_count, 2);

    h.controller.connect().await.unwrap();
    settle().await;
    assert_eq!(h.controller.pending_local_change_count().await.unwrap(), 0);
    assert_eq!(h.remote.info().await.unwrap().doc_count, 2);
}

#[tokio::test(start_paused = true)]
async fn replication_error_restarts_backoff_and_goes_offline() {
    let h = Harness::new(SessionConfig::default(), connected_settings()).await;
    h.controller.connect().await.unwrap();
    sleep(ms(900)).await;
    assert_eq!(h.controller.current_status().await.unwrap(), SessionStatus::Idle);

    h.remote.set_online(false);
    settle().await;

    let state = h.controller.session_state().await.unwrap();
    assert_eq!(state.current_retry_delay, ms(1000));
    assert_eq!(state.live_links, 1);
    let log = h.controller.status_log().await.unwrap();
    assert!(log.last(EventStream::ReplicationFrom, EventName::Error).is_some());

    sleep(ms(800)).await;
    assert_eq!(h.controller.current_status().await.unwrap(), SessionStatus::Offline);
    assert_eq!(h.controller.current_status_label().await.unwrap(), "Not connected");
}

#[tokio::test(start_paused = true)]
async fn publish_never_overlaps() {
    let h = Harness::new(SessionConfig::default(), Settings::new()).await;
    let runs = Arc::new(AtomicUsize::new(0));
    let release = Arc::new(Notify::new());

    let action = {
        let runs = runs.clone();
        let release = release.clone();
        publish_action(move || {
            let runs = runs.clone();
            let release = release.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                release.notified().await;
                Ok::<(), PublishError>(())
            }
        })
    };

    h.controller.publish(action).await.unwrap();
    settle().await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(h.controller.session_state().await.unwrap().publish_in_progress);

    h.local().put(unflagged("a")).await.unwrap();
    h.local().put(unflagged("b")).await.unwrap();
    settle().await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    release.notify_one();
    settle().await;
    assert!(!h.controller.session_state().await.unwrap().publish_in_progress);

    h.local().put(unflagged("c")).await.unwrap();
    settle().await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn republishing_while_pending_keeps_one_run_in_flight() {
    let h = Harness::new(SessionConfig::default(), Settings::new()).await;
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));
    let release = Arc::new(Notify::new());

    let make = || {
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        let runs = runs.clone();
        let release = release.clone();
        publish_action(move || {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            let runs = runs.clone();
            let release = release.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                release.notified().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<(), PublishError>(())
            }
        })
    };

    h.controller.publish(make()).await.unwrap();
    h.controller.publish(make()).await.unwrap();
    settle().await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert!(h.controller.session_state().await.unwrap().publish_in_progress);

    release.notify_one();
    settle().await;
    assert!(!h.controller.session_state().await.unwrap().publish_in_progress);

    // The replacement runs on the next local change
    h.local().put(unflagged("a")).await.unwrap();
    settle().await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    release.notify_one();
}

#[tokio::test(start_paused = true)]
async fn reset_starts_over() {
    let h = Harness::new(SessionConfig::default(), connected_settings()).await;
    h.controller.connect().await.unwrap();
    sleep(ms(900)).await;
    let before = h.local();
    before.put(note("a", "1")).await.unwrap();
    settle().await;

    h.controller.reset().await.unwrap();

    let state = h.controller.session_state().await.unwrap();
    assert_eq!(state.status, SessionStatus::Offline);
    assert_eq!(state.live_links, 0);
    assert_eq!(h.controller.pending_local_change_count().await.unwrap(), 0);
    assert_eq!(h.stores.saved_status(), None);

    assert!(before.is_destroyed());
    let after = h.local();
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(after.info().await.unwrap().doc_count, 0);

    // The new local store is tracked
    after.put(note("b", "2")).await.unwrap();
    settle().await;
    assert_eq!(h.controller.pending_local_change_count().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_without_address_is_a_configuration_error() {
    let h = Harness::new(SessionConfig::default(), Settings::new()).await;
    let err = h.controller.connect().await.unwrap_err();
    assert!(matches!(err, SessionError::Configuration(_)));
    assert!(!err.is_retryable());
    assert_eq!(h.controller.session_state().await.unwrap().live_links, 0);
}

#[tokio::test(start_paused = true)]
async fn rejected_credentials_are_a_connection_error() {
    let settings = Settings::new()
        .with_address(REMOTE)
        .with_credentials("alice", "wrong");
    let h = Harness::new(SessionConfig::default(), settings).await;

    let err = h.controller.connect().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Connection(StoreError::Unauthorized(_))
    ));
    assert!(err.is_retryable());
    assert_eq!(h.controller.session_state().await.unwrap().live_links, 0);
}

#[tokio::test(start_paused = true)]
async fn logoff_disconnects_and_stops_reconnecting() {
    let h = Harness::new(
        SessionConfig::default(),
        connected_settings().with_stay_connected(true),
    )
    .await;
    h.controller.connect().await.unwrap();
    sleep(ms(900)).await;
    assert!(h.remote.session().is_some());

    h.controller.logoff().await.unwrap();
    assert!(h.remote.session().is_none());
    assert!(!h.stores.saved_settings().unwrap().stay_connected);
    assert!(!h.controller.settings().await.unwrap().stay_connected);
    assert_eq!(h.controller.session_state().await.unwrap().live_links, 0);

    sleep(ms(800)).await;
    assert_eq!(h.controller.current_status().await.unwrap(), SessionStatus::Offline);

    // No reconnection is scheduled
    sleep(Duration::from_secs(700)).await;
    assert_eq!(h.controller.session_state().await.unwrap().live_links, 0);
}

#[tokio::test(start_paused = true)]
async fn save_settings_persists_and_set_settings_does_not() {
    let h = Harness::new(SessionConfig::default(), Settings::new()).await;

    let transient = connected_settings();
    h.controller.set_settings(transient.clone()).await.unwrap();
    assert_eq!(h.controller.settings().await.unwrap(), transient);
    assert_eq!(h.stores.saved_settings(), Some(Settings::new()));

    let durable = connected_settings().with_stay_connected(true);
    h.controller.save_settings(durable.clone()).await.unwrap();
    assert_eq!(h.stores.saved_settings(), Some(durable));
    assert_eq!(h.controller.session_state().await.unwrap().current_retry_delay, ms(2000));
}

#[tokio::test(start_paused = true)]
async fn persisted_status_is_restored() {
    let mut log = StatusLog::default();
    for _ in 0..5 {
        log.increment_local_changes();
    }
    let stores = Arc::new(MemorySettingsStore::with_settings(Settings::new()));
    docsync_session::StatusStore::save_status(stores.as_ref(), &log)
        .await
        .unwrap();

    let h = Harness::with_stores(SessionConfig::default(), stores).await;
    assert_eq!(h.controller.pending_local_change_count().await.unwrap(), 5);
}

#[tokio::test(start_paused = true)]
async fn calls_fail_after_shutdown() {
    let h = Harness::new(SessionConfig::default(), Settings::new()).await;
    h.controller.shutdown().await.unwrap();
    assert_eq!(h.controller.session_state().await.unwrap_err(), SessionError::Closed);
}
