//! The sync session controller.
//!
//! All session state lives in one actor task. Public calls on
//! [`SessionController`] are messages with a oneshot reply; timers,
//! replication links, the change tracker and the publish gate report back
//! through the same inbox, so every state transition happens in one place
//! and in arrival order.

use crate::backoff::RetrySchedule;
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::link::{Direction, LinkEvent, LinkPair};
use crate::publish::{PublishAction, PublishEvent, PublishGate};
use crate::settings::{Settings, SettingsStore, StatusStore};
use crate::status::{EventName, EventStream, SessionState, SessionStatus, StatusLog};
use crate::timer::DebouncedTimer;
use crate::tracker::{ChangeTracker, TrackerEvent};
use chrono::{DateTime, Utc};
use docsync_document::{DocumentTransform, EncryptionHook, PasswordCell, PasswordCipher};
use docsync_store::{ChangeEvent, DocumentStore, ReplicationEvent, StoreProvider};
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

type Reply<T> = oneshot::Sender<T>;

enum Message {
    GetSettings(Reply<Settings>),
    SetSettings {
        settings: Settings,
        persist: bool,
        reply: Reply<SessionResult<()>>,
    },
    Connect(Reply<SessionResult<()>>),
    Disconnect(Reply<()>),
    Logoff(Reply<SessionResult<()>>),
    Publish {
        action: PublishAction,
        reply: Reply<SessionResult<()>>,
    },
    Reset(Reply<SessionResult<()>>),
    State(Reply<SessionState>),
    Log(Reply<StatusLog>),
    Shutdown(Reply<()>),
    /// Every handle was dropped.
    Stop,

    RetryTick(u64),
    StatusTick {
        token: u64,
        status: SessionStatus,
    },
    Link(LinkEvent),
    Tracker(TrackerEvent),
    IncrementLocalChanges,
    Publisher(PublishEvent),
}

struct Handle {
    inbox: UnboundedSender<Message>,
}

impl Drop for Handle {
    fn drop(&mut self) {
        let _ = self.inbox.send(Message::Stop);
    }
}

/// Handle to a running sync session.
///
/// Cloning is cheap. The session stops when [`shutdown`](Self::shutdown) is
/// called or the last handle is dropped.
#[derive(Clone)]
pub struct SessionController {
    handle: Arc<Handle>,
}

impl SessionController {
    /// Opens the local store, loads persisted settings and status, starts
    /// tracking local changes and, if the settings ask for it, schedules the
    /// first connection attempt.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn initialize(
        config: SessionConfig,
        provider: Arc<dyn StoreProvider>,
        settings_store: Arc<dyn SettingsStore>,
        status_store: Arc<dyn StatusStore>,
    ) -> SessionResult<Self> {
        let (inbox, rx) = mpsc::unbounded_channel();
        let actor =
            SessionActor::start(config, provider, settings_store, status_store, inbox.clone())
                .await?;
        tokio::spawn(actor.run(rx));
        Ok(Self {
            handle: Arc::new(Handle { inbox }),
        })
    }

    async fn request<T>(&self, message: impl FnOnce(Reply<T>) -> Message) -> SessionResult<T> {
        let (tx, rx) = oneshot::channel();
        self.handle
            .inbox
            .send(message(tx))
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Returns the current settings.
    pub async fn settings(&self) -> SessionResult<Settings> {
        self.request(Message::GetSettings).await
    }

    /// Replaces the settings without persisting them and restarts the
    /// reconnection backoff.
    pub async fn set_settings(&self, settings: Settings) -> SessionResult<()> {
        self.request(|reply| Message::SetSettings {
            settings,
            persist: false,
            reply,
        })
        .await?
    }

    /// Replaces and persists the settings and restarts the reconnection
    /// backoff.
    pub async fn save_settings(&self, settings: Settings) -> SessionResult<()> {
        self.request(|reply| Message::SetSettings {
            settings,
            persist: true,
            reply,
        })
        .await?
    }

    /// Connects to the remote and starts both replication links.
    pub async fn connect(&self) -> SessionResult<()> {
        self.request(Message::Connect).await?
    }

    /// Stops both replication links.
    pub async fn disconnect(&self) -> SessionResult<()> {
        self.request(Message::Disconnect).await
    }

    /// Stops reconnecting, disconnects and logs out of the remote.
    pub async fn logoff(&self) -> SessionResult<()> {
        self.request(Message::Logoff).await?
    }

    /// Runs `action` now and again after every local change, never
    /// overlapping. Replaces any previously published action.
    pub async fn publish(&self, action: PublishAction) -> SessionResult<()> {
        self.request(|reply| Message::Publish { action, reply })
            .await?
    }

    /// Destroys the local store, clears the persisted status and starts
    /// over.
    pub async fn reset(&self) -> SessionResult<()> {
        self.request(Message::Reset).await?
    }

    /// Returns the current status.
    pub async fn current_status(&self) -> SessionResult<SessionStatus> {
        Ok(self.session_state().await?.status)
    }

    /// Returns the title of the current status.
    pub async fn current_status_label(&self) -> SessionResult<&'static str> {
        Ok(self.current_status().await?.label())
    }

    /// Returns the number of local changes not yet confirmed pushed.
    pub async fn pending_local_change_count(&self) -> SessionResult<u64> {
        Ok(self.status_log().await?.local_change_count)
    }

    /// Returns a snapshot of the session state.
    pub async fn session_state(&self) -> SessionResult<SessionState> {
        self.request(Message::State).await
    }

    /// Returns a snapshot of the status log.
    pub async fn status_log(&self) -> SessionResult<StatusLog> {
        self.request(Message::Log).await
    }

    /// Stops every link, timer and subscription and ends the session.
    pub async fn shutdown(&self) -> SessionResult<()> {
        self.request(Message::Shutdown).await
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("running", &!self.handle.inbox.is_closed())
            .finish()
    }
}

struct SessionActor {
    config: SessionConfig,
    provider: Arc<dyn StoreProvider>,
    settings_store: Arc<dyn SettingsStore>,
    status_store: Arc<dyn StatusStore>,
    inbox: UnboundedSender<Message>,

    settings: Settings,
    password: PasswordCell,
    transform: Arc<DocumentTransform<PasswordCipher>>,
    local: Arc<dyn DocumentStore>,
    remote: Option<Arc<dyn DocumentStore>>,

    status: SessionStatus,
    docs_sent: u64,
    docs_received: u64,
    last_connection_attempt: Option<DateTime<Utc>>,
    schedule: RetrySchedule,
    log: StatusLog,

    retry_timer: DebouncedTimer<Message>,
    status_timer: DebouncedTimer<Message>,
    links: LinkPair<Message>,
    tracker: ChangeTracker<Message>,
    gate: PublishGate<Message>,
}

impl SessionActor {
    async fn start(
        config: SessionConfig,
        provider: Arc<dyn StoreProvider>,
        settings_store: Arc<dyn SettingsStore>,
        status_store: Arc<dyn StatusStore>,
        inbox: UnboundedSender<Message>,
    ) -> SessionResult<Self> {
        let settings = settings_store.load_settings().await?.unwrap_or_default();
        let log = status_store.load_status().await?.unwrap_or_default();
        let password = PasswordCell::new(settings.password.clone());
        let transform = Arc::new(DocumentTransform::new(PasswordCipher::new()));
        let local = provider.open_local(&config.local_name).await?;

        let mut actor = Self {
            schedule: RetrySchedule::new(&config.retry),
            retry_timer: DebouncedTimer::new(inbox.clone()),
            status_timer: DebouncedTimer::new(inbox.clone()),
            links: LinkPair::new(inbox.clone(), Message::Link),
            tracker: ChangeTracker::new(inbox.clone(), Message::Tracker),
            gate: PublishGate::new(inbox.clone(), Message::Publisher),
            config,
            provider,
            settings_store,
            status_store,
            inbox,
            settings,
            password,
            transform,
            local,
            remote: None,
            status: SessionStatus::Offline,
            docs_sent: 0,
            docs_received: 0,
            last_connection_attempt: None,
            log,
        };
        actor.prepare_local().await?;

        info!(
            local = %actor.config.local_name,
            stay_connected = actor.settings.stay_connected,
            "session initialized"
        );
        Ok(actor)
    }

    /// Installs the local transform, tracks local changes and starts the
    /// backoff from its base delay.
    async fn prepare_local(&mut self) -> SessionResult<()> {
        self.local.register_transform(Arc::new(EncryptionHook::local(
            Arc::clone(&self.transform),
            self.password.clone(),
        )));
        self.tracker.track(&self.local).await?;
        self.init_robust_sync(self.config.retry.base_delay);
        Ok(())
    }

    async fn run(mut self, mut inbox: UnboundedReceiver<Message>) {
        while let Some(message) = inbox.recv().await {
            if self.handle(message).await.is_break() {
                break;
            }
        }
        self.teardown();
        debug!("session controller stopped");
    }

    async fn handle(&mut self, message: Message) -> ControlFlow<()> {
        match message {
            Message::GetSettings(reply) => {
                let _ = reply.send(self.settings.clone());
            }
            Message::SetSettings {
                settings,
                persist,
                reply,
            } => {
                let result = self.set_settings(settings, persist).await;
                let _ = reply.send(result);
            }
            Message::Connect(reply) => {
                let result = self.connect().await;
                let _ = reply.send(result);
            }
            Message::Disconnect(reply) => {
                self.disconnect();
                let _ = reply.send(());
            }
            Message::Logoff(reply) => {
                let result = self.logoff().await;
                let _ = reply.send(result);
            }
            Message::Publish { action, reply } => {
                let result = self.gate.publish(action, &self.local).await;
                let _ = reply.send(result);
            }
            Message::Reset(reply) => {
                let result = self.reset().await;
                let _ = reply.send(result);
            }
            Message::State(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Message::Log(reply) => {
                let _ = reply.send(self.log.clone());
            }
            Message::Shutdown(reply) => {
                self.teardown();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
            Message::Stop => return ControlFlow::Break(()),

            Message::RetryTick(token) => {
                if self.retry_timer.fired(token) {
                    self.progressive_retry();
                    self.attempt_connection().await;
                }
            }
            Message::StatusTick { token, status } => {
                if self.status_timer.fired(token) {
                    debug!(status = %status, "status settled");
                    self.status = status;
                }
            }
            Message::Link(event) => self.on_link_event(event).await,
            Message::Tracker(event) => self.on_tracker_event(event).await,
            Message::IncrementLocalChanges => {
                self.log.increment_local_changes();
                self.persist_status().await;
            }
            Message::Publisher(PublishEvent::Trigger { generation }) => {
                if !self.gate.trigger(generation) {
                    debug!(generation, "publish trigger dropped");
                }
            }
            Message::Publisher(PublishEvent::Settled { run, result }) => {
                self.gate.settle(run, result);
            }
        }
        ControlFlow::Continue(())
    }

    fn snapshot(&self) -> SessionState {
        SessionState {
            status: self.status,
            docs_sent: self.docs_sent,
            docs_received: self.docs_received,
            current_retry_delay: self.schedule.current(),
            max_retry_delay: self.schedule.max(),
            retry_delay_increment: self.schedule.increment(),
            last_connection_attempt: self.last_connection_attempt,
            publish_in_progress: self.gate.in_progress(),
            live_links: self.links.len(),
        }
    }

    // Status

    fn set_status(&mut self, status: SessionStatus) {
        self.status_timer.cancel();
        if self.status != status {
            debug!(from = %self.status, to = %status, "status changed");
        }
        self.status = status;
    }

    fn delay_status(&mut self, delay: Duration, status: SessionStatus) {
        self.status_timer
            .schedule(delay, move |token| Message::StatusTick { token, status });
    }

    fn flash_status(&mut self, status: SessionStatus) {
        let prior = self.status;
        self.set_status(status);
        self.delay_status(self.config.flash_duration, prior);
    }

    // Backoff

    fn init_robust_sync(&mut self, delay: Duration) {
        self.schedule.reset(delay);
        self.retry_timer.cancel();
        if self.settings.stay_connected {
            self.progressive_retry();
        }
    }

    fn progressive_retry(&mut self) {
        let delay = self.schedule.advance();
        self.retry_timer.schedule(delay, Message::RetryTick);
        debug!(delay_ms = delay.as_millis() as u64, "connection attempt scheduled");
    }

    fn max_out_progressive_delay(&mut self) {
        self.init_robust_sync(self.schedule.max());
    }

    fn restart_progressive_delay(&mut self) {
        if !matches!(
            self.status,
            SessionStatus::Connecting | SessionStatus::Offline
        ) {
            self.init_robust_sync(self.config.retry.base_delay);
        }
    }

    // Connection

    async fn attempt_connection(&mut self) {
        self.last_connection_attempt = Some(Utc::now());
        self.flash_status(SessionStatus::Connecting);
        if let Err(e) = self.connect().await {
            debug!(error = %e, "connection attempt failed");
        }
    }

    async fn connect(&mut self) -> SessionResult<()> {
        self.docs_sent = 0;
        self.docs_received = 0;
        self.disconnect();

        let remote = match self.create_remote_db().await {
            Ok(remote) => remote,
            Err(e) => {
                if e.is_retryable() {
                    warn!(error = %e, "remote connection failed");
                    self.restart_progressive_delay();
                    self.delay_status(self.config.settle_delay, SessionStatus::Offline);
                }
                return Err(e);
            }
        };

        info!(remote = remote.name(), "starting replication");
        self.links
            .start(Direction::Push, Arc::clone(&self.local), Arc::clone(&remote));
        self.links
            .start(Direction::Pull, Arc::clone(&self.local), remote);
        Ok(())
    }

    async fn create_remote_db(&mut self) -> SessionResult<Arc<dyn DocumentStore>> {
        let address = self
            .settings
            .database_address
            .clone()
            .filter(|address| !address.trim().is_empty())
            .ok_or_else(|| SessionError::configuration("no database address configured"))?;

        let remote = self
            .provider
            .open_remote(&address)
            .await
            .map_err(SessionError::connection)?;

        if let (Some(username), Some(password)) = (&self.settings.username, &self.settings.password)
        {
            let session = remote
                .login(username, password)
                .await
                .map_err(SessionError::connection)?;
            debug!(user = %session.name, remote = %address, "logged in");
        }

        remote.register_transform(Arc::new(EncryptionHook::remote(
            Arc::clone(&self.transform),
            self.password.clone(),
        )));
        self.remote = Some(Arc::clone(&remote));
        Ok(remote)
    }

    fn disconnect(&mut self) {
        if !self.links.is_empty() {
            debug!(links = self.links.len(), "disconnecting");
        }
        self.links.cancel_all();
    }

    async fn logoff(&mut self) -> SessionResult<()> {
        self.settings.stay_connected = false;
        if let Err(e) = self.settings_store.save_settings(&self.settings).await {
            warn!(error = %e, "failed to persist settings");
        }
        self.retry_timer.cancel();
        self.disconnect();
        self.delay_status(self.config.settle_delay, SessionStatus::Offline);

        match self.remote.take() {
            Some(remote) => {
                remote.logout().await.map_err(SessionError::connection)?;
                info!(remote = remote.name(), "logged off");
                Ok(())
            }
            None => Ok(()),
        }
    }

    // Settings and lifecycle

    async fn set_settings(&mut self, settings: Settings, persist: bool) -> SessionResult<()> {
        self.password.set(settings.password.clone());
        self.settings = settings;
        let result = if persist {
            self.settings_store.save_settings(&self.settings).await
        } else {
            Ok(())
        };
        self.init_robust_sync(self.config.retry.base_delay);
        result
    }

    async fn reset(&mut self) -> SessionResult<()> {
        self.teardown();
        self.remote = None;

        self.local.destroy().await?;
        self.status_store.clear_status().await?;

        self.settings = self
            .settings_store
            .load_settings()
            .await?
            .unwrap_or_default();
        self.password.set(self.settings.password.clone());
        self.log = StatusLog::default();
        self.status = SessionStatus::Offline;
        self.docs_sent = 0;
        self.docs_received = 0;
        self.last_connection_attempt = None;
        self.schedule = RetrySchedule::new(&self.config.retry);

        self.local = self.provider.open_local(&self.config.local_name).await?;
        self.prepare_local().await?;
        info!(local = %self.config.local_name, "session reset");
        Ok(())
    }

    fn teardown(&mut self) {
        self.disconnect();
        self.retry_timer.cancel();
        self.status_timer.cancel();
        self.tracker.stop();
        self.gate.stop();
    }

    // Events

    async fn on_link_event(&mut self, link: LinkEvent) {
        let LinkEvent {
            direction,
            generation,
            event,
        } = link;
        if !self.links.is_current(direction, generation) {
            debug!(direction = direction.as_str(), generation, "event from cancelled link ignored");
            return;
        }

        let stream = match direction {
            Direction::Push => EventStream::ReplicationTo,
            Direction::Pull => EventStream::ReplicationFrom,
        };
        let now = Utc::now();

        match event {
            ReplicationEvent::Change(info) => {
                self.log.record(stream, EventName::Change, payload(&info), now);
                self.max_out_progressive_delay();
                match direction {
                    Direction::Push if info.docs_written > self.docs_sent => {
                        self.docs_sent = info.docs_written;
                        self.set_status(SessionStatus::Sending);
                    }
                    Direction::Pull if info.docs_written > self.docs_received => {
                        self.docs_received = info.docs_written;
                        self.set_status(SessionStatus::Receiving);
                    }
                    _ => {}
                }
            }
            ReplicationEvent::UpToDate(info) => {
                self.log.record(stream, EventName::UpToDate, payload(&info), now);
                self.max_out_progressive_delay();
                if direction == Direction::Push {
                    self.log.reset_local_changes();
                }
                self.delay_status(self.config.settle_delay, SessionStatus::Idle);
            }
            ReplicationEvent::Error(message) => {
                warn!(direction = direction.as_str(), error = %message, "replication failed");
                self.log.record(stream, EventName::Error, payload(&message), now);
                self.links.finish(direction, generation);
                self.restart_progressive_delay();
                self.delay_status(self.config.settle_delay, SessionStatus::Offline);
            }
            ReplicationEvent::Complete(info) => {
                debug!(direction = direction.as_str(), "replication complete");
                self.log.record(stream, EventName::Complete, payload(&info), now);
                self.links.finish(direction, generation);
            }
        }
        self.persist_status().await;
    }

    async fn on_tracker_event(&mut self, tracked: TrackerEvent) {
        if !self.tracker.is_current(tracked.generation) {
            return;
        }
        let now = Utc::now();
        let stream = EventStream::LocalChanges;

        match tracked.event {
            ChangeEvent::Change(record) => {
                self.log.record(stream, EventName::Change, payload(&record), now);
                // Counted on a later turn of the inbox
                let _ = self.inbox.send(Message::IncrementLocalChanges);
            }
            ChangeEvent::Error(message) => {
                warn!(error = %message, "local change feed failed");
                self.log.record(stream, EventName::Error, payload(&message), now);
            }
            ChangeEvent::Complete => {
                debug!("local change feed complete");
                self.log
                    .record(stream, EventName::Complete, serde_json::Value::Null, now);
            }
        }
        self.persist_status().await;
    }

    async fn persist_status(&self) {
        if let Err(e) = self.status_store.save_status(&self.log).await {
            warn!(error = %e, "failed to persist status");
        }
    }
}

fn payload<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}
