//! Session settings and their persistence.

use crate::error::{SessionError, SessionResult};
use crate::status::StatusLog;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// User-facing connection settings.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Address of the remote store.
    pub database_address: Option<String>,
    /// Remote user name.
    pub username: Option<String>,
    /// Remote password, also used as the document encryption password.
    pub password: Option<String>,
    /// Whether the session keeps reconnecting on its own.
    pub stay_connected: bool,
}

impl Settings {
    /// Creates empty settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the remote address.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.database_address = Some(address.into());
        self
    }

    /// Sets the remote credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Sets the stay-connected flag.
    pub fn with_stay_connected(mut self, stay_connected: bool) -> Self {
        self.stay_connected = stay_connected;
        self
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("database_address", &self.database_address)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("stay_connected", &self.stay_connected)
            .finish()
    }
}

/// Durable storage for [`Settings`].
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Loads the saved settings, `None` if nothing was saved.
    async fn load_settings(&self) -> SessionResult<Option<Settings>>;

    /// Saves the settings.
    async fn save_settings(&self, settings: &Settings) -> SessionResult<()>;

    /// Removes the saved settings.
    async fn clear_settings(&self) -> SessionResult<()>;
}

/// Durable storage for the [`StatusLog`].
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Loads the saved log, `None` if nothing was saved.
    async fn load_status(&self) -> SessionResult<Option<StatusLog>>;

    /// Saves the log.
    async fn save_status(&self, log: &StatusLog) -> SessionResult<()>;

    /// Removes the saved log.
    async fn clear_status(&self) -> SessionResult<()>;
}

/// In-memory settings and status storage.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<Option<Settings>>,
    status: Mutex<Option<StatusLog>>,
}

impl MemorySettingsStore {
    /// Creates empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates storage holding `settings`.
    pub fn with_settings(settings: Settings) -> Self {
        Self {
            settings: Mutex::new(Some(settings)),
            status: Mutex::new(None),
        }
    }

    /// Returns the saved settings.
    pub fn saved_settings(&self) -> Option<Settings> {
        self.settings.lock().clone()
    }

    /// Returns the saved log.
    pub fn saved_status(&self) -> Option<StatusLog> {
        self.status.lock().clone()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load_settings(&self) -> SessionResult<Option<Settings>> {
        Ok(self.saved_settings())
    }

    async fn save_settings(&self, settings: &Settings) -> SessionResult<()> {
        *self.settings.lock() = Some(settings.clone());
        Ok(())
    }

    async fn clear_settings(&self) -> SessionResult<()> {
        *self.settings.lock() = None;
        Ok(())
    }
}

#[async_trait]
impl StatusStore for MemorySettingsStore {
    async fn load_status(&self) -> SessionResult<Option<StatusLog>> {
        Ok(self.saved_status())
    }

    async fn save_status(&self, log: &StatusLog) -> SessionResult<()> {
        *self.status.lock() = Some(log.clone());
        Ok(())
    }

    async fn clear_status(&self) -> SessionResult<()> {
        *self.status.lock() = None;
        Ok(())
    }
}

/// Settings and status stored as JSON files in a directory.
///
/// Writes go to a temporary file that is then renamed over the target.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

const SETTINGS_FILE: &str = "settings.json";
const STATUS_FILE: &str = "status.json";

impl JsonFileStore {
    /// Creates a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn load<T: serde::de::DeserializeOwned>(&self, file: &str) -> SessionResult<Option<T>> {
        let path = self.dir.join(file);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| SessionError::persistence(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SessionError::persistence(format!("{}: {e}", path.display()))),
        }
    }

    async fn save<T: Serialize + Sync>(&self, file: &str, value: &T) -> SessionResult<()> {
        let bytes = serde_json::to_vec_pretty(value).map_err(SessionError::persistence)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(SessionError::persistence)?;

        let path = self.dir.join(file);
        let tmp = self.dir.join(format!("{file}.tmp"));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(SessionError::persistence)?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(SessionError::persistence)
    }

    async fn remove(&self, file: &str) -> SessionResult<()> {
        match tokio::fs::remove_file(self.dir.join(file)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::persistence(e)),
        }
    }
}

#[async_trait]
impl SettingsStore for JsonFileStore {
    async fn load_settings(&self) -> SessionResult<Option<Settings>> {
        self.load(SETTINGS_FILE).await
    }

    async fn save_settings(&self, settings: &Settings) -> SessionResult<()> {
        self.save(SETTINGS_FILE, settings).await
    }

    async fn clear_settings(&self) -> SessionResult<()> {
        self.remove(SETTINGS_FILE).await
    }
}

#[async_trait]
impl StatusStore for JsonFileStore {
    async fn load_status(&self) -> SessionResult<Option<StatusLog>> {
        self.load(STATUS_FILE).await
    }

    async fn save_status(&self, log: &StatusLog) -> SessionResult<()> {
        self.save(STATUS_FILE, log).await
    }

    async fn clear_status(&self) -> SessionResult<()> {
        self.remove(STATUS_FILE).await
    }
}
