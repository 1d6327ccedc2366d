//! Settings command implementation.

use docsync_session::{JsonFileStore, Settings, SettingsStore};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Fields to overwrite in the saved settings.
#[derive(Debug, Default)]
pub struct Update {
    /// New remote address.
    pub address: Option<String>,
    /// New login name.
    pub username: Option<String>,
    /// New password.
    pub password: Option<String>,
    /// New stay-connected flag.
    pub stay_connected: Option<bool>,
}

impl Update {
    /// Applies the update on top of `settings`.
    pub fn apply(self, mut settings: Settings) -> Settings {
        if let Some(address) = self.address {
            settings.database_address = Some(address);
        }
        if let Some(username) = self.username {
            settings.username = Some(username);
        }
        if let Some(password) = self.password {
            settings.password = Some(password);
        }
        if let Some(stay_connected) = self.stay_connected {
            settings.stay_connected = stay_connected;
        }
        settings
    }
}

/// Printable settings with the password hidden.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    /// Remote address.
    pub database_address: Option<String>,
    /// Login name.
    pub username: Option<String>,
    /// True if a password is saved.
    pub password_set: bool,
    /// Background reconnection flag.
    pub stay_connected: bool,
}

impl From<&Settings> for SettingsView {
    fn from(settings: &Settings) -> Self {
        Self {
            database_address: settings.database_address.clone(),
            username: settings.username.clone(),
            password_set: settings.password.is_some(),
            stay_connected: settings.stay_connected,
        }
    }
}

/// Prints the saved settings.
pub async fn show(dir: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = JsonFileStore::new(dir);
    let Some(settings) = store.load_settings().await? else {
        return Err(format!("No settings saved in {:?}", dir).into());
    };
    let view = SettingsView::from(&settings);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&view)?),
        _ => print_text_output(&view),
    }
    Ok(())
}

/// Merges `update` into the saved settings and writes them back.
pub async fn save(dir: &Path, update: Update) -> Result<(), Box<dyn std::error::Error>> {
    let store = JsonFileStore::new(dir);
    let current = store.load_settings().await?.unwrap_or_default();
    let settings = update.apply(current);
    store.save_settings(&settings).await?;
    info!(dir = %dir.display(), "settings saved");
    Ok(())
}

/// Removes the saved settings.
pub async fn clear(dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    JsonFileStore::new(dir).clear_settings().await?;
    info!(dir = %dir.display(), "settings cleared");
    Ok(())
}

fn print_text_output(view: &SettingsView) {
    println!("Settings");
    println!("========");
    println!(
        "Address:        {}",
        view.database_address.as_deref().unwrap_or("(none)")
    );
    println!("Username:       {}", view.username.as_deref().unwrap_or("(none)"));
    println!(
        "Password:       {}",
        if view.password_set { "(set)" } else { "(none)" }
    );
    println!("Stay connected: {}", view.stay_connected);
}
