use anyhow::{Result, anyhow};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::fmt;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub auth: Auth,
    pub backend: Backend,
    pub log: Log,
    pub session: Session,
    pub storage: Storage,
}

#[derive(Debug, Deserialize)]
pub struct Auth {
    pub backend: String, // "fake" or "real"
}

/// Hosted backend credentials. Leaving either empty runs the client in demo mode.
#[derive(Deserialize)]
pub struct Backend {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub anon_key: String,
}

// The key never reaches the logs.
impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let anon_key = if self.anon_key.is_empty() { "" } else { "<redacted>" };
        f.debug_struct("Backend")
            .field("url", &self.url)
            .field("anon_key", &anon_key)
            .finish()
    }
}

impl Backend {
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty() && !self.anon_key.trim().is_empty()
    }
}

#[derive(Debug, Deserialize)]
pub struct Log {
    pub filter: String,
}

#[derive(Debug, Deserialize)]
pub struct Session {
    pub auto_refresh: bool,
    pub detect_session_in_url: bool,
    pub refresh_margin_secs: i64,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
    pub path: String,
    #[serde(default)]
    pub disabled: bool,
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

/// Reads the TOML file, then `TOPCAT__SECTION__KEY` environment overrides.
pub fn parse_settings(path: Option<&str>) -> Result<Settings> {
    let path = path.unwrap_or(SETTINGS_PATH);

    let settings: Settings = Config::builder()
        .add_source(File::with_name(path))
        .add_source(Environment::with_prefix("TOPCAT").separator("__"))
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    Ok(settings)
}
