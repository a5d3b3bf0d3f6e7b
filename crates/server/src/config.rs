use std::{collections::HashMap, fs, io::ErrorKind, path::Path};

use anyhow::{bail, Context};
use identity::RoleDirectory;
use serde::Deserialize;

pub const CONFIG_FILE: &str = "server.toml";
pub const MAX_SESSION_TTL_SECONDS: i64 = 30 * 24 * 3600;

#[derive(Debug)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    /// Selects the collaborative namespace `artifacts/{app_id}/public/data`.
    pub app_id: String,
    pub session_secret: String,
    pub session_ttl_seconds: i64,
    /// Verifies the custom sign-in tokens issued by the identity provider.
    pub provider_secret: String,
    pub roles: RoleDirectory,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8080".into(),
            database_url: "sqlite://./data/ot_guardian.db".into(),
            app_id: "ot-guardian".into(),
            session_secret: "dev-session-secret".into(),
            session_ttl_seconds: 8 * 3600,
            provider_secret: "dev-provider-secret".into(),
            roles: RoleDirectory::new(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=MAX_SESSION_TTL_SECONDS).contains(&self.session_ttl_seconds) {
            bail!(
                "session_ttl_seconds must be between 1 and {MAX_SESSION_TTL_SECONDS}, got {}",
                self.session_ttl_seconds
            );
        }
        if self.provider_secret.is_empty() || self.session_secret.is_empty() {
            bail!("session_secret and provider_secret must not be empty");
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    bind_addr: Option<String>,
    database_url: Option<String>,
    app_id: Option<String>,
    session_secret: Option<String>,
    session_ttl_seconds: Option<i64>,
    provider_secret: Option<String>,
    #[serde(default)]
    roles: HashMap<String, String>,
}

/// Defaults, then the config file, then environment overrides.
///
/// `APP__CONFIG_FILE` names the file explicitly and must exist; otherwise
/// `server.toml` in the working directory is read when present.
pub fn load_settings() -> anyhow::Result<Settings> {
    let mut settings = match std::env::var("APP__CONFIG_FILE") {
        Ok(path) => load_settings_from(Path::new(&path))?,
        Err(_) => match fs::read_to_string(CONFIG_FILE) {
            Ok(raw) => settings_from_toml(&raw)
                .with_context(|| format!("failed to load {CONFIG_FILE}"))?,
            Err(err) if err.kind() == ErrorKind::NotFound => Settings::default(),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {CONFIG_FILE}"));
            }
        },
    };
    apply_env_overrides(&mut settings)?;
    settings.validate()?;
    Ok(settings)
}

pub fn load_settings_from(path: &Path) -> anyhow::Result<Settings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file '{}'", path.display()))?;
    settings_from_toml(&raw).with_context(|| format!("failed to load '{}'", path.display()))
}

pub fn settings_from_toml(raw: &str) -> anyhow::Result<Settings> {
    let file: FileConfig = toml::from_str(raw).context("invalid server config")?;
    let mut settings = Settings::default();

    if let Some(v) = file.bind_addr {
        settings.server_bind = v;
    }
    if let Some(v) = file.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file.app_id {
        settings.app_id = v;
    }
    if let Some(v) = file.session_secret {
        settings.session_secret = v;
    }
    if let Some(v) = file.session_ttl_seconds {
        settings.session_ttl_seconds = v;
    }
    if let Some(v) = file.provider_secret {
        settings.provider_secret = v;
    }
    settings.roles = RoleDirectory::from_table(&file.roles)?;

    settings.validate()?;
    Ok(settings)
}

fn apply_env_overrides(settings: &mut Settings) -> anyhow::Result<()> {
    if let Ok(v) = std::env::var("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Ok(v) = std::env::var("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Ok(v) = std::env::var("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Ok(v) = std::env::var("APP__APP_ID") {
        settings.app_id = v;
    }
    if let Ok(v) = std::env::var("APP__SESSION_SECRET") {
        settings.session_secret = v;
    }
    if let Ok(v) = std::env::var("APP__PROVIDER_SECRET") {
        settings.provider_secret = v;
    }
    if let Ok(v) = std::env::var("APP__SESSION_TTL_SECONDS") {
        settings.session_ttl_seconds = v
            .trim()
            .parse()
            .with_context(|| format!("APP__SESSION_TTL_SECONDS is not an integer: '{v}'"))?;
    }
    Ok(())
}

pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
