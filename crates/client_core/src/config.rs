use std::{collections::HashMap, fs, path::Path};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use url::Url;

use crate::transport::DEFAULT_SUBSCRIPTION_LIMIT;

pub const DEFAULT_SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientSettings {
    pub server_url: String,
    pub request_timeout_secs: u64,
    pub subscription_limit: u32,
    pub user_agent: String,
    pub websocket_path: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".into(),
            request_timeout_secs: 30,
            subscription_limit: DEFAULT_SUBSCRIPTION_LIMIT,
            user_agent: concat!("client_core/", env!("CARGO_PKG_VERSION")).into(),
            websocket_path: "/websocket".into(),
        }
    }
}

impl ClientSettings {
    pub fn with_server_url(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    /// Base URL for REST calls, without a trailing slash.
    pub fn api_base(&self) -> String {
        let trimmed = self.server_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Self::default().server_url;
        }
        trimmed.to_string()
    }

    pub fn websocket_url(&self) -> Result<String> {
        let mut url = Url::parse(&self.api_base())
            .with_context(|| format!("invalid server_url '{}'", self.server_url))?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(anyhow!(
                    "server_url must start with http:// or https://, got '{other}'"
                ))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow!("cannot switch '{}' to {scheme}", self.server_url))?;
        let base_path = url.path().trim_end_matches('/').to_string();
        let socket_path = self.websocket_path.trim().trim_start_matches('/');
        url.set_path(&format!("{base_path}/{socket_path}"));
        Ok(url.to_string())
    }
}

/// Defaults, then `client.toml` in the working directory, then environment.
pub fn load_settings() -> ClientSettings {
    let mut settings = ClientSettings::default();
    if Path::new(DEFAULT_SETTINGS_FILE).exists() {
        match read_settings_file(Path::new(DEFAULT_SETTINGS_FILE)) {
            Ok(file_cfg) => apply_file_overrides(&mut settings, &file_cfg),
            Err(err) => tracing::warn!("config: ignoring unreadable {DEFAULT_SETTINGS_FILE}: {err:#}"),
        }
    }
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

pub fn read_settings_file(path: &Path) -> Result<HashMap<String, String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    toml::from_str::<HashMap<String, String>>(&raw)
        .with_context(|| format!("failed to parse settings file '{}'", path.display()))
}

pub fn apply_file_overrides(settings: &mut ClientSettings, file_cfg: &HashMap<String, String>) {
    if let Some(v) = file_cfg.get("server_url") {
        settings.server_url = v.clone();
    }
    if let Some(v) = file_cfg.get("request_timeout_secs") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_secs = parsed;
        }
    }
    if let Some(v) = file_cfg.get("subscription_limit") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.subscription_limit = parsed;
        }
    }
    if let Some(v) = file_cfg.get("user_agent") {
        settings.user_agent = v.clone();
    }
    if let Some(v) = file_cfg.get("websocket_path") {
        settings.websocket_path = v.clone();
    }
}

pub fn apply_env_overrides<F>(settings: &mut ClientSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("CHAT_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = lookup("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = lookup("APP__REQUEST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_secs = parsed;
        }
    }

    if let Some(v) = lookup("APP__SUBSCRIPTION_LIMIT") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.subscription_limit = parsed;
        }
    }

    if let Some(v) = lookup("APP__USER_AGENT") {
        settings.user_agent = v;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
