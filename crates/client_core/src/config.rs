use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::transport::DEFAULT_THREADS_PER_PAGE;

pub const SETTINGS_FILE: &str = "thread_sync.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub data_dir: PathBuf,
    pub threads_per_page: u32,
    pub request_timeout_seconds: u64,
    pub coalesce_inflight_fetches: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            threads_per_page: DEFAULT_THREADS_PER_PAGE,
            request_timeout_seconds: 30,
            coalesce_inflight_fetches: false,
        }
    }
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }

    /// SQLite url of the local store kept for `server_url`.
    pub fn database_url_for_server(&self, server_url: &str) -> String {
        let path = self.data_dir.join(server_database_file_name(server_url));
        format!("sqlite://{}", path.to_string_lossy().replace('\\', "/"))
    }
}

pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

/// Defaults, then the settings file when present, then environment overrides.
pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => match toml::from_str::<ClientSettings>(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(path = %path.display(), "config: ignoring unreadable settings file: {err}");
                ClientSettings::default()
            }
        },
        Err(_) => ClientSettings::default(),
    };

    apply_env_overrides(&mut settings, env);
    settings
}

fn apply_env_overrides(settings: &mut ClientSettings, env: impl Fn(&str) -> Option<String>) {
    if let Some(v) = env("APP__DATA_DIR") {
        settings.data_dir = PathBuf::from(v);
    }

    for key in ["THREADS_PER_PAGE", "APP__THREADS_PER_PAGE"] {
        if let Some(parsed) = env(key).and_then(|v| v.parse::<u32>().ok()) {
            if parsed > 0 {
                settings.threads_per_page = parsed;
            }
        }
    }

    if let Some(parsed) = env("APP__REQUEST_TIMEOUT_SECONDS").and_then(|v| v.parse::<u64>().ok()) {
        settings.request_timeout_seconds = parsed;
    }

    if let Some(v) = env("APP__COALESCE_INFLIGHT_FETCHES") {
        settings.coalesce_inflight_fetches = matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        );
    }
}

fn server_database_file_name(server_url: &str) -> String {
    let stem = match Url::parse(server_url) {
        Ok(url) => {
            let host = url.host_str().unwrap_or("server");
            match url.port() {
                Some(port) => format!("{host}_{port}"),
                None => host.to_string(),
            }
        }
        Err(_) => server_url.to_string(),
    };
    let sanitized: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    format!("{sanitized}.db")
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
