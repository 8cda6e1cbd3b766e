use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::orchestrator::OrchestratorOptions;

const DEFAULT_RECONNECT_DELAY_MS: u64 = 2000;
const DEFAULT_HEALTH_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub signaling_url: String,
    #[serde(default)]
    pub room: Option<String>,
    /// Merged into the options of every peer transport.
    #[serde(default)]
    pub peer_settings: Map<String, Value>,
    #[serde(default)]
    pub evict_on_error: bool,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

/// Values that take precedence over the config file (CLI flags).
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub signaling_url: Option<String>,
    pub room: Option<String>,
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

fn default_health_timeout_ms() -> u64 {
    DEFAULT_HEALTH_TIMEOUT_MS
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_overrides(path, ConfigOverrides::default())
    }

    pub fn load_with_overrides(path: &Path, overrides: ConfigOverrides) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let mut cfg: Config = serde_json::from_str(&data).context("parse config json")?;
        cfg.config_path = Some(path.to_path_buf());
        cfg.apply(overrides);
        cfg.normalize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build a config from flags alone, without a file.
    pub fn from_overrides(overrides: ConfigOverrides) -> Result<Self> {
        let mut cfg = Config {
            signaling_url: String::new(),
            room: None,
            peer_settings: Map::new(),
            evict_on_error: false,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            health_timeout_ms: DEFAULT_HEALTH_TIMEOUT_MS,
            log_file: None,
            config_path: None,
        };
        cfg.apply(overrides);
        cfg.normalize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(url) = overrides.signaling_url {
            self.signaling_url = url;
        }
        if let Some(room) = overrides.room {
            self.room = Some(room);
        }
    }

    fn normalize(&mut self) -> Result<()> {
        self.signaling_url = normalize_signaling_url(&self.signaling_url);
        self.room = self
            .room
            .take()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        validate_url(&self.signaling_url).context("signaling_url")?;
        if self.health_timeout_ms == 0 {
            anyhow::bail!("health_timeout_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn signaling_url(&self) -> Result<Url> {
        Url::parse(&self.signaling_url).context("signaling_url")
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    /// The room is checked when the orchestrator is constructed, not here.
    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            room: self.room.clone(),
            peer_settings: self.peer_settings.clone(),
            evict_on_error: self.evict_on_error,
        }
    }
}

fn normalize_signaling_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else {
        trimmed.to_string()
    }
}

fn validate_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw)?;
    if url.scheme() != "ws" && url.scheme() != "wss" {
        anyhow::bail!("url must be ws, wss, http or https");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    fn write_config(dir: &str, json: &str) -> PathBuf {
        let tmp = env::temp_dir().join(dir);
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();
        let cfg_path = tmp.join("config.json");
        fs::write(&cfg_path, json).unwrap();
        cfg_path
    }

    #[test]
    fn load_config_from_json_and_normalize() {
        let cfg_path = write_config(
            "peermesh-config-test",
            r#"{
                "signaling_url": "https://relay.example.com/signal",
                "room": "  standup  ",
                "peer_settings": {"trickle": false}
            }"#,
        );

        let cfg = Config::load(&cfg_path).unwrap();
        assert_eq!(cfg.signaling_url, "wss://relay.example.com/signal");
        assert_eq!(cfg.room.as_deref(), Some("standup"));
        assert_eq!(cfg.peer_settings.get("trickle"), Some(&Value::Bool(false)));
        assert_eq!(cfg.reconnect_delay_ms, 2000);
        assert_eq!(cfg.health_timeout(), Duration::from_secs(5));
        assert!(!cfg.evict_on_error);
        assert_eq!(cfg.config_path.as_ref().unwrap(), &cfg_path);
    }

    #[test]
    fn overrides_take_precedence() {
        let cfg_path = write_config(
            "peermesh-config-test-overrides",
            r#"{"signaling_url": "ws://127.0.0.1:4444", "room": "a"}"#,
        );
        let cfg = Config::load_with_overrides(
            &cfg_path,
            ConfigOverrides {
                signaling_url: Some("http://127.0.0.1:5555".into()),
                room: Some("b".into()),
            },
        )
        .unwrap();
        assert_eq!(cfg.signaling_url, "ws://127.0.0.1:5555");
        assert_eq!(cfg.room.as_deref(), Some("b"));
    }

    #[test]
    fn blank_room_becomes_none() {
        let cfg_path = write_config(
            "peermesh-config-test-blank-room",
            r#"{"signaling_url": "ws://127.0.0.1:4444", "room": "   "}"#,
        );
        let cfg = Config::load(&cfg_path).unwrap();
        assert!(cfg.room.is_none());
        assert!(cfg.orchestrator_options().room.is_none());
    }

    #[test]
    fn reject_invalid_url_scheme() {
        let cfg_path = write_config(
            "peermesh-config-test-bad-url",
            r#"{"signaling_url": "ftp://relay.example.com", "room": "a"}"#,
        );
        let err = Config::load(&cfg_path).unwrap_err();
        assert!(err.to_string().contains("signaling_url"));
    }

    #[test]
    fn from_overrides_requires_url() {
        let err = Config::from_overrides(ConfigOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("signaling_url"));

        let cfg = Config::from_overrides(ConfigOverrides {
            signaling_url: Some("wss://relay.example.com".into()),
            room: None,
        })
        .unwrap();
        assert_eq!(cfg.signaling_url, "wss://relay.example.com");
    }
}
