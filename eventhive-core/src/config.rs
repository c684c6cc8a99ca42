//! Scanner configuration.
//!
//! Values come from a TOML file, then `EVENTHIVE_*` environment variables,
//! then command-line overrides applied by the binaries.

use crate::crypto::HmacSecret;
use crate::platform::get_default_database_path;
use crate::{CheckinError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection settings for the Supabase/PostgREST ticket backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub url: String,
    pub api_key: String,
    pub attendees_table: String,
    pub events_table: String,
    pub scans_table: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            attendees_table: "booking_attendees".to_string(),
            events_table: "events".to_string(),
            scans_table: "scans".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub database_path: PathBuf,
    pub scanner_id: String,
    #[serde(skip_serializing)]
    pub hmac_secret: HmacSecret,
    /// Minimum time between two processed scans.
    pub cooldown_ms: u64,
    pub push_interval_secs: u64,
    pub pull_interval_secs: u64,
    /// Upper bound on any single remote call.
    pub remote_timeout_secs: u64,
    pub log_level: String,
    /// Omit to run fully offline.
    pub remote: Option<RemoteConfig>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            database_path: get_default_database_path(),
            scanner_id: "scanner_001".to_string(),
            hmac_secret: HmacSecret::default(),
            cooldown_ms: 2_000,
            push_interval_secs: 30,
            pull_interval_secs: 10,
            remote_timeout_secs: 8,
            log_level: "info".to_string(),
            remote: None,
        }
    }
}

impl ScannerConfig {
    /// Parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| CheckinError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load `path` if it exists, otherwise start from defaults; then apply
    /// environment overrides and validate.
    pub fn resolve(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            tracing::info!("No config file at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply `EVENTHIVE_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `EVENTHIVE_*` overrides from an arbitrary lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("EVENTHIVE_DB_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(id) = lookup("EVENTHIVE_SCANNER_ID") {
            self.scanner_id = id;
        }
        if let Some(secret) = lookup("EVENTHIVE_HMAC_SECRET") {
            self.hmac_secret.replace(secret.into_bytes());
        }
        if let Some(level) = lookup("EVENTHIVE_LOG_LEVEL") {
            self.log_level = level.to_lowercase();
        }
        match lookup("EVENTHIVE_SCAN_COOLDOWN").map(|v| v.trim().parse::<u64>()) {
            Some(Ok(secs)) => self.cooldown_ms = secs.saturating_mul(1_000),
            Some(Err(e)) => tracing::warn!("Ignoring EVENTHIVE_SCAN_COOLDOWN: {}", e),
            None => {}
        }

        let url = lookup("EVENTHIVE_SUPABASE_URL");
        if url.is_some() && self.remote.is_none() {
            self.remote = Some(RemoteConfig::default());
        }
        if let Some(remote) = self.remote.as_mut() {
            if let Some(url) = url {
                remote.url = url;
            }
            if let Some(key) = lookup("EVENTHIVE_SUPABASE_KEY") {
                remote.api_key = key;
            }
            if let Some(table) = lookup("EVENTHIVE_SUPABASE_ATTENDEES_TABLE") {
                remote.attendees_table = table;
            }
            if let Some(table) = lookup("EVENTHIVE_SUPABASE_EVENTS_TABLE") {
                remote.events_table = table;
            }
            if let Some(table) = lookup("EVENTHIVE_SUPABASE_SCANS_TABLE") {
                remote.scans_table = table;
            }
        }
    }

    /// Reject settings the scanner cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.scanner_id.trim().is_empty() {
            return Err(CheckinError::Config("scanner_id must not be empty".to_string()));
        }
        if self.push_interval_secs == 0 || self.pull_interval_secs == 0 {
            return Err(CheckinError::Config(
                "sync intervals must be at least one second".to_string(),
            ));
        }
        if self.remote_timeout_secs == 0 {
            return Err(CheckinError::Config(
                "remote_timeout_secs must be at least one second".to_string(),
            ));
        }
        if let Some(remote) = &self.remote {
            if remote.url.trim().is_empty() {
                return Err(CheckinError::Config("remote.url must not be empty".to_string()));
            }
        }
        if self.hmac_secret.is_empty() {
            tracing::warn!("No HMAC secret configured; signed tickets will be rejected");
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn push_interval(&self) -> Duration {
        Duration::from_secs(self.push_interval_secs)
    }

    pub fn pull_interval(&self) -> Duration {
        Duration::from_secs(self.pull_interval_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ScannerConfig::default();
        assert_eq!(config.scanner_id, "scanner_001");
        assert_eq!(config.cooldown(), Duration::from_secs(2));
        assert_eq!(config.push_interval(), Duration::from_secs(30));
        assert_eq!(config.pull_interval(), Duration::from_secs(10));
        assert!(config.remote.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanner.toml");
        std::fs::write(
            &path,
            r#"
scanner_id = "gate-b"
hmac_secret = "s3cret"
cooldown_ms = 500

[remote]
url = "https://example.supabase.co"
api_key = "anon"
"#,
        )
        .unwrap();

        let config = ScannerConfig::load(&path).unwrap();
        assert_eq!(config.scanner_id, "gate-b");
        assert_eq!(config.hmac_secret.as_bytes(), b"s3cret");
        assert_eq!(config.cooldown_ms, 500);
        assert_eq!(config.push_interval_secs, 30);

        let remote = config.remote.unwrap();
        assert_eq!(remote.url, "https://example.supabase.co");
        assert_eq!(remote.attendees_table, "booking_attendees");
        assert_eq!(remote.scans_table, "scans");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanner.toml");
        std::fs::write(&path, "cooldown_ms = \"soon\"").unwrap();
        assert!(matches!(ScannerConfig::load(&path), Err(CheckinError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ScannerConfig::default();
        config.apply_overrides(env(&[
            ("EVENTHIVE_SCANNER_ID", "gate-c"),
            ("EVENTHIVE_HMAC_SECRET", "from-env"),
            ("EVENTHIVE_SCAN_COOLDOWN", "3"),
            ("EVENTHIVE_SUPABASE_URL", "https://env.supabase.co"),
            ("EVENTHIVE_SUPABASE_SCANS_TABLE", "scan_events"),
        ]));

        assert_eq!(config.scanner_id, "gate-c");
        assert_eq!(config.hmac_secret.as_bytes(), b"from-env");
        assert_eq!(config.cooldown_ms, 3_000);
        let remote = config.remote.unwrap();
        assert_eq!(remote.url, "https://env.supabase.co");
        assert_eq!(remote.scans_table, "scan_events");
        assert_eq!(remote.events_table, "events");
    }

    #[test]
    fn test_bad_cooldown_env_is_ignored() {
        let mut config = ScannerConfig::default();
        config.apply_overrides(env(&[("EVENTHIVE_SCAN_COOLDOWN", "two")]));
        assert_eq!(config.cooldown_ms, 2_000);
    }

    #[test]
    fn test_huge_cooldown_env_saturates() {
        let mut config = ScannerConfig::default();
        config.apply_overrides(env(&[("EVENTHIVE_SCAN_COOLDOWN", "18446744073709551615")]));
        assert_eq!(config.cooldown_ms, u64::MAX);
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let config = ScannerConfig {
            scanner_id: " ".to_string(),
            ..ScannerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ScannerConfig {
            pull_interval_secs: 0,
            ..ScannerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ScannerConfig {
            remote: Some(RemoteConfig::default()),
            ..ScannerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
