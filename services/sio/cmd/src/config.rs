//! Configuration handling for the sio client.
//!
//! Settings come from an optional YAML file, then `SIO_*` environment
//! variables, then command-line flags (applied in `main`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sio_session::{ClientConfig, ClientConfigBuilder};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Client settings before callbacks are attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFileConfig {
    /// Endpoint address
    pub address: String,
    /// Namespace to join
    pub namespace: String,
    /// Auth token
    pub auth: Option<String>,
    /// Reconnect after a lost link
    pub reconnect: bool,
    /// First reconnect delay
    pub reconnect_delay_min: Duration,
    /// Reconnect delay cap
    pub reconnect_delay_max: Duration,
    /// Handshake deadline
    pub handshake_timeout: Duration,
    /// Cap on outstanding acks
    pub max_pending_acks: usize,
}

impl Default for ClientFileConfig {
    fn default() -> Self {
        let defaults = ClientConfig::default();
        Self {
            address: "127.0.0.1:4000".to_string(),
            namespace: defaults.namespace,
            auth: None,
            reconnect: defaults.reconnect,
            reconnect_delay_min: defaults.reconnect_delay_min,
            reconnect_delay_max: defaults.reconnect_delay_max,
            handshake_timeout: defaults.handshake_timeout,
            max_pending_acks: defaults.max_pending_acks,
        }
    }
}

/// Root of the YAML file
#[derive(Debug, Deserialize)]
struct RootConfig {
    client: Option<ClientSection>,
}

/// `client:` section; durations are humantime strings such as `500ms`
#[derive(Debug, Deserialize)]
struct ClientSection {
    address: Option<String>,
    namespace: Option<String>,
    auth: Option<String>,
    reconnect: Option<bool>,
    reconnect_delay_min: Option<String>,
    reconnect_delay_max: Option<String>,
    handshake_timeout: Option<String>,
    max_pending_acks: Option<usize>,
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value).with_context(|| format!("invalid duration for {}: {:?}", key, value))
}

impl ClientFileConfig {
    /// Load configuration from `config_path` (defaults when missing)
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();
        let path = config_path.as_ref();

        match std::fs::read_to_string(path) {
            Ok(content) => {
                let root: RootConfig = serde_yaml::from_str(&content)
                    .with_context(|| format!("failed to parse config file {:?}", path))?;
                if let Some(section) = root.client {
                    config.apply_section(section)?;
                }
                info!("Loaded configuration from {:?}", path);
            }
            Err(_) => warn!("Config file {:?} not found, using defaults", path),
        }

        Ok(config)
    }

    fn apply_section(&mut self, section: ClientSection) -> Result<()> {
        if let Some(address) = section.address {
            self.address = address;
        }
        if let Some(namespace) = section.namespace {
            self.namespace = namespace;
        }
        if section.auth.is_some() {
            self.auth = section.auth;
        }
        if let Some(reconnect) = section.reconnect {
            self.reconnect = reconnect;
        }
        if let Some(value) = section.reconnect_delay_min {
            self.reconnect_delay_min = parse_duration("reconnect_delay_min", &value)?;
        }
        if let Some(value) = section.reconnect_delay_max {
            self.reconnect_delay_max = parse_duration("reconnect_delay_max", &value)?;
        }
        if let Some(value) = section.handshake_timeout {
            self.handshake_timeout = parse_duration("handshake_timeout", &value)?;
        }
        if let Some(limit) = section.max_pending_acks {
            self.max_pending_acks = limit;
        }
        Ok(())
    }

    /// Apply `SIO_*` environment variables
    pub fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(address) = lookup("SIO_ADDRESS") {
            info!("Address overridden by environment: {}", address);
            self.address = address;
        }

        if let Some(namespace) = lookup("SIO_NAMESPACE") {
            info!("Namespace overridden by environment: {}", namespace);
            self.namespace = namespace;
        }

        if let Some(auth) = lookup("SIO_AUTH") {
            self.auth = Some(auth);
        }

        if let Some(reconnect) = lookup("SIO_RECONNECT") {
            match reconnect.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.reconnect = true,
                "false" | "0" | "no" => self.reconnect = false,
                other => warn!("Ignoring SIO_RECONNECT={}", other),
            }
        }

        for (key, slot) in [
            ("SIO_RECONNECT_DELAY_MIN", &mut self.reconnect_delay_min),
            ("SIO_RECONNECT_DELAY_MAX", &mut self.reconnect_delay_max),
        ] {
            if let Some(value) = lookup(key) {
                match humantime::parse_duration(&value) {
                    Ok(delay) => *slot = delay,
                    Err(e) => warn!("Ignoring {}={}: {}", key, value, e),
                }
            }
        }
    }

    /// Session config builder carrying these settings
    pub fn builder(&self) -> ClientConfigBuilder {
        let mut builder = ClientConfig::builder(self.address.clone())
            .namespace(self.namespace.clone())
            .reconnect(self.reconnect)
            .reconnect_delay(self.reconnect_delay_min, self.reconnect_delay_max)
            .handshake_timeout(self.handshake_timeout)
            .max_pending_acks(self.max_pending_acks);
        if let Some(auth) = &self.auth {
            builder = builder.auth(auth.clone());
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ClientFileConfig::default();
        assert_eq!(config.address, "127.0.0.1:4000");
        assert_eq!(config.namespace, "/");
        assert!(config.reconnect);
        assert_eq!(config.reconnect_delay_min, Duration::from_secs(1));
        assert_eq!(config.reconnect_delay_max, Duration::from_secs(5));
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
client:
  address: tcp://10.0.0.5:4100
  namespace: /chat
  auth: s3cret
  reconnect: false
  reconnect_delay_min: 250ms
  reconnect_delay_max: 3s
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = ClientFileConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.address, "tcp://10.0.0.5:4100");
        assert_eq!(config.namespace, "/chat");
        assert_eq!(config.auth.as_deref(), Some("s3cret"));
        assert!(!config.reconnect);
        assert_eq!(config.reconnect_delay_min, Duration::from_millis(250));
        assert_eq!(config.reconnect_delay_max, Duration::from_secs(3));
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = ClientFileConfig::load_from_file("/nonexistent/sio.yaml").unwrap();
        assert_eq!(config, ClientFileConfig::default());
    }

    #[test]
    fn test_bad_duration_is_an_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"client:\n  reconnect_delay_min: soon\n")
            .unwrap();

        let err = ClientFileConfig::load_from_file(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("reconnect_delay_min"));
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SIO_ADDRESS", "example.org:9000"),
            ("SIO_RECONNECT", "no"),
            ("SIO_RECONNECT_DELAY_MAX", "10s"),
            ("SIO_RECONNECT_DELAY_MIN", "later"),
        ]);

        let mut config = ClientFileConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.address, "example.org:9000");
        assert!(!config.reconnect);
        assert_eq!(config.reconnect_delay_max, Duration::from_secs(10));
        // Unparseable value leaves the default in place
        assert_eq!(config.reconnect_delay_min, Duration::from_secs(1));
    }

    #[test]
    fn test_builder_carries_settings() {
        let mut file = ClientFileConfig::default();
        file.namespace = "admin".to_string();
        file.auth = Some("token".to_string());

        let config = file.builder().build();
        assert_eq!(config.namespace, "/admin");
        assert_eq!(config.auth.as_deref(), Some("token"));
        assert_eq!(config.address, "127.0.0.1:4000");
    }
}
