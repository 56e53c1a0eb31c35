use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tandem_ipc::{ChannelOptions, Role};

/// Settings shared by the master and slave binaries.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    #[serde(default = "defaults::name")]
    pub name: String,
    #[serde(default)]
    pub channel_number: u32,
    #[serde(default = "defaults::initial_capacity")]
    pub initial_capacity: u64,
    #[serde(default = "defaults::attach_timeout_ms")]
    pub attach_timeout_ms: u64,
    #[serde(default = "defaults::receive_timeout_ms")]
    pub receive_timeout_ms: u64,
    /// Consecutive receive timeouts after which the master gives up on the slave.
    #[serde(default = "defaults::max_missed_replies")]
    pub max_missed_replies: u32,
    /// Remove names left behind by a crashed run before opening the channel.
    #[serde(default)]
    pub purge_stale: bool,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

mod defaults {
    pub fn name() -> String {
        "tandem".into()
    }

    pub fn initial_capacity() -> u64 {
        tandem_ipc::DEFAULT_INITIAL_CAPACITY
    }

    pub fn attach_timeout_ms() -> u64 {
        tandem_ipc::DEFAULT_ATTACH_TIMEOUT.as_millis() as u64
    }

    pub fn receive_timeout_ms() -> u64 {
        1_000
    }

    pub fn max_missed_replies() -> u32 {
        5
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: defaults::name(),
            channel_number: 0,
            initial_capacity: defaults::initial_capacity(),
            attach_timeout_ms: defaults::attach_timeout_ms(),
            receive_timeout_ms: defaults::receive_timeout_ms(),
            max_missed_replies: defaults::max_missed_replies(),
            purge_stale: false,
            log_level: defaults::log_level(),
        }
    }
}

impl EndpointConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&toml_to_str)
    }

    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let config: EndpointConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.initial_capacity.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "initial_capacity must be a non-zero power of two, got {}",
                self.initial_capacity
            )));
        }
        if self.max_missed_replies == 0 {
            return Err(ConfigError::Invalid("max_missed_replies must be at least 1".into()));
        }
        Ok(())
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms)
    }

    pub fn channel_options(&self, role: Role) -> ChannelOptions {
        ChannelOptions::new(&self.name, self.channel_number, role)
            .initial_capacity(self.initial_capacity)
            .attach_timeout(self.attach_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = EndpointConfig::parse("").unwrap();
        assert_eq!(config, EndpointConfig::default());
        assert_eq!(config.name, "tandem");
        assert_eq!(config.initial_capacity, 4096);
        assert_eq!(config.attach_timeout(), Duration::from_secs(2));
        assert_eq!(config.receive_timeout(), Duration::from_secs(1));
        assert_eq!(config.max_missed_replies, 5);
        assert!(!config.purge_stale);
    }

    #[test]
    fn overrides_are_applied() {
        let config = EndpointConfig::parse(
            r#"
            name = "jobs"
            channel_number = 3
            initial_capacity = 65536
            receive_timeout_ms = 250
            purge_stale = true
            log_level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.name, "jobs");
        assert_eq!(config.channel_number, 3);
        assert_eq!(config.receive_timeout(), Duration::from_millis(250));
        assert!(config.purge_stale);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.attach_timeout_ms, 2000);
    }

    #[test]
    fn rejects_bad_capacity() {
        for capacity in [0, 3000] {
            let err = EndpointConfig::parse(&format!("initial_capacity = {capacity}")).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{err:?}");
        }
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = EndpointConfig::parse("capacity = 4096").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = EndpointConfig::load("/nonexistent/tandem.toml").unwrap_err();
        match err {
            ConfigError::Read { path, .. } => assert_eq!(path, "/nonexistent/tandem.toml"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn converts_to_channel_options() {
        let config = EndpointConfig {
            name: "jobs".into(),
            channel_number: 2,
            initial_capacity: 1 << 20,
            attach_timeout_ms: 50,
            ..EndpointConfig::default()
        };
        let options = config.channel_options(Role::Slave);
        assert_eq!(options.name, "jobs");
        assert_eq!(options.channel_number, 2);
        assert_eq!(options.role, Role::Slave);
        assert_eq!(options.initial_capacity, 1 << 20);
        assert_eq!(options.attach_timeout, Duration::from_millis(50));
    }
}
