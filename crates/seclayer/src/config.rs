//! Session configuration.
use crate::domain::DomainKind;
use crate::errors::{ConfigError, SessionError};
use crate::party::Party;
use crate::telemetry::DEFAULT_SAMPLE_INTERVAL;
use crate::MAX_THREADS;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Protocol family used for the layer operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// OT based protocols over Z_{2^l}.
    Ring,
    /// HE based linear layers over a prime field.
    Field,
    /// Silent OT ring protocols with approximate truncation.
    Cheetah,
}

impl BackendKind {
    pub fn domain_kind(self) -> DomainKind {
        match self {
            BackendKind::Ring | BackendKind::Cheetah => DomainKind::Ring,
            BackendKind::Field => DomainKind::Field,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub party: Party,
    pub backend: BackendKind,
    pub bitlength: u32,
    /// Number of worker instances. Every instance uses its own channel.
    pub num_threads: usize,
    pub address: String,
    /// Instance `i` communicates on `port + i`.
    pub port: u16,
    /// Reveal inputs and outputs of every operator to the client and compare them against the
    /// cleartext computation.
    pub verify: bool,
    /// File from which power readings in microwatts are sampled while an operator runs.
    pub power_sample_path: Option<PathBuf>,
    pub power_sample_interval_ms: u64,
    /// Directory for the per layer CSV files. No files are written if unset.
    pub telemetry_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            party: Party::SERVER,
            backend: BackendKind::Ring,
            bitlength: 32,
            num_threads: 1,
            address: "127.0.0.1".to_string(),
            port: 32000,
            verify: false,
            power_sample_path: None,
            power_sample_interval_ms: DEFAULT_SAMPLE_INTERVAL.as_millis() as u64,
            telemetry_dir: None,
        }
    }
}

impl SessionConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_yaml::from_reader(reader)?)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn power_sample_interval(&self) -> Duration {
        Duration::from_millis(self.power_sample_interval_ms)
    }

    /// Port of the channel of worker `thread`, `None` if it exceeds the port range.
    pub fn channel_port(&self, thread: usize) -> Option<u16> {
        u16::try_from(thread)
            .ok()
            .and_then(|offset| self.port.checked_add(offset))
    }

    /// Checks the bounds on bitlength, number of threads and the channel ports.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.bitlength == 0 || self.bitlength >= 64 {
            return Err(SessionError::InvalidConfig(format!(
                "bitlength must be in 1..64, got {}",
                self.bitlength
            )));
        }
        if self.num_threads == 0 || self.num_threads > MAX_THREADS {
            return Err(SessionError::InvalidConfig(format!(
                "num_threads must be in 1..={MAX_THREADS}, got {}",
                self.num_threads
            )));
        }
        if self.channel_port(self.num_threads - 1).is_none() {
            return Err(SessionError::InvalidConfig(format!(
                "ports {}.. exceed the port range for {} threads",
                self.port, self.num_threads
            )));
        }
        if self.power_sample_interval_ms == 0 {
            return Err(SessionError::InvalidConfig(
                "power_sample_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_uses_defaults() {
        let config = SessionConfig::from_yaml_str(
            "party: second\nbackend: cheetah\nbitlength: 37\nnum_threads: 4\nverify: true\n",
        )
        .unwrap();
        assert_eq!(config.party, Party::CLIENT);
        assert_eq!(config.backend, BackendKind::Cheetah);
        assert_eq!(config.backend.domain_kind(), DomainKind::Ring);
        assert_eq!(config.num_threads, 4);
        assert_eq!(config.port, 32000);
        assert_eq!(config.power_sample_interval(), Duration::from_secs(1));
        config.validate().unwrap();
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            SessionConfig::from_yaml_str("threads: 2\n"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn bounds() {
        let mut config = SessionConfig {
            bitlength: 64,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SessionError::InvalidConfig(_))
        ));
        config.bitlength = 41;
        config.num_threads = MAX_THREADS + 1;
        assert!(config.validate().is_err());
        config.num_threads = MAX_THREADS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn channel_ports_stay_in_range() {
        let mut config = SessionConfig {
            port: u16::MAX - 1,
            num_threads: 2,
            ..Default::default()
        };
        assert_eq!(config.channel_port(1), Some(u16::MAX));
        assert!(config.validate().is_ok());
        config.num_threads = 3;
        assert_eq!(config.channel_port(2), None);
        assert!(matches!(
            config.validate(),
            Err(SessionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.yaml");
        std::fs::write(&path, "backend: field\ntelemetry_dir: /tmp/telemetry\n").unwrap();
        let config = SessionConfig::from_file(&path).unwrap();
        assert_eq!(config.backend, BackendKind::Field);
        assert_eq!(config.telemetry_dir, Some(PathBuf::from("/tmp/telemetry")));
    }
}
