//! `ServerConfig`: TOML-loadable, all-default-valid. CLI flags in
//! `src/bin/imap-server.rs` override file values, which override these
//! defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

fn default_bind_addr() -> SocketAddr {
    "127.0.0.1:1143".parse().unwrap()
}

fn default_capabilities_unauthenticated() -> Vec<String> {
    vec!["IMAP4rev1".into(), "STARTTLS".into(), "AUTH=PLAIN".into()]
}

fn default_capabilities_authenticated() -> Vec<String> {
    vec!["IMAP4rev1".into(), "IDLE".into()]
}

fn default_max_msg_size() -> u32 {
    25 * 1024 * 1024
}

fn default_max_command_size() -> usize {
    crate::wire::MAX_COMMAND_SIZE
}

fn default_literal_chunk_timeout() -> Duration {
    crate::wire::LITERAL_CHUNK_TIMEOUT
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsMaterial {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(with = "serde_socket_addr")]
    pub bind_addr: SocketAddr,
    pub starttls: Option<TlsMaterial>,
    pub capabilities_unauthenticated: Vec<String>,
    pub capabilities_authenticated: Vec<String>,
    pub max_msg_size: u32,
    pub max_command_size: usize,
    #[serde(with = "serde_duration_secs")]
    pub literal_chunk_timeout: Duration,
    #[serde(with = "serde_duration_secs")]
    pub idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: default_bind_addr(),
            starttls: None,
            capabilities_unauthenticated: default_capabilities_unauthenticated(),
            capabilities_authenticated: default_capabilities_authenticated(),
            max_msg_size: default_max_msg_size(),
            max_command_size: default_max_command_size(),
            literal_chunk_timeout: default_literal_chunk_timeout(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ServerConfig {
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

mod serde_socket_addr {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S: Serializer>(addr: &SocketAddr, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SocketAddr, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

mod serde_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr.port(), 1143);
        assert!(cfg.capabilities_unauthenticated.contains(&"STARTTLS".to_string()));
        assert!(cfg.starttls.is_none());
    }

    #[test]
    fn deserializes_partial_toml_with_defaults_filled_in() {
        let cfg: ServerConfig = toml::from_str(
            r#"
            bind_addr = "0.0.0.0:143"
            idle_timeout = 60
            "#,
        )
        .unwrap();
        assert_eq!(cfg.bind_addr.port(), 143);
        assert_eq!(cfg.idle_timeout, Duration::from_secs(60));
        assert_eq!(cfg.max_msg_size, default_max_msg_size());
    }

    #[test]
    fn deserializes_starttls_material() {
        let cfg: ServerConfig = toml::from_str(
            r#"
            [starttls]
            cert_path = "/etc/imap/cert.pem"
            key_path = "/etc/imap/key.pem"
            "#,
        )
        .unwrap();
        assert!(cfg.starttls.is_some());
    }
}
