//! Engine configuration.
//!
//! # Responsibilities
//! - Define the TOML-deserializable configuration schema with defaults
//! - Validate mode/field consistency before a server is constructed
//! - Build the runtime [`ServerMode`] from configured TLS material
//!
//! All types derive Serde traits; every field has a default so a missing or
//! empty file yields a working plain-HTTP engine on port 8080.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::net::listener::BindScope;
use crate::net::tls::{TlsError, TlsIdentity};
use crate::server::ServerMode;

/// Errors while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("mode `{0}` requires a [tls] section with cert_path and key_path")]
    MissingTls(&'static str),

    #[error("mode `tls-surrogate` requires a surrogate backend address")]
    MissingSurrogate,

    #[error(transparent)]
    Identity(#[from] TlsError),
}

/// Root configuration for the engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Listening port. 0 requests an OS-assigned ephemeral port.
    pub port: u16,

    /// Interface scope for the bind.
    pub bind: BindConfig,

    /// How accepted connections are wrapped and driven.
    pub mode: ModeConfig,

    /// TLS identity files; required by the `tls` and `tls-surrogate` modes.
    pub tls: Option<TlsFilesConfig>,

    /// Backend address for `tls-surrogate` mode.
    pub surrogate: Option<String>,

    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            bind: BindConfig::Any,
            mode: ModeConfig::Direct,
            tls: None,
            surrogate: None,
            log_filter: "portico=info".to_string(),
        }
    }
}

/// Interface scope for the listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BindConfig {
    Any,
    Loopback,
}

/// Configured server mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModeConfig {
    Direct,
    Tls,
    TlsSurrogate,
}

/// PEM file locations for the server identity.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsFilesConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl EngineConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The bind scope for the listener.
    pub fn bind_scope(&self) -> BindScope {
        match self.bind {
            BindConfig::Any => BindScope::Any,
            BindConfig::Loopback => BindScope::Loopback,
        }
    }

    /// Validates mode/field consistency and builds the runtime mode,
    /// loading TLS material where the mode needs it.
    pub fn server_mode(&self) -> Result<ServerMode, ConfigError> {
        match self.mode {
            ModeConfig::Direct => Ok(ServerMode::Direct),
            ModeConfig::Tls => Ok(ServerMode::TlsDirect(self.identity("tls")?)),
            ModeConfig::TlsSurrogate => {
                let backend = self
                    .surrogate
                    .clone()
                    .ok_or(ConfigError::MissingSurrogate)?;
                Ok(ServerMode::TlsSurrogate {
                    identity: self.identity("tls-surrogate")?,
                    backend,
                })
            }
        }
    }

    fn identity(&self, mode_name: &'static str) -> Result<TlsIdentity, ConfigError> {
        let files = self
            .tls
            .as_ref()
            .ok_or(ConfigError::MissingTls(mode_name))?;
        Ok(TlsIdentity::from_pem_files(
            &files.cert_path,
            &files.key_path,
        )?)
    }
}
