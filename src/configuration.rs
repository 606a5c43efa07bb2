use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigurationError,
    monitor::DEFAULT_POLL_INTERVAL,
    supervisor::{DEFAULT_TERMINATE_TIMEOUT, SupervisorOptions},
};

const APPLICATION_DIRECTORY: &str = "chisel-manager";

/// Supervisor settings read from `chisel-manager.toml`. Every key is optional.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfiguration {
    #[serde(default = "default_binary")]
    pub binary: String,
    #[serde(default = "default_subcommand")]
    pub subcommand: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_terminate_timeout_ms")]
    pub terminate_timeout_ms: u64,
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    #[serde(default)]
    pub strict_store: bool,
    #[serde(default = "default_session_logs")]
    pub session_logs: bool,
    #[serde(default = "default_socks_address")]
    pub socks_address: String,
}

fn default_binary() -> String {
    "chisel".into()
}

fn default_subcommand() -> String {
    "client".into()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_terminate_timeout_ms() -> u64 {
    DEFAULT_TERMINATE_TIMEOUT.as_millis() as u64
}

fn default_session_logs() -> bool {
    true
}

fn default_socks_address() -> String {
    "127.0.0.1:1080".into()
}

impl Default for SupervisorConfiguration {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            subcommand: default_subcommand(),
            poll_interval_ms: default_poll_interval_ms(),
            terminate_timeout_ms: default_terminate_timeout_ms(),
            store_path: None,
            strict_store: false,
            session_logs: default_session_logs(),
            socks_address: default_socks_address(),
        }
    }
}

pub fn configuration_directory() -> PathBuf {
    let directory = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APPLICATION_DIRECTORY);
    if let Err(error) = std::fs::create_dir_all(&directory) {
        log::warn!(
            "[configuration] failed to create configuration directory {}: {error}",
            directory.display()
        );
    }
    directory
}

impl SupervisorConfiguration {
    pub fn configuration_file_path() -> PathBuf {
        configuration_directory().join("chisel-manager.toml")
    }

    /// Lenient: a missing or unparsable file yields the defaults.
    pub fn load(path: &Path) -> Self {
        match Self::read(path) {
            Ok(Some(configuration)) => {
                log::info!("[configuration] loaded from {}", path.display());
                configuration
            }
            Ok(None) => {
                log::info!(
                    "[configuration] no configuration file at {}, using defaults",
                    path.display()
                );
                Self::default()
            }
            Err(error) => {
                log::warn!("[configuration] {error}; using defaults");
                Self::default()
            }
        }
    }

    pub fn read(path: &Path) -> Result<Option<Self>, ConfigurationError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigurationError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        toml::from_str(&content)
            .map(Some)
            .map_err(|source| ConfigurationError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| configuration_directory().join("config.json"))
    }

    pub fn logs_directory(&self) -> Option<PathBuf> {
        self.session_logs
            .then(|| configuration_directory().join("logs"))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }

    pub fn supervisor_options(&self, binary: String) -> SupervisorOptions {
        SupervisorOptions {
            binary,
            subcommand: self.subcommand.clone(),
            terminate_timeout: self.terminate_timeout(),
        }
    }
}
