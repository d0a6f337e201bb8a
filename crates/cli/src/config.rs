//! Server configuration file.
//!
//! Read from `--config` or `<config_dir>/chatmux/config.json`, then overlaid
//! with command-line flags. A missing default file means defaults.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chatmux::{DriverConfig, ManagerConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SCHEMA_VERSION: u32 = 1;

const APP_DIR: &str = "chatmux";
const CONFIG_FILE: &str = "config.json";
const DEFAULT_DRIVER: &str = "chatmux-driver";

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config {}: {source}", path.display())]
	Read { path: PathBuf, source: io::Error },

	#[error("invalid config {}: {source}", path.display())]
	Parse { path: PathBuf, source: serde_json::Error },

	#[error("config {} has schema {found}, expected {SCHEMA_VERSION}", path.display())]
	Schema { path: PathBuf, found: u32 },

	#[error("failed to write config {}: {source}", path.display())]
	Write { path: PathBuf, source: io::Error },
}

/// Driver process launched for every session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverSettings {
	pub program: PathBuf,
	#[serde(default)]
	pub args: Vec<String>,
}

impl Default for DriverSettings {
	fn default() -> Self {
		Self {
			program: PathBuf::from(DEFAULT_DRIVER),
			args: Vec::new(),
		}
	}
}

/// Effective server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
	pub schema: u32,
	pub host: String,
	pub port: u16,
	pub driver: DriverSettings,
	/// Parent of the per-session credential directories.
	pub auth_dir: PathBuf,
	pub max_auth_challenges: u32,
	pub teardown_timeout_ms: u64,
	pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			schema: SCHEMA_VERSION,
			host: "127.0.0.1".to_string(),
			port: 3000,
			driver: DriverSettings::default(),
			auth_dir: default_auth_dir(),
			max_auth_challenges: ManagerConfig::default().max_auth_challenges,
			teardown_timeout_ms: 10_000,
			request_timeout_ms: 30_000,
		}
	}
}

/// Values given on the command line. `None` keeps the file's value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
	pub host: Option<String>,
	pub port: Option<u16>,
	pub driver: Option<PathBuf>,
	/// Replaces the configured driver args when non-empty.
	pub driver_args: Vec<String>,
	pub auth_dir: Option<PathBuf>,
	pub max_auth_challenges: Option<u32>,
}

/// `<config_dir>/chatmux/config.json`, if the platform has a config dir.
pub fn default_path() -> Option<PathBuf> {
	dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}

/// `<data_dir>/chatmux/sessions`, falling back to `./chatmux/sessions`.
pub fn default_auth_dir() -> PathBuf {
	dirs::data_dir()
		.unwrap_or_else(|| PathBuf::from("."))
		.join(APP_DIR)
		.join("sessions")
}

impl ServerConfig {
	/// Loads `path`. Returns `Ok(None)` when the file does not exist.
	pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
		let content = match fs::read_to_string(path) {
			Ok(content) => content,
			Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
			Err(source) => {
				return Err(ConfigError::Read {
					path: path.to_path_buf(),
					source,
				});
			}
		};

		let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})?;
		if config.schema != SCHEMA_VERSION {
			return Err(ConfigError::Schema {
				path: path.to_path_buf(),
				found: config.schema,
			});
		}
		Ok(Some(config))
	}

	/// Loads the explicit file (which must exist) or the default file (which
	/// may not).
	pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
		match explicit {
			Some(path) => Self::load(path)?.ok_or_else(|| ConfigError::Read {
				path: path.to_path_buf(),
				source: io::Error::from(io::ErrorKind::NotFound),
			}),
			None => match default_path() {
				Some(path) => Ok(Self::load(&path)?.unwrap_or_default()),
				None => Ok(Self::default()),
			},
		}
	}

	pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
		let write_err = |source| ConfigError::Write {
			path: path.to_path_buf(),
			source,
		};
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent).map_err(write_err)?;
		}
		let mut json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})?;
		json.push('\n');
		fs::write(path, json).map_err(write_err)
	}

	pub fn merge(&mut self, overrides: Overrides) {
		if let Some(host) = overrides.host {
			self.host = host;
		}
		if let Some(port) = overrides.port {
			self.port = port;
		}
		if let Some(program) = overrides.driver {
			self.driver.program = program;
		}
		if !overrides.driver_args.is_empty() {
			self.driver.args = overrides.driver_args;
		}
		if let Some(auth_dir) = overrides.auth_dir {
			self.auth_dir = auth_dir;
		}
		if let Some(max) = overrides.max_auth_challenges {
			self.max_auth_challenges = max;
		}
	}

	pub fn manager_config(&self) -> ManagerConfig {
		ManagerConfig {
			max_auth_challenges: self.max_auth_challenges,
			teardown_timeout: Duration::from_millis(self.teardown_timeout_ms),
		}
	}

	pub fn driver_config(&self) -> DriverConfig {
		let mut driver = DriverConfig::new(&self.driver.program, &self.auth_dir);
		driver.args = self.driver.args.clone();
		driver.request_timeout = Duration::from_millis(self.request_timeout_ms);
		driver
	}
}
