//! Configuration module for the Peppol AS2 subsystem.
//!
//! This module provides structures and utilities for managing the sender
//! and receiver configuration. It supports loading configuration from TOML
//! files with environment variable resolution and validates that all
//! recognized options are sensible before they reach the pipeline.

use peppol_types::{ContentTransferEncoding, TransportProfile};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Extract just the message without the input dump.
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the AS2 subsystem.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Send pipeline options.
	#[serde(default)]
	pub client: ClientConfig,
	/// Key store location and persistence policy.
	pub keystore: KeyStoreConfig,
	/// Inbound endpoint configuration; absent for send-only deployments.
	pub server: Option<ServerConfig>,
	/// SMP lookup configuration; absent when endpoints are preconfigured.
	pub smp: Option<SmpConfig>,
}

/// Send pipeline options.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
	/// Bound on TCP connect plus TLS handshake, in milliseconds.
	#[serde(default = "default_connect_timeout_ms")]
	pub connect_timeout_ms: u64,
	/// Bound on any single socket read, in milliseconds.
	#[serde(default = "default_read_timeout_ms")]
	pub read_timeout_ms: u64,
	/// Attach the payload as typed binary (true) or as a UTF-8 string with
	/// an explicit content type (false).
	#[serde(default = "default_use_data_handler")]
	pub use_data_handler: bool,
	/// Transfer encoding of the AS2 body part.
	#[serde(default)]
	pub content_transfer_encoding: ContentTransferEncoding,
	/// MIME type of the AS2 body part.
	#[serde(default = "default_mime_type")]
	pub mime_type: String,
	/// Ordered transport profile preference for endpoint selection.
	#[serde(default = "default_transport_profiles")]
	pub transport_profiles: Vec<TransportProfile>,
	/// Optional prefix the SBDH namespace is bound to. Unset means the
	/// default (empty) prefix, which is what deployed receivers expect.
	#[serde(default)]
	pub sbdh_prefix: Option<String>,
	/// The `TypeVersion` stamped into the SBDH.
	#[serde(default = "default_ubl_version")]
	pub ubl_version: String,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			connect_timeout_ms: default_connect_timeout_ms(),
			read_timeout_ms: default_read_timeout_ms(),
			use_data_handler: default_use_data_handler(),
			content_transfer_encoding: ContentTransferEncoding::default(),
			mime_type: default_mime_type(),
			transport_profiles: default_transport_profiles(),
			sbdh_prefix: None,
			ubl_version: default_ubl_version(),
		}
	}
}

/// Key store location and persistence policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeyStoreConfig {
	/// Container type; only `pkcs12` is supported.
	#[serde(default = "default_keystore_type", rename = "type")]
	pub store_type: String,
	/// Path to the container file.
	pub path: String,
	/// Container password.
	pub password: String,
	/// Persist newly learned partner certificates back to the file.
	#[serde(default)]
	pub save_changes_to_file: bool,
}

/// Inbound endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
	/// Host address to bind the server to.
	#[serde(default = "default_server_host")]
	pub host: String,
	/// Port to bind the server to.
	#[serde(default = "default_server_port")]
	pub port: u16,
	/// Path the AS2 endpoint is served under.
	#[serde(default = "default_as2_path")]
	pub as2_path: String,
}

/// SMP lookup configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SmpConfig {
	/// The SML zone SMP hostnames are published under.
	#[serde(default = "default_sml_zone")]
	pub sml_zone: String,
}

fn default_connect_timeout_ms() -> u64 {
	30_000
}

fn default_read_timeout_ms() -> u64 {
	60_000
}

fn default_use_data_handler() -> bool {
	true
}

fn default_mime_type() -> String {
	"application/xml".to_string()
}

fn default_transport_profiles() -> Vec<TransportProfile> {
	peppol_types::default_transport_profiles()
}

fn default_ubl_version() -> String {
	"2.1".to_string()
}

fn default_keystore_type() -> String {
	"pkcs12".to_string()
}

fn default_server_host() -> String {
	"127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
	8878
}

fn default_as2_path() -> String {
	"/as2".to_string()
}

fn default_sml_zone() -> String {
	"edelivery.tech.ec.europa.eu".to_string()
}

/// Resolves environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of the environment variable, and
/// supports default values with `${VAR_NAME:-default_value}`.
///
/// Input strings are limited to 1MB to prevent ReDoS attacks.
fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = input.to_string();
	let mut replacements = Vec::new();

	for cap in re.captures_iter(input) {
		let full_match = cap.get(0).expect("capture 0 always present");
		let var_name = cap.get(1).expect("group 1 always present").as_str();
		let default_value = cap.get(2).map(|m| m.as_str());

		let value = match std::env::var(var_name) {
			Ok(v) => v,
			Err(_) => match default_value {
				Some(default) => default.to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name
					)))
				}
			},
		};

		replacements.push((full_match.start(), full_match.end(), value));
	}

	// Apply replacements in reverse order to maintain positions.
	for (start, end, value) in replacements.iter().rev() {
		result.replace_range(start..end, value);
	}

	Ok(result)
}

impl Config {
	/// Loads configuration from a file at the specified path.
	///
	/// Environment variables can be referenced using `${VAR_NAME}` or
	/// `${VAR_NAME:-default}`. The configuration is validated before being
	/// returned.
	pub fn from_file(path: &str) -> Result<Self, ConfigError> {
		let content = std::fs::read_to_string(path)?;
		content.parse()
	}

	/// Validates the configuration.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.client.connect_timeout_ms == 0 {
			return Err(ConfigError::Validation(
				"connect_timeout_ms must be greater than 0".into(),
			));
		}
		if self.client.read_timeout_ms == 0 {
			return Err(ConfigError::Validation(
				"read_timeout_ms must be greater than 0".into(),
			));
		}
		if self.client.transport_profiles.is_empty() {
			return Err(ConfigError::Validation(
				"At least one transport profile required".into(),
			));
		}
		if self.client.mime_type.is_empty() {
			return Err(ConfigError::Validation("mime_type cannot be empty".into()));
		}

		if !self.keystore.store_type.eq_ignore_ascii_case("pkcs12") {
			return Err(ConfigError::Validation(format!(
				"Unsupported key store type '{}', only pkcs12 is supported",
				self.keystore.store_type
			)));
		}
		if self.keystore.path.is_empty() {
			return Err(ConfigError::Validation(
				"Key store path cannot be empty".into(),
			));
		}

		if let Some(server) = &self.server {
			if server.port == 0 {
				return Err(ConfigError::Validation(
					"Server port must be greater than 0".into(),
				));
			}
			if !server.as2_path.starts_with('/') {
				return Err(ConfigError::Validation(
					"Server as2_path must start with '/'".into(),
				));
			}
		}

		if let Some(smp) = &self.smp {
			if smp.sml_zone.is_empty() {
				return Err(ConfigError::Validation(
					"SML zone cannot be empty".into(),
				));
			}
		}

		Ok(())
	}
}

/// Implementation of FromStr for Config to enable parsing from string.
///
/// Environment variables are resolved and the configuration is
/// automatically validated after parsing.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_env_var_resolution() {
		std::env::set_var("TEST_AS2_HOST", "localhost");
		std::env::set_var("TEST_AS2_PORT", "8878");

		let input = "url = \"http://${TEST_AS2_HOST}:${TEST_AS2_PORT}/as2\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "url = \"http://localhost:8878/as2\"");

		std::env::remove_var("TEST_AS2_HOST");
		std::env::remove_var("TEST_AS2_PORT");
	}

	#[test]
	fn test_env_var_with_default() {
		let input = "value = \"${MISSING_AS2_VAR:-fallback}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "value = \"fallback\"");
	}

	#[test]
	fn test_missing_env_var_error() {
		let input = "value = \"${MISSING_AS2_VAR}\"";
		let result = resolve_env_vars(input);
		assert!(result.is_err());
		assert!(result.unwrap_err().to_string().contains("MISSING_AS2_VAR"));
	}

	#[test]
	fn test_minimal_config_with_defaults() {
		let config: Config = r#"
[keystore]
path = "ap.p12"
password = "secret"
"#
		.parse()
		.unwrap();

		assert_eq!(config.client.connect_timeout_ms, 30_000);
		assert_eq!(config.client.read_timeout_ms, 60_000);
		assert!(config.client.use_data_handler);
		assert_eq!(
			config.client.content_transfer_encoding,
			ContentTransferEncoding::Binary
		);
		assert_eq!(config.client.mime_type, "application/xml");
		assert_eq!(
			config.client.transport_profiles,
			vec![TransportProfile::as2_v2(), TransportProfile::as2_v1()]
		);
		assert_eq!(config.client.ubl_version, "2.1");
		assert_eq!(config.keystore.store_type, "pkcs12");
		assert!(!config.keystore.save_changes_to_file);
		assert!(config.server.is_none());
	}

	#[test]
	fn test_full_config() {
		std::env::set_var("TEST_KEYSTORE_PASSWORD", "hunter2");

		let config: Config = r#"
[client]
connect_timeout_ms = 5000
read_timeout_ms = 20000
use_data_handler = false
content_transfer_encoding = "base64"
transport_profiles = ["busdox-transport-as2-ver1p0"]
sbdh_prefix = "sh"
ubl_version = "2.2"

[keystore]
path = "/var/lib/peppol/ap.p12"
password = "${TEST_KEYSTORE_PASSWORD}"
save_changes_to_file = true

[server]
host = "0.0.0.0"
port = 10080

[smp]
sml_zone = "acc.edelivery.tech.ec.europa.eu"
"#
		.parse()
		.unwrap();

		assert_eq!(config.keystore.password, "hunter2");
		assert!(!config.client.use_data_handler);
		assert_eq!(
			config.client.content_transfer_encoding,
			ContentTransferEncoding::Base64
		);
		assert_eq!(
			config.client.transport_profiles,
			vec![TransportProfile::as2_v1()]
		);
		assert_eq!(config.client.sbdh_prefix.as_deref(), Some("sh"));
		assert_eq!(config.client.ubl_version, "2.2");
		let server = config.server.unwrap();
		assert_eq!(server.port, 10080);
		assert_eq!(server.as2_path, "/as2");

		std::env::remove_var("TEST_KEYSTORE_PASSWORD");
	}

	#[test]
	fn test_rejects_zero_timeout() {
		let result: Result<Config, _> = r#"
[client]
connect_timeout_ms = 0

[keystore]
path = "ap.p12"
password = "secret"
"#
		.parse();
		assert!(matches!(result, Err(ConfigError::Validation(_))));
	}

	#[test]
	fn test_rejects_unsupported_keystore_type() {
		let result: Result<Config, _> = r#"
[keystore]
type = "jks"
path = "ap.jks"
password = "secret"
"#
		.parse();
		assert!(matches!(result, Err(ConfigError::Validation(_))));
	}
}
