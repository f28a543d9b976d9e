//! Configuration loading via `ortho-config`.

use std::env;
use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::keyfile::DEFAULT_SEARCH_PATH;

/// Metadata endpoint listing the networks this instance is attached to.
pub const DEFAULT_METADATA_URL: &str = "http://169.254.169.254/openstack/latest/network_data.json";

/// Settings layered from defaults, `srv2ssh.toml` and `SRV2SSH_*`
/// environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SRV2SSH",
    discovery(
        app_name = "srv2ssh",
        env_var = "SRV2SSH_CONFIG_PATH",
        config_file_name = "srv2ssh.toml",
        dotfile_name = ".srv2ssh.toml",
        project_file_name = "srv2ssh.toml"
    )
)]
pub struct Srv2SshConfig {
    /// Directory receiving the generated host files. Defaults to
    /// `$HOME/.ssh`.
    pub ssh_dir: Option<String>,
    /// Colon-separated directories searched for `<key pair>.pem`.
    #[ortho_config(default = DEFAULT_SEARCH_PATH.to_owned())]
    pub key_search_path: String,
    /// Metadata service URL used to discover this host's networks.
    #[ortho_config(default = DEFAULT_METADATA_URL.to_owned())]
    pub metadata_url: String,
    /// Timeout for the metadata probe, in seconds.
    #[ortho_config(default = 3)]
    pub probe_timeout_secs: u64,
    /// Timeout for cloud API requests, in seconds.
    #[ortho_config(default = 24)]
    pub connect_timeout_secs: u64,
    /// Domain used when the first authorization attempt is rejected.
    #[ortho_config(default = "Default".to_owned())]
    pub default_domain: String,
    /// Name of the umbrella file written when processing all accounts.
    #[ortho_config(default = "openstacksrv.sshcfg".to_owned())]
    pub umbrella_file: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to srv2ssh.toml",
            self.description, self.env_var, self.toml_key
        ))
    }
}

impl Srv2SshConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(metadata.missing());
        }
        Ok(())
    }

    fn require_timeout(value: u64, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(metadata.missing());
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("srv2ssh")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key to set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a value is blank or a
    /// timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(dir) = &self.ssh_dir {
            Self::require_field(
                dir,
                &FieldMetadata::new("SSH directory", "SRV2SSH_SSH_DIR", "ssh_dir"),
            )?;
        }
        Self::require_field(
            &self.key_search_path,
            &FieldMetadata::new(
                "key search path",
                "SRV2SSH_KEY_SEARCH_PATH",
                "key_search_path",
            ),
        )?;
        Self::require_field(
            &self.metadata_url,
            &FieldMetadata::new("metadata URL", "SRV2SSH_METADATA_URL", "metadata_url"),
        )?;
        Self::require_timeout(
            self.probe_timeout_secs,
            &FieldMetadata::new(
                "metadata probe timeout",
                "SRV2SSH_PROBE_TIMEOUT_SECS",
                "probe_timeout_secs",
            ),
        )?;
        Self::require_timeout(
            self.connect_timeout_secs,
            &FieldMetadata::new(
                "cloud API timeout",
                "SRV2SSH_CONNECT_TIMEOUT_SECS",
                "connect_timeout_secs",
            ),
        )?;
        Self::require_field(
            &self.default_domain,
            &FieldMetadata::new("default domain", "SRV2SSH_DEFAULT_DOMAIN", "default_domain"),
        )?;
        Self::require_field(
            &self.umbrella_file,
            &FieldMetadata::new("umbrella file name", "SRV2SSH_UMBRELLA_FILE", "umbrella_file"),
        )?;
        Ok(())
    }

    /// Directory for the host files: the configured one, else `$HOME/.ssh`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingHome`] when neither is available.
    pub fn resolved_ssh_dir(&self) -> Result<Utf8PathBuf, ConfigError> {
        if let Some(dir) = &self.ssh_dir {
            return Ok(Utf8PathBuf::from(dir.trim()));
        }
        Ok(home_dir()?.join(".ssh"))
    }

    /// Metadata probe timeout.
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Cloud API request timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// The user's home directory, from `$HOME`.
///
/// # Errors
///
/// Returns [`ConfigError::MissingHome`] when `HOME` is unset or not UTF-8.
pub fn home_dir() -> Result<Utf8PathBuf, ConfigError> {
    env::var("HOME")
        .ok()
        .filter(|home| !home.trim().is_empty())
        .map(Utf8PathBuf::from)
        .ok_or(ConfigError::MissingHome)
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Raised when no home directory can be determined.
    #[error("HOME is not set; set SRV2SSH_SSH_DIR or add ssh_dir to srv2ssh.toml")]
    MissingHome,
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn defaults() -> Srv2SshConfig {
        Srv2SshConfig {
            ssh_dir: None,
            key_search_path: DEFAULT_SEARCH_PATH.to_owned(),
            metadata_url: DEFAULT_METADATA_URL.to_owned(),
            probe_timeout_secs: 3,
            connect_timeout_secs: 24,
            default_domain: String::from("Default"),
            umbrella_file: String::from("openstacksrv.sshcfg"),
        }
    }

    #[rstest]
    fn defaults_validate(defaults: Srv2SshConfig) {
        assert_eq!(defaults.validate(), Ok(()));
        assert_eq!(defaults.probe_timeout(), Duration::from_secs(3));
        assert_eq!(defaults.connect_timeout(), Duration::from_secs(24));
    }

    #[rstest]
    #[case::search_path(|cfg: &mut Srv2SshConfig| cfg.key_search_path.clear(), "SRV2SSH_KEY_SEARCH_PATH")]
    #[case::metadata(|cfg: &mut Srv2SshConfig| cfg.metadata_url = String::from("  "), "SRV2SSH_METADATA_URL")]
    #[case::probe(|cfg: &mut Srv2SshConfig| cfg.probe_timeout_secs = 0, "SRV2SSH_PROBE_TIMEOUT_SECS")]
    #[case::connect(|cfg: &mut Srv2SshConfig| cfg.connect_timeout_secs = 0, "SRV2SSH_CONNECT_TIMEOUT_SECS")]
    #[case::domain(|cfg: &mut Srv2SshConfig| cfg.default_domain.clear(), "SRV2SSH_DEFAULT_DOMAIN")]
    #[case::ssh_dir(|cfg: &mut Srv2SshConfig| cfg.ssh_dir = Some(String::new()), "SRV2SSH_SSH_DIR")]
    fn validation_names_env_var(
        defaults: Srv2SshConfig,
        #[case] mutate: fn(&mut Srv2SshConfig),
        #[case] env_var: &str,
    ) {
        let mut cfg = defaults;
        mutate(&mut cfg);

        let err = cfg
            .validate()
            .expect_err("validation should fail");

        let message = err.to_string();
        assert!(message.contains(env_var), "{message}");
        assert!(message.contains("srv2ssh.toml"), "{message}");
    }

    #[rstest]
    fn explicit_ssh_dir_wins(defaults: Srv2SshConfig) {
        let cfg = Srv2SshConfig {
            ssh_dir: Some(String::from("/srv/ssh ")),
            ..defaults
        };

        assert_eq!(
            cfg.resolved_ssh_dir(),
            Ok(Utf8PathBuf::from("/srv/ssh"))
        );
    }
}
