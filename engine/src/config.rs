//! Run configuration.
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults
//! 2. a TOML file (`cfgbackup.toml` in the working directory, or an explicit path)
//! 3. `CFGBACKUP__SECTION__KEY` environment variables
//! 4. the legacy variable names of `.env` deployments (`GDRIVE_FOLDER_ID`, ...)
//!
//! Components never read the environment themselves; they receive the
//! typed values produced here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use crate::automation::CommandDriver;
use crate::checksums::ChecksumAlgorithm;
use crate::error::EngineError;
use crate::fs_ops::RetryPolicy;
use crate::gdrive::DriveCredentials;
use crate::watcher::{WatchOptions, DEFAULT_IN_PROGRESS_SUFFIXES};

/// Looked up in the working directory when no file is given.
pub const DEFAULT_CONFIG_NAME: &str = "cfgbackup";

/// Config keys fed from the variable names used by `.env` files.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("download_dir", "DOWNLOAD_DIR"),
    ("archive_prefix", "BACKUP_FILENAME_PREFIX"),
    ("automation.command", "AUTOMATION_COMMAND"),
    ("automation.target_url", "TARGET_URL"),
    ("drive.client_id", "GDRIVE_CLIENT_ID"),
    ("drive.client_secret", "GDRIVE_CLIENT_SECRET"),
    ("drive.refresh_token", "GDRIVE_REFRESH_TOKEN"),
    ("drive.folder_id", "GDRIVE_FOLDER_ID"),
];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Where reconciled archives live; defaults to `download_dir`
    #[serde(default)]
    pub archive_dir: Option<PathBuf>,
    #[serde(default)]
    pub archive_prefix: Option<String>,
    #[serde(default)]
    pub automation: AutomationSettings,
    #[serde(default)]
    pub watch: WatchSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub drive: DriveSettings,
    #[serde(default)]
    pub hash: HashSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AutomationSettings {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub timeout_secs: u64,
    /// Passed to the command as `TARGET_URL`
    pub target_url: Option<String>,
}

impl Default for AutomationSettings {
    fn default() -> Self {
        AutomationSettings {
            command: None,
            args: Vec::new(),
            timeout_secs: 300,
            target_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub grace_period_ms: u64,
    pub in_progress_suffixes: Vec<String>,
}

impl Default for WatchSettings {
    fn default() -> Self {
        WatchSettings {
            timeout_secs: 60,
            poll_interval_ms: 500,
            grace_period_ms: 2000,
            in_progress_suffixes: DEFAULT_IN_PROGRESS_SUFFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 8000,
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DriveSettings {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub folder_id: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

impl std::fmt::Debug for DriveSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("folder_id", &self.folder_id)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HashSettings {
    pub algorithm: String,
}

impl Default for HashSettings {
    fn default() -> Self {
        HashSettings {
            algorithm: ChecksumAlgorithm::default().to_string(),
        }
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("files")
}

fn config_error(err: ConfigError) -> EngineError {
    EngineError::invalid_config("config", err.to_string())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl AppConfig {
    /// Load configuration from `path` (or the default file, if present) and
    /// the process environment.
    pub fn load(path: Option<&Path>) -> Result<AppConfig, EngineError> {
        Self::load_from(path, std::env::vars().collect())
    }

    /// Load configuration with an explicit set of environment variables.
    pub fn load_from(path: Option<&Path>, vars: HashMap<String, String>) -> Result<AppConfig, EngineError> {
        let mut builder = Config::builder();
        builder = match path {
            Some(p) => builder.add_source(ConfigFile::from(p).required(true)),
            None => builder.add_source(ConfigFile::with_name(DEFAULT_CONFIG_NAME).required(false)),
        };

        for (key, var) in LEGACY_ENV {
            let value = vars.get(*var).filter(|v| !v.trim().is_empty()).cloned();
            builder = builder.set_override_option(*key, value).map_err(config_error)?;
        }

        builder = builder.add_source(
            Environment::with_prefix("CFGBACKUP")
                .separator("__")
                .source(Some(vars.into_iter().collect())),
        );

        builder
            .build()
            .and_then(Config::try_deserialize)
            .map_err(config_error)
    }

    /// Directory reconciled archives are written to.
    pub fn archive_dir(&self) -> &Path {
        self.archive_dir.as_deref().unwrap_or(&self.download_dir)
    }

    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            timeout: Duration::from_secs(self.watch.timeout_secs),
            poll_interval: Duration::from_millis(self.watch.poll_interval_ms),
            grace_period: Duration::from_millis(self.watch.grace_period_ms),
            in_progress_suffixes: self.watch.in_progress_suffixes.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry.attempts,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn checksum_algorithm(&self) -> Result<ChecksumAlgorithm, EngineError> {
        ChecksumAlgorithm::from_str(&self.hash.algorithm).ok_or_else(|| {
            EngineError::invalid_config(
                "hash.algorithm",
                format!("unknown algorithm '{}' (expected sha256 or blake3)", self.hash.algorithm),
            )
        })
    }

    /// # Errors
    /// `InvalidConfig` naming the first missing credential.
    pub fn drive_credentials(&self) -> Result<DriveCredentials, EngineError> {
        let require = |value: &Option<String>, key: &str, var: &str| {
            non_empty(value)
                .map(str::to_string)
                .ok_or_else(|| EngineError::invalid_config(key, format!("authentication missing, set {}", var)))
        };
        Ok(DriveCredentials {
            client_id: require(&self.drive.client_id, "drive.client_id", "GDRIVE_CLIENT_ID")?,
            client_secret: require(&self.drive.client_secret, "drive.client_secret", "GDRIVE_CLIENT_SECRET")?,
            refresh_token: require(&self.drive.refresh_token, "drive.refresh_token", "GDRIVE_REFRESH_TOKEN")?,
        })
    }

    pub fn folder_id(&self) -> Result<String, EngineError> {
        non_empty(&self.drive.folder_id)
            .map(str::to_string)
            .ok_or_else(|| {
                EngineError::invalid_config(
                    "drive.folder_id",
                    "no destination folder specified, set GDRIVE_FOLDER_ID",
                )
            })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.drive.request_timeout_secs.unwrap_or(120))
    }

    /// Build the external-command automation driver.
    pub fn automation_driver(&self) -> Result<CommandDriver, EngineError> {
        let command = non_empty(&self.automation.command).ok_or_else(|| {
            EngineError::invalid_config(
                "automation.command",
                "no automation command configured, set AUTOMATION_COMMAND",
            )
        })?;
        let mut driver = CommandDriver::new(
            command,
            self.automation.args.clone(),
            Duration::from_secs(self.automation.timeout_secs),
        );
        if let Some(url) = non_empty(&self.automation.target_url) {
            driver = driver.env("TARGET_URL", url);
        }
        Ok(driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn write_config(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("cfgbackup.toml");
        fs::write(&path, content).expect("Failed to write config");
        path
    }

    #[test]
    fn test_defaults_without_sources() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = write_config(temp_dir.path(), "");
        let config = AppConfig::load_from(Some(&path), HashMap::new()).expect("Load failed");

        assert_eq!(config.download_dir, PathBuf::from("files"));
        assert_eq!(config.archive_dir(), Path::new("files"));
        assert!(config.archive_prefix.is_none());
        assert_eq!(config.watch_options(), WatchOptions::default());
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.checksum_algorithm().unwrap(), ChecksumAlgorithm::Sha256);
    }

    #[test]
    fn test_file_values() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = write_config(
            temp_dir.path(),
            r#"
download_dir = "/var/backups/incoming"
archive_dir = "/var/backups/pfsense"
archive_prefix = "fw-"

[watch]
timeout_secs = 90
grace_period_ms = 500
in_progress_suffixes = [".crdownload"]

[hash]
algorithm = "blake3"

[drive]
folder_id = "folder-from-file"
"#,
        );
        let config = AppConfig::load_from(Some(&path), HashMap::new()).expect("Load failed");

        assert_eq!(config.archive_dir(), Path::new("/var/backups/pfsense"));
        assert_eq!(config.archive_prefix.as_deref(), Some("fw-"));
        let watch = config.watch_options();
        assert_eq!(watch.timeout, Duration::from_secs(90));
        assert_eq!(watch.poll_interval, Duration::from_millis(500));
        assert_eq!(watch.grace_period, Duration::from_millis(500));
        assert_eq!(watch.in_progress_suffixes, vec![".crdownload".to_string()]);
        assert_eq!(config.checksum_algorithm().unwrap(), ChecksumAlgorithm::Blake3);
        assert_eq!(config.folder_id().unwrap(), "folder-from-file");
    }

    #[test]
    fn test_legacy_env_overrides_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = write_config(temp_dir.path(), "archive_prefix = \"file-\"\n[drive]\nfolder_id = \"file-folder\"\n");
        let config = AppConfig::load_from(
            Some(&path),
            vars(&[
                ("BACKUP_FILENAME_PREFIX", "env-"),
                ("GDRIVE_FOLDER_ID", "0AbCdEf"),
                ("GDRIVE_CLIENT_ID", "id"),
                ("GDRIVE_CLIENT_SECRET", "secret"),
                ("GDRIVE_REFRESH_TOKEN", "token"),
            ]),
        )
        .expect("Load failed");

        assert_eq!(config.archive_prefix.as_deref(), Some("env-"));
        assert_eq!(config.folder_id().unwrap(), "0AbCdEf");
        let credentials = config.drive_credentials().expect("Credentials missing");
        assert_eq!(credentials.client_id, "id");
        assert_eq!(credentials.refresh_token, "token");
    }

    #[test]
    fn test_blank_legacy_env_is_ignored() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = write_config(temp_dir.path(), "archive_prefix = \"file-\"\n");
        let config = AppConfig::load_from(Some(&path), vars(&[("BACKUP_FILENAME_PREFIX", "  ")]))
            .expect("Load failed");
        assert_eq!(config.archive_prefix.as_deref(), Some("file-"));
    }

    #[test]
    fn test_missing_credentials_name_the_variable() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = write_config(temp_dir.path(), "");
        let config = AppConfig::load_from(Some(&path), vars(&[("GDRIVE_CLIENT_ID", "id")]))
            .expect("Load failed");

        match config.drive_credentials() {
            Err(EngineError::InvalidConfig { key, reason }) => {
                assert_eq!(key, "drive.client_secret");
                assert!(reason.contains("GDRIVE_CLIENT_SECRET"));
            }
            other => panic!("Expected InvalidConfig, got {:?}", other),
        }
        assert!(config.folder_id().is_err());
    }

    #[test]
    fn test_unknown_hash_algorithm() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = write_config(temp_dir.path(), "[hash]\nalgorithm = \"md5\"\n");
        let config = AppConfig::load_from(Some(&path), HashMap::new()).expect("Load failed");
        assert!(matches!(
            config.checksum_algorithm(),
            Err(EngineError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_automation_driver_requires_command() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = write_config(temp_dir.path(), "");
        let config = AppConfig::load_from(Some(&path), HashMap::new()).expect("Load failed");
        assert!(config.automation_driver().is_err());

        let config = AppConfig::load_from(
            Some(&path),
            vars(&[("AUTOMATION_COMMAND", "./fetch-backup.sh"), ("TARGET_URL", "https://fw.lan")]),
        )
        .expect("Load failed");
        assert!(config.automation_driver().is_ok());
        assert_eq!(config.automation.target_url.as_deref(), Some("https://fw.lan"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = AppConfig::load_from(Some(&temp_dir.path().join("nope.toml")), HashMap::new());
        assert!(matches!(result, Err(EngineError::InvalidConfig { .. })));
    }

    #[test]
    fn test_settings_debug_redacts_secrets() {
        let settings = DriveSettings {
            client_secret: Some("s3cret".to_string()),
            refresh_token: Some("1//token".to_string()),
            ..DriveSettings::default()
        };
        let text = format!("{:?}", settings);
        assert!(!text.contains("s3cret"));
        assert!(!text.contains("1//token"));
    }
}
