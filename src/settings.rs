//! Code for loading program settings.
use crate::input::read_toml;
use crate::log::DEFAULT_LOG_LEVEL;
use anyhow::{Result, ensure};
use documented::DocumentedFields;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SETTINGS_FILE_NAME: &str = "settings.toml";

/// The name of the folder containing program configuration and data
const CONFIG_DIR_NAME: &str = "journal-scenarios";

const DEFAULT_SETTINGS_FILE_HEADER: &str = "# This file contains the program settings for journal-scenarios
";

/// Default log level for program
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

/// Default location of the primary store
fn default_database_path() -> PathBuf {
    get_config_dir().join("primary.sqlite")
}

/// Default location of the local reference snapshot
fn default_snapshot_path() -> PathBuf {
    get_config_dir().join("reference_snapshot.sqlite")
}

/// Default root folder for archived snapshots and blobs
fn default_object_store_dir() -> PathBuf {
    get_config_dir().join("objects")
}

fn default_member_fetch_timeout_secs() -> u64 {
    30
}

fn default_fanout_workers() -> usize {
    10
}

fn default_worker_min_sleep_secs() -> u64 {
    1
}

fn default_worker_max_sleep_secs() -> u64 {
    5
}

/// Get the folder where program settings and local data live
pub fn get_config_dir() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(CONFIG_DIR_NAME);

    path
}

/// Get the path to where the settings file will be read from
pub fn get_settings_file_path() -> PathBuf {
    let mut path = get_config_dir();
    path.push(SETTINGS_FILE_NAME);

    path
}

/// Program settings from config file
#[derive(Debug, DocumentedFields, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// The default program log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Path to the primary SQLite store
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Path to the locally materialised reference snapshot
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    /// Folder used as long-term object storage for snapshot archives and the common data blob
    #[serde(default = "default_object_store_dir")]
    pub object_store_dir: PathBuf,
    /// Base URL of the member scenario endpoint. If unset, member scenarios are computed locally.
    #[serde(default)]
    pub member_endpoint: Option<String>,
    /// How long to wait for one member's scenario before counting it as failed, in seconds
    #[serde(default = "default_member_fetch_timeout_secs")]
    pub member_fetch_timeout_secs: u64,
    /// How many member scenarios to fetch concurrently
    #[serde(default = "default_fanout_workers")]
    pub fanout_workers: usize,
    /// Minimum sleep between recompute queue polls, in seconds
    #[serde(default = "default_worker_min_sleep_secs")]
    pub worker_min_sleep_secs: u64,
    /// Maximum sleep between recompute queue polls, in seconds
    #[serde(default = "default_worker_max_sleep_secs")]
    pub worker_max_sleep_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            database_path: default_database_path(),
            snapshot_path: default_snapshot_path(),
            object_store_dir: default_object_store_dir(),
            member_endpoint: None,
            member_fetch_timeout_secs: default_member_fetch_timeout_secs(),
            fanout_workers: default_fanout_workers(),
            worker_min_sleep_secs: default_worker_min_sleep_secs(),
            worker_max_sleep_secs: default_worker_max_sleep_secs(),
        }
    }
}

impl Settings {
    /// Read the contents of the settings file from the program config directory.
    ///
    /// If the file is not present, default values for settings will be used
    ///
    /// # Returns
    ///
    /// The program settings as a `Settings` struct or an error if the file is invalid
    pub fn load() -> Result<Settings> {
        Self::load_from_path(&get_settings_file_path())
    }

    /// Read from the specified path, falling back to defaults if there is no file
    pub fn load_from_path(file_path: &Path) -> Result<Settings> {
        if !file_path.is_file() {
            return Ok(Settings::default());
        }

        let settings: Settings = read_toml(file_path)?;
        settings.validate()?;

        Ok(settings)
    }

    /// Check the settings are usable
    fn validate(&self) -> Result<()> {
        ensure!(self.fanout_workers > 0, "fanout_workers cannot be zero");
        ensure!(
            self.member_fetch_timeout_secs > 0,
            "member_fetch_timeout_secs cannot be zero"
        );
        ensure!(
            self.worker_min_sleep_secs <= self.worker_max_sleep_secs,
            "worker_min_sleep_secs cannot be greater than worker_max_sleep_secs"
        );

        Ok(())
    }

    /// The time limit for fetching one member's scenario
    pub fn member_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.member_fetch_timeout_secs)
    }

    /// The contents of the default settings file
    pub fn default_file_contents() -> String {
        // Settings object with default values set by serde
        let settings: Settings =
            toml::from_str("").expect("Cannot create settings from empty TOML file");

        // Convert to TOML
        let settings_raw = toml::to_string(&settings).expect("Could not convert settings to TOML");

        // Iterate through the generated TOML, commenting out lines and adding docs
        let mut out = DEFAULT_SETTINGS_FILE_HEADER.to_string();
        for line in settings_raw.split('\n') {
            if let Some(last) = line.find('=') {
                // Add documentation from doc comments
                let field = line[..last].trim();

                // Use doc comment to document parameter. All fields should have doc comments.
                let docs = Settings::get_field_docs(field).expect("Missing doc comment for field");
                for line in docs.split('\n') {
                    write!(&mut out, "\n# # {}\n", line.trim()).unwrap();
                }

                writeln!(&mut out, "# {}", line.trim()).unwrap();
            }
        }

        out
    }
}
