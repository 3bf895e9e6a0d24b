//! Configuration management for archivectl.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

use crate::error::ControlError;

/// Default DICOM storage SCP port.
pub const DEFAULT_STORAGE_PORT: u16 = 6666;
/// Default query/retrieve SCP port.
pub const DEFAULT_QUERY_RETRIEVE_PORT: u16 = 1045;
/// Default web server port.
pub const DEFAULT_WEB_PORT: u16 = 8080;
/// Worker count used when neither the environment nor the file set one.
pub const DEFAULT_TASK_THREADS: usize = 4;
/// Environment variable overriding the task manager worker count.
pub const TASK_THREADS_ENV: &str = "ARCHIVECTL_TASK_THREADS";

/// Snapshot of the server settings, read once at process start.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerSettings {
    /// Storage SCP settings.
    #[serde(default)]
    pub storage: StorageSettings,
    /// Query/retrieve SCP settings.
    #[serde(default)]
    pub query_retrieve: QueryRetrieveSettings,
    /// Web server settings.
    #[serde(default)]
    pub web: WebSettings,
    /// Known storage identifiers (SOP class UIDs) accepted by the storage SCP.
    #[serde(default)]
    pub sop_classes: Vec<String>,
    /// Worker pool sizing.
    #[serde(default)]
    pub task_manager: TaskManagerSettings,
}

/// Storage SCP section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Directory received studies are written to.
    pub path: Option<String>,
    #[serde(default = "default_storage_port")]
    pub port: u16,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            port: DEFAULT_STORAGE_PORT,
        }
    }
}

/// Query/retrieve SCP section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryRetrieveSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_query_retrieve_port")]
    pub port: u16,
}

impl Default for QueryRetrieveSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            port: DEFAULT_QUERY_RETRIEVE_PORT,
        }
    }
}

/// Web section. `web_services` is the legacy flag and no longer starts anything.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebSettings {
    #[serde(default)]
    pub web_server: bool,
    #[serde(default)]
    pub web_services: bool,
    #[serde(default = "default_web_port")]
    pub server_port: u16,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            web_server: false,
            web_services: false,
            server_port: DEFAULT_WEB_PORT,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TaskManagerSettings {
    pub threads: Option<usize>,
}

fn default_storage_port() -> u16 {
    DEFAULT_STORAGE_PORT
}

fn default_query_retrieve_port() -> u16 {
    DEFAULT_QUERY_RETRIEVE_PORT
}

fn default_web_port() -> u16 {
    DEFAULT_WEB_PORT
}

impl ServerSettings {
    /// Snapshot used when the configuration cannot be read: nothing is enabled.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Whether the storage SCP has both a destination path and identifiers to accept.
    pub fn storage_configured(&self) -> bool {
        let has_path = self
            .storage
            .path
            .as_deref()
            .is_some_and(|path| !path.trim().is_empty());
        has_path && !self.sop_classes.is_empty()
    }

    /// Number of workers for the task manager.
    ///
    /// The environment override wins over the file. Unparsable or zero values are
    /// skipped in favour of the next source.
    pub fn task_threads(&self) -> usize {
        env::var(TASK_THREADS_ENV)
            .ok()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|threads| *threads > 0)
            .or(self.task_manager.threads.filter(|threads| *threads > 0))
            .unwrap_or(DEFAULT_TASK_THREADS)
    }
}

/// Expands environment variables within a string.
fn expand_env_vars(input: &str) -> Result<String, ControlError> {
    let re = Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?")
        .map_err(|err| ControlError::MissingEnvVar(err.to_string()))?;

    let mut missing = None;
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(var_name) => Err(ControlError::MissingEnvVar(var_name)),
        None => Ok(result.to_string()),
    }
}

/// Loads and parses the configuration file, expanding environment variables.
pub fn load_config(config_path: Option<&str>) -> Result<ServerSettings, ControlError> {
    let config_path = config_path.map(Path::new).unwrap_or_else(|| {
        if Path::new("archive.yaml").exists() {
            Path::new("archive.yaml")
        } else {
            Path::new("archivectl.yaml")
        }
    });

    let content = fs::read_to_string(config_path).map_err(|e| {
        ControlError::ConfigReadError(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, config_path.display()),
        ))
    })?;

    let expanded_content = expand_env_vars(&content)?;

    // An empty document deserializes to unit, not to the all-default settings.
    if expanded_content.trim().is_empty() {
        return Ok(ServerSettings::default());
    }

    serde_yaml::from_str(&expanded_content).map_err(ControlError::ConfigParseError)
}
