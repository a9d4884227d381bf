use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
}

/// Where the file layer of an [`AppConfig`] came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigSource {
    #[default]
    Defaults,
    File(PathBuf),
    MissingFile(PathBuf),
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub jobs_dir: PathBuf,
    pub inventory_path: PathBuf,
    pub executor: ExecutorConfig,
    pub logging: LoggingConfig,
    #[serde(skip)]
    pub source: ConfigSource,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    pub shell: String,
    /// Per-command limit; unset means commands may run forever.
    pub timeout_secs: Option<u64>,
    /// Reach non-local nodes over ssh. Without it every node runs locally.
    pub ssh: Option<SshConfig>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SshConfig {
    pub binary: String,
    pub options: Vec<String>,
    pub default_user: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: PathBuf,
    pub file_prefix: String,
    /// Write the daily JSON log file next to stdout output.
    pub file: bool,
    /// `EnvFilter` directives; `RUST_LOG` wins when set.
    pub filter: Option<String>,
}

fn default_jobs_dir() -> PathBuf {
    PathBuf::from("jobs")
}

fn default_inventory_path() -> PathBuf {
    PathBuf::from("nodes.toml")
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            jobs_dir: default_jobs_dir(),
            inventory_path: default_inventory_path(),
            executor: ExecutorConfig::default(),
            logging: LoggingConfig::default(),
            source: ConfigSource::Defaults,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            timeout_secs: None,
            ssh: None,
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            binary: "ssh".to_string(),
            options: vec!["-o".to_string(), "BatchMode=yes".to_string()],
            default_user: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_log_dir(),
            file_prefix: "jobctl.log".to_string(),
            file: true,
            filter: None,
        }
    }
}

/// `JOBCTL_*` variables, layered over the file.
#[derive(Deserialize, Default, Debug)]
struct EnvOverrides {
    jobs_dir: Option<PathBuf>,
    inventory: Option<PathBuf>,
    shell: Option<String>,
    timeout_secs: Option<u64>,
    ssh_user: Option<String>,
    log_dir: Option<PathBuf>,
    log_filter: Option<String>,
}

impl AppConfig {
    /// Defaults, then the TOML file (if it exists), then `JOBCTL_*` variables.
    ///
    /// Nothing is logged here since logging is configured from the result;
    /// call [`AppConfig::log_source`] once it is up.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::load_with_env(config_path, std::env::vars())
    }

    pub fn load_with_env(
        config_path: Option<&Path>,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })?;
                let mut config: AppConfig = toml::from_str(&contents)?;
                config.source = ConfigSource::File(path.to_path_buf());
                config
            }
            Some(path) => AppConfig {
                source: ConfigSource::MissingFile(path.to_path_buf()),
                ..AppConfig::default()
            },
            None => AppConfig::default(),
        };

        let env: EnvOverrides = envy::prefixed("JOBCTL_").from_iter(vars)?;
        config.apply(env);
        Ok(config)
    }

    pub fn log_source(&self) {
        match &self.source {
            ConfigSource::Defaults => info!("No config file given, using defaults."),
            ConfigSource::File(path) => info!(path = ?path, "Loaded config file."),
            ConfigSource::MissingFile(path) => {
                warn!(path = ?path, "Config file not found, using defaults.")
            }
        }
    }

    fn apply(&mut self, env: EnvOverrides) {
        if let Some(dir) = env.jobs_dir {
            self.jobs_dir = dir;
        }
        if let Some(path) = env.inventory {
            self.inventory_path = path;
        }
        if let Some(shell) = env.shell {
            self.executor.shell = shell;
        }
        if let Some(secs) = env.timeout_secs {
            self.executor.timeout_secs = Some(secs);
        }
        if let Some(user) = env.ssh_user {
            self.executor.ssh.get_or_insert_with(SshConfig::default).default_user = Some(user);
        }
        if let Some(dir) = env.log_dir {
            self.logging.directory = dir;
        }
        if let Some(filter) = env.log_filter {
            self.logging.filter = Some(filter);
        }
    }
}
