use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Values that may appear in `config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    dimension: Option<usize>,
    wait_secs: Option<u64>,
    check_type: Option<String>,
    system_bus: Option<bool>,
    auto_start_session: Option<bool>,
}

/// Daemon configuration: config file, then `FACELOG_*` environment, then defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Feature vector dimension of the extraction model.
    pub dimension: usize,
    /// Minimum gap between two attendance events for the same person.
    pub wait_window: Duration,
    /// Camera role stored with each attendance log (e.g. "IN", "OUT").
    pub check_type: String,
    /// Serve on the system bus instead of the session bus.
    pub system_bus: bool,
    /// Start a detection session as soon as the daemon is up.
    pub auto_start_session: bool,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let file = match config_file_path() {
            Some(path) if path.exists() => read_file(&path)?,
            _ => FileConfig::default(),
        };
        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    /// Merge `file` with overrides looked up through `env`.
    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = env("FACELOG_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| data_dir().join("attendance.db"));

        Self {
            db_path,
            dimension: parse_var(&env, "FACELOG_DIMENSION")
                .or(file.dimension)
                .unwrap_or(facelog_core::DEFAULT_DIMENSION),
            wait_window: Duration::from_secs(
                parse_var(&env, "FACELOG_WAIT_SECS")
                    .or(file.wait_secs)
                    .unwrap_or(60),
            ),
            check_type: env("FACELOG_CHECK_TYPE")
                .or(file.check_type)
                .unwrap_or_else(|| "IN".to_string()),
            system_bus: env("FACELOG_SYSTEM_BUS")
                .map(|v| parse_bool(&v))
                .or(file.system_bus)
                .unwrap_or(false),
            auto_start_session: env("FACELOG_AUTO_START")
                .map(|v| parse_bool(&v))
                .or(file.auto_start_session)
                .unwrap_or(true),
        }
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file = parse_file(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(file)
}

fn parse_file(text: &str) -> Result<FileConfig, toml::de::Error> {
    toml::from_str(text)
}

fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("FACELOG_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
        .ok()?;
    Some(base.join("facelog").join("config.toml"))
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facelog")
}

/// Unparseable values are ignored and fall through to the file or default.
fn parse_var<T: std::str::FromStr>(env: impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.trim().parse().ok())
}

fn parse_bool(value: &str) -> bool {
    let value = value.trim();
    value != "0" && !value.eq_ignore_ascii_case("false")
}
