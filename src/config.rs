use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Page size for `GET /sync/pull` unless overridden.
pub const DEFAULT_PULL_LIMIT: usize = 500;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to listen on
    pub port: u16,
    /// Directory holding the SQLite database
    pub data_dir: PathBuf,
    /// Path to the API key file
    pub config_path: PathBuf,
    /// Maximum number of events returned by one pull
    pub pull_limit: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let port = lookup("CARELOG_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let data_dir = lookup("CARELOG_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("carelog-server")
            });

        let config_path = lookup("CARELOG_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("carelog-server")
                    .join("config.yaml")
            });

        let pull_limit = lookup("CARELOG_PULL_LIMIT")
            .and_then(|l| l.parse().ok())
            .filter(|l: &usize| *l > 0)
            .unwrap_or(DEFAULT_PULL_LIMIT);

        Self {
            port,
            data_dir,
            config_path,
            pull_limit,
        }
    }

    /// Path of the server database inside the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("carelog.db")
    }
}

/// API key entry in config
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyEntry {
    pub key: String,
    pub user_id: String,
    pub family_id: String,
}

/// Config file structure
///
/// ```yaml
/// api_keys:
///   - key: "your-secret-key-here"
///     user_id: "parent1"
///     family_id: "family1"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub api_keys: Vec<ApiKeyEntry>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e))?;
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseError(path.to_path_buf(), e))
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(
                    f,
                    "Failed to parse config file '{}': {}",
                    path.display(),
                    e
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadError(_, e) => Some(e),
            ConfigError::ParseError(_, e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::tempdir;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.port, 8080);
        assert_eq!(config.pull_limit, DEFAULT_PULL_LIMIT);
        assert!(config.data_dir.ends_with("carelog-server"));
        assert!(config.database_path().ends_with("carelog.db"));
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("CARELOG_PORT", "9090"),
            ("CARELOG_DATA_DIR", "/srv/carelog"),
            ("CARELOG_PULL_LIMIT", "50"),
        ]));
        assert_eq!(config.port, 9090);
        assert_eq!(config.data_dir, PathBuf::from("/srv/carelog"));
        assert_eq!(config.pull_limit, 50);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = Config::from_lookup(lookup_from(&[
            ("CARELOG_PORT", "not-a-port"),
            ("CARELOG_PULL_LIMIT", "0"),
        ]));
        assert_eq!(config.port, 8080);
        assert_eq!(config.pull_limit, DEFAULT_PULL_LIMIT);
    }

    #[test]
    fn test_load_api_keys() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "api_keys:").unwrap();
        writeln!(file, "  - key: secret").unwrap();
        writeln!(file, "    user_id: parent1").unwrap();
        writeln!(file, "    family_id: family1").unwrap();

        let config = ConfigFile::load(&path).unwrap();
        assert_eq!(config.api_keys.len(), 1);
        assert_eq!(config.api_keys[0].family_id, "family1");
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.yaml");
        std::fs::write(&path, "api_keys: [").unwrap();

        let err = ConfigFile::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
