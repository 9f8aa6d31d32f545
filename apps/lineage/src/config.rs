//! # Configuration
//!
//! Settings are layered, highest precedence first:
//!
//! 1. explicit CLI flags
//! 2. `LINEAGE_*` environment variables
//! 3. the `lineage.toml` file (`--config`, or `./lineage.toml` when present)
//! 4. built-in defaults
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//!
//! [storage]
//! backend = "redb"        # or "file" (snapshot file loaded into memory)
//! database = "lineage.db"
//! outbox = "lineage.outbox"
//!
//! [security]
//! rate_limit = 100        # requests per second, 0 disables
//! cors_origins = "http://localhost:3000"
//! ```

use lineage_core::LineageError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "lineage.toml";

pub const ENV_API_KEY: &str = "LINEAGE_API_KEY";
pub const ENV_RATE_LIMIT: &str = "LINEAGE_RATE_LIMIT";
pub const ENV_CORS_ORIGINS: &str = "LINEAGE_CORS_ORIGINS";
pub const ENV_LOG_FORMAT: &str = "LINEAGE_LOG_FORMAT";

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DATABASE: &str = "lineage.db";
const DEFAULT_RATE_LIMIT: u32 = 100;

/// Maximum config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

// =============================================================================
// FILE LAYER
// =============================================================================

/// Contents of `lineage.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server: ServerSection,
    pub storage: StorageSection,
    pub security: SecuritySection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    pub backend: Option<String>,
    pub database: Option<PathBuf>,
    pub outbox: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecuritySection {
    pub rate_limit: Option<u32>,
    pub cors_origins: Option<String>,
}

impl FileConfig {
    pub fn parse(text: &str) -> Result<Self, LineageError> {
        toml::from_str(text)
            .map_err(|e| LineageError::InputValidation(format!("invalid config: {}", e)))
    }

    /// Load `explicit`, or the default file if it exists, or nothing.
    ///
    /// An explicit path that cannot be read is an error; a missing default
    /// file is not.
    pub fn load(explicit: Option<&Path>) -> Result<Self, LineageError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.is_file() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let metadata = std::fs::metadata(&path).map_err(|e| {
            LineageError::InputValidation(format!("cannot read config '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(LineageError::InputValidation(format!(
                "config '{}' exceeds {} bytes",
                path.display(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(&path).map_err(|e| {
            LineageError::InputValidation(format!("cannot read config '{}': {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), "configuration file loaded");
        Self::parse(&text)
    }
}

// =============================================================================
// RESOLVED SETTINGS
// =============================================================================

/// Storage backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backend {
    /// ACID redb database.
    #[default]
    Redb,
    /// Snapshot file loaded into memory and written back after changes.
    File,
}

impl Backend {
    pub fn parse(raw: &str) -> Result<Self, LineageError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "redb" => Ok(Self::Redb),
            "file" => Ok(Self::File),
            other => Err(LineageError::InputValidation(format!(
                "unknown backend '{}'. Use: redb, file",
                other
            ))),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Redb => "redb",
            Self::File => "file",
        }
    }
}

/// HTTP security settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityConfig {
    /// Bearer key required on every endpoint but `/health`. `None` disables auth.
    pub api_key: Option<String>,
    /// Requests per second; 0 disables rate limiting.
    pub rate_limit: u32,
    /// `"*"` or a comma-separated origin list. `None` means localhost only.
    pub cors_origins: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            rate_limit: DEFAULT_RATE_LIMIT,
            cors_origins: None,
        }
    }
}

impl SecurityConfig {
    /// Apply environment overrides on top of the file section.
    pub fn resolve(file: &SecuritySection) -> Self {
        Self {
            api_key: env_var(ENV_API_KEY),
            rate_limit: env_var(ENV_RATE_LIMIT)
                .and_then(|raw| parse_env(ENV_RATE_LIMIT, &raw))
                .or(file.rate_limit)
                .unwrap_or(DEFAULT_RATE_LIMIT),
            cors_origins: env_var(ENV_CORS_ORIGINS).or_else(|| file.cors_origins.clone()),
        }
    }

    /// Environment only, no file.
    pub fn from_env() -> Self {
        Self::resolve(&SecuritySection::default())
    }
}

/// Values given explicitly on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub backend: Option<String>,
    pub database: Option<PathBuf>,
    pub outbox: Option<PathBuf>,
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub backend: Backend,
    pub database: PathBuf,
    /// Local queue used when the registry store is unavailable.
    pub outbox: Option<PathBuf>,
    pub security: SecurityConfig,
}

impl Settings {
    pub fn resolve(cli: CliOverrides, file: FileConfig) -> Result<Self, LineageError> {
        let backend = match cli.backend.or(file.storage.backend) {
            Some(raw) => Backend::parse(&raw)?,
            None => Backend::default(),
        };
        Ok(Self {
            host: cli
                .host
                .or(file.server.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: cli.port.or(file.server.port).unwrap_or(DEFAULT_PORT),
            backend,
            database: cli
                .database
                .or(file.storage.database)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE)),
            outbox: cli.outbox.or(file.storage.outbox),
            security: SecurityConfig::resolve(&file.security),
        })
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Option<T> {
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = raw, "ignoring unparsable environment value");
            None
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that touch `LINEAGE_*` variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env() {
        // SAFETY: callers hold ENV_MUTEX, so no concurrent env access.
        unsafe {
            std::env::remove_var(ENV_API_KEY);
            std::env::remove_var(ENV_RATE_LIMIT);
            std::env::remove_var(ENV_CORS_ORIGINS);
        }
    }

    #[test]
    fn file_sections_parse() {
        let config = FileConfig::parse(
            r#"
            [server]
            port = 9000

            [storage]
            backend = "file"
            outbox = "queue.redb"

            [security]
            rate_limit = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, Some(9000));
        assert_eq!(config.server.host, None);
        assert_eq!(config.storage.backend.as_deref(), Some("file"));
        assert_eq!(config.security.rate_limit, Some(5));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(FileConfig::parse("[server]\nhots = \"x\"\n").is_err());
    }

    #[test]
    fn cli_beats_file_beats_default() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let file = FileConfig::parse("[server]\nhost = \"0.0.0.0\"\nport = 9000\n").unwrap();
        let cli = CliOverrides {
            port: Some(7000),
            ..CliOverrides::default()
        };
        let settings = Settings::resolve(cli, file).unwrap();
        assert_eq!(settings.host, "0.0.0.0");
        assert_eq!(settings.port, 7000);
        assert_eq!(settings.backend, Backend::Redb);
        assert_eq!(settings.database, PathBuf::from(DEFAULT_DATABASE));
        assert_eq!(settings.security.rate_limit, DEFAULT_RATE_LIMIT);
    }

    #[test]
    fn env_beats_file() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        // SAFETY: ENV_MUTEX is held.
        unsafe {
            std::env::set_var(ENV_RATE_LIMIT, "7");
            std::env::set_var(ENV_API_KEY, "k3y");
        }
        let file = SecuritySection {
            rate_limit: Some(50),
            cors_origins: Some("http://a.example".to_string()),
        };
        let security = SecurityConfig::resolve(&file);
        clear_env();

        assert_eq!(security.rate_limit, 7);
        assert_eq!(security.api_key.as_deref(), Some("k3y"));
        assert_eq!(security.cors_origins.as_deref(), Some("http://a.example"));
    }

    #[test]
    fn unparsable_env_falls_through() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        // SAFETY: ENV_MUTEX is held.
        unsafe { std::env::set_var(ENV_RATE_LIMIT, "fast") };
        let security = SecurityConfig::resolve(&SecuritySection {
            rate_limit: Some(3),
            cors_origins: None,
        });
        clear_env();
        assert_eq!(security.rate_limit, 3);
    }

    #[test]
    fn backend_names() {
        assert_eq!(Backend::parse(" REDB ").unwrap(), Backend::Redb);
        assert_eq!(Backend::parse("file").unwrap().name(), "file");
        assert!(Backend::parse("sqlite").is_err());
    }
}
