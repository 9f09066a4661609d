// Configuration loading and parsing (auction.toml).

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub auction: AuctionConfig,
    pub ws_port: u16,
    pub db_path: String,
    pub data_paths: DataPaths,
}

// ---------------------------------------------------------------------------
// auction.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire auction.toml file.
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    auction: AuctionConfig,
    server: ServerSection,
    database: DatabaseSection,
    data: DataPaths,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuctionConfig {
    /// Display name of the auction event.
    pub name: String,
    /// Starting budget per team.
    pub budget_per_team: i64,
    /// The registered teams, in display order.
    pub teams: Vec<TeamEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeamEntry {
    pub team_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ServerSection {
    port: u16,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataPaths {
    pub items: String,
    pub tiers: String,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/auction.toml` relative to
/// the given `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy
/// defaults. Prefer `load_config()` which handles default initialization
/// automatically.
pub(crate) fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_path = base_dir.join("config").join("auction.toml");
    let text = read_file(&config_path)?;
    let file: ConfigFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: config_path.clone(),
        source: e,
    })?;

    let config = Config {
        auction: file.auction,
        ws_port: file.server.port,
        db_path: file.database.path,
        data_paths: file.data,
    };

    validate(&config)?;

    Ok(config)
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        // If config/ also doesn't exist, the app will fail to load config.
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the project root or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let mut copied = Vec::new();

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };

        // Skip .example template files
        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }
        let target = config_dir.join(file_name);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // File already exists in config/, skip it
            }
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Convenience wrapper: loads config relative to the current working
/// directory. Ensures default config files are copied before loading.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.auction.name.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "auction.name".into(),
            message: "must not be empty".into(),
        });
    }

    if config.auction.budget_per_team <= 0 {
        return Err(ConfigError::ValidationError {
            field: "auction.budget_per_team".into(),
            message: format!(
                "must be greater than 0, got {}",
                config.auction.budget_per_team
            ),
        });
    }

    for (i, team) in config.auction.teams.iter().enumerate() {
        if team.team_id.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                field: format!("auction.teams[{i}].team_id"),
                message: "must not be empty".into(),
            });
        }
        if config.auction.teams[..i]
            .iter()
            .any(|t| t.team_id == team.team_id)
        {
            return Err(ConfigError::ValidationError {
                field: format!("auction.teams[{i}].team_id"),
                message: format!("duplicate team id `{}`", team.team_id),
            });
        }
    }

    if config.ws_port == 0 {
        return Err(ConfigError::ValidationError {
            field: "server.port".into(),
            message: "must be greater than 0".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const VALID_TOML: &str = r#"
[auction]
name = "Riverside Summer Draft"
budget_per_team = 500

[[auction.teams]]
team_id = "team_1"
name = "Harbor Hawks"

[[auction.teams]]
team_id = "team_2"
name = "North End United"

[[auction.teams]]
team_id = "team_3"
name = "Millers"

[server]
port = 9100

[database]
path = "auction-desk.db"

[data]
items = "data/items.csv"
tiers = "data/tiers.csv"
"#;

    /// Helper: write `content` as config/auction.toml under a fresh temp
    /// dir and return the base dir.
    fn temp_config(label: &str, content: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(format!("auction_config_test_{label}"));
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config/auction.toml"), content).unwrap();
        tmp
    }

    #[test]
    fn load_valid_config() {
        let tmp = temp_config("valid", VALID_TOML);
        let config = load_config_from(&tmp).expect("should load valid config");

        assert_eq!(config.auction.name, "Riverside Summer Draft");
        assert_eq!(config.auction.budget_per_team, 500);
        assert_eq!(config.auction.teams.len(), 3);
        assert_eq!(config.auction.teams[0].team_id, "team_1");
        assert_eq!(config.auction.teams[1].name, "North End United");
        assert_eq!(config.ws_port, 9100);
        assert_eq!(config.db_path, "auction-desk.db");
        assert_eq!(config.data_paths.items, "data/items.csv");
        assert_eq!(config.data_paths.tiers, "data/tiers.csv");

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_budget() {
        let toml = VALID_TOML.replace("budget_per_team = 500", "budget_per_team = 0");
        let tmp = temp_config("zero_budget", &toml);

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "auction.budget_per_team");
            }
            other => panic!("expected ValidationError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_empty_name() {
        let toml = VALID_TOML.replace(
            "name = \"Riverside Summer Draft\"",
            "name = \"  \"",
        );
        let tmp = temp_config("empty_name", &toml);

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "auction.name"),
            other => panic!("expected ValidationError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_duplicate_team_ids() {
        let toml = VALID_TOML.replace("team_id = \"team_3\"", "team_id = \"team_1\"");
        let tmp = temp_config("dup_team", &toml);

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, message } => {
                assert_eq!(field, "auction.teams[2].team_id");
                assert!(message.contains("duplicate"));
            }
            other => panic!("expected ValidationError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_port() {
        let toml = VALID_TOML.replace("port = 9100", "port = 0");
        let tmp = temp_config("zero_port", &toml);

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "server.port"),
            other => panic!("expected ValidationError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn empty_team_list_is_valid_at_load_time() {
        // Teams may be registered later; the two-team minimum is enforced
        // at auction start, not at config load.
        let toml = r#"
[auction]
name = "Late Registration"
budget_per_team = 200
teams = []

[server]
port = 9100

[database]
path = "auction-desk.db"

[data]
items = "data/items.csv"
tiers = "data/tiers.csv"
"#;
        let tmp = temp_config("no_teams", toml);
        let config = load_config_from(&tmp).expect("empty team list should load");
        assert!(config.auction.teams.is_empty());
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn file_not_found_for_missing_config() {
        let tmp = std::env::temp_dir().join("auction_config_test_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::FileNotFound { path } => {
                assert!(path.ends_with("auction.toml"));
            }
            other => panic!("expected FileNotFound, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn parse_error_for_invalid_toml() {
        let tmp = temp_config("invalid_toml", "this is not valid [[[ toml");

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ParseError { path, .. } => {
                assert!(path.ends_with("auction.toml"));
            }
            other => panic!("expected ParseError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_copies_missing_files() {
        let tmp = std::env::temp_dir().join("auction_config_test_ensure_copies");
        let _ = fs::remove_dir_all(&tmp);

        let defaults_dir = tmp.join("defaults");
        fs::create_dir_all(&defaults_dir).unwrap();
        fs::write(defaults_dir.join("auction.toml"), VALID_TOML).unwrap();
        // Add an example file that should NOT be copied
        fs::write(defaults_dir.join("auction.toml.example"), "# template\n").unwrap();

        assert!(!tmp.join("config").exists());

        let copied = ensure_config_files(&tmp).expect("should succeed");
        assert_eq!(copied.len(), 1);
        assert!(tmp.join("config/auction.toml").exists());
        assert!(!tmp.join("config/auction.toml.example").exists());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_skips_existing() {
        let tmp = std::env::temp_dir().join("auction_config_test_ensure_skips");
        let _ = fs::remove_dir_all(&tmp);

        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("defaults/auction.toml"), VALID_TOML).unwrap();
        fs::write(tmp.join("config/auction.toml"), "# custom\n").unwrap();

        let copied = ensure_config_files(&tmp).expect("should succeed");
        assert!(copied.is_empty());

        let content = fs::read_to_string(tmp.join("config/auction.toml")).unwrap();
        assert_eq!(content, "# custom\n");

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_errors_when_both_dirs_missing() {
        let tmp = std::env::temp_dir().join("auction_config_test_both_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        let err = ensure_config_files(&tmp).unwrap_err();
        match &err {
            ConfigError::DefaultsCopyError { message } => {
                assert!(message.contains("neither defaults/ nor config/"));
            }
            other => panic!("expected DefaultsCopyError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }
}
