use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    env_subst::substitute_env,
    schema::GatekeeperConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "gatekeeper.toml",
    "gatekeeper.yaml",
    "gatekeeper.yml",
    "gatekeeper.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<GatekeeperConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./gatekeeper.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/gatekeeper/gatekeeper.{toml,yaml,yml,json}` (user-global)
///
/// Returns `GatekeeperConfig::default()` if no config file is found.
pub fn discover_and_load() -> GatekeeperConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    GatekeeperConfig::default()
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/gatekeeper/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "gatekeeper").map(|d| d.config_dir().to_path_buf())
}

/// Returns the data directory holding the database, falling back to `./`.
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "gatekeeper")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Resolve the SQLite file path: explicit config value, else `<data_dir>/gatekeeper.db`.
pub fn database_path(config: &GatekeeperConfig, data_dir_override: Option<&Path>) -> PathBuf {
    if let Some(path) = &config.database.path {
        return path.clone();
    }
    data_dir_override
        .map(Path::to_path_buf)
        .unwrap_or_else(data_dir)
        .join("gatekeeper.db")
}

fn parse_config(raw: &str, path: &Path) -> Result<GatekeeperConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::unsupported_format(ext)),
    }
}
