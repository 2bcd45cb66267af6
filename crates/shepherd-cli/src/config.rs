//! Configuration Vault – reads/writes `~/.shepherd/config.toml`.

use serde::{Deserialize, Serialize};
use shepherd_kernel::EngineConfig;
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted operator configuration stored in `~/.shepherd/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// SQLite file that mirrors violations and audit entries.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Engine thresholds, written as the `[guardrail]` table.
    #[serde(default)]
    pub guardrail: EngineConfig,
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn default_database_path() -> String {
    PathBuf::from(home_dir())
        .join(".shepherd")
        .join("guardrails.db")
        .to_string_lossy()
        .into_owned()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            guardrail: EngineConfig::default(),
        }
    }
}

/// Return the path to `~/.shepherd/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".shepherd").join("config.toml")
}

/// Load the config from disk and apply environment overrides.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    let Some(mut cfg) = load_from(&config_path())? else {
        return Ok(None);
    };
    apply_env_overrides(&mut cfg);
    cfg.guardrail
        .validate()
        .map_err(|e| format!("Invalid SHEPHERD_* override: {}", e))?;
    Ok(Some(cfg))
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    cfg.guardrail
        .validate()
        .map_err(|e| format!("Invalid [guardrail] settings: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `SHEPHERD_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SHEPHERD_DATABASE_PATH` | `database_path` |
/// | `SHEPHERD_RATE_THRESHOLD` | `guardrail.violation_rate_threshold` |
/// | `SHEPHERD_RATE_WINDOW` | `guardrail.rate_window` |
/// | `SHEPHERD_COOLDOWN_SECS` | `guardrail.cooldown_secs` |
///
/// Values that fail to parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("SHEPHERD_DATABASE_PATH") {
        cfg.database_path = v;
    }
    if let Ok(v) = std::env::var("SHEPHERD_RATE_THRESHOLD")
        && let Ok(threshold) = v.parse::<f64>()
    {
        cfg.guardrail.violation_rate_threshold = threshold;
    }
    if let Ok(v) = std::env::var("SHEPHERD_RATE_WINDOW")
        && let Ok(window) = v.parse::<usize>()
    {
        cfg.guardrail.rate_window = window;
    }
    if let Ok(v) = std::env::var("SHEPHERD_COOLDOWN_SECS")
        && let Ok(secs) = v.parse::<u64>()
    {
        cfg.guardrail.cooldown_secs = secs;
    }
}

/// Save the config to disk, creating `~/.shepherd/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner-only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
