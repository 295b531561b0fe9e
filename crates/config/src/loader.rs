use std::{
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use {
    secrecy::Secret,
    tracing::{debug, info, warn},
};

use crate::{env_subst::substitute_env, schema::OnegateConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "onegate.toml",
    "onegate.yaml",
    "onegate.yml",
    "onegate.json",
];

/// Overrides the configured access token of every service.
pub const ACCESS_TOKEN_ENV: &str = "ONEGATE_ACCESS_TOKEN";

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Lock guarding config read-modify-write cycles.
static CONFIG_SAVE_LOCK: Mutex<()> = Mutex::new(());

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Restrict config discovery to `path`. Each call replaces the previous
/// override.
pub fn set_config_dir(path: PathBuf) {
    *lock(&CONFIG_DIR_OVERRIDE) = Some(path);
}

/// Clear the config directory override, restoring default discovery.
pub fn clear_config_dir() {
    *lock(&CONFIG_DIR_OVERRIDE) = None;
}

fn config_dir_override() -> Option<PathBuf> {
    lock(&CONFIG_DIR_OVERRIDE).clone()
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<OnegateConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    let mut config = parse_config(&raw, path)?;
    apply_env_overrides(&mut config, std::env::var(ACCESS_TOKEN_ENV).ok());
    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./onegate.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/onegate/onegate.{toml,yaml,yml,json}` (user-global)
///
/// When nothing is found a default config is written to the user-global path
/// and returned.
pub fn discover_and_load() -> anyhow::Result<OnegateConfig> {
    let Some(path) = find_config_file() else {
        debug!("no config file found, writing default config");
        let mut config = OnegateConfig::default();
        if let Err(e) = write_default_config(&config) {
            warn!(error = %e, "failed to write default config file");
        }
        apply_env_overrides(&mut config, std::env::var(ACCESS_TOKEN_ENV).ok());
        return Ok(config);
    };
    info!(path = %path.display(), "loading config");
    load_config(&path)
}

fn apply_env_overrides(config: &mut OnegateConfig, token: Option<String>) {
    let Some(token) = token.filter(|t| !t.trim().is_empty()) else {
        return;
    };
    debug!(env = ACCESS_TOKEN_ENV, "access token overridden from environment");
    for service in &mut config.services {
        service.access_token = Some(Secret::new(token.clone()));
    }
}

/// Find the first config file in standard locations.
///
/// When a config dir override is set, only that directory is searched.
fn find_config_file() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return first_existing(&dir);
    }
    first_existing(Path::new(".")).or_else(|| user_config_dir().and_then(|d| first_existing(&d)))
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

fn user_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().join(".config").join("onegate"))
}

/// Returns the config directory: override, or `~/.config/onegate/`.
pub fn config_dir() -> Option<PathBuf> {
    config_dir_override().or_else(user_config_dir)
}

/// Returns the path of an existing config file, or the default TOML path.
pub fn find_or_default_config_path() -> PathBuf {
    if let Some(path) = find_config_file() {
        return path;
    }
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("onegate.toml")
}

/// Atomically load the current config, apply `f`, and save.
///
/// Returns the path written to.
pub fn update_config(f: impl FnOnce(&mut OnegateConfig)) -> anyhow::Result<PathBuf> {
    let _guard = lock(&CONFIG_SAVE_LOCK);
    let path = find_or_default_config_path();
    let mut config = if path.exists() {
        let raw = std::fs::read_to_string(&path)?;
        parse_config(&raw, &path)?
    } else {
        OnegateConfig::default()
    };
    f(&mut config);
    write_config(&config, &path)?;
    Ok(path)
}

fn write_default_config(config: &OnegateConfig) -> anyhow::Result<()> {
    let path = find_or_default_config_path();
    if path.exists() {
        return Ok(());
    }
    write_config(config, &path)
}

fn write_config(config: &OnegateConfig, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let raw = render_config(config, path)?;
    std::fs::write(path, raw)?;
    debug!(path = %path.display(), "saved config");
    Ok(())
}

fn render_config(config: &OnegateConfig, path: &Path) -> anyhow::Result<String> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    match ext {
        "toml" => toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("serialize config: {e}")),
        "yaml" | "yml" => Ok(serde_yaml::to_string(config)?),
        "json" => Ok(serde_json::to_string_pretty(config)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<OnegateConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
