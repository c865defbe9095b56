use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::GatewayConfig, validate};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["corvid.toml", "corvid.yaml", "corvid.yml", "corvid.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<GatewayConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    let config = parse_config(&raw, path)?;
    validate::validate(&config)?;
    Ok(config)
}

/// Discover and load config from standard locations, then apply individual
/// `GATEWAY_*` environment variable overrides.
///
/// Search order:
/// 1. `./corvid.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/corvid/corvid.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `GatewayConfig::default()` if no file is found.
pub fn discover_and_load() -> GatewayConfig {
    let mut config = if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                GatewayConfig::default()
            },
        }
    } else {
        debug!("no config file found, using defaults");
        GatewayConfig::default()
    };
    apply_env_overrides(&mut config);
    config
}

/// Applies `GATEWAY_*` environment variable overrides on top of an
/// already-loaded config, the way this codebase's config crate layers env
/// overrides after the file is parsed.
pub fn apply_env_overrides(config: &mut GatewayConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

/// The implementation behind [`apply_env_overrides`], parameterized over the
/// lookup function so it is testable without mutating the process
/// environment (mirrors [`substitute_env`]'s injectable-lookup pattern).
fn apply_env_overrides_with(config: &mut GatewayConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("GATEWAY_MASTER_HOST") {
        config.master_host = v;
    }
    if let Some(v) = parsed_env(&lookup, "GATEWAY_MASTER_PORT") {
        config.master_port = v;
    }
    if let Some(v) = parsed_env(&lookup, "GATEWAY_EXT_PORT") {
        config.ext_port = v;
    }
    if let Some(v) = parsed_env(&lookup, "GATEWAY_COMM_PORT") {
        config.comm_port = v;
    }
    if let Some(v) = lookup("GATEWAY_CREDENTIALS") {
        config.credentials = Some(v);
    }
    if let Some(v) = parsed_env(&lookup, "GATEWAY_MSG_QUEUE_TIMEOUT_SECS") {
        config.msg_queue_timeout_secs = v;
    }
    if let Some(v) = parsed_env(&lookup, "GATEWAY_RECONNECT_TIMEOUT_SECS") {
        config.reconnect_timeout_secs = v;
    }
}

fn parsed_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    lookup(name).and_then(|v| v.parse().ok())
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    if let Some(dirs) = directories::ProjectDirs::from("", "", "corvid") {
        let config_dir = dirs.config_dir();
        for name in CONFIG_FILENAMES {
            let p = config_dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Returns the user-global config directory (`~/.config/corvid/`).
#[must_use]
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "corvid").map(|d| d.config_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<GatewayConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_toml_and_validates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("corvid.toml");
        std::fs::write(&path, "extPort = 9010\ncommPort = 9020\n").expect("write");
        let config = load_config(&path).expect("load");
        assert_eq!(config.ext_port, 9010);
        assert_eq!(config.comm_port, 9020);
    }

    #[test]
    fn env_overrides_apply_on_top_of_defaults() {
        let lookup = |name: &str| match name {
            "GATEWAY_EXT_PORT" => Some("7777".to_string()),
            _ => None,
        };
        let mut config = GatewayConfig::default();
        apply_env_overrides_with(&mut config, lookup);
        assert_eq!(config.ext_port, 7777);
        assert_eq!(config.master_host, GatewayConfig::default().master_host);
    }
}
