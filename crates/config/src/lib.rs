//! Process configuration loading, validation, and env substitution.
//!
//! Config files: `corvid.toml`, `corvid.yaml`, or `corvid.json`.
//! Searched in `./` then `~/.config/corvid/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values, plus individual
//! `GATEWAY_*` environment variable overrides applied after the file is
//! parsed.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config},
    schema::GatewayConfig,
    validate::{ValidationError, validate},
};
