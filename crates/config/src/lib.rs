//! Configuration loading: discovery, `${ENV}` substitution and the service schema.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        ACCESS_TOKEN_ENV, clear_config_dir, config_dir, discover_and_load, load_config,
        set_config_dir, update_config,
    },
    schema::{OnegateConfig, ServiceConfig},
};
