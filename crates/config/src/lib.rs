//! Configuration loading and validation.
//!
//! Config files: `jobdeck.toml`, `jobdeck.yaml`, `jobdeck.yml` or `jobdeck.json`.
//! Searched in `./` then the user config directory (`~/.config/jobdeck/` on
//! Linux). Selected `JOBDECK_*` environment variables override file values.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{
        apply_env_overrides, config_dir, discover_and_load, find_config_file, load, load_config,
    },
    schema::{DatabaseConfig, JobdeckConfig, SchedulerConfig},
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
