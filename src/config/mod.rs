//! Configuration for the query engine.
//!
//! Rendering options (dialect, join style, alias limits) and cache switches
//! are read from a TOML file or built in code.

mod settings;

pub use settings::{Settings, SettingsError, CONFIG_ENV_VAR};
