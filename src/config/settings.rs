//! TOML-based settings.
//!
//! Example configuration:
//! ```toml
//! dialect = "postgres"
//! inner_join_syntax = false
//! optimize_subqueries = true
//! result_cache = true
//! max_alias_length = 30
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::sql::{Dialect, SqlDialect};

/// Environment variable naming a settings file.
pub const CONFIG_ENV_VAR: &str = "GENSQL_CONFIG";

const LOCAL_CONFIG: &str = "gensql.toml";

const DEFAULT_MAX_ALIAS_LENGTH: usize = 30;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Target SQL dialect.
    pub dialect: Dialect,

    /// Render inner joins as `INNER JOIN .. ON` instead of moving join
    /// conditions into WHERE.
    pub inner_join_syntax: bool,

    /// Try to rewrite a single correlated aggregate subquery as an outer join.
    pub optimize_subqueries: bool,

    /// Cache fetched rows per session until the next flush.
    pub result_cache: bool,

    /// Longest generated alias, capped by the dialect's identifier limit.
    /// Defaults to 30.
    pub max_alias_length: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            inner_join_syntax: false,
            optimize_subqueries: true,
            result_cache: true,
            max_alias_length: None,
        }
    }
}

impl Settings {
    /// Settings for a dialect with every other option at its default.
    pub fn for_dialect(dialect: Dialect) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    /// Load settings from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `GENSQL_CONFIG`
    /// 2. `./gensql.toml`
    ///
    /// Falls back to defaults when neither exists.
    pub fn discover() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var(CONFIG_ENV_VAR) {
            return Self::load(&path);
        }

        let local_config = PathBuf::from(LOCAL_CONFIG);
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Settings::default())
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        match self.max_alias_length {
            Some(len) if len < 4 => Err(SettingsError::InvalidConfig(format!(
                "max_alias_length must be at least 4, got {}",
                len
            ))),
            _ => Ok(()),
        }
    }

    /// Longest alias name, leaving room for a `-N` suffix.
    pub fn alias_limit(&self) -> usize {
        self.max_alias_length
            .unwrap_or(DEFAULT_MAX_ALIAS_LENGTH)
            .min(self.dialect.max_name_len())
            .saturating_sub(3)
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.dialect, Dialect::Sqlite);
        assert!(!settings.inner_join_syntax);
        assert!(settings.optimize_subqueries);
        assert!(settings.result_cache);
        assert_eq!(settings.max_alias_length, None);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = Settings::from_toml_str("dialect = \"postgres\"\n").unwrap();
        assert_eq!(settings.dialect, Dialect::Postgres);
        assert!(settings.optimize_subqueries);
    }

    #[test]
    fn test_full_toml() {
        let settings = Settings::from_toml_str(
            r#"
            dialect = "oracle"
            inner_join_syntax = true
            optimize_subqueries = false
            result_cache = false
            max_alias_length = 12
            "#,
        )
        .unwrap();
        assert_eq!(settings.dialect, Dialect::Oracle);
        assert!(settings.inner_join_syntax);
        assert!(!settings.optimize_subqueries);
        assert!(!settings.result_cache);
        assert_eq!(settings.alias_limit(), 9);
    }

    #[test]
    fn test_unknown_dialect_is_parse_error() {
        let err = Settings::from_toml_str("dialect = \"access\"").unwrap_err();
        assert!(matches!(err, SettingsError::ParseError(_)));
    }

    #[test]
    fn test_tiny_alias_length_rejected() {
        let err = Settings::from_toml_str("max_alias_length = 2").unwrap_err();
        assert!(matches!(err, SettingsError::InvalidConfig(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = Settings::load("/nonexistent/gensql.toml").unwrap_err();
        assert!(matches!(err, SettingsError::FileNotFound(_)));
    }

    #[test]
    fn test_alias_limit_follows_dialect() {
        assert_eq!(Settings::for_dialect(Dialect::Postgres).alias_limit(), 27);
        let long = Settings {
            max_alias_length: Some(100),
            ..Settings::for_dialect(Dialect::Postgres)
        };
        assert_eq!(long.alias_limit(), 60);
        let oracle = Settings {
            max_alias_length: Some(100),
            ..Settings::for_dialect(Dialect::Oracle)
        };
        assert_eq!(oracle.alias_limit(), 27);
    }
}
