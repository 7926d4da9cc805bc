use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::models::enums::DialectKind;
use crate::query_ast::errors::QueryAstError;

const CONFIG_ENV: &str = "HIVEQL_CONFIG";
const CONFIG_FILE: &str = "compiler.json";

/// Switches for the translation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub dialect: DialectKind,
    pub remove_redundant_joins: bool,
    pub rewrite_apply_joins: bool,
    /// `None` leaves the decision to the dialect.
    pub isolate_cross_joins: Option<bool>,
    pub verify_alias_scopes: bool,
    pub pretty_print: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            dialect: DialectKind::Hive,
            remove_redundant_joins: true,
            rewrite_apply_joins: true,
            isolate_cross_joins: None,
            verify_alias_scopes: true,
            pretty_print: false,
        }
    }
}

impl CompilerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, QueryAstError> {
        serde_json::from_str(json).map_err(|e| QueryAstError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, QueryAstError> {
        let content = fs::read_to_string(path)
            .map_err(|e| QueryAstError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_json_str(&content)?;
        info!("Loaded compiler config from {}", path.display());
        Ok(config)
    }

    /// `$HIVEQL_CONFIG`, else `<config dir>/hiveql/compiler.json`, else defaults.
    pub fn load_default() -> Self {
        let Some(path) = default_config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring compiler config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn to_json(&self) -> Result<String, QueryAstError> {
        serde_json::to_string_pretty(self).map_err(|e| QueryAstError::Config(e.to_string()))
    }
}

fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV)
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|mut dir| {
        dir.push("hiveql");
        dir.push(CONFIG_FILE);
        dir
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = CompilerConfig::from_json_str(r#"{ "dialect": "hive_windowing" }"#).unwrap();
        assert_eq!(config.dialect, DialectKind::HiveWindowing);
        assert!(config.remove_redundant_joins);
        assert_eq!(config.isolate_cross_joins, None);
    }

    #[test]
    fn json_round_trips() {
        let config = CompilerConfig {
            isolate_cross_joins: Some(false),
            pretty_print: true,
            ..CompilerConfig::default()
        };
        let json = config.to_json().unwrap();
        assert_eq!(CompilerConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(
            CompilerConfig::from_json_str("{ nope"),
            Err(QueryAstError::Config(_))
        ));
    }

    #[test]
    fn unreadable_file_is_reported() {
        let err = CompilerConfig::load(Path::new("/nonexistent/hiveql/compiler.json")).unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
