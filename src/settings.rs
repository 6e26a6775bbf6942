use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::authz::errors::AuthzError;
use crate::authz::hierarchy::DEFAULT_MAX_DEPTH;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Expand direct roles through parent links. When off, only directly
    /// assigned roles grant permissions.
    #[serde(default = "default_true")]
    pub enable_hierarchy: bool,
    /// Evaluate permission conditions. When off, conditions are ignored and
    /// every matching permission applies.
    #[serde(default = "default_true")]
    pub enable_abac: bool,
    /// Longest ancestor chain a role may have
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            enable_hierarchy: true,
            enable_abac: true,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<(), AuthzError> {
        if self.max_depth == 0 {
            return Err(AuthzError::Validation(
                "engine.max_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let defaults = EngineSettings::default();
        let mut builder = config::Config::builder()
            .set_default("engine.enable_hierarchy", defaults.enable_hierarchy)
            .into_diagnostic()?
            .set_default("engine.enable_abac", defaults.enable_abac)
            .into_diagnostic()?
            .set_default("engine.max_depth", defaults.max_depth as i64)
            .into_diagnostic()?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: ROLEGATE__ENGINE__MAX_DEPTH=20, etc.
        builder = builder.add_source(
            config::Environment::with_prefix("ROLEGATE")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().into_diagnostic()?;
        let s: Settings = cfg.try_deserialize().into_diagnostic()?;
        s.engine.validate()?;

        tracing::debug!(
            enable_hierarchy = s.engine.enable_hierarchy,
            enable_abac = s.engine.enable_abac,
            max_depth = s.engine.max_depth,
            "loaded engine settings"
        );
        Ok(s)
    }
}
