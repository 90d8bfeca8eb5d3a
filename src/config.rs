use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::engine::duckdb_driver::DEFAULT_DATABASE_FILE;

/// Environment prefix for every setting, e.g. `SWANLAKE_EMBEDDED_DIRECTORY`.
pub const ENV_PREFIX: &str = "SWANLAKE_EMBEDDED";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddedConfig {
    /// Database directory. Unset or `:memory:` runs the engine in memory.
    pub directory: Option<String>,
    /// Suppress engine startup diagnostics.
    pub silent: bool,
    /// Run the engine in sequential mode.
    pub sequential: bool,
    /// File name of the database inside `directory`.
    pub database_file: String,
    /// Log format: "compact" or "json".
    pub log_format: String,
}

impl Default for EmbeddedConfig {
    fn default() -> Self {
        Self {
            directory: None,
            silent: true,
            sequential: false,
            database_file: DEFAULT_DATABASE_FILE.to_string(),
            log_format: "compact".to_string(),
        }
    }
}

impl EmbeddedConfig {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(config::Environment::with_prefix(ENV_PREFIX))
    }

    fn load_from(environment: config::Environment) -> anyhow::Result<Self> {
        let defaults_json = serde_json::to_string(&Self::default())
            .with_context(|| "failed to serialize defaults")?;
        let settings = config::Config::builder()
            .add_source(
                config::File::from_str(&defaults_json, config::FileFormat::Json).required(false),
            )
            .add_source(environment)
            .build()
            .with_context(|| "failed to load configuration")?;
        let cfg: EmbeddedConfig = settings
            .try_deserialize()
            .with_context(|| "failed to deserialize configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let file = self.database_file.trim();
        if file.is_empty() {
            anyhow::bail!("database_file must not be empty");
        }
        if file.contains('/') || file.contains('\\') {
            anyhow::bail!("database_file must be a bare file name, got {file}");
        }
        if self.log_format != "compact" && self.log_format != "json" {
            anyhow::bail!(
                "log_format must be \"compact\" or \"json\", got {}",
                self.log_format
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> config::Environment {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<config::Map<String, String>>();
        config::Environment::with_prefix(ENV_PREFIX).source(Some(map))
    }

    #[test]
    fn defaults_apply_without_environment() -> Result<()> {
        let cfg = EmbeddedConfig::load_from(env(&[]))?;
        assert!(cfg.directory.is_none());
        assert!(cfg.silent);
        assert!(!cfg.sequential);
        assert_eq!(cfg.database_file, DEFAULT_DATABASE_FILE);
        assert_eq!(cfg.log_format, "compact");
        Ok(())
    }

    #[test]
    fn environment_overrides_defaults() -> Result<()> {
        let cfg = EmbeddedConfig::load_from(env(&[
            ("SWANLAKE_EMBEDDED_DIRECTORY", "/var/lib/swan"),
            ("SWANLAKE_EMBEDDED_SEQUENTIAL", "true"),
            ("SWANLAKE_EMBEDDED_LOG_FORMAT", "json"),
        ]))?;
        assert_eq!(cfg.directory.as_deref(), Some("/var/lib/swan"));
        assert!(cfg.sequential);
        assert_eq!(cfg.log_format, "json");
        Ok(())
    }

    #[test]
    fn validation_rejects_paths_as_database_file() {
        let result = EmbeddedConfig::load_from(env(&[(
            "SWANLAKE_EMBEDDED_DATABASE_FILE",
            "nested/db.duckdb",
        )]));
        assert!(result.is_err());
    }
}
