//! Layered configuration assembly.

use std::path::{Path, PathBuf};

use crate::config::environment::EnvironmentConfig;
use crate::config::loader::ConfigLoader;
use crate::config::merger::ConfigMerger;
use crate::config::schema::Config;
use crate::config::validator::ConfigValidator;
use crate::error::Result;

/// Builds the effective configuration from files, environment and
/// programmatic overrides.
///
/// # Examples
///
/// ```
/// use allot::config::{Config, ConfigBuilder, ExecutorConfig};
///
/// let config = ConfigBuilder::new()
///     .skip_files()
///     .skip_env()
///     .with_config(Config {
///         executor: Some(ExecutorConfig {
///             period_ms: Some(250),
///             ..Default::default()
///         }),
///         ..Default::default()
///     })
///     .build()
///     .unwrap();
///
/// assert_eq!(config.executor.unwrap().period_ms, Some(250));
/// ```
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    working_dir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    skip_files: bool,
    skip_env: bool,
    overrides: Vec<Config>,
}

impl ConfigBuilder {
    /// Creates a builder that reads every source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the directory project files are searched from.
    ///
    /// Defaults to the current working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: &Path) -> Self {
        self.working_dir = Some(dir.to_path_buf());
        self
    }

    /// Sets the directory holding the user `config.yaml`.
    #[must_use]
    pub fn with_data_dir(mut self, dir: &Path) -> Self {
        self.data_dir = Some(dir.to_path_buf());
        self
    }

    /// Ignores configuration files.
    #[must_use]
    pub fn skip_files(mut self) -> Self {
        self.skip_files = true;
        self
    }

    /// Ignores `ALLOT_*` environment variables.
    #[must_use]
    pub fn skip_env(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Adds a programmatic override on top of every other source.
    ///
    /// Later overrides win over earlier ones.
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.overrides.push(config);
        self
    }

    /// Loads, merges and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file cannot be read or parsed,
    /// an environment variable is malformed, or the merged result fails
    /// validation.
    pub fn build(self) -> Result<Config> {
        let mut config = if self.skip_files {
            Config::default()
        } else {
            let working_dir = match self.working_dir {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };
            let sources = ConfigLoader::load_all(&working_dir, self.data_dir.as_deref())?;
            log::debug!("merging {} configuration file(s)", sources.len());
            ConfigMerger::merge(sources)
        };

        if !self.skip_env {
            EnvironmentConfig::apply_overrides(&mut config)?;
        }

        for overrides in &self.overrides {
            ConfigMerger::merge_into(&mut config, overrides);
        }

        ConfigValidator::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::{LOCAL_CONFIG_FILE, PROJECT_CONFIG_FILE};
    use crate::config::schema::ExecutorConfig;
    use crate::error::Error;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn period(ms: u64) -> Config {
        Config {
            executor: Some(ExecutorConfig {
                period_ms: Some(ms),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_only() {
        let config = ConfigBuilder::new().skip_files().skip_env().build().unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_later_override_wins() {
        let config = ConfigBuilder::new()
            .skip_files()
            .skip_env()
            .with_config(period(10))
            .with_config(period(20))
            .build()
            .unwrap();
        assert_eq!(config.executor.unwrap().period_ms, Some(20));
    }

    #[test]
    fn test_invalid_override_rejected() {
        let result = ConfigBuilder::new()
            .skip_files()
            .skip_env()
            .with_config(period(0))
            .build();
        assert!(matches!(result, Err(Error::Validation { .. })));
    }

    #[test]
    #[serial]
    fn test_file_precedence() {
        std::env::remove_var("ALLOT_PERIOD_MS");
        let data_dir = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        fs::write(
            data_dir.path().join("config.yaml"),
            "executor:\n  period_ms: 1\n  max_attempt_count: 7\n",
        )
        .unwrap();
        fs::write(
            project.path().join(PROJECT_CONFIG_FILE),
            "executor:\n  period_ms: 2\n",
        )
        .unwrap();
        fs::write(
            project.path().join(LOCAL_CONFIG_FILE),
            "executor:\n  period_ms: 3\n",
        )
        .unwrap();

        let config = ConfigBuilder::new()
            .with_working_dir(project.path())
            .with_data_dir(data_dir.path())
            .build()
            .unwrap();

        let executor = config.executor.unwrap();
        assert_eq!(executor.period_ms, Some(3));
        assert_eq!(executor.max_attempt_count, Some(7));
    }

    #[test]
    #[serial]
    fn test_env_beats_files_and_override_beats_env() {
        let data_dir = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        fs::write(
            project.path().join(PROJECT_CONFIG_FILE),
            "executor:\n  period_ms: 2\n  batch_poll_ms: 20\n",
        )
        .unwrap();
        std::env::set_var("ALLOT_PERIOD_MS", "4");
        std::env::set_var("ALLOT_BATCH_POLL_MS", "40");

        let result = ConfigBuilder::new()
            .with_working_dir(project.path())
            .with_data_dir(data_dir.path())
            .with_config(period(8))
            .build();
        std::env::remove_var("ALLOT_PERIOD_MS");
        std::env::remove_var("ALLOT_BATCH_POLL_MS");

        let executor = result.unwrap().executor.unwrap();
        assert_eq!(executor.period_ms, Some(8));
        assert_eq!(executor.batch_poll_ms, Some(40));
    }
}
