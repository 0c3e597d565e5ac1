//! Configuration system for allot.
//!
//! This module provides hierarchical configuration with support for:
//! - YAML configuration files (user config and project files)
//! - Environment variable overrides
//! - Programmatic configuration via builder pattern
//! - Validation of the merged result
//!
//! # Configuration Precedence
//!
//! Configuration is merged from multiple sources with the following precedence
//! (highest to lowest):
//!
//! 1. Programmatic overrides (via `ConfigBuilder::with_config`)
//! 2. Environment variables (`ALLOT_*`)
//! 3. Private project config (`allot.local.yaml`)
//! 4. Project config (`allot.yaml`)
//! 5. User config (`~/.allot/config.yaml`)
//! 6. Built-in defaults
//!
//! # Examples
//!
//! ```no_run
//! use allot::config::ConfigBuilder;
//! use allot::executor::ExecutorSettings;
//!
//! let config = ConfigBuilder::new().build().unwrap();
//! let settings: ExecutorSettings = config.executor_settings();
//! println!("tick every {:?}", settings.period);
//! ```

pub mod builder;
pub mod environment;
pub mod loader;
pub mod merger;
pub mod schema;
pub mod validator;

#[cfg(test)]
mod proptests;

// Re-export key types at module root
pub use builder::ConfigBuilder;
pub use environment::EnvironmentConfig;
pub use loader::{ConfigLoader, ConfigSource, LOCAL_CONFIG_FILE, PROJECT_CONFIG_FILE};
pub use merger::ConfigMerger;
pub use schema::{Config, DatabaseSection, ExecutorConfig, SchedulerConfig};
pub use validator::ConfigValidator;
