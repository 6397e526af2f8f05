//! Configuration module for driftnet
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use driftnet::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("driftnet.toml")).unwrap();
//! println!("Crawling {} seeds to depth {}", config.job.seeds.len(), config.job.settings.max_depth);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    AuthConfig, Config, JobConfig, JobSection, OutputConfig, ProxyConfig, RobotsConfig,
    RobotsPolicy, SelectionPolicy, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};

pub use validation::{validate_job_config, validate_seeds};
