//! Pool configuration.
//!
//! Configuration is loaded from environment variables by the embedding
//! engine. Every setting has a default.
//!
//! # Environment Variables
//!
//! - `ISAM_FAULT_POLICY`: `abort` or `return` (default: `return`)
//! - `ISAM_MAX_KEY_LENGTH`: longest key field in bytes (default: `511`)
//! - `ISAM_MAX_TREE_DEPTH`: deepest subtree teardown accepts (default: `32`)
//!
//! # Invariants
//!
//! - Every limit is at least 1.

use crate::fault::FaultPolicy;

/// Limits and fault handling for an [`IndexPools`](crate::IndexPools).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// What to do on allocation failure or detected corruption.
    pub fault_policy: FaultPolicy,
    /// Maximum key field length in bytes.
    pub max_key_length: usize,
    /// Maximum subtree depth accepted by teardown.
    pub max_tree_depth: usize,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            fault_policy: FaultPolicy::default(),
            max_key_length: Self::DEFAULT_MAX_KEY_LENGTH,
            max_tree_depth: Self::DEFAULT_MAX_TREE_DEPTH,
        }
    }
}

impl PoolConfig {
    pub const DEFAULT_MAX_KEY_LENGTH: usize = 511;
    pub const DEFAULT_MAX_TREE_DEPTH: usize = 32;

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed, or a
    /// limit is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let fault_policy = match lookup("ISAM_FAULT_POLICY") {
            Some(value) => value
                .parse::<FaultPolicy>()
                .map_err(|message| ConfigError::InvalidValue {
                    name: "ISAM_FAULT_POLICY".to_string(),
                    message,
                })?,
            None => FaultPolicy::default(),
        };

        Ok(Self {
            fault_policy,
            max_key_length: Self::load_limit(
                &lookup,
                "ISAM_MAX_KEY_LENGTH",
                Self::DEFAULT_MAX_KEY_LENGTH,
            )?,
            max_tree_depth: Self::load_limit(
                &lookup,
                "ISAM_MAX_TREE_DEPTH",
                Self::DEFAULT_MAX_TREE_DEPTH,
            )?,
        })
    }

    /// Load a positive limit, falling back to `default` if unset.
    fn load_limit<F>(lookup: &F, name: &str, default: usize) -> Result<usize, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(value) = lookup(name) else {
            return Ok(default);
        };
        match value.trim().parse::<usize>() {
            Ok(0) => Err(ConfigError::InvalidValue {
                name: name.to_string(),
                message: "must be at least 1".to_string(),
            }),
            Ok(limit) => Ok(limit),
            Err(_) => Err(ConfigError::InvalidValue {
                name: name.to_string(),
                message: format!("'{value}' is not a positive integer"),
            }),
        }
    }
}
