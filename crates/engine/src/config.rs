//! Run configuration via `casetree.toml`
//!
//! Settings are layered, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. a `casetree.toml` file in the working directory
//! 3. `CASETREE_*` environment variables
//!
//! Only execution concerns live here: which leaves run and in which order.
//! Leaf names always come from declaration order, whatever the ordering.

use serde::{Deserialize, Serialize};
use std::path::Path;

use casetree_core::{EngineError, EngineResult, TagFilter};

/// Config file name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "casetree.toml";

/// Environment variable holding a comma-separated tag include list
pub const ENV_TAG_INCLUDE: &str = "CASETREE_TAG_INCLUDE";
/// Environment variable holding a comma-separated tag exclude list
pub const ENV_TAG_EXCLUDE: &str = "CASETREE_TAG_EXCLUDE";
/// Environment variable selecting `defined` or `random` ordering
pub const ENV_ORDERING: &str = "CASETREE_ORDERING";
/// Environment variable holding the random-ordering seed
pub const ENV_SEED: &str = "CASETREE_SEED";

/// Sibling execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOrder {
    /// Declaration order
    #[default]
    Defined,
    /// Seeded shuffle per context
    Random,
}

impl std::str::FromStr for ExecutionOrder {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "defined" => Ok(ExecutionOrder::Defined),
            "random" => Ok(ExecutionOrder::Random),
            other => Err(EngineError::invalid_config(format!(
                "invalid ordering '{}', expected \"defined\" or \"random\"",
                other
            ))),
        }
    }
}

/// Run configuration loaded from `casetree.toml`.
///
/// # Example
///
/// ```toml
/// tag_include = ["db"]
/// tag_exclude = ["slow"]
/// ordering = "random"
/// seed = 42
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecConfig {
    /// Only leaves carrying one of these tags run, when non-empty.
    #[serde(default)]
    pub tag_include: Vec<String>,
    /// Leaves carrying any of these tags are reported as skipped.
    #[serde(default)]
    pub tag_exclude: Vec<String>,
    /// Sibling execution order.
    #[serde(default)]
    pub ordering: ExecutionOrder,
    /// Seed for random ordering. A fresh seed is drawn when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Run root entries as parallel sub-tests unless a context says otherwise.
    #[serde(default)]
    pub parallel: bool,
    /// Iterations per leaf for the built-in benchmark host.
    #[serde(default = "default_bench_iterations")]
    pub bench_iterations: u64,
}

fn default_bench_iterations() -> u64 {
    100
}

impl Default for SpecConfig {
    fn default() -> Self {
        Self {
            tag_include: Vec::new(),
            tag_exclude: Vec::new(),
            ordering: ExecutionOrder::Defined,
            seed: None,
            parallel: false,
            bench_iterations: default_bench_iterations(),
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl SpecConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# casetree run configuration
#
# Only run leaves carrying at least one of these tags (empty = all)
tag_include = []

# Report leaves carrying any of these tags as skipped
tag_exclude = []

# Sibling execution order: "defined" (default) or "random"
ordering = "defined"

# Seed for random ordering; a fresh one is drawn and logged when unset
# seed = 42

# Run root entries as parallel sub-tests
parallel = false

# Iterations per leaf for the built-in benchmark host
bench_iterations = 100
"#
    }

    /// Parse a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] if the text does not parse.
    pub fn from_toml_str(content: &str) -> EngineResult<Self> {
        let config: SpecConfig = toml::from_str(content)
            .map_err(|e| EngineError::invalid_config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::invalid_config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| {
            EngineError::invalid_config(format!("config file '{}': {}", path.display(), e))
        })
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> EngineResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::invalid_config(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            EngineError::invalid_config(format!(
                "failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Overlay values from an environment lookup.
    ///
    /// `lookup` maps a variable name to its value; tests pass a closure over a
    /// map instead of touching the process environment.
    pub fn apply_env(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> EngineResult<Self> {
        if let Some(value) = lookup(ENV_TAG_INCLUDE) {
            self.tag_include = split_list(&value);
        }
        if let Some(value) = lookup(ENV_TAG_EXCLUDE) {
            self.tag_exclude = split_list(&value);
        }
        if let Some(value) = lookup(ENV_ORDERING) {
            self.ordering = value.parse()?;
        }
        if let Some(value) = lookup(ENV_SEED) {
            let seed = value.trim().parse::<u64>().map_err(|e| {
                EngineError::invalid_config(format!("invalid {} '{}': {}", ENV_SEED, value, e))
            })?;
            self.seed = Some(seed);
        }
        self.validate()?;
        Ok(self)
    }

    /// Overlay values from the process environment.
    pub fn with_env(self) -> EngineResult<Self> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Load defaults, then `casetree.toml` in `dir` if present, then the environment.
    pub fn load_from(dir: &Path) -> EngineResult<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        let base = if path.exists() {
            tracing::debug!(path = %path.display(), "loading config file");
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        base.with_env()
    }

    /// Load from the current working directory.
    pub fn load() -> EngineResult<Self> {
        let dir = std::env::current_dir().map_err(|e| {
            EngineError::invalid_config(format!("cannot read working directory: {}", e))
        })?;
        Self::load_from(&dir)
    }

    fn validate(&self) -> EngineResult<()> {
        if self.bench_iterations == 0 {
            return Err(EngineError::invalid_config(
                "bench_iterations must be at least 1",
            ));
        }
        Ok(())
    }

    /// Tag filter built from the include and exclude lists.
    pub fn tag_filter(&self) -> TagFilter {
        TagFilter::new(self.tag_include.iter(), self.tag_exclude.iter())
    }

    /// Seed to use for random ordering.
    ///
    /// Draws and logs a fresh seed when none is configured, so a failing
    /// order can be replayed with `CASETREE_SEED`.
    pub fn effective_seed(&self) -> u64 {
        match self.seed {
            Some(seed) => seed,
            None => {
                let seed = rand::random::<u64>();
                if self.ordering == ExecutionOrder::Random {
                    tracing::info!(seed, "random ordering seed");
                }
                seed
            }
        }
    }
}
