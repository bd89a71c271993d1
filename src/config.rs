//! Configuration for fit and search policy knobs.
//!
//! Loaded the way the teacher loads configuration: a [`Figment`] merge of a
//! hard-coded default, an optional `ra.toml`, and `RA_`-prefixed environment
//! variables. Policy objects are explicit arguments to [`crate::manager`] and
//! [`crate::search`] entry points rather than global state (§9 design note).
//!
//! ```toml
//! # ra.toml
//! [ipf]
//! max_iterations = 500
//! tolerance = 1e-8
//!
//! [search]
//! complexity_cap = 15
//! ```
//!
//! ```bash
//! RA_IPF__MAX_ITERATIONS=1000
//! ```

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Top-level configuration, merged from defaults / file / environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Iterative proportional fitting defaults.
    #[serde(default)]
    pub ipf: IpfConfig,
    /// Search driver defaults.
    #[serde(default)]
    pub search: SearchConfig,
    /// Error-handling policy for single-model fit vs. parallel search.
    #[serde(default)]
    pub policy: FitPolicy,
}

/// Convergence control for Iterative Proportional Fitting (C7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpfConfig {
    /// Maximum number of full sweeps over the relation list.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Stop once the maximum marginal deviation falls below this value.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Reporting interval in iterations (0 disables progress events).
    #[serde(default)]
    pub reporting_interval: usize,
    /// Whether to fail with [`crate::error::ConvergenceError`] instead of
    /// returning a best-effort fit with `converged = false`.
    #[serde(default)]
    pub raise_on_non_convergence: bool,
}

fn default_max_iterations() -> usize {
    200
}
fn default_tolerance() -> f64 {
    1e-6
}

impl Default for IpfConfig {
    fn default() -> Self {
        IpfConfig {
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            reporting_interval: 0,
            raise_on_non_convergence: false,
        }
    }
}

/// Configuration for the parallel best-first search driver (C11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Relations at or above this variable count are never fit in a loop
    /// model during search; the candidate is skipped with statistic = +∞
    /// (spec §5, §9 ADR-5).
    #[serde(default = "default_complexity_cap")]
    pub complexity_cap: usize,
    /// Number of candidates kept at each level.
    #[serde(default = "default_width")]
    pub width: usize,
    /// Maximum number of search levels.
    #[serde(default = "default_levels")]
    pub max_levels: usize,
    /// Whether to use the parallel driver (disabled falls back to a
    /// sequential walk of the same algorithm — useful for the determinism
    /// tests in spec §8).
    #[serde(default = "default_true")]
    pub use_parallel: bool,
    /// Sliding window size for the runtime estimator.
    #[serde(default = "default_window")]
    pub runtime_window: usize,
}

fn default_complexity_cap() -> usize {
    15
}
fn default_width() -> usize {
    3
}
fn default_levels() -> usize {
    5
}
fn default_window() -> usize {
    50
}
fn default_true() -> bool {
    true
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            complexity_cap: default_complexity_cap(),
            width: default_width(),
            max_levels: default_levels(),
            use_parallel: true,
            runtime_window: default_window(),
        }
    }
}

/// Error-handling policy, see spec §7.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Surface the error to the caller immediately.
    Strict,
    /// Fall back to a best-effort result (IPF instead of belief propagation
    /// on a junction-tree failure; `converged = false` on IPF non-
    /// convergence; skip the candidate in search).
    Permissive,
}

/// Bundles the per-entry-point error policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitPolicy {
    /// Policy for `AnalysisManager::fit`. Defaults to strict: "the caller
    /// wants diagnostics" (spec §7).
    #[serde(default = "strict")]
    pub fit: ErrorPolicy,
    /// Policy used internally by the search driver when evaluating
    /// candidates. Defaults to permissive: "it must never abort a long run
    /// for one bad model" (spec §7).
    #[serde(default = "permissive")]
    pub search: ErrorPolicy,
}

fn strict() -> ErrorPolicy {
    ErrorPolicy::Strict
}
fn permissive() -> ErrorPolicy {
    ErrorPolicy::Permissive
}

impl Default for FitPolicy {
    fn default() -> Self {
        FitPolicy {
            fit: ErrorPolicy::Strict,
            search: ErrorPolicy::Permissive,
        }
    }
}

impl Config {
    /// Load configuration from default locations: `ra.toml`, then
    /// `RA_`-prefixed environment variables (double underscore nests).
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("ra.toml"))
            .merge(Env::prefixed("RA_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path.
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("RA_").split("__"))
            .extract()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ipf: IpfConfig::default(),
            search: SearchConfig::default(),
            policy: FitPolicy::default(),
        }
    }
}
