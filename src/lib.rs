//! # Reconstructability Analysis Engine
//!
//! A library for Reconstructability Analysis (RA): the information-theoretic
//! study of how well a collection of low-order relations among variables
//! ("a model") reconstructs the full joint distribution observed in a data
//! set.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! VariableList + ContingencyTable (observed data)
//!     ↓
//! [Key / VariableList]        → packed bit-key addressing, wildcard masks
//!     ↓
//! [Relation / Model]          → hypergraph of variable subsets
//!     ↓
//! [Graph / Chordality]        → primal graph, MCS, PEO, maximal cliques
//!     ↓
//! [Junction Tree]             → clique tree + Running Intersection Property
//!     ↓                              │
//!     ├── decomposable ──────────────┤
//!     │   [Belief Propagation]       │ non-decomposable (loopy)
//!     │        ↓                     ↓
//!     │                         [Iterative Proportional Fitting]
//!     ↓                              ↓
//! [Statistics]                 ← fitted joint distribution
//!     ↓
//! [Analysis Manager]           → fit(), search(), conditional DV prediction
//!     ↓
//! [Search Filters / Driver]    → lattice neighbor generation, parallel
//!                                 best-first model search
//! ```
//!
//! ## Usage
//!
//! ### Fitting a single model
//! ```rust,ignore
//! use ra_engine::{AnalysisManager, Config, ContingencyTable, VariableList, VariableSpec};
//!
//! let vl = VariableList::new(vec![
//!     VariableSpec::new("A", 'A', 2),
//!     VariableSpec::new("B", 'B', 2),
//!     VariableSpec::new("C", 'C', 2).dependent(),
//! ])?;
//!
//! let observed: ContingencyTable = load_observed_counts(&vl);
//! let mut manager = AnalysisManager::new(vl, observed, Config::default())?;
//!
//! let model = manager.parse_model("AC:BC")?;
//! let fit = manager.fit(&model)?;
//! println!("AIC = {}, BIC = {}", fit.aic, fit.bic);
//! ```
//!
//! ### Searching the model lattice
//! ```rust,ignore
//! use ra_engine::search::{search, Direction, SearchFilter, Statistic};
//!
//! let (candidates, timing) = search(
//!     manager.variables(), manager.observed(), &config,
//!     Model::bottom(manager.variables())?,
//!     SearchFilter::Loopless, Statistic::Aic,
//!     3, 5, Direction::Ascending, true, None, None,
//! )?;
//! ```
//!
//! ## Module Organization
//!
//! | Module | Component | Purpose |
//! |--------|-----------|---------|
//! | `key` | C1 | Packed bit-key encoding with wildcard semantics |
//! | `variable` | C1 | Variable metadata, bit layout, `VariableList` |
//! | `table` | C2 | Sparse sorted contingency tables, projection |
//! | `relation` | C3 | A single variable subset within a model |
//! | `model` | C3 | A hypergraph of relations, canonical naming |
//! | `graph` | C4 | Primal graph, MCS/PEO, chordality, maximal cliques |
//! | `junction_tree` | C5 | Clique tree construction, RIP verification |
//! | `belief_propagation` | C6 | Exact inference on decomposable models |
//! | `ipf` | C7 | Iterative proportional fitting for loopy models |
//! | `statistics` | C8 | Entropy, DF, LR, chi-squared, AIC/BIC, power |
//! | `manager` | C9 | Caching, reference models, fit/predict dispatch |
//! | `search` | C10/C11 | Lattice neighbor filters, parallel search driver |
//! | `config` | - | `figment`-backed configuration |
//! | `error` | - | `thiserror` error taxonomy |
//! | `profiler` | - | Zero-cost-when-disabled operation profiler |

pub mod belief_propagation;
pub mod config;
pub mod error;
pub mod graph;
pub mod ipf;
pub mod junction_tree;
pub mod key;
pub mod manager;
pub mod model;
pub mod profiler;
pub mod relation;
pub mod search;
pub mod statistics;
pub mod table;
pub mod variable;

pub use config::{Config, ErrorPolicy, FitPolicy, IpfConfig, SearchConfig};
pub use error::{ConvergenceError, GraphError, JunctionTreeError, RaError, RaResult};
pub use key::Key;
pub use manager::{
    AnalysisManager, CacheStats, ConditionalDvRow, ConditionalDvTable, ConfusionMatrix, FitResult,
    FitTiming,
};
pub use model::Model;
pub use profiler::{Granularity, Profiler};
pub use relation::Relation;
pub use table::{ContingencyTable, Tuple};
pub use variable::{Variable, VariableList, VariableSpec};
