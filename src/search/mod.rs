//! Model-lattice search: neighbor generators (C10) and the parallel
//! best-first driver built on top of them (C11).

pub mod driver;
pub mod filters;

pub use driver::{
    search, Candidate, CancellationToken, ProgressCallback, ProgressEvent, RuntimeEstimator,
    SearchState, SearchTiming, Statistic,
};
pub use filters::{chain_models, lattice_enumeration, Direction, SearchFilter};
