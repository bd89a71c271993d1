//! Iterative proportional fitting for non-decomposable models (C7).

use std::time::Instant;

use crate::config::IpfConfig;
use crate::error::{ConvergenceError, RaError};
use crate::relation::Relation;
use crate::table::{ContingencyTable, Tuple};
use crate::variable::VariableList;

/// Floor applied to marginal denominators so a zero-count cell never
/// divides by zero.
const EPS: f64 = 1e-12;

/// Progress reported after each full IPF cycle, when a progress callback
/// and `reporting_interval` are configured.
#[derive(Debug, Clone, Copy)]
pub struct IpfProgress {
    /// Cycles completed so far.
    pub iteration: usize,
    /// Maximum absolute marginal deviation observed this cycle.
    pub error: f64,
    /// Wall-clock time spent on this cycle.
    pub elapsed_ns: u64,
}

/// Result of running iterative proportional fitting to convergence (or to
/// the iteration budget).
#[derive(Debug, Clone)]
pub struct IpfResult {
    /// The fitted, normalized joint distribution.
    pub fitted: ContingencyTable,
    /// Number of full cycles run.
    pub iterations: usize,
    /// Maximum absolute marginal deviation at the final cycle.
    pub error: f64,
    /// Whether `error < tolerance` was reached before the iteration budget.
    pub converged: bool,
    /// Per-cycle wall-clock time, recorded when `reporting_interval > 0`.
    pub iteration_times_ns: Vec<u64>,
}

/// Run IPF to fit `relations`' marginals against `observed` (a normalized
/// table) starting from the uniform distribution over the full state
/// space.
pub fn run(
    relations: &[Relation],
    vl: &VariableList,
    observed: &ContingencyTable,
    config: &IpfConfig,
    mut progress: Option<&mut dyn FnMut(IpfProgress)>,
) -> Result<IpfResult, RaError> {
    if relations.is_empty() {
        return Err(RaError::Validation("IPF requires at least one relation".into()));
    }

    let mut fitted = uniform_table(vl);
    let targets: Vec<ContingencyTable> = relations
        .iter()
        .map(|r| observed.project(vl, r.variables()))
        .collect::<Result<_, _>>()?;

    let mut iterations = 0usize;
    let mut error = f64::INFINITY;
    let mut iteration_times_ns = Vec::new();
    let mut converged = false;

    while iterations < config.max_iterations {
        let cycle_start = Instant::now();
        let mut max_deviation = 0.0f64;

        for (relation, target_marg) in relations.iter().zip(&targets) {
            let current_marg = fitted.project(vl, relation.variables())?;
            let mask = vl.build_mask(relation.variables())?;

            let mut entries = Vec::with_capacity(fitted.state_count());
            for tuple in fitted.entries() {
                let rel_key = tuple.key.or(&mask)?;
                let target_v = target_marg.value_at(&rel_key)?;
                let current_v = current_marg.value_at(&rel_key)?.max(EPS);
                entries.push(Tuple {
                    key: tuple.key.clone(),
                    value: tuple.value * (target_v / current_v),
                });
            }
            fitted = ContingencyTable::from_entries(vl.key_size(), entries);
            fitted.sort();
            fitted.merge()?;

            for cell in current_marg.entries() {
                let target_v = target_marg.value_at(&cell.key)?;
                max_deviation = max_deviation.max((target_v - cell.value).abs());
            }
        }

        fitted.normalize();
        iterations += 1;
        error = max_deviation;

        let elapsed_ns = cycle_start.elapsed().as_nanos() as u64;
        if config.reporting_interval > 0 && iterations % config.reporting_interval == 0 {
            iteration_times_ns.push(elapsed_ns);
            if let Some(cb) = progress.as_deref_mut() {
                cb(IpfProgress {
                    iteration: iterations,
                    error,
                    elapsed_ns,
                });
            }
        }

        if error < config.tolerance {
            converged = true;
            break;
        }
    }

    if !converged && config.raise_on_non_convergence {
        return Err(RaError::Convergence(ConvergenceError::NotConverged {
            iterations,
            tolerance: config.tolerance,
            final_error: error,
        }));
    }

    Ok(IpfResult {
        fitted,
        iterations,
        error,
        converged,
        iteration_times_ns,
    })
}

fn uniform_table(vl: &VariableList) -> ContingencyTable {
    let total = vl.state_space();
    let cardinalities: Vec<u32> = vl.variables().iter().map(|v| v.cardinality()).collect();
    let uniform_value = 1.0 / total as f64;

    let mut entries = Vec::with_capacity(total as usize);
    for idx in 0..total {
        let mut rem = idx;
        let mut pairs = Vec::with_capacity(cardinalities.len());
        for (i, &card) in cardinalities.iter().enumerate() {
            let card = u64::from(card);
            let val = (rem % card) as u32;
            rem /= card;
            pairs.push((i, val));
        }
        let key = vl.build_key(&pairs).expect("pairs are in range by construction");
        entries.push(Tuple {
            key,
            value: uniform_value,
        });
    }
    let mut table = ContingencyTable::from_entries(vl.key_size(), entries);
    table.sort();
    table
}
