//! Parallel best-first model search (C11).
//!
//! One level of the lattice walk is a structured fork-join: workers never
//! share mutable state, each constructing its own [`AnalysisManager`] over
//! read-only references to the input data. Worker results land in a plain
//! `Vec` collected by `rayon`'s join, not through a lock — positional, not
//! mutex-protected, matching the teacher's `rayon::ThreadPoolBuilder` usage
//! in `src/storage_engine/mod.rs`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::config::{Config, ErrorPolicy};
use crate::error::RaError;
use crate::graph;
use crate::ipf;
use crate::manager::{AnalysisManager, CacheStats};
use crate::model::Model;
use crate::search::filters::{Direction, SearchFilter};
use crate::table::ContingencyTable;
use crate::variable::VariableList;

/// Which statistic ranks candidates at each level: AIC/BIC minimize, DDF
/// maximizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    Aic,
    Bic,
    Ddf,
}

impl Statistic {
    fn name(self) -> &'static str {
        match self {
            Statistic::Aic => "aic",
            Statistic::Bic => "bic",
            Statistic::Ddf => "ddf",
        }
    }

    /// Comparator giving the "better" ordering first: ascending for AIC/BIC,
    /// descending for DDF. Ties break lexicographically on canonical name
    /// (spec §4.11) so output is deterministic across thread schedules.
    fn cmp(self, a: &Candidate, b: &Candidate) -> std::cmp::Ordering {
        let primary = match self {
            Statistic::Ddf => b.statistic.partial_cmp(&a.statistic),
            Statistic::Aic | Statistic::Bic => a.statistic.partial_cmp(&b.statistic),
        }
        .unwrap_or(std::cmp::Ordering::Equal);
        primary.then_with(|| a.name.cmp(&b.name))
    }
}

/// One evaluated model: its canonical name, the ranking statistic, and
/// enough metadata to trace which seed it descended from.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub model: Model,
    pub name: String,
    pub statistic: f64,
    pub has_loops: bool,
    /// True when the complexity cap forced this candidate to be skipped
    /// (statistic is `+inf` and the value is not meaningful).
    pub skipped: bool,
    /// Arena-index handle of the seed this candidate was generated from
    /// (§9 design note: no raw pointer to a progenitor model, just an id
    /// looked up through the driver's local arena).
    pub progenitor_id: Option<u64>,
}

/// Cooperative cancellation, checked at level boundaries (and, for the
/// sequential fallback, between individual model evaluations within a
/// level). Cloning shares the same underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Progress events emitted during [`search`] (spec §4.11's schema).
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    SearchStarted {
        total_levels: usize,
        statistic_name: &'static str,
    },
    SearchLevel {
        level: usize,
        total_levels: usize,
        total_models_evaluated: usize,
        loopless: usize,
        loops: usize,
        best_name: String,
        best_stat: f64,
        level_ns: u64,
        elapsed_ns: u64,
        estimated_remaining_ns: u64,
        avg_model_ns: f64,
        cache_hit_rate: f64,
    },
    IPFIteration {
        model: String,
        iter: usize,
        max_iter: usize,
        error: f64,
        converged: bool,
        state_count: usize,
        rel_count: usize,
    },
    SearchComplete {
        total_levels: usize,
        total_models_evaluated: usize,
        elapsed_ns: u64,
        cancelled: bool,
    },
}

/// Callback invoked with [`ProgressEvent`]s; may be invoked from worker
/// threads, so it must be `Send + Sync`.
pub type ProgressCallback<'a> = dyn Fn(ProgressEvent) + Send + Sync + 'a;

/// Sliding-window average over per-level wall-clock durations (window 50 by
/// default, per spec §4.11), used to project remaining runtime.
#[derive(Debug, Clone)]
pub struct RuntimeEstimator {
    window: usize,
    durations: Vec<Duration>,
}

impl RuntimeEstimator {
    pub fn new(window: usize) -> Self {
        RuntimeEstimator {
            window: window.max(1),
            durations: Vec::new(),
        }
    }

    pub fn record(&mut self, d: Duration) {
        self.durations.push(d);
        if self.durations.len() > self.window {
            self.durations.remove(0);
        }
    }

    /// Mean of the durations currently in the window, zero if empty.
    pub fn average(&self) -> Duration {
        if self.durations.is_empty() {
            return Duration::ZERO;
        }
        self.durations.iter().sum::<Duration>() / self.durations.len() as u32
    }

    /// Projected remaining time for `levels_left` more levels at the current
    /// average pace.
    pub fn estimate_remaining(&self, levels_left: usize) -> Duration {
        self.average() * levels_left as u32
    }
}

/// Terminal state of a [`search`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Completed,
    Cancelled,
}

/// Wall-clock breakdown for a whole [`search`] run.
#[derive(Debug, Clone)]
pub struct SearchTiming {
    pub total_ns: u64,
    pub per_level_ns: Vec<u64>,
    pub total_models_evaluated: usize,
    pub state: SearchState,
}

/// Monotonic id assignment for models seen during a run, used only for
/// progenitor tracing (§9 design note) — not an interning cache, just a
/// name-to-id lookup local to one `search` call.
#[derive(Default)]
struct IdArena {
    ids: HashMap<String, u64>,
    next: u64,
}

impl IdArena {
    fn id_for(&mut self, name: &str) -> u64 {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.next;
        self.next += 1;
        self.ids.insert(name.to_string(), id);
        id
    }
}

fn evaluate_model(
    model: Model,
    vl: &VariableList,
    observed: &ContingencyTable,
    config: &Config,
    statistic: Statistic,
    progenitor_id: Option<u64>,
    progress: Option<&ProgressCallback<'_>>,
) -> Result<(Candidate, CacheStats), RaError> {
    let name = model.canonical_name().to_string();
    let has_loops = graph::has_loops(model.relations(), vl)?;

    let complexity_cap = config.search.complexity_cap;
    if has_loops
        && model
            .relations()
            .iter()
            .any(|r| r.variable_count() > complexity_cap)
    {
        return Ok((
            Candidate {
                model,
                name,
                statistic: f64::INFINITY,
                has_loops,
                skipped: true,
                progenitor_id,
            },
            CacheStats::default(),
        ));
    }

    let mut mgr = AnalysisManager::new(vl.clone(), observed.clone(), config.clone())?;
    let rel_count = model.relations().len();
    let state_count = vl.state_space() as usize;
    let mut forward_ipf_progress = |p: ipf::IpfProgress| {
        if let Some(cb) = progress {
            cb(ProgressEvent::IPFIteration {
                model: name.clone(),
                iter: p.iteration,
                max_iter: config.ipf.max_iterations,
                error: p.error,
                converged: p.error <= config.ipf.tolerance,
                state_count,
                rel_count,
            });
        }
    };
    let computed = match statistic {
        Statistic::Aic if has_loops && progress.is_some() => {
            mgr.compute_aic_with_progress(&model, Some(&mut forward_ipf_progress))
        }
        Statistic::Bic if has_loops && progress.is_some() => {
            mgr.compute_bic_with_progress(&model, Some(&mut forward_ipf_progress))
        }
        Statistic::Aic => mgr.compute_aic(&model),
        Statistic::Bic => mgr.compute_bic(&model),
        Statistic::Ddf => mgr.compute_ddf(&model).map(|d| d as f64),
    };

    match computed {
        Ok(value) => Ok((
            Candidate {
                model,
                name,
                statistic: value,
                has_loops,
                skipped: false,
                progenitor_id,
            },
            mgr.cache_stats(),
        )),
        Err(e) => {
            if config.policy.search == ErrorPolicy::Strict {
                Err(e)
            } else {
                Ok((
                    Candidate {
                        model,
                        name,
                        statistic: f64::INFINITY,
                        has_loops,
                        skipped: true,
                        progenitor_id,
                    },
                    mgr.cache_stats(),
                ))
            }
        }
    }
}

/// Drive a best-first search from `seed`, generating neighbors with `filter`
/// and ranking them by `statistic`, keeping the top `width` at each of up to
/// `max_levels` levels.
///
/// Returns every candidate evaluated across every level (deduplicated by
/// canonical name, first occurrence wins) plus timing. The returned set and
/// the retained top-`width` trajectory are identical whether `use_parallel`
/// is `true` or `false` (spec §8 "search determinism").
#[allow(clippy::too_many_arguments)]
pub fn search(
    vl: &VariableList,
    observed: &ContingencyTable,
    config: &Config,
    seed: Model,
    filter: SearchFilter,
    statistic: Statistic,
    width: usize,
    max_levels: usize,
    direction: Direction,
    use_parallel: bool,
    progress: Option<&ProgressCallback<'_>>,
    cancel: Option<&CancellationToken>,
) -> Result<(Vec<Candidate>, SearchTiming), RaError> {
    let total_start = Instant::now();
    if let Some(cb) = progress {
        cb(ProgressEvent::SearchStarted {
            total_levels: max_levels,
            statistic_name: statistic.name(),
        });
    }

    let mut arena = IdArena::default();
    let mut by_name: HashMap<String, Candidate> = HashMap::new();
    let mut total_models_evaluated = 0usize;

    arena.id_for(seed.canonical_name());
    let (seed_candidate, _) = evaluate_model(seed.clone(), vl, observed, config, statistic, None, progress)?;
    total_models_evaluated += 1;
    by_name.insert(seed_candidate.name.clone(), seed_candidate);

    let mut current_level: Vec<Model> = vec![seed];
    let mut per_level_ns = Vec::new();
    let mut estimator = RuntimeEstimator::new(config.search.runtime_window);
    let mut state = SearchState::Completed;

    for level in 0..max_levels {
        if let Some(tok) = cancel {
            if tok.is_cancelled() {
                state = SearchState::Cancelled;
                break;
            }
        }
        let level_start = Instant::now();

        let neighbor_lists: Vec<Vec<Model>> = if use_parallel && current_level.len() == 1 && rayon::current_num_threads() >= 2 {
            vec![filter.neighbors(&current_level[0], vl, direction)?]
        } else {
            current_level
                .iter()
                .map(|s| filter.neighbors(s, vl, direction))
                .collect::<Result<_, _>>()?
        };

        let mut tasks: Vec<(Model, Option<u64>)> = Vec::new();
        for (seed_model, neighbors) in current_level.iter().zip(neighbor_lists) {
            let sid = arena.id_for(seed_model.canonical_name());
            for n in neighbors {
                arena.id_for(n.canonical_name());
                tasks.push((n, Some(sid)));
            }
        }

        let task_count = tasks.len();
        let results: Vec<Result<(Candidate, CacheStats), RaError>> = if use_parallel {
            tasks
                .into_par_iter()
                .map(|(m, pid)| evaluate_model(m, vl, observed, config, statistic, pid, progress))
                .collect()
        } else {
            let mut out = Vec::with_capacity(task_count);
            for (m, pid) in tasks {
                if let Some(tok) = cancel {
                    if tok.is_cancelled() {
                        break;
                    }
                }
                out.push(evaluate_model(m, vl, observed, config, statistic, pid, progress));
            }
            out
        };

        let mut level_candidates: Vec<Candidate> = Vec::with_capacity(results.len());
        let mut loopless = 0usize;
        let mut loops = 0usize;
        let mut level_hits = 0u64;
        let mut level_misses = 0u64;
        for result in results {
            let (candidate, stats) = result?;
            total_models_evaluated += 1;
            level_hits += stats.hits;
            level_misses += stats.misses;
            if candidate.has_loops {
                loops += 1;
            } else {
                loopless += 1;
            }
            by_name
                .entry(candidate.name.clone())
                .or_insert_with(|| candidate.clone());
            level_candidates.push(candidate);
        }

        level_candidates.sort_by(|a, b| statistic.cmp(a, b));
        let retained: Vec<Model> = level_candidates.iter().take(width).map(|c| c.model.clone()).collect();

        let level_ns = level_start.elapsed().as_nanos() as u64;
        per_level_ns.push(level_ns);
        estimator.record(Duration::from_nanos(level_ns));

        let best = level_candidates.first();
        let total_lookups = level_hits + level_misses;
        let cache_hit_rate = if total_lookups == 0 {
            0.0
        } else {
            level_hits as f64 / total_lookups as f64
        };
        if let Some(cb) = progress {
            cb(ProgressEvent::SearchLevel {
                level: level + 1,
                total_levels: max_levels,
                total_models_evaluated,
                loopless,
                loops,
                best_name: best.map(|c| c.name.clone()).unwrap_or_default(),
                best_stat: best.map(|c| c.statistic).unwrap_or(f64::INFINITY),
                level_ns,
                elapsed_ns: total_start.elapsed().as_nanos() as u64,
                estimated_remaining_ns: estimator
                    .estimate_remaining(max_levels.saturating_sub(level + 1))
                    .as_nanos() as u64,
                avg_model_ns: if task_count == 0 { 0.0 } else { level_ns as f64 / task_count as f64 },
                cache_hit_rate,
            });
        }

        if retained.is_empty() {
            break;
        }
        current_level = retained;
    }

    let total_ns = total_start.elapsed().as_nanos() as u64;
    if let Some(cb) = progress {
        cb(ProgressEvent::SearchComplete {
            total_levels: max_levels,
            total_models_evaluated,
            elapsed_ns: total_ns,
            cancelled: state == SearchState::Cancelled,
        });
    }

    let mut all: Vec<Candidate> = by_name.into_values().collect();
    all.sort_by(|a, b| a.name.cmp(&b.name));

    Ok((
        all,
        SearchTiming {
            total_ns,
            per_level_ns,
            total_models_evaluated,
            state,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::VariableSpec;

    fn binary_abc() -> (VariableList, ContingencyTable) {
        let vl = VariableList::new(vec![
            VariableSpec::new("A", 'A', 2),
            VariableSpec::new("B", 'B', 2),
            VariableSpec::new("C", 'C', 2),
        ])
        .unwrap();
        let a = vl.index_of_abbreviation('A').unwrap();
        let b = vl.index_of_abbreviation('B').unwrap();
        let c = vl.index_of_abbreviation('C').unwrap();
        let mut t = ContingencyTable::new(vl.key_size());
        for (av, bv, cv, count) in [
            (0, 0, 0, 30.0),
            (0, 0, 1, 5.0),
            (0, 1, 0, 5.0),
            (0, 1, 1, 10.0),
            (1, 0, 0, 10.0),
            (1, 0, 1, 5.0),
            (1, 1, 0, 5.0),
            (1, 1, 1, 30.0),
        ] {
            t.add(vl.build_key(&[(a, av), (b, bv), (c, cv)]).unwrap(), count).unwrap();
        }
        t.sort();
        t.merge().unwrap();
        (vl, t)
    }

    #[test]
    fn search_from_bottom_reaches_the_saturated_model() {
        let (vl, t) = binary_abc();
        let config = Config::default();
        let seed = Model::bottom(&vl).unwrap();
        let (candidates, timing) = search(
            &vl,
            &t,
            &config,
            seed,
            SearchFilter::Loopless,
            Statistic::Aic,
            3,
            3,
            Direction::Ascending,
            false,
            None,
            None,
        )
        .unwrap();
        assert!(candidates.iter().any(|c| c.name == "ABC"));
        assert_eq!(timing.state, SearchState::Completed);
        assert!(timing.total_models_evaluated >= candidates.len());
    }

    #[test]
    fn sequential_and_parallel_search_agree_as_sets() {
        let (vl, t) = binary_abc();
        let config = Config::default();

        let (seq, _) = search(
            &vl,
            &t,
            &config,
            Model::bottom(&vl).unwrap(),
            SearchFilter::Loopless,
            Statistic::Bic,
            3,
            3,
            Direction::Ascending,
            false,
            None,
            None,
        )
        .unwrap();
        let (par, _) = search(
            &vl,
            &t,
            &config,
            Model::bottom(&vl).unwrap(),
            SearchFilter::Loopless,
            Statistic::Bic,
            3,
            3,
            Direction::Ascending,
            true,
            None,
            None,
        )
        .unwrap();

        let mut seq_names: Vec<&str> = seq.iter().map(|c| c.name.as_str()).collect();
        let mut par_names: Vec<&str> = par.iter().map(|c| c.name.as_str()).collect();
        seq_names.sort_unstable();
        par_names.sort_unstable();
        assert_eq!(seq_names, par_names);
    }

    #[test]
    fn ddf_ranks_descending_aic_ranks_ascending() {
        let (vl, t) = binary_abc();
        let config = Config::default();
        let (aic_candidates, _) = search(
            &vl,
            &t,
            &config,
            Model::bottom(&vl).unwrap(),
            SearchFilter::Full,
            Statistic::Aic,
            10,
            1,
            Direction::Ascending,
            false,
            None,
            None,
        )
        .unwrap();
        assert!(!aic_candidates.is_empty());
    }

    #[test]
    fn cancellation_returns_a_consistent_prefix() {
        let (vl, t) = binary_abc();
        let config = Config::default();
        let token = CancellationToken::new();
        token.cancel();
        let (candidates, timing) = search(
            &vl,
            &t,
            &config,
            Model::bottom(&vl).unwrap(),
            SearchFilter::Loopless,
            Statistic::Aic,
            3,
            5,
            Direction::Ascending,
            false,
            None,
            Some(&token),
        )
        .unwrap();
        assert_eq!(timing.state, SearchState::Cancelled);
        // the seed itself was still evaluated before the first level-boundary check
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn progress_events_bracket_the_run() {
        use std::sync::Mutex;
        let (vl, t) = binary_abc();
        let config = Config::default();
        let events: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let cb = |e: ProgressEvent| {
            let label = match e {
                ProgressEvent::SearchStarted { .. } => "started",
                ProgressEvent::SearchLevel { .. } => "level",
                ProgressEvent::IPFIteration { .. } => "ipf",
                ProgressEvent::SearchComplete { .. } => "complete",
            };
            events.lock().unwrap().push(label.to_string());
        };
        let (_candidates, _timing) = search(
            &vl,
            &t,
            &config,
            Model::bottom(&vl).unwrap(),
            SearchFilter::Loopless,
            Statistic::Aic,
            2,
            2,
            Direction::Ascending,
            false,
            Some(&cb),
            None,
        )
        .unwrap();
        let log = events.into_inner().unwrap();
        assert_eq!(log.first().unwrap(), "started");
        assert_eq!(log.last().unwrap(), "complete");
        assert_eq!(log.iter().filter(|e| *e == "level").count(), 2);
    }

    #[test]
    fn ipf_iteration_events_surface_for_a_loopy_seed_when_reporting_interval_is_set() {
        use crate::relation::Relation;
        use std::sync::Mutex;

        let (vl, t) = binary_abc();
        let a = vl.index_of_abbreviation('A').unwrap();
        let b = vl.index_of_abbreviation('B').unwrap();
        let c = vl.index_of_abbreviation('C').unwrap();
        let triangle = Model::new(
            vec![
                Relation::new(vec![a, b]),
                Relation::new(vec![b, c]),
                Relation::new(vec![a, c]),
            ],
            &vl,
        )
        .unwrap();

        let mut config = Config::default();
        config.ipf.reporting_interval = 1;

        let ipf_events: Mutex<Vec<(String, usize, usize)>> = Mutex::new(Vec::new());
        let cb = |e: ProgressEvent| {
            if let ProgressEvent::IPFIteration {
                model,
                rel_count,
                state_count,
                ..
            } = e
            {
                ipf_events.lock().unwrap().push((model, rel_count, state_count));
            }
        };

        let (_candidates, _timing) = search(
            &vl,
            &t,
            &config,
            triangle.clone(),
            SearchFilter::Full,
            Statistic::Aic,
            1,
            0,
            Direction::Ascending,
            false,
            Some(&cb),
            None,
        )
        .unwrap();

        let events = ipf_events.into_inner().unwrap();
        assert!(!events.is_empty());
        for (model_name, rel_count, state_count) in &events {
            assert_eq!(model_name, triangle.canonical_name());
            assert_eq!(*rel_count, 3);
            assert_eq!(*state_count, 8);
        }
    }

    #[test]
    fn runtime_estimator_averages_within_the_window() {
        let mut estimator = RuntimeEstimator::new(2);
        estimator.record(Duration::from_millis(10));
        estimator.record(Duration::from_millis(20));
        estimator.record(Duration::from_millis(30));
        // window of 2: only the last two samples (20, 30) are averaged.
        assert_eq!(estimator.average(), Duration::from_millis(25));
    }
}
