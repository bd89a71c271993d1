//! Analysis Manager: the coordinator owning caches, reference models and
//! fit/search dispatch (C9).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::belief_propagation;
use crate::config::{Config, ErrorPolicy};
use crate::error::RaError;
use crate::graph;
use crate::ipf;
use crate::junction_tree::JunctionTree;
use crate::model::Model;
use crate::profiler::Profiler;
use crate::relation::Relation;
use crate::statistics;
use crate::table::ContingencyTable;
use crate::variable::VariableList;

/// Hit/miss instrumentation for the relation and model interning caches.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    fn hit(&mut self) {
        self.hits += 1;
    }

    fn miss(&mut self) {
        self.misses += 1;
    }

    /// Fraction of lookups that were hits, `0.0` if there were none.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Wall-clock breakdown for a single [`AnalysisManager::fit`] call.
#[derive(Debug, Clone, Copy, Default)]
pub struct FitTiming {
    /// Belief-propagation collect phase, `0` for loop models.
    pub collect_ns: u64,
    /// Belief-propagation distribute phase, `0` for loop models.
    pub distribute_ns: u64,
    /// Total wall-clock time for the whole `fit` call.
    pub total_ns: u64,
}

/// The full statistical profile of a fitted model.
#[derive(Debug, Clone)]
pub struct FitResult {
    pub model_name: String,
    pub fitted: ContingencyTable,
    pub h: f64,
    pub t: f64,
    pub df: u64,
    pub ddf: u64,
    pub lr: f64,
    pub chi2: f64,
    pub alpha: f64,
    pub beta: f64,
    pub aic: f64,
    pub bic: f64,
    /// `H(DV | IV)` for directed systems, `None` for neutral ones.
    pub conditional_h: Option<f64>,
    /// Fraction of the full joint state space with non-negligible fitted
    /// mass.
    pub coverage: f64,
    pub ipf_iterations: usize,
    pub ipf_error: f64,
    pub has_loops: bool,
    pub timing: FitTiming,
}

/// One row of the conditional-DV prediction table: for a fixed IV-state,
/// the fitted probability of each DV value and the argmax prediction.
#[derive(Debug, Clone)]
pub struct ConditionalDvRow {
    pub iv_values: Vec<u32>,
    pub dv_probabilities: Vec<f64>,
    pub predicted: u32,
}

/// Result of [`AnalysisManager::compute_conditional_dv`].
#[derive(Debug, Clone)]
pub struct ConditionalDvTable {
    pub rows: Vec<ConditionalDvRow>,
    pub correct: f64,
    pub total: f64,
}

impl ConditionalDvTable {
    pub fn accuracy(&self) -> f64 {
        if self.total <= 0.0 {
            0.0
        } else {
            self.correct / self.total
        }
    }
}

/// Confusion matrix (rows = actual class, columns = predicted class) and
/// its derived per-class precision/recall.
#[derive(Debug, Clone)]
pub struct ConfusionMatrix {
    pub matrix: Vec<Vec<f64>>,
    pub accuracy: f64,
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
}

struct FitDistribution {
    joint: ContingencyTable,
    has_loops: bool,
    iterations: usize,
    error: f64,
    collect_ns: u64,
    distribute_ns: u64,
}

/// Owns the variable registry, observed data and interning caches; the
/// single entry point for fitting and inspecting models.
pub struct AnalysisManager {
    vl: VariableList,
    observed: ContingencyTable,
    normalized: ContingencyTable,
    n: f64,
    config: Config,
    relation_cache: HashMap<Vec<usize>, Arc<Relation>>,
    model_cache: HashMap<String, Arc<Model>>,
    next_model_id: u64,
    cache_stats: CacheStats,
    profiler: Profiler,
    top: Model,
    bottom: Model,
}

impl AnalysisManager {
    /// Construct a manager over `vl`/`observed`. Validates the table is
    /// non-empty with positive total mass.
    pub fn new(vl: VariableList, mut observed: ContingencyTable, config: Config) -> Result<Self, RaError> {
        if observed.is_empty() {
            return Err(RaError::Validation("contingency table must not be empty".into()));
        }
        observed.sort();
        observed.merge()?;
        let n = observed.sum();
        if n <= 0.0 {
            return Err(RaError::Validation("sample sum must be positive".into()));
        }

        let mut normalized = observed.clone();
        normalized.normalize();

        let top = Model::top(&vl)?;
        let bottom = Model::bottom(&vl)?;
        let profiler = Profiler::disabled();

        Ok(AnalysisManager {
            vl,
            observed,
            normalized,
            n,
            config,
            relation_cache: HashMap::new(),
            model_cache: HashMap::new(),
            next_model_id: 0,
            cache_stats: CacheStats::default(),
            profiler,
            top,
            bottom,
        })
    }

    pub fn variables(&self) -> &VariableList {
        &self.vl
    }

    pub fn observed(&self) -> &ContingencyTable {
        &self.observed
    }

    pub fn sample_size(&self) -> f64 {
        self.n
    }

    pub fn top_model(&self) -> &Model {
        &self.top
    }

    pub fn bottom_model(&self) -> &Model {
        &self.bottom
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache_stats
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub fn profiler_mut(&mut self) -> &mut Profiler {
        &mut self.profiler
    }

    fn intern_relation(&mut self, variables: Vec<usize>) -> Arc<Relation> {
        let mut key = variables.clone();
        key.sort_unstable();
        key.dedup();
        if let Some(cached) = self.relation_cache.get(&key) {
            self.cache_stats.hit();
            return cached.clone();
        }
        self.cache_stats.miss();
        let relation = Arc::new(Relation::new(variables));
        self.relation_cache.insert(key, relation.clone());
        relation
    }

    fn intern_model(&mut self, model: Model) -> Arc<Model> {
        if let Some(cached) = self.model_cache.get(model.canonical_name()) {
            self.cache_stats.hit();
            return cached.clone();
        }
        self.cache_stats.miss();
        let id = self.next_model_id;
        self.next_model_id += 1;
        let model = Arc::new(model.with_id(id));
        self.model_cache.insert(model.canonical_name().to_string(), model.clone());
        model
    }

    /// Parse `Model ::= Relation (":" Relation)*`, `Relation ::= Abbrev+`,
    /// interning the resulting relations and model.
    pub fn parse_model(&mut self, s: &str) -> Result<Arc<Model>, RaError> {
        let mut relations = Vec::new();
        for token in s.split(':') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let mut vars = Vec::with_capacity(token.chars().count());
            for ch in token.chars() {
                vars.push(self.vl.index_of_abbreviation(ch)?);
            }
            let relation = self.intern_relation(vars);
            relations.push((*relation).clone());
        }
        let model = Model::new(relations, &self.vl)?;
        let interned = self.intern_model(model);
        tracing::debug!(model = interned.canonical_name(), "model_parsed");
        Ok(interned)
    }

    fn fit_distribution(&mut self, model: &Model) -> Result<FitDistribution, RaError> {
        self.fit_distribution_with_progress(model, None)
    }

    /// As [`Self::fit_distribution`], but forwards IPF's per-iteration
    /// progress to `on_progress` when the model is loopy and IPF actually
    /// runs. Used by the search driver to surface [`IPFIteration`] events
    /// without changing the ordinary fit path.
    ///
    /// [`IPFIteration`]: crate::search::ProgressEvent::IPFIteration
    pub fn fit_distribution_with_progress(
        &mut self,
        model: &Model,
        mut on_progress: Option<&mut dyn FnMut(ipf::IpfProgress)>,
    ) -> Result<FitDistribution, RaError> {
        let model_has_loops = graph::has_loops(model.relations(), &self.vl)?;

        if !model_has_loops {
            match JunctionTree::build(model, &self.vl) {
                Ok(jt) => {
                    let bp = self
                        .profiler
                        .scope("belief_propagation", || belief_propagation::run(&jt, &self.vl, &self.normalized))?;
                    return Ok(FitDistribution {
                        joint: bp.joint,
                        has_loops: false,
                        iterations: bp.iterations,
                        error: bp.error,
                        collect_ns: bp.collect_ns,
                        distribute_ns: bp.distribute_ns,
                    });
                }
                Err(e) => {
                    if self.config.policy.fit == ErrorPolicy::Strict {
                        return Err(e.into());
                    }
                    tracing::debug!(
                        model = model.canonical_name(),
                        error = %e,
                        "junction_tree_build_failed_falling_back_to_ipf"
                    );
                }
            }
        }

        let relations = model.relations().to_vec();
        let vl = &self.vl;
        let normalized = &self.normalized;
        let ipf_config = self.config.ipf.clone();
        let ipf_result = self.profiler.scope("ipf", || {
            ipf::run(&relations, vl, normalized, &ipf_config, on_progress.as_deref_mut())
        })?;
        Ok(FitDistribution {
            joint: ipf_result.fitted,
            has_loops: true,
            iterations: ipf_result.iterations,
            error: ipf_result.error,
            collect_ns: 0,
            distribute_ns: 0,
        })
    }

    /// Entropy of `model`'s fitted distribution.
    pub fn compute_h(&mut self, model: &Model) -> Result<f64, RaError> {
        let dist = self.fit_distribution(model)?;
        Ok(statistics::entropy(&dist.joint))
    }

    /// Transmission: `H(bottom) - H(model)`.
    pub fn compute_t(&mut self, model: &Model) -> Result<f64, RaError> {
        let h_bottom = self.compute_h(&self.bottom.clone())?;
        let h_model = self.compute_h(model)?;
        Ok(h_bottom - h_model)
    }

    pub fn compute_df(&self, model: &Model) -> Result<u64, RaError> {
        statistics::model_df(model.relations(), &self.vl)
    }

    pub fn compute_ddf(&self, model: &Model) -> Result<u64, RaError> {
        let model_df = self.compute_df(model)?;
        let saturated_df = self.compute_df(&self.top)?;
        Ok(statistics::delta_df(model_df, saturated_df))
    }

    pub fn compute_lr(&mut self, model: &Model) -> Result<f64, RaError> {
        let h_model = self.compute_h(model)?;
        let h_saturated = statistics::entropy(&self.normalized);
        Ok(statistics::likelihood_ratio(h_model, h_saturated, self.n))
    }

    /// As [`Self::compute_lr`], forwarding IPF progress for `model`'s own
    /// fit (the bottom-model reference fit never reports progress).
    pub fn compute_lr_with_progress(
        &mut self,
        model: &Model,
        on_progress: Option<&mut dyn FnMut(ipf::IpfProgress)>,
    ) -> Result<f64, RaError> {
        let dist = self.fit_distribution_with_progress(model, on_progress)?;
        let h_model = statistics::entropy(&dist.joint);
        let h_saturated = statistics::entropy(&self.normalized);
        Ok(statistics::likelihood_ratio(h_model, h_saturated, self.n))
    }

    pub fn compute_aic(&mut self, model: &Model) -> Result<f64, RaError> {
        let lr = self.compute_lr(model)?;
        let df = self.compute_df(model)?;
        Ok(statistics::aic(lr, df))
    }

    pub fn compute_bic(&mut self, model: &Model) -> Result<f64, RaError> {
        let lr = self.compute_lr(model)?;
        let ddf = self.compute_ddf(model)?;
        Ok(statistics::bic(lr, ddf, self.n))
    }

    /// As [`Self::compute_aic`], forwarding IPF progress for loopy models.
    pub fn compute_aic_with_progress(
        &mut self,
        model: &Model,
        on_progress: Option<&mut dyn FnMut(ipf::IpfProgress)>,
    ) -> Result<f64, RaError> {
        let lr = self.compute_lr_with_progress(model, on_progress)?;
        let df = self.compute_df(model)?;
        Ok(statistics::aic(lr, df))
    }

    /// As [`Self::compute_bic`], forwarding IPF progress for loopy models.
    pub fn compute_bic_with_progress(
        &mut self,
        model: &Model,
        on_progress: Option<&mut dyn FnMut(ipf::IpfProgress)>,
    ) -> Result<f64, RaError> {
        let lr = self.compute_lr_with_progress(model, on_progress)?;
        let ddf = self.compute_ddf(model)?;
        Ok(statistics::bic(lr, ddf, self.n))
    }

    /// Orchestrate C4 -> (C5+C6) or C7, assembling every statistic.
    pub fn fit(&mut self, model: &Model) -> Result<FitResult, RaError> {
        let start = Instant::now();
        let dist = self.fit_distribution(model)?;

        let h_model = statistics::entropy(&dist.joint);
        let h_saturated = statistics::entropy(&self.normalized);
        let h_bottom = self.compute_h(&self.bottom.clone())?;
        let t = h_bottom - h_model;

        let df = statistics::model_df(model.relations(), &self.vl)?;
        let saturated_df = statistics::model_df(self.top.relations(), &self.vl)?;
        let ddf = statistics::delta_df(df, saturated_df);

        let lr = statistics::likelihood_ratio(h_model, h_saturated, self.n);
        let chi2 = statistics::pearson_chi2(&self.observed, &dist.joint, self.n)?;
        let alpha = statistics::p_value(lr, ddf);
        let beta = statistics::power(lr, ddf, 0.05);
        let aic = statistics::aic(lr, df);
        let bic = statistics::bic(lr, ddf, self.n);

        let conditional_h = if self.vl.is_directed() {
            let iv = self.vl.independent_variables();
            let h_iv = statistics::entropy(&dist.joint.project(&self.vl, &iv)?);
            Some(h_model - h_iv)
        } else {
            None
        };

        let coverage = dist.joint.state_count() as f64 / self.vl.state_space() as f64;
        let total_ns = start.elapsed().as_nanos() as u64;

        tracing::info!(
            model = model.canonical_name(),
            has_loops = dist.has_loops,
            df,
            aic,
            bic,
            total_ns,
            "model_fit"
        );

        Ok(FitResult {
            model_name: model.canonical_name().to_string(),
            fitted: dist.joint,
            h: h_model,
            t,
            df,
            ddf,
            lr,
            chi2,
            alpha,
            beta,
            aic,
            bic,
            conditional_h,
            coverage,
            ipf_iterations: dist.iterations,
            ipf_error: dist.error,
            has_loops: dist.has_loops,
            timing: FitTiming {
                collect_ns: dist.collect_ns,
                distribute_ns: dist.distribute_ns,
                total_ns,
            },
        })
    }

    /// Enumerate every IV-state, read the fitted `P(DV = k | IV)`, and pick
    /// the argmax prediction, tallied against the raw observed counts.
    pub fn compute_conditional_dv(&mut self, model: &Model) -> Result<ConditionalDvTable, RaError> {
        if !self.vl.is_directed() {
            return Err(RaError::Validation(
                "compute_conditional_dv requires a directed system".into(),
            ));
        }
        let dv = self.vl.dependent_variables()[0];
        let iv = self.vl.independent_variables();
        let dv_card = self.vl.variable(dv)?.cardinality();

        let dist = self.fit_distribution(model)?;

        let iv_cardinalities: Vec<u32> = iv
            .iter()
            .map(|&v| self.vl.variable(v).map(|var| var.cardinality()))
            .collect::<Result<_, _>>()?;
        let total_iv_states: u64 = iv_cardinalities.iter().map(|&c| u64::from(c)).product();

        let mut rows = Vec::with_capacity(total_iv_states as usize);
        let mut correct = 0.0;
        let mut total = 0.0;

        for idx in 0..total_iv_states {
            let mut rem = idx;
            let mut iv_values = Vec::with_capacity(iv.len());
            let mut iv_pairs = Vec::with_capacity(iv.len());
            for (i, &v) in iv.iter().enumerate() {
                let card = u64::from(iv_cardinalities[i]);
                let val = (rem % card) as u32;
                rem /= card;
                iv_values.push(val);
                iv_pairs.push((v, val));
            }

            let mut dv_probabilities = Vec::with_capacity(dv_card as usize);
            let mut best_value = 0u32;
            let mut best_prob = f64::NEG_INFINITY;
            let mut counts = Vec::with_capacity(dv_card as usize);
            for dv_value in 0..dv_card {
                let mut pairs = iv_pairs.clone();
                pairs.push((dv, dv_value));
                let key = self.vl.build_key(&pairs)?;
                let prob = dist.joint.value_at(&key)?;
                let count = self.observed.value_at(&key)?;
                dv_probabilities.push(prob);
                counts.push(count);
                if prob > best_prob {
                    best_prob = prob;
                    best_value = dv_value;
                }
            }

            correct += counts[best_value as usize];
            total += counts.iter().sum::<f64>();

            rows.push(ConditionalDvRow {
                iv_values,
                dv_probabilities,
                predicted: best_value,
            });
        }

        Ok(ConditionalDvTable { rows, correct, total })
    }

    /// Build the confusion matrix from [`AnalysisManager::compute_conditional_dv`]
    /// and the raw observed counts.
    pub fn compute_confusion_matrix(&mut self, model: &Model) -> Result<ConfusionMatrix, RaError> {
        if !self.vl.is_directed() {
            return Err(RaError::Validation(
                "compute_confusion_matrix requires a directed system".into(),
            ));
        }
        let dv = self.vl.dependent_variables()[0];
        let iv = self.vl.independent_variables();
        let dv_card = self.vl.variable(dv)?.cardinality() as usize;

        let table = self.compute_conditional_dv(model)?;
        let mut matrix = vec![vec![0.0; dv_card]; dv_card];

        for row in &table.rows {
            let iv_pairs: Vec<(usize, u32)> = iv.iter().copied().zip(row.iv_values.iter().copied()).collect();
            for actual in 0..dv_card as u32 {
                let mut pairs = iv_pairs.clone();
                pairs.push((dv, actual));
                let key = self.vl.build_key(&pairs)?;
                let count = self.observed.value_at(&key)?;
                matrix[actual as usize][row.predicted as usize] += count;
            }
        }

        let total: f64 = matrix.iter().flatten().sum();
        let correct: f64 = (0..dv_card).map(|i| matrix[i][i]).sum();
        let accuracy = if total > 0.0 { correct / total } else { 0.0 };

        let mut precision = Vec::with_capacity(dv_card);
        let mut recall = Vec::with_capacity(dv_card);
        for i in 0..dv_card {
            let col_sum: f64 = (0..dv_card).map(|r| matrix[r][i]).sum();
            let row_sum: f64 = matrix[i].iter().sum();
            precision.push(if col_sum > 0.0 { matrix[i][i] / col_sum } else { 0.0 });
            recall.push(if row_sum > 0.0 { matrix[i][i] / row_sum } else { 0.0 });
        }

        Ok(ConfusionMatrix {
            matrix,
            accuracy,
            precision,
            recall,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::VariableSpec;

    fn uniform_abc() -> (VariableList, ContingencyTable) {
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
        for av in 0..2u32 {
            for bv in 0..2u32 {
                for cv in 0..2u32 {
                    t.add(vl.build_key(&[(a, av), (b, bv), (c, cv)]).unwrap(), 100.0)
                        .unwrap();
                }
            }
        }
        (vl, t)
    }

    #[test]
    fn construction_rejects_empty_table() {
        let vl = VariableList::new(vec![VariableSpec::new("A", 'A', 2)]).unwrap();
        let empty = ContingencyTable::new(vl.key_size());
        assert!(AnalysisManager::new(vl, empty, Config::default()).is_err());
    }

    #[test]
    fn parse_model_round_trips_through_print_name() {
        let (vl, t) = uniform_abc();
        let mut mgr = AnalysisManager::new(vl, t, Config::default()).unwrap();
        let model = mgr.parse_model("AB:BC").unwrap();
        let reparsed = mgr.parse_model(model.canonical_name()).unwrap();
        assert_eq!(model.canonical_name(), reparsed.canonical_name());
    }

    #[test]
    fn independence_three_variable_scenario() {
        let (vl, t) = uniform_abc();
        let mut mgr = AnalysisManager::new(vl, t, Config::default()).unwrap();
        let independence = mgr.parse_model("A:B:C").unwrap();
        let independence = (*independence).clone();

        let h = mgr.compute_h(&independence).unwrap();
        assert!((h - 3.0).abs() < 1e-6);

        let lr = mgr.compute_lr(&independence).unwrap();
        assert!(lr.abs() < 1e-6);
    }

    #[test]
    fn unknown_abbreviation_in_parse_model_is_validation_error() {
        let (vl, t) = uniform_abc();
        let mut mgr = AnalysisManager::new(vl, t, Config::default()).unwrap();
        assert!(matches!(mgr.parse_model("AZ"), Err(RaError::Validation(_))));
    }

    #[test]
    fn saturated_model_has_zero_lr_and_ddf() {
        let (vl, t) = uniform_abc();
        let mut mgr = AnalysisManager::new(vl, t, Config::default()).unwrap();
        let top = mgr.top_model().clone();
        let lr = mgr.compute_lr(&top).unwrap();
        let ddf = mgr.compute_ddf(&top).unwrap();
        assert!(lr.abs() < 1e-6);
        assert_eq!(ddf, 0);
        assert!((statistics::p_value(lr, ddf) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cache_stats_count_hits_on_repeated_parse() {
        let (vl, t) = uniform_abc();
        let mut mgr = AnalysisManager::new(vl, t, Config::default()).unwrap();
        mgr.parse_model("AB").unwrap();
        let misses_after_first = mgr.cache_stats().misses;
        mgr.parse_model("AB").unwrap();
        assert!(mgr.cache_stats().hits > 0);
        assert_eq!(mgr.cache_stats().misses, misses_after_first);
    }
}
