//! Models: maximal sets of relations with canonical naming (C3).

use std::hash::{Hash, Hasher};

use crate::error::RaError;
use crate::relation::Relation;
use crate::variable::VariableList;

/// A canonicalized, maximal set of [`Relation`]s.
///
/// Construction drops any relation that is a subset of another relation in
/// the same set (the set is kept maximal) and sorts what remains, so two
/// models built from the same relations in any order compare equal.
#[derive(Debug, Clone)]
pub struct Model {
    relations: Vec<Relation>,
    canonical_name: String,
    id: Option<u64>,
}

impl Model {
    /// Build a model from a relation set, pruning subsumed relations and
    /// sorting the remainder. `vl` is needed to compute the canonical name.
    pub fn new(relations: Vec<Relation>, vl: &VariableList) -> Result<Self, RaError> {
        let maximal = prune_subsumed(relations);
        let canonical_name = canonical_name(&maximal, vl)?;
        Ok(Model {
            relations: maximal,
            canonical_name,
            id: None,
        })
    }

    /// The model's relations, in canonical (sorted) order.
    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Cached canonical name: relation `print_name`s joined by `:`.
    pub fn canonical_name(&self) -> &str {
        &self.canonical_name
    }

    /// Optional numeric id assigned by an interning cache (ADR-3).
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    /// Attach an interning id (used by `AnalysisManager` on first insertion).
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// The number of variables spanned by the union of all relations.
    pub fn variable_count(&self) -> usize {
        self.relations
            .iter()
            .fold(Relation::new(vec![]), |acc, r| acc.union(r))
            .variable_count()
    }

    /// The lattice-parent relation: every relation of `self` is a subset of
    /// some relation of `child`. A saturated model's only child (in this
    /// sense) is itself; `top.contains_model(bottom)` is false in general.
    pub fn contains_model(&self, child: &Model) -> bool {
        self.relations
            .iter()
            .all(|r| child.relations.iter().any(|cr| r.is_subset_of(cr)))
    }

    /// The saturated model: a single relation over every registered
    /// variable.
    pub fn top(vl: &VariableList) -> Result<Self, RaError> {
        let all: Vec<usize> = (0..vl.len()).collect();
        Model::new(vec![Relation::new(all)], vl)
    }

    /// The independence model: one single-variable relation per variable
    /// for neutral systems, or two relations (all IVs, the DV) for directed
    /// systems.
    pub fn bottom(vl: &VariableList) -> Result<Self, RaError> {
        let relations = if vl.is_directed() {
            vec![
                Relation::new(vl.independent_variables()),
                Relation::new(vl.dependent_variables()),
            ]
        } else {
            (0..vl.len()).map(|v| Relation::new(vec![v])).collect()
        };
        Model::new(relations, vl)
    }
}

fn prune_subsumed(relations: Vec<Relation>) -> Vec<Relation> {
    let mut kept: Vec<Relation> = Vec::with_capacity(relations.len());
    'outer: for candidate in relations {
        let mut i = 0;
        while i < kept.len() {
            if candidate.is_subset_of(&kept[i]) {
                continue 'outer;
            }
            if kept[i].is_subset_of(&candidate) {
                kept.remove(i);
                continue;
            }
            i += 1;
        }
        kept.push(candidate);
    }
    kept.sort();
    kept
}

fn canonical_name(relations: &[Relation], vl: &VariableList) -> Result<String, RaError> {
    let names: Vec<String> = relations
        .iter()
        .map(|r| r.print_name(vl))
        .collect::<Result<_, _>>()?;
    Ok(names.join(":"))
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.relations == other.relations
    }
}

impl Eq for Model {}

impl Hash for Model {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.relations.hash(state);
    }
}
