//! Neighbor-generating filters for the best-first model search (C10).
//!
//! Every filter is purely structural: it inspects a model's relation shape
//! and the variable list's directed/neutral layout, never the observed
//! data. Each call returns a deterministic, duplicate-free (by canonical
//! name) set of neighbor models.

use std::collections::HashSet;

use crate::error::RaError;
use crate::graph;
use crate::model::Model;
use crate::relation::Relation;
use crate::variable::VariableList;

/// Which direction of the lattice to move in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Toward the saturated model: add a variable to a relation, or merge
    /// two relations.
    Ascending,
    /// Toward the independence model: split a relation into two.
    Descending,
}

/// Neighbor-generation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchFilter {
    /// Structural neighbors that remain decomposable (verified via C4).
    Loopless,
    /// All structural neighbors, loop models included.
    Full,
    /// Structural neighbors whose relations are pairwise variable-disjoint.
    Disjoint,
    /// Path-shaped (chain) models over variable permutations.
    Chain,
}

impl SearchFilter {
    /// Generate this filter's neighbors of `model` in `direction`.
    pub fn neighbors(self, model: &Model, vl: &VariableList, direction: Direction) -> Result<Vec<Model>, RaError> {
        match self {
            SearchFilter::Loopless => filter_decomposable(structural_neighbors(model, vl, direction)?, vl),
            SearchFilter::Full => structural_neighbors(model, vl, direction),
            SearchFilter::Disjoint => {
                let candidates = structural_neighbors(model, vl, direction)?;
                Ok(candidates.into_iter().filter(is_disjoint).collect())
            }
            SearchFilter::Chain => chain_neighbors(model, vl),
        }
    }
}

fn dedup_models(models: Vec<Model>) -> Vec<Model> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(models.len());
    for m in models {
        if seen.insert(m.canonical_name().to_string()) {
            out.push(m);
        }
    }
    out
}

/// Indices of the relations eligible for ascending/descending edits: every
/// relation for a neutral system, or only the predictive (DV-containing)
/// relations for a directed one. The IV-only relation of a directed bottom
/// model is never touched.
fn eligible_relations(model: &Model, vl: &VariableList) -> Vec<usize> {
    if !vl.is_directed() {
        return (0..model.relations().len()).collect();
    }
    let dv = vl.dependent_variables();
    model
        .relations()
        .iter()
        .enumerate()
        .filter(|(_, r)| dv.iter().any(|d| r.variables().contains(d)))
        .map(|(i, _)| i)
        .collect()
}

fn structural_neighbors(model: &Model, vl: &VariableList, direction: Direction) -> Result<Vec<Model>, RaError> {
    match direction {
        Direction::Ascending => ascending_neighbors(model, vl),
        Direction::Descending => descending_neighbors(model, vl),
    }
}

fn without(relations: &[Relation], skip: &[usize]) -> Vec<Relation> {
    relations
        .iter()
        .enumerate()
        .filter(|&(k, _)| !skip.contains(&k))
        .map(|(_, r)| r.clone())
        .collect()
}

fn ascending_neighbors(model: &Model, vl: &VariableList) -> Result<Vec<Model>, RaError> {
    let relations = model.relations();
    let eligible = eligible_relations(model, vl);
    let mut out = Vec::new();

    for &i in &eligible {
        let r = &relations[i];
        for v in 0..vl.len() {
            if r.variables().contains(&v) {
                continue;
            }
            let mut new_vars = r.variables().to_vec();
            new_vars.push(v);
            let mut new_relations = relations.to_vec();
            new_relations[i] = Relation::new(new_vars);
            out.push(Model::new(new_relations, vl)?);
        }
    }

    for &i in &eligible {
        for j in 0..relations.len() {
            if i == j {
                continue;
            }
            let merged = relations[i].union(&relations[j]);
            let mut new_relations = without(relations, &[i, j]);
            new_relations.push(merged);
            out.push(Model::new(new_relations, vl)?);
        }
    }

    out.extend(add_edge_neighbors(model, vl)?);

    Ok(dedup_models(out))
}

/// Introduce a single new pairwise relation between two variables already
/// present in the model but not yet directly related by any relation. This
/// is the move that can make the primal graph non-chordal (a loop model),
/// since growing or merging existing relations never can: either always
/// subsumes its inputs and so never leaves the primal graph's cliques
/// uncovered.
fn add_edge_neighbors(model: &Model, vl: &VariableList) -> Result<Vec<Model>, RaError> {
    let relations = model.relations();
    let directed = vl.is_directed();
    let dv = vl.dependent_variables();

    let mut vars: Vec<usize> = relations.iter().flat_map(|r| r.variables().iter().copied()).collect();
    vars.sort_unstable();
    vars.dedup();

    let mut out = Vec::new();
    for i in 0..vars.len() {
        for j in (i + 1)..vars.len() {
            let (u, v) = (vars[i], vars[j]);
            if directed && !dv.contains(&u) && !dv.contains(&v) {
                // an edge among IVs only would reshape the reserved relation
                continue;
            }
            if relations.iter().any(|r| r.variables().contains(&u) && r.variables().contains(&v)) {
                continue;
            }
            let mut new_relations = relations.to_vec();
            new_relations.push(Relation::new(vec![u, v]));
            out.push(Model::new(new_relations, vl)?);
        }
    }
    Ok(out)
}

fn descending_neighbors(model: &Model, vl: &VariableList) -> Result<Vec<Model>, RaError> {
    let relations = model.relations();
    let directed = vl.is_directed();
    let dv = vl.dependent_variables();
    let mut out = Vec::new();

    for (i, r) in relations.iter().enumerate() {
        if r.variable_count() < 2 {
            continue;
        }

        if directed {
            let contains_dv = dv.iter().any(|d| r.variables().contains(d));
            if !contains_dv {
                // reserved IV-only relation, never broken apart
                continue;
            }
            for &v in r.variables() {
                if dv.contains(&v) {
                    continue;
                }
                let remaining: Vec<usize> = r.variables().iter().copied().filter(|&x| x != v).collect();
                let mut new_relations = without(relations, &[i]);
                new_relations.push(Relation::new(remaining));
                new_relations.push(Relation::new(vec![v]));
                out.push(Model::new(new_relations, vl)?);
            }
        } else {
            let vars = r.variables();
            let n = vars.len();
            for mask in 1u32..(1u32 << (n - 1)) {
                let mut left = Vec::new();
                let mut right = Vec::new();
                for (bit, &v) in vars.iter().enumerate() {
                    if mask & (1 << bit) != 0 {
                        left.push(v);
                    } else {
                        right.push(v);
                    }
                }
                let mut new_relations = without(relations, &[i]);
                new_relations.push(Relation::new(left));
                new_relations.push(Relation::new(right));
                out.push(Model::new(new_relations, vl)?);
            }
        }
    }

    Ok(dedup_models(out))
}

fn filter_decomposable(models: Vec<Model>, vl: &VariableList) -> Result<Vec<Model>, RaError> {
    let mut out = Vec::with_capacity(models.len());
    for m in models {
        if !graph::has_loops(m.relations(), vl)? {
            out.push(m);
        }
    }
    Ok(out)
}

fn is_disjoint(model: &Model) -> bool {
    let relations = model.relations();
    for i in 0..relations.len() {
        for j in (i + 1)..relations.len() {
            if relations[i].overlaps(&relations[j]) {
                return false;
            }
        }
    }
    true
}

fn factorial_cap(n: usize) -> usize {
    (1..=n).try_fold(1usize, |acc, x| acc.checked_mul(x)).unwrap_or(usize::MAX)
}

fn permute(vars: &[usize], current: &mut Vec<usize>, used: &mut [bool], out: &mut Vec<Vec<usize>>, cap: usize) {
    if out.len() >= cap {
        return;
    }
    if current.len() == vars.len() {
        out.push(current.clone());
        return;
    }
    for (i, &v) in vars.iter().enumerate() {
        if used[i] {
            continue;
        }
        if out.len() >= cap {
            return;
        }
        used[i] = true;
        current.push(v);
        permute(vars, current, used, out, cap);
        current.pop();
        used[i] = false;
    }
}

/// Enumerate path-shaped (chain) models `V0V1:V1V2:...` over permutations of
/// the variable list, capped at `cap` permutations to stay bounded for
/// larger variable counts.
pub fn chain_models(vl: &VariableList, cap: usize) -> Result<Vec<Model>, RaError> {
    let vars: Vec<usize> = (0..vl.len()).collect();
    let mut permutations = Vec::new();
    permute(&vars, &mut Vec::new(), &mut vec![false; vars.len()], &mut permutations, cap);

    let mut models = Vec::new();
    for perm in permutations {
        if perm.len() < 2 {
            continue;
        }
        let relations: Vec<Relation> = perm.windows(2).map(|w| Relation::new(w.to_vec())).collect();
        models.push(Model::new(relations, vl)?);
    }
    Ok(dedup_models(models))
}

fn chain_neighbors(model: &Model, vl: &VariableList) -> Result<Vec<Model>, RaError> {
    let cap = 5040.min(factorial_cap(vl.len()));
    let all = chain_models(vl, cap)?;
    Ok(all
        .into_iter()
        .filter(|m| m.canonical_name() != model.canonical_name())
        .collect())
}

/// Enumerate models in the lattice up to `cap`, for small variable counts.
/// Candidate relations are every subset of size `1..=max_relation_size`;
/// models are built from combinations of up to three such candidates (after
/// subsumption pruning, larger combinations rarely reach a lattice position
/// that a 2- or 3-relation combination doesn't already cover). Each returned
/// model is labeled with its level: the sum of its relations' variable
/// counts.
pub fn lattice_enumeration(vl: &VariableList, max_relation_size: usize, cap: usize) -> Result<Vec<(usize, Model)>, RaError> {
    let n = vl.len();
    let max_relation_size = max_relation_size.min(n);
    let mut atoms: Vec<Vec<usize>> = Vec::new();
    for mask in 1u32..(1u32 << n) {
        let vars: Vec<usize> = (0..n).filter(|&i| mask & (1 << i) != 0).collect();
        if vars.len() <= max_relation_size {
            atoms.push(vars);
        }
    }

    let mut out = Vec::new();
    let mut seen = HashSet::new();
    'combo: for i in 0..atoms.len() {
        for j in i..atoms.len() {
            for k in j..atoms.len() {
                if out.len() >= cap {
                    break 'combo;
                }
                let mut relations = vec![Relation::new(atoms[i].clone())];
                if j != i {
                    relations.push(Relation::new(atoms[j].clone()));
                }
                if k != j {
                    relations.push(Relation::new(atoms[k].clone()));
                }
                let model = Model::new(relations, vl)?;
                if seen.insert(model.canonical_name().to_string()) {
                    let level = model.relations().iter().map(Relation::variable_count).sum();
                    out.push((level, model));
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::VariableSpec;

    fn binary_abc() -> VariableList {
        VariableList::new(vec![
            VariableSpec::new("A", 'A', 2),
            VariableSpec::new("B", 'B', 2),
            VariableSpec::new("C", 'C', 2),
        ])
        .unwrap()
    }

    fn directed_abz() -> VariableList {
        VariableList::new(vec![
            VariableSpec::new("A", 'A', 2),
            VariableSpec::new("B", 'B', 2),
            VariableSpec::new("Z", 'Z', 2).dependent(),
        ])
        .unwrap()
    }

    #[test]
    fn ascending_from_bottom_adds_a_variable_or_merges() {
        let vl = binary_abc();
        let bottom = Model::bottom(&vl).unwrap();
        let neighbors = SearchFilter::Full
            .neighbors(&bottom, &vl, Direction::Ascending)
            .unwrap();
        let names: HashSet<String> = neighbors.iter().map(|m| m.canonical_name().to_string()).collect();
        assert!(names.contains("AB:C"));
        assert!(names.contains("AC:B"));
        assert!(names.contains("A:BC"));
    }

    #[test]
    fn loopless_filter_excludes_the_triangle() {
        let vl = binary_abc();
        let ab_bc = Model::new(vec![Relation::new(vec![0, 1]), Relation::new(vec![1, 2])], &vl).unwrap();
        let neighbors = SearchFilter::Loopless
            .neighbors(&ab_bc, &vl, Direction::Ascending)
            .unwrap();
        assert!(neighbors.iter().all(|m| !graph::has_loops(m.relations(), &vl).unwrap()));
        assert!(!neighbors.iter().any(|m| m.canonical_name() == "AB:BC:AC"));
    }

    #[test]
    fn full_filter_includes_the_triangle() {
        let vl = binary_abc();
        let ab_bc = Model::new(vec![Relation::new(vec![0, 1]), Relation::new(vec![1, 2])], &vl).unwrap();
        let neighbors = SearchFilter::Full.neighbors(&ab_bc, &vl, Direction::Ascending).unwrap();
        assert!(neighbors.iter().any(|m| m.canonical_name() == "AB:BC:AC"));
    }

    #[test]
    fn disjoint_filter_rejects_overlapping_relations() {
        let vl = binary_abc();
        let bottom = Model::bottom(&vl).unwrap();
        let neighbors = SearchFilter::Disjoint
            .neighbors(&bottom, &vl, Direction::Ascending)
            .unwrap();
        for m in &neighbors {
            assert!(is_disjoint(m));
        }
        // A:B:C -> AB:C overlaps nothing else, so it remains disjoint.
        assert!(neighbors.iter().any(|m| m.canonical_name() == "AB:C"));
    }

    #[test]
    fn descending_from_saturated_splits_the_one_relation() {
        let vl = binary_abc();
        let top = Model::top(&vl).unwrap();
        let neighbors = SearchFilter::Full.neighbors(&top, &vl, Direction::Descending).unwrap();
        assert!(!neighbors.is_empty());
        for m in &neighbors {
            assert_eq!(m.relations().len(), 2);
        }
    }

    #[test]
    fn directed_ascending_never_touches_the_iv_only_relation() {
        let vl = directed_abz();
        let bottom = Model::bottom(&vl).unwrap();
        assert_eq!(bottom.canonical_name(), "AB:Z");
        let neighbors = SearchFilter::Full
            .neighbors(&bottom, &vl, Direction::Ascending)
            .unwrap();
        let names: HashSet<String> = neighbors.iter().map(|m| m.canonical_name().to_string()).collect();
        assert!(names.contains("AB:AZ"));
        assert!(names.contains("AB:BZ"));
        assert!(names.contains("ABZ"));
        // The IV-only relation AB is never split, and no neighbor grows it
        // without also involving Z.
        assert!(!names.iter().any(|n| n == "A:BZ" || n == "AB:A:B"));
    }

    #[test]
    fn directed_descending_only_removes_ivs_from_predictive_relations() {
        let vl = directed_abz();
        let saturated = Model::new(vec![Relation::new(vec![0, 1, 2])], &vl).unwrap();
        let neighbors = SearchFilter::Full
            .neighbors(&saturated, &vl, Direction::Descending)
            .unwrap();
        for m in &neighbors {
            let z = vl.index_of_abbreviation('Z').unwrap();
            assert!(m.relations().iter().any(|r| r.variables().contains(&z)));
        }
    }

    #[test]
    fn chain_models_are_all_two_variable_paths() {
        let vl = binary_abc();
        let chains = chain_models(&vl, 100).unwrap();
        assert!(!chains.is_empty());
        for m in &chains {
            assert!(m.relations().iter().all(|r| r.variable_count() == 2));
        }
    }

    #[test]
    fn lattice_enumeration_is_bounded_by_cap() {
        let vl = binary_abc();
        let lattice = lattice_enumeration(&vl, 3, 10).unwrap();
        assert!(lattice.len() <= 10);
        assert!(lattice.iter().any(|(_, m)| m.canonical_name() == "ABC"));
    }

    #[test]
    fn neighbors_are_duplicate_free() {
        let vl = binary_abc();
        let bottom = Model::bottom(&vl).unwrap();
        let neighbors = SearchFilter::Full.neighbors(&bottom, &vl, Direction::Ascending).unwrap();
        let mut names: Vec<&str> = neighbors.iter().map(Model::canonical_name).collect();
        let before = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), before);
    }
}
