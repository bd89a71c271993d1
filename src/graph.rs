//! Primal graph, chordality and loop detection (C4).

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{GraphError, RaError};
use crate::relation::Relation;
use crate::variable::VariableList;

/// The primal graph of a set of relations: one vertex per participating
/// variable, an edge between every pair that co-appear in some relation.
#[derive(Debug, Clone)]
pub struct Graph {
    vertices: Vec<usize>,
    adjacency: HashMap<usize, BTreeSet<usize>>,
}

impl Graph {
    /// Build the primal graph of `relations`.
    pub fn from_relations(relations: &[Relation]) -> Self {
        let mut adjacency: HashMap<usize, BTreeSet<usize>> = HashMap::new();
        for relation in relations {
            let vars = relation.variables();
            for &v in vars {
                adjacency.entry(v).or_default();
            }
            for i in 0..vars.len() {
                for j in (i + 1)..vars.len() {
                    adjacency.entry(vars[i]).or_default().insert(vars[j]);
                    adjacency.entry(vars[j]).or_default().insert(vars[i]);
                }
            }
        }
        let mut vertices: Vec<usize> = adjacency.keys().copied().collect();
        vertices.sort_unstable();
        Graph { vertices, adjacency }
    }

    /// All vertices (variable indices), ascending.
    pub fn vertices(&self) -> &[usize] {
        &self.vertices
    }

    /// Neighbors of `v`, ascending, or an error if `v` is not a vertex.
    pub fn neighbors(&self, v: usize) -> Result<&BTreeSet<usize>, GraphError> {
        self.adjacency.get(&v).ok_or(GraphError::VertexOutOfRange(v))
    }

    fn neighbors_unchecked(&self, v: usize) -> &BTreeSet<usize> {
        static EMPTY: BTreeSet<usize> = BTreeSet::new();
        self.adjacency.get(&v).unwrap_or(&EMPTY)
    }

    /// Maximum Cardinality Search visit order. Ties (equal weight) break by
    /// lowest vertex index, so the order is deterministic.
    pub fn mcs_order(&self) -> Vec<usize> {
        let n = self.vertices.len();
        let mut weight: HashMap<usize, u32> = self.vertices.iter().map(|&v| (v, 0)).collect();
        let mut visited: HashSet<usize> = HashSet::with_capacity(n);
        let mut order = Vec::with_capacity(n);

        for _ in 0..n {
            let next = self
                .vertices
                .iter()
                .filter(|v| !visited.contains(v))
                .max_by_key(|v| (weight[v], std::cmp::Reverse(**v)))
                .copied();
            let Some(v) = next else { break };
            visited.insert(v);
            order.push(v);
            for &nb in self.neighbors_unchecked(v) {
                if !visited.contains(&nb) {
                    *weight.get_mut(&nb).unwrap() += 1;
                }
            }
        }
        order
    }

    /// Perfect elimination ordering: the reverse of the MCS visit order.
    pub fn peo(&self) -> Vec<usize> {
        let mut order = self.mcs_order();
        order.reverse();
        order
    }

    /// Verifies that `peo` is in fact a perfect elimination ordering: for
    /// each vertex, among its neighbors positioned later in `peo`, the
    /// earliest one must be adjacent to all the others. Passing for every
    /// vertex means the graph is chordal.
    pub fn verify_peo(&self, peo: &[usize]) -> bool {
        let position: HashMap<usize, usize> =
            peo.iter().enumerate().map(|(i, &v)| (v, i)).collect();

        for (i, &v) in peo.iter().enumerate() {
            let mut later: Vec<usize> = self
                .neighbors_unchecked(v)
                .iter()
                .copied()
                .filter(|nb| position[nb] > i)
                .collect();
            if later.len() < 2 {
                continue;
            }
            later.sort_by_key(|nb| position[nb]);
            let earliest = later[0];
            let earliest_neighbors = self.neighbors_unchecked(earliest);
            for &other in &later[1..] {
                if !earliest_neighbors.contains(&other) {
                    return false;
                }
            }
        }
        true
    }

    /// Whether the graph is chordal (computes a fresh PEO and verifies it).
    pub fn is_chordal(&self) -> bool {
        self.verify_peo(&self.peo())
    }

    /// Maximal cliques of a chordal graph, derived from `peo`: for each
    /// vertex, the candidate clique is itself plus its neighbors positioned
    /// later in `peo`; candidates subsumed by another candidate are dropped.
    pub fn maximal_cliques(&self, peo: &[usize]) -> Vec<Relation> {
        let position: HashMap<usize, usize> =
            peo.iter().enumerate().map(|(i, &v)| (v, i)).collect();

        let candidates: Vec<Relation> = peo
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let mut members = vec![v];
                members.extend(
                    self.neighbors_unchecked(v)
                        .iter()
                        .copied()
                        .filter(|nb| position[nb] > i),
                );
                Relation::new(members)
            })
            .collect();

        prune_subsumed(candidates)
    }
}

fn prune_subsumed(candidates: Vec<Relation>) -> Vec<Relation> {
    let mut kept: Vec<Relation> = Vec::with_capacity(candidates.len());
    'outer: for candidate in candidates {
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
    kept
}

/// Whether `relations` (as would-be members of a model) have loops: true
/// iff one relation is a subset of another, the primal graph is
/// non-chordal, or some maximal clique of the primal graph is not a subset
/// of any member relation. A model constructed via
/// [`crate::model::Model::new`] already prunes subset relations, so only
/// the chordality and clique-coverage checks can fire on a real model —
/// the subset check remains here so the contract holds for raw relation
/// lists too.
pub fn has_loops(relations: &[Relation], _vl: &VariableList) -> Result<bool, RaError> {
    for i in 0..relations.len() {
        for j in 0..relations.len() {
            if i != j && relations[i].is_subset_of(&relations[j]) {
                return Ok(true);
            }
        }
    }

    let graph = Graph::from_relations(relations);
    let peo = graph.peo();
    if !graph.verify_peo(&peo) {
        return Ok(true);
    }

    let cliques = graph.maximal_cliques(&peo);
    for clique in &cliques {
        if !relations.iter().any(|r| clique.is_subset_of(r)) {
            return Ok(true);
        }
    }

    Ok(false)
}
