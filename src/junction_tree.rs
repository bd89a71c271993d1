//! Junction tree construction and traversal (C5).

use std::collections::{HashSet, VecDeque};

use crate::error::JunctionTreeError;
use crate::graph::Graph;
use crate::model::Model;
use crate::relation::Relation;
use crate::variable::VariableList;

/// A tree of maximal cliques over a decomposable model, with separators
/// carrying the intersection variables of each tree edge.
#[derive(Debug, Clone)]
pub struct JunctionTree {
    cliques: Vec<Relation>,
    /// `separators[e]` is the separator relation for `edges[e]`.
    edges: Vec<(usize, usize)>,
    separators: Vec<Relation>,
    parent: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    root: usize,
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        UnionFind {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        self.parent[ra] = rb;
        true
    }
}

impl JunctionTree {
    /// Build a junction tree for `model`'s relations. Fails with
    /// [`JunctionTreeError::EmptyModel`] for a model with no relations,
    /// [`JunctionTreeError::NotDecomposable`] if the model's primal graph
    /// is not chordal or its cliques escape the model's relations, and
    /// [`JunctionTreeError::RipViolation`] if the spanning tree built from
    /// the cliques fails the running intersection property.
    pub fn build(model: &Model, _vl: &VariableList) -> Result<Self, JunctionTreeError> {
        let relations = model.relations();
        if relations.is_empty() {
            return Err(JunctionTreeError::EmptyModel);
        }

        let graph = Graph::from_relations(relations);
        let peo = graph.peo();
        if !graph.verify_peo(&peo) {
            return Err(JunctionTreeError::NotDecomposable(
                "primal graph is not chordal".into(),
            ));
        }

        let cliques = graph.maximal_cliques(&peo);
        for clique in &cliques {
            if !relations.iter().any(|r| clique.is_subset_of(r)) {
                return Err(JunctionTreeError::NotDecomposable(
                    "a maximal clique is not covered by any relation".into(),
                ));
            }
        }

        if cliques.len() == 1 {
            return Ok(JunctionTree {
                cliques,
                edges: Vec::new(),
                separators: Vec::new(),
                parent: vec![None],
                children: vec![Vec::new()],
                root: 0,
            });
        }

        let mut weighted_edges: Vec<(usize, usize, usize)> = Vec::new();
        for i in 0..cliques.len() {
            for j in (i + 1)..cliques.len() {
                let sep = cliques[i].intersection(&cliques[j]);
                if sep.variable_count() > 0 {
                    weighted_edges.push((i, j, sep.variable_count()));
                }
            }
        }
        // Maximum-weight spanning tree via Kruskal: sort by descending
        // weight, tie-break by ascending (i, j) for determinism.
        weighted_edges.sort_by(|a, b| b.2.cmp(&a.2).then((a.0, a.1).cmp(&(b.0, b.1))));

        let mut uf = UnionFind::new(cliques.len());
        let mut edges = Vec::new();
        let mut separators = Vec::new();
        for (i, j, _w) in weighted_edges {
            if uf.union(i, j) {
                separators.push(cliques[i].intersection(&cliques[j]));
                edges.push((i, j));
            }
        }

        if edges.len() != cliques.len() - 1 {
            return Err(JunctionTreeError::NotDecomposable(
                "clique intersection graph is disconnected".into(),
            ));
        }

        let mut adjacency: Vec<Vec<(usize, usize)>> = vec![Vec::new(); cliques.len()];
        for (e, &(i, j)) in edges.iter().enumerate() {
            adjacency[i].push((j, e));
            adjacency[j].push((i, e));
        }

        let root = 0;
        let mut parent: Vec<Option<usize>> = vec![None; cliques.len()];
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); cliques.len()];
        let mut visited = vec![false; cliques.len()];
        let mut queue = VecDeque::new();
        queue.push_back(root);
        visited[root] = true;
        while let Some(node) = queue.pop_front() {
            for &(neighbor, _e) in &adjacency[node] {
                if !visited[neighbor] {
                    visited[neighbor] = true;
                    parent[neighbor] = Some(node);
                    children[node].push(neighbor);
                    queue.push_back(neighbor);
                }
            }
        }

        let tree = JunctionTree {
            cliques,
            edges,
            separators,
            parent,
            children,
            root,
        };
        tree.verify_rip()?;
        Ok(tree)
    }

    /// The tree's cliques, indexed as built.
    pub fn cliques(&self) -> &[Relation] {
        &self.cliques
    }

    /// Tree edges as `(clique_a, clique_b)` index pairs.
    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    /// Separator relation for each edge, aligned with [`JunctionTree::edges`].
    pub fn separators(&self) -> &[Relation] {
        &self.separators
    }

    /// Parent clique index of each clique (`None` for the root).
    pub fn parent(&self, clique: usize) -> Option<usize> {
        self.parent[clique]
    }

    /// Child clique indices of each clique.
    pub fn children(&self, clique: usize) -> &[usize] {
        &self.children[clique]
    }

    /// The root clique index (always 0 by construction).
    pub fn root(&self) -> usize {
        self.root
    }

    /// Separator relation for the edge between a clique and its parent, if
    /// any.
    pub fn separator_to_parent(&self, clique: usize) -> Option<&Relation> {
        let parent = self.parent[clique]?;
        self.edges
            .iter()
            .position(|&(a, b)| (a == clique && b == parent) || (a == parent && b == clique))
            .map(|e| &self.separators[e])
    }

    /// Post-order traversal (children before parents), used for the BP
    /// collect phase.
    pub fn post_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.cliques.len());
        self.post_order_from(self.root, &mut order);
        order
    }

    fn post_order_from(&self, node: usize, order: &mut Vec<usize>) {
        for &child in &self.children[node] {
            self.post_order_from(child, order);
        }
        order.push(node);
    }

    /// Pre-order traversal (parents before children), used for the BP
    /// distribute phase.
    pub fn pre_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.cliques.len());
        let mut queue = VecDeque::new();
        queue.push_back(self.root);
        while let Some(node) = queue.pop_front() {
            order.push(node);
            for &child in &self.children[node] {
                queue.push_back(child);
            }
        }
        order
    }

    fn verify_rip(&self) -> Result<(), JunctionTreeError> {
        let mut variables: HashSet<usize> = HashSet::new();
        for clique in &self.cliques {
            variables.extend(clique.variables());
        }

        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); self.cliques.len()];
        for &(i, j) in &self.edges {
            adjacency[i].push(j);
            adjacency[j].push(i);
        }

        for &v in &variables {
            let containing: HashSet<usize> = (0..self.cliques.len())
                .filter(|&c| self.cliques[c].variables().contains(&v))
                .collect();
            if containing.is_empty() {
                continue;
            }
            let start = *containing.iter().min().unwrap();
            let mut visited = HashSet::new();
            let mut queue = VecDeque::new();
            queue.push_back(start);
            visited.insert(start);
            while let Some(node) = queue.pop_front() {
                for &neighbor in &adjacency[node] {
                    if containing.contains(&neighbor) && !visited.contains(&neighbor) {
                        visited.insert(neighbor);
                        queue.push_back(neighbor);
                    }
                }
            }
            if visited.len() != containing.len() {
                return Err(JunctionTreeError::RipViolation { variable: v });
            }
        }
        Ok(())
    }
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

    #[test]
    fn chordal_chain_builds_a_two_clique_tree() {
        let vl = binary_abc();
        let model = Model::new(
            vec![Relation::new(vec![0, 1]), Relation::new(vec![1, 2])],
            &vl,
        )
        .unwrap();
        let jt = JunctionTree::build(&model, &vl).unwrap();
        assert_eq!(jt.cliques().len(), 2);
        assert_eq!(jt.edges().len(), 1);
        assert_eq!(jt.separators()[0].variables(), &[1]);
    }

    #[test]
    fn post_order_places_children_before_parents() {
        let vl = binary_abc();
        let model = Model::new(
            vec![Relation::new(vec![0, 1]), Relation::new(vec![1, 2])],
            &vl,
        )
        .unwrap();
        let jt = JunctionTree::build(&model, &vl).unwrap();
        let post = jt.post_order();
        let root_pos = post.iter().position(|&c| c == jt.root()).unwrap();
        assert_eq!(root_pos, post.len() - 1);
    }

    #[test]
    fn pre_order_places_parents_before_children() {
        let vl = binary_abc();
        let model = Model::new(
            vec![Relation::new(vec![0, 1]), Relation::new(vec![1, 2])],
            &vl,
        )
        .unwrap();
        let jt = JunctionTree::build(&model, &vl).unwrap();
        let pre = jt.pre_order();
        assert_eq!(pre[0], jt.root());
    }

    #[test]
    fn saturated_model_single_clique_has_no_edges() {
        let vl = binary_abc();
        let model = Model::top(&vl).unwrap();
        let jt = JunctionTree::build(&model, &vl).unwrap();
        assert_eq!(jt.cliques().len(), 1);
        assert!(jt.edges().is_empty());
    }

    #[test]
    fn triangle_loop_model_is_not_decomposable() {
        let vl = binary_abc();
        let model = Model::new(
            vec![
                Relation::new(vec![0, 1]),
                Relation::new(vec![1, 2]),
                Relation::new(vec![0, 2]),
            ],
            &vl,
        )
        .unwrap();
        assert!(matches!(
            JunctionTree::build(&model, &vl),
            Err(JunctionTreeError::NotDecomposable(_))
        ));
    }

    #[test]
    fn empty_model_is_rejected() {
        let vl = binary_abc();
        let model = Model::new(vec![], &vl).unwrap();
        assert!(matches!(
            JunctionTree::build(&model, &vl),
            Err(JunctionTreeError::EmptyModel)
        ));
    }
}
