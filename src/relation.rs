//! Relations: variable subsets with set algebra and cardinality (C3).

use std::cell::RefCell;
use std::hash::{Hash, Hasher};

use crate::error::RaError;
use crate::table::ContingencyTable;
use crate::variable::VariableList;

/// An ordered, canonicalized (ascending, deduplicated) subset of variable
/// indices.
///
/// Equality, ordering and hashing all key off the canonical `variables`
/// vector; the marginal-projection cache is interior-mutable scratch space
/// and never participates in comparisons.
#[derive(Debug, Clone)]
pub struct Relation {
    variables: Vec<usize>,
    marginal_cache: RefCell<Option<ContingencyTable>>,
}

impl Relation {
    /// Canonicalize `variables` (sort ascending, drop duplicates) into a
    /// relation.
    pub fn new(variables: Vec<usize>) -> Self {
        let mut vars = variables;
        vars.sort_unstable();
        vars.dedup();
        Relation {
            variables: vars,
            marginal_cache: RefCell::new(None),
        }
    }

    /// The canonical, ascending variable indices.
    pub fn variables(&self) -> &[usize] {
        &self.variables
    }

    /// Number of member variables.
    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    /// NC: the number of distinct states (product of member cardinalities).
    pub fn nc(&self, vl: &VariableList) -> Result<u64, RaError> {
        let mut nc = 1u64;
        for &v in &self.variables {
            nc *= u64::from(vl.variable(v)?.cardinality());
        }
        Ok(nc)
    }

    /// Degrees of freedom: `NC - 1`.
    pub fn df(&self, vl: &VariableList) -> Result<u64, RaError> {
        Ok(self.nc(vl)?.saturating_sub(1))
    }

    /// Whether `self` is a subset of `other`.
    pub fn is_subset_of(&self, other: &Relation) -> bool {
        self.variables.iter().all(|v| other.variables.binary_search(v).is_ok())
    }

    /// Whether `self` and `other` share at least one variable.
    pub fn overlaps(&self, other: &Relation) -> bool {
        !self.intersection(other).variables.is_empty()
    }

    /// Variables present in either relation.
    pub fn union(&self, other: &Relation) -> Relation {
        let mut vars = self.variables.clone();
        vars.extend_from_slice(&other.variables);
        Relation::new(vars)
    }

    /// Variables present in both relations.
    pub fn intersection(&self, other: &Relation) -> Relation {
        let vars: Vec<usize> = self
            .variables
            .iter()
            .copied()
            .filter(|v| other.variables.binary_search(v).is_ok())
            .collect();
        Relation {
            variables: vars,
            marginal_cache: RefCell::new(None),
        }
    }

    /// Variables in `self` but not in `other`.
    pub fn difference(&self, other: &Relation) -> Relation {
        let vars: Vec<usize> = self
            .variables
            .iter()
            .copied()
            .filter(|v| other.variables.binary_search(v).is_err())
            .collect();
        Relation {
            variables: vars,
            marginal_cache: RefCell::new(None),
        }
    }

    /// Concatenation of member abbreviations in canonical (ascending) order.
    pub fn print_name(&self, vl: &VariableList) -> Result<String, RaError> {
        let mut name = String::with_capacity(self.variables.len());
        for &v in &self.variables {
            name.push(vl.variable(v)?.abbreviation());
        }
        Ok(name)
    }

    /// The observed table projected onto this relation's variables,
    /// computing and caching it on first use.
    pub fn marginal(&self, vl: &VariableList, table: &ContingencyTable) -> Result<ContingencyTable, RaError> {
        if let Some(cached) = self.marginal_cache.borrow().as_ref() {
            return Ok(cached.clone());
        }
        let projected = table.project(vl, &self.variables)?;
        *self.marginal_cache.borrow_mut() = Some(projected.clone());
        Ok(projected)
    }

    /// Drop any cached marginal projection (e.g. after the backing table
    /// changes identity).
    pub fn clear_cache(&self) {
        *self.marginal_cache.borrow_mut() = None;
    }
}

impl PartialEq for Relation {
    fn eq(&self, other: &Self) -> bool {
        self.variables == other.variables
    }
}

impl Eq for Relation {}

impl Hash for Relation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.variables.hash(state);
    }
}

impl PartialOrd for Relation {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Relation {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.variables.cmp(&other.variables)
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
            VariableSpec::new("C", 'C', 3),
        ])
        .unwrap()
    }

    #[test]
    fn new_canonicalizes_order_and_dedups() {
        let r = Relation::new(vec![2, 0, 1, 0]);
        assert_eq!(r.variables(), &[0, 1, 2]);
    }

    #[test]
    fn nc_and_df_use_cardinalities() {
        let vl = binary_abc();
        let r = Relation::new(vec![0, 2]); // A (card 2) x C (card 3)
        assert_eq!(r.nc(&vl).unwrap(), 6);
        assert_eq!(r.df(&vl).unwrap(), 5);
    }

    #[test]
    fn subset_overlap_union_intersection_difference() {
        let ab = Relation::new(vec![0, 1]);
        let bc = Relation::new(vec![1, 2]);
        let abc = Relation::new(vec![0, 1, 2]);

        assert!(ab.is_subset_of(&abc));
        assert!(!ab.is_subset_of(&bc));
        assert!(ab.overlaps(&bc));
        assert_eq!(ab.union(&bc), abc);
        assert_eq!(ab.intersection(&bc), Relation::new(vec![1]));
        assert_eq!(ab.difference(&bc), Relation::new(vec![0]));
    }

    #[test]
    fn print_name_concatenates_abbreviations_in_canonical_order() {
        let vl = binary_abc();
        let r = Relation::new(vec![1, 0]);
        assert_eq!(r.print_name(&vl).unwrap(), "AB");
    }

    #[test]
    fn equality_and_hash_use_canonical_form_only() {
        use std::collections::HashSet;
        let r1 = Relation::new(vec![0, 1]);
        let r2 = Relation::new(vec![1, 0]);
        assert_eq!(r1, r2);
        let mut set = HashSet::new();
        set.insert(r1);
        assert!(set.contains(&r2));
    }
}
