//! Sparse sorted contingency tables and projection (C2).
//!
//! A [`ContingencyTable`] is a sorted vector of [`Tuple`]s. Projection is the
//! dominant hot path (spec §4.2's performance contract), so
//! [`ContingencyTable::project`] is a single pass building projected keys
//! followed by a sort + merge, with no intermediate hashing.

use crate::error::RaError;
use crate::key::Key;
use crate::variable::VariableList;

/// One `(key, value)` entry. `value` is a count or, after normalization, a
/// probability.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    pub key: Key,
    pub value: f64,
}

/// A sparse, sortable table of `(Key, f64)` entries.
#[derive(Debug, Clone)]
pub struct ContingencyTable {
    key_size: usize,
    entries: Vec<Tuple>,
    sorted: bool,
    merged: bool,
}

impl ContingencyTable {
    /// An empty table over keys of the given segment count.
    pub fn new(key_size: usize) -> Self {
        ContingencyTable {
            key_size,
            entries: Vec::new(),
            sorted: true,
            merged: true,
        }
    }

    /// Build directly from entries (e.g. a loader). Marks the table as
    /// unsorted/unmerged; call [`ContingencyTable::sort`] and
    /// [`ContingencyTable::merge`] before using [`ContingencyTable::find`].
    pub fn from_entries(key_size: usize, entries: Vec<Tuple>) -> Self {
        ContingencyTable {
            key_size,
            entries,
            sorted: false,
            merged: false,
        }
    }

    /// Number of segments each key holds.
    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// Number of sparse entries currently stored (before or after merge).
    pub fn state_count(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is currently empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, in current (possibly unsorted) order.
    pub fn entries(&self) -> &[Tuple] {
        &self.entries
    }

    /// Whether keys are currently known to strictly or non-strictly ascend
    /// (true immediately after [`ContingencyTable::sort`], false after any
    /// further [`ContingencyTable::add`]).
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Whether duplicate keys are known to have been collapsed.
    pub fn is_merged(&self) -> bool {
        self.merged
    }

    /// Append an entry, marking the table unsorted/unmerged.
    pub fn add(&mut self, key: Key, value: f64) -> Result<(), RaError> {
        if key.key_size() != self.key_size {
            return Err(RaError::InvalidKey(format!(
                "key has {} segments, table needs {}",
                key.key_size(),
                self.key_size
            )));
        }
        self.entries.push(Tuple { key, value });
        self.sorted = false;
        self.merged = false;
        Ok(())
    }

    /// Sort entries by key, re-establishing ascending order. Duplicate keys
    /// may remain adjacent until [`ContingencyTable::merge`].
    pub fn sort(&mut self) {
        self.entries.sort_by(|a, b| a.key.cmp(&b.key));
        self.sorted = true;
    }

    /// Collapse consecutive equal keys by summing their values. Requires the
    /// table to already be sorted.
    pub fn merge(&mut self) -> Result<(), RaError> {
        if !self.sorted {
            return Err(RaError::Computation(
                "merge requires a sorted table".into(),
            ));
        }
        if self.entries.is_empty() {
            self.merged = true;
            return Ok(());
        }
        let mut merged: Vec<Tuple> = Vec::with_capacity(self.entries.len());
        for tuple in self.entries.drain(..) {
            match merged.last_mut() {
                Some(last) if last.key == tuple.key => {
                    last.value += tuple.value;
                }
                _ => merged.push(tuple),
            }
        }
        self.entries = merged;
        self.merged = true;
        Ok(())
    }

    /// Total mass stored in the table.
    pub fn sum(&self) -> f64 {
        self.entries.iter().map(|t| t.value).sum()
    }

    /// Divide every value by [`ContingencyTable::sum`]. A no-op when the
    /// sum is not strictly positive.
    pub fn normalize(&mut self) {
        let total = self.sum();
        if total <= 0.0 {
            return;
        }
        for tuple in &mut self.entries {
            tuple.value /= total;
        }
    }

    /// Binary search for an exact key match. Requires the table to be
    /// sorted.
    pub fn find(&self, key: &Key) -> Result<Option<usize>, RaError> {
        if !self.sorted {
            return Err(RaError::Computation("find requires a sorted table".into()));
        }
        Ok(self
            .entries
            .binary_search_by(|t| t.key.cmp(key))
            .ok())
    }

    /// Value stored for an exact key match, or `0.0` if absent. Requires the
    /// table to be sorted.
    pub fn value_at(&self, key: &Key) -> Result<f64, RaError> {
        Ok(self
            .find(key)?
            .map(|i| self.entries[i].value)
            .unwrap_or(0.0))
    }

    /// Project onto `subset`: every key has its non-`subset` bits forced to
    /// don't-care, then duplicate keys are summed. The result is always
    /// sorted and merged.
    pub fn project(&self, vl: &VariableList, subset: &[usize]) -> Result<ContingencyTable, RaError> {
        let mask = vl.build_mask(subset)?;
        let mut projected = Vec::with_capacity(self.entries.len());
        for tuple in &self.entries {
            let key = tuple.key.or(&mask)?;
            projected.push(Tuple {
                key,
                value: tuple.value,
            });
        }
        let mut table = ContingencyTable {
            key_size: self.key_size,
            entries: projected,
            sorted: false,
            merged: false,
        };
        table.sort();
        table.merge()?;
        Ok(table)
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

    fn uniform_table(vl: &VariableList) -> ContingencyTable {
        let mut t = ContingencyTable::new(vl.key_size());
        let a = vl.index_of_abbreviation('A').unwrap();
        let b = vl.index_of_abbreviation('B').unwrap();
        let c = vl.index_of_abbreviation('C').unwrap();
        for av in 0..2u32 {
            for bv in 0..2u32 {
                for cv in 0..2u32 {
                    let key = vl.build_key(&[(a, av), (b, bv), (c, cv)]).unwrap();
                    t.add(key, 100.0).unwrap();
                }
            }
        }
        t
    }

    #[test]
    fn sort_then_merge_yields_strictly_ascending_keys() {
        let vl = binary_abc();
        let mut t = uniform_table(&vl);
        t.sort();
        t.merge().unwrap();
        let keys: Vec<_> = t.entries().iter().map(|e| e.key.clone()).collect();
        for w in keys.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn merge_collapses_duplicate_keys_additively() {
        let vl = binary_abc();
        let a = vl.index_of_abbreviation('A').unwrap();
        let key = vl.build_key(&[(a, 0)]).unwrap();
        let mut t = ContingencyTable::new(vl.key_size());
        t.add(key.clone(), 3.0).unwrap();
        t.add(key.clone(), 4.0).unwrap();
        t.sort();
        t.merge().unwrap();
        assert_eq!(t.state_count(), 1);
        assert_eq!(t.entries()[0].value, 7.0);
    }

    #[test]
    fn find_requires_sorted_table() {
        let vl = binary_abc();
        let t = uniform_table(&vl);
        let a = vl.index_of_abbreviation('A').unwrap();
        let key = vl.build_key(&[(a, 0)]).unwrap();
        assert!(t.find(&key).is_err());
    }

    #[test]
    fn normalize_divides_by_sum_and_is_idempotent() {
        let vl = binary_abc();
        let mut t = uniform_table(&vl);
        t.normalize();
        assert!((t.sum() - 1.0).abs() < 1e-9);
        let sum_before = t.sum();
        t.normalize();
        assert!((t.sum() - sum_before).abs() < 1e-12);
    }

    #[test]
    fn normalize_is_noop_on_nonpositive_sum() {
        let vl = binary_abc();
        let mut t = ContingencyTable::new(vl.key_size());
        let a = vl.index_of_abbreviation('A').unwrap();
        t.add(vl.build_key(&[(a, 0)]).unwrap(), 0.0).unwrap();
        t.normalize();
        assert_eq!(t.sum(), 0.0);
    }

    #[test]
    fn project_preserves_total_mass() {
        let vl = binary_abc();
        let t = uniform_table(&vl);
        let a = vl.index_of_abbreviation('A').unwrap();
        let b = vl.index_of_abbreviation('B').unwrap();
        let projected = t.project(&vl, &[a, b]).unwrap();
        assert!((projected.sum() - t.sum()).abs() < 1e-9);
        assert!(projected.is_sorted());
        assert!(projected.is_merged());
    }

    #[test]
    fn projection_is_idempotent() {
        let vl = binary_abc();
        let t = uniform_table(&vl);
        let a = vl.index_of_abbreviation('A').unwrap();
        let once = t.project(&vl, &[a]).unwrap();
        let twice = once.project(&vl, &[a]).unwrap();
        assert_eq!(once.entries(), twice.entries());
    }

    #[test]
    fn project_collapses_to_four_cells_over_two_variables() {
        let vl = binary_abc();
        let t = uniform_table(&vl);
        let a = vl.index_of_abbreviation('A').unwrap();
        let b = vl.index_of_abbreviation('B').unwrap();
        let projected = t.project(&vl, &[a, b]).unwrap();
        assert_eq!(projected.state_count(), 4);
        for tuple in projected.entries() {
            assert_eq!(tuple.value, 200.0);
        }
    }
}
