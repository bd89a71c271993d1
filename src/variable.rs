//! Variable registration and bit-packed layout (C1).
//!
//! A [`VariableList`] is the single source of truth for how variables are
//! packed into [`Key`] segments. It owns both a name/abbreviation index (the
//! dual-map interning idiom the teacher uses for its catalog: one map for
//! lookup by name, one for the typed/packed form) and the per-variable bit
//! layout that `Key` itself stays ignorant of.

use std::collections::HashMap;

use crate::error::RaError;
use crate::key::{Key, Segment};

/// Number of usable bits in one [`Segment`].
const SEGMENT_BITS: u32 = Segment::BITS;

/// A single registered variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    index: usize,
    name: String,
    abbreviation: char,
    cardinality: u32,
    is_dependent: bool,
    value_labels: Option<Vec<String>>,
    segment: usize,
    shift: u32,
    bits: u32,
}

impl Variable {
    /// Zero-based index assigned at registration.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Single-token abbreviation used in model notation.
    pub fn abbreviation(&self) -> char {
        self.abbreviation
    }

    /// Number of possible values (≥ 2).
    pub fn cardinality(&self) -> u32 {
        self.cardinality
    }

    /// Whether this is a dependent variable (DV) in a directed system.
    pub fn is_dependent(&self) -> bool {
        self.is_dependent
    }

    /// Optional human-readable labels for each value, `0..cardinality`.
    pub fn value_labels(&self) -> Option<&[String]> {
        self.value_labels.as_deref()
    }

    /// Segment (word index) this variable is packed into.
    pub fn segment(&self) -> usize {
        self.segment
    }

    /// Bit offset within its segment.
    pub fn shift(&self) -> u32 {
        self.shift
    }

    /// Bit width of this variable's field, including the reserved
    /// don't-care code point.
    pub fn bits(&self) -> u32 {
        self.bits
    }

    fn field_mask(&self) -> Segment {
        field_mask_for(self.bits)
    }

    /// The reserved "don't care" sentinel value for this variable's field.
    pub fn wildcard_value(&self) -> Segment {
        self.field_mask()
    }
}

fn field_mask_for(bits: u32) -> Segment {
    if bits >= SEGMENT_BITS {
        Segment::MAX
    } else {
        (1 << bits) - 1
    }
}

fn bits_for_cardinality(cardinality: u32) -> u32 {
    // ceil(log2(cardinality + 1)): one extra code point reserved for
    // don't-care.
    let n = cardinality + 1;
    SEGMENT_BITS - (n - 1).leading_zeros()
}

/// A pending registration, used by [`VariableList::builder`].
pub struct VariableSpec {
    pub name: String,
    pub abbreviation: char,
    pub cardinality: u32,
    pub is_dependent: bool,
    pub value_labels: Option<Vec<String>>,
}

impl VariableSpec {
    /// A plain independent variable with no value labels.
    pub fn new(name: impl Into<String>, abbreviation: char, cardinality: u32) -> Self {
        VariableSpec {
            name: name.into(),
            abbreviation,
            cardinality,
            is_dependent: false,
            value_labels: None,
        }
    }

    /// Mark this variable as the (or a) dependent variable.
    pub fn dependent(mut self) -> Self {
        self.is_dependent = true;
        self
    }

    /// Attach value labels.
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.value_labels = Some(labels);
        self
    }
}

/// Ordered registry of variables with their packed bit layout.
#[derive(Debug, Clone)]
pub struct VariableList {
    variables: Vec<Variable>,
    abbreviation_index: HashMap<char, usize>,
    key_size: usize,
}

impl VariableList {
    /// Register variables from specs, in order, assigning the packed layout
    /// left-to-right across segments.
    pub fn new(specs: Vec<VariableSpec>) -> Result<Self, RaError> {
        if specs.is_empty() {
            return Err(RaError::Validation("variable list must not be empty".into()));
        }

        let mut abbreviation_index = HashMap::with_capacity(specs.len());
        let mut variables = Vec::with_capacity(specs.len());

        let mut segment = 0usize;
        let mut cursor = 0u32; // next free bit within `segment`

        for (index, spec) in specs.into_iter().enumerate() {
            if spec.cardinality < 2 {
                return Err(RaError::Validation(format!(
                    "variable '{}' must have cardinality >= 2, got {}",
                    spec.name, spec.cardinality
                )));
            }
            if abbreviation_index.contains_key(&spec.abbreviation) {
                return Err(RaError::Validation(format!(
                    "duplicate abbreviation '{}'",
                    spec.abbreviation
                )));
            }

            let bits = bits_for_cardinality(spec.cardinality);
            if bits > SEGMENT_BITS {
                return Err(RaError::Validation(format!(
                    "variable '{}' cardinality {} needs more bits than fit in one segment",
                    spec.name, spec.cardinality
                )));
            }
            if cursor + bits > SEGMENT_BITS {
                segment += 1;
                cursor = 0;
            }

            let variable = Variable {
                index,
                name: spec.name,
                abbreviation: spec.abbreviation,
                cardinality: spec.cardinality,
                is_dependent: spec.is_dependent,
                value_labels: spec.value_labels,
                segment,
                shift: cursor,
                bits,
            };
            abbreviation_index.insert(variable.abbreviation, index);
            cursor += bits;
            variables.push(variable);
        }

        let key_size = segment + 1;

        Ok(VariableList {
            variables,
            abbreviation_index,
            key_size,
        })
    }

    /// Number of registered variables.
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Whether no variables are registered (never true for a constructed list).
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Number of segments a [`Key`] over this list needs.
    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// All registered variables, in index order.
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// Look up a variable by index.
    pub fn variable(&self, index: usize) -> Result<&Variable, RaError> {
        self.variables
            .get(index)
            .ok_or_else(|| RaError::Validation(format!("variable index {index} out of range")))
    }

    /// Look up a variable index by its single-token abbreviation.
    pub fn index_of_abbreviation(&self, abbreviation: char) -> Result<usize, RaError> {
        self.abbreviation_index
            .get(&abbreviation)
            .copied()
            .ok_or_else(|| RaError::Validation(format!("Unknown variable abbreviation: {abbreviation}")))
    }

    /// Whether this is a directed system (at least one dependent variable).
    pub fn is_directed(&self) -> bool {
        self.variables.iter().any(Variable::is_dependent)
    }

    /// Indices of independent variables (all variables when the system is
    /// neutral, i.e. not directed).
    pub fn independent_variables(&self) -> Vec<usize> {
        self.variables
            .iter()
            .filter(|v| !v.is_dependent)
            .map(Variable::index)
            .collect()
    }

    /// Indices of dependent variables.
    pub fn dependent_variables(&self) -> Vec<usize> {
        self.variables
            .iter()
            .filter(|v| v.is_dependent)
            .map(Variable::index)
            .collect()
    }

    /// Product of all cardinalities: the size of the full joint state space.
    pub fn state_space(&self) -> u64 {
        self.variables
            .iter()
            .map(|v| u64::from(v.cardinality))
            .product()
    }

    /// Read a variable's value out of `key`. Does not distinguish a
    /// genuine value from the don't-care sentinel — use
    /// [`VariableList::is_wildcard`] for that.
    pub fn get_value(&self, key: &Key, var_index: usize) -> Result<u32, RaError> {
        let var = self.variable(var_index)?;
        self.check_key_size(key)?;
        Ok(key.raw_field(var.segment, var.shift, var.field_mask()))
    }

    /// Whether `key` stores don't-care for `var_index`.
    pub fn is_wildcard(&self, key: &Key, var_index: usize) -> Result<bool, RaError> {
        let var = self.variable(var_index)?;
        Ok(self.get_value(key, var_index)? == var.wildcard_value())
    }

    /// Set a variable's value in `key` in place. `value` must be strictly
    /// less than the variable's cardinality.
    pub fn set_value(&self, key: &mut Key, var_index: usize, value: u32) -> Result<(), RaError> {
        let var = self.variable(var_index)?;
        self.check_key_size(key)?;
        if value >= var.cardinality {
            return Err(RaError::InvalidKey(format!(
                "value {value} out of range for variable '{}' (cardinality {})",
                var.name, var.cardinality
            )));
        }
        key.set_raw_field(var.segment, var.shift, var.field_mask(), value);
        Ok(())
    }

    /// Mark a variable as don't-care in `key` in place.
    pub fn set_wildcard(&self, key: &mut Key, var_index: usize) -> Result<(), RaError> {
        let var = self.variable(var_index)?;
        self.check_key_size(key)?;
        key.set_raw_field(var.segment, var.shift, var.field_mask(), var.wildcard_value());
        Ok(())
    }

    fn check_key_size(&self, key: &Key) -> Result<(), RaError> {
        if key.key_size() != self.key_size {
            return Err(RaError::InvalidKey(format!(
                "key has {} segments, variable list needs {}",
                key.key_size(),
                self.key_size
            )));
        }
        Ok(())
    }

    /// Build a key with the listed `(variable index, value)` pairs set and
    /// every other variable marked don't-care.
    pub fn build_key(&self, pairs: &[(usize, u32)]) -> Result<Key, RaError> {
        let mut key = Key::wildcard(self.key_size);
        for &(var_index, value) in pairs {
            self.set_value(&mut key, var_index, value)?;
        }
        Ok(key)
    }

    /// Build a projection mask: all-ones (don't-care) outside `subset`,
    /// all-zeros inside it. `apply_mask` (`key.or(&mask)`) then clears the
    /// subset's bits to their true values while marking everything else
    /// don't-care — the projection key for [`crate::table::ContingencyTable::project`].
    pub fn build_mask(&self, subset: &[usize]) -> Result<Key, RaError> {
        let mut mask = Key::wildcard(self.key_size);
        for &var_index in subset {
            let var = self.variable(var_index)?;
            mask.set_raw_field(var.segment, var.shift, var.field_mask(), 0);
        }
        Ok(mask)
    }

    /// Precise per-variable match: two keys match iff, for every variable,
    /// either both hold the same value or at least one is don't-care.
    /// Slower but exact, unlike [`Key::matches_fast`].
    pub fn keys_match(&self, a: &Key, b: &Key) -> Result<bool, RaError> {
        self.check_key_size(a)?;
        self.check_key_size(b)?;
        for var in &self.variables {
            let av = a.raw_field(var.segment, var.shift, var.field_mask());
            let bv = b.raw_field(var.segment, var.shift, var.field_mask());
            let wc = var.wildcard_value();
            if av != bv && av != wc && bv != wc {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
