//! Task expansion over a normalized parameter space.
//!
//! Produces concrete parameter combinations in a stable order: dimensions
//! iterate in declaration order and the last dimension varies fastest.
//! Expansion is capped so the in-memory backend never materializes more
//! combinations than it is willing to schedule.

use crate::paramspace::types::{NormalizedParamSpace, ParamCombo};

/// Outcome of expanding a parameter space into concrete combinations.
#[derive(Debug, Clone)]
pub struct Expansion {
    /// Combinations in product order, at most `cap` of them.
    pub combos: Vec<ParamCombo>,
    /// True when the full product exceeded the cap and was cut short.
    pub truncated: bool,
}

/// Expand the Cartesian product of all dimensions, truncated at `cap`.
///
/// Truncation keeps the first `cap` combinations in product order, so a
/// capped expansion is always a prefix of the full one.
#[must_use]
pub fn expand_combos(space: &NormalizedParamSpace, cap: usize) -> Expansion {
    let truncated = space.estimate() > cap as u64;
    let mut result: Vec<ParamCombo> = vec![ParamCombo::new()];

    for dimension in space.dimensions() {
        let grown_len = result
            .len()
            .saturating_mul(dimension.values.len())
            .min(cap);
        let mut grown = Vec::with_capacity(grown_len);
        'level: for combo in &result {
            for value in &dimension.values {
                if grown.len() == cap {
                    break 'level;
                }
                let mut next = combo.clone();
                next.insert(dimension.name.clone(), value.clone());
                grown.push(next);
            }
        }
        result = grown;
    }

    Expansion {
        combos: result,
        truncated,
    }
}
