//! Parameter-space normalization and expansion.
//!
//! A submitted `paramSpace` is an arbitrary JSON object mapping dimension
//! names to value lists, `{start, end, step}` ranges, or bare scalars. This
//! module validates that object into explicit per-dimension value lists,
//! bounds its combinatorial size, and expands it into the concrete
//! parameter combinations that become optimization tasks.

mod expand;
mod normalize;
mod types;

pub use expand::{Expansion, expand_combos};
pub use normalize::normalize_param_space;
pub use types::{Dimension, NormalizedParamSpace, ParamCombo, ParamValue};
