//! Parameter-space normalization.
//!
//! Validates an arbitrary JSON object into explicit value lists per
//! dimension and computes the combinatorial size estimate. The running
//! product is checked after each multiplication against `limit * 4` so a
//! runaway space fails fast, long before the final estimate is compared
//! against the limit itself.
//!
//! Pure and deterministic; no side effects.

use serde_json::{Map, Value};

use crate::error::OrchestratorError;
use crate::paramspace::types::{Dimension, NormalizedParamSpace, ParamValue};

/// Hard cap on range expansion iterations.
const RANGE_ITERATION_GUARD: usize = 1_000_000;

/// Largest magnitude for which 12-decimal rounding stays exact in f64.
const ROUND_MAGNITUDE_CEILING: f64 = 1e3;

/// Normalize a parameter space against a combinatorial size limit.
///
/// Every dimension resolves to a non-empty value list: arrays keep their
/// non-null scalar entries, `{start, end, step}` objects expand inclusively
/// toward `end`, and bare scalars become singletons. Any other shape is
/// rejected.
///
/// # Errors
///
/// Returns `E.PARAM_INVALID` for malformed dimensions or when the running
/// combination product exceeds the safe processing window (`limit * 4`).
pub fn normalize_param_space(
    space: &Map<String, Value>,
    limit: u64,
) -> Result<NormalizedParamSpace, OrchestratorError> {
    if space.is_empty() {
        return Err(OrchestratorError::param_invalid(
            "paramSpace requires at least one dimension",
        ));
    }
    let mut dimensions = Vec::with_capacity(space.len());
    let mut estimate: u64 = 1;
    for (key, raw) in space {
        let values = normalize_dimension(key, raw)?;
        estimate = safe_multiply(estimate, values.len() as u64, limit)?;
        dimensions.push(Dimension {
            name: key.clone(),
            values,
        });
    }
    Ok(NormalizedParamSpace::new(dimensions))
}

fn normalize_dimension(key: &str, raw: &Value) -> Result<Vec<ParamValue>, OrchestratorError> {
    match raw {
        Value::Array(entries) => {
            let mut values = Vec::with_capacity(entries.len());
            for entry in entries {
                if entry.is_null() {
                    continue;
                }
                match ParamValue::from_json(entry) {
                    Some(value) => values.push(value),
                    None => {
                        return Err(OrchestratorError::param_invalid(format!(
                            "paramSpace.{key} is unsupported"
                        )));
                    }
                }
            }
            if values.is_empty() {
                return Err(OrchestratorError::param_invalid(format!(
                    "paramSpace.{key} requires at least one value"
                )));
            }
            Ok(values)
        }
        Value::Object(fields) if has_range_shape(fields) => expand_range(key, fields),
        _ => ParamValue::from_json(raw).map_or_else(
            || {
                Err(OrchestratorError::param_invalid(format!(
                    "paramSpace.{key} is unsupported"
                )))
            },
            |value| Ok(vec![value]),
        ),
    }
}

// Exactly the three range keys; objects with extras are not ranges.
fn has_range_shape(fields: &Map<String, Value>) -> bool {
    fields.len() == 3
        && fields.contains_key("start")
        && fields.contains_key("end")
        && fields.contains_key("step")
}

fn expand_range(
    key: &str,
    fields: &Map<String, Value>,
) -> Result<Vec<ParamValue>, OrchestratorError> {
    let (Some(start), Some(end), Some(step)) = (
        finite_number(fields.get("start")),
        finite_number(fields.get("end")),
        finite_number(fields.get("step")),
    ) else {
        return Err(OrchestratorError::param_invalid(format!(
            "paramSpace.{key} range requires numeric start/end/step"
        )));
    };
    if step <= 0.0 {
        return Err(OrchestratorError::param_invalid(format!(
            "paramSpace.{key} step must be > 0"
        )));
    }

    // Integer bounds with an integer step expand without float drift.
    let values = if start.fract() == 0.0 && end.fract() == 0.0 && step.fract() == 0.0 {
        expand_int_range(key, start as i64, end as i64, step as i64)?
    } else {
        expand_float_range(key, start, end, step)?
    };

    if values.is_empty() {
        return Err(OrchestratorError::param_invalid(format!(
            "paramSpace.{key} range produced no values"
        )));
    }
    Ok(values)
}

fn expand_int_range(
    key: &str,
    start: i64,
    end: i64,
    step: i64,
) -> Result<Vec<ParamValue>, OrchestratorError> {
    let ascending = end >= start;
    let mut values = Vec::new();
    let mut current = start;
    let mut iterations = 0usize;
    while (ascending && current <= end) || (!ascending && current >= end) {
        if iterations >= RANGE_ITERATION_GUARD {
            return Err(too_many_values(key));
        }
        values.push(ParamValue::Int(current));
        iterations += 1;
        current = if ascending {
            match current.checked_add(step) {
                Some(next) => next,
                None => break,
            }
        } else {
            match current.checked_sub(step) {
                Some(next) => next,
                None => break,
            }
        };
    }
    Ok(values)
}

fn expand_float_range(
    key: &str,
    start: f64,
    end: f64,
    step: f64,
) -> Result<Vec<ParamValue>, OrchestratorError> {
    let ascending = end >= start;
    let mut values = Vec::new();
    let mut current = start;
    let mut iterations = 0usize;
    while (ascending && current <= end) || (!ascending && current >= end) {
        if iterations >= RANGE_ITERATION_GUARD {
            return Err(too_many_values(key));
        }
        values.push(ParamValue::Float(round12(current)));
        iterations += 1;
        current = if ascending { current + step } else { current - step };
    }
    Ok(values)
}

fn too_many_values(key: &str) -> OrchestratorError {
    OrchestratorError::param_invalid(format!("paramSpace.{key} range produced too many values"))
}

fn finite_number(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64).filter(|v| v.is_finite())
}

// Tames accumulated float drift (0.1 + 0.1 + 0.1 style) for small
// magnitudes; large values are already beyond 12-decimal resolution.
fn round12(value: f64) -> f64 {
    if value.abs() >= ROUND_MAGNITUDE_CEILING {
        return value;
    }
    (value * 1e12).round() / 1e12
}

fn safe_multiply(current: u64, factor: u64, limit: u64) -> Result<u64, OrchestratorError> {
    if factor == 0 {
        return Err(OrchestratorError::param_invalid(
            "paramSpace dimension size must be positive",
        )
        .with_details(serde_json::json!({ "factor": factor })));
    }
    let window = limit.saturating_mul(4);
    let product = current.checked_mul(factor).unwrap_or(u64::MAX);
    if product > window {
        return Err(OrchestratorError::param_invalid(
            "param space exceeds safe processing window",
        )
        .with_details(serde_json::json!({ "estimate": product, "limit": limit })));
    }
    Ok(product)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use proptest::prelude::*;
    use serde_json::json;
    use test_case::test_case;

    fn space(value: serde_json::Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn normalizes_arrays_ranges_and_scalars() {
        let normalized = normalize_param_space(
            &space(json!({
                "ma_short": [5, 10, 20],
                "ma_long": {"start": 50, "end": 60, "step": 5},
                "mode": "ema",
            })),
            500,
        )
        .unwrap();

        assert_eq!(
            normalized.values("ma_short"),
            Some(&[5.into(), 10.into(), 20.into()][..])
        );
        assert_eq!(
            normalized.values("ma_long"),
            Some(&[50.into(), 55.into(), 60.into()][..])
        );
        assert_eq!(normalized.values("mode"), Some(&["ema".into()][..]));
        assert_eq!(normalized.estimate(), 9);
    }

    #[test]
    fn drops_null_array_entries() {
        let normalized =
            normalize_param_space(&space(json!({"p": [1, null, 2, null]})), 500).unwrap();
        assert_eq!(normalized.values("p"), Some(&[1.into(), 2.into()][..]));
    }

    #[test]
    fn rejects_array_left_empty_after_null_filtering() {
        let err = normalize_param_space(&space(json!({"p": [null, null]})), 500).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParamInvalid);
        assert_eq!(err.message(), "paramSpace.p requires at least one value");
    }

    #[test]
    fn rejects_empty_space() {
        let err = normalize_param_space(&space(json!({})), 500).unwrap_err();
        assert_eq!(err.message(), "paramSpace requires at least one dimension");
    }

    #[test]
    fn descending_range_expands_toward_end() {
        let normalized =
            normalize_param_space(&space(json!({"p": {"start": 10, "end": 4, "step": 3}})), 500)
                .unwrap();
        assert_eq!(
            normalized.values("p"),
            Some(&[10.into(), 7.into(), 4.into()][..])
        );
    }

    #[test]
    fn float_range_values_are_rounded() {
        // 0.1 + 0.1 + 0.1 accumulates to 0.30000000000000004; the pushed
        // value must come out as plain 0.3.
        let normalized = normalize_param_space(
            &space(json!({"threshold": {"start": 0.1, "end": 0.35, "step": 0.1}})),
            500,
        )
        .unwrap();
        assert_eq!(
            normalized.values("threshold"),
            Some(
                &[
                    ParamValue::Float(0.1),
                    ParamValue::Float(0.2),
                    ParamValue::Float(0.3)
                ][..]
            )
        );
    }

    #[test_case(json!({"p": {"start": 1, "end": 5, "step": 0}}), "paramSpace.p step must be > 0"; "zero step")]
    #[test_case(json!({"p": {"start": 1, "end": 5, "step": -1}}), "paramSpace.p step must be > 0"; "negative step")]
    #[test_case(json!({"p": {"start": "a", "end": 5, "step": 1}}), "paramSpace.p range requires numeric start/end/step"; "non numeric start")]
    #[test_case(json!({"p": null}), "paramSpace.p is unsupported"; "null dimension")]
    #[test_case(json!({"p": {"start": 1, "end": 5}}), "paramSpace.p is unsupported"; "partial range")]
    #[test_case(json!({"p": {"start": 1, "end": 5, "step": 1, "extra": 2}}), "paramSpace.p is unsupported"; "range with extra key")]
    #[test_case(json!({"p": [[1, 2]]}), "paramSpace.p is unsupported"; "nested array entry")]
    #[test_case(json!({"p": [{"a": 1}]}), "paramSpace.p is unsupported"; "object array entry")]
    fn rejects_malformed_dimensions(body: serde_json::Value, message: &str) {
        let err = normalize_param_space(&space(body), 500).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParamInvalid);
        assert_eq!(err.message(), message);
    }

    #[test]
    fn range_guard_trips_on_unbounded_expansion() {
        let err = normalize_param_space(
            &space(json!({"p": {"start": 0.0, "end": 1.0e9, "step": 0.5}})),
            u64::MAX / 8,
        )
        .unwrap_err();
        assert_eq!(
            err.message(),
            "paramSpace.p range produced too many values"
        );
    }

    #[test]
    fn running_product_fails_fast_beyond_window() {
        // 15 > 3 * 4 trips the window mid-multiplication.
        let err = normalize_param_space(
            &space(json!({"p1": [1, 2, 3, 4, 5], "p2": [1, 2, 3]})),
            3,
        )
        .unwrap_err();
        assert_eq!(err.message(), "param space exceeds safe processing window");
        let details = err.details().unwrap();
        assert_eq!(details["limit"], 3);
        assert_eq!(details["estimate"], 15);
    }

    #[test]
    fn estimate_within_window_passes_normalization() {
        // 4 <= 3 * 4: normalization succeeds; the final limit check is the
        // lifecycle controller's job.
        let normalized =
            normalize_param_space(&space(json!({"p1": [1, 2], "p2": [3, 4]})), 3).unwrap();
        assert_eq!(normalized.estimate(), 4);
    }

    proptest! {
        #[test]
        fn estimate_matches_dimension_products(
            lens in proptest::collection::vec(1usize..6, 1..4)
        ) {
            let mut map = Map::new();
            for (i, len) in lens.iter().enumerate() {
                let values: Vec<i64> = (0..*len as i64).collect();
                map.insert(format!("d{i}"), json!(values));
            }
            let normalized = normalize_param_space(&map, 10_000).unwrap();
            let expected: u64 = lens.iter().map(|l| *l as u64).product();
            prop_assert_eq!(normalized.estimate(), expected);
        }

        #[test]
        fn int_range_expansion_is_inclusive_and_ordered(
            start in -50i64..50,
            len in 1i64..20,
            step in 1i64..7,
        ) {
            let end = start + (len - 1) * step;
            let normalized = normalize_param_space(
                &space(json!({"p": {"start": start, "end": end, "step": step}})),
                10_000,
            ).unwrap();
            let values = normalized.values("p").unwrap();
            prop_assert_eq!(values.len() as i64, len);
            prop_assert_eq!(values.first(), Some(&ParamValue::Int(start)));
            prop_assert_eq!(values.last(), Some(&ParamValue::Int(end)));
        }
    }
}
