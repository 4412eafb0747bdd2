//! Lenient numeric coercion for loosely-typed tunables.
//!
//! Configuration values arrive as arbitrary JSON/TOML scalars. Anything that
//! does not read as a finite number is treated as "unset" so callers fall back
//! to their documented default instead of failing.

use serde_json::Value;

/// Read a value as a finite `f64`.
///
/// Numbers pass through; strings are trimmed and parsed. Booleans, nulls,
/// arrays and objects read as unset.
pub fn finite_number(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    parsed.is_finite().then_some(parsed)
}

/// Floor a finite value and clamp it to at least `floor`.
pub fn floor_at_least(value: f64, floor: u64) -> u64 {
    if value <= floor as f64 {
        floor
    } else {
        value.floor() as u64
    }
}

/// Strictly positive integer, or `None`.
///
/// Fractions that floor to zero (e.g. `0.5`) read as unset.
pub fn positive_int(value: Option<f64>) -> Option<u64> {
    let v = value.filter(|v| v.is_finite())?.floor();
    (v >= 1.0).then_some(v as u64)
}

/// Non-negative integer, or `None`.
pub fn non_negative_int(value: Option<f64>) -> Option<u64> {
    let v = value.filter(|v| v.is_finite())?.floor();
    (v >= 0.0).then_some(v as u64)
}

/// Fraction clamped into `[min, max]`.
///
/// Zero reads as unset unless `allow_zero` is set; non-finite values always do.
pub fn clamped_fraction(value: Option<f64>, min: f64, max: f64, allow_zero: bool) -> Option<f64> {
    let v = value.filter(|v| v.is_finite())?;
    if v == 0.0 && !allow_zero {
        return None;
    }
    Some(v.clamp(min, max))
}

/// Fraction in `(0, 1]`, or `None` when out of range.
pub fn unit_fraction(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0 && *v <= 1.0)
}

/// Integer with a lower bound, falling back when the input is not finite.
pub fn min_integer(value: Option<f64>, minimum: u64, fallback: u64) -> u64 {
    match value.filter(|v| v.is_finite()) {
        Some(v) => floor_at_least(v, minimum),
        None => fallback,
    }
}

/// Lift an optional unsigned integer into the `f64` domain used above.
pub fn from_u64(value: Option<u64>) -> Option<f64> {
    value.map(|v| v as f64)
}
