//! Value comparison primitives.

use super::value::Value;
use std::collections::BTreeMap;

/// Structural equality.
///
/// Arrays compare element-wise and objects key-wise. A key holding
/// `Undefined` counts as absent, so `{a: undefined}` equals `{}`.
/// `NaN` equals `NaN`.
#[must_use]
pub fn equal(a: &Value, b: &Value) -> bool {
    compare(a, b, false)
}

/// Strict structural equality.
///
/// Same as [`equal`] except object key sets must match exactly, so a key
/// explicitly holding `Undefined` differs from a missing key.
#[must_use]
pub fn strict_equal(a: &Value, b: &Value) -> bool {
    compare(a, b, true)
}

/// `Object.is`-style identity for primitives.
///
/// `NaN` is the same as `NaN` and `+0` differs from `-0`. Compound values
/// carry no identity here, so they fall back to [`strict_equal`].
#[must_use]
pub fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if x.is_nan() && y.is_nan() {
                true
            } else {
                x == y && x.is_sign_negative() == y.is_sign_negative()
            }
        }
        _ => strict_equal(a, b),
    }
}

/// Whether `actual` contains every key of `subset` with equal values.
///
/// Nested objects are matched recursively as subsets; arrays must match
/// element-wise with subset semantics per element.
#[must_use]
pub fn matches_object(actual: &Value, subset: &Value) -> bool {
    match (actual, subset) {
        (Value::Object(a), Value::Object(s)) => s.iter().all(|(key, expected)| {
            a.get(key).map_or(expected.is_undefined(), |found| {
                matches_object(found, expected)
            })
        }),
        (Value::Array(a), Value::Array(s)) => {
            a.len() == s.len() && a.iter().zip(s).all(|(x, y)| matches_object(x, y))
        }
        _ => equal(actual, subset),
    }
}

fn compare(a: &Value, b: &Value, strict: bool) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| compare(l, r, strict))
        }
        (Value::Object(x), Value::Object(y)) => compare_objects(x, y, strict),
        _ => false,
    }
}

fn compare_objects(x: &BTreeMap<String, Value>, y: &BTreeMap<String, Value>, strict: bool) -> bool {
    if strict {
        return x.len() == y.len()
            && x.iter()
                .all(|(key, lv)| y.get(key).is_some_and(|rv| compare(lv, rv, true)));
    }
    let defined = |map: &BTreeMap<String, Value>| map.values().filter(|v| !v.is_undefined()).count();
    defined(x) == defined(y)
        && x.iter().filter(|(_, v)| !v.is_undefined()).all(|(key, lv)| {
            y.get(key).is_some_and(|rv| compare(lv, rv, false))
        })
}
