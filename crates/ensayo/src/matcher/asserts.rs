//! Free-function assertions mirroring the `expect()` matchers.

use super::equality::{equal, same_value, strict_equal};
use super::value::Value;
use crate::i18n::Messages;
use crate::result::{EnsayoError, EnsayoResult};

fn fail(call: &str, expected: &Value, actual: &Value) -> EnsayoError {
    EnsayoError::assertion(format!(
        "{call}\n\n{}",
        Messages::current().expected_received(&expected.to_string(), &actual.to_string())
    ))
}

/// Structural equality
pub fn assert_equals(actual: impl Into<Value>, expected: impl Into<Value>) -> EnsayoResult<()> {
    let (actual, expected) = (actual.into(), expected.into());
    if equal(&actual, &expected) {
        Ok(())
    } else {
        Err(fail("assert_equals", &expected, &actual))
    }
}

/// Structural equality (alias kept for suites ported from deep-equal helpers)
pub fn assert_deep_equal(actual: impl Into<Value>, expected: impl Into<Value>) -> EnsayoResult<()> {
    let (actual, expected) = (actual.into(), expected.into());
    if equal(&actual, &expected) {
        Ok(())
    } else {
        Err(fail("assert_deep_equal", &expected, &actual))
    }
}

/// Identity for primitives, exact key sets for compound values
pub fn assert_strict_equals(actual: impl Into<Value>, expected: impl Into<Value>) -> EnsayoResult<()> {
    let (actual, expected) = (actual.into(), expected.into());
    if same_value(&actual, &expected) && strict_equal(&actual, &expected) {
        Ok(())
    } else {
        Err(fail("assert_strict_equals", &expected, &actual))
    }
}

pub fn assert_not_equals(actual: impl Into<Value>, expected: impl Into<Value>) -> EnsayoResult<()> {
    let (actual, expected) = (actual.into(), expected.into());
    if equal(&actual, &expected) {
        let not_expected = format!("not {expected}");
        Err(EnsayoError::assertion(format!(
            "assert_not_equals\n\n{}",
            Messages::current().expected_received(&not_expected, &actual.to_string())
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deep_equal_nested() {
        let a = Value::object([("a", Value::from(1)), ("b", Value::object([("c", 2)]))]);
        assert!(assert_deep_equal(a.clone(), a.clone()).is_ok());
        assert!(assert_equals(Value::object([("a", 1)]), Value::object([("a", 2)])).is_err());
    }

    #[test]
    fn test_strict_equals_sees_undefined_keys() {
        let with_undefined = Value::object([("a", Value::Undefined)]);
        let empty = Value::object(Vec::<(&str, Value)>::new());
        assert!(assert_equals(with_undefined.clone(), empty.clone()).is_ok());
        assert!(assert_strict_equals(with_undefined, empty).is_err());
    }

    #[test]
    fn test_not_equals() {
        assert!(assert_not_equals(1, 2).is_ok());
        let err = assert_not_equals("x", "x").unwrap_err();
        assert!(err.to_string().contains("not \"x\""));
    }
}
