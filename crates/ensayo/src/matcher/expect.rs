//! Fluent `expect()` assertions.
//!
//! ```rust
//! use ensayo::expect;
//!
//! expect(1 + 1).to_be(2).unwrap();
//! expect(vec![1, 2, 3]).not().to_contain(4).unwrap();
//! assert!(expect(1).to_be(2).is_err());
//! ```

use super::equality::{equal, matches_object, same_value, strict_equal};
use super::value::Value;
use crate::i18n::Messages;
use crate::result::{panic_message, EnsayoError, EnsayoResult};
use crate::snapshot::{SnapshotOutcome, SnapshotStore};
use regex::Regex;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Assertion builder over a received value
#[derive(Debug, Clone)]
pub struct Expect {
    received: Value,
    negated: bool,
}

/// Create an expectation for a value
#[must_use]
pub fn expect(received: impl Into<Value>) -> Expect {
    Expect {
        received: received.into(),
        negated: false,
    }
}

impl Expect {
    /// Invert the following matcher
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    /// The value under test
    #[must_use]
    pub const fn received(&self) -> &Value {
        &self.received
    }

    fn verdict(&self, matcher: &str, pass: bool, expected: impl FnOnce() -> String) -> EnsayoResult<()> {
        if pass != self.negated {
            return Ok(());
        }
        let not = if self.negated { "not." } else { "" };
        let expected = if self.negated {
            format!("not {}", expected())
        } else {
            expected()
        };
        Err(EnsayoError::assertion(format!(
            "expect(received).{not}{matcher}\n\n{}",
            Messages::current().expected_received(&expected, &self.received.to_string())
        )))
    }

    fn number(&self, matcher: &str) -> EnsayoResult<f64> {
        self.received.as_number().ok_or_else(|| {
            EnsayoError::assertion(format!(
                "{matcher}: received value must be a number, got {} {}",
                self.received.type_name(),
                self.received
            ))
        })
    }

    /// `Object.is` identity
    pub fn to_be(&self, expected: impl Into<Value>) -> EnsayoResult<()> {
        let expected = expected.into();
        self.verdict("to_be", same_value(&self.received, &expected), || {
            expected.to_string()
        })
    }

    /// Structural equality; undefined keys count as absent
    pub fn to_equal(&self, expected: impl Into<Value>) -> EnsayoResult<()> {
        let expected = expected.into();
        self.verdict("to_equal", equal(&self.received, &expected), || {
            expected.to_string()
        })
    }

    /// Structural equality with exact key sets
    pub fn to_strict_equal(&self, expected: impl Into<Value>) -> EnsayoResult<()> {
        let expected = expected.into();
        self.verdict(
            "to_strict_equal",
            strict_equal(&self.received, &expected),
            || expected.to_string(),
        )
    }

    pub fn to_be_truthy(&self) -> EnsayoResult<()> {
        self.verdict("to_be_truthy", self.received.is_truthy(), || {
            "truthy value".to_string()
        })
    }

    pub fn to_be_falsy(&self) -> EnsayoResult<()> {
        self.verdict("to_be_falsy", !self.received.is_truthy(), || {
            "falsy value".to_string()
        })
    }

    pub fn to_be_defined(&self) -> EnsayoResult<()> {
        self.verdict("to_be_defined", !self.received.is_undefined(), || {
            "defined value".to_string()
        })
    }

    pub fn to_be_undefined(&self) -> EnsayoResult<()> {
        self.verdict("to_be_undefined", self.received.is_undefined(), || {
            "undefined".to_string()
        })
    }

    pub fn to_be_null(&self) -> EnsayoResult<()> {
        self.verdict("to_be_null", self.received.is_null(), || "null".to_string())
    }

    pub fn to_be_nan(&self) -> EnsayoResult<()> {
        let pass = self.received.as_number().is_some_and(f64::is_nan);
        self.verdict("to_be_nan", pass, || "NaN".to_string())
    }

    pub fn to_be_greater_than(&self, bound: f64) -> EnsayoResult<()> {
        let n = self.number("to_be_greater_than")?;
        self.verdict("to_be_greater_than", n > bound, || format!("> {bound}"))
    }

    pub fn to_be_greater_than_or_equal(&self, bound: f64) -> EnsayoResult<()> {
        let n = self.number("to_be_greater_than_or_equal")?;
        self.verdict("to_be_greater_than_or_equal", n >= bound, || {
            format!(">= {bound}")
        })
    }

    pub fn to_be_less_than(&self, bound: f64) -> EnsayoResult<()> {
        let n = self.number("to_be_less_than")?;
        self.verdict("to_be_less_than", n < bound, || format!("< {bound}"))
    }

    pub fn to_be_less_than_or_equal(&self, bound: f64) -> EnsayoResult<()> {
        let n = self.number("to_be_less_than_or_equal")?;
        self.verdict("to_be_less_than_or_equal", n <= bound, || {
            format!("<= {bound}")
        })
    }

    /// Numeric closeness: `|received - expected| < 10^-digits / 2`
    pub fn to_be_close_to(&self, expected: f64, digits: i32) -> EnsayoResult<()> {
        let n = self.number("to_be_close_to")?;
        let tolerance = 10f64.powi(-digits) / 2.0;
        let pass = if n.is_infinite() || expected.is_infinite() {
            n == expected
        } else {
            (n - expected).abs() < tolerance
        };
        self.verdict("to_be_close_to", pass, || {
            format!("{expected} (within {tolerance})")
        })
    }

    /// Array membership by identity, or substring for strings
    pub fn to_contain(&self, item: impl Into<Value>) -> EnsayoResult<()> {
        let item = item.into();
        let pass = match (&self.received, &item) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), _) => items.iter().any(|v| same_value(v, &item)),
            _ => {
                return Err(EnsayoError::assertion(format!(
                    "to_contain: received value must be an array or string, got {}",
                    self.received.type_name()
                )))
            }
        };
        self.verdict("to_contain", pass, || format!("containing {item}"))
    }

    /// Array membership by structural equality
    pub fn to_contain_equal(&self, item: impl Into<Value>) -> EnsayoResult<()> {
        let item = item.into();
        let Value::Array(items) = &self.received else {
            return Err(EnsayoError::assertion(format!(
                "to_contain_equal: received value must be an array, got {}",
                self.received.type_name()
            )));
        };
        let pass = items.iter().any(|v| equal(v, &item));
        self.verdict("to_contain_equal", pass, || {
            format!("containing equal {item}")
        })
    }

    pub fn to_have_length(&self, expected: usize) -> EnsayoResult<()> {
        let Some(length) = self.received.length() else {
            return Err(EnsayoError::assertion(format!(
                "to_have_length: received value has no length ({})",
                self.received.type_name()
            )));
        };
        self.verdict("to_have_length", length == expected, || {
            format!("length {expected} (received length {length})")
        })
    }

    /// A dotted property path (`"a.b.0"`) resolves
    pub fn to_have_property(&self, path: &str) -> EnsayoResult<()> {
        let pass = self.received.get_path(path).is_some();
        self.verdict("to_have_property", pass, || format!("property {path}"))
    }

    /// A dotted property path resolves to a structurally equal value
    pub fn to_have_property_value(&self, path: &str, expected: impl Into<Value>) -> EnsayoResult<()> {
        let expected = expected.into();
        let pass = self
            .received
            .get_path(path)
            .is_some_and(|found| equal(found, &expected));
        self.verdict("to_have_property_value", pass, || {
            format!("property {path} = {expected}")
        })
    }

    /// The received string matches a regular expression
    pub fn to_match(&self, pattern: &str) -> EnsayoResult<()> {
        let regex = Regex::new(pattern)
            .map_err(|e| EnsayoError::config(format!("to_match: invalid pattern {pattern:?}: {e}")))?;
        let Some(text) = self.received.as_str() else {
            return Err(EnsayoError::assertion(format!(
                "to_match: received value must be a string, got {}",
                self.received.type_name()
            )));
        };
        self.verdict("to_match", regex.is_match(text), || format!("/{pattern}/"))
    }

    /// Every key of `subset` is present with an equal value
    pub fn to_match_object(&self, subset: impl Into<Value>) -> EnsayoResult<()> {
        let subset = subset.into();
        self.verdict(
            "to_match_object",
            matches_object(&self.received, &subset),
            || format!("object matching {subset}"),
        )
    }

    /// Compare against (or record) a stored snapshot
    pub fn to_match_snapshot(&self, store: &SnapshotStore, name: &str) -> EnsayoResult<SnapshotOutcome> {
        if self.negated {
            return Err(EnsayoError::config("to_match_snapshot cannot be negated"));
        }
        store.assert_value(name, &self.received)
    }
}

/// Normalizes what a closure under `expect_fn` produced into a thrown message
pub trait Thrown {
    /// The error text, if the call failed
    fn thrown(self) -> Option<String>;
}

impl Thrown for () {
    fn thrown(self) -> Option<String> {
        None
    }
}

impl<T, E: std::fmt::Display> Thrown for Result<T, E> {
    fn thrown(self) -> Option<String> {
        self.err().map(|e| e.to_string())
    }
}

/// Assertion builder over a closure; an `Err` or a panic counts as throwing
pub struct ExpectFn {
    call: Box<dyn FnOnce() -> Option<String>>,
    negated: bool,
}

impl std::fmt::Debug for ExpectFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpectFn")
            .field("negated", &self.negated)
            .finish_non_exhaustive()
    }
}

/// Create an expectation for a closure
#[must_use]
pub fn expect_fn<R: Thrown>(f: impl FnOnce() -> R + 'static) -> ExpectFn {
    ExpectFn {
        call: Box::new(move || f().thrown()),
        negated: false,
    }
}

impl ExpectFn {
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    fn outcome(self) -> (Option<String>, bool) {
        let negated = self.negated;
        let call = self.call;
        let thrown = match catch_unwind(AssertUnwindSafe(call)) {
            Ok(thrown) => thrown,
            Err(payload) => Some(panic_message(payload.as_ref())),
        };
        (thrown, negated)
    }

    /// The closure returned `Err` or panicked
    pub fn to_throw(self) -> EnsayoResult<()> {
        let (thrown, negated) = self.outcome();
        match (thrown, negated) {
            (Some(_), false) | (None, true) => Ok(()),
            (None, false) => Err(EnsayoError::assertion(
                "expect(fn).to_throw\n\nReceived function did not throw",
            )),
            (Some(message), true) => Err(EnsayoError::assertion(format!(
                "expect(fn).not.to_throw\n\nReceived function threw: {message}"
            ))),
        }
    }

    /// The closure failed with a message containing `substring`
    pub fn to_throw_message(self, substring: &str) -> EnsayoResult<()> {
        let (thrown, negated) = self.outcome();
        let pass = thrown.as_deref().is_some_and(|m| m.contains(substring));
        if pass != negated {
            return Ok(());
        }
        let not = if negated { "not." } else { "" };
        let received = thrown.unwrap_or_else(|| "no error".to_string());
        Err(EnsayoError::assertion(format!(
            "expect(fn).{not}to_throw_message\n\n{}",
            Messages::current().expected_received(&format!("message containing {substring:?}"), &received)
        )))
    }
}
