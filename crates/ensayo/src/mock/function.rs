//! Call-recording function mocks.
//!
//! A [`MockFn`] wraps an implementation and records every call's arguments
//! and outcome in serialized form, so assertions compare with structural
//! equality. Tuples of arguments serialize to arrays.

use crate::i18n::Messages;
use crate::matcher::{equal, Value};
use crate::result::{panic_message, EnsayoError, EnsayoResult};
use serde::Serialize;
use std::fmt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// How a recorded call ended
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Returned a value
    Returned(Value),
    /// Panicked; the panic was re-raised to the caller
    Panicked(String),
}

/// One recorded call
#[derive(Debug, Clone)]
pub struct MockCall {
    /// Serialized arguments
    pub args: Value,
    pub outcome: MockOutcome,
}

type Implementation<A, R> = Arc<dyn Fn(A) -> R + Send + Sync>;

struct MockState<A, R> {
    calls: Vec<MockCall>,
    implementation: Implementation<A, R>,
}

/// Cloneable handle to a recording mock; clones share one call record
pub struct MockFn<A, R> {
    state: Arc<Mutex<MockState<A, R>>>,
}

impl<A, R> Clone for MockFn<A, R> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<A, R> MockFn<A, R> {
    fn lock(&self) -> MutexGuard<'_, MockState<A, R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<A, R> fmt::Debug for MockFn<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockFn")
            .field("calls", &self.lock().calls.len())
            .finish_non_exhaustive()
    }
}

/// Mock returning `R::default()` until given an implementation
#[must_use]
pub fn fn_mock<A, R>() -> MockFn<A, R>
where
    A: Serialize + 'static,
    R: Serialize + Default + 'static,
{
    MockFn::with_implementation(|_| R::default())
}

/// Mock that records calls and delegates to `f`
#[must_use]
pub fn spy<A, R, F>(f: F) -> MockFn<A, R>
where
    A: Serialize + 'static,
    R: Serialize + 'static,
    F: Fn(A) -> R + Send + Sync + 'static,
{
    MockFn::with_implementation(f)
}

impl<A, R> MockFn<A, R>
where
    A: Serialize + 'static,
    R: Serialize + 'static,
{
    fn with_implementation(f: impl Fn(A) -> R + Send + Sync + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                calls: Vec::new(),
                implementation: Arc::new(f),
            })),
        }
    }

    /// Invoke the mock, recording arguments and outcome.
    ///
    /// A panic inside the implementation is recorded and then re-raised.
    pub fn call(&self, args: A) -> R {
        let recorded_args = Value::from_serialize(&args).unwrap_or_default();
        let implementation = Arc::clone(&self.lock().implementation);
        match catch_unwind(AssertUnwindSafe(|| implementation(args))) {
            Ok(result) => {
                let returned = Value::from_serialize(&result).unwrap_or_default();
                self.lock().calls.push(MockCall {
                    args: recorded_args,
                    outcome: MockOutcome::Returned(returned),
                });
                result
            }
            Err(payload) => {
                self.lock().calls.push(MockCall {
                    args: recorded_args,
                    outcome: MockOutcome::Panicked(panic_message(payload.as_ref())),
                });
                resume_unwind(payload)
            }
        }
    }

    /// Replace the implementation
    pub fn mock_implementation(&self, f: impl Fn(A) -> R + Send + Sync + 'static) -> &Self {
        self.lock().implementation = Arc::new(f);
        self
    }

    /// Always return a clone of `value`
    pub fn mock_return_value(&self, value: R) -> &Self
    where
        R: Clone + Send + Sync,
    {
        self.mock_implementation(move |_| value.clone())
    }

    /// Forget recorded calls; the implementation is kept
    pub fn reset(&self) {
        self.lock().calls.clear();
    }

    /// Recorded calls, oldest first
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }
}

/// Assertion builder over a mock's call record
pub struct ExpectMock {
    calls: Vec<MockCall>,
    negated: bool,
}

impl fmt::Debug for ExpectMock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpectMock")
            .field("calls", &self.calls.len())
            .field("negated", &self.negated)
            .finish()
    }
}

/// Create an expectation over the calls recorded so far
#[must_use]
pub fn expect_mock<A, R>(mock: &MockFn<A, R>) -> ExpectMock
where
    A: Serialize + 'static,
    R: Serialize + 'static,
{
    ExpectMock {
        calls: mock.calls(),
        negated: false,
    }
}

fn serialized(value: &impl Serialize) -> EnsayoResult<Value> {
    Value::from_serialize(value)
}

impl ExpectMock {
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    fn verdict(&self, matcher: &str, pass: bool, expected: String, received: String) -> EnsayoResult<()> {
        if pass != self.negated {
            return Ok(());
        }
        let (not, expected) = if self.negated {
            ("not.", format!("not {expected}"))
        } else {
            ("", expected)
        };
        Err(EnsayoError::assertion(format!(
            "expect(mock).{not}{matcher}\n\n{}",
            Messages::current().expected_received(&expected, &received)
        )))
    }

    fn returned(&self) -> impl Iterator<Item = &Value> {
        self.calls.iter().filter_map(|call| match &call.outcome {
            MockOutcome::Returned(v) => Some(v),
            MockOutcome::Panicked(_) => None,
        })
    }

    fn all_args(&self) -> String {
        Value::Array(self.calls.iter().map(|c| c.args.clone()).collect()).to_string()
    }

    pub fn to_have_been_called(&self) -> EnsayoResult<()> {
        let count = self.calls.len();
        self.verdict(
            "to_have_been_called",
            count > 0,
            "at least one call".to_string(),
            format!("{count} calls"),
        )
    }

    pub fn to_have_been_called_times(&self, times: usize) -> EnsayoResult<()> {
        let count = self.calls.len();
        self.verdict(
            "to_have_been_called_times",
            count == times,
            format!("{times} calls"),
            format!("{count} calls"),
        )
    }

    /// Some call received arguments structurally equal to `args`
    pub fn to_have_been_called_with(&self, args: impl Serialize) -> EnsayoResult<()> {
        let expected = serialized(&args)?;
        let pass = self.calls.iter().any(|c| equal(&c.args, &expected));
        self.verdict(
            "to_have_been_called_with",
            pass,
            expected.to_string(),
            self.all_args(),
        )
    }

    pub fn to_have_been_last_called_with(&self, args: impl Serialize) -> EnsayoResult<()> {
        let expected = serialized(&args)?;
        let last = self.calls.last().map(|c| &c.args);
        let pass = last.is_some_and(|a| equal(a, &expected));
        self.verdict(
            "to_have_been_last_called_with",
            pass,
            expected.to_string(),
            last.map_or_else(|| "no calls".to_string(), ToString::to_string),
        )
    }

    /// The `nth` call (1-based) received `args`
    pub fn to_have_been_nth_called_with(&self, nth: usize, args: impl Serialize) -> EnsayoResult<()> {
        if nth == 0 {
            return Err(EnsayoError::config(
                "to_have_been_nth_called_with counts calls from 1",
            ));
        }
        let expected = serialized(&args)?;
        let call = self.calls.get(nth - 1).map(|c| &c.args);
        let pass = call.is_some_and(|a| equal(a, &expected));
        self.verdict(
            "to_have_been_nth_called_with",
            pass,
            format!("call #{nth} with {expected}"),
            call.map_or_else(|| format!("{} calls", self.calls.len()), ToString::to_string),
        )
    }

    /// At least one call returned without panicking
    pub fn to_have_returned(&self) -> EnsayoResult<()> {
        let count = self.returned().count();
        self.verdict(
            "to_have_returned",
            count > 0,
            "at least one return".to_string(),
            format!("{count} returns"),
        )
    }

    pub fn to_have_returned_times(&self, times: usize) -> EnsayoResult<()> {
        let count = self.returned().count();
        self.verdict(
            "to_have_returned_times",
            count == times,
            format!("{times} returns"),
            format!("{count} returns"),
        )
    }

    pub fn to_have_returned_with(&self, value: impl Serialize) -> EnsayoResult<()> {
        let expected = serialized(&value)?;
        let pass = self.returned().any(|v| equal(v, &expected));
        let received = Value::Array(self.returned().cloned().collect());
        self.verdict(
            "to_have_returned_with",
            pass,
            expected.to_string(),
            received.to_string(),
        )
    }

    pub fn to_have_last_returned_with(&self, value: impl Serialize) -> EnsayoResult<()> {
        let expected = serialized(&value)?;
        let last = self.calls.last().map(|c| &c.outcome);
        let pass = matches!(last, Some(MockOutcome::Returned(v)) if equal(v, &expected));
        let received = match last {
            Some(MockOutcome::Returned(v)) => v.to_string(),
            Some(MockOutcome::Panicked(message)) => format!("panic: {message}"),
            None => "no calls".to_string(),
        };
        self.verdict("to_have_last_returned_with", pass, expected.to_string(), received)
    }
}
