//! Matcher engine: the dynamic value model, equality primitives and the
//! `expect()` surface built on them.

pub mod asserts;
pub mod equality;
pub mod expect;
pub mod value;

pub use asserts::{assert_deep_equal, assert_equals, assert_not_equals, assert_strict_equals};
pub use equality::{equal, matches_object, same_value, strict_equal};
pub use expect::{expect, expect_fn, Expect, ExpectFn, Thrown};
pub use value::Value;
