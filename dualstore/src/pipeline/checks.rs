//! Composable input validators.
//!
//! A [`Check`] is a predicate over a JSON value. Checks compose with
//! [`Check::all`], [`Check::any`], and [`Check::not`]. An optional input
//! that was not given is tested as `null`.

use regex::Regex;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

type Predicate = Arc<dyn Fn(&JsonValue) -> bool + Send + Sync>;

/// A named predicate over a parameter value.
#[derive(Clone)]
pub struct Check {
    description: String,
    predicate: Predicate,
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Check").field(&self.description).finish()
    }
}

impl Check {
    /// A check from an arbitrary predicate.
    pub fn custom<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&JsonValue) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Runs the check.
    #[must_use]
    pub fn test(&self, value: &JsonValue) -> bool {
        (self.predicate)(value)
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Passes when every check passes.
    #[must_use]
    pub fn all(checks: Vec<Self>) -> Self {
        let description = format!(
            "all({})",
            checks.iter().map(|c| c.description.as_str()).collect::<Vec<_>>().join(", ")
        );
        Self::custom(description, move |v| checks.iter().all(|c| c.test(v)))
    }

    /// Passes when any check passes.
    #[must_use]
    pub fn any(checks: Vec<Self>) -> Self {
        let description = format!(
            "any({})",
            checks.iter().map(|c| c.description.as_str()).collect::<Vec<_>>().join(", ")
        );
        Self::custom(description, move |v| checks.iter().any(|c| c.test(v)))
    }

    /// Inverts a check.
    #[must_use]
    pub fn not(check: Self) -> Self {
        let description = format!("not({})", check.description);
        Self::custom(description, move |v| !check.test(v))
    }

    /// Value is null (or was not given).
    #[must_use]
    pub fn null() -> Self {
        Self::custom("null", JsonValue::is_null)
    }

    /// Value is not null.
    #[must_use]
    pub fn not_null() -> Self {
        Self::custom("not_null", |v| !v.is_null())
    }

    /// Value is an integer.
    #[must_use]
    pub fn int() -> Self {
        Self::custom("int", |v| v.is_i64() || v.is_u64())
    }

    /// Value is any number.
    #[must_use]
    pub fn number() -> Self {
        Self::custom("number", JsonValue::is_number)
    }

    /// Value is a string.
    #[must_use]
    pub fn string() -> Self {
        Self::custom("string", JsonValue::is_string)
    }

    /// Value is a boolean.
    #[must_use]
    pub fn boolean() -> Self {
        Self::custom("boolean", JsonValue::is_boolean)
    }

    /// Value is an array.
    #[must_use]
    pub fn array() -> Self {
        Self::custom("array", JsonValue::is_array)
    }

    /// Value is an object.
    #[must_use]
    pub fn object() -> Self {
        Self::custom("object", JsonValue::is_object)
    }

    /// Strings with a non-whitespace character, and arrays or objects with an entry.
    #[must_use]
    pub fn non_empty() -> Self {
        Self::custom("non_empty", |v| match v {
            JsonValue::String(s) => !s.trim().is_empty(),
            JsonValue::Array(a) => !a.is_empty(),
            JsonValue::Object(o) => !o.is_empty(),
            JsonValue::Null => false,
            _ => true,
        })
    }

    /// String length (in characters) or array length within `min..=max`.
    #[must_use]
    pub fn length_between(min: usize, max: usize) -> Self {
        Self::custom(format!("length_between({min}, {max})"), move |v| {
            let len = match v {
                JsonValue::String(s) => s.chars().count(),
                JsonValue::Array(a) => a.len(),
                _ => return false,
            };
            (min..=max).contains(&len)
        })
    }

    /// Number within `min..=max`.
    #[must_use]
    pub fn range(min: f64, max: f64) -> Self {
        Self::custom(format!("range({min}, {max})"), move |v| {
            v.as_f64().is_some_and(|n| n >= min && n <= max)
        })
    }

    /// Value equals one of `options`.
    #[must_use]
    pub fn one_of(options: Vec<JsonValue>) -> Self {
        Self::custom(format!("one_of({})", options.len()), move |v| options.contains(v))
    }

    /// String matching a regular expression.
    pub fn matches(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(pattern)?;
        Ok(Self::custom(format!("matches({pattern})"), move |v| {
            v.as_str().is_some_and(|s| regex.is_match(s))
        }))
    }

    /// Array whose every element passes `check`.
    #[must_use]
    pub fn each(check: Self) -> Self {
        let description = format!("each({})", check.description);
        Self::custom(description, move |v| {
            v.as_array().is_some_and(|items| items.iter().all(|item| check.test(item)))
        })
    }
}
