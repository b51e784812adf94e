//! Typed path parameters captured by route converters.

use std::fmt;

/// A value produced by a path converter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// Captured by a `str` converter (percent-decoded, never contains `/`).
    Str(String),
    /// Captured by an `int` converter.
    Int(i64),
    /// Captured by a `path` converter (percent-decoded, may contain `/`).
    Path(String),
}

impl ParamValue {
    /// Returns the integer value of an `int` capture.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the text of a `str` or `path` capture.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::Path(s) => Some(s),
            Self::Int(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) | Self::Path(s) => f.write_str(s),
            Self::Int(n) => write!(f, "{n}"),
        }
    }
}

/// Path parameters extracted from the matched route, in pattern order.
///
/// Parameters captured by an outer (mounting) router come before those of the
/// router it delegated to. A name captured at more than one level appears once
/// per level; lookups return the innermost capture.
///
/// # Examples
///
/// ```
/// use wicket::router::{ParamValue, PathParams};
///
/// let mut params = PathParams::new();
/// params.insert("id", ParamValue::Int(7));
/// assert_eq!(params.get_int("id"), Some(7));
/// assert_eq!(params.get("missing"), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    entries: Vec<(String, ParamValue)>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a capture. An earlier capture of the same name is shadowed,
    /// not overwritten, so truncating back to a mark restores it.
    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
        self.entries.push((name.into(), value));
    }

    /// Returns the most recent capture of `name`.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(ParamValue::as_int)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ParamValue::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    // Drops entries pushed after a failed partial match.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }
}
