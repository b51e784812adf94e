//! Route pattern compiler and path converters.
//!
//! A pattern is literal text interleaved with converters written `<name>` or
//! `<name:kind>`:
//!
//! | Kind   | Matches                                   | Value              |
//! |--------|-------------------------------------------|--------------------|
//! | `str`  | one or more characters other than `/`     | [`ParamValue::Str`]  |
//! | `int`  | one or more ASCII digits                  | [`ParamValue::Int`]  |
//! | `path` | the rest of the path, `/` included        | [`ParamValue::Path`] |
//!
//! Patterns are compiled once, when a route is registered. Matching walks the
//! compiled segments left to right with no backtracking.

use thiserror::Error;

use super::params::{ParamValue, PathParams};

/// Errors raised while compiling a pattern or registering a route.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("unterminated converter in pattern {pattern:?}")]
    UnterminatedConverter { pattern: String },

    #[error("converter without a name in pattern {pattern:?}")]
    EmptyName { pattern: String },

    #[error("invalid converter name {name:?} in pattern {pattern:?}")]
    InvalidName { pattern: String, name: String },

    #[error("unknown converter kind {kind:?} in pattern {pattern:?}")]
    UnknownConverter { pattern: String, kind: String },

    #[error("parameter {name:?} appears twice in pattern {pattern:?}")]
    DuplicateName { pattern: String, name: String },

    #[error("converters must be separated by literal text in pattern {pattern:?}")]
    AdjacentConverters { pattern: String },

    #[error("`path` converter must be the last segment of pattern {pattern:?}")]
    PathNotLast { pattern: String },

    #[error("`path` converter cannot appear in mount pattern {pattern:?}")]
    PathInMount { pattern: String },

    #[error("route {pattern:?} accepts no methods")]
    NoMethods { pattern: String },
}

/// The typed parser applied to one converter capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConverterKind {
    Str,
    Int,
    Path,
}

impl ConverterKind {
    fn from_name(kind: &str) -> Option<Self> {
        match kind {
            "str" => Some(Self::Str),
            "int" => Some(Self::Int),
            "path" => Some(Self::Path),
            _ => None,
        }
    }

    /// Converts captured text into a typed value, or `None` for "no match".
    ///
    /// # Examples
    ///
    /// ```
    /// use wicket::router::{ConverterKind, ParamValue};
    ///
    /// assert_eq!(ConverterKind::Int.convert("21"), Some(ParamValue::Int(21)));
    /// assert_eq!(ConverterKind::Int.convert("007"), Some(ParamValue::Int(7)));
    /// assert_eq!(ConverterKind::Int.convert("abc"), None);
    /// ```
    pub fn convert(self, raw: &str) -> Option<ParamValue> {
        if raw.is_empty() {
            return None;
        }
        match self {
            Self::Str => {
                if raw.contains('/') {
                    return None;
                }
                decode(raw).map(ParamValue::Str)
            }
            Self::Int => {
                if !raw.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                raw.parse().ok().map(ParamValue::Int)
            }
            Self::Path => decode(raw).map(ParamValue::Path),
        }
    }

    // Byte length of the longest prefix of `rest` this kind may claim, given
    // the literal that follows it in the pattern.
    fn span(self, rest: &str, next_literal: Option<&str>) -> usize {
        match self {
            Self::Path => rest.len(),
            Self::Int => rest.bytes().take_while(u8::is_ascii_digit).count(),
            Self::Str => {
                let segment_end = rest.find('/').unwrap_or(rest.len());
                let Some(first) = rest.chars().next() else {
                    return 0;
                };
                let skip = first.len_utf8().min(segment_end);
                match next_literal {
                    Some(lit) if !lit.starts_with('/') => rest[skip..segment_end]
                        .find(lit)
                        .map_or(segment_end, |at| skip + at),
                    _ => segment_end,
                }
            }
        }
    }
}

fn decode(raw: &str) -> Option<String> {
    urlencoding::decode(raw).ok().map(|s| s.into_owned())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Converter { name: String, kind: ConverterKind },
}

/// A compiled route pattern.
///
/// # Examples
///
/// ```
/// use wicket::router::Pattern;
///
/// let pattern = Pattern::parse("/items/<id:int>").unwrap();
/// let params = pattern.matches("/items/21").unwrap();
/// assert_eq!(params.get_int("id"), Some(21));
/// assert!(pattern.matches("/items/abc").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    source: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Compiles `source` into literal and converter segments.
    ///
    /// # Errors
    ///
    /// Returns a [`RouteError`] describing the first syntax problem found.
    pub fn parse(source: &str) -> Result<Self, RouteError> {
        let err_pattern = || source.to_owned();
        let mut segments: Vec<Segment> = Vec::new();
        let mut rest = source;

        while let Some(open) = rest.find('<') {
            let literal = &rest[..open];
            let after = &rest[open + 1..];
            let close = after.find('>').ok_or_else(|| RouteError::UnterminatedConverter {
                pattern: err_pattern(),
            })?;
            let inner = &after[..close];
            let (name, kind) = inner.split_once(':').unwrap_or((inner, "str"));

            if name.is_empty() {
                return Err(RouteError::EmptyName {
                    pattern: err_pattern(),
                });
            }
            if !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
                return Err(RouteError::InvalidName {
                    pattern: err_pattern(),
                    name: name.to_owned(),
                });
            }
            let kind = ConverterKind::from_name(kind).ok_or_else(|| RouteError::UnknownConverter {
                pattern: err_pattern(),
                kind: kind.to_owned(),
            })?;
            let duplicate = segments
                .iter()
                .any(|s| matches!(s, Segment::Converter { name: n, .. } if n == name));
            if duplicate {
                return Err(RouteError::DuplicateName {
                    pattern: err_pattern(),
                    name: name.to_owned(),
                });
            }

            if literal.is_empty() {
                if matches!(segments.last(), Some(Segment::Converter { .. })) {
                    return Err(RouteError::AdjacentConverters {
                        pattern: err_pattern(),
                    });
                }
            } else {
                segments.push(Segment::Literal(literal.to_owned()));
            }
            segments.push(Segment::Converter {
                name: name.to_owned(),
                kind,
            });
            rest = &after[close + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_owned()));
        }

        let path_before_end = segments
            .iter()
            .rev()
            .skip(1)
            .any(|s| matches!(s, Segment::Converter { kind: ConverterKind::Path, .. }));
        if path_before_end {
            return Err(RouteError::PathNotLast {
                pattern: err_pattern(),
            });
        }

        Ok(Self {
            source: source.to_owned(),
            segments,
        })
    }

    /// Returns the pattern text this was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns `true` if the pattern begins with a `/` literal.
    pub fn starts_with_slash(&self) -> bool {
        matches!(self.segments.first(), Some(Segment::Literal(l)) if l.starts_with('/'))
    }

    /// Returns `true` if the pattern ends with a `/` literal.
    pub fn ends_with_slash(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Literal(l)) if l.ends_with('/'))
    }

    /// Returns `true` if the pattern contains a `path` converter.
    pub fn has_path_converter(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Converter { kind: ConverterKind::Path, .. }))
    }

    /// Removes one trailing `/` from the final literal.
    pub(crate) fn strip_trailing_slash(&mut self) {
        if let Some(Segment::Literal(lit)) = self.segments.last_mut() {
            if lit.ends_with('/') {
                lit.pop();
                if lit.is_empty() {
                    self.segments.pop();
                }
            }
        }
    }

    /// Matches the whole of `path`, returning the captured parameters.
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let mut params = PathParams::new();
        self.match_full(path, &mut params).then_some(params)
    }

    /// Matches the whole of `path`, appending captures to `params`.
    ///
    /// On failure `params` is left as it was.
    pub(crate) fn match_full(&self, path: &str, params: &mut PathParams) -> bool {
        let mark = params.len();
        match self.match_prefix(path, params) {
            Some(consumed) if consumed == path.len() => true,
            _ => {
                params.truncate(mark);
                false
            }
        }
    }

    /// Matches a prefix of `path`, returning the number of bytes consumed.
    ///
    /// On failure `params` is left as it was.
    pub(crate) fn match_prefix(&self, path: &str, params: &mut PathParams) -> Option<usize> {
        let mark = params.len();
        let consumed = self.walk(path, params);
        if consumed.is_none() {
            params.truncate(mark);
        }
        consumed
    }

    fn walk(&self, path: &str, params: &mut PathParams) -> Option<usize> {
        let mut pos = 0;
        for (index, segment) in self.segments.iter().enumerate() {
            let rest = &path[pos..];
            match segment {
                Segment::Literal(lit) => {
                    if !rest.starts_with(lit.as_str()) {
                        return None;
                    }
                    pos += lit.len();
                }
                Segment::Converter { name, kind } => {
                    let next_literal = match self.segments.get(index + 1) {
                        Some(Segment::Literal(lit)) => Some(lit.as_str()),
                        _ => None,
                    };
                    let end = kind.span(rest, next_literal);
                    let value = kind.convert(&rest[..end])?;
                    params.insert(name.clone(), value);
                    pos += end;
                }
            }
        }
        Some(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(source: &str) -> Pattern {
        Pattern::parse(source).unwrap()
    }

    // ── Pattern::parse ────────────────────────────────────────────────────────

    #[test]
    fn parse_literal_only() {
        let p = compile("/users/profile");
        assert_eq!(p.segments, vec![Segment::Literal("/users/profile".into())]);
        assert!(p.starts_with_slash());
        assert!(!p.ends_with_slash());
    }

    #[test]
    fn parse_converters() {
        let p = compile("/items/<id:int>/<name>");
        assert_eq!(
            p.segments,
            vec![
                Segment::Literal("/items/".into()),
                Segment::Converter {
                    name: "id".into(),
                    kind: ConverterKind::Int
                },
                Segment::Literal("/".into()),
                Segment::Converter {
                    name: "name".into(),
                    kind: ConverterKind::Str
                },
            ]
        );
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(
            Pattern::parse("/a/<id"),
            Err(RouteError::UnterminatedConverter { .. })
        ));
        assert!(matches!(
            Pattern::parse("/a/<:int>"),
            Err(RouteError::EmptyName { .. })
        ));
        assert!(matches!(
            Pattern::parse("/a/<i-d>"),
            Err(RouteError::InvalidName { .. })
        ));
        assert!(matches!(
            Pattern::parse("/a/<id:float>"),
            Err(RouteError::UnknownConverter { kind, .. }) if kind == "float"
        ));
        assert!(matches!(
            Pattern::parse("/<a>/<a:int>"),
            Err(RouteError::DuplicateName { .. })
        ));
        assert!(matches!(
            Pattern::parse("/<a><b>"),
            Err(RouteError::AdjacentConverters { .. })
        ));
        assert!(matches!(
            Pattern::parse("/<rest:path>/tail"),
            Err(RouteError::PathNotLast { .. })
        ));
    }

    #[test]
    fn strip_trailing_slash() {
        let mut p = compile("/<a:int>/");
        assert!(p.ends_with_slash());
        p.strip_trailing_slash();
        assert!(!p.ends_with_slash());
        assert_eq!(p.segments.len(), 2);

        let mut root = compile("/");
        root.strip_trailing_slash();
        assert!(root.segments.is_empty());
    }

    // ── converters ────────────────────────────────────────────────────────────

    #[test]
    fn int_converter() {
        let p = compile("/items/<id:int>");
        assert_eq!(p.matches("/items/21").unwrap().get_int("id"), Some(21));
        assert_eq!(p.matches("/items/007").unwrap().get_int("id"), Some(7));
        assert!(p.matches("/items/abc").is_none());
        assert!(p.matches("/items/12abc").is_none());
        assert!(p.matches("/items/").is_none());
        assert!(p.matches("/items/-3").is_none());
    }

    #[test]
    fn int_overflow_is_no_match() {
        let p = compile("/<n:int>");
        assert!(p.matches("/99999999999999999999999").is_none());
    }

    #[test]
    fn str_converter_stops_at_separator() {
        let p = compile("/users/<name>");
        assert_eq!(p.matches("/users/alice").unwrap().get_str("name"), Some("alice"));
        assert!(p.matches("/users/alice/extra").is_none());
        assert!(p.matches("/users/").is_none());
    }

    #[test]
    fn str_converter_is_percent_decoded() {
        let p = compile("/users/<name>");
        let params = p.matches("/users/j%C3%BCrgen%20s").unwrap();
        assert_eq!(params.get_str("name"), Some("jürgen s"));
    }

    #[test]
    fn mixed_literal_and_converters_in_one_segment() {
        let p = compile("/<a:int>-<b:int>");
        let params = p.matches("/1-2").unwrap();
        assert_eq!(params.get_int("a"), Some(1));
        assert_eq!(params.get_int("b"), Some(2));

        let p = compile("/files/<stem>.<ext>");
        let params = p.matches("/files/report.tar.gz").unwrap();
        assert_eq!(params.get_str("stem"), Some("report"));
        assert_eq!(params.get_str("ext"), Some("tar.gz"));
    }

    #[test]
    fn path_converter_takes_remainder() {
        let p = compile("/static/<file:path>");
        let params = p.matches("/static/css/site/main.css").unwrap();
        assert_eq!(params.get_str("file"), Some("css/site/main.css"));
        assert!(p.matches("/static/").is_none());
    }

    #[test]
    fn failed_match_leaves_params_untouched() {
        let p = compile("/<a:int>/x");
        let mut params = PathParams::new();
        params.insert("outer", ParamValue::Int(1));
        assert!(!p.match_full("/5/y", &mut params));
        assert_eq!(params.len(), 1);
        assert!(p.match_full("/5/x", &mut params));
        assert_eq!(params.get_int("a"), Some(5));
    }

    #[test]
    fn prefix_match_reports_consumed_bytes() {
        let p = compile("/api");
        let mut params = PathParams::new();
        assert_eq!(p.match_prefix("/api/users", &mut params), Some(4));
        assert_eq!(p.match_prefix("/other", &mut params), None);
    }

    #[test]
    fn matching_is_deterministic() {
        let p = compile("/<a>/<b:int>");
        let first = p.matches("/x/1");
        for _ in 0..10 {
            assert_eq!(p.matches("/x/1"), first);
        }
    }
}
