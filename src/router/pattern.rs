//! Route pattern compilation and segment matching.
//!
//! A pattern such as `/users/:id/files/*` compiles into an ordered list of
//! [`Segment`]s. Empty segments are ignored on both sides, so `/users/` and
//! `/users` are equivalent and `/` is the pattern with no segments.

use std::collections::HashSet;

use percent_encoding::percent_decode_str;
use thiserror::Error;

use crate::context::Params;

/// Name under which a trailing `*` binds the unmatched remainder of the path.
pub const WILDCARD_PARAM: &str = "wildcard";

/// A malformed route pattern, reported at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("route pattern {pattern:?} has a parameter with an empty name")]
    EmptyParamName { pattern: String },

    #[error("route pattern {pattern:?} binds parameter {name:?} more than once")]
    DuplicateParam { pattern: String, name: String },

    #[error("route pattern {pattern:?} has a wildcard that is not the last segment")]
    MisplacedWildcard { pattern: String },

    #[error("mount prefix {pattern:?} may not contain a wildcard")]
    WildcardInPrefix { pattern: String },
}

/// One compiled path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Must equal the request segment exactly (case-sensitive).
    Literal(String),
    /// Matches any non-empty segment and binds it under the given name.
    Param(String),
    /// Matches whatever remains of the path, including nothing.
    Wildcard,
}

/// A compiled route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    source: String,
    segments: Vec<Segment>,
}

/// Result of matching a prefix pattern against the start of a path.
#[derive(Debug)]
pub(crate) struct PrefixMatch {
    pub params: Params,
    /// Number of path segments the prefix consumed.
    pub consumed: usize,
}

impl RoutePattern {
    /// Compile a route pattern string.
    ///
    /// # Errors
    ///
    /// - [`PatternError::EmptyParamName`] for a bare `:` segment.
    /// - [`PatternError::DuplicateParam`] when a name (including the implicit
    ///   [`WILDCARD_PARAM`]) is bound twice.
    /// - [`PatternError::MisplacedWildcard`] when `*` is not the final segment.
    ///
    /// # Examples
    ///
    /// ```
    /// use rexpress::router::{RoutePattern, Segment};
    ///
    /// let pattern = RoutePattern::parse("/params/:one/:two").unwrap();
    /// assert_eq!(pattern.segments()[1], Segment::Param("one".into()));
    /// assert!(RoutePattern::parse("/files/*/tail").is_err());
    /// ```
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let raw: Vec<&str> = split_path(pattern).collect();
        let mut segments = Vec::with_capacity(raw.len());
        let mut names = HashSet::new();

        for (index, part) in raw.iter().enumerate() {
            let segment = if *part == "*" {
                if index + 1 != raw.len() {
                    return Err(PatternError::MisplacedWildcard {
                        pattern: pattern.to_owned(),
                    });
                }
                Segment::Wildcard
            } else if let Some(name) = part.strip_prefix(':') {
                if name.is_empty() {
                    return Err(PatternError::EmptyParamName {
                        pattern: pattern.to_owned(),
                    });
                }
                Segment::Param(name.to_owned())
            } else {
                Segment::Literal((*part).to_owned())
            };

            let bound = match &segment {
                Segment::Param(name) => Some(name.as_str()),
                Segment::Wildcard => Some(WILDCARD_PARAM),
                Segment::Literal(_) => None,
            };
            if let Some(name) = bound {
                if !names.insert(name.to_owned()) {
                    return Err(PatternError::DuplicateParam {
                        pattern: pattern.to_owned(),
                        name: name.to_owned(),
                    });
                }
            }

            segments.push(segment);
        }

        Ok(Self {
            source: pattern.to_owned(),
            segments,
        })
    }

    /// Compile a mount prefix: same grammar as a route, minus the wildcard.
    pub fn parse_prefix(prefix: &str) -> Result<Self, PatternError> {
        let pattern = Self::parse(prefix)?;
        if pattern.segments.contains(&Segment::Wildcard) {
            return Err(PatternError::WildcardInPrefix {
                pattern: prefix.to_owned(),
            });
        }
        Ok(pattern)
    }

    /// The pattern string this was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// The compiled segments, in order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns the names this pattern binds, in declaration order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Wildcard => Some(WILDCARD_PARAM),
            Segment::Literal(_) => None,
        })
    }

    /// Match a whole request path, returning the bound params on success.
    ///
    /// # Examples
    ///
    /// ```
    /// use rexpress::router::RoutePattern;
    ///
    /// let pattern = RoutePattern::parse("/params/:one/:two").unwrap();
    /// let params = pattern.matches("/params/another/1").unwrap();
    /// assert_eq!(params.get("one"), Some("another"));
    /// assert_eq!(params.get("two"), Some("1"));
    /// assert!(pattern.matches("/params/another").is_none());
    /// ```
    pub fn matches(&self, path: &str) -> Option<Params> {
        let parts: Vec<&str> = split_path(path).collect();
        self.match_segments(&parts)
    }

    pub(crate) fn match_segments(&self, parts: &[&str]) -> Option<Params> {
        let mut params = Params::new();

        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Wildcard => {
                    let rest = parts.get(index..).unwrap_or_default();
                    params.insert(WILDCARD_PARAM, decode(&rest.join("/")));
                    return Some(params);
                }
                Segment::Literal(text) => {
                    if parts.get(index) != Some(&text.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.get(index)?;
                    params.insert(name.clone(), decode(value));
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }

    // Match this pattern against the leading segments of `parts`.
    pub(crate) fn match_prefix(&self, parts: &[&str]) -> Option<PrefixMatch> {
        if parts.len() < self.segments.len() {
            return None;
        }
        let params = self.match_segments(&parts[..self.segments.len()])?;
        Some(PrefixMatch {
            params,
            consumed: self.segments.len(),
        })
    }
}

/// Split a path into its non-empty `/`-separated segments.
pub(crate) fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}
