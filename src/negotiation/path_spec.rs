//! Servlet-style path patterns.
//!
//! Four shapes are recognised, from most to least specific:
//!
//! - exact: `/chat` matches only `/chat`;
//! - prefix: `/chat/*` matches `/chat` and everything below it, and `/*`
//!   matches every path;
//! - suffix: `*.ws` matches any path ending in `.ws`, `/dir/*.ws` only those
//!   under `/dir/`;
//! - default: `/` matches every path.
//!
//! Within a shape, a longer pattern is more specific.

use std::{fmt, str::FromStr};

use super::NegotiationError;

/// Shape of a [`PathSpec`], ordered from least to most specific.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathSpecGroup {
    /// The single `/` pattern.
    Default,
    /// `*.ext` or `/dir/*.ext`.
    Suffix,
    /// `/base/*`.
    Prefix,
    /// A literal path.
    Exact,
}

/// A parsed path pattern.
///
/// # Examples
///
/// ```
/// use wiresocket::negotiation::{PathSpec, PathSpecGroup};
///
/// let spec: PathSpec = "/a/*".parse().expect("valid spec");
/// assert_eq!(spec.group(), PathSpecGroup::Prefix);
/// assert!(spec.matches("/a"));
/// assert!(spec.matches("/a/b"));
/// assert!(!spec.matches("/ab"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PathSpec {
    raw: String,
    kind: Kind,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Kind {
    Exact,
    Prefix { base: String },
    Suffix { dir: String, ext: String },
    Default,
}

impl PathSpec {
    /// Parse a pattern.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::InvalidPathSpec`] when the pattern is
    /// empty, holds more than one `*`, uses `*` anywhere but a trailing `/*`
    /// or a `*.ext` final segment, or does not start with `/` or `*.`.
    pub fn parse(spec: &str) -> Result<Self, NegotiationError> {
        let invalid = |reason| NegotiationError::InvalidPathSpec {
            spec: spec.to_owned(),
            reason,
        };
        if spec.is_empty() {
            return Err(invalid("empty"));
        }
        if spec.matches('*').count() > 1 {
            return Err(invalid("more than one wildcard"));
        }
        let kind = if spec == "/" {
            Kind::Default
        } else if let Some(ext) = spec.strip_prefix('*') {
            if !ext.starts_with('.') || ext.contains('/') {
                return Err(invalid("suffix must have the form *.ext"));
            }
            Kind::Suffix {
                dir: String::new(),
                ext: ext.to_owned(),
            }
        } else if !spec.starts_with('/') {
            return Err(invalid("must start with '/' or '*.'"));
        } else if let Some(base) = spec.strip_suffix("/*") {
            Kind::Prefix {
                base: base.to_owned(),
            }
        } else if let Some(star) = spec.find('*') {
            let (dir, rest) = spec.split_at(star);
            let ext = &rest[1..];
            if !dir.ends_with('/') || !ext.starts_with('.') || ext.contains('/') {
                return Err(invalid("wildcard must be a trailing /* or a *.ext segment"));
            }
            Kind::Suffix {
                dir: dir.to_owned(),
                ext: ext.to_owned(),
            }
        } else {
            Kind::Exact
        };
        Ok(Self {
            raw: spec.to_owned(),
            kind,
        })
    }

    /// The pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.raw }

    /// Shape of this pattern.
    #[must_use]
    pub fn group(&self) -> PathSpecGroup {
        match self.kind {
            Kind::Exact => PathSpecGroup::Exact,
            Kind::Prefix { .. } => PathSpecGroup::Prefix,
            Kind::Suffix { .. } => PathSpecGroup::Suffix,
            Kind::Default => PathSpecGroup::Default,
        }
    }

    /// Whether `path` is covered by this pattern.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        match &self.kind {
            Kind::Exact => path == self.raw,
            Kind::Prefix { base } => {
                base.is_empty()
                    || path
                        .strip_prefix(base.as_str())
                        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
            }
            Kind::Suffix { dir, ext } => path
                .strip_prefix(dir.as_str())
                .is_some_and(|rest| rest.len() >= ext.len() && rest.ends_with(ext.as_str())),
            Kind::Default => true,
        }
    }

    /// Sort key for choosing among matching patterns; greater is more
    /// specific.
    #[must_use]
    pub fn specificity(&self) -> (PathSpecGroup, usize) {
        let length = match &self.kind {
            Kind::Prefix { base } => base.len(),
            Kind::Exact | Kind::Suffix { .. } => self.raw.len(),
            Kind::Default => 0,
        };
        (self.group(), length)
    }
}

impl FromStr for PathSpec {
    type Err = NegotiationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl fmt::Display for PathSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.raw) }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{PathSpec, PathSpecGroup};
    use crate::negotiation::NegotiationError;

    fn spec(raw: &str) -> PathSpec { PathSpec::parse(raw).expect("valid spec") }

    #[rstest]
    #[case("/", PathSpecGroup::Default)]
    #[case("/chat", PathSpecGroup::Exact)]
    #[case("/chat/*", PathSpecGroup::Prefix)]
    #[case("/*", PathSpecGroup::Prefix)]
    #[case("*.ws", PathSpecGroup::Suffix)]
    #[case("/*.ws", PathSpecGroup::Suffix)]
    #[case("/rooms/*.ws", PathSpecGroup::Suffix)]
    fn parses_groups(#[case] raw: &str, #[case] group: PathSpecGroup) {
        assert_eq!(spec(raw).group(), group);
    }

    #[rstest]
    #[case("")]
    #[case("chat")]
    #[case("/a/*/b/*")]
    #[case("/a*")]
    #[case("/a/*b")]
    #[case("*ws")]
    #[case("*.ws/x")]
    fn rejects_malformed_specs(#[case] raw: &str) {
        assert!(matches!(
            PathSpec::parse(raw),
            Err(NegotiationError::InvalidPathSpec { .. })
        ));
    }

    #[rstest]
    #[case("/chat", "/chat", true)]
    #[case("/chat", "/chat/", false)]
    #[case("/a/*", "/a", true)]
    #[case("/a/*", "/a/b/c", true)]
    #[case("/a/*", "/ab", false)]
    #[case("/*", "/anything", true)]
    #[case("*.ws", "/x/y.ws", true)]
    #[case("*.ws", "/x/y.wss", false)]
    #[case("/rooms/*.ws", "/rooms/lobby.ws", true)]
    #[case("/rooms/*.ws", "/other/lobby.ws", false)]
    #[case("/", "/whatever", true)]
    fn matches_paths(#[case] raw: &str, #[case] path: &str, #[case] expected: bool) {
        assert_eq!(spec(raw).matches(path), expected);
    }

    #[test]
    fn specificity_orders_shapes_then_length() {
        let exact = spec("/a/b");
        let long_prefix = spec("/a/b/*");
        let short_prefix = spec("/a/*");
        let suffix = spec("*.ws");
        let default = spec("/");
        assert!(exact.specificity() > long_prefix.specificity());
        assert!(long_prefix.specificity() > short_prefix.specificity());
        assert!(short_prefix.specificity() > suffix.specificity());
        assert!(suffix.specificity() > default.specificity());
    }

    #[test]
    fn displays_as_written() {
        assert_eq!(spec("/rooms/*.ws").to_string(), "/rooms/*.ws");
    }
}
