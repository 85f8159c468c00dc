//! Semantic version parsing and range matching for tag names.
//!
//! Tags are parsed leniently (an optional `v` prefix is accepted, build
//! metadata after `+` is ignored); tags that do not parse are simply not
//! semver candidates. Range strings come from per-image policies and support
//! exact versions, caret (`^1.2`), tilde (`~1.2.3`), wildcards (`1`, `1.2`,
//! `1.x`, `1.2.x`) and comparator lists (`>=1.0, <2.0`).

use std::cmp::Ordering;

use crate::error::CoreError;

/// A parsed semantic version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemVersion {
    /// Major version.
    pub major: u64,
    /// Minor version.
    pub minor: u64,
    /// Patch version.
    pub patch: u64,
    /// Pre-release identifiers, when present (e.g. `rc.1`).
    pub pre: Option<String>,
}

impl SemVersion {
    /// Parses a tag name as a semantic version.
    ///
    /// Returns `None` when the tag is not a three-component version. This is
    /// deliberate: unparseable tags are excluded from semver strategies, not
    /// treated as errors.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        let input = tag.strip_prefix('v').unwrap_or(tag);
        // Build metadata does not participate in precedence.
        let input = input.split('+').next()?;

        let (core, pre) = match input.split_once('-') {
            Some((core, pre)) if !pre.is_empty() => (core, Some(pre.to_string())),
            Some(_) => return None,
            None => (input, None),
        };

        let mut parts = core.split('.');
        let major = parse_numeric(parts.next()?)?;
        let minor = parse_numeric(parts.next()?)?;
        let patch = parse_numeric(parts.next()?)?;
        if parts.next().is_some() {
            return None;
        }

        Some(Self {
            major,
            minor,
            patch,
            pre,
        })
    }

    /// Returns true if this is a pre-release version.
    #[must_use]
    pub const fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }

    const fn release_tuple(&self) -> (u64, u64, u64) {
        (self.major, self.minor, self.patch)
    }
}

impl Ord for SemVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.release_tuple()
            .cmp(&other.release_tuple())
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                // A release ranks above any of its pre-releases.
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => compare_prerelease(a, b),
            })
    }
}

impl PartialOrd for SemVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for SemVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

fn parse_numeric(part: &str) -> Option<u64> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

/// Compares dot-separated pre-release identifier lists per semver precedence.
fn compare_prerelease(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(ln), Ok(rn)) => ln.cmp(&rn),
                    // Numeric identifiers rank below alphanumeric ones.
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Caret,
    Tilde,
}

/// A version with optional minor/patch components, as written in a range.
#[derive(Debug, Clone)]
struct PartialVersion {
    major: u64,
    minor: Option<u64>,
    patch: Option<u64>,
    pre: Option<String>,
}

impl PartialVersion {
    fn parse(input: &str) -> Option<Self> {
        let input = input.strip_prefix('v').unwrap_or(input);
        let (core, pre) = match input.split_once('-') {
            Some((core, pre)) if !pre.is_empty() => (core, Some(pre.to_string())),
            Some(_) => return None,
            None => (input, None),
        };

        let mut major = None;
        let mut minor = None;
        let mut patch = None;
        for (idx, part) in core.split('.').enumerate() {
            if idx > 2 {
                return None;
            }
            let value = if is_wildcard(part) {
                None
            } else {
                Some(parse_numeric(part)?)
            };
            match idx {
                0 => major = Some(value?),
                1 => minor = value,
                _ => patch = value,
            }
        }

        Some(Self {
            major: major?,
            minor,
            patch,
            pre,
        })
    }

    /// Lower bound with missing components filled with zero.
    fn floor(&self) -> SemVersion {
        SemVersion {
            major: self.major,
            minor: self.minor.unwrap_or(0),
            patch: self.patch.unwrap_or(0),
            pre: self.pre.clone(),
        }
    }
}

fn is_wildcard(part: &str) -> bool {
    matches!(part, "x" | "X" | "*")
}

#[derive(Debug, Clone)]
struct Comparator {
    op: Op,
    version: PartialVersion,
}

impl Comparator {
    fn matches(&self, version: &SemVersion) -> bool {
        let floor = self.version.floor();
        match self.op {
            Op::Eq => self.matches_wildcard_eq(version),
            Op::Ne => !self.matches_wildcard_eq(version),
            Op::Gt => version > &floor,
            Op::Ge => version >= &floor,
            Op::Lt => version < &floor,
            Op::Le => version <= &floor,
            Op::Caret => {
                let upper = self.caret_upper();
                version >= &floor && version.release_tuple() < upper
            }
            Op::Tilde => {
                let upper = self.tilde_upper();
                version >= &floor && version.release_tuple() < upper
            }
        }
    }

    /// Equality with wildcard semantics: `1.2` matches every `1.2.x`.
    fn matches_wildcard_eq(&self, version: &SemVersion) -> bool {
        if version.major != self.version.major {
            return false;
        }
        match self.version.minor {
            Some(minor) if version.minor != minor => return false,
            None => return !version.is_prerelease(),
            _ => {}
        }
        match self.version.patch {
            Some(patch) if version.patch != patch => return false,
            None => return !version.is_prerelease(),
            _ => {}
        }
        version.pre == self.version.pre
    }

    fn caret_upper(&self) -> (u64, u64, u64) {
        let v = &self.version;
        if v.major > 0 {
            (v.major + 1, 0, 0)
        } else if v.minor.unwrap_or(0) > 0 {
            (0, v.minor.unwrap_or(0) + 1, 0)
        } else {
            (0, 0, v.patch.unwrap_or(0) + 1)
        }
    }

    fn tilde_upper(&self) -> (u64, u64, u64) {
        let v = &self.version;
        match v.minor {
            Some(minor) => (v.major, minor + 1, 0),
            None => (v.major + 1, 0, 0),
        }
    }

    fn allows_prerelease_of(&self, version: &SemVersion) -> bool {
        self.version.pre.is_some()
            && self.version.major == version.major
            && self.version.minor.unwrap_or(version.minor) == version.minor
            && self.version.patch.unwrap_or(version.patch) == version.patch
    }
}

/// A parsed version range: an AND-list of comparators.
#[derive(Debug, Clone)]
pub struct VersionRange {
    comparators: Vec<Comparator>,
}

impl VersionRange {
    /// Parses a range expression.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConstraint`] when the expression or any
    /// comparator in it cannot be parsed.
    pub fn parse(input: &str) -> Result<Self, CoreError> {
        let mut comparators = Vec::new();
        for token in input
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            comparators.push(Self::parse_comparator(token).ok_or_else(|| {
                CoreError::InvalidConstraint {
                    constraint: input.to_string(),
                    reason: format!("unparseable comparator '{token}'"),
                }
            })?);
        }

        if comparators.is_empty() {
            return Err(CoreError::InvalidConstraint {
                constraint: input.to_string(),
                reason: "empty range".to_string(),
            });
        }

        Ok(Self { comparators })
    }

    fn parse_comparator(token: &str) -> Option<Comparator> {
        let (op, rest) = if let Some(rest) = token.strip_prefix(">=") {
            (Op::Ge, rest)
        } else if let Some(rest) = token.strip_prefix("<=") {
            (Op::Le, rest)
        } else if let Some(rest) = token.strip_prefix("!=") {
            (Op::Ne, rest)
        } else if let Some(rest) = token.strip_prefix('>') {
            (Op::Gt, rest)
        } else if let Some(rest) = token.strip_prefix('<') {
            (Op::Lt, rest)
        } else if let Some(rest) = token.strip_prefix('^') {
            (Op::Caret, rest)
        } else if let Some(rest) = token.strip_prefix('~') {
            (Op::Tilde, rest)
        } else if let Some(rest) = token.strip_prefix('=') {
            (Op::Eq, rest)
        } else {
            (Op::Eq, token)
        };

        let version = PartialVersion::parse(rest)?;
        Some(Comparator { op, version })
    }

    /// Returns true if the version satisfies every comparator.
    ///
    /// Pre-release versions only match when at least one comparator names a
    /// pre-release of the same release tuple.
    #[must_use]
    pub fn matches(&self, version: &SemVersion) -> bool {
        if version.is_prerelease()
            && !self
                .comparators
                .iter()
                .any(|c| c.allows_prerelease_of(version))
        {
            return false;
        }
        self.comparators.iter().all(|c| c.matches(version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(tag: &str) -> SemVersion {
        SemVersion::parse(tag).unwrap()
    }

    #[test]
    fn test_parse_plain_version() {
        let version = v("1.2.3");
        assert_eq!(version.major, 1);
        assert_eq!(version.minor, 2);
        assert_eq!(version.patch, 3);
        assert!(version.pre.is_none());
    }

    #[test]
    fn test_parse_v_prefix_and_prerelease() {
        let version = v("v2.0.1-rc.1");
        assert_eq!(version.major, 2);
        assert_eq!(version.pre.as_deref(), Some("rc.1"));
    }

    #[test]
    fn test_parse_ignores_build_metadata() {
        assert_eq!(v("1.2.3+build.99"), v("1.2.3"));
    }

    #[test]
    fn test_parse_rejects_non_semver() {
        assert!(SemVersion::parse("latest").is_none());
        assert!(SemVersion::parse("1.2").is_none());
        assert!(SemVersion::parse("1.2.3.4").is_none());
        assert!(SemVersion::parse("1.2.x").is_none());
        assert!(SemVersion::parse("").is_none());
    }

    #[test]
    fn test_ordering_is_numeric() {
        assert!(v("1.10.0") > v("1.2.0"));
        assert!(v("2.0.0") > v("1.99.99"));
    }

    #[test]
    fn test_prerelease_ranks_below_release() {
        assert!(v("1.0.0-rc.1") < v("1.0.0"));
        assert!(v("1.0.0-alpha") < v("1.0.0-beta"));
        assert!(v("1.0.0-rc.2") > v("1.0.0-rc.1"));
        assert!(v("1.0.0-alpha.1") > v("1.0.0-alpha"));
    }

    #[test]
    fn test_range_caret() {
        let range = VersionRange::parse("^1.2").unwrap();
        assert!(range.matches(&v("1.2.0")));
        assert!(range.matches(&v("1.9.9")));
        assert!(!range.matches(&v("2.0.0")));
        assert!(!range.matches(&v("1.1.9")));
    }

    #[test]
    fn test_range_caret_zero_major() {
        let range = VersionRange::parse("^0.2.3").unwrap();
        assert!(range.matches(&v("0.2.9")));
        assert!(!range.matches(&v("0.3.0")));
    }

    #[test]
    fn test_range_tilde() {
        let range = VersionRange::parse("~1.2.3").unwrap();
        assert!(range.matches(&v("1.2.10")));
        assert!(!range.matches(&v("1.3.0")));
    }

    #[test]
    fn test_range_wildcard() {
        let range = VersionRange::parse("1.x").unwrap();
        assert!(range.matches(&v("1.0.0")));
        assert!(range.matches(&v("1.42.7")));
        assert!(!range.matches(&v("2.0.0")));
    }

    #[test]
    fn test_range_comparator_list() {
        let range = VersionRange::parse(">=1.0.0, <2.0.0").unwrap();
        assert!(range.matches(&v("1.5.0")));
        assert!(!range.matches(&v("2.0.0")));
        assert!(!range.matches(&v("0.9.0")));
    }

    #[test]
    fn test_range_exact() {
        let range = VersionRange::parse("1.2.3").unwrap();
        assert!(range.matches(&v("1.2.3")));
        assert!(!range.matches(&v("1.2.4")));
    }

    #[test]
    fn test_range_excludes_prereleases_by_default() {
        let range = VersionRange::parse(">=1.0.0").unwrap();
        assert!(!range.matches(&v("1.1.0-rc.1")));
        assert!(range.matches(&v("1.1.0")));
    }

    #[test]
    fn test_range_with_prerelease_admits_same_tuple() {
        let range = VersionRange::parse(">=1.1.0-rc.1").unwrap();
        assert!(range.matches(&v("1.1.0-rc.2")));
    }

    #[test]
    fn test_range_invalid() {
        assert!(VersionRange::parse("").is_err());
        assert!(VersionRange::parse("not-a-version").is_err());
        assert!(VersionRange::parse(">=1.0.0, banana").is_err());
    }
}
