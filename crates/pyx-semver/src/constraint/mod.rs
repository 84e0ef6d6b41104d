//! Constraint types for version matching

mod bound;
mod operator;
mod range;

use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

pub use bound::Bound;
pub use operator::Operator;
pub use range::VersionRange;

use crate::{Version, VersionError};

lazy_static! {
    static ref OR_SPLIT: Regex = Regex::new(r"\s*\|\|?\s*").unwrap();
    static ref AND_SPLIT: Regex = Regex::new(r"\s*,\s*").unwrap();
    static ref ATOM_REGEX: Regex = Regex::new(
        r"(?P<op>===|==|!=|~=|>=|<=|>|<|\^|~|=)?\s*(?P<version>\*|[vV]?[0-9][^\s,]*)"
    )
    .unwrap();
}

/// A set of versions expressed as a union of ranges.
///
/// An empty union admits nothing; a union holding one unbounded range admits
/// everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionConstraint {
    ranges: Vec<VersionRange>,
}

impl VersionConstraint {
    pub fn any() -> Self {
        VersionConstraint {
            ranges: vec![VersionRange::any()],
        }
    }

    pub fn none() -> Self {
        VersionConstraint { ranges: Vec::new() }
    }

    pub fn exact(version: Version) -> Self {
        VersionConstraint {
            ranges: vec![VersionRange::exact(version)],
        }
    }

    pub fn from_range(range: VersionRange) -> Self {
        if range.is_empty() {
            return Self::none();
        }
        VersionConstraint { ranges: vec![range] }
    }

    /// Parse a constraint string such as `>=1.0,<2.0`, `^1.2 || ~0.9` or `==1.4.*`
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return Ok(Self::any());
        }

        let mut result = Self::none();
        for alternative in OR_SPLIT.split(trimmed) {
            let alternative = alternative.trim();
            if alternative.is_empty() {
                return Err(invalid(input, "empty alternative"));
            }

            let mut current = Self::any();
            for clause in AND_SPLIT.split(alternative) {
                current = current.intersect(&parse_clause(input, clause)?);
            }
            result = result.union(&current);
        }

        Ok(result)
    }

    pub fn ranges(&self) -> &[VersionRange] {
        &self.ranges
    }

    pub fn is_any(&self) -> bool {
        self.ranges.iter().any(VersionRange::is_any)
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// The single version this constraint pins, if any
    pub fn as_exact(&self) -> Option<&Version> {
        match self.ranges.as_slice() {
            [range] => range.as_exact(),
            _ => None,
        }
    }

    pub fn allows(&self, version: &Version) -> bool {
        self.ranges.iter().any(|range| range.allows(version))
    }

    pub fn allows_prereleases(&self) -> bool {
        self.ranges.iter().any(VersionRange::mentions_prerelease)
    }

    pub fn intersect(&self, other: &VersionConstraint) -> VersionConstraint {
        let mut ranges = Vec::new();
        for left in &self.ranges {
            for right in &other.ranges {
                if let Some(range) = left.intersect(right) {
                    if !ranges.contains(&range) {
                        ranges.push(range);
                    }
                }
            }
        }
        VersionConstraint { ranges }
    }

    pub fn union(&self, other: &VersionConstraint) -> VersionConstraint {
        if self.is_any() || other.is_any() {
            return Self::any();
        }

        let mut ranges = self.ranges.clone();
        for range in &other.ranges {
            if !ranges.contains(range) {
                ranges.push(range.clone());
            }
        }
        VersionConstraint { ranges }
    }
}

fn invalid(constraint: &str, reason: &str) -> VersionError {
    VersionError::InvalidConstraint {
        constraint: constraint.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_clause(input: &str, clause: &str) -> Result<VersionConstraint, VersionError> {
    let clause = clause.trim();
    if clause.is_empty() {
        return Err(invalid(input, "empty clause"));
    }

    let mut result = VersionConstraint::any();
    let mut last_end = 0;
    for caps in ATOM_REGEX.captures_iter(clause) {
        let Some(whole) = caps.get(0) else { continue };
        if !clause[last_end..whole.start()].trim().is_empty() {
            return Err(invalid(input, &format!("unexpected \"{}\"", &clause[last_end..whole.start()])));
        }
        last_end = whole.end();

        let operator = caps
            .name("op")
            .map(|m| m.as_str().parse::<Operator>())
            .transpose()?;
        let atom = parse_atom(input, operator, &caps["version"])?;
        result = result.intersect(&atom);
    }

    if last_end == 0 || !clause[last_end..].trim().is_empty() {
        return Err(invalid(input, &format!("unexpected \"{}\"", &clause[last_end..])));
    }

    Ok(result)
}

fn parse_atom(input: &str, operator: Option<Operator>, text: &str) -> Result<VersionConstraint, VersionError> {
    if text == "*" {
        return match operator {
            None | Some(Operator::Equal) => Ok(VersionConstraint::any()),
            Some(Operator::NotEqual) => Ok(VersionConstraint::none()),
            Some(op) => Err(invalid(input, &format!("\"{}\" cannot be combined with *", op))),
        };
    }

    if let Some(prefix) = text.strip_suffix(".*") {
        let base = Version::parse(prefix)?;
        let lower = base.first_devrelease();
        let upper = base.bump(base.precision() - 1).first_devrelease();
        return match operator {
            None | Some(Operator::Equal) => Ok(VersionConstraint::from_range(VersionRange::new(
                Some(Bound::inclusive(lower)),
                Some(Bound::exclusive(upper)),
            ))),
            Some(Operator::NotEqual) => Ok(VersionConstraint {
                ranges: vec![
                    VersionRange::new(None, Some(Bound::exclusive(lower))),
                    VersionRange::new(Some(Bound::inclusive(upper)), None),
                ],
            }),
            Some(op) => Err(invalid(input, &format!("wildcard not allowed with \"{}\"", op))),
        };
    }

    let version = Version::parse(text)?;
    let range = |min: Option<Bound>, max: Option<Bound>| {
        VersionConstraint::from_range(VersionRange::new(min, max))
    };

    let constraint = match operator.unwrap_or(Operator::Equal) {
        Operator::Equal | Operator::ArbitraryEqual => VersionConstraint::exact(version),
        Operator::NotEqual => VersionConstraint {
            ranges: vec![
                VersionRange::new(None, Some(Bound::exclusive(version.clone()))),
                VersionRange::new(Some(Bound::exclusive(version)), None),
            ],
        },
        Operator::LessThan => range(None, Some(Bound::exclusive(version))),
        Operator::LessThanOrEqual => range(None, Some(Bound::inclusive(version))),
        Operator::GreaterThan => range(Some(Bound::exclusive(version)), None),
        Operator::GreaterThanOrEqual => range(Some(Bound::inclusive(version)), None),
        Operator::Compatible => {
            if version.precision() < 2 {
                return Err(invalid(input, "~= requires at least two release segments"));
            }
            let upper = version.bump(version.precision() - 2);
            range(Some(Bound::inclusive(version)), Some(Bound::exclusive(upper)))
        }
        Operator::Caret => {
            let precision = version.precision();
            let index = version
                .release()
                .iter()
                .position(|segment| *segment != 0)
                .unwrap_or(precision - 1)
                .min(precision - 1);
            let upper = version.bump(index);
            range(Some(Bound::inclusive(version)), Some(Bound::exclusive(upper)))
        }
        Operator::Tilde => {
            let upper = if version.precision() == 1 {
                version.next_major()
            } else {
                version.next_minor()
            };
            range(Some(Bound::inclusive(version)), Some(Bound::exclusive(upper)))
        }
    };

    Ok(constraint)
}

impl FromStr for VersionConstraint {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionConstraint::parse(s)
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ranges.is_empty() {
            return write!(f, "<empty>");
        }
        let parts: Vec<String> = self.ranges.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", parts.join(" || "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn c(s: &str) -> VersionConstraint {
        VersionConstraint::parse(s).unwrap()
    }

    #[test]
    fn test_any() {
        assert!(c("*").is_any());
        assert!(c("").is_any());
        assert!(c("*").allows(&v("0.0.1a1")));
    }

    #[test]
    fn test_exact_and_not_equal() {
        assert!(c("==1.2").allows(&v("1.2.0")));
        assert!(c("1.2").allows(&v("1.2")));
        assert!(!c("==1.2").allows(&v("1.2.1")));
        assert!(!c("!=1.2").allows(&v("1.2")));
        assert!(c("!=1.2").allows(&v("1.3")));
        assert_eq!(c("==1.2").as_exact(), Some(&v("1.2")));
    }

    #[test]
    fn test_comparison_clauses() {
        let constraint = c(">=1.0,<2.0");
        assert!(constraint.allows(&v("1.0")));
        assert!(constraint.allows(&v("1.5.0")));
        assert!(!constraint.allows(&v("2.0")));
        assert!(!constraint.allows(&v("2.0a1")));
        assert!(!constraint.allows(&v("0.9")));

        let spaced = c(">= 1.0 < 2.0");
        assert_eq!(spaced, constraint);
    }

    #[test]
    fn test_caret() {
        assert_eq!(c("^1.2.3").to_string(), ">=1.2.3,<2.0.0");
        assert_eq!(c("^0.2.3").to_string(), ">=0.2.3,<0.3.0");
        assert_eq!(c("^0.0.3").to_string(), ">=0.0.3,<0.0.4");
        assert_eq!(c("^0.0").to_string(), ">=0.0,<0.1");
        assert_eq!(c("^0").to_string(), ">=0,<1");
    }

    #[test]
    fn test_tilde_and_compatible() {
        assert_eq!(c("~1.2.3").to_string(), ">=1.2.3,<1.3.0");
        assert_eq!(c("~1").to_string(), ">=1,<2");
        assert_eq!(c("~=1.4.5").to_string(), ">=1.4.5,<1.5.0");
        assert_eq!(c("~=2.2").to_string(), ">=2.2,<3.0");
        assert!(VersionConstraint::parse("~=1").is_err());
    }

    #[test]
    fn test_wildcards() {
        let constraint = c("==1.2.*");
        assert!(constraint.allows(&v("1.2")));
        assert!(constraint.allows(&v("1.2.9")));
        assert!(!constraint.allows(&v("1.3")));

        let excluded = c("!=1.2.*");
        assert!(excluded.allows(&v("1.1.9")));
        assert!(!excluded.allows(&v("1.2.4")));
        assert!(excluded.allows(&v("1.3.0")));
    }

    #[test]
    fn test_union() {
        let constraint = c("^1.0 || ^3.0");
        assert!(constraint.allows(&v("1.4")));
        assert!(!constraint.allows(&v("2.1")));
        assert!(constraint.allows(&v("3.2")));
        assert_eq!(c("<1.0 | >2.0").ranges().len(), 2);
    }

    #[test]
    fn test_intersection() {
        let narrowed = c(">=1.0").intersect(&c("<1.5"));
        assert!(narrowed.allows(&v("1.4")));
        assert!(!narrowed.allows(&v("1.5")));

        let disjoint = c("<1.0").intersect(&c(">=2.0"));
        assert!(disjoint.is_empty());
        assert!(!disjoint.allows(&v("1.5")));
    }

    #[test]
    fn test_prerelease_opt_in() {
        assert!(!c(">=1.0").allows_prereleases());
        assert!(c(">=1.0b1").allows_prereleases());
    }

    #[test]
    fn test_invalid() {
        assert!(VersionConstraint::parse(">=").is_err());
        assert!(VersionConstraint::parse("foo").is_err());
        assert!(VersionConstraint::parse(">=1.0,").is_err());
        assert!(VersionConstraint::parse("<>1.0").is_err());
        assert!(VersionConstraint::parse(">*").is_err());
    }
}
