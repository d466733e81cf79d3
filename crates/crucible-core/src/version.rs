//! Lenient version ordering and constraint evaluation.
//!
//! Versions are compared segment-wise: the string is split on `.`, the
//! leading decimal-digit run of each segment is parsed as an integer
//! (missing or non-numeric segments count as 0), and the resulting tuples
//! are compared lexicographically. This makes `"1.0"` equal to `"1.0.0"`
//! and `"1.0-SNAPSHOT"` equal to `"1.0"`, while `"1.10"` sorts above
//! `"1.2"`.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PluginError, PluginResult};

/// Parses the leading decimal-digit run of a version segment.
///
/// `"10"` → 10, `"0-SNAPSHOT"` → 0, `"rc1"` → 0, `""` → 0.
fn segment_value(segment: &str) -> u64 {
    let digits: String = segment.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// Compares two version strings under the leading-digit rule.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left: Vec<u64> = a.split('.').map(segment_value).collect();
    let right: Vec<u64> = b.split('.').map(segment_value).collect();
    let len = left.len().max(right.len());

    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Comparison operator of a version constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintOp {
    /// Exact equality (`=` or `==`).
    Eq,
    /// Strictly greater (`>`).
    Gt,
    /// Greater or equal (`>=`).
    Ge,
    /// Strictly less (`<`).
    Lt,
    /// Less or equal (`<=`).
    Le,
}

impl ConstraintOp {
    /// The canonical textual form of this operator.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }
}

impl fmt::Display for ConstraintOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A version predicate applied to a dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionConstraint {
    /// Any version satisfies the dependency.
    Any,
    /// The dependency version must compare against the given version
    /// under the given operator.
    Cmp(ConstraintOp, String),
}

impl VersionConstraint {
    /// Parses the `<op><version>` tail of a dependency spec.
    ///
    /// An empty string means any version. Unknown operators are rejected
    /// as invalid arguments.
    pub fn parse(text: &str) -> PluginResult<Self> {
        if text.is_empty() {
            return Ok(Self::Any);
        }

        // Two-character operators first so ">=" is not read as ">" + "=1.0".
        let (op, rest) = if let Some(rest) = text.strip_prefix(">=") {
            (ConstraintOp::Ge, rest)
        } else if let Some(rest) = text.strip_prefix("<=") {
            (ConstraintOp::Le, rest)
        } else if let Some(rest) = text.strip_prefix("==") {
            (ConstraintOp::Eq, rest)
        } else if let Some(rest) = text.strip_prefix('=') {
            (ConstraintOp::Eq, rest)
        } else if let Some(rest) = text.strip_prefix('>') {
            (ConstraintOp::Gt, rest)
        } else if let Some(rest) = text.strip_prefix('<') {
            (ConstraintOp::Lt, rest)
        } else {
            return Err(PluginError::invalid(format!(
                "unknown version operator in constraint '{text}'"
            )));
        };

        if rest.is_empty() {
            return Err(PluginError::invalid(format!(
                "version constraint '{text}' is missing a version"
            )));
        }

        Ok(Self::Cmp(op, rest.to_string()))
    }

    /// Evaluates this constraint against a concrete version.
    pub fn matches(&self, version: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Cmp(op, wanted) => {
                let ord = compare_versions(version, wanted);
                match op {
                    ConstraintOp::Eq => ord == Ordering::Equal,
                    ConstraintOp::Gt => ord == Ordering::Greater,
                    ConstraintOp::Ge => ord != Ordering::Less,
                    ConstraintOp::Lt => ord == Ordering::Less,
                    ConstraintOp::Le => ord != Ordering::Greater,
                }
            }
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => Ok(()),
            Self::Cmp(op, version) => write!(f, "{op}{version}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_segments_count_as_zero() {
        assert_eq!(compare_versions("1.0", "1.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("1", "1.0.0"), Ordering::Equal);
    }

    #[test]
    fn numeric_not_lexicographic() {
        assert_eq!(compare_versions("1.10", "1.2"), Ordering::Greater);
        assert_eq!(compare_versions("0.9", "0.10"), Ordering::Less);
    }

    #[test]
    fn non_numeric_tails_ignored() {
        assert_eq!(compare_versions("1.0-SNAPSHOT", "1.0"), Ordering::Equal);
        assert_eq!(compare_versions("2.0rc1", "2.0"), Ordering::Equal);
    }

    #[test]
    fn parse_operators() {
        assert_eq!(
            VersionConstraint::parse(">=1.0").unwrap(),
            VersionConstraint::Cmp(ConstraintOp::Ge, "1.0".into())
        );
        assert_eq!(
            VersionConstraint::parse("==2.1").unwrap(),
            VersionConstraint::Cmp(ConstraintOp::Eq, "2.1".into())
        );
        assert_eq!(
            VersionConstraint::parse("=2.1").unwrap(),
            VersionConstraint::Cmp(ConstraintOp::Eq, "2.1".into())
        );
        assert_eq!(VersionConstraint::parse("").unwrap(), VersionConstraint::Any);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(VersionConstraint::parse("~1.0").is_err());
        assert!(VersionConstraint::parse(">=").is_err());
    }

    #[test]
    fn constraint_evaluation() {
        let ge = VersionConstraint::parse(">=1.0.0").unwrap();
        assert!(ge.matches("1.0"));
        assert!(ge.matches("1.2.3"));
        assert!(!ge.matches("0.9.9"));

        let lt = VersionConstraint::parse("<2.0").unwrap();
        assert!(lt.matches("1.99"));
        assert!(!lt.matches("2.0.0"));

        let eq = VersionConstraint::parse("=1.0").unwrap();
        assert!(eq.matches("1.0.0"));
        assert!(!eq.matches("1.0.1"));
    }
}
