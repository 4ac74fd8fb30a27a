//! Version gating for patch rules using semver constraints
//!
//! Allows rules and plugins to specify host build ranges like
//! ">=1.0.9016, <1.0.9100" and filters them against the running
//! host version.

use semver::{Version, VersionReq};
use std::fmt;

/// Errors during version gating
#[derive(Debug, Clone)]
pub enum VersionError {
    /// Invalid version string (e.g., "not-a-version")
    InvalidVersion { value: String, source: String },
    /// Invalid version requirement (e.g., ">=bad")
    InvalidRequirement { value: String, source: String },
}

impl fmt::Display for VersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionError::InvalidVersion { value, source } => {
                write!(f, "invalid host version '{}': {}", value, source)
            }
            VersionError::InvalidRequirement { value, source } => {
                write!(f, "invalid version range '{}': {}", value, source)
            }
        }
    }
}

impl std::error::Error for VersionError {}

/// Parse a host build version string.
pub fn parse_host_version(value: &str) -> Result<Version, VersionError> {
    Version::parse(value.trim()).map_err(|e| VersionError::InvalidVersion {
        value: value.to_string(),
        source: e.to_string(),
    })
}

/// Check if a host version falls inside a range string
///
/// # Examples
///
/// ```
/// use bundlemod::version::matches_range;
///
/// assert!(matches_range("1.0.9016", Some(">=1.0.9000")).unwrap());
/// assert!(matches_range("1.0.9016", Some(">=1.0.9000, <1.0.9100")).unwrap());
/// assert!(!matches_range("1.0.8999", Some(">=1.0.9000")).unwrap());
///
/// // None means "apply to all host builds"
/// assert!(matches_range("1.0.9016", None).unwrap());
/// ```
pub fn matches_range(version: &str, range: Option<&str>) -> Result<bool, VersionError> {
    // No range means "apply to all host builds"
    let Some(range_str) = range else {
        return Ok(true);
    };

    // Empty range string means "apply to all host builds"
    let range_str = range_str.trim();
    if range_str.is_empty() {
        return Ok(true);
    }

    let version = parse_host_version(version)?;

    let req = VersionReq::parse(range_str).map_err(|e| VersionError::InvalidRequirement {
        value: range_str.to_string(),
        source: e.to_string(),
    })?;

    Ok(req.matches(&version))
}

/// Range check against an already-parsed host version.
///
/// A missing host version disables gating entirely, so every range
/// matches. This is the offline-analysis mode where no host build is
/// known.
pub fn range_admits(host: Option<&Version>, range: Option<&str>) -> Result<bool, VersionError> {
    let Some(host) = host else {
        return Ok(true);
    };
    let Some(range_str) = range else {
        return Ok(true);
    };
    let range_str = range_str.trim();
    if range_str.is_empty() {
        return Ok(true);
    }

    let req = VersionReq::parse(range_str).map_err(|e| VersionError::InvalidRequirement {
        value: range_str.to_string(),
        source: e.to_string(),
    })?;

    Ok(req.matches(host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_range() {
        assert!(matches_range("1.0.9016", None).unwrap());
        assert!(matches_range("1.0.0", None).unwrap());
        assert!(matches_range("0.1.0", None).unwrap());
    }

    #[test]
    fn test_empty_range() {
        assert!(matches_range("1.0.9016", Some("")).unwrap());
        assert!(matches_range("1.0.0", Some("   ")).unwrap());
    }

    #[test]
    fn test_simple_range() {
        // Exact version
        assert!(matches_range("1.0.9016", Some("=1.0.9016")).unwrap());
        assert!(!matches_range("1.0.9017", Some("=1.0.9016")).unwrap());

        // Greater than or equal
        assert!(matches_range("1.0.9016", Some(">=1.0.9016")).unwrap());
        assert!(matches_range("1.0.9020", Some(">=1.0.9016")).unwrap());
        assert!(!matches_range("1.0.9015", Some(">=1.0.9016")).unwrap());

        // Less than
        assert!(matches_range("1.0.9015", Some("<1.0.9016")).unwrap());
        assert!(!matches_range("1.0.9016", Some("<1.0.9016")).unwrap());
    }

    #[test]
    fn test_compound_range() {
        let range = ">=1.0.9000, <1.0.9100";

        assert!(matches_range("1.0.9000", Some(range)).unwrap());
        assert!(matches_range("1.0.9016", Some(range)).unwrap());
        assert!(matches_range("1.0.9099", Some(range)).unwrap());
        assert!(!matches_range("1.0.8999", Some(range)).unwrap());
        assert!(!matches_range("1.0.9100", Some(range)).unwrap());
        assert!(!matches_range("2.0.0", Some(range)).unwrap());
    }

    #[test]
    fn test_invalid_version() {
        let result = matches_range("not-a-version", Some(">=1.0.9000"));
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), VersionError::InvalidVersion { .. }));
    }

    #[test]
    fn test_invalid_range() {
        let result = matches_range("1.0.9016", Some(">=bad-version"));
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            VersionError::InvalidRequirement { .. }
        ));
    }

    #[test]
    fn test_range_admits_without_host() {
        assert!(range_admits(None, Some(">=9.9.9")).unwrap());
        assert!(range_admits(None, None).unwrap());
    }

    #[test]
    fn test_range_admits_with_host() {
        let host = parse_host_version("1.0.9016").unwrap();
        assert!(range_admits(Some(&host), Some(">=1.0.9000")).unwrap());
        assert!(!range_admits(Some(&host), Some(">=1.0.9100")).unwrap());
        assert!(range_admits(Some(&host), None).unwrap());
        assert!(range_admits(Some(&host), Some("  ")).unwrap());
    }

    #[test]
    fn test_prerelease_versions() {
        let range = ">=1.0.9000-beta.4";
        assert!(matches_range("1.0.9000-beta.4", Some(range)).unwrap());
        assert!(matches_range("1.0.9000-beta.5", Some(range)).unwrap());
        assert!(matches_range("1.0.9000", Some(range)).unwrap());
        assert!(!matches_range("1.0.9000-beta.3", Some(range)).unwrap());
    }
}
