//! JLink version checks.
//!
//! SEGGER versions look like `JLink_V7.94e`: a tool prefix, a `V`, a
//! `major.minor` pair and an optional patch letter. To compare two of them
//! the letter is turned into a 1-based patch number (`a` = 1, `b` = 2, no
//! letter = 0) and the result is compared as a semantic version.

use crate::dependency::{find_dependency, Dependency, ModuleVersion};
use crate::version::DiscriminatedVersion;
use regex::Regex;
use semver::{Version, VersionReq};
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::OnceLock;
use thiserror::Error;

/// Name of the JLink dependency inside the nrfutil-device manifest.
pub const JLINK_DEPENDENCY: &str = "JlinkARM";

/// Prefix SEGGER puts in front of every reported version.
const JLINK_PREFIX: &str = "JLink_";

/// JLink version each range of nrfutil-device releases was built against.
///
/// Used when the manifest does not tell us what it expects, typically because
/// the module is not installed yet.
const JLINK_FOR_DEVICE_VERSION: &[(&str, &str)] = &[
    ("<2.1.0", "JLink_V7.88j"),
    (">=2.1.0, <2.7.0", "JLink_V7.94e"),
    (">=2.7.0", "JLink_V8.10f"),
];

/// A version string did not match `JLink_V<major>.<minor>[<letter>]`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("JLink version `{0}` does not match the expected format")]
pub struct JlinkVersionError(pub String);

fn version_format() -> &'static Regex {
    static FORMAT: OnceLock<Regex> = OnceLock::new();
    FORMAT.get_or_init(|| {
        Regex::new(r"^V(\d+)\.(\d+)([a-z])?$").expect("JLink version regex is valid")
    })
}

/// Convert a JLink version such as `JLink_V7.94e` or `V7.94e` into a
/// comparable semantic version (`7.94.5`).
pub fn convert_to_semver(version: &str) -> Result<Version, JlinkVersionError> {
    let stripped = version.strip_prefix(JLINK_PREFIX).unwrap_or(version);
    let captures = version_format()
        .captures(stripped)
        .ok_or_else(|| JlinkVersionError(version.to_string()))?;

    let number = |index: usize| -> Result<u64, JlinkVersionError> {
        captures[index]
            .parse()
            .map_err(|_| JlinkVersionError(version.to_string()))
    };
    let patch = captures
        .get(3)
        .and_then(|letter| letter.as_str().bytes().next())
        .map_or(0, |letter| u64::from(letter - b'a') + 1);

    Ok(Version::new(number(1)?, number(2)?, patch))
}

/// Compare two JLink version strings.
pub fn compare_versions(installed: &str, expected: &str) -> Result<Ordering, JlinkVersionError> {
    Ok(convert_to_semver(installed)?.cmp(&convert_to_semver(expected)?))
}

fn as_version_string(version: &DiscriminatedVersion) -> Option<&str> {
    match version {
        DiscriminatedVersion::String(s) => Some(s),
        _ => None,
    }
}

/// True if the installed JLink is older than the one the module expects.
///
/// Returns `false` when either version is missing or not in JLink format;
/// format failures are logged.
pub fn existing_is_older_than_expected(dependency: &Dependency) -> bool {
    let installed = dependency.version.as_ref().and_then(as_version_string);
    let expected = dependency
        .expected_version
        .as_ref()
        .and_then(as_version_string);

    match (installed, expected) {
        (Some(installed), Some(expected)) => is_older(installed, expected),
        _ => false,
    }
}

fn is_older(installed: &str, expected: &str) -> bool {
    match compare_versions(installed, expected) {
        Ok(ordering) => ordering == Ordering::Less,
        Err(e) => {
            tracing::warn!(
                installed = %installed,
                expected = %expected,
                error = %e,
                "Unable to compare JLink versions"
            );
            false
        }
    }
}

/// JLink version the given nrfutil-device release was built against.
pub fn fallback_jlink_version(device_version: &str) -> Option<&'static str> {
    let device_version = Version::parse(device_version).ok()?;
    JLINK_FOR_DEVICE_VERSION
        .iter()
        .find(|(range, _)| {
            VersionReq::parse(range)
                .map(|req| req.matches(&device_version))
                .unwrap_or(false)
        })
        .map(|(_, jlink)| *jlink)
}

/// Strip `JLink_V` for display: `JLink_V7.94e` becomes `7.94e`.
fn display_version(version: &str) -> String {
    let stripped = version.strip_prefix(JLINK_PREFIX).unwrap_or(version);
    stripped.strip_prefix('V').unwrap_or(stripped).to_string()
}

/// Relationship between the installed JLink and the expected one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum JlinkCompatibility {
    /// No JLink installation was reported.
    #[serde(rename = "not installed", rename_all = "camelCase")]
    NotInstalled {
        /// Version the module wants
        required_jlink: String,
        /// Always `none`
        actual_jlink: String,
    },
    /// The installed JLink is older than expected.
    #[serde(rename = "outdated", rename_all = "camelCase")]
    Outdated {
        /// Version the module wants
        required_jlink: String,
        /// Version that is installed
        actual_jlink: String,
    },
    /// The installed JLink is the expected one (or nothing is expected).
    #[serde(rename = "matches expected")]
    MatchesExpected,
    /// The installed JLink is newer than the one that was tested.
    #[serde(rename = "newer than expected", rename_all = "camelCase")]
    NewerThanExpected {
        /// Version the module wants
        required_jlink: String,
        /// Version that is installed
        actual_jlink: String,
    },
}

/// Classify a JLink dependency.
///
/// `dependency` is the `JlinkARM` node of the manifest, if the manifest had
/// one. `device_version` is the nrfutil-device version the application
/// requires; when no JLink is installed and the manifest does not state an
/// expected version, it selects the required version from the compatibility
/// table.
pub fn get_compatibility(
    dependency: Option<&Dependency>,
    device_version: Option<&str>,
) -> JlinkCompatibility {
    let expected = dependency
        .and_then(|d| d.expected_version.as_ref())
        .map(|v| v.to_string());
    let installed = dependency.and_then(|d| d.version.as_ref()).map(|v| v.to_string());

    let Some(installed) = installed else {
        let required = expected.or_else(|| {
            device_version
                .and_then(fallback_jlink_version)
                .map(str::to_string)
        });
        return JlinkCompatibility::NotInstalled {
            required_jlink: required
                .as_deref()
                .map_or_else(|| "unknown".into(), display_version),
            actual_jlink: "none".into(),
        };
    };

    let Some(expected) = expected else {
        return JlinkCompatibility::MatchesExpected;
    };

    if is_older(&installed, &expected) {
        JlinkCompatibility::Outdated {
            required_jlink: display_version(&expected),
            actual_jlink: display_version(&installed),
        }
    } else if installed == expected {
        JlinkCompatibility::MatchesExpected
    } else {
        JlinkCompatibility::NewerThanExpected {
            required_jlink: display_version(&expected),
            actual_jlink: display_version(&installed),
        }
    }
}

/// Classify the JLink installation reported in a module manifest.
pub fn jlink_compatibility(
    module_version: Option<&ModuleVersion>,
    device_version: Option<&str>,
) -> JlinkCompatibility {
    let dependency =
        module_version.and_then(|m| find_dependency(JLINK_DEPENDENCY, &m.dependencies));
    get_compatibility(dependency, device_version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jlink(installed: Option<&str>, expected: Option<&str>) -> Dependency {
        Dependency {
            name: JLINK_DEPENDENCY.into(),
            version: installed.map(|v| DiscriminatedVersion::String(v.into())),
            expected_version: expected.map(|v| DiscriminatedVersion::String(v.into())),
            ..Default::default()
        }
    }

    #[test]
    fn test_convert_to_semver() {
        assert_eq!(convert_to_semver("JLink_V7.94e").unwrap(), Version::new(7, 94, 5));
        assert_eq!(convert_to_semver("V7.80").unwrap(), Version::new(7, 80, 0));
        assert_eq!(convert_to_semver("V8.10a").unwrap(), Version::new(8, 10, 1));
    }

    #[test]
    fn test_convert_rejects_bad_format() {
        assert!(convert_to_semver("7.94e").is_err());
        assert!(convert_to_semver("JLink_V7").is_err());
        assert!(convert_to_semver("JLink_V7.94E").is_err());
        assert!(convert_to_semver("").is_err());
    }

    #[test]
    fn test_patch_letter_is_monotonic() {
        let mut previous = convert_to_semver("V7.94").unwrap();
        for letter in 'a'..='z' {
            let next = convert_to_semver(&format!("V7.94{letter}")).unwrap();
            assert!(next > previous, "{letter} should sort after the previous letter");
            previous = next;
        }
    }

    #[test]
    fn test_existing_is_older() {
        assert!(existing_is_older_than_expected(&jlink(
            Some("JLink_V7.88j"),
            Some("JLink_V7.94e")
        )));
        assert!(!existing_is_older_than_expected(&jlink(
            Some("JLink_V7.94e"),
            Some("JLink_V7.94e")
        )));
        assert!(!existing_is_older_than_expected(&jlink(
            Some("JLink_V8.10a"),
            Some("JLink_V7.94e")
        )));
    }

    #[test]
    fn test_existing_is_older_with_bad_format() {
        assert!(!existing_is_older_than_expected(&jlink(
            Some("something else"),
            Some("JLink_V7.94e")
        )));
        assert!(!existing_is_older_than_expected(&jlink(None, Some("JLink_V7.94e"))));
    }

    #[test]
    fn test_compatibility_without_expected_version() {
        assert_eq!(
            get_compatibility(Some(&jlink(Some("JLink_V7.50a"), None)), None),
            JlinkCompatibility::MatchesExpected
        );
    }

    #[test]
    fn test_compatibility_outdated() {
        assert_eq!(
            get_compatibility(Some(&jlink(Some("JLink_V7.88j"), Some("JLink_V7.94e"))), None),
            JlinkCompatibility::Outdated {
                required_jlink: "7.94e".into(),
                actual_jlink: "7.88j".into(),
            }
        );
    }

    #[test]
    fn test_compatibility_matches_and_newer() {
        assert_eq!(
            get_compatibility(Some(&jlink(Some("JLink_V7.94e"), Some("JLink_V7.94e"))), None),
            JlinkCompatibility::MatchesExpected
        );
        assert_eq!(
            get_compatibility(Some(&jlink(Some("JLink_V8.10f"), Some("JLink_V7.94e"))), None),
            JlinkCompatibility::NewerThanExpected {
                required_jlink: "7.94e".into(),
                actual_jlink: "8.10f".into(),
            }
        );
    }

    #[test]
    fn test_compatibility_not_installed_uses_table() {
        assert_eq!(
            jlink_compatibility(None, Some("2.2.0")),
            JlinkCompatibility::NotInstalled {
                required_jlink: "7.94e".into(),
                actual_jlink: "none".into(),
            }
        );
    }

    #[test]
    fn test_compatibility_not_installed_prefers_expected() {
        assert_eq!(
            get_compatibility(Some(&jlink(None, Some("JLink_V7.80c"))), Some("2.2.0")),
            JlinkCompatibility::NotInstalled {
                required_jlink: "7.80c".into(),
                actual_jlink: "none".into(),
            }
        );
    }

    #[test]
    fn test_fallback_table() {
        assert_eq!(fallback_jlink_version("2.0.3"), Some("JLink_V7.88j"));
        assert_eq!(fallback_jlink_version("2.2.0"), Some("JLink_V7.94e"));
        assert_eq!(fallback_jlink_version("2.7.1"), Some("JLink_V8.10f"));
        assert_eq!(fallback_jlink_version("not-a-version"), None);
    }

    #[test]
    fn test_compatibility_serializes_with_kind_tag() {
        let json = serde_json::to_value(JlinkCompatibility::Outdated {
            required_jlink: "7.94e".into(),
            actual_jlink: "7.88j".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "outdated");
        assert_eq!(json["requiredJlink"], "7.94e");
        assert_eq!(json["actualJlink"], "7.88j");
    }
}
