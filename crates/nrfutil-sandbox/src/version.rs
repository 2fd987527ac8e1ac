//! Version encodings reported by nrfutil modules and their dependencies.
//!
//! nrfutil tags every version with a `versionFormat` field and carries the
//! value in `version`:
//!
//! ```text
//! {"versionFormat": "incremental", "version": 7}
//! {"versionFormat": "semantic",    "version": {"major": 2, "minor": 1, "patch": 0}}
//! {"versionFormat": "string",      "version": "JLink_V7.94e"}
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// A semantic version as nrfutil reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticVersion {
    /// Major component.
    pub major: u64,
    /// Minor component.
    pub minor: u64,
    /// Patch component.
    pub patch: u64,
    /// Numeric pre-release identifier.
    #[serde(
        rename = "semverPreNumeric",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub pre_numeric: Option<u64>,
    /// Alphanumeric pre-release identifier.
    #[serde(
        rename = "semverPreAlphaNumeric",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub pre_alpha_numeric: Option<String>,
    /// Numeric build metadata.
    #[serde(
        rename = "semverMetadataNumeric",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub metadata_numeric: Option<u64>,
    /// Alphanumeric build metadata.
    #[serde(
        rename = "semverMetadataAlphaNumeric",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub metadata_alpha_numeric: Option<String>,
}

impl SemanticVersion {
    /// Create a plain `major.minor.patch` version.
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre_numeric: None,
            pre_alpha_numeric: None,
            metadata_numeric: None,
            metadata_alpha_numeric: None,
        }
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;

        let pre = join_identifiers(self.pre_alpha_numeric.as_deref(), self.pre_numeric);
        if !pre.is_empty() {
            write!(f, "-{pre}")?;
        }
        let metadata = join_identifiers(
            self.metadata_alpha_numeric.as_deref(),
            self.metadata_numeric,
        );
        if !metadata.is_empty() {
            write!(f, "+{metadata}")?;
        }
        Ok(())
    }
}

fn join_identifiers(alpha: Option<&str>, numeric: Option<u64>) -> String {
    match (alpha, numeric) {
        (Some(a), Some(n)) => format!("{a}.{n}"),
        (Some(a), None) => a.to_string(),
        (None, Some(n)) => n.to_string(),
        (None, None) => String::new(),
    }
}

/// A version tagged with the encoding it uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "versionFormat", content = "version", rename_all = "lowercase")]
pub enum DiscriminatedVersion {
    /// Monotonic build number.
    Incremental(u64),
    /// `major.minor.patch` with optional pre-release/metadata.
    Semantic(SemanticVersion),
    /// Opaque vendor string, e.g. `JLink_V7.94e`.
    String(String),
}

impl DiscriminatedVersion {
    /// True for [`DiscriminatedVersion::Semantic`].
    pub fn is_semantic(&self) -> bool {
        matches!(self, Self::Semantic(_))
    }

    /// True for [`DiscriminatedVersion::Incremental`].
    pub fn is_incremental(&self) -> bool {
        matches!(self, Self::Incremental(_))
    }

    /// True for [`DiscriminatedVersion::String`].
    pub fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }
}

impl fmt::Display for DiscriminatedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incremental(n) => write!(f, "{n}"),
            Self::Semantic(v) => write!(f, "{v}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// Render a version for display.
pub fn version_to_string(version: &DiscriminatedVersion) -> String {
    version.to_string()
}

/// Render an optional version, using `Unknown` when it is absent.
pub fn describe_version(version: Option<&DiscriminatedVersion>) -> String {
    version.map_or_else(|| "Unknown".to_string(), version_to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_version_to_string() {
        assert_eq!(
            version_to_string(&DiscriminatedVersion::Incremental(42)),
            "42"
        );
        assert_eq!(
            version_to_string(&DiscriminatedVersion::Semantic(SemanticVersion::new(2, 1, 0))),
            "2.1.0"
        );
        assert_eq!(
            version_to_string(&DiscriminatedVersion::String("JLink_V7.94e".into())),
            "JLink_V7.94e"
        );
    }

    #[test]
    fn test_semantic_with_pre_and_metadata() {
        let v = SemanticVersion {
            pre_alpha_numeric: Some("alpha".into()),
            pre_numeric: Some(1),
            metadata_numeric: Some(7),
            ..SemanticVersion::new(1, 2, 3)
        };
        assert_eq!(v.to_string(), "1.2.3-alpha.1+7");
    }

    #[test]
    fn test_describe_missing_version() {
        assert_eq!(describe_version(None), "Unknown");
    }

    #[test]
    fn test_deserialize_tagged_shapes() {
        let semantic: DiscriminatedVersion = serde_json::from_value(json!({
            "versionFormat": "semantic",
            "version": {"major": 0, "minor": 17, "patch": 2, "semverPreNumeric": 3}
        }))
        .unwrap();
        assert!(semantic.is_semantic());
        assert_eq!(semantic.to_string(), "0.17.2-3");

        let string: DiscriminatedVersion = serde_json::from_value(json!({
            "versionFormat": "string",
            "version": "JLink_V7.88j"
        }))
        .unwrap();
        assert!(string.is_string());
        assert!(!string.is_incremental());

        let incremental: DiscriminatedVersion = serde_json::from_value(json!({
            "versionFormat": "incremental",
            "version": 3
        }))
        .unwrap();
        assert!(incremental.is_incremental());
    }

    #[test]
    fn test_tag_mismatch_is_rejected() {
        let result: Result<DiscriminatedVersion, _> = serde_json::from_value(json!({
            "versionFormat": "incremental",
            "version": "not a number"
        }));
        assert!(result.is_err());
    }
}
