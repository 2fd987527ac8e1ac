//! Module manifests and the dependency tree nrfutil reports for them.

use crate::version::DiscriminatedVersion;
use serde::{Deserialize, Serialize};

/// A node in a module's dependency tree.
///
/// Top-level entries of a [`ModuleVersion`] additionally carry a
/// `classification` and a list of [`Plugin`]s; nested entries leave both
/// empty.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    /// Dependency name, e.g. `JlinkARM`.
    pub name: String,
    /// Human readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Installed version, absent when the dependency is missing.
    #[serde(flatten)]
    pub version: Option<DiscriminatedVersion>,
    /// Version the module was built and tested against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<DiscriminatedVersion>,
    /// Classification of a top-level dependency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    /// Nested dependencies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
    /// Plugins of a top-level dependency.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<Plugin>,
}

/// Alias kept for readability where a top-level entry is expected.
pub type TopLevelDependency = Dependency;

/// A versioned plugin hanging off a top-level dependency.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plugin {
    /// Plugin name.
    pub name: String,
    /// Installed plugin version.
    #[serde(flatten)]
    pub version: Option<DiscriminatedVersion>,
    /// Dependencies the plugin pulls in.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
}

/// Manifest a module reports about itself via `--version`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModuleVersion {
    /// Module name, e.g. `nrfutil-device`.
    pub name: String,
    /// Module version string, e.g. `2.1.1`.
    pub version: String,
    /// Build timestamp.
    #[serde(default)]
    pub build_timestamp: Option<String>,
    /// Release classification, e.g. `nrf-external`.
    #[serde(default)]
    pub classification: Option<String>,
    /// Date of the commit the module was built from.
    #[serde(default)]
    pub commit_date: Option<String>,
    /// Hash of the commit the module was built from.
    #[serde(default)]
    pub commit_hash: Option<String>,
    /// Host triple the module was built for.
    #[serde(default)]
    pub host: Option<String>,
    /// Top-level dependencies.
    #[serde(default)]
    pub dependencies: Vec<TopLevelDependency>,
}

/// Find a dependency by name.
///
/// The top-level list is searched first. If nothing matches, the next level
/// is built from every node's own `dependencies` plus the `dependencies` of
/// each of its `plugins`, and the search repeats on that level. The first
/// match in this level-by-level order wins.
pub fn find_dependency<'a>(name: &str, dependencies: &'a [Dependency]) -> Option<&'a Dependency> {
    let mut level: Vec<&'a Dependency> = dependencies.iter().collect();

    while !level.is_empty() {
        if let Some(found) = level.iter().find(|dep| dep.name == name) {
            return Some(*found);
        }

        level = level
            .into_iter()
            .flat_map(|dep| {
                dep.dependencies.iter().chain(
                    dep.plugins
                        .iter()
                        .flat_map(|plugin| plugin.dependencies.iter()),
                )
            })
            .collect();
    }

    None
}
