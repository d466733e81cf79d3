//! Plugin metadata and dependency specifications.
//!
//! [`PluginMetadata`] is immutable once built. Dependency specifications
//! are written `[?]<id><op><version>`: a leading `?` marks the dependency
//! optional, the operator is one of `=`, `==`, `>`, `>=`, `<`, `<=`, and
//! an id with no operator suffix accepts any version.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PluginError, PluginResult};
use crate::version::VersionConstraint;

/// A single dependency declaration of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Whether the dependency may be absent without failing resolution.
    pub optional: bool,
    /// The id of the plugin depended upon.
    pub plugin_id: String,
    /// The version predicate the dependency must satisfy.
    pub constraint: VersionConstraint,
}

impl DependencySpec {
    /// Parses a spec from its textual form.
    ///
    /// The id part runs up to the first comparison operator character;
    /// everything after it is parsed as a [`VersionConstraint`].
    pub fn parse(text: &str) -> PluginResult<Self> {
        let (optional, rest) = match text.strip_prefix('?') {
            Some(rest) => (true, rest),
            None => (false, text),
        };

        let split = rest.find(|c| matches!(c, '=' | '>' | '<'));
        let (id, tail) = match split {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };

        if id.is_empty() {
            return Err(PluginError::invalid(format!(
                "dependency spec '{text}' has an empty plugin id"
            )));
        }

        Ok(Self {
            optional,
            plugin_id: id.to_string(),
            constraint: VersionConstraint::parse(tail)?,
        })
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.optional {
            f.write_str("?")?;
        }
        write!(f, "{}{}", self.plugin_id, self.constraint)
    }
}

/// Immutable identity and declaration data of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Unique plugin identifier.
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// Semantic version string.
    pub version: String,
    /// Optional free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional author attribution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Minimum host version this plugin supports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_host_version: Option<String>,
    /// Maximum host version this plugin supports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_host_version: Option<String>,
    /// Declared dependencies on other plugins.
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
}

impl PluginMetadata {
    /// Starts building metadata with the required fields.
    pub fn builder(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> PluginMetadataBuilder {
        PluginMetadataBuilder {
            metadata: Self {
                id: id.into(),
                name: name.into(),
                version: version.into(),
                description: None,
                author: None,
                min_host_version: None,
                max_host_version: None,
                dependencies: Vec::new(),
            },
        }
    }
}

/// Builder for [`PluginMetadata`].
#[derive(Debug)]
pub struct PluginMetadataBuilder {
    metadata: PluginMetadata,
}

impl PluginMetadataBuilder {
    /// Sets the description.
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.metadata.description = Some(text.into());
        self
    }

    /// Sets the author.
    pub fn author(mut self, text: impl Into<String>) -> Self {
        self.metadata.author = Some(text.into());
        self
    }

    /// Sets the minimum supported host version.
    pub fn min_host_version(mut self, version: impl Into<String>) -> Self {
        self.metadata.min_host_version = Some(version.into());
        self
    }

    /// Sets the maximum supported host version.
    pub fn max_host_version(mut self, version: impl Into<String>) -> Self {
        self.metadata.max_host_version = Some(version.into());
        self
    }

    /// Adds a dependency from its textual spec, e.g. `"?storage>=1.2"`.
    pub fn dependency(mut self, spec: &str) -> PluginResult<Self> {
        self.metadata.dependencies.push(DependencySpec::parse(spec)?);
        Ok(self)
    }

    /// Adds an already-parsed dependency.
    pub fn dependency_spec(mut self, spec: DependencySpec) -> Self {
        self.metadata.dependencies.push(spec);
        self
    }

    /// Finishes the build.
    pub fn build(self) -> PluginMetadata {
        self.metadata
    }
}
