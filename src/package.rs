use serde::{Deserialize, Serialize};

use proxmox_schema::api;

use crate::control::Stanza;

#[api(
    properties: {
        depends: {
            type: Array,
            items: {
                type: String,
                description: "Dependency, possibly with alternatives and version constraint.",
            },
        },
        architecture: {
            type: String,
            optional: true,
        },
        description: {
            type: String,
            optional: true,
        },
        filename: {
            type: String,
            optional: true,
        },
    }
)]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// Package entry of a `Packages` index.
pub struct PackageRecord {
    /// Package name.
    pub package: String,
    /// Package version.
    pub version: String,
    /// Entries of the `Depends` field, in order.
    pub depends: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    /// Description, continuation lines joined with newlines.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Artifact path relative to the repository root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl PackageRecord {
    /// Record for `stanza`, `None` if it lacks a `Package` or `Version` field.
    pub fn from_stanza(stanza: &Stanza) -> Option<Self> {
        let package = stanza.get("Package").filter(|value| !value.is_empty())?;
        let version = stanza.get("Version").filter(|value| !value.is_empty())?;

        let depends = stanza
            .get("Depends")
            .map(|depends| {
                depends
                    .split(',')
                    .map(str::trim)
                    .filter(|dep| !dep.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            package: package.to_string(),
            version: version.to_string(),
            depends,
            architecture: stanza.get("Architecture").map(str::to_string),
            description: stanza.get("Description").map(str::to_string),
            filename: stanza.get("Filename").map(str::to_string),
        })
    }

    /// First line of the description.
    pub fn summary(&self) -> &str {
        self.description
            .as_deref()
            .and_then(|description| description.lines().next())
            .unwrap_or("")
    }
}

/// Package records of an index, skipping entries without name or version.
pub fn package_records(stanzas: &[Stanza]) -> Vec<PackageRecord> {
    stanzas.iter().filter_map(PackageRecord::from_stanza).collect()
}
