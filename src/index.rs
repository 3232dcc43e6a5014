use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::control::Stanza;

/// Resolve `Filename`s starting with `prefix` against `<scheme>://<host>/<root_path>/` instead
/// of the index's own base.
///
/// Some repository families publish a `Packages` file whose paths are relative to a shared
/// root rather than to the location of the index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RootOverride {
    pub prefix: String,
    pub root_path: String,
}

impl RootOverride {
    pub fn new(prefix: &str, root_path: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            root_path: root_path.to_string(),
        }
    }

    /// BigBoss style repositories: `debs2.0/...` lives below `/repofiles/cydia/`.
    pub fn bigboss() -> Self {
        Self::new("debs2.0/", "repofiles/cydia")
    }

    pub fn matches(&self, filename: &str) -> bool {
        let filename = filename.strip_prefix("./").unwrap_or(filename);
        !self.prefix.is_empty() && filename.starts_with(&self.prefix)
    }

    /// Root URL on the same authority as `base`.
    pub fn base(&self, base: &Url) -> Url {
        let mut root = base.clone();
        let path = self.root_path.trim_matches('/');
        if path.is_empty() {
            root.set_path("/");
        } else {
            root.set_path(&format!("/{path}/"));
        }
        root.set_query(None);
        root.set_fragment(None);
        root
    }
}

/// Rules that are always active.
pub fn default_overrides() -> Vec<RootOverride> {
    vec![RootOverride::bigboss()]
}

/// A downloadable file referenced by a package index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    /// `Filename` value as written in the index.
    pub path: String,
    pub url: Url,
}

fn has_scheme(filename: &str) -> bool {
    match filename.split_once("://") {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Resolve a single `Filename` value.
pub fn resolve_filename(
    filename: &str,
    base: &Url,
    overrides: &[RootOverride],
) -> Result<Url, url::ParseError> {
    if has_scheme(filename) {
        return Url::parse(filename);
    }

    match overrides.iter().find(|rule| rule.matches(filename)) {
        Some(rule) => {
            let relative = filename.strip_prefix("./").unwrap_or(filename);
            rule.base(base).join(relative)
        }
        None => base.join(filename),
    }
}

/// Collect the artifacts of a package index, in index order.
///
/// Stanzas without a non-empty `Filename` are skipped, as are repeated references to the same
/// URL.
pub fn build_index(stanzas: &[Stanza], base: &Url, overrides: &[RootOverride]) -> Vec<Artifact> {
    let mut seen = HashSet::new();
    let mut artifacts = Vec::new();

    for stanza in stanzas {
        let filename = match stanza.get("Filename").map(str::trim) {
            Some(filename) if !filename.is_empty() => filename,
            _ => continue,
        };

        let url = match resolve_filename(filename, base, overrides) {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!("skipping unresolvable Filename '{filename}' - {err}");
                continue;
            }
        };

        if seen.insert(url.to_string()) {
            artifacts.push(Artifact {
                path: filename.to_string(),
                url,
            });
        }
    }

    artifacts
}
