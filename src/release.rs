use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SUITE_REGEX: Regex = Regex::new(r"(?m)^Suite:[ \t]*(.*)$").unwrap();
    static ref CODENAME_REGEX: Regex = Regex::new(r"(?m)^Codename:[ \t]*(.*)$").unwrap();
    static ref COMPONENTS_REGEX: Regex = Regex::new(r"(?m)^Components:[ \t]*(.*)$").unwrap();
}

/// Fields of a `Release` file used to derive `dists/` probe locations.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub suite: Option<String>,
    pub codename: Option<String>,
    /// Distinct component names in file order, empty if the field is missing.
    pub components: Vec<String>,
}

fn first_match(regex: &Regex, text: &str) -> Option<String> {
    let value = regex.captures(text)?.get(1)?.as_str().trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

impl ReleaseInfo {
    /// Extract `Suite`, `Codename` and `Components` from raw `Release` text.
    pub fn extract(text: &str) -> Self {
        let mut components: Vec<String> = Vec::new();
        if let Some(value) = first_match(&COMPONENTS_REGEX, text) {
            for token in value.split_whitespace() {
                if !components.iter().any(|c| c == token) {
                    components.push(token.to_string());
                }
            }
        }

        Self {
            suite: first_match(&SUITE_REGEX, text),
            codename: first_match(&CODENAME_REGEX, text),
            components,
        }
    }

    /// Suite and codename, deduplicated, in that order.
    pub fn releases(&self) -> Vec<&str> {
        let mut releases: Vec<&str> = Vec::new();
        for release in [&self.suite, &self.codename].into_iter().flatten() {
            if !releases.contains(&release.as_str()) {
                releases.push(release);
            }
        }
        releases
    }

    /// Components to probe, `main` if the file doesn't list any.
    pub fn effective_components(&self) -> Vec<&str> {
        if self.components.is_empty() {
            vec!["main"]
        } else {
            self.components.iter().map(String::as_str).collect()
        }
    }
}
