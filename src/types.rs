use std::fmt::Display;

use serde::{Deserialize, Serialize};

use proxmox_schema::{const_regex, ApiStringFormat, Schema, StringSchema};

#[rustfmt::skip]
#[macro_export]
macro_rules! SAFE_ID_REGEX_STR { () => { r"(?:[A-Za-z0-9_][A-Za-z0-9._\-]*)" }; }

const_regex! {
    pub SAFE_ID_REGEX = concat!(r"^", SAFE_ID_REGEX_STR!(), r"$");
    pub REPOSITORY_URL_REGEX = r"^(?i:https?)://[^\s/]+(?:/\S*)?$";
    pub ARCHITECTURE_REGEX = r"^[a-z0-9][a-z0-9\-]*$";
}

pub const SAFE_ID_FORMAT: ApiStringFormat = ApiStringFormat::Pattern(&SAFE_ID_REGEX);

pub const MIRROR_ID_SCHEMA: Schema = StringSchema::new("Mirror name.")
    .format(&SAFE_ID_FORMAT)
    .min_length(2)
    .max_length(32)
    .schema();

pub const CLIENT_ID_SCHEMA: Schema = StringSchema::new("Client identity name.")
    .format(&SAFE_ID_FORMAT)
    .min_length(2)
    .max_length(32)
    .schema();

pub const REPOSITORY_URL_SCHEMA: Schema =
    StringSchema::new("Repository root URL (http or https).")
        .format(&ApiStringFormat::Pattern(&REPOSITORY_URL_REGEX))
        .schema();

pub const ARCHITECTURE_SCHEMA: Schema =
    StringSchema::new("Architecture used for 'binary-<arch>' index paths.")
        .format(&ApiStringFormat::Pattern(&ARCHITECTURE_REGEX))
        .schema();

/// Architecture of jailbroken iOS devices.
pub const DEFAULT_ARCHITECTURE: &str = "iphoneos-arm";

/// Terminal status of a mirror run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MirrorStatus {
    Success,
    Failed,
    Cancelled,
}

impl Display for MirrorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MirrorStatus::Success => write!(f, "success"),
            MirrorStatus::Failed => write!(f, "failed"),
            MirrorStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A file that could not be mirrored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadFailure {
    /// Artifact path or URL, as referenced by the index or listing.
    pub path: String,
    pub error: String,
}
