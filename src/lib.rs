use std::{
    fmt::Display,
    ops::AddAssign,
    path::{Path, PathBuf},
};

use anyhow::{format_err, Error};
use proxmox_sys::fs::{create_path, replace_file, CreateOptions};
use serde::Serialize;
use url::Url;

pub mod client;
pub mod compression;
pub mod config;
pub mod control;
pub mod crawl;
pub mod error;
pub mod handle;
pub mod index;
pub mod locate;
pub mod mirror;
pub mod package;
pub mod release;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

/// Body of a successful fetch.
pub struct FetchResult {
    pub data: Vec<u8>,
    pub fetched: usize,
}

impl FetchResult {
    pub fn data_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Transfer statistics of a run.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Progress {
    pub new: usize,
    pub new_bytes: usize,
    pub reused: usize,
}

impl Progress {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn update(&mut self, fetch_result: &FetchResult) {
        if fetch_result.fetched > 0 {
            self.new += 1;
            self.new_bytes += fetch_result.fetched;
        } else {
            self.reused += 1;
        }
    }

    /// Count a file that was already present locally.
    pub fn reuse(&mut self) {
        self.reused += 1;
    }
}

impl AddAssign for Progress {
    fn add_assign(&mut self, rhs: Self) {
        self.new += rhs.new;
        self.new_bytes += rhs.new_bytes;
        self.reused += rhs.reused;
    }
}

impl Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total = self.new + self.reused;
        let percent = if total == 0 {
            100f64
        } else {
            self.reused as f64 * 100f64 / total as f64
        };

        f.write_fmt(format_args!(
            "{} new files ({}b), re-used {} existing files ({:.2}% re-used)..",
            self.new, self.new_bytes, self.reused, percent
        ))
    }
}

/// Local path of `url` in a mirror below `destination`: `<destination>/<host>/<path>`.
///
/// Empty, `.` and `..` path segments are dropped, so the result never leaves the host
/// directory. Returns `None` for URLs without a host.
pub fn mirror_path(destination: &Path, url: &Url) -> Option<PathBuf> {
    let mut path = destination.to_path_buf();
    path.push(url.host_str()?);

    if let Some(segments) = url.path_segments() {
        for segment in segments {
            if segment.is_empty() || segment == "." || segment == ".." {
                continue;
            }
            path.push(segment);
        }
    }

    Some(path)
}

/// Whether `path` already holds a mirrored (non-empty) file.
pub fn is_mirrored(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

/// Atomically write `data` to `path`, creating parent directories as needed.
pub fn store_file(path: &Path, data: &[u8]) -> Result<(), Error> {
    let parent = path
        .parent()
        .ok_or_else(|| format_err!("{path:?} has no parent directory"))?;
    create_path(parent, None, None)?;
    replace_file(path, data, CreateOptions::default(), false)
}
