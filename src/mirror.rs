use std::{
    cmp::max,
    collections::HashSet,
    path::{Path, PathBuf},
};

use anyhow::{bail, Error};
use proxmox_sys::fs::create_path;
use proxmox_time::{epoch_i64, epoch_to_rfc3339_utc};
use serde::Serialize;
use url::Url;
use walkdir::WalkDir;

use crate::{
    client::FetchClient,
    compression::decompress,
    control::{parse_control, Stanza},
    crawl::{Crawler, DEFAULT_MAX_DEPTH},
    error::MirrorError,
    handle::{MirrorHandle, Phase},
    index::{build_index, default_overrides, Artifact, RootOverride},
    is_mirrored,
    locate::{LocateOutcome, Located, Locator},
    mirror_path, store_file,
    types::{DownloadFailure, MirrorStatus, DEFAULT_ARCHITECTURE},
    Progress,
};

/// Name of the run log written to the mirror root.
pub const LOG_FILE_NAME: &str = "download.log";

/// Number of failures listed in a summary before collapsing the rest.
pub const FAILURE_DISPLAY_LIMIT: usize = 20;

/// Settings of a mirror run.
#[derive(Clone, Debug)]
pub struct MirrorOptions {
    /// Architecture used in `binary-<arch>` index paths.
    pub architecture: String,
    /// Root-override rules for package `Filename`s, first match wins.
    pub overrides: Vec<RootOverride>,
    /// Crawl directory listings after the structured download pass.
    pub crawl: bool,
    /// Crawl the repository root if no metadata could be found at all.
    pub crawl_without_metadata: bool,
    pub max_depth: usize,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            architecture: DEFAULT_ARCHITECTURE.to_string(),
            overrides: default_overrides(),
            crawl: true,
            crawl_without_metadata: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogDisplay {
    /// Every logged line.
    Full,
    /// Counts, failures and the final status line.
    Summary,
}

/// Outcome of a mirror run that got past input validation.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MirrorReport {
    pub status: MirrorStatus,
    pub repository: String,
    pub mirror_dir: PathBuf,
    pub files_total: usize,
    pub files_downloaded: usize,
    pub failures: Vec<DownloadFailure>,
    /// Reason the run ended early, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub progress: Progress,
    /// Final status line.
    pub summary: String,
    #[serde(skip)]
    pub log: String,
}

impl MirrorReport {
    /// Failure lines, capped at `limit` entries plus a `+N more` line.
    pub fn failure_lines(&self, limit: usize) -> Vec<String> {
        let mut lines: Vec<String> = self
            .failures
            .iter()
            .take(limit)
            .map(|failure| format!("{} - {}", failure.path, failure.error))
            .collect();
        if self.failures.len() > limit {
            lines.push(format!("+{} more", self.failures.len() - limit));
        }
        lines
    }

    pub fn render(&self, display: LogDisplay) -> String {
        match display {
            LogDisplay::Full => self.log.clone(),
            LogDisplay::Summary => {
                let mut out = format!(
                    "{} of {} files processed, {}\n",
                    self.files_downloaded, self.files_total, self.progress
                );
                for line in self.failure_lines(FAILURE_DISPLAY_LIMIT) {
                    out.push_str(&format!("\t{line}\n"));
                }
                out.push_str(&format!(
                    "Local mirror at {}\n{}\n",
                    self.mirror_dir.display(),
                    self.summary
                ));
                out
            }
        }
    }
}

/// Parse and check a repository root URL. The returned URL always ends with a slash.
pub fn validate_url(repository: &str) -> Result<Url, MirrorError> {
    let repository = repository.trim();
    let invalid = |reason: &str| MirrorError::InvalidUrl {
        url: repository.to_string(),
        reason: reason.to_string(),
    };

    if repository.is_empty() {
        return Err(invalid("URL is empty"));
    }

    let mut url = Url::parse(repository).map_err(|err| invalid(&err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("please enter a URL starting with http:// or https://"));
    }
    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(invalid("URL has no host"));
    }

    url.set_query(None);
    url.set_fragment(None);
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}

/// Root the metadata probes are built from: the validated root, keeping whether the given
/// path ended with a slash. Query and fragment of the input never end up in a probe.
pub fn probe_root(repository: &str, root: &Url) -> String {
    let given = repository.trim();
    let given = given.split(&['?', '#'][..]).next().unwrap_or(given);

    if given.ends_with('/') {
        root.to_string()
    } else {
        root.as_str().trim_end_matches('/').to_string()
    }
}

/// Check that `destination` is an existing directory.
pub fn validate_destination(destination: &Path) -> Result<(), MirrorError> {
    let invalid = |reason: &str| MirrorError::InvalidDestination {
        path: destination.display().to_string(),
        reason: reason.to_string(),
    };

    match std::fs::metadata(destination) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(invalid("not a directory")),
        Err(err) => Err(invalid(&err.to_string())),
    }
}

/// State of one run, owned by the driving thread.
struct MirrorRun<'a, C: FetchClient + ?Sized> {
    client: &'a C,
    handle: &'a MirrorHandle,
    options: &'a MirrorOptions,
    repository: String,
    probe_root: String,
    root: Url,
    destination: PathBuf,
    mirror_dir: PathBuf,
    handled: HashSet<String>,
    progress: Progress,
    fatal: Option<Error>,
}

impl<'a, C: FetchClient + ?Sized> MirrorRun<'a, C> {
    fn execute(&mut self) {
        self.handle.set_phase(Phase::LocatingMetadata);
        let outcome =
            Locator::new(self.client, self.handle, &self.options.architecture).locate(&self.probe_root);

        let crawl_root = match outcome {
            LocateOutcome::Cancelled => None,
            LocateOutcome::NotFound => {
                if self.options.crawl_without_metadata {
                    self.handle.log(format!(
                        "No repository metadata found, crawling {} instead",
                        self.root
                    ));
                    Some(self.root.clone())
                } else {
                    self.fatal = Some(
                        MirrorError::NotFound {
                            root: self.root.to_string(),
                        }
                        .into(),
                    );
                    None
                }
            }
            LocateOutcome::ReleaseOnly(release) => {
                self.save_metadata(&release);
                let root = Url::parse(release.directory_url()).unwrap_or_else(|_| self.root.clone());
                self.handle.log(format!(
                    "Release file found but no package index, crawling {root}"
                ));
                Some(root)
            }
            LocateOutcome::Packages { packages, release } => {
                if let Some(release) = &release {
                    self.save_metadata(release);
                }
                self.save_metadata(&packages);

                match self.build_artifacts(&packages) {
                    Ok(artifacts) => {
                        self.download(&artifacts);
                        if self.options.crawl {
                            Some(self.root.clone())
                        } else {
                            None
                        }
                    }
                    Err(err) => {
                        self.fatal = Some(err);
                        None
                    }
                }
            }
        };

        if let Some(crawl_root) = crawl_root {
            if !self.handle.is_cancelled() {
                self.crawl(crawl_root);
            }
        }
    }

    /// Store a located metadata file in the mirror so the result is a usable repository.
    fn save_metadata(&mut self, located: &Located) {
        self.handled.insert(located.url.clone());

        let path = match Url::parse(&located.url)
            .ok()
            .and_then(|url| mirror_path(&self.destination, &url))
        {
            Some(path) => path,
            None => return,
        };
        if let Err(err) = store_file(&path, &located.data) {
            self.handle.record_failure(&located.url, err);
            return;
        }
        self.progress.update(&crate::FetchResult {
            data: Vec::new(),
            fetched: located.fetched,
        });
    }

    fn build_artifacts(&mut self, packages: &Located) -> Result<Vec<Artifact>, Error> {
        self.handle.set_phase(Phase::ParsingMetadata);
        self.handle.log(format!("Parsing {}..", packages.url));

        let stanzas = read_package_index(packages)?;

        self.handle.set_phase(Phase::BuildingIndex);
        let artifacts = build_index(&stanzas, &self.root, &self.options.overrides);
        self.handle.log(format!(
            "'{}' has {} entries referencing {} files..",
            packages.kind,
            stanzas.len(),
            artifacts.len()
        ));

        if artifacts.is_empty() {
            bail!(MirrorError::Parse {
                file: packages.url.clone(),
                reason: "no package references a file".to_string(),
            });
        }

        Ok(artifacts)
    }

    fn download(&mut self, artifacts: &[Artifact]) {
        self.handle.set_phase(Phase::Downloading);
        self.handle.add_total(artifacts.len());
        self.handled
            .extend(artifacts.iter().map(|artifact| artifact.url.to_string()));

        let total = artifacts.len();
        let mut fetch_progress = Progress::new();

        for (count, artifact) in artifacts.iter().enumerate() {
            if self.handle.is_cancelled() {
                self.handle
                    .log(format!("Cancelled after {count} of {total} files"));
                break;
            }

            self.download_artifact(artifact, count + 1, total, &mut fetch_progress);
            self.handle.file_done();

            if (count + 1) % max(total / 100, 1) == 0 {
                tracing::info!("Progress: {fetch_progress}");
            }
        }

        self.handle.log(format!("Packages: {fetch_progress}"));
        self.progress += fetch_progress;
    }

    fn download_artifact(
        &self,
        artifact: &Artifact,
        number: usize,
        total: usize,
        progress: &mut Progress,
    ) {
        let path = match mirror_path(&self.destination, &artifact.url) {
            Some(path) => path,
            None => {
                self.handle.record_failure(&artifact.path, "URL has no host");
                return;
            }
        };

        if is_mirrored(&path) {
            tracing::debug!("{} already mirrored, skipping", artifact.url);
            progress.reuse();
            return;
        }

        self.handle
            .log(format!("[{number}/{total}] GET {}", artifact.url));

        let res = match self.client.fetch(artifact.url.as_str()) {
            Ok(res) => res,
            Err(err) => {
                self.handle.record_failure(&artifact.path, err);
                return;
            }
        };

        match store_file(&path, res.data_ref()) {
            Ok(()) => progress.update(&res),
            Err(err) => self.handle.record_failure(&artifact.path, err),
        }
    }

    fn crawl(&mut self, scope: Url) {
        self.handle.set_phase(Phase::Crawling);
        self.handle.log(format!("Crawling {scope} for remaining files.."));

        let mut crawler = Crawler::new(self.client, self.handle, &self.destination, scope.clone())
            .skip_urls(self.handled.iter().cloned())
            .with_max_depth(self.options.max_depth);
        crawler.crawl(&scope);

        let crawled = crawler.into_progress();
        self.handle.log(format!("Other files: {crawled}"));
        self.progress += crawled;
    }

    fn finalize(self, started: i64) -> MirrorReport {
        let handle = self.handle;
        let failures = handle.failures();

        let status = if handle.is_cancelled() {
            MirrorStatus::Cancelled
        } else if self.fatal.is_some() || !failures.is_empty() {
            MirrorStatus::Failed
        } else {
            MirrorStatus::Success
        };

        let summary = match (&status, &self.fatal) {
            (MirrorStatus::Cancelled, _) => "Operation cancelled by user.".to_string(),
            (_, Some(err)) => format!("Download failed: {err}"),
            (MirrorStatus::Failed, None) => {
                format!("Download finished with {} errors.", failures.len())
            }
            (MirrorStatus::Success, None) => "Download complete. No errors encountered.".to_string(),
        };

        if let Some(err) = &self.fatal {
            tracing::error!("{err}");
        }

        let (file_count, size) = mirror_stats(&self.mirror_dir);
        handle.log(format!("Stats: {}", self.progress));
        handle.log(format!(
            "All done. Local mirror at {} holds {file_count} files ({size}b)",
            self.mirror_dir.display()
        ));
        if !failures.is_empty() {
            handle.log(format!("{} files could not be mirrored:", failures.len()));
            for failure in &failures {
                handle.log(format!("\t{} - {}", failure.path, failure.error));
            }
        }
        handle.log(summary.clone());

        handle.set_phase(if self.fatal.is_some() && status != MirrorStatus::Cancelled {
            Phase::Error
        } else {
            Phase::Finished(status)
        });

        let started = epoch_to_rfc3339_utc(started).unwrap_or_else(|_| started.to_string());
        let log = handle.log_text();
        let contents = format!("Mirror of {} started {started}\n{log}", self.repository);
        if let Err(err) = store_file(&self.mirror_dir.join(LOG_FILE_NAME), contents.as_bytes()) {
            tracing::warn!("failed to write {LOG_FILE_NAME} - {err}");
        }

        handle.close();

        MirrorReport {
            status,
            repository: self.repository,
            mirror_dir: self.mirror_dir,
            files_total: handle.files_total(),
            files_downloaded: handle.files_downloaded(),
            failures,
            error: self.fatal.map(|err| err.to_string()),
            progress: self.progress,
            summary,
            log,
        }
    }
}

/// Decompress a located package index if needed and split it into stanzas.
pub fn read_package_index(packages: &Located) -> Result<Vec<Stanza>, Error> {
    let data = match packages.kind.compression() {
        Some(compression) => decompress(&packages.data, compression, &packages.url)?,
        None => packages.data.clone(),
    };
    Ok(parse_control(&String::from_utf8_lossy(&data)))
}

/// Number of files and their total size below `dir`.
pub fn mirror_stats(dir: &Path) -> (usize, u64) {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .fold((0, 0), |(count, size), entry| {
            let len = entry.metadata().map(|meta| meta.len()).unwrap_or(0);
            (count + 1, size + len)
        })
}

fn reject<T>(handle: &MirrorHandle, err: MirrorError) -> Result<T, Error> {
    handle.log(err.to_string());
    handle.set_phase(Phase::Error);
    handle.close();
    Err(err.into())
}

/// Mirror the repository at `repository` into `<destination>/<host>/`.
///
/// Operates in phases:
/// - validate the input
/// - locate `Release`/`Packages` metadata
/// - parse the package index and download every referenced file
/// - crawl directory listings for anything not referenced by the index
///
/// Only invalid input is returned as error, everything that goes wrong later ends up in the
/// returned [MirrorReport]. `handle` can be used from other threads to watch progress and to
/// cancel the run.
pub fn mirror_repository<C: FetchClient + ?Sized>(
    client: &C,
    repository: &str,
    destination: &Path,
    options: &MirrorOptions,
    handle: &MirrorHandle,
) -> Result<MirrorReport, Error> {
    let started = epoch_i64();

    handle.set_phase(Phase::Validating);
    handle.log("Validating URL...");
    let root = match validate_url(repository) {
        Ok(root) => root,
        Err(err) => return reject(handle, err),
    };

    handle.log("Validating destination directory...");
    if let Err(err) = validate_destination(destination) {
        return reject(handle, err);
    }

    let host = root.host_str().unwrap_or("repo").to_string();
    let mirror_dir = destination.join(&host);
    handle.log(format!("Creating target directory {}...", mirror_dir.display()));
    if let Err(err) = create_path(&mirror_dir, None, None) {
        let err = MirrorError::InvalidDestination {
            path: mirror_dir.display().to_string(),
            reason: err.to_string(),
        };
        return reject(handle, err);
    }

    let mut run = MirrorRun {
        client,
        handle,
        options,
        repository: repository.trim().to_string(),
        probe_root: probe_root(repository, &root),
        root,
        destination: destination.to_path_buf(),
        mirror_dir,
        handled: HashSet::new(),
        progress: Progress::new(),
        fatal: None,
    };
    run.execute();

    Ok(run.finalize(started))
}
