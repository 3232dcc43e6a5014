//! Best-effort mirroring of everything reachable through directory listings.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use lazy_static::lazy_static;
use proxmox_sys::fs::create_path;
use regex::Regex;
use url::Url;

use crate::{
    client::FetchClient, handle::MirrorHandle, is_mirrored, mirror_path, store_file,
    FetchResult, Progress,
};

pub const DEFAULT_MAX_DEPTH: usize = 32;

/// File name listing pages are stored under inside their directory.
pub const LISTING_FILE_NAME: &str = "index.html";

lazy_static! {
    static ref LINK_REGEX: Regex = Regex::new(
        r#"(?i)\b(?:href|src)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'<>]+))"#
    )
    .unwrap();
}

/// Extract link targets from an HTML (or HTML-ish) document, in document order.
///
/// Parent directory markers, fragment-only and query-only links and non-fetchable schemes
/// are left out.
pub fn extract_links(body: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for caps in LINK_REGEX.captures_iter(body) {
        let link = match caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) {
            Some(m) => m.as_str().trim(),
            None => continue,
        };

        if link.is_empty()
            || link == ".."
            || link.starts_with("../")
            || link.starts_with('#')
            || link.starts_with('?')
        {
            continue;
        }

        let lower = link.to_ascii_lowercase();
        if ["mailto:", "javascript:", "data:", "tel:"]
            .iter()
            .any(|scheme| lower.starts_with(scheme))
        {
            continue;
        }

        if seen.insert(link.to_string()) {
            links.push(link.to_string());
        }
    }

    links
}

/// Crawl context of a single crawl tree.
///
/// Owns the visited set, so independent crawls (and independent mirror runs) never share
/// state.
pub struct Crawler<'a, C: FetchClient + ?Sized> {
    client: &'a C,
    handle: &'a MirrorHandle,
    destination: PathBuf,
    scope: Url,
    visited: HashSet<String>,
    handled: HashSet<String>,
    max_depth: usize,
    progress: Progress,
}

impl<'a, C: FetchClient + ?Sized> Crawler<'a, C> {
    /// Crawler mirroring below `destination`, restricted to URLs below `scope`.
    pub fn new(client: &'a C, handle: &'a MirrorHandle, destination: &Path, scope: Url) -> Self {
        Self {
            client,
            handle,
            destination: destination.to_path_buf(),
            scope,
            visited: HashSet::new(),
            handled: HashSet::new(),
            max_depth: DEFAULT_MAX_DEPTH,
            progress: Progress::new(),
        }
    }

    /// URLs that were already taken care of elsewhere and must not be fetched again.
    pub fn skip_urls(mut self, urls: impl IntoIterator<Item = String>) -> Self {
        self.handled.extend(urls);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn visited(&self) -> &HashSet<String> {
        &self.visited
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn into_progress(self) -> Progress {
        self.progress
    }

    /// Mirror everything reachable from the listing at `url`.
    pub fn crawl(&mut self, url: &Url) {
        self.crawl_listing(url, 0);
    }

    fn in_scope(&self, url: &Url) -> bool {
        url.scheme() == self.scope.scheme()
            && url.host_str() == self.scope.host_str()
            && url.port_or_known_default() == self.scope.port_or_known_default()
            && url.path().starts_with(self.scope.path())
    }

    fn crawl_listing(&mut self, url: &Url, depth: usize) {
        if self.handle.is_cancelled() {
            return;
        }
        if !self.visited.insert(url.to_string()) {
            return;
        }
        if depth > self.max_depth {
            self.handle
                .log(format!("Not descending into {url}, too deeply nested"));
            return;
        }

        let res = match self.client.fetch(url.as_str()) {
            Ok(res) => res,
            Err(err) => {
                tracing::debug!("no listing at {url} - {err}");
                return;
            }
        };
        let body = match std::str::from_utf8(res.data_ref()) {
            Ok(body) => body,
            Err(_) => {
                tracing::debug!("{url} is not a text listing");
                return;
            }
        };
        self.save_listing(url, &res);

        for link in extract_links(body) {
            if self.handle.is_cancelled() {
                return;
            }

            let mut target = match url.join(&link) {
                Ok(target) => target,
                Err(err) => {
                    tracing::debug!("ignoring link '{link}' on {url} - {err}");
                    continue;
                }
            };
            target.set_fragment(None);

            if target.query().is_some() || target == *url || !self.in_scope(&target) {
                continue;
            }

            if target.path().ends_with('/') {
                if let Some(dir) = mirror_path(&self.destination, &target) {
                    if let Err(err) = create_path(&dir, None, None) {
                        self.handle.record_failure(target.as_str(), err);
                        continue;
                    }
                }
                self.crawl_listing(&target, depth + 1);
            } else {
                self.mirror_file(&target);
            }
        }
    }

    /// Keep the page served for a directory as `<dir>/index.html`, refreshed on every run.
    fn save_listing(&mut self, url: &Url, res: &FetchResult) {
        let path = match mirror_path(&self.destination, url) {
            Some(dir) => dir.join(LISTING_FILE_NAME),
            None => return,
        };

        match store_file(&path, res.data_ref()) {
            Ok(()) => self.progress.update(res),
            Err(err) => self.handle.record_failure(url.as_str(), err),
        }
    }

    fn mirror_file(&mut self, url: &Url) {
        let key = url.to_string();
        if self.handled.contains(&key) || !self.visited.insert(key) {
            return;
        }

        let path = match mirror_path(&self.destination, url) {
            Some(path) => path,
            None => return,
        };

        self.handle.add_total(1);

        if is_mirrored(&path) {
            tracing::debug!("{url} already mirrored, skipping");
            self.progress.reuse();
            self.handle.file_done();
            return;
        }

        match self.client.fetch(url.as_str()) {
            Ok(res) => match store_file(&path, res.data_ref()) {
                Ok(()) => {
                    self.handle.log(format!("Saved {url}"));
                    self.progress.update(&res);
                }
                Err(err) => self.handle.record_failure(url.as_str(), err),
            },
            Err(err) => self.handle.record_failure(url.as_str(), err),
        }

        self.handle.file_done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{listing, FakeRepository};

    const ROOT: &str = "http://repo.example.com/cydia/";

    fn url(path: &str) -> Url {
        Url::parse(&format!("{ROOT}{path}")).unwrap()
    }

    #[test]
    fn extracts_attribute_references() {
        let body = r##"<a href="debs/">debs</a> <A HREF='icon.png'>x</A>
            <img src=banner.jpg> <a href="../">up</a> <a href="#top">top</a>
            <a href="?C=N;O=D">sort</a> <a href="mailto:dev@example.com">mail</a>
            <a href="debs/">again</a> <link href="style.css" rel="stylesheet">"##;

        assert_eq!(
            extract_links(body),
            ["debs/", "icon.png", "banner.jpg", "style.css"]
        );
    }

    #[test]
    fn terminates_on_cycles() {
        let repo = FakeRepository::new()
            .with_file(ROOT, listing(&["a/"]))
            .with_file(&format!("{ROOT}a/"), listing(&["../cydia/b/", "/cydia/b/"]))
            .with_file(&format!("{ROOT}b/"), listing(&["/cydia/a/", "/cydia/"]));
        let dest = tempfile::tempdir().unwrap();
        let handle = MirrorHandle::new();

        let mut crawler = Crawler::new(&repo, &handle, dest.path(), url(""));
        crawler.crawl(&url(""));

        assert_eq!(repo.requested(&format!("{ROOT}a/")), 1);
        assert_eq!(repo.requested(&format!("{ROOT}b/")), 1);
        assert_eq!(repo.requested(ROOT), 1);
        assert_eq!(crawler.visited().len(), 3);
        assert!(dest.path().join("repo.example.com/cydia/a").is_dir());
        assert!(dest.path().join("repo.example.com/cydia/b").is_dir());
    }

    #[test]
    fn mirrors_files_and_records_failures() {
        let repo = FakeRepository::new()
            .with_file(ROOT, listing(&["icon.png", "debs/", "missing.png"]))
            .with_file(&format!("{ROOT}icon.png"), b"png".to_vec())
            .with_file(&format!("{ROOT}debs/"), listing(&["a.deb"]))
            .with_file(&format!("{ROOT}debs/a.deb"), b"deb".to_vec());
        let dest = tempfile::tempdir().unwrap();
        let handle = MirrorHandle::new();

        let mut crawler = Crawler::new(&repo, &handle, dest.path(), url(""));
        crawler.crawl(&url(""));

        let host = dest.path().join("repo.example.com/cydia");
        assert_eq!(std::fs::read(host.join("icon.png")).unwrap(), b"png");
        assert_eq!(std::fs::read(host.join("debs/a.deb")).unwrap(), b"deb");
        assert!(!host.join("missing.png").exists());

        let failures = handle.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].path, format!("{ROOT}missing.png"));
        assert_eq!(handle.files_total(), 3);
        assert_eq!(handle.files_downloaded(), 3);
        // two files plus two listing pages
        assert_eq!(crawler.progress().new, 4);

        assert_eq!(
            std::fs::read(host.join(LISTING_FILE_NAME)).unwrap(),
            listing(&["icon.png", "debs/", "missing.png"])
        );
        assert_eq!(
            std::fs::read(host.join("debs").join(LISTING_FILE_NAME)).unwrap(),
            listing(&["a.deb"])
        );
    }

    #[test]
    fn skips_existing_and_handled_files() {
        let repo = FakeRepository::new()
            .with_file(ROOT, listing(&["a.deb", "b.deb", "Packages"]))
            .with_file(&format!("{ROOT}a.deb"), b"new".to_vec())
            .with_file(&format!("{ROOT}b.deb"), b"new".to_vec())
            .with_file(&format!("{ROOT}Packages"), b"Package: a\n".to_vec());
        let dest = tempfile::tempdir().unwrap();
        let host = dest.path().join("repo.example.com/cydia");
        store_file(&host.join("a.deb"), b"old").unwrap();
        let handle = MirrorHandle::new();

        let mut crawler = Crawler::new(&repo, &handle, dest.path(), url(""))
            .skip_urls([format!("{ROOT}Packages")]);
        crawler.crawl(&url(""));

        assert_eq!(repo.requested(&format!("{ROOT}a.deb")), 0);
        assert_eq!(repo.requested(&format!("{ROOT}b.deb")), 1);
        assert_eq!(repo.requested(&format!("{ROOT}Packages")), 0);
        assert_eq!(std::fs::read(host.join("a.deb")).unwrap(), b"old");
        assert_eq!(crawler.progress().reused, 1);
    }

    #[test]
    fn stays_within_scope() {
        let repo = FakeRepository::new()
            .with_file(
                ROOT,
                listing(&[
                    "/",
                    "/icons/blank.gif",
                    "http://other.example.com/x.deb",
                    "https://repo.example.com/cydia/tls.deb",
                    "sub/page.html?x=1",
                ]),
            );
        let dest = tempfile::tempdir().unwrap();
        let handle = MirrorHandle::new();

        let mut crawler = Crawler::new(&repo, &handle, dest.path(), url(""));
        crawler.crawl(&url(""));

        assert_eq!(repo.requests(), [ROOT]);
        assert_eq!(handle.files_total(), 0);
    }

    #[test]
    fn binary_bodies_are_leaves() {
        let repo = FakeRepository::new().with_file(ROOT, vec![0xff, 0xfe, 0x00, 0x80]);
        let dest = tempfile::tempdir().unwrap();
        let handle = MirrorHandle::new();

        let mut crawler = Crawler::new(&repo, &handle, dest.path(), url(""));
        crawler.crawl(&url(""));

        assert_eq!(repo.requests().len(), 1);
        assert!(handle.failures().is_empty());
        assert!(!dest
            .path()
            .join("repo.example.com/cydia")
            .join(LISTING_FILE_NAME)
            .exists());
    }

    #[test]
    fn depth_limit() {
        let repo = FakeRepository::new()
            .with_file(ROOT, listing(&["a/"]))
            .with_file(&format!("{ROOT}a/"), listing(&["b/"]))
            .with_file(&format!("{ROOT}a/b/"), listing(&["c.deb"]));
        let dest = tempfile::tempdir().unwrap();
        let handle = MirrorHandle::new();

        let mut crawler = Crawler::new(&repo, &handle, dest.path(), url("")).with_max_depth(1);
        crawler.crawl(&url(""));

        assert_eq!(repo.requested(&format!("{ROOT}a/b/")), 0);
    }

    #[test]
    fn cancellation_stops_crawl() {
        let handle = MirrorHandle::new();
        let repo = FakeRepository::new()
            .with_file(ROOT, listing(&["a.deb", "b.deb", "c.deb"]))
            .with_file(&format!("{ROOT}a.deb"), b"a".to_vec())
            .with_file(&format!("{ROOT}b.deb"), b"b".to_vec())
            .with_file(&format!("{ROOT}c.deb"), b"c".to_vec())
            .cancel_after(".deb", 1, handle.cancellation_token());
        let dest = tempfile::tempdir().unwrap();

        let mut crawler = Crawler::new(&repo, &handle, dest.path(), url(""));
        crawler.crawl(&url(""));

        assert_eq!(repo.requested(&format!("{ROOT}a.deb")), 1);
        assert_eq!(repo.requested(&format!("{ROOT}b.deb")), 0);
    }
}
