//! Discovery of repository metadata under differently structured server layouts.
//!
//! Flat repositories keep `Packages` next to the debs, others use a Debian style `dists/`
//! tree, and some ship a `Release` file without any index next to it. The locator tries an
//! ordered list of probes and takes the first one that answers.

use std::fmt::Display;

use crate::{
    client::FetchClient, compression::CompressionType, handle::MirrorHandle,
    release::ReleaseInfo,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetadataKind {
    Release,
    Packages,
    PackagesGz,
    PackagesBz2,
}

impl MetadataKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            MetadataKind::Release => "Release",
            MetadataKind::Packages => "Packages",
            MetadataKind::PackagesGz => "Packages.gz",
            MetadataKind::PackagesBz2 => "Packages.bz2",
        }
    }

    pub fn compression(&self) -> Option<CompressionType> {
        match self {
            MetadataKind::PackagesGz => Some(CompressionType::Gzip),
            MetadataKind::PackagesBz2 => Some(CompressionType::Bzip2),
            MetadataKind::Release | MetadataKind::Packages => None,
        }
    }
}

impl Display for MetadataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Probe order at the repository root.
const ROOT_KINDS: [MetadataKind; 4] = [
    MetadataKind::Release,
    MetadataKind::Packages,
    MetadataKind::PackagesBz2,
    MetadataKind::PackagesGz,
];

/// Probe order below `dists/` subdirectories.
const DISTS_KINDS: [MetadataKind; 3] = [
    MetadataKind::Packages,
    MetadataKind::PackagesGz,
    MetadataKind::PackagesBz2,
];

/// A single candidate location for a metadata file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Probe {
    pub url: String,
    pub kind: MetadataKind,
}

/// A metadata file found by probing.
#[derive(Clone, Debug)]
pub struct Located {
    pub url: String,
    pub kind: MetadataKind,
    pub data: Vec<u8>,
    pub fetched: usize,
}

impl Located {
    /// URL of the directory containing this file, with trailing slash.
    pub fn directory_url(&self) -> &str {
        match self.url.rfind('/') {
            Some(pos) => &self.url[..=pos],
            None => &self.url,
        }
    }
}

#[derive(Debug)]
pub enum LocateOutcome {
    /// A package index, plus the root `Release` file if there was one.
    Packages {
        packages: Located,
        release: Option<Located>,
    },
    /// Only a root `Release` file exists, no index could be found.
    ReleaseOnly(Located),
    NotFound,
    Cancelled,
}

/// Repository root without trailing slashes.
pub fn canonical_root(root: &str) -> &str {
    root.trim().trim_end_matches('/')
}

/// Probes at the repository root, each file with and without an inserted slash.
pub fn root_probes(root: &str) -> Vec<Probe> {
    let root = root.trim();
    let canonical = canonical_root(root);

    let mut probes = Vec::new();
    for kind in ROOT_KINDS {
        let with_slash = format!("{canonical}/{}", kind.file_name());
        let as_given = format!("{root}{}", kind.file_name());

        if as_given != with_slash {
            probes.push(Probe {
                url: with_slash,
                kind,
            });
            probes.push(Probe {
                url: as_given,
                kind,
            });
        } else {
            probes.push(Probe {
                url: with_slash,
                kind,
            });
        }
    }
    probes
}

/// Probes for the package index variants below `dir` (relative, with trailing slash).
pub fn index_probes(root: &str, dir: &str) -> Vec<Probe> {
    let canonical = canonical_root(root);
    DISTS_KINDS
        .iter()
        .map(|kind| Probe {
            url: format!("{canonical}/{dir}{}", kind.file_name()),
            kind: *kind,
        })
        .collect()
}

pub fn legacy_dir(architecture: &str) -> String {
    format!("dists/stable/main/binary-{architecture}/")
}

/// `dists/<release>/<component>/binary-<arch>/` for every release and component, releases
/// in the outer loop.
pub fn release_dirs(release: &ReleaseInfo, architecture: &str) -> Vec<String> {
    let mut dirs = Vec::new();
    for name in release.releases() {
        for component in release.effective_components() {
            dirs.push(format!("dists/{name}/{component}/binary-{architecture}/"));
        }
    }
    dirs
}

/// Fetch each probe in order, returning the first that succeeds.
///
/// Failures only mean "not here". Returns `None` once all probes failed or the run got
/// cancelled.
pub fn first_success<C: FetchClient + ?Sized>(
    client: &C,
    probes: &[Probe],
    handle: &MirrorHandle,
) -> Option<Located> {
    for probe in probes {
        if handle.is_cancelled() {
            return None;
        }

        match client.fetch(&probe.url) {
            Ok(res) => {
                handle.log(format!("Found {} at {}", probe.kind, probe.url));
                return Some(Located {
                    url: probe.url.clone(),
                    kind: probe.kind,
                    fetched: res.fetched,
                    data: res.data,
                });
            }
            Err(err) => {
                tracing::debug!("probe {} failed - {err}", probe.url);
            }
        }
    }
    None
}

/// Finds the metadata of a repository.
pub struct Locator<'a, C: FetchClient + ?Sized> {
    client: &'a C,
    handle: &'a MirrorHandle,
    architecture: &'a str,
}

impl<'a, C: FetchClient + ?Sized> Locator<'a, C> {
    pub fn new(client: &'a C, handle: &'a MirrorHandle, architecture: &'a str) -> Self {
        Self {
            client,
            handle,
            architecture,
        }
    }

    fn cancelled_or(&self, outcome: LocateOutcome) -> LocateOutcome {
        if self.handle.is_cancelled() {
            LocateOutcome::Cancelled
        } else {
            outcome
        }
    }

    pub fn locate(&self, root: &str) -> LocateOutcome {
        let (release_probes, packages_probes): (Vec<Probe>, Vec<Probe>) = root_probes(root)
            .into_iter()
            .partition(|probe| probe.kind == MetadataKind::Release);

        self.handle.log(format!("Probing repository root {root}"));
        let release = first_success(self.client, &release_probes, self.handle);

        if let Some(packages) = first_success(self.client, &packages_probes, self.handle) {
            return LocateOutcome::Packages { packages, release };
        }

        let mut tried = Vec::new();
        if let Some(release) = &release {
            let info = ReleaseInfo::extract(&String::from_utf8_lossy(&release.data));
            self.handle.log(format!(
                "Release file lists suite {:?}, codename {:?}, components {:?}",
                info.suite.as_deref().unwrap_or("-"),
                info.codename.as_deref().unwrap_or("-"),
                info.effective_components(),
            ));

            for dir in release_dirs(&info, self.architecture) {
                tried.extend(index_probes(root, &dir));
            }
            if let Some(packages) = first_success(self.client, &tried, self.handle) {
                return LocateOutcome::Packages {
                    packages,
                    release: Some(release.clone()),
                };
            }
        }

        let legacy: Vec<Probe> = index_probes(root, &legacy_dir(self.architecture))
            .into_iter()
            .filter(|probe| !tried.contains(probe))
            .collect();
        if let Some(packages) = first_success(self.client, &legacy, self.handle) {
            return LocateOutcome::Packages { packages, release };
        }

        match release {
            Some(release) => self.cancelled_or(LocateOutcome::ReleaseOnly(release)),
            None => self.cancelled_or(LocateOutcome::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRepository;

    const ROOT: &str = "http://repo.example.com/cydia/";

    fn locate(repo: &FakeRepository) -> LocateOutcome {
        let handle = MirrorHandle::new();
        Locator::new(repo, &handle, "iphoneos-arm").locate(ROOT)
    }

    #[test]
    fn root_probe_order() {
        let urls: Vec<String> = root_probes("http://h/repo")
            .into_iter()
            .map(|p| p.url)
            .collect();
        assert_eq!(
            urls,
            [
                "http://h/repo/Release",
                "http://h/repoRelease",
                "http://h/repo/Packages",
                "http://h/repoPackages",
                "http://h/repo/Packages.bz2",
                "http://h/repoPackages.bz2",
                "http://h/repo/Packages.gz",
                "http://h/repoPackages.gz",
            ]
        );

        // identical variants collapse
        assert_eq!(root_probes("http://h/repo/").len(), 4);
    }

    #[test]
    fn root_packages_wins_over_dists() {
        let repo = FakeRepository::new()
            .with_file(&format!("{ROOT}Packages.gz"), b"gz".to_vec())
            .with_file(
                &format!("{ROOT}dists/stable/main/binary-iphoneos-arm/Packages"),
                b"Package: a\n".to_vec(),
            );

        match locate(&repo) {
            LocateOutcome::Packages { packages, release } => {
                assert_eq!(packages.url, format!("{ROOT}Packages.gz"));
                assert_eq!(packages.kind, MetadataKind::PackagesGz);
                assert!(release.is_none());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn finds_files_appended_to_root_without_slash() {
        let root = "http://repo.example.com/cydia";
        let repo = FakeRepository::new()
            .with_file("http://repo.example.com/cydiaRelease", b"Suite: stable\n".to_vec())
            .with_file("http://repo.example.com/cydiaPackages", b"Package: a\n".to_vec());
        let handle = MirrorHandle::new();

        match Locator::new(&repo, &handle, "iphoneos-arm").locate(root) {
            LocateOutcome::Packages { packages, release } => {
                assert_eq!(packages.url, "http://repo.example.com/cydiaPackages");
                assert_eq!(packages.kind, MetadataKind::Packages);
                assert_eq!(
                    release.map(|release| release.url).as_deref(),
                    Some("http://repo.example.com/cydiaRelease")
                );
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let requests = repo.requests();
        assert_eq!(requests[0], "http://repo.example.com/cydia/Release");
        assert_eq!(requests[1], "http://repo.example.com/cydiaRelease");
        assert_eq!(repo.requested("http://repo.example.com/cydia/Packages"), 1);
    }

    #[test]
    fn bz2_is_probed_before_gz_at_root() {
        let repo = FakeRepository::new()
            .with_file(&format!("{ROOT}Packages.gz"), b"gz".to_vec())
            .with_file(&format!("{ROOT}Packages.bz2"), b"bz2".to_vec());

        match locate(&repo) {
            LocateOutcome::Packages { packages, .. } => {
                assert_eq!(packages.kind, MetadataKind::PackagesBz2)
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn release_driven_probe_order() {
        let repo = FakeRepository::new().with_file(
            &format!("{ROOT}Release"),
            b"Suite: stable\nComponents: main tweaks\n".to_vec(),
        );

        assert!(matches!(locate(&repo), LocateOutcome::ReleaseOnly(_)));

        let dists: Vec<String> = repo
            .requests()
            .into_iter()
            .filter(|url| url.contains("/dists/"))
            .collect();
        let base = format!("{ROOT}dists/stable");
        assert_eq!(
            dists,
            [
                format!("{base}/main/binary-iphoneos-arm/Packages"),
                format!("{base}/main/binary-iphoneos-arm/Packages.gz"),
                format!("{base}/main/binary-iphoneos-arm/Packages.bz2"),
                format!("{base}/tweaks/binary-iphoneos-arm/Packages"),
                format!("{base}/tweaks/binary-iphoneos-arm/Packages.gz"),
                format!("{base}/tweaks/binary-iphoneos-arm/Packages.bz2"),
            ]
        );
    }

    #[test]
    fn release_codename_and_legacy_fallback() {
        let legacy = format!("{ROOT}dists/stable/main/binary-iphoneos-arm/Packages.bz2");
        let repo = FakeRepository::new()
            .with_file(
                &format!("{ROOT}Release"),
                b"Suite: ios\nCodename: ios\nComponents: extra\n".to_vec(),
            )
            .with_file(&legacy, b"bz2".to_vec());

        match locate(&repo) {
            LocateOutcome::Packages { packages, release } => {
                assert_eq!(packages.url, legacy);
                assert!(release.is_some());
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let requests = repo.requests();
        let derived = requests
            .iter()
            .position(|url| url.contains("dists/ios/extra/binary-iphoneos-arm/Packages.bz2"))
            .unwrap();
        let legacy_first = requests
            .iter()
            .position(|url| url.contains("dists/stable/main/binary-iphoneos-arm/Packages"))
            .unwrap();
        assert!(derived < legacy_first);
        assert!(!requests.iter().any(|url| url.contains("dists/ios/main")));
    }

    #[test]
    fn release_dirs_default_to_main() {
        let info = ReleaseInfo::extract("Suite: stable\nCodename: rolling\n");
        assert_eq!(
            release_dirs(&info, "iphoneos-arm64"),
            [
                "dists/stable/main/binary-iphoneos-arm64/",
                "dists/rolling/main/binary-iphoneos-arm64/",
            ]
        );
    }

    #[test]
    fn legacy_probes_without_release() {
        let repo = FakeRepository::new().with_file(
            &format!("{ROOT}dists/stable/main/binary-iphoneos-arm/Packages.gz"),
            b"gz".to_vec(),
        );

        match locate(&repo) {
            LocateOutcome::Packages { packages, release } => {
                assert_eq!(packages.kind, MetadataKind::PackagesGz);
                assert_eq!(
                    packages.directory_url(),
                    format!("{ROOT}dists/stable/main/binary-iphoneos-arm/")
                );
                assert!(release.is_none());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn nothing_found() {
        let repo = FakeRepository::new();
        assert!(matches!(locate(&repo), LocateOutcome::NotFound));
        // 4 root probes (root has a trailing slash) + 3 legacy probes
        assert_eq!(repo.requests().len(), 7);
    }

    #[test]
    fn cancellation_stops_probing() {
        let repo = FakeRepository::new().with_file(&format!("{ROOT}Packages"), b"x".to_vec());
        let handle = MirrorHandle::new();
        handle.cancel();

        let outcome = Locator::new(&repo, &handle, "iphoneos-arm").locate(ROOT);
        assert!(matches!(outcome, LocateOutcome::Cancelled));
        assert!(repo.requests().is_empty());
    }
}
