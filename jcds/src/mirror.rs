//! Mirroring Jamf packages into a local directory.
//!
//! A sync pass happens in two phases. [`plan`] compares the packages listed by Jamf against the
//! contents of the mirror directory and decides which files to download and which to delete.
//! [`apply`] then carries out the plan. Downloads are written to a hidden part file next to their
//! destination and only renamed into place once complete (and verified, if Jamf knows the digest
//! of the file), so a package's file is never observed half-written.

use crate::{
    digest::{md5_file, Md5},
    jamf::{is_mirrorable, Jamf, Package},
};
use anyhow::Error;
use async_std::{fs, path::Path as AsyncPath};
use clap::{builder::BoolishValueParser, ArgAction, Args};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashSet};
use std::fmt::{self, Display, Formatter};
use std::io::ErrorKind;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use strum::Display;

/// Suffix of the hidden files that in-progress downloads are written to.
const PART_SUFFIX: &str = ".jcdssync-part";

const DEFAULT_CONCURRENCY: NonZeroUsize = match NonZeroUsize::new(2) {
    Some(n) => n,
    None => unreachable!(),
};

/// Options for the mirror directory.
#[derive(Clone, Debug, Args)]
#[group(id = "mirror")]
pub struct Options {
    /// The directory to mirror packages into.
    #[clap(
        short,
        long,
        env = "JCDS_SYNC_DIR",
        value_name = "DIR",
        default_value = "/packages"
    )]
    pub dir: PathBuf,

    /// Maximum number of files to hash or download at once.
    #[clap(long, env = "JCDS_SYNC_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: NonZeroUsize,

    /// Only log what would change, without touching the mirror directory.
    #[clap(
        long,
        env = "JCDS_SYNC_DRY_RUN",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub dry_run: bool,
}

impl Options {
    /// Options for mirroring into `dir`, with everything else set to its default.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            concurrency: DEFAULT_CONCURRENCY,
            dry_run: false,
        }
    }
}

/// Why a file needs to be downloaded.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum Reason {
    /// There is no local copy of the file.
    New,
    /// The local copy does not match the digest reported by Jamf.
    Changed,
    /// The local copy exists but could not be read.
    Unverified,
}

/// A file to download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Download {
    pub file_name: String,
    /// Name of the package the file belongs to.
    pub package: String,
    /// Expected digest of the downloaded file, if Jamf knows it.
    pub md5: Option<Md5>,
    pub reason: Reason,
}

/// The changes needed to bring the mirror directory up to date.
#[derive(Clone, Debug, Default)]
pub struct Plan {
    pub downloads: Vec<Download>,
    /// Local files which do not belong to any package.
    pub deletions: Vec<String>,
    /// Number of local files which are already up to date.
    pub up_to_date: usize,
    /// Number of packages which cannot be mirrored.
    pub skipped: usize,
}

impl Plan {
    /// Is the mirror already up to date?
    pub fn is_empty(&self) -> bool {
        self.downloads.is_empty() && self.deletions.is_empty()
    }
}

/// The outcome of a sync pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Report {
    pub downloaded: usize,
    pub up_to_date: usize,
    pub deleted: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "{} downloaded, {} up to date, {} deleted, {} failed, {} skipped",
            self.downloaded, self.up_to_date, self.deleted, self.failed, self.skipped
        )
    }
}

/// The state of the local copy of a package's file.
#[derive(Clone, Debug, PartialEq, Eq)]
enum LocalFile {
    Missing,
    Present(Md5),
    Unreadable,
}

/// Decide whether a file needs to be downloaded, given its local state and the digest reported by
/// Jamf. Returns [`None`] if the local copy can be kept.
fn decide(local: &LocalFile, remote: Option<&Md5>) -> Option<Reason> {
    match (local, remote) {
        (LocalFile::Missing, _) => Some(Reason::New),
        (LocalFile::Unreadable, _) => Some(Reason::Unverified),
        (LocalFile::Present(local), Some(remote)) if local != remote => Some(Reason::Changed),
        (LocalFile::Present(_), _) => None,
    }
}

/// Synchronize the mirror directory with the packages in Jamf.
///
/// Failures to download or delete individual files are logged and counted in the returned
/// [`Report`], but do not abort the pass. Failing to list packages does, in which case nothing is
/// deleted.
pub async fn sync<J: Jamf>(jamf: &J, opt: &Options) -> Result<Report, Error> {
    let plan = plan(jamf, opt).await?;
    if opt.dry_run {
        for download in &plan.downloads {
            tracing::info!(
                "dry run: would download {} ({})",
                download.file_name,
                download.reason
            );
        }
        for file_name in &plan.deletions {
            tracing::info!("dry run: would delete {file_name}");
        }
        return Ok(Report {
            downloaded: plan.downloads.len(),
            up_to_date: plan.up_to_date,
            deleted: plan.deletions.len(),
            failed: 0,
            skipped: plan.skipped,
        });
    }

    let report = apply(jamf, plan, opt).await;
    tracing::info!("sync finished: {report}");
    Ok(report)
}

/// Work out what needs to change to bring the mirror directory up to date.
pub async fn plan<J: Jamf>(jamf: &J, opt: &Options) -> Result<Plan, Error> {
    let packages = jamf.list_packages().await?;
    tracing::info!("{} packages available", packages.len());

    if !opt.dry_run {
        fs::create_dir_all(AsyncPath::new(&opt.dir))
            .await
            .map_err(|err| {
                Error::msg(format!("unable to create {}: {err}", opt.dir.display()))
            })?;
    }
    let local = scan(&opt.dir, !opt.dry_run).await?;

    // Jamf lists packages in ascending order of ID, so if several packages share a file, the
    // oldest one wins.
    let mut plan = Plan::default();
    let mut wanted = HashSet::new();
    let mut mirrored = vec![];
    for package in packages {
        let file_name = package.file_name();
        if !is_mirrorable(&file_name) {
            tracing::warn!(
                "package {} ('{}') has file name {file_name:?} which cannot be mirrored, skipping",
                package.id(),
                package.name()
            );
            plan.skipped += 1;
        } else if !wanted.insert(file_name.clone()) {
            tracing::warn!(
                "package {} ('{}') shares file {file_name} with another package, skipping",
                package.id(),
                package.name()
            );
            plan.skipped += 1;
        } else {
            mirrored.push(package);
        }
    }

    // Hash existing local copies.
    let dir = &opt.dir;
    let local_ref = &local;
    let states = stream::iter(mirrored)
        .map(|package| async move {
            let file_name = package.file_name();
            let state = if local_ref.contains(&file_name) {
                match md5_file(dir.join(&file_name)).await {
                    Ok(md5) => LocalFile::Present(md5),
                    Err(err) => {
                        tracing::warn!("unable to hash {file_name}: {err:#}");
                        LocalFile::Unreadable
                    }
                }
            } else {
                LocalFile::Missing
            };
            (package, state)
        })
        .buffered(opt.concurrency.get())
        .collect::<Vec<_>>()
        .await;

    for (package, state) in states {
        let file_name = package.file_name();
        let remote = package.md5();
        match (&state, &remote) {
            (LocalFile::Present(local), Some(remote)) => tracing::info!(
                "package '{}' - local MD5: {local}, remote MD5: {remote}",
                package.name()
            ),
            (LocalFile::Present(_), None) => tracing::warn!(
                "package '{}' has no MD5 in Jamf, keeping existing {file_name} unverified",
                package.name()
            ),
            _ => {}
        }
        match decide(&state, remote.as_ref()) {
            Some(reason) => plan.downloads.push(Download {
                file_name,
                package: package.name(),
                md5: remote,
                reason,
            }),
            None => plan.up_to_date += 1,
        }
    }

    plan.deletions = local
        .into_iter()
        .filter(|file_name| !wanted.contains(file_name))
        .collect();
    Ok(plan)
}

/// Carry out a plan.
pub async fn apply<J: Jamf>(jamf: &J, plan: Plan, opt: &Options) -> Report {
    let mut report = Report {
        up_to_date: plan.up_to_date,
        skipped: plan.skipped,
        ..Default::default()
    };

    let dir = opt.dir.as_path();
    let results = stream::iter(plan.downloads)
        .map(|download| async move {
            match fetch(jamf, dir, &download).await {
                Ok(()) => true,
                Err(err) => {
                    tracing::error!("failed to download {}: {err:#}", download.file_name);
                    false
                }
            }
        })
        .buffer_unordered(opt.concurrency.get())
        .collect::<Vec<_>>()
        .await;
    report.downloaded = results.iter().filter(|ok| **ok).count();
    report.failed = results.len() - report.downloaded;

    for file_name in plan.deletions {
        let path = dir.join(&file_name);
        tracing::info!("deleting outdated file {}", path.display());
        match fs::remove_file(AsyncPath::new(&path)).await {
            Ok(()) => report.deleted += 1,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::warn!("{} was already deleted", path.display());
            }
            Err(err) => {
                tracing::error!("unable to delete {}: {err}", path.display());
                report.failed += 1;
            }
        }
    }

    report
}

/// Download a single file into the mirror directory.
async fn fetch<J: Jamf>(jamf: &J, dir: &Path, download: &Download) -> Result<(), Error> {
    let target = dir.join(&download.file_name);
    let part = part_path(dir, &download.file_name);
    tracing::info!(
        "downloading {} for package '{}' ({})",
        target.display(),
        download.package,
        download.reason
    );

    let res = async {
        jamf.download(&download.file_name, &part).await?;
        if let Some(expected) = &download.md5 {
            let actual = md5_file(&part).await?;
            if actual != *expected {
                return Err(Error::msg(format!(
                    "downloaded file has MD5 {actual}, expected {expected}"
                )));
            }
        }
        fs::rename(AsyncPath::new(&part), AsyncPath::new(&target)).await?;
        Ok::<_, Error>(())
    }
    .await;

    if res.is_err() {
        discard(&part).await;
    }
    res
}

/// The hidden file a download of `file_name` is written to before it is renamed into place.
///
/// The name is derived from a digest of `file_name`, so it has the same length for every package
/// and never exceeds the file system's name limit when the package's own name does not.
fn part_path(dir: &Path, file_name: &str) -> PathBuf {
    dir.join(format!(".{}{PART_SUFFIX}", Md5::of(file_name)))
}

/// Remove an incomplete download. Returns whether the file is gone.
async fn discard(part: &Path) -> bool {
    match fs::remove_file(AsyncPath::new(part)).await {
        Ok(()) => true,
        Err(err) if err.kind() == ErrorKind::NotFound => true,
        Err(err) => {
            tracing::warn!("unable to clean up {}: {err}", part.display());
            false
        }
    }
}

/// List the visible regular files in the mirror directory.
///
/// If `clean` is set, part files left behind by an interrupted pass are removed along the way. A
/// missing directory is treated as empty.
async fn scan(dir: &Path, clean: bool) -> Result<BTreeSet<String>, Error> {
    let mut entries = match fs::read_dir(AsyncPath::new(dir)).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Default::default()),
        Err(err) => {
            return Err(Error::msg(format!(
                "unable to read directory {}: {err}",
                dir.display()
            )))
        }
    };

    let mut files = BTreeSet::new();
    while let Some(entry) = entries.next().await {
        let entry = entry?;
        let Ok(file_name) = entry.file_name().into_string() else {
            tracing::warn!(
                "ignoring file with non-UTF-8 name {}",
                entry.path().display()
            );
            continue;
        };
        let file_type = entry.file_type().await?;
        if !file_type.is_file() {
            tracing::debug!("ignoring {file_name}, which is not a regular file");
            continue;
        }
        if file_name.starts_with('.') {
            if clean && file_name.ends_with(PART_SUFFIX) {
                tracing::info!("removing incomplete download {file_name}");
                discard(&dir.join(&file_name)).await;
            }
            continue;
        }
        files.insert(file_name);
    }
    Ok(files)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jamf::{Client, LocalClient};
    use crate::testing::FakeJamf;
    use std::fs;
    use tempfile::TempDir;

    /// A source directory of packages and an empty mirror directory.
    struct Dirs {
        src: TempDir,
        dst: TempDir,
    }

    impl Dirs {
        fn new() -> Self {
            Self {
                src: tempfile::tempdir().unwrap(),
                dst: tempfile::tempdir().unwrap(),
            }
        }

        fn client(&self) -> LocalClient {
            LocalClient::open(self.src.path().into())
        }

        fn options(&self) -> Options {
            Options::new(self.dst.path())
        }

        fn add(&self, file_name: &str, contents: &[u8]) {
            fs::write(self.src.path().join(file_name), contents).unwrap();
        }

        fn mirrored(&self) -> Vec<String> {
            let mut files = fs::read_dir(self.dst.path())
                .unwrap()
                .map(|entry| entry.unwrap().file_name().into_string().unwrap())
                .collect::<Vec<_>>();
            files.sort();
            files
        }

        fn read(&self, file_name: &str) -> Vec<u8> {
            fs::read(self.dst.path().join(file_name)).unwrap()
        }
    }

    #[test]
    fn test_decide() {
        let a = Md5::of("a");
        let b = Md5::of("b");
        assert_eq!(decide(&LocalFile::Missing, Some(&a)), Some(Reason::New));
        assert_eq!(decide(&LocalFile::Missing, None), Some(Reason::New));
        assert_eq!(
            decide(&LocalFile::Unreadable, Some(&a)),
            Some(Reason::Unverified)
        );
        assert_eq!(
            decide(&LocalFile::Present(a.clone()), Some(&b)),
            Some(Reason::Changed)
        );
        assert_eq!(decide(&LocalFile::Present(a.clone()), Some(&a)), None);
        assert_eq!(decide(&LocalFile::Present(a), None), None);
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(Reason::New.to_string(), "new");
        assert_eq!(Reason::Changed.to_string(), "changed");
    }

    #[async_std::test]
    async fn test_initial_sync() {
        let dirs = Dirs::new();
        dirs.add("a.pkg", b"a");
        dirs.add("b.dmg", b"b");

        let report = sync(&dirs.client(), &dirs.options()).await.unwrap();
        assert_eq!(
            report,
            Report {
                downloaded: 2,
                ..Default::default()
            }
        );
        assert_eq!(dirs.mirrored(), ["a.pkg", "b.dmg"]);
        assert_eq!(dirs.read("a.pkg"), b"a");
    }

    #[async_std::test]
    async fn test_up_to_date() {
        let dirs = Dirs::new();
        dirs.add("a.pkg", b"a");
        sync(&dirs.client(), &dirs.options()).await.unwrap();

        let plan = plan(&dirs.client(), &dirs.options()).await.unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.up_to_date, 1);
    }

    #[async_std::test]
    async fn test_changed_file() {
        let dirs = Dirs::new();
        dirs.add("a.pkg", b"old");
        dirs.add("b.pkg", b"same");
        sync(&dirs.client(), &dirs.options()).await.unwrap();

        dirs.add("a.pkg", b"new");
        let plan = plan(&dirs.client(), &dirs.options()).await.unwrap();
        assert_eq!(
            plan.downloads,
            [Download {
                file_name: "a.pkg".into(),
                package: "a".into(),
                md5: Some(Md5::of("new")),
                reason: Reason::Changed,
            }]
        );
        assert_eq!(plan.up_to_date, 1);

        let report = apply(&dirs.client(), plan, &dirs.options()).await;
        assert_eq!(report.downloaded, 1);
        assert_eq!(dirs.read("a.pkg"), b"new");
    }

    #[async_std::test]
    async fn test_deletes_outdated_files_only() {
        let dirs = Dirs::new();
        dirs.add("keep.pkg", b"keep");
        fs::write(dirs.dst.path().join("stale.pkg"), b"stale").unwrap();
        fs::write(dirs.dst.path().join(".hidden"), b"hidden").unwrap();
        fs::create_dir(dirs.dst.path().join("subdir")).unwrap();

        let report = sync(&dirs.client(), &dirs.options()).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(dirs.mirrored(), [".hidden", "keep.pkg", "subdir"]);
    }

    #[async_std::test]
    async fn test_dry_run() {
        let dirs = Dirs::new();
        dirs.add("new.pkg", b"new");
        fs::write(dirs.dst.path().join("stale.pkg"), b"stale").unwrap();
        fs::write(part_path(dirs.dst.path(), "x.pkg"), b"partial").unwrap();
        let mut opt = dirs.options();
        opt.dry_run = true;

        let report = sync(&dirs.client(), &opt).await.unwrap();
        assert_eq!(report.downloaded, 1);
        assert_eq!(report.deleted, 1);
        let part = part_path(dirs.dst.path(), "x.pkg");
        let part = part.file_name().unwrap().to_str().unwrap();
        assert_eq!(dirs.mirrored(), [part, "stale.pkg"]);
    }

    #[async_std::test]
    async fn test_dry_run_missing_dir() {
        let dirs = Dirs::new();
        dirs.add("new.pkg", b"new");
        let mut opt = Options::new(dirs.dst.path().join("missing"));
        opt.dry_run = true;

        let report = sync(&dirs.client(), &opt).await.unwrap();
        assert_eq!(report.downloaded, 1);
        assert!(!opt.dir.exists());
    }

    #[async_std::test]
    async fn test_creates_missing_dir() {
        let dirs = Dirs::new();
        dirs.add("a.pkg", b"a");
        let opt = Options::new(dirs.dst.path().join("nested/packages"));

        sync(&dirs.client(), &opt).await.unwrap();
        assert_eq!(fs::read(opt.dir.join("a.pkg")).unwrap(), b"a");
    }

    #[async_std::test]
    async fn test_removes_leftover_part_files() {
        let dirs = Dirs::new();
        fs::write(part_path(dirs.dst.path(), "a.pkg"), b"partial").unwrap();

        sync(&dirs.client(), &dirs.options()).await.unwrap();
        assert!(dirs.mirrored().is_empty());
    }

    #[async_std::test]
    async fn test_long_file_name() {
        let dirs = Dirs::new();
        let file_name = format!("{}.pkg", "x".repeat(246));
        assert_eq!(file_name.len(), 250);
        dirs.add(&file_name, b"long");

        let report = sync(&dirs.client(), &dirs.options()).await.unwrap();
        assert_eq!(
            report,
            Report {
                downloaded: 1,
                ..Default::default()
            }
        );
        assert_eq!(dirs.read(&file_name), b"long");
    }

    #[test]
    fn test_part_path() {
        let dir = Path::new("/packages");
        let short = part_path(dir, "a.pkg");
        let long = part_path(dir, &"x".repeat(255));
        assert_eq!(short.parent(), Some(dir));
        assert_ne!(short, part_path(dir, "b.pkg"));
        assert_eq!(
            short.file_name().unwrap().len(),
            long.file_name().unwrap().len()
        );
        let name = short.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with('.'));
        assert!(name.ends_with(PART_SUFFIX));
    }

    #[async_std::test]
    async fn test_discard() {
        let dir = tempfile::tempdir().unwrap();
        let part = part_path(dir.path(), "a.pkg");
        fs::write(&part, b"partial").unwrap();
        assert!(discard(&part).await);
        assert!(!part.exists());

        // Already gone.
        assert!(discard(&part).await);

        // Removal fails, which is reported rather than raised.
        let file = dir.path().join("file");
        fs::write(&file, b"").unwrap();
        assert!(!discard(&file.join("child")).await);
    }

    #[async_std::test]
    async fn test_digest_mismatch_keeps_old_copy() {
        let dirs = Dirs::new();
        dirs.add("a.pkg", b"v1");
        sync(&dirs.client(), &dirs.options()).await.unwrap();

        // The package changes, but the file changes again after it is listed, so the download
        // does not match the listed digest.
        dirs.add("a.pkg", b"v2");
        let plan = plan(&dirs.client(), &dirs.options()).await.unwrap();
        dirs.add("a.pkg", b"v3");
        let report = apply(&dirs.client(), plan, &dirs.options()).await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.downloaded, 0);
        assert_eq!(dirs.read("a.pkg"), b"v1");
        assert_eq!(dirs.mirrored(), ["a.pkg"]);
    }

    #[async_std::test]
    async fn test_failed_download_does_not_stop_pass() {
        let jamf = FakeJamf::start().await.unwrap();
        jamf.add_package("Good", "good.pkg", b"good".to_vec()).await;
        jamf.add_package("Bad", "bad.pkg", b"bad".to_vec()).await;
        jamf.break_download("bad.pkg").await;
        let client = Client::new(&jamf.options()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stale.pkg"), b"stale").unwrap();

        let report = sync(&client, &Options::new(dir.path())).await.unwrap();
        assert_eq!(
            report,
            Report {
                downloaded: 1,
                deleted: 1,
                failed: 1,
                ..Default::default()
            }
        );
        let mut files = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect::<Vec<_>>();
        files.sort();
        assert_eq!(files, ["good.pkg"]);
    }

    #[async_std::test]
    async fn test_listing_failure_deletes_nothing() {
        let jamf = FakeJamf::start().await.unwrap();
        let mut opt = jamf.options();
        opt.client_secret = "wrong".into();
        let client = Client::new(&opt).unwrap();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stale.pkg"), b"stale").unwrap();

        sync(&client, &Options::new(dir.path())).await.unwrap_err();
        assert!(dir.path().join("stale.pkg").exists());
    }

    #[async_std::test]
    async fn test_skips_unsafe_and_duplicate_names() {
        let jamf = FakeJamf::start().await.unwrap();
        jamf.add_package("First", "shared.pkg", b"first".to_vec()).await;
        jamf.add_package("Second", "shared.pkg", b"second".to_vec()).await;
        jamf.add_package("Escape", "../escape.pkg", b"escape".to_vec()).await;
        jamf.add_package("Hidden", ".hidden.pkg", b"hidden".to_vec()).await;
        let client = Client::new(&jamf.options()).unwrap();
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("packages");

        let report = sync(&client, &Options::new(&dir)).await.unwrap();
        assert_eq!(report.downloaded, 1);
        assert_eq!(report.skipped, 3);
        assert_eq!(fs::read(dir.join("shared.pkg")).unwrap(), b"first");
        assert!(!root.path().join("escape.pkg").exists());
        assert!(!dir.join(".hidden.pkg").exists());
    }

    #[async_std::test]
    async fn test_unknown_remote_digest_keeps_local_copy() {
        let jamf = FakeJamf::start().await.unwrap();
        jamf.add_package("A", "a.pkg", b"remote".to_vec()).await;
        jamf.set_md5("a.pkg", None).await;
        let client = Client::new(&jamf.options()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.pkg"), b"local").unwrap();

        let report = sync(&client, &Options::new(dir.path())).await.unwrap();
        assert_eq!(report.up_to_date, 1);
        assert_eq!(report.downloaded, 0);
        assert_eq!(jamf.total_downloads().await, 0);
        assert_eq!(fs::read(dir.path().join("a.pkg")).unwrap(), b"local");
    }

    #[async_std::test]
    async fn test_concurrent_downloads() {
        let jamf = FakeJamf::start().await.unwrap();
        for i in 0..10u8 {
            jamf.add_package(format!("P{i}"), format!("p{i}.pkg"), vec![i; 1000])
                .await;
        }
        let client = Client::new(&jamf.options()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut opt = Options::new(dir.path());
        opt.concurrency = NonZeroUsize::new(4).unwrap();

        let report = sync(&client, &opt).await.unwrap();
        assert_eq!(report.downloaded, 10);
        for i in 0..10u8 {
            assert_eq!(
                fs::read(dir.path().join(format!("p{i}.pkg"))).unwrap(),
                vec![i; 1000]
            );
        }
        // All downloads shared one token.
        assert_eq!(jamf.tokens_issued().await, 1);
    }
}
