#![cfg(test)]

//! End-to-end tests which run the command line against a fake Jamf Pro server.
//!
//! Each test starts its own [`FakeJamf`] on an unused port and mirrors into a fresh temporary
//! directory, so the tests are independent of each other and can run in parallel.

use super::Options;
use anyhow::Error;
use async_std::future::timeout;
use clap::{CommandFactory, Parser};
use jcds::testing::FakeJamf;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn options(jamf: &FakeJamf, dir: &Path, extra: &[&str]) -> Result<Options, Error> {
    let opt = jamf.options();
    let url = opt.url.to_string();
    let dir = dir.display().to_string();
    let args: [&str; 9] = [
        "jcdssync",
        "--jamf-url",
        url.as_str(),
        "--client-id",
        opt.client_id.as_str(),
        "--client-secret",
        opt.client_secret.as_str(),
        "--dir",
        dir.as_str(),
    ];
    Ok(Options::try_parse_from(args.iter().chain(extra))?)
}

fn list(dir: &Path) -> Vec<String> {
    let mut files = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect::<Vec<_>>();
    files.sort();
    files
}

#[test]
fn test_command() {
    Options::command().debug_assert();
}

#[test]
fn test_defaults() {
    let opt = Options::try_parse_from([
        "jcdssync",
        "--jamf-url",
        "https://example.jamfcloud.com",
        "--client-id",
        "id",
        "--client-secret",
        "secret",
    ])
    .unwrap();
    assert_eq!(opt.schedule.to_string(), "0 0 * * *");
    assert!(!opt.now);
    assert_eq!(opt.mirror.dir, Path::new("/packages"));
    assert_eq!(opt.mirror.concurrency.get(), 2);
    assert!(!opt.mirror.dry_run);
    assert_eq!(opt.jamf.page_size, 100);
    assert_eq!(opt.jamf.request_timeout, 60);
}

#[test]
fn test_invalid_schedule() {
    let res = Options::try_parse_from([
        "jcdssync",
        "--jamf-url",
        "https://example.jamfcloud.com",
        "--client-id",
        "id",
        "--client-secret",
        "secret",
        "--schedule",
        "0 0 * *",
    ]);
    assert!(res.is_err());
}

#[test]
fn test_zero_concurrency() {
    let res = Options::try_parse_from([
        "jcdssync",
        "--jamf-url",
        "https://example.jamfcloud.com",
        "--client-id",
        "id",
        "--client-secret",
        "secret",
        "--concurrency",
        "0",
    ]);
    assert!(res.is_err());
}

#[async_std::test]
async fn test_sync_lifecycle() {
    jcds::init_logging();

    let jamf = FakeJamf::start().await.unwrap();
    jamf.add_package("Firefox", "Firefox 120.0.pkg", b"firefox 120".to_vec())
        .await;
    jamf.add_package("Chrome", "GoogleChrome.pkg", b"chrome".to_vec())
        .await;
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(".keep"), b"").unwrap();
    let opt = options(&jamf, dir.path(), &["--now"]).unwrap();

    // Initial sync downloads everything.
    opt.run().await.unwrap();
    assert_eq!(
        list(dir.path()),
        [".keep", "Firefox 120.0.pkg", "GoogleChrome.pkg"]
    );
    assert_eq!(
        fs::read(dir.path().join("Firefox 120.0.pkg")).unwrap(),
        b"firefox 120"
    );
    assert_eq!(jamf.total_downloads().await, 2);

    // Nothing changed, nothing is downloaded.
    opt.run().await.unwrap();
    assert_eq!(jamf.total_downloads().await, 2);

    // An updated package is downloaded again; a removed package is deleted.
    jamf.update_package("GoogleChrome.pkg", b"chrome 2".to_vec())
        .await;
    jamf.remove_package("Firefox 120.0.pkg").await;
    opt.run().await.unwrap();
    assert_eq!(list(dir.path()), [".keep", "GoogleChrome.pkg"]);
    assert_eq!(
        fs::read(dir.path().join("GoogleChrome.pkg")).unwrap(),
        b"chrome 2"
    );
    assert_eq!(jamf.downloads("GoogleChrome.pkg").await, 2);
    assert_eq!(jamf.total_downloads().await, 3);
}

#[async_std::test]
async fn test_local_changes_are_reverted() {
    let jamf = FakeJamf::start().await.unwrap();
    jamf.add_package("A", "a.pkg", b"pristine".to_vec()).await;
    let dir = TempDir::new().unwrap();
    let opt = options(&jamf, dir.path(), &["--now"]).unwrap();

    opt.run().await.unwrap();
    fs::write(dir.path().join("a.pkg"), b"tampered").unwrap();
    opt.run().await.unwrap();
    assert_eq!(fs::read(dir.path().join("a.pkg")).unwrap(), b"pristine");
    assert_eq!(jamf.downloads("a.pkg").await, 2);
}

#[async_std::test]
async fn test_paginated_sync() {
    let jamf = FakeJamf::start().await.unwrap();
    for i in 0..7u8 {
        jamf.add_package(format!("P{i}"), format!("p{i}.pkg"), vec![i; 3])
            .await;
    }
    let dir = TempDir::new().unwrap();
    let opt = options(&jamf, dir.path(), &["--now", "--page-size", "3"]).unwrap();

    opt.run().await.unwrap();
    assert_eq!(list(dir.path()).len(), 7);
    assert_eq!(jamf.package_pages_served().await, 3);
}

#[async_std::test]
async fn test_dry_run() {
    let jamf = FakeJamf::start().await.unwrap();
    jamf.add_package("A", "a.pkg", b"a".to_vec()).await;
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("stale.pkg"), b"stale").unwrap();
    let opt = options(&jamf, dir.path(), &["--now", "--dry-run"]).unwrap();

    opt.run().await.unwrap();
    assert_eq!(list(dir.path()), ["stale.pkg"]);
    assert_eq!(jamf.total_downloads().await, 0);
}

#[async_std::test]
async fn test_failures_are_reported() {
    let jamf = FakeJamf::start().await.unwrap();
    jamf.add_package("Good", "good.pkg", b"good".to_vec()).await;
    jamf.add_package("Bad", "bad.pkg", b"bad".to_vec()).await;
    jamf.break_download("bad.pkg").await;
    let dir = TempDir::new().unwrap();
    let opt = options(&jamf, dir.path(), &["--now"]).unwrap();

    let err = opt.run().await.unwrap_err();
    assert!(err.to_string().contains("1 files"), "{err}");
    // The rest of the pass still went through.
    assert_eq!(list(dir.path()), ["good.pkg"]);
}

#[async_std::test]
async fn test_scheduled_waits_for_next_run() {
    let jamf = FakeJamf::start().await.unwrap();
    jamf.add_package("A", "a.pkg", b"a".to_vec()).await;
    let dir = TempDir::new().unwrap();
    // Fires once a year, so nothing should happen while the test runs.
    let opt = options(&jamf, dir.path(), &["--schedule", "0 0 1 1 *"]).unwrap();

    let res = timeout(Duration::from_millis(500), opt.run()).await;
    assert!(res.is_err(), "scheduled sync exited: {res:?}");
    assert!(list(dir.path()).is_empty());
    assert_eq!(jamf.total_downloads().await, 0);
    assert_eq!(jamf.tokens_issued().await, 0);
}

#[async_std::test]
async fn test_bad_credentials() {
    let jamf = FakeJamf::start().await.unwrap();
    let dir = TempDir::new().unwrap();
    let mut opt = options(&jamf, dir.path(), &["--now"]).unwrap();
    opt.jamf.client_secret = "wrong".into();

    assert!(opt.run().await.is_err());
}
