//! Facilities for pulling packages from Jamf Pro.

use crate::digest::Md5;
use anyhow::Error;
use async_trait::async_trait;
use std::path::Path;

pub mod client;
#[cfg(any(test, feature = "testing"))]
mod local;

pub use client::Client;
#[cfg(any(test, feature = "testing"))]
pub use local::LocalClient;

/// A source of Jamf packages.
#[async_trait]
pub trait Jamf: Sync {
    /// Metadata about a package.
    type Package: Package;

    /// List all packages, in ascending order of ID.
    async fn list_packages(&self) -> Result<Vec<Self::Package>, Error>;

    /// Download the file named `file_name` and write its contents to `dest`.
    ///
    /// `dest` is created if it does not exist and truncated if it does.
    async fn download(&self, file_name: &str, dest: &Path) -> Result<(), Error>;
}

/// Metadata about a package.
pub trait Package: Send + Sync {
    /// The unique identifier for this package in Jamf Pro.
    fn id(&self) -> String;

    /// The human-readable name of this package.
    fn name(&self) -> String;

    /// The name of the file backing this package in the distribution point.
    fn file_name(&self) -> String;

    /// The MD5 digest of the file backing this package.
    ///
    /// This can be used to quickly check if a local copy of the package needs to be updated, by
    /// comparing it against the digest of the local file. Jamf does not record a digest for
    /// every package, in which case this is [`None`].
    fn md5(&self) -> Option<Md5>;
}

/// Check whether a file name reported by Jamf can safely be mirrored into a local directory.
///
/// A mirrorable name refers to a single, visible file directly inside the mirror directory: it
/// must not be empty, contain path separators, or start with a `.`. Hidden files are reserved
/// for in-progress downloads and are never touched by the mirror.
pub fn is_mirrorable(file_name: &str) -> bool {
    !file_name.is_empty()
        && !file_name.starts_with('.')
        && !file_name.contains(|c: char| c == '/' || c == '\\')
}
