//! A package source which reads from the local file system instead of the Jamf Pro API.

use super::Jamf;
use crate::digest::{md5_file, Md5};
use anyhow::Error;
use async_std::fs;
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};

/// A package source which reads from the local file system instead of the Jamf Pro API.
///
/// Every visible file directly inside the root directory is treated as a package, named after
/// its file stem. Package IDs are assigned in order of file name.
pub struct LocalClient {
    root: PathBuf,
}

impl LocalClient {
    /// Open a directory of packages.
    pub fn open(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Jamf for LocalClient {
    type Package = Package;

    async fn list_packages(&self) -> Result<Vec<Self::Package>, Error> {
        let mut entries = fs::read_dir(async_std::path::Path::new(&self.root))
            .await
            .map_err(|err| {
                Error::msg(format!(
                    "unable to read directory {}: {err}",
                    self.root.display()
                ))
            })?;
        let mut file_names = vec![];
        while let Some(entry) = entries.next().await {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::error!("unable to read directory {}: {err}", self.root.display());
                    continue;
                }
            };
            let Ok(file_name) = entry.file_name().into_string() else {
                tracing::warn!("skipping file with non-UTF-8 name in {}", self.root.display());
                continue;
            };
            if file_name.starts_with('.') || !entry.file_type().await?.is_file() {
                continue;
            }
            file_names.push(file_name);
        }
        file_names.sort();

        let mut packages = vec![];
        for (i, file_name) in file_names.into_iter().enumerate() {
            let md5 = md5_file(self.root.join(&file_name)).await?;
            packages.push(Package {
                id: i + 1,
                name: Path::new(&file_name)
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file_name.clone()),
                file_name,
                md5,
            });
        }
        Ok(packages)
    }

    async fn download(&self, file_name: &str, dest: &Path) -> Result<(), Error> {
        let src = self.root.join(file_name);
        fs::copy(
            async_std::path::Path::new(&src),
            async_std::path::Path::new(dest),
        )
        .await
        .map_err(|err| Error::msg(format!("unable to copy {}: {err}", src.display())))?;
        Ok(())
    }
}

/// A package stored in the local file system.
#[derive(Clone, Debug)]
pub struct Package {
    id: usize,
    name: String,
    file_name: String,
    md5: Md5,
}

impl super::Package for Package {
    fn id(&self) -> String {
        self.id.to_string()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn file_name(&self) -> String {
        self.file_name.clone()
    }

    fn md5(&self) -> Option<Md5> {
        Some(self.md5.clone())
    }
}
