//! MD5 digests of package files.

use anyhow::Error;
use async_std::{fs::File, io::ReadExt};
use derive_more::{Display, Into};
use md5::{Digest, Md5 as Hasher};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

/// Size of the buffer used when streaming a file through the hasher.
const CHUNK_SIZE: usize = 64 * 1024;

/// A hex-encoded MD5 digest.
///
/// Jamf reports digests in whatever case it stored them in, so digests are normalized to
/// lowercase on construction and can be compared directly.
#[derive(Clone, Debug, Display, Into, PartialEq, Eq, Hash, Serialize)]
pub struct Md5(String);

impl Md5 {
    /// Interpret a hex string as an MD5 digest.
    pub fn new(hex: impl AsRef<str>) -> Self {
        Self(hex.as_ref().trim().to_ascii_lowercase())
    }

    /// Compute the digest of an in-memory buffer.
    pub fn of(bytes: impl AsRef<[u8]>) -> Self {
        Self(format!("{:x}", Hasher::digest(bytes.as_ref())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Md5 {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        String::deserialize(d).map(Self::new)
    }
}

/// Compute the MD5 digest of a file, without loading the whole file into memory.
pub async fn md5_file(path: impl AsRef<Path>) -> Result<Md5, Error> {
    let path = path.as_ref();
    let mut file = File::open(async_std::path::Path::new(path))
        .await
        .map_err(|err| Error::msg(format!("unable to open {}: {err}", path.display())))?;
    let mut hasher = Hasher::new();
    let mut buf = vec![0; CHUNK_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|err| Error::msg(format!("unable to read {}: {err}", path.display())))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Md5(format!("{:x}", hasher.finalize())))
}
