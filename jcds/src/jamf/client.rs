//! A Jamf Pro API client.

use super::Jamf;
use crate::digest::Md5;
use anyhow::Error;
use async_std::{fs::File, io, sync::Mutex};
use async_trait::async_trait;
use clap::Args;
use serde::{
    de::{DeserializeOwned, Deserializer},
    Deserialize, Serialize,
};
use std::path::Path;
use std::time::{Duration, Instant};
use surf::{Body, StatusCode, Url};

/// Access tokens are renewed once they have less than this long left to live.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(5);

/// Options for connecting to Jamf Pro.
#[derive(Clone, Args)]
#[group(id = "jamf")]
pub struct Options {
    /// Base URL of the Jamf Pro server, e.g. https://example.jamfcloud.com.
    #[clap(long = "jamf-url", env = "JAMF_URL", value_name = "URL")]
    pub url: Url,

    /// ID of the API client to authenticate as.
    #[clap(long, env = "JAMF_CLIENT_ID")]
    pub client_id: String,

    /// Secret of the API client to authenticate as.
    #[clap(long, env = "JAMF_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: String,

    /// Number of packages to request per page when listing packages.
    #[clap(long, env = "JAMF_PAGE_SIZE", default_value = "100")]
    pub page_size: u32,

    /// Timeout for Jamf API requests. File transfers are not subject to this timeout.
    #[clap(
        long,
        env = "JAMF_REQUEST_TIMEOUT",
        value_name = "SECONDS",
        default_value = "60"
    )]
    pub request_timeout: u64,
}

/// A Jamf Pro client.
pub struct Client {
    /// HTTP client for API requests.
    api: surf::Client,
    /// HTTP client for file transfers, which may take arbitrarily long.
    transfer: surf::Client,
    base: Url,
    client_id: String,
    client_secret: String,
    page_size: u32,
    token: Mutex<Option<Token>>,
}

impl Client {
    /// Connect to Jamf Pro.
    pub fn new(opt: &Options) -> Result<Self, Error> {
        if opt.page_size == 0 {
            return Err(Error::msg("page size must be positive"));
        }

        // Relative paths are resolved against the base URL, so make sure it is treated as a
        // directory even if the server lives under a path prefix.
        let mut base = opt.url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let api: surf::Client = surf::Config::new()
            .set_timeout(Some(Duration::from_secs(opt.request_timeout)))
            .try_into()
            .map_err(Error::msg)?;
        let transfer: surf::Client = surf::Config::new()
            .set_timeout(None)
            .try_into()
            .map_err(Error::msg)?;
        Ok(Self {
            api,
            transfer,
            base,
            client_id: opt.client_id.clone(),
            client_secret: opt.client_secret.clone(),
            page_size: opt.page_size,
            token: Default::default(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base.join(path)?)
    }

    /// Get a valid access token, requesting a new one if necessary.
    async fn token(&self) -> Result<String, Error> {
        // Hold the lock while authenticating, so that concurrent requests wait for a single new
        // token instead of each requesting their own.
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(token.value.clone());
            }
            tracing::debug!("access token is about to expire, renewing");
        }
        let token = self.authenticate().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    /// Forget `token`, if it is still the cached token.
    async fn invalidate(&self, token: &str) {
        let mut cached = self.token.lock().await;
        if cached.as_ref().map(|cached| cached.value == token) == Some(true) {
            *cached = None;
        }
    }

    async fn authenticate(&self) -> Result<Token, Error> {
        let url = self.endpoint("api/oauth/token")?;
        tracing::info!(%url, client_id = %self.client_id, "requesting Jamf access token");
        let requested_at = Instant::now();
        let res = self
            .api
            .post(url.as_str())
            .body(
                Body::from_form(&TokenRequest {
                    client_id: &self.client_id,
                    client_secret: &self.client_secret,
                    grant_type: "client_credentials",
                })
                .map_err(Error::msg)?,
            )
            .send()
            .await
            .map_err(Error::msg)?;
        let res: TokenResponse = parse(res, &url).await?;
        Ok(Token {
            value: res.access_token,
            expires_at: requested_at + Duration::from_secs(res.expires_in),
        })
    }

    /// Make an authenticated `GET` request to the API.
    ///
    /// If Jamf rejects the access token (for example, because it was revoked before it expired)
    /// the request is retried once with a new token.
    async fn get<T: DeserializeOwned>(&self, url: &Url) -> Result<T, Error> {
        let mut retried = false;
        loop {
            let token = self.token().await?;
            tracing::debug!(%url, "Jamf request");
            let res = self
                .api
                .get(url.as_str())
                .header("Authorization", format!("Bearer {token}"))
                .send()
                .await
                .map_err(Error::msg)?;
            if res.status() == StatusCode::Unauthorized && !retried {
                tracing::warn!("Jamf rejected access token, requesting a new one");
                self.invalidate(&token).await;
                retried = true;
                continue;
            }
            return parse(res, url).await;
        }
    }
}

#[async_trait]
impl Jamf for Client {
    type Package = Package;

    async fn list_packages(&self) -> Result<Vec<Self::Package>, Error> {
        let mut packages = vec![];
        for page in 0u32.. {
            let mut url = self.endpoint("api/v1/packages")?;
            url.query_pairs_mut()
                .append_pair("page", &page.to_string())
                .append_pair("page-size", &self.page_size.to_string())
                .append_pair("sort", "id:asc");
            let res: PackagePage = self.get(&url).await?;
            tracing::debug!(
                page,
                results = res.results.len(),
                total = res.total_count,
                "received page of packages"
            );
            if res.results.is_empty() {
                break;
            }
            packages.extend(res.results);
            if packages.len() >= res.total_count {
                break;
            }
        }
        Ok(packages)
    }

    async fn download(&self, file_name: &str, dest: &Path) -> Result<(), Error> {
        // The file name is passed as a single path segment, so it must be escaped.
        let mut url = self.endpoint("api/v1/jcds/files")?;
        url.path_segments_mut()
            .map_err(|_| Error::msg(format!("{} cannot be used as a base URL", self.base)))?
            .pop_if_empty()
            .push(file_name);
        let location: FileLocation = self.get(&url).await?;
        let uri = Url::parse(&location.uri)
            .map_err(|err| Error::msg(format!("invalid download URI for {file_name}: {err}")))?;

        // The download URI is pre-signed, so it does not get our access token.
        tracing::debug!(file_name, host = uri.host_str(), "downloading from JCDS");
        let mut res = self
            .transfer
            .get(uri.as_str())
            .send()
            .await
            .map_err(Error::msg)?;
        if !res.status().is_success() {
            return Err(Error::msg(format!(
                "download of {file_name} failed with status {}: {}",
                describe(res.status()),
                uri.path()
            )));
        }
        let mut file = File::create(async_std::path::Path::new(dest)).await?;
        let bytes = io::copy(&mut res, &mut file).await?;
        file.sync_all().await?;
        tracing::info!("downloaded {file_name} ({bytes} bytes)");
        Ok(())
    }
}

/// Check the status of a Jamf API response and parse its body.
async fn parse<T: DeserializeOwned>(mut res: surf::Response, url: &Url) -> Result<T, Error> {
    if !res.status().is_success() {
        let body = res.body_string().await.unwrap_or_default();
        return Err(Error::msg(format!(
            "Jamf API error: {} {}: {}",
            describe(res.status()),
            url.path(),
            body.trim()
        )));
    }
    res.body_json()
        .await
        .map_err(|err| Error::msg(format!("malformed response from {}: {err}", url.path())))
}

fn describe(status: StatusCode) -> String {
    format!("{} {}", u16::from(status), status.canonical_reason())
}

/// Body of a request to the `/api/oauth/token` endpoint.
#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
}

/// Response from the `/api/oauth/token` endpoint.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Lifetime of the token, in seconds.
    expires_in: u64,
}

struct Token {
    value: String,
    expires_at: Instant,
}

/// Response from the `/api/v1/packages` endpoint.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackagePage {
    total_count: usize,
    results: Vec<Package>,
}

/// Response from the `/api/v1/jcds/files/{name}` endpoint.
#[derive(Deserialize)]
struct FileLocation {
    uri: String,
}

/// Information about a package.
///
/// Entries in the list returned by the `/api/v1/packages` endpoint.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    id: String,
    package_name: String,
    file_name: String,
    #[serde(default, deserialize_with = "deserialize_md5")]
    md5: Option<Md5>,
}

impl super::Package for Package {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn name(&self) -> String {
        self.package_name.clone()
    }

    fn file_name(&self) -> String {
        self.file_name.clone()
    }

    fn md5(&self) -> Option<Md5> {
        self.md5.clone()
    }
}

/// Jamf reports a missing digest either as `null` or as an empty string.
fn deserialize_md5<'a, D: Deserializer<'a>>(d: D) -> Result<Option<Md5>, D::Error> {
    let md5 = Option::<String>::deserialize(d)?;
    Ok(md5.filter(|md5| !md5.trim().is_empty()).map(Md5::new))
}
