//! A fake Jamf Pro server, for testing clients without a real Jamf instance.
//!
//! The server implements just enough of the Jamf Pro API for mirroring: client credentials
//! authentication, paginated package listings, and JCDS downloads. Files are served from an
//! unauthenticated `/cdn/` route, the same way JCDS hands out pre-signed download URLs.
#![cfg(any(test, feature = "testing"))]

use crate::{digest::Md5, jamf::client};
use anyhow::Error;
use async_std::{
    net::TcpStream,
    sync::{Arc, Mutex},
    task::{sleep, spawn},
};
use portpicker::pick_unused_port;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use surf::Url;
use tide::{Body, Request, Response, StatusCode};

/// Credentials accepted by the fake server.
pub const CLIENT_ID: &str = "jcdssync-test";
pub const CLIENT_SECRET: &str = "hunter2";

/// A running fake Jamf Pro server.
#[derive(Clone)]
pub struct FakeJamf {
    url: Url,
    state: Arc<State>,
}

#[derive(Default)]
struct State {
    base: String,
    packages: Mutex<Vec<FakePackage>>,
    tokens: Mutex<Tokens>,
    /// Number of times each file has been downloaded.
    downloads: Mutex<HashMap<String, usize>>,
    /// Files whose downloads fail.
    broken: Mutex<HashSet<String>>,
    pages_served: Mutex<usize>,
}

struct Tokens {
    valid: HashSet<String>,
    issued: usize,
    lifetime: u64,
}

impl Default for Tokens {
    fn default() -> Self {
        Self {
            valid: Default::default(),
            issued: 0,
            lifetime: 3600,
        }
    }
}

#[derive(Clone, Debug)]
struct FakePackage {
    id: u64,
    name: String,
    file_name: String,
    contents: Vec<u8>,
    /// The digest reported by the API, which need not match the contents.
    md5: Value,
}

impl FakePackage {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id.to_string(),
            "packageName": self.name,
            "fileName": self.file_name,
            "md5": self.md5,
            "priority": 10,
            "fillUserTemplate": false,
        })
    }
}

impl FakeJamf {
    /// Start a fake server on an unused local port.
    pub async fn start() -> Result<Self, Error> {
        const MAX_CONNECT_RETRIES: usize = 60;

        let port = pick_unused_port().ok_or_else(|| Error::msg("no free ports"))?;
        let url: Url = format!("http://127.0.0.1:{port}/").parse()?;
        let state = Arc::new(State {
            base: url.to_string(),
            ..Default::default()
        });

        let mut app = tide::with_state(state.clone());
        app.at("/api/oauth/token").post(issue_token);
        app.at("/api/v1/packages").get(list_packages);
        app.at("/api/v1/jcds/files/:name").get(file_location);
        app.at("/cdn/:name").get(serve_file);
        let addr = format!("127.0.0.1:{port}");
        spawn(async move {
            if let Err(err) = app.listen(addr).await {
                tracing::error!("fake Jamf server exited: {err}");
            }
        });

        // Wait for the server to come up.
        for _ in 0..MAX_CONNECT_RETRIES {
            match TcpStream::connect(("127.0.0.1", port)).await {
                Ok(_) => return Ok(Self { url, state }),
                Err(err) => {
                    tracing::warn!("waiting for fake Jamf server to start: {err}");
                    sleep(Duration::from_millis(100)).await;
                }
            }
        }
        Err(Error::msg("timed out waiting for fake Jamf server"))
    }

    /// The base URL of the server.
    pub fn url(&self) -> Url {
        self.url.clone()
    }

    /// Options for connecting a [`client::Client`] to this server.
    pub fn options(&self) -> client::Options {
        client::Options {
            url: self.url(),
            client_id: CLIENT_ID.into(),
            client_secret: CLIENT_SECRET.into(),
            page_size: 100,
            request_timeout: 10,
        }
    }

    /// Add a package, returning its ID.
    pub async fn add_package(
        &self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        contents: Vec<u8>,
    ) -> u64 {
        let mut packages = self.state.packages.lock().await;
        let id = packages.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        packages.push(FakePackage {
            id,
            name: name.into(),
            file_name: file_name.into(),
            md5: json!(Md5::of(&contents)),
            contents,
        });
        id
    }

    /// Replace the contents of a package, updating its digest to match.
    pub async fn update_package(&self, file_name: &str, contents: Vec<u8>) {
        self.with_package(file_name, |package| {
            package.md5 = json!(Md5::of(&contents));
            package.contents = contents;
        })
        .await;
    }

    /// Remove every package backed by `file_name`.
    pub async fn remove_package(&self, file_name: &str) {
        self.state
            .packages
            .lock()
            .await
            .retain(|package| package.file_name != file_name);
    }

    /// Override the digest the API reports for a package.
    pub async fn set_md5(&self, file_name: &str, md5: Option<Md5>) {
        self.with_package(file_name, |package| package.md5 = json!(md5))
            .await;
    }

    /// Override the digest the API reports for a package with an arbitrary string.
    pub async fn set_raw_md5(&self, file_name: &str, md5: &str) {
        self.with_package(file_name, |package| package.md5 = json!(md5))
            .await;
    }

    /// Make downloads of `file_name` fail with an internal server error.
    pub async fn break_download(&self, file_name: &str) {
        self.state.broken.lock().await.insert(file_name.into());
    }

    /// Set the lifetime, in seconds, of tokens issued from now on.
    pub async fn set_token_lifetime(&self, secs: u64) {
        self.state.tokens.lock().await.lifetime = secs;
    }

    /// Invalidate all outstanding tokens.
    pub async fn revoke_tokens(&self) {
        self.state.tokens.lock().await.valid.clear();
    }

    /// The number of tokens issued so far.
    pub async fn tokens_issued(&self) -> usize {
        self.state.tokens.lock().await.issued
    }

    /// The number of times `file_name` has been downloaded.
    pub async fn downloads(&self, file_name: &str) -> usize {
        self.state
            .downloads
            .lock()
            .await
            .get(file_name)
            .copied()
            .unwrap_or(0)
    }

    /// The total number of downloads of any file.
    pub async fn total_downloads(&self) -> usize {
        self.state.downloads.lock().await.values().sum()
    }

    /// The number of pages of packages served so far.
    pub async fn package_pages_served(&self) -> usize {
        *self.state.pages_served.lock().await
    }

    async fn with_package(&self, file_name: &str, f: impl FnOnce(&mut FakePackage)) {
        if let Some(package) = self
            .state
            .packages
            .lock()
            .await
            .iter_mut()
            .find(|package| package.file_name == file_name)
        {
            f(package);
        }
    }
}

#[derive(Deserialize)]
struct TokenForm {
    client_id: String,
    client_secret: String,
    grant_type: String,
}

#[derive(Deserialize)]
struct PageQuery {
    page: usize,
    #[serde(rename = "page-size")]
    page_size: usize,
    sort: Option<String>,
}

async fn issue_token(mut req: Request<Arc<State>>) -> tide::Result<Response> {
    let form: TokenForm = req.body_form().await?;
    if form.grant_type != "client_credentials"
        || form.client_id != CLIENT_ID
        || form.client_secret != CLIENT_SECRET
    {
        return Ok(Response::builder(StatusCode::Unauthorized)
            .body(json!({ "error": "invalid_client" }))
            .build());
    }

    let mut tokens = req.state().tokens.lock().await;
    tokens.issued += 1;
    let token = format!("token-{}", tokens.issued);
    tokens.valid.insert(token.clone());
    json_response(json!({
        "access_token": token,
        "scope": "api-role:1",
        "token_type": "Bearer",
        "expires_in": tokens.lifetime,
    }))
}

async fn list_packages(req: Request<Arc<State>>) -> tide::Result<Response> {
    if !authorized(&req).await {
        return Ok(Response::new(StatusCode::Unauthorized));
    }
    let query: PageQuery = req.query()?;
    if query.sort.as_deref() != Some("id:asc") {
        return Ok(Response::builder(StatusCode::BadRequest)
            .body("unsupported sort order")
            .build());
    }

    let mut packages = req.state().packages.lock().await.clone();
    packages.sort_by_key(|package| package.id);
    *req.state().pages_served.lock().await += 1;
    let results = packages
        .iter()
        .skip(query.page * query.page_size)
        .take(query.page_size)
        .map(FakePackage::to_json)
        .collect::<Vec<_>>();
    json_response(json!({
        "totalCount": packages.len(),
        "results": results,
    }))
}

async fn file_location(req: Request<Arc<State>>) -> tide::Result<Response> {
    if !authorized(&req).await {
        return Ok(Response::new(StatusCode::Unauthorized));
    }
    let Some(package) = find_package(&req).await? else {
        return Ok(Response::new(StatusCode::NotFound));
    };
    json_response(json!({
        "uri": format!("{}cdn/{}", req.state().base, encode_segment(&package.file_name)),
    }))
}

async fn serve_file(req: Request<Arc<State>>) -> tide::Result<Response> {
    let Some(package) = find_package(&req).await? else {
        return Ok(Response::new(StatusCode::NotFound));
    };
    if req.state().broken.lock().await.contains(&package.file_name) {
        return Ok(Response::new(StatusCode::InternalServerError));
    }
    *req
        .state()
        .downloads
        .lock()
        .await
        .entry(package.file_name.clone())
        .or_default() += 1;
    Ok(Response::builder(StatusCode::Ok)
        .body(Body::from_bytes(package.contents))
        .build())
}

async fn authorized(req: &Request<Arc<State>>) -> bool {
    let Some(header) = req.header("Authorization") else {
        return false;
    };
    let Some(token) = header.last().as_str().strip_prefix("Bearer ") else {
        return false;
    };
    req.state().tokens.lock().await.valid.contains(token)
}

/// Look up the package named by the `:name` route parameter.
async fn find_package(req: &Request<Arc<State>>) -> tide::Result<Option<FakePackage>> {
    let name = req.param("name")?;
    Ok(req
        .state()
        .packages
        .lock()
        .await
        .iter()
        .find(|package| {
            package.file_name == name || encode_segment(&package.file_name) == name
        })
        .cloned())
}

/// Percent-encode `segment` the same way it appears in a URL path.
fn encode_segment(segment: &str) -> String {
    let mut url = Url::parse("http://localhost/").expect("static URL is valid");
    url.path_segments_mut()
        .expect("http URLs have paths")
        .pop_if_empty()
        .push(segment);
    url.path()[1..].to_string()
}

fn json_response(body: Value) -> tide::Result<Response> {
    Ok(Response::builder(StatusCode::Ok)
        .body(Body::from_json(&body)?)
        .build())
}
