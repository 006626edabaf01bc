//! Loopback HTTP stub serving a GitHub-shaped release API and asset bytes.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Clone, Debug)]
pub struct StubAsset {
    pub id: u64,
    pub name: String,
    pub body: Vec<u8>,
    /// Size advertised in the listing; defaults to the body length.
    pub declared_size: Option<u64>,
}

impl StubAsset {
    pub fn new(id: u64, name: &str, len: usize) -> Self {
        Self {
            id,
            name: name.to_string(),
            body: (0..len).map(|i| (i % 251) as u8).collect(),
            declared_size: None,
        }
    }

    pub fn declared(mut self, size: u64) -> Self {
        self.declared_size = Some(size);
        self
    }

    fn size(&self) -> u64 {
        self.declared_size.unwrap_or(self.body.len() as u64)
    }
}

#[derive(Clone, Debug)]
pub struct StubRelease {
    pub tag: String,
    pub assets: Vec<StubAsset>,
}

impl StubRelease {
    pub fn new(tag: &str, assets: Vec<StubAsset>) -> Self {
        Self {
            tag: tag.to_string(),
            assets,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct StubRepo {
    pub owner: String,
    pub name: String,
    /// Newest first, as the listing API returns them.
    pub releases: Vec<StubRelease>,
    pub readme: Option<String>,
    /// When set, every listing request answers with this status.
    pub listing_status: Option<u16>,
}

impl StubRepo {
    pub fn new(owner: &str, name: &str, releases: Vec<StubRelease>) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
            releases,
            ..Self::default()
        }
    }

    /// `count` releases tagged `v{count}` down to `v1`, without assets.
    pub fn with_numbered_releases(owner: &str, name: &str, count: usize) -> Self {
        let releases = (1..=count)
            .rev()
            .map(|n| StubRelease::new(&format!("v{n}"), vec![]))
            .collect();
        Self::new(owner, name, releases)
    }
}

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub target: String,
    pub authorization: Option<String>,
    pub user_agent: Option<String>,
}

struct Shared {
    base_url: String,
    repos: Vec<StubRepo>,
    requests: Mutex<Vec<RecordedRequest>>,
}

pub struct StubServer {
    pub base_url: String,
    shared: Arc<Shared>,
    handle: JoinHandle<()>,
}

impl StubServer {
    pub async fn start(repos: Vec<StubRepo>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
        let base_url = format!("http://{}", listener.local_addr().expect("local addr"));
        let shared = Arc::new(Shared {
            base_url: base_url.clone(),
            repos,
            requests: Mutex::new(Vec::new()),
        });

        let accept_shared = shared.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let shared = accept_shared.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, &shared).await;
                });
            }
        });

        Self {
            base_url,
            shared,
            handle,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.shared.requests.lock().unwrap().clone()
    }

    pub fn listing_requests(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|r| r.target)
            .filter(|t| t.contains("/releases"))
            .collect()
    }

    pub fn asset_hits(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.target.starts_with("/assets/"))
            .count()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Accepts connections, reads the request head, writes `prefix` and then goes
/// quiet while holding the connection open.
pub async fn start_stalled(prefix: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stalled stub");
    let base_url = format!("http://{}", listener.local_addr().expect("local addr"));
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let prefix = prefix.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(&prefix).await;
                let _ = stream.flush().await;
                tokio::time::sleep(Duration::from_secs(300)).await;
                drop(stream);
            });
        }
    });
    base_url
}

fn header_value(head: &str, name: &str) -> Option<String> {
    head.split("\r\n").skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().to_string())
    })
}

async fn serve(mut stream: TcpStream, shared: &Shared) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let head = String::from_utf8_lossy(&buf).to_string();
    let target = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();
    shared.requests.lock().unwrap().push(RecordedRequest {
        target: target.clone(),
        authorization: header_value(&head, "authorization"),
        user_agent: header_value(&head, "user-agent"),
    });

    let (status, content_type, body) = route(shared, &target);
    let header = format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        reason(status),
        body.len()
    );
    stream.write_all(header.as_bytes()).await?;
    stream.write_all(&body).await?;
    stream.shutdown().await
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        403 => "Forbidden",
        404 => "Not Found",
        _ => "Error",
    }
}

fn not_found() -> (u16, &'static str, Vec<u8>) {
    (404, "application/json", br#"{"message":"Not Found"}"#.to_vec())
}

fn release_json(base_url: &str, release: &StubRelease) -> Value {
    let assets: Vec<Value> = release
        .assets
        .iter()
        .map(|a| {
            json!({
                "id": a.id,
                "name": a.name,
                "size": a.size(),
                "content_type": "application/octet-stream",
                "browser_download_url": format!("{base_url}/assets/{}", a.id),
            })
        })
        .collect();
    json!({ "tag_name": release.tag, "name": release.tag, "assets": assets })
}

fn route(shared: &Shared, target: &str) -> (u16, &'static str, Vec<u8>) {
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    let params: HashMap<&str, &str> = query
        .split('&')
        .filter_map(|kv| kv.split_once('='))
        .collect();
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    let find_repo = |owner: &str, name: &str| {
        shared
            .repos
            .iter()
            .find(|r| r.owner == owner && r.name == name)
    };

    match segments.as_slice() {
        ["repos", owner, name, "releases"] => {
            let Some(repo) = find_repo(*owner, *name) else {
                return not_found();
            };
            if let Some(status) = repo.listing_status {
                return (status, "application/json", br#"{"message":"refused"}"#.to_vec());
            }
            let page: usize = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
            let per_page: usize = params
                .get("per_page")
                .and_then(|p| p.parse().ok())
                .unwrap_or(30);
            let page_items: Vec<Value> = repo
                .releases
                .iter()
                .skip(page.saturating_sub(1) * per_page)
                .take(per_page)
                .map(|r| release_json(&shared.base_url, r))
                .collect();
            (200, "application/json", serde_json::to_vec(&page_items).unwrap())
        }
        ["repos", owner, name, "readme"] => match find_repo(*owner, *name) {
            Some(repo) if repo.readme.is_some() => {
                let body = json!({
                    "name": "README.md",
                    "download_url": format!("{}/raw/{owner}/{name}/README.md", shared.base_url),
                });
                (200, "application/json", serde_json::to_vec(&body).unwrap())
            }
            _ => not_found(),
        },
        ["raw", owner, name, "README.md"] => match find_repo(*owner, *name).and_then(|r| r.readme.clone()) {
            Some(text) => (200, "text/plain", text.into_bytes()),
            None => not_found(),
        },
        ["assets", id] => {
            let asset = id.parse::<u64>().ok().and_then(|id| {
                shared
                    .repos
                    .iter()
                    .flat_map(|r| r.releases.iter())
                    .flat_map(|rel| rel.assets.iter())
                    .find(|a| a.id == id)
            });
            match asset {
                Some(a) => (200, "application/octet-stream", a.body.clone()),
                None => not_found(),
            }
        }
        _ => not_found(),
    }
}
