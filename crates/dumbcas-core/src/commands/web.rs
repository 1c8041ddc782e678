//! Read-only HTTP view over a store.
//!
//! Two trees are exposed: raw blobs by digest, and the nodes catalog with
//! directory browsing reconstructed from each node's manifest.
//!
//! ```text
//! /                                         301 → /content/retrieve/nodes/
//! /content/retrieve/default/<digest>        raw blob
//! /content/retrieve/nodes/…                 catalog listing / node contents
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use crossbeam_channel::Sender;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::info;

use dumbcas_types::Digest;

use crate::cancel::CancelToken;
use crate::cas::CasTable;
use crate::entry::{self, Entry};
use crate::error::{DumbcasError, Result};
use crate::nodes::NodesTable;

const NODES_PREFIX: &str = "/content/retrieve/nodes/";

/// Shared read-only view over one store, cloned into every handler.
#[derive(Clone)]
pub struct WebState {
    inner: Arc<WebStateInner>,
}

struct WebStateInner {
    cas: CasTable,
    nodes: NodesTable,
}

impl WebState {
    pub fn new(store_root: &Path) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(WebStateInner {
                cas: CasTable::new(store_root)?,
                nodes: NodesTable::new(store_root)?,
            }),
        })
    }
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/", get(root_redirect))
        .route("/content/retrieve/default/{digest}", get(serve_blob))
        .route("/content/retrieve/nodes", get(serve_nodes))
        .route("/content/retrieve/nodes/", get(serve_nodes))
        .route("/content/retrieve/nodes/{*rest}", get(serve_nodes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 301 with an explicit Location; the canonical-redirect contract predates
/// 308 and clients of the original rely on 301.
fn moved_permanently(location: String) -> Response {
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, location)],
        Body::empty(),
    )
        .into_response()
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, message.to_string()).into_response()
}

fn internal_error(message: String) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
}

/// `<pre>` of anchors, one per child; directory children carry a trailing
/// slash so the links stay relative.
fn dir_listing(children: &[String]) -> Response {
    let mut out = String::from("<html><body><pre>");
    for child in children {
        out.push_str(&format!("<a href=\"{child}\">{child}</a>\n"));
    }
    out.push_str("</pre></body></html>");
    Html(out).into_response()
}

async fn root_redirect() -> Response {
    moved_permanently(NODES_PREFIX.to_string())
}

/// Stream one blob with an explicit Content-Length.
async fn blob_response(cas: &CasTable, digest: &Digest) -> Response {
    let path = cas.blob_path(digest);
    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return not_found("blob not found");
        }
        Err(e) => return internal_error(e.to_string()),
    };
    let len = match file.metadata().await {
        Ok(m) => m.len(),
        Err(e) => return internal_error(e.to_string()),
    };
    (
        [(header::CONTENT_LENGTH, len.to_string())],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}

async fn serve_blob(State(state): State<WebState>, UrlPath(digest): UrlPath<String>) -> Response {
    let Ok(digest) = Digest::parse(&digest) else {
        return not_found("not a digest");
    };
    blob_response(&state.inner.cas, &digest).await
}

/// Catalog dispatch. A path that extends a known node relpath is answered
/// from that node's manifest; anything else is treated as a directory
/// listing over the catalog, with canonical trailing-slash redirects.
async fn serve_nodes(State(state): State<WebState>, uri: Uri) -> Response {
    let path = uri.path().to_string();
    let Some(p) = path.strip_prefix(NODES_PREFIX) else {
        // Bare `/content/retrieve/nodes`.
        return moved_permanently(format!("{path}/"));
    };

    let mut rel_paths = Vec::new();
    let iter = match state.inner.nodes.enumerate() {
        Ok(iter) => iter,
        Err(e) => return internal_error(e.to_string()),
    };
    for node_entry in iter {
        match node_entry {
            Ok(node_entry) => rel_paths.push(node_entry.rel_path),
            Err(e) => return internal_error(e.to_string()),
        }
    }
    rel_paths.sort();

    if !p.is_empty() {
        for rel in &rel_paths {
            let Some(rest) = p.strip_prefix(rel.as_str()) else {
                continue;
            };
            if rest.is_empty() {
                return moved_permanently(format!("{path}/"));
            }
            let Some(sub) = rest.strip_prefix('/') else {
                // Prefix match inside a component, e.g. `name2` vs `name`.
                continue;
            };
            let node = match state.inner.nodes.read(rel) {
                Ok(node) => node,
                Err(e) => return internal_error(e.to_string()),
            };
            let root = match entry::load_entry(&state.inner.cas, &node.entry) {
                Ok(root) => root,
                Err(e) => return not_found(&format!("failed to load the entry file: {e}")),
            };
            return serve_entry(&state.inner.cas, &root, &path, sub).await;
        }
    }

    if !p.ends_with('/') && !p.is_empty() {
        return moved_permanently(format!("{path}/"));
    }

    // List the catalog level below prefix `p`, one entry per distinct child.
    let mut children: Vec<String> = Vec::new();
    for rel in &rel_paths {
        if let Some(rest) = rel.strip_prefix(p) {
            let child = match rest.find('/') {
                Some(i) => rest[..=i].to_string(),
                None => rest.to_string(),
            };
            children.push(child);
        }
    }
    children.dedup();
    if children.is_empty() {
        return not_found("no such node");
    }
    dir_listing(&children)
}

/// Resolve `sub` against a manifest tree: stream a file leaf, list an inner
/// entry, canonicalize a directory path missing its trailing slash.
async fn serve_entry(cas: &CasTable, root: &Entry, url_path: &str, sub: &str) -> Response {
    let trimmed = sub.trim_end_matches('/');
    let wants_listing = trimmed.len() < sub.len() || sub.is_empty();

    let mut cur = root;
    if !trimmed.is_empty() {
        for comp in trimmed.split('/') {
            match cur.files.get(comp) {
                Some(next) => cur = next,
                None => return not_found("no such file"),
            }
        }
    }

    if wants_listing {
        if cur.files.is_empty() && cur.is_file() {
            // A file addressed as a directory.
            return not_found("not a directory");
        }
        let children: Vec<String> = cur
            .files
            .iter()
            .map(|(name, child)| {
                if child.files.is_empty() && child.is_file() {
                    name.clone()
                } else {
                    format!("{name}/")
                }
            })
            .collect();
        return dir_listing(&children);
    }

    match cur.sha1 {
        Some(digest) => blob_response(cas, &digest).await,
        None => moved_permanently(format!("{url_path}/")),
    }
}

/// Serve the store until the token cancels. Binds `port` on all interfaces
/// (0 picks an ephemeral port); the bound address is reported through
/// `bound_tx` once listening.
pub fn run(
    store_root: &Path,
    port: u16,
    cancel: CancelToken,
    bound_tx: Option<Sender<SocketAddr>>,
) -> Result<()> {
    let state = WebState::new(store_root)?;
    let app = router(state);

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| DumbcasError::Other(format!("failed to build tokio runtime: {e}")))?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| DumbcasError::Other(format!("failed to bind port {port}: {e}")))?;
        let addr = listener.local_addr().map_err(DumbcasError::Io)?;
        info!("serving store on http://{addr}");
        if let Some(tx) = bound_tx {
            let _ = tx.send(addr);
        }

        let shutdown = async move {
            let _ = tokio::task::spawn_blocking(move || cancel.wait()).await;
            info!("shutting down");
        };
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(DumbcasError::Io)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel;
    use crate::testutil;
    use tower::ServiceExt;

    async fn get_response(router: Router, path: &str) -> Response {
        let req = axum::http::Request::builder()
            .uri(path)
            .body(Body::empty())
            .unwrap();
        router.oneshot(req).await.unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn location(response: &Response) -> &str {
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    /// Store with the canonical fixture tree plus a wired-up router.
    fn fixture_app() -> (tempfile::TempDir, Router, testutil::FixtureDigests) {
        let (tmp, cas, nodes) = testutil::temp_store();
        let digests = testutil::archive_fixture(&cas, &nodes);
        let state = WebState::new(tmp.path()).unwrap();
        (tmp, router(state), digests)
    }

    #[tokio::test]
    async fn root_redirects_to_the_catalog() {
        let (_tmp, app, _) = fixture_app();
        let resp = get_response(app, "/").await;
        assert_eq!(resp.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(location(&resp), "/content/retrieve/nodes/");
    }

    #[tokio::test]
    async fn blob_is_served_with_content_length() {
        let (_tmp, app, digests) = fixture_app();
        let resp = get_response(
            app,
            &format!("/content/retrieve/default/{}", digests.file1),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_LENGTH).unwrap(),
            &"8".parse::<axum::http::HeaderValue>().unwrap()
        );
        assert_eq!(body_string(resp).await, "content1");
    }

    #[tokio::test]
    async fn manifest_blob_is_retrievable() {
        let (_tmp, app, digests) = fixture_app();
        let resp = get_response(
            app.clone(),
            &format!("/content/retrieve/default/{}", digests.manifest),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_string(resp).await.contains("file1"));

        let resp = get_response(
            app,
            &format!("/content/retrieve/default/{}", digests.file2),
        )
        .await;
        assert_eq!(body_string(resp).await, "content2");
    }

    #[tokio::test]
    async fn unknown_blob_is_404() {
        let (_tmp, app, _) = fixture_app();
        let missing = Digest::compute(b"never stored");
        let resp =
            get_response(app, &format!("/content/retrieve/default/{missing}")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_digest_is_404() {
        let (_tmp, app, _) = fixture_app();
        let resp = get_response(app, "/content/retrieve/default/not-a-digest").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn catalog_root_lists_month_and_tags() {
        let (_tmp, app, _) = fixture_app();
        let resp = get_response(app, "/content/retrieve/nodes/").await;
        assert_eq!(resp.status(), StatusCode::OK);

        let month = chrono::Utc::now().format("%Y-%m").to_string();
        let expected = format!(
            "<html><body><pre><a href=\"{month}/\">{month}/</a>\n<a href=\"tags/\">tags/</a>\n</pre></body></html>"
        );
        assert_eq!(body_string(resp).await, expected);
    }

    #[tokio::test]
    async fn catalog_without_slash_redirects() {
        let (_tmp, app, _) = fixture_app();
        let resp = get_response(app, "/content/retrieve/nodes").await;
        assert_eq!(resp.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(location(&resp), "/content/retrieve/nodes/");
    }

    #[tokio::test]
    async fn unknown_prefix_is_404() {
        let (_tmp, app, _) = fixture_app();
        let resp = get_response(app, "/content/retrieve/nodes/foo/").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn node_without_slash_redirects() {
        let (_tmp, app, digests) = fixture_app();
        let path = format!("{NODES_PREFIX}{}", digests.node_rel_path);
        let resp = get_response(app, &path).await;
        assert_eq!(resp.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(location(&resp), format!("{path}/"));
    }

    #[tokio::test]
    async fn node_root_lists_manifest_children() {
        let (_tmp, app, digests) = fixture_app();
        let resp = get_response(
            app,
            &format!("{NODES_PREFIX}{}/", digests.node_rel_path),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_string(resp).await;
        assert!(body.contains("<a href=\"dir1/\">dir1/</a>"), "{body}");
        assert!(body.contains("<a href=\"file1\">file1</a>"), "{body}");
    }

    #[tokio::test]
    async fn file_leaves_stream_their_blobs() {
        let (_tmp, app, digests) = fixture_app();
        let base = format!("{NODES_PREFIX}{}", digests.node_rel_path);

        let resp = get_response(app.clone(), &format!("{base}/file1")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "content1");

        let resp = get_response(app, &format!("{base}/dir1/dir2/file2")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "content2");
    }

    #[tokio::test]
    async fn missing_manifest_entry_is_404() {
        let (_tmp, app, digests) = fixture_app();
        let resp = get_response(
            app,
            &format!("{NODES_PREFIX}{}/dir1/dir2/file3", digests.node_rel_path),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn inner_entry_without_slash_redirects() {
        let (_tmp, app, digests) = fixture_app();
        let path = format!("{NODES_PREFIX}{}/dir1/dir2", digests.node_rel_path);
        let resp = get_response(app, &path).await;
        assert_eq!(resp.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(location(&resp), format!("{path}/"));
    }

    #[tokio::test]
    async fn inner_entry_with_slash_lists_children() {
        let (_tmp, app, digests) = fixture_app();
        let resp = get_response(
            app,
            &format!("{NODES_PREFIX}{}/dir1/dir2/", digests.node_rel_path),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_string(resp).await;
        assert!(body.contains("<a href=\"file2\">file2</a>"), "{body}");
    }

    #[test]
    fn server_shuts_down_on_cancel() {
        let (tmp, cas, nodes) = testutil::temp_store();
        testutil::archive_fixture(&cas, &nodes);

        let (handle, token) = cancel::cancellation();
        let (bound_tx, bound_rx) = crossbeam_channel::bounded(1);
        let root = tmp.path().to_path_buf();
        let server = std::thread::spawn(move || run(&root, 0, token, Some(bound_tx)));

        let addr = bound_rx
            .recv_timeout(std::time::Duration::from_secs(10))
            .expect("server never reported its address");
        assert_ne!(addr.port(), 0);

        handle.cancel();
        server.join().unwrap().unwrap();
    }
}
