//! 本地资源服务器
//!
//! 给外部渲染端提供计划中引用的图片、音频和字体，以及解析好的计划本身。
//! 服务器由 `AssetServer` 句柄持有，`shutdown()` 或 drop 时停止。

use axum::{
    extract::{Path as UrlPath, Request, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use reqwest::Url;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeFile;
use tracing::{debug, info, warn};

use crate::error::{Result, ShortsError};
use crate::timeline::RenderPlan;

struct AssetState {
    files: HashSet<PathBuf>,
    plan: RwLock<Option<String>>,
}

pub struct AssetServer {
    addr: SocketAddr,
    base_url: Url,
    state: Arc<AssetState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl AssetServer {
    /// 启动服务器，只提供 `assets` 中登记的文件
    ///
    /// 端口被占用时依次尝试 `port + 1`，最多 `attempts` 次。
    pub async fn start<I, P>(assets: I, port: u16, attempts: u16) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let files = assets
            .into_iter()
            .map(|p| normalize(p.as_ref()))
            .collect::<Result<HashSet<_>>>()?;

        let listener = bind_with_retry(port, attempts).await?;
        let addr = listener.local_addr()?;
        let base_url = Url::parse(&format!("http://{}/", addr))
            .map_err(|e| ShortsError::Config(format!("Invalid asset server address: {}", e)))?;

        let state = Arc::new(AssetState {
            files,
            plan: RwLock::new(None),
        });
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
            .allow_headers([header::RANGE, header::CONTENT_TYPE, header::ORIGIN]);

        let app = Router::new()
            .route("/plan.json", get(serve_plan))
            .route("/assets/{*path}", get(serve_asset))
            .layer(cors)
            .with_state(state.clone());

        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                rx.await.ok();
            });
            if let Err(e) = server.await {
                warn!("Asset server error: {}", e);
            }
        });

        info!("Asset server started on {}", addr);
        Ok(Self {
            addr,
            base_url,
            state,
            shutdown: Some(tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// 文件对应的 URL，路径各段做百分号编码
    pub fn url_for(&self, path: &Path) -> String {
        let path = normalize(path).unwrap_or_else(|_| path.to_path_buf());
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("assets");
            for component in path.components() {
                if let Component::Normal(part) = component {
                    segments.push(&part.to_string_lossy());
                }
            }
        }
        url.to_string()
    }

    /// 把计划中的引用换成本服务器的 URL 并在 `/plan.json` 发布
    pub async fn publish_plan(&self, plan: &RenderPlan) -> Result<RenderPlan> {
        let resolved = plan.map_references(|r| self.url_for(Path::new(r)));
        let json = serde_json::to_string_pretty(&resolved)?;
        *self.state.plan.write().await = Some(json);
        Ok(resolved)
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }
        if let Some(task) = self.task.take() {
            task.await.ok();
        }
        info!("Asset server stopped");
    }
}

impl Drop for AssetServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }
    }
}

async fn bind_with_retry(port: u16, attempts: u16) -> Result<TcpListener> {
    for attempt in 0..attempts.max(1) {
        let Some(candidate) = port.checked_add(attempt) else {
            break;
        };
        match TcpListener::bind((Ipv4Addr::LOCALHOST, candidate)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                warn!("Port {} in use, trying next", candidate);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(ShortsError::Config(format!(
        "No free port for asset server starting at {} after {} attempts",
        port, attempts
    )))
}

/// 转成绝对路径并按字面消去 `.` 和 `..`，不访问文件系统
fn normalize(path: &Path) -> Result<PathBuf> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// 只提供登记过的文件；内容类型、Range 请求由 `ServeFile` 处理
async fn serve_asset(
    State(state): State<Arc<AssetState>>,
    UrlPath(path): UrlPath<String>,
    request: Request,
) -> Response {
    let file = PathBuf::from(format!("/{}", path.trim_start_matches('/')));
    if !state.files.contains(&file) {
        debug!("Rejected unregistered asset: {}", file.display());
        return (StatusCode::NOT_FOUND, format!("File not found: {}", file.display())).into_response();
    }

    match ServeFile::new(&file).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}

async fn serve_plan(State(state): State<Arc<AssetState>>) -> Response {
    match state.plan.read().await.clone() {
        Some(json) => ([(header::CONTENT_TYPE, "application/json")], json).into_response(),
        None => (StatusCode::NOT_FOUND, "No plan published").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::{synthesize, SegmentTiming, TimelineSettings};

    #[test]
    fn normalize_removes_dot_segments() {
        assert_eq!(normalize(Path::new("/a/sub/../b/./c.jpg")).unwrap(), PathBuf::from("/a/b/c.jpg"));
        assert_eq!(normalize(Path::new("/../a.jpg")).unwrap(), PathBuf::from("/a.jpg"));
        assert!(normalize(Path::new("rel/x.png")).unwrap().is_absolute());
    }

    #[tokio::test]
    async fn parent_dir_references_resolve_to_the_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("a.jpg");
        std::fs::write(&image, b"jpg").unwrap();
        let reference = dir.path().join("sub").join("..").join("a.jpg");

        let server = AssetServer::start([&reference], 0, 1).await.unwrap();
        let url = server.url_for(&reference);
        assert!(!url.contains("/sub/"));
        assert_eq!(url, server.url_for(&image));

        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.bytes().await.unwrap().as_ref(), b"jpg");

        server.shutdown().await;
    }

    #[tokio::test]
    async fn assets_support_range_and_cors() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("segment_0.mp3");
        std::fs::write(&audio, b"0123456789").unwrap();

        let server = AssetServer::start([&audio], 0, 1).await.unwrap();
        let response = reqwest::Client::new()
            .get(server.url_for(&audio))
            .header("Range", "bytes=2-5")
            .header("Origin", "http://localhost:3000")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()["content-type"].to_str().unwrap(), "audio/mpeg");
        assert_eq!(
            response.headers()["access-control-allow-origin"].to_str().unwrap(),
            "*"
        );
        assert_eq!(response.bytes().await.unwrap().as_ref(), b"2345");

        server.shutdown().await;
    }

    #[tokio::test]
    async fn serves_only_registered_files() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("차량 1.png");
        std::fs::write(&image, b"png-bytes").unwrap();
        let other = dir.path().join("secret.txt");
        std::fs::write(&other, b"nope").unwrap();

        let server = AssetServer::start([&image], 0, 1).await.unwrap();

        let url = server.url_for(&image);
        assert!(url.contains("/assets/"));
        assert!(!url.contains(' '));

        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "image/png"
        );
        assert_eq!(response.bytes().await.unwrap().as_ref(), b"png-bytes");

        let response = reqwest::get(server.url_for(&other)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn retries_when_port_is_taken() {
        let taken = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = taken.local_addr().unwrap().port();

        match AssetServer::start(Vec::<PathBuf>::new(), port, 20).await {
            Ok(server) => {
                assert_ne!(server.addr().port(), port);
                server.shutdown().await;
            }
            // 后面的端口也可能恰好都被占用
            Err(e) => assert!(matches!(e, ShortsError::Config(_))),
        }

        let err = AssetServer::start(Vec::<PathBuf>::new(), port, 1).await;
        assert!(matches!(err, Err(ShortsError::Config(_))));
    }

    #[tokio::test]
    async fn publishes_resolved_plan() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("a.jpg");
        std::fs::write(&image, b"jpg").unwrap();
        let image = image.to_string_lossy().into_owned();

        let plan = synthesize(
            &[SegmentTiming {
                duration_secs: 1.0,
                captions: vec!["a".into()],
                text: "a".into(),
                images: vec![image.clone()],
                audio: None,
            }],
            &TimelineSettings::default(),
        )
        .unwrap();

        let server = AssetServer::start([&image], 0, 1).await.unwrap();
        let base = format!("http://{}", server.addr());

        let response = reqwest::get(format!("{}/plan.json", base)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

        let resolved = server.publish_plan(&plan).await.unwrap();
        let served: RenderPlan = reqwest::get(format!("{}/plan.json", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(served, resolved);

        let slide_url = &served.segments[0].slides[0].image;
        assert!(slide_url.starts_with(&base));
        let body = reqwest::get(slide_url.as_str()).await.unwrap().bytes().await.unwrap();
        assert_eq!(body.as_ref(), b"jpg");

        server.shutdown().await;
    }
}
