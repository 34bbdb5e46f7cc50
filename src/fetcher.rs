//! Remote clip resolution against the Vimeo player.
//!
//! Resolving a clip takes two requests: the public clip page, which embeds a
//! `config_url`, and the player config behind that URL, which lists the
//! progressive (single-file mp4) renditions. Both requests share one cookie
//! jar that lives only as long as the call.

use std::{
    io::{self, Write},
    sync::LazyLock,
    time::Duration,
};

use log::debug;
use regex::Regex;
use serde::Deserialize;
use ureq::{Agent, AgentBuilder};

use crate::error::FetchError;

pub const VIMEO_BASE_URL: &str = "https://vimeo.com";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/74.0.3729.169 Safari/537.36";
const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.5";

static CONFIG_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)"config_url":"(.+?)""#).expect("config_url pattern"));

/// One downloadable rendition of a clip.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProgressiveStream {
    pub height: u32,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipManifest {
    pub title: String,
    pub streams: Vec<ProgressiveStream>,
}

impl ClipManifest {
    pub fn best_stream(&self, resolution: u32) -> Option<&ProgressiveStream> {
        select_stream(&self.streams, resolution)
    }
}

/// Picks the rendition for `resolution`: an exact height wins outright,
/// otherwise the smallest height difference, ties going to the earlier entry.
pub fn select_stream(streams: &[ProgressiveStream], resolution: u32) -> Option<&ProgressiveStream> {
    let mut best: Option<(&ProgressiveStream, u32)> = None;
    for stream in streams {
        if stream.height == resolution {
            return Some(stream);
        }
        let difference = stream.height.abs_diff(resolution);
        if best.is_none_or(|(_, current)| difference < current) {
            best = Some((stream, difference));
        }
    }
    best.map(|(stream, _)| stream)
}

/// Where remote clips come from. The cache only talks to this trait.
pub trait ClipSource: Send + Sync + 'static {
    fn resolve_stream(&self, clip: u64) -> Result<ClipManifest, FetchError>;

    /// Copies the body at `url` into `sink`, returning the byte count.
    fn download(&self, url: &str, sink: &mut dyn Write) -> Result<u64, FetchError>;
}

#[derive(Debug, Clone)]
pub struct VimeoFetcher {
    base_url: String,
    timeout: Duration,
}

impl Default for VimeoFetcher {
    fn default() -> Self {
        Self::new(VIMEO_BASE_URL)
    }
}

impl VimeoFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Agent for the page and config requests: each request, body included,
    /// must finish within `timeout`. A fresh agent carries a fresh cookie jar.
    fn page_agent(&self) -> Agent {
        AgentBuilder::new()
            .timeout(self.timeout)
            .redirects(0)
            .user_agent(USER_AGENT)
            .build()
    }

    /// Agent for clip bodies. Only connecting and each individual read are
    /// bounded, so a large clip that keeps arriving is never cut off.
    fn download_agent(&self) -> Agent {
        AgentBuilder::new()
            .timeout_connect(self.timeout)
            .timeout_read(self.timeout)
            .redirects(0)
            .user_agent(USER_AGENT)
            .build()
    }

    fn get_text(&self, agent: &Agent, url: &str) -> Result<String, FetchError> {
        let response = agent
            .get(url)
            .set("Accept", ACCEPT)
            .set("Accept-Language", ACCEPT_LANGUAGE)
            .call()
            .map_err(|err| map_ureq_error(url, err))?;
        ensure_success(url, response.status())?;
        response
            .into_string()
            .map_err(|err| map_io_error(url, err))
    }
}

impl ClipSource for VimeoFetcher {
    fn resolve_stream(&self, clip: u64) -> Result<ClipManifest, FetchError> {
        let agent = self.page_agent();
        let page_url = format!("{}/{clip}", self.base_url);
        debug!("Fetching clip page {page_url}");
        let page = self.get_text(&agent, &page_url)?;

        let config_url = extract_config_url(&page)?;
        debug!("Fetching player config {config_url}");
        let config = self.get_text(&agent, &config_url)?;
        parse_player_config(clip, &config)
    }

    fn download(&self, url: &str, sink: &mut dyn Write) -> Result<u64, FetchError> {
        let response = self
            .download_agent()
            .get(url)
            .call()
            .map_err(|err| map_ureq_error(url, err))?;
        ensure_success(url, response.status())?;
        let mut reader = response.into_reader();
        io::copy(&mut reader, sink).map_err(|err| map_io_error(url, err))
    }
}

/// Pulls the player config URL out of a clip page. The pattern has to match
/// exactly once; JSON escaping (`\/`) is removed from the result.
pub fn extract_config_url(page: &str) -> Result<String, FetchError> {
    let mut matches = CONFIG_URL.captures_iter(page);
    let Some(first) = matches.next() else {
        return Err(FetchError::PatternMismatch { found: 0 });
    };
    let extra = matches.count();
    if extra > 0 {
        return Err(FetchError::PatternMismatch { found: extra + 1 });
    }
    Ok(first[1].replace('\\', ""))
}

#[derive(Debug, Deserialize)]
struct PlayerConfig {
    request: PlayerRequest,
    #[serde(default)]
    video: PlayerVideo,
}

#[derive(Debug, Deserialize)]
struct PlayerRequest {
    files: PlayerFiles,
}

#[derive(Debug, Deserialize)]
struct PlayerFiles {
    #[serde(default)]
    progressive: Vec<ProgressiveStream>,
}

#[derive(Debug, Default, Deserialize)]
struct PlayerVideo {
    #[serde(default)]
    title: String,
}

pub fn parse_player_config(clip: u64, raw: &str) -> Result<ClipManifest, FetchError> {
    let config: PlayerConfig = serde_json::from_str(raw)?;
    if config.request.files.progressive.is_empty() {
        return Err(FetchError::NoStreams { clip });
    }
    Ok(ClipManifest {
        title: config.video.title,
        streams: config.request.files.progressive,
    })
}

fn ensure_success(url: &str, status: u16) -> Result<(), FetchError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(FetchError::Status {
            url: url.to_string(),
            status,
        })
    }
}

fn map_ureq_error(url: &str, err: ureq::Error) -> FetchError {
    match err {
        ureq::Error::Status(status, _) => FetchError::Status {
            url: url.to_string(),
            status,
        },
        ureq::Error::Transport(transport) => {
            let timed_out = std::error::Error::source(&transport)
                .and_then(|source| source.downcast_ref::<io::Error>())
                .is_some_and(is_timeout)
                || transport.to_string().contains("timed out");
            if timed_out {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Transport {
                    url: url.to_string(),
                    message: transport.to_string(),
                }
            }
        }
    }
}

fn map_io_error(url: &str, err: io::Error) -> FetchError {
    if is_timeout(&err) {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::{Body, Bytes},
        extract::State,
        http::{HeaderMap, StatusCode, header},
        response::{IntoResponse, Response},
        routing::get,
    };
    use futures::StreamExt;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn stream(height: u32, url: &str) -> ProgressiveStream {
        ProgressiveStream {
            height,
            url: url.to_string(),
        }
    }

    #[test]
    fn exact_resolution_wins() {
        let streams = vec![stream(720, "a"), stream(1080, "b"), stream(1072, "c")];
        assert_eq!(select_stream(&streams, 1080).unwrap().url, "b");
    }

    #[test]
    fn nearest_resolution_otherwise() {
        let streams = vec![stream(360, "a"), stream(540, "b"), stream(1440, "c")];
        assert_eq!(select_stream(&streams, 720).unwrap().url, "b");
        assert_eq!(select_stream(&streams, 2160).unwrap().url, "c");
    }

    #[test]
    fn ties_go_to_first_seen() {
        let streams = vec![stream(960, "low"), stream(1200, "high")];
        assert_eq!(select_stream(&streams, 1080).unwrap().url, "low");
        let flipped = vec![stream(1200, "high"), stream(960, "low")];
        assert_eq!(select_stream(&flipped, 1080).unwrap().url, "high");
    }

    #[test]
    fn no_streams_no_selection() {
        assert!(select_stream(&[], 1080).is_none());
    }

    #[test]
    fn config_url_is_extracted_and_unescaped() {
        let page = r#"<script>window.vimeo = {"config_url":"https:\/\/player.vimeo.com\/video\/1\/config?s=abc","other":1};</script>"#;
        assert_eq!(
            extract_config_url(page).unwrap(),
            "https://player.vimeo.com/video/1/config?s=abc"
        );
    }

    #[test]
    fn config_url_must_appear_exactly_once() {
        assert!(matches!(
            extract_config_url("<html>nothing here</html>"),
            Err(FetchError::PatternMismatch { found: 0 })
        ));
        let twice = r#""config_url":"https://a" "config_url":"https://b""#;
        assert!(matches!(
            extract_config_url(twice),
            Err(FetchError::PatternMismatch { found: 2 })
        ));
    }

    #[test]
    fn player_config_lists_progressive_streams() {
        let raw = r#"{
            "request": {"files": {"progressive": [
                {"height": 720, "width": 1280, "url": "https://cdn/720.mp4", "fps": 25},
                {"height": 1080, "width": 1920, "url": "https://cdn/1080.mp4", "fps": 25}
            ], "dash": {}}},
            "video": {"title": "Jellyfin Pre-Roll Popcorn", "id": 1}
        }"#;
        let manifest = parse_player_config(1, raw).unwrap();
        assert_eq!(manifest.title, "Jellyfin Pre-Roll Popcorn");
        assert_eq!(manifest.streams.len(), 2);
        assert_eq!(manifest.best_stream(1080).unwrap().url, "https://cdn/1080.mp4");
    }

    #[test]
    fn player_config_without_streams_fails() {
        let raw = r#"{"request": {"files": {}}}"#;
        assert!(matches!(
            parse_player_config(9, raw),
            Err(FetchError::NoStreams { clip: 9 })
        ));
        assert!(matches!(
            parse_player_config(9, "not json"),
            Err(FetchError::InvalidConfig(_))
        ));
    }


    /// Local HTTP server that stops when dropped.
    struct TestServer {
        base_url: String,
        shutdown_tx: Option<oneshot::Sender<()>>,
    }

    impl TestServer {
        async fn new(router: Router) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let (shutdown_tx, shutdown_rx) = oneshot::channel();

            let server = axum::serve(listener, router).with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            });
            tokio::spawn(async move {
                server.await.unwrap();
            });

            Self {
                base_url: format!("http://{addr}"),
                shutdown_tx: Some(shutdown_tx),
            }
        }

        fn url(&self, path: &str) -> String {
            format!("{}{path}", self.base_url)
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            if let Some(shutdown_tx) = self.shutdown_tx.take() {
                let _ = shutdown_tx.send(());
            }
        }
    }

    /// ureq blocks, so it runs off the runtime thread that drives the server.
    async fn blocking<T: Send + 'static>(call: impl FnOnce() -> T + Send + 'static) -> T {
        tokio::task::spawn_blocking(call).await.unwrap()
    }

    const PLAYER_JSON: &str = r#"{"request":{"files":{"progressive":[{"height":1080,"url":"http://cdn/1080.mp4"}]}},"video":{"title":"Popcorn"}}"#;

    type Cookies = Arc<Mutex<Vec<String>>>;
    type Hits = Arc<AtomicUsize>;

    async fn clip_page(headers: HeaderMap) -> impl IntoResponse {
        let host = headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        let page = format!(r#"<script>{{"config_url":"http:\/\/{host}\/config\/42"}}</script>"#);
        ([(header::SET_COOKIE, "vuid=abc123; Path=/")], page)
    }

    async fn player_config(State(cookies): State<Cookies>, headers: HeaderMap) -> impl IntoResponse {
        let cookie = headers
            .get(header::COOKIE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        cookies.lock().push(cookie);
        ([(header::CONTENT_TYPE, "application/json")], PLAYER_JSON)
    }

    async fn gone(State(hits): State<Hits>) -> impl IntoResponse {
        hits.fetch_add(1, Ordering::SeqCst);
        (StatusCode::NOT_FOUND, "gone")
    }

    async fn moved() -> impl IntoResponse {
        (StatusCode::FOUND, [(header::LOCATION, "/elsewhere")])
    }

    async fn elsewhere(State(hits): State<Hits>) -> impl IntoResponse {
        hits.fetch_add(1, Ordering::SeqCst);
        PLAYER_JSON
    }

    async fn slow_page() -> &'static str {
        tokio::time::sleep(Duration::from_millis(800)).await;
        "too late"
    }

    const SLOW_CHUNKS: usize = 12;
    const CHUNK_LEN: usize = 1024;

    /// Keeps the connection busy for well over a second, one small chunk
    /// every 100 ms.
    async fn trickled_clip() -> Response {
        let chunks = futures::stream::iter(
            (0..SLOW_CHUNKS).map(|_| Ok::<_, axum::BoxError>(Bytes::from(vec![7u8; CHUNK_LEN]))),
        )
        .then(|chunk| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            chunk
        });
        Response::builder()
            .status(StatusCode::OK)
            .body(Body::from_stream(chunks))
            .unwrap()
    }

    #[tokio::test]
    async fn resolve_stream_reuses_cookies_within_one_call() {
        let cookies = Cookies::default();
        let router = Router::new()
            .route("/42", get(clip_page))
            .route("/config/42", get(player_config))
            .with_state(cookies.clone());
        let server = TestServer::new(router).await;

        let fetcher = VimeoFetcher::new(&server.base_url);
        let manifest = blocking(move || fetcher.resolve_stream(42)).await.unwrap();
        assert_eq!(manifest.title, "Popcorn");
        assert_eq!(manifest.streams, vec![stream(1080, "http://cdn/1080.mp4")]);

        let seen = cookies.lock();
        assert_eq!(seen.len(), 1);
        assert!(
            seen[0].contains("vuid=abc123"),
            "config request should carry the page cookie: {:?}",
            seen[0]
        );
    }

    #[tokio::test]
    async fn cookies_do_not_outlive_the_call() {
        let cookies = Cookies::default();
        let router = Router::new()
            .route("/config/42", get(player_config))
            .with_state(cookies.clone());
        let server = TestServer::new(router).await;

        // Cookies are keyed by host, not port, so a shared jar would leak the
        // page cookie into the next call.
        let page_router = Router::new().route("/42", get(clip_page));
        let page_server = TestServer::new(page_router).await;
        let fetcher = VimeoFetcher::new(&page_server.base_url);
        let _ = blocking(move || fetcher.resolve_stream(42)).await;

        let fetcher = VimeoFetcher::new(&server.base_url);
        let url = server.url("/config/42");
        blocking(move || fetcher.download(&url, &mut Vec::<u8>::new()))
            .await
            .unwrap();
        assert_eq!(*cookies.lock(), vec![String::new()]);
    }

    #[tokio::test]
    async fn non_success_status_is_a_hard_failure() {
        let hits = Hits::default();
        let router = Router::new().route("/7", get(gone)).with_state(hits.clone());
        let server = TestServer::new(router).await;

        let fetcher = VimeoFetcher::new(&server.base_url);
        let err = blocking(move || fetcher.resolve_stream(7)).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        assert!(!err.is_retryable());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn redirects_are_not_followed() {
        let hits = Hits::default();
        let router = Router::new()
            .route("/7", get(moved))
            .route("/elsewhere", get(elsewhere))
            .with_state(hits.clone());
        let server = TestServer::new(router).await;

        let fetcher = VimeoFetcher::new(&server.base_url);
        let err = blocking(move || fetcher.resolve_stream(7)).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 302, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn slow_page_times_out() {
        let server = TestServer::new(Router::new().route("/7", get(slow_page))).await;

        let fetcher =
            VimeoFetcher::new(&server.base_url).with_timeout(Duration::from_millis(200));
        let err = blocking(move || fetcher.resolve_stream(7)).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }), "got {err:?}");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn download_copies_body() {
        let router = Router::new().route("/clip.mp4", get(|| async { "mp4-bytes" }));
        let server = TestServer::new(router).await;

        let fetcher = VimeoFetcher::new(&server.base_url);
        let url = server.url("/clip.mp4");
        let (written, sink) = blocking(move || {
            let mut sink = Vec::new();
            let written = fetcher.download(&url, &mut sink);
            (written, sink)
        })
        .await;
        assert_eq!(written.unwrap(), 9);
        assert_eq!(sink, b"mp4-bytes");
    }

    #[tokio::test]
    async fn long_download_outlasts_the_request_timeout() {
        let server =
            TestServer::new(Router::new().route("/clip.mp4", get(trickled_clip))).await;

        let fetcher =
            VimeoFetcher::new(&server.base_url).with_timeout(Duration::from_millis(400));
        let url = server.url("/clip.mp4");
        let (written, sink) = blocking(move || {
            let mut sink = Vec::new();
            let written = fetcher.download(&url, &mut sink);
            (written, sink)
        })
        .await;
        assert_eq!(written.unwrap(), (SLOW_CHUNKS * CHUNK_LEN) as u64);
        assert_eq!(sink.len(), SLOW_CHUNKS * CHUNK_LEN);
    }
}
