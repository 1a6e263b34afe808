use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::camera::{CameraSession, SessionStatus};
use crate::config::ServerConfig;
use crate::lifecycle::{ControlReport, LifecycleController};
use crate::streaming::{self, mjpeg, PartFormat, StreamStats, StreamStatsSnapshot};

/// Web server state
#[derive(Clone)]
pub struct AppState {
    controller: Arc<LifecycleController>,
    page: Arc<str>,
    streams: Arc<RouteStats>,
}

#[derive(Default)]
struct RouteStats {
    preview: Arc<StreamStats>,
    video_feed: Arc<StreamStats>,
    webcam: Arc<StreamStats>,
}

impl AppState {
    pub fn new(controller: Arc<LifecycleController>, server: &ServerConfig) -> Self {
        Self {
            controller,
            page: Arc::from(server.page.as_str()),
            streams: Arc::new(RouteStats::default()),
        }
    }

    fn session(&self) -> &Arc<CameraSession> {
        self.controller.session()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/preview", get(preview_handler))
        .route("/video_feed", get(video_feed_handler))
        .route("/preview_webcam", get(preview_webcam_handler))
        .route("/start", get(start_handler))
        .route("/stop", get(stop_handler))
        .route("/reboot", get(reboot_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn run_server<F>(listener: TcpListener, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state);

    info!("Web server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

fn mjpeg_response(body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, mjpeg::CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// Index page handler
async fn index_handler(State(state): State<AppState>) -> Response {
    match tokio::fs::read_to_string(&*state.page).await {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!("Failed to load {}: {}", state.page, e);
            Html(FALLBACK_PAGE).into_response()
        }
    }
}

/// Low-resolution stream
async fn preview_handler(State(state): State<AppState>) -> Response {
    let chunks = streaming::slot_stream(
        state.session().low_res(),
        PartFormat::Plain,
        "preview",
        Arc::clone(&state.streams.preview),
    );
    mjpeg_response(Body::from_stream(chunks))
}

/// High-resolution stream with timestamps
async fn video_feed_handler(State(state): State<AppState>) -> Response {
    let chunks = streaming::slot_stream(
        state.session().high_res(),
        PartFormat::Timestamped,
        "video_feed",
        Arc::clone(&state.streams.video_feed),
    );
    mjpeg_response(Body::from_stream(chunks))
}

/// Webcam stream, captured on demand per client
async fn preview_webcam_handler(State(state): State<AppState>) -> Response {
    if !state.session().webcam_enabled() {
        return (StatusCode::NOT_FOUND, "Webcam not enabled").into_response();
    }

    let chunks = streaming::capture_stream(
        Arc::clone(state.session()),
        PartFormat::Timestamped,
        "preview_webcam",
        Arc::clone(&state.streams.webcam),
    );
    mjpeg_response(Body::from_stream(chunks))
}

async fn start_handler(State(state): State<AppState>) -> Json<ControlReport> {
    Json(state.controller.start().await)
}

async fn stop_handler(State(state): State<AppState>) -> Json<ControlReport> {
    Json(state.controller.stop().await)
}

async fn reboot_handler(State(state): State<AppState>) -> Json<ControlReport> {
    Json(state.controller.reboot().await)
}

#[derive(Serialize)]
struct StreamsResponse {
    preview: StreamStatsSnapshot,
    video_feed: StreamStatsSnapshot,
    preview_webcam: StreamStatsSnapshot,
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    backend: &'static str,
    camera: SessionStatus,
    frames_published: u64,
    streams: StreamsResponse,
}

/// Health check handler
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        backend: state.session().backend_name(),
        camera: state.controller.status(),
        frames_published: state.session().high_res().frames_published(),
        streams: StreamsResponse {
            preview: state.streams.preview.snapshot(),
            video_feed: state.streams.video_feed.snapshot(),
            preview_webcam: state.streams.webcam.snapshot(),
        },
    })
}

const FALLBACK_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>RPi MJPEG Streamer</title>
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <style>
        body { font-family: Arial, sans-serif; margin: 0; padding: 20px; background: #f0f0f0; text-align: center; }
        img { max-width: 100%; margin: 10px; border: 1px solid #ccc; }
        a { margin: 0 8px; }
    </style>
</head>
<body>
    <h1>RPi MJPEG Streamer</h1>
    <p>
        <a href="/start">Start</a>
        <a href="/stop">Stop</a>
        <a href="/reboot">Reboot</a>
        <a href="/health">Health</a>
    </p>
    <img src="/preview" alt="Preview">
    <img src="/preview_webcam" alt="Webcam">
</body>
</html>"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::mock::MockBackend;
    use crate::config::Config;
    use crate::streaming::Frame;
    use bytes::Bytes;
    use futures_util::StreamExt;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(backend: &Arc<MockBackend>, webcam: bool) -> (Router, Arc<LifecycleController>) {
        let mut config = Config::default();
        config.webcam.enabled = webcam;
        config.server.page = "does/not/exist.html".into();

        let session = Arc::new(CameraSession::new(backend.clone(), &config, None));
        let controller = Arc::new(LifecycleController::new(session, Duration::ZERO));
        let state = AppState::new(Arc::clone(&controller), &config.server);
        (router(state), controller)
    }

    fn get(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_string(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_webcam_disabled_returns_404() {
        let backend = Arc::new(MockBackend::default());
        let (app, controller) = app(&backend, false);

        let resp = app.oneshot(get("/preview_webcam")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(resp).await, "Webcam not enabled");

        let session = controller.session();
        assert_eq!(session.high_res().waiters(), 0);
        assert_eq!(session.low_res().waiters(), 0);
        assert_eq!(backend.secondary_opens(), 0);
    }

    #[tokio::test]
    async fn test_control_messages() {
        let backend = Arc::new(MockBackend::default());
        let (app, _controller) = app(&backend, true);

        let cases = [
            ("/start", r#"{"message":"Camera started"}"#),
            ("/start", r#"{"message":"Camera already running"}"#),
            ("/stop", r#"{"message":"Camera stopped"}"#),
            ("/stop", r#"{"message":"Camera already stopped"}"#),
            ("/reboot", r#"{"message":"Camera rebooted"}"#),
        ];

        for (uri, expected) in cases {
            let resp = app.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "{uri}");
            assert_eq!(body_string(resp).await, expected, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_video_feed_streams_published_frames() {
        let backend = Arc::new(MockBackend::default());
        let (app, controller) = app(&backend, false);

        let resp = app.oneshot(get("/video_feed")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );

        let slot = controller.session().high_res();
        let mut body = resp.into_body().into_data_stream();

        slot.publish(Frame::new(Bytes::from_static(b"\xff\xd8F1"), 1000));
        let first = body.next().await.unwrap().unwrap();
        slot.publish(Frame::new(Bytes::from_static(b"\xff\xd8F2"), 1050));
        let second = body.next().await.unwrap().unwrap();

        assert_eq!(
            &first[..],
            b"Content-Type: image/jpeg\r\n\r\n\xff\xd8F1---timestamp---1000\r\n--frame\r\n"
        );
        assert_eq!(
            &second[..],
            b"Content-Type: image/jpeg\r\n\r\n\xff\xd8F2---timestamp---1050\r\n--frame\r\n"
        );
    }

    #[tokio::test]
    async fn test_preview_stream_ends_on_stop() {
        let backend = Arc::new(MockBackend::default());
        let (app, controller) = app(&backend, false);
        controller.start().await;

        let resp = app.oneshot(get("/preview")).await.unwrap();
        let mut body = resp.into_body().into_data_stream();

        backend.push_frame(b"\xff\xd8high", b"\xff\xd8low");
        let part = body.next().await.unwrap().unwrap();
        assert_eq!(&part[..], b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xff\xd8low\r\n");

        controller.stop().await;
        let end = tokio::time::timeout(Duration::from_secs(1), body.next()).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_webcam_stream_frames() {
        let backend = Arc::new(MockBackend::default());
        let (app, controller) = app(&backend, true);
        controller.start().await;

        let resp = app.oneshot(get("/preview_webcam")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let mut body = resp.into_body().into_data_stream();

        let part = body.next().await.unwrap().unwrap();
        assert!(part.starts_with(b"Content-Type: image/jpeg\r\n\r\n\xff\xd8webcam-"));
        assert!(part.ends_with(b"\r\n--frame\r\n"));
        assert!(part.windows(15).any(|w| w == b"---timestamp---"));
    }

    #[tokio::test]
    async fn test_index_falls_back_to_builtin_page() {
        let backend = Arc::new(MockBackend::default());
        let (app, _controller) = app(&backend, true);

        let resp = app.oneshot(get("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_string(resp).await.contains("<img src=\"/preview\""));
    }

    #[tokio::test]
    async fn test_health_reports_sources() {
        let backend = Arc::new(MockBackend::default());
        let (app, controller) = app(&backend, true);
        controller.start().await;

        let resp = app.oneshot(get("/health")).await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();

        assert_eq!(json["status"], "ok");
        assert_eq!(json["backend"], "mock");
        assert_eq!(json["camera"]["primary"], "running");
        assert_eq!(json["camera"]["webcam"], "running");
        assert_eq!(json["streams"]["preview"]["active_clients"], 0);
    }
}
