//! HTTP request handlers

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::{AppError, Result};
use crate::session::{ClientGuard, Session, SessionStats};
use crate::state::AppState;
use crate::stream::params::{parse_num, Codec, Container, StreamParams, StreamQuery};
use crate::stream::sink::sink_body;
use crate::stream::{mjpeg, udp};
use crate::video::device;

const EFFECTIVE_PARAMS: &str = "Effective-Params";

/// Header value advertising the session's actual parameters; the
/// container reflects what this request asked for.
fn effective_value(session_params: &StreamParams, container: Container) -> String {
    let mut shown = session_params.clone();
    shown.container = container;
    shown.effective_header()
}

fn with_effective(mut response: Response, value: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(value) {
        response.headers_mut().insert(EFFECTIVE_PARAMS, value);
    }
    response
}

/// GET /stream/live/{device}
pub async fn live_stream(
    State(state): State<Arc<AppState>>,
    Path(device): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let requested = match query.into_params(state.default_codec) {
        Ok(params) => params,
        Err(e) => return e.into_response(),
    };

    let session = state.sessions.get_or_create(&device, requested.clone());
    let guard = ClientGuard::new(session.clone(), state.sessions.clone());

    let effective = effective_value(&session.params(), requested.container);

    // First-comer lock: the codec is fixed for the session's lifetime.
    if requested.codec != session.params().codec {
        let response = AppError::Conflict("params locked by first requester".to_string())
            .into_response();
        return with_effective(response, &effective);
    }

    if let Err(e) = ensure_capture_started(&session, &device).await {
        return with_effective(e.into_response(), &effective);
    }

    // The device may have clamped geometry or rate during negotiation.
    let locked = session.params();
    let effective = effective_value(&locked, requested.container);

    if requested.container == Container::Mp4 && requested.codec != Codec::H264 {
        let response =
            AppError::BadRequest("mp4 container requires h264".to_string()).into_response();
        return with_effective(response, &effective);
    }

    let response = match (requested.codec, requested.container) {
        (Codec::Mjpeg, _) => serve_mjpeg(session, locked, guard),
        (Codec::H264, Container::Raw) => serve_h264_raw(session, locked, guard),
        (Codec::H264, Container::Mp4) => serve_fmp4(session, locked, guard).await,
    };
    with_effective(response, &effective)
}

/// Start the capture on first attach. Negotiation runs on a blocking
/// task; success syncs clamped geometry and resets the statistics.
async fn ensure_capture_started(session: &Arc<Session>, device: &str) -> Result<()> {
    if session.capture.running() {
        return Ok(());
    }
    let start_session = session.clone();
    let device = device.to_string();
    let negotiated =
        tokio::task::spawn_blocking(move || start_session.capture.start(&device, &start_session.params()))
            .await
            .map_err(|e| AppError::Video(format!("capture start task failed: {}", e)))??;
    session.sync_after_start(negotiated);
    Ok(())
}

fn serve_mjpeg(
    session: Arc<Session>,
    params: StreamParams,
    guard: ClientGuard,
) -> Response {
    let (sink, body) = sink_body();
    tokio::task::spawn_blocking(move || mjpeg::run(session, params, sink, guard));

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={}", mjpeg::BOUNDARY),
        )
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .body(body)
        .expect("static response parts")
}

#[cfg(feature = "h264")]
fn serve_h264_raw(
    session: Arc<Session>,
    params: StreamParams,
    guard: ClientGuard,
) -> Response {
    let (sink, body) = sink_body();
    tokio::task::spawn_blocking(move || crate::stream::h264::run(session, params, sink, guard));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/H264")
        .body(body)
        .expect("static response parts")
}

#[cfg(not(feature = "h264"))]
fn serve_h264_raw(
    _session: Arc<Session>,
    _params: StreamParams,
    _guard: ClientGuard,
) -> Response {
    AppError::H264Unavailable("OpenH264 support not compiled in".to_string()).into_response()
}

#[cfg(feature = "h264")]
async fn serve_fmp4(
    session: Arc<Session>,
    params: StreamParams,
    guard: ClientGuard,
) -> Response {
    use crate::stream::fmp4;

    // SPS/PPS must be secured before the first body byte so a failure
    // can still map to an HTTP status.
    let bootstrap_session = session.clone();
    let bootstrap_params = params.clone();
    let bootstrap = tokio::task::spawn_blocking(move || {
        fmp4::bootstrap_parameter_sets(&bootstrap_session, &bootstrap_params)
    })
    .await;
    match bootstrap {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return e.into_response(),
        Err(e) => return AppError::Video(format!("bootstrap task failed: {}", e)).into_response(),
    }

    let (sink, body) = sink_body();
    tokio::task::spawn_blocking(move || fmp4::run(session, params, sink, guard));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::CACHE_CONTROL, "no-store")
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(body)
        .expect("static response parts")
}

#[cfg(not(feature = "h264"))]
async fn serve_fmp4(
    _session: Arc<Session>,
    _params: StreamParams,
    _guard: ClientGuard,
) -> Response {
    AppError::H264Unavailable("OpenH264 support not compiled in".to_string()).into_response()
}

/// GET /stream/udp/{device}
pub async fn udp_stream(
    State(state): State<Arc<AppState>>,
    Path(device): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Response {
    match start_udp_stream(state, device, query).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn start_udp_stream(
    state: Arc<AppState>,
    device: String,
    query: StreamQuery,
) -> Result<Response> {
    let (Some(target), Some(port)) = (query.target.clone(), query.port.clone()) else {
        return Err(AppError::BadRequest(
            "target and port are required".to_string(),
        ));
    };
    let target: Ipv4Addr = target
        .parse()
        .map_err(|_| AppError::BadRequest(format!("invalid target address: {}", target)))?;
    let port: u16 = port
        .parse()
        .map_err(|_| AppError::BadRequest(format!("invalid port: {}", port)))?;
    let duration = parse_num::<u64>("duration", &query.duration)?.unwrap_or(10);

    // UDP defaults to H.264 when the query names no codec.
    let requested = query.into_params(Codec::H264)?;
    let codec = requested.codec;

    let session = state.sessions.get_or_create(&device, requested);
    let guard = ClientGuard::new(session.clone(), state.sessions.clone());

    ensure_capture_started(&session, &device).await?;

    // Geometry comes from the session (possibly clamped by the device);
    // the pipeline codec is what this request asked for.
    let mut params = session.params();
    params.codec = codec;

    let addr = SocketAddr::new(IpAddr::V4(target), port);
    info!(
        "UDP sender for {} to {} for {}s ({})",
        device, addr, duration, params.codec
    );
    tokio::task::spawn_blocking(move || {
        udp::run(session, params, addr, Duration::from_secs(duration), guard)
    });

    Ok(Json(json!({"status": "udp_stream_started"})).into_response())
}

/// GET /stream/{device}/stats
pub async fn stream_stats(
    State(state): State<Arc<AppState>>,
    Path(device): Path<String>,
) -> Result<Json<SessionStats>> {
    let session = state
        .sessions
        .find(&device)
        .ok_or_else(|| AppError::NotFound(format!("device {}", device)))?;
    state.sessions.touch(&device);
    Ok(Json(session.stats()))
}

/// Query of POST /stream/{device}/feedback
#[derive(Debug, Deserialize)]
pub struct FeedbackQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// POST /stream/{device}/feedback?type=idr
pub async fn stream_feedback(
    State(state): State<Arc<AppState>>,
    Path(device): Path<String>,
    Query(query): Query<FeedbackQuery>,
) -> Result<Json<serde_json::Value>> {
    let session = state
        .sessions
        .find(&device)
        .ok_or_else(|| AppError::NotFound(format!("device {}", device)))?;

    match query.kind.as_deref() {
        Some("idr") => {
            let seq = session.request_idr();
            Ok(Json(json!({"status": "ok", "idr_request_seq": seq})))
        }
        other => Err(AppError::BadRequest(format!(
            "unsupported feedback type: {}",
            other.unwrap_or("<none>")
        ))),
    }
}

/// GET /device/list
pub async fn device_list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>> {
    let registry = state.sessions.clone();
    let devices = tokio::task::spawn_blocking(move || registry.list_devices())
        .await
        .map_err(|e| AppError::Video(format!("device enumeration failed: {}", e)))?;
    Ok(Json(devices))
}

/// GET /device/{device}/caps
pub async fn device_caps(
    State(state): State<Arc<AppState>>,
    Path(device): Path<String>,
) -> Result<Json<device::DeviceCaps>> {
    state.sessions.touch(&device);
    let caps = tokio::task::spawn_blocking(move || device::query_caps(&device))
        .await
        .map_err(|e| AppError::Video(format!("caps query failed: {}", e)))??;
    Ok(Json(caps))
}

/// GET /, a minimal landing page
pub async fn index() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head><title>SilkCast</title></head>
<body>
<h1>SilkCast</h1>
<p>On-demand camera streaming.</p>
<ul>
<li><a href="/device/list">/device/list</a></li>
<li><a href="/stream/live/video0">/stream/live/video0</a></li>
<li><a href="/stream/video0/stats">/stream/video0/stats</a></li>
<li><a href="/api/schema">/api/schema</a></li>
</ul>
</body>
</html>
"#,
    )
}

/// GET /api/schema, a JSON inventory of the routes
pub async fn api_schema() -> Json<serde_json::Value> {
    Json(json!({
        "routes": [
            {
                "path": "/device/list",
                "method": "GET",
                "description": "List available video devices",
                "params": []
            },
            {
                "path": "/device/{device}/caps",
                "method": "GET",
                "description": "Get device native capabilities",
                "params": [{"name": "device", "type": "device", "default": "video0"}]
            },
            {
                "path": "/stream/live/{device}",
                "method": "GET",
                "description": "Start a live stream",
                "params": [
                    {"name": "device", "type": "device", "default": "video0"},
                    {"name": "w", "type": "int", "default": "640"},
                    {"name": "h", "type": "int", "default": "480"},
                    {"name": "fps", "type": "int", "default": "15"},
                    {"name": "bitrate", "type": "int", "default": "256"},
                    {"name": "quality", "type": "int", "default": "80"},
                    {"name": "gop", "type": "int", "default": "30"},
                    {"name": "codec", "type": "select", "default": "mjpeg",
                     "options": ["mjpeg", "h264"]},
                    {"name": "latency", "type": "select", "default": "view",
                     "options": ["view", "low", "ultra", "zerolatency"]},
                    {"name": "container", "type": "select", "default": "raw",
                     "options": ["raw", "mp4"]}
                ]
            },
            {
                "path": "/stream/udp/{device}",
                "method": "GET",
                "description": "Start a bounded UDP sender",
                "params": [
                    {"name": "device", "type": "device", "default": "video0"},
                    {"name": "target", "type": "string", "default": "127.0.0.1"},
                    {"name": "port", "type": "int", "default": "5000"},
                    {"name": "duration", "type": "int", "default": "10"},
                    {"name": "codec", "type": "select", "default": "h264",
                     "options": ["h264", "mjpeg"]}
                ]
            },
            {
                "path": "/stream/{device}/stats",
                "method": "GET",
                "description": "Get stream statistics",
                "params": [{"name": "device", "type": "device", "default": "video0"}]
            },
            {
                "path": "/stream/{device}/feedback",
                "method": "POST",
                "description": "Stream feedback; type=idr forces the next keyframe",
                "params": [
                    {"name": "device", "type": "device", "default": "video0"},
                    {"name": "type", "type": "select", "default": "idr", "options": ["idr"]}
                ]
            }
        ]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionRegistry;
    use crate::stream::params::LatencyTier;

    fn test_state() -> Arc<AppState> {
        AppState::new(SessionRegistry::new(Duration::from_secs(10)), Codec::Mjpeg)
    }

    fn h264_params() -> StreamParams {
        StreamParams {
            codec: Codec::H264,
            latency: LatencyTier::Low,
            ..StreamParams::default()
        }
    }

    #[tokio::test]
    async fn test_live_stream_codec_conflict() {
        let state = test_state();
        // First-comer locked the session to H.264.
        state.sessions.get_or_create("video9", h264_params());

        let query = StreamQuery {
            codec: Some("mjpeg".into()),
            ..StreamQuery::default()
        };
        let response = live_stream(
            State(state.clone()),
            Path("video9".to_string()),
            Query(query),
        )
        .await;

        assert_eq!(response.status(), StatusCode::CONFLICT);
        let effective = response
            .headers()
            .get(EFFECTIVE_PARAMS)
            .expect("header present")
            .to_str()
            .unwrap();
        assert!(effective.starts_with("codec=h264;"));
    }

    #[tokio::test]
    async fn test_live_stream_rejects_bad_params() {
        let state = test_state();
        let query = StreamQuery {
            codec: Some("av1".into()),
            ..StreamQuery::default()
        };
        let response =
            live_stream(State(state), Path("video0".to_string()), Query(query)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stats_unknown_session_is_404() {
        let state = test_state();
        let err = stream_stats(State(state), Path("video7".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_feedback_bumps_idr_sequence() {
        let state = test_state();
        let session = state.sessions.get_or_create("video9", h264_params());
        assert_eq!(session.idr_request_seq(), 0);

        let ok = stream_feedback(
            State(state.clone()),
            Path("video9".to_string()),
            Query(FeedbackQuery {
                kind: Some("idr".into()),
            }),
        )
        .await;
        assert!(ok.is_ok());
        assert_eq!(session.idr_request_seq(), 1);

        let bad = stream_feedback(
            State(state.clone()),
            Path("video9".to_string()),
            Query(FeedbackQuery {
                kind: Some("bitrate".into()),
            }),
        )
        .await;
        assert_eq!(bad.unwrap_err().kind(), "bad_request");

        let missing = stream_feedback(
            State(state),
            Path("video1".to_string()),
            Query(FeedbackQuery {
                kind: Some("idr".into()),
            }),
        )
        .await;
        assert_eq!(missing.unwrap_err().kind(), "not_found");
    }

    #[tokio::test]
    async fn test_udp_stream_requires_target_and_port() {
        let state = test_state();
        let response = udp_stream(
            State(state),
            Path("video0".to_string()),
            Query(StreamQuery::default()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_device_list_never_empty() {
        let state = test_state();
        let Json(devices) = device_list(State(state)).await.unwrap();
        assert!(!devices.is_empty());
    }
}
