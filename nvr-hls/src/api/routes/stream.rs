//! Stream control routes.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};

use crate::api::error::ApiResult;
use crate::api::models::{
    StartStreamQuery, StartStreamResponse, StopStreamResponse, StreamListResponse,
};
use crate::api::server::AppState;
use crate::stream::{StartOutcome, StopOutcome, StreamStatus};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_streams))
        .route("/start/{channel}", get(start_stream))
        .route("/stop/{channel}", get(stop_stream))
        .route("/status/{channel}", get(stream_status))
}

/// Start transcoding a channel.
async fn start_stream(
    State(state): State<AppState>,
    Path(channel): Path<u32>,
    Query(query): Query<StartStreamQuery>,
) -> ApiResult<Json<StartStreamResponse>> {
    let outcome = state.supervisor.start(channel, query.stream_type).await?;

    let (message, already_running) = match &outcome {
        StartOutcome::Started(_) => (format!("Started streaming channel {}", channel), false),
        StartOutcome::AlreadyRunning(_) => {
            (format!("Channel {} is already streaming", channel), true)
        }
    };

    Ok(Json(StartStreamResponse {
        message,
        hls_url: outcome.info().hls_url.clone(),
        already_running,
    }))
}

/// Stop a channel. Stopping an idle channel is not an error.
async fn stop_stream(
    State(state): State<AppState>,
    Path(channel): Path<u32>,
) -> Json<StopStreamResponse> {
    let outcome = state.supervisor.stop(channel).await;

    Json(StopStreamResponse {
        message: format!("Stopped streaming channel {}", channel),
        was_running: matches!(outcome, StopOutcome::Stopped { .. }),
    })
}

async fn stream_status(
    State(state): State<AppState>,
    Path(channel): Path<u32>,
) -> Json<StreamStatus> {
    Json(state.supervisor.status(channel))
}

async fn list_streams(State(state): State<AppState>) -> Json<StreamListResponse> {
    let streams = state.supervisor.list();
    Json(StreamListResponse {
        count: streams.len(),
        streams,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::api::routes::create_router;
    use crate::api::server::AppState;
    use crate::config::{HlsSettings, RtspSettings};
    use crate::stream::StreamSupervisor;

    fn app(temp: &TempDir) -> axum::Router {
        let rtsp = RtspSettings {
            ffmpeg_path: temp.path().join("missing-ffmpeg"),
            ..Default::default()
        };
        let hls = HlsSettings {
            output_dir: temp.path().join("hls"),
            ..Default::default()
        };
        let supervisor = Arc::new(StreamSupervisor::new(rtsp, hls));
        create_router(AppState::new(supervisor))
    }

    async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_status_of_idle_channel() {
        let temp = TempDir::new().unwrap();
        let (status, body) = get_json(app(&temp), "/api/stream/status/1").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["channel"], 1);
        assert_eq!(body["isStreaming"], false);
        assert!(body["hlsUrl"].is_null());
    }

    #[tokio::test]
    async fn test_stop_idle_channel_is_ok() {
        let temp = TempDir::new().unwrap();
        let (status, body) = get_json(app(&temp), "/api/stream/stop/4").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Stopped streaming channel 4");
        assert_eq!(body["wasRunning"], false);
    }

    #[tokio::test]
    async fn test_start_without_binary() {
        let temp = TempDir::new().unwrap();
        let (status, body) = get_json(app(&temp), "/api/stream/start/2?streamType=1").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "BINARY_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_list_is_empty() {
        let temp = TempDir::new().unwrap();
        let (status, body) = get_json(app(&temp), "/api/stream").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 0);
        assert_eq!(body["streams"], Value::Array(vec![]));
    }

    #[tokio::test]
    async fn test_negative_channel_is_rejected() {
        let temp = TempDir::new().unwrap();
        let response = app(&temp)
            .oneshot(
                Request::builder()
                    .uri("/api/stream/start/-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
