//! API integration tests.

use std::path::PathBuf;

use axum::body::{Body, Bytes};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use futures_util::stream;
use tempfile::TempDir;
use tower::ServiceExt;

use cutmedia_api::{create_router, ApiConfig, AppState};
use cutmedia_models::{JobId, JobStatus};
use cutmedia_runner::RunnerConfig;

const BOUNDARY: &str = "cutmedia-test-boundary";

const COPY_WORKER: &str = r#"
video=""
output=""
while [ $# -gt 0 ]; do
  case "$1" in
    --video) video="$2"; shift 2 ;;
    --output) output="$2"; shift 2 ;;
    *) echo "arg: $1"; shift ;;
  esac
done
echo "tracking objects in $video"
cp "$video" "$output"
"#;

fn test_config(dir: &TempDir, worker: &str) -> ApiConfig {
    let script = dir.path().join("worker.sh");
    std::fs::write(&script, worker).unwrap();

    ApiConfig {
        runner: RunnerConfig {
            data_dir: dir.path().join("data"),
            interpreter: "sh".to_string(),
            script: Some(script),
            job_timeout: None,
            ..RunnerConfig::default()
        },
        ..ApiConfig::default()
    }
}

fn app_with_config(config: ApiConfig) -> (Router, AppState) {
    let state = AppState::new(config).unwrap();
    (create_router(state.clone(), None), state)
}

fn create_test_app(dir: &TempDir, worker: &str) -> (Router, AppState) {
    app_with_config(test_config(dir, worker))
}

enum Part<'a> {
    File(&'a str, &'a str, &'a [u8]),
    Text(&'a str, &'a str),
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::File(name, file_name, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}")
                        .as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn multipart_request(parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/process")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

/// Same form, sent as a chunked stream with no Content-Length.
fn chunked_multipart_request(parts: &[Part<'_>]) -> Request<Body> {
    let chunks: Vec<Result<Bytes, std::io::Error>> = multipart_body(parts)
        .chunks(8 * 1024)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();

    Request::builder()
        .method("POST")
        .uri("/api/process")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from_stream(stream::iter(chunks)))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn files_in(dir: PathBuf) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

/// Test health endpoint.
#[tokio::test]
async fn test_health_endpoint() {
    let dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&dir, COPY_WORKER);

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn test_metrics_route_absent_when_disabled() {
    let dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&dir, COPY_WORKER);

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ready_when_interpreter_found() {
    let dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&dir, COPY_WORKER);

    let response = app.oneshot(get("/ready")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ready");
    assert_eq!(json["checks"]["interpreter"]["status"], "ok");
}

#[tokio::test]
async fn test_ready_reports_missing_interpreter() {
    let dir = TempDir::new().unwrap();
    let config = ApiConfig {
        runner: RunnerConfig {
            data_dir: dir.path().join("data"),
            ..RunnerConfig::default()
        }
        .with_program("/nonexistent/cutmedia-worker"),
        ..ApiConfig::default()
    };
    let app = create_router(AppState::new(config).unwrap(), None);

    let response = app.oneshot(get("/ready")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["checks"]["uploads"]["status"], "ok");
    assert_eq!(json["checks"]["interpreter"]["status"], "error");
}

#[tokio::test]
async fn test_unknown_job_is_not_found_everywhere() {
    let dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&dir, COPY_WORKER);
    let id = JobId::new();

    let status = app
        .clone()
        .oneshot(get(&format!("/api/process?id={id}")))
        .await
        .unwrap();
    assert_eq!(status.status(), StatusCode::NOT_FOUND);
    assert!(body_json(status).await["detail"].is_string());

    let by_path = app
        .clone()
        .oneshot(get(&format!("/api/jobs/{id}")))
        .await
        .unwrap();
    assert_eq!(by_path.status(), StatusCode::NOT_FOUND);

    let download = app
        .clone()
        .oneshot(get(&format!("/api/download?id={id}")))
        .await
        .unwrap();
    assert_eq!(download.status(), StatusCode::NOT_FOUND);

    let logs = app
        .clone()
        .oneshot(get(&format!("/api/logs?id={id}")))
        .await
        .unwrap();
    assert_eq!(logs.status(), StatusCode::NO_CONTENT);
    assert!(body_bytes(logs).await.is_empty());

    let cancel = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/jobs/{id}/cancel"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(cancel.status(), StatusCode::NOT_FOUND);

    let delete = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/jobs/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(delete.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_ids_are_rejected() {
    let dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&dir, COPY_WORKER);

    for uri in [
        "/api/process",
        "/api/process?id=",
        "/api/process?id=short",
        "/api/download?id=bad.id.with.dots",
        "/api/logs?id=..%2F..%2Fetc%2Fpasswd",
        "/api/jobs/not_valid_id",
    ] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
    }
}

#[tokio::test]
async fn test_submit_without_video_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (app, state) = create_test_app(&dir, COPY_WORKER);

    let response = app
        .oneshot(multipart_request(&[
            Part::File("calibration", "cam.yaml", b"k: 1"),
            Part::Text("fps", "30"),
        ]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(state.store().list().is_empty());
    assert_eq!(files_in(state.paths().uploads_dir()), 0);
}

#[tokio::test]
async fn test_submit_with_empty_video_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (app, state) = create_test_app(&dir, COPY_WORKER);

    let response = app
        .oneshot(multipart_request(&[Part::File("video", "clip.mp4", b"")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(state.store().list().is_empty());
}

#[tokio::test]
async fn test_non_multipart_submit_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&dir, COPY_WORKER);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/process")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_oversized_chunked_upload_is_rejected_and_cleaned() {
    let dir = TempDir::new().unwrap();
    let config = ApiConfig {
        max_body_size: 64 * 1024,
        ..test_config(&dir, COPY_WORKER)
    };
    let (app, state) = app_with_config(config);
    let video = vec![7u8; 256 * 1024];

    let request = chunked_multipart_request(&[
        Part::Text("fps", "30"),
        Part::File("video", "big.mp4", &video),
    ]);
    assert!(request.headers().get(header::CONTENT_LENGTH).is_none());

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(body_json(response).await["detail"].is_string());
    assert_eq!(files_in(state.paths().uploads_dir()), 0);
    assert_eq!(files_in(state.paths().outputs_dir()), 0);
    assert!(state.store().list().is_empty());
    assert_eq!(state.launcher.active_jobs(), 0);
}

#[tokio::test]
async fn test_log_tail_returns_exactly_requested_bytes() {
    let dir = TempDir::new().unwrap();
    let (app, state) = create_test_app(&dir, COPY_WORKER);
    let id = JobId::new();

    let line = b"frame processed: 0123456789abcdef\n";
    let log: Vec<u8> = line.iter().copied().cycle().take(3 * 1024 * 1024).collect();
    std::fs::write(state.paths().paths_for(&id).log, &log).unwrap();

    let response = app
        .clone()
        .oneshot(get(&format!("/api/logs?id={id}&tail=2097152")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_bytes(response).await;
    assert_eq!(body.len(), 2 * 1024 * 1024);
    assert_eq!(body[..], log[log.len() - 2 * 1024 * 1024..]);

    let whole = app
        .oneshot(get(&format!("/api/logs?id={id}&tail=99999999")))
        .await
        .unwrap();
    assert_eq!(body_bytes(whole).await.len(), log.len());
}

#[tokio::test]
async fn test_log_tail_ceiling_when_configured() {
    let dir = TempDir::new().unwrap();
    let config = ApiConfig {
        log_tail_max: Some(1024),
        ..test_config(&dir, COPY_WORKER)
    };
    let (app, state) = app_with_config(config);
    let id = JobId::new();
    std::fs::write(state.paths().paths_for(&id).log, vec![b'x'; 8192]).unwrap();

    let response = app
        .oneshot(get(&format!("/api/logs?id={id}&tail=4096")))
        .await
        .unwrap();
    assert_eq!(body_bytes(response).await.len(), 1024);
}

#[cfg(unix)]
#[tokio::test]
async fn test_empty_calibration_is_not_passed_to_worker() {
    let dir = TempDir::new().unwrap();
    let (app, state) = create_test_app(&dir, COPY_WORKER);

    let response = app
        .clone()
        .oneshot(multipart_request(&[
            Part::File("video", "clip.mp4", b"data"),
            Part::File("calibration", "", b""),
        ]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let id = JobId::parse(body_json(response).await["id"].as_str().unwrap()).unwrap();

    let job = state.launcher.wait(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Done, "{:?}", job.error);
    assert!(!job.parameters.calibration);
    assert!(!state.paths().paths_for(&id).calibration.exists());

    let logs = app
        .oneshot(get(&format!("/api/logs?id={id}&tail=100000")))
        .await
        .unwrap();
    let text = String::from_utf8(body_bytes(logs).await).unwrap();
    assert!(text.contains("tracking objects"));
    assert!(!text.contains("--calibration"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_submit_process_and_download() {
    let dir = TempDir::new().unwrap();
    let (app, state) = create_test_app(&dir, COPY_WORKER);
    let video: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();

    let response = app
        .clone()
        .oneshot(multipart_request(&[
            Part::File("video", "street.mp4", &video),
            Part::Text("fps", "0"),
            Part::Text("maxframes", "120"),
            Part::Text("classes", "0,2"),
            Part::Text("modelPath", "yolov8n.pt"),
        ]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let submitted = body_json(response).await;
    assert_eq!(submitted["status"], "queued");
    assert_eq!(submitted["output_ready"], false);
    assert_eq!(submitted["file_name"], "street.mp4");
    let id = JobId::parse(submitted["id"].as_str().unwrap()).unwrap();

    let job = state.launcher.wait(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Done, "{:?}", job.error);

    let status = app
        .clone()
        .oneshot(get(&format!("/api/process?id={id}")))
        .await
        .unwrap();
    assert_eq!(status.status(), StatusCode::OK);
    let status = body_json(status).await;
    assert_eq!(status["status"], "done");
    assert_eq!(status["output_ready"], true);
    assert_eq!(status["parameters"]["max_frames"], 120);
    assert!(status["parameters"].get("fps").is_none());

    let download = app
        .clone()
        .oneshot(get(&format!("/api/download?id={id}")))
        .await
        .unwrap();
    assert_eq!(download.status(), StatusCode::OK);
    assert_eq!(download.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(
        download.headers()[header::CONTENT_LENGTH],
        video.len().to_string().as_str()
    );
    assert_eq!(
        download.headers()[header::CONTENT_DISPOSITION],
        format!("attachment; filename=\"{id}.mp4\"").as_str()
    );
    assert_eq!(body_bytes(download).await, video);

    let logs = app
        .clone()
        .oneshot(get(&format!("/api/logs?id={id}&tail=100000")))
        .await
        .unwrap();
    assert_eq!(logs.status(), StatusCode::OK);
    assert_eq!(logs.headers()[header::CONTENT_TYPE], "text/plain; charset=utf-8");
    let text = String::from_utf8(body_bytes(logs).await).unwrap();
    assert!(text.contains("tracking objects"));
    assert!(text.contains("arg: --classes\narg: 0,2"));
    assert!(!text.contains("--fps"));

    let short = app
        .clone()
        .oneshot(get(&format!("/api/logs?id={id}&tail=5")))
        .await
        .unwrap();
    assert_eq!(body_bytes(short).await.len(), 5);

    let list = body_json(app.clone().oneshot(get("/api/jobs")).await.unwrap()).await;
    assert_eq!(list["total"], 1);
    assert_eq!(list["jobs"][0]["id"], id.as_str());

    let cancel = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/jobs/{id}/cancel"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(cancel.status(), StatusCode::CONFLICT);

    let delete = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/jobs/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(delete.status(), StatusCode::OK);
    assert_eq!(files_in(state.paths().uploads_dir()), 0);
    assert_eq!(files_in(state.paths().outputs_dir()), 0);

    let gone = app
        .oneshot(get(&format!("/api/jobs/{id}")))
        .await
        .unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[cfg(unix)]
#[tokio::test]
async fn test_failed_job_is_reported_not_served() {
    let dir = TempDir::new().unwrap();
    let (app, state) = create_test_app(&dir, "echo \"cannot open model\" >&2\nexit 2\n");

    let response = app
        .clone()
        .oneshot(multipart_request(&[Part::File("video", "clip.mp4", b"data")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let id = JobId::parse(body_json(response).await["id"].as_str().unwrap()).unwrap();

    state.launcher.wait(&id).await.unwrap();

    let status = body_json(
        app.clone()
            .oneshot(get(&format!("/api/jobs/{id}")))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status["status"], "error");
    assert_eq!(status["output_ready"], false);
    assert!(status["error"].as_str().unwrap().contains("code 2"));

    let download = app
        .clone()
        .oneshot(get(&format!("/api/download?id={id}")))
        .await
        .unwrap();
    assert_eq!(download.status(), StatusCode::NOT_FOUND);

    let logs = app
        .oneshot(get(&format!("/api/logs?id={id}")))
        .await
        .unwrap();
    let text = String::from_utf8(body_bytes(logs).await).unwrap();
    assert!(text.contains("cannot open model"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_cancel_running_job() {
    let dir = TempDir::new().unwrap();
    let (app, state) = create_test_app(&dir, "exec sleep 30\n");

    let response = app
        .clone()
        .oneshot(multipart_request(&[Part::File("video", "clip.mp4", b"data")]))
        .await
        .unwrap();
    let id = JobId::parse(body_json(response).await["id"].as_str().unwrap()).unwrap();

    let cancel = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/jobs/{id}/cancel"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(cancel.status(), StatusCode::OK);

    let job = body_json(cancel).await;
    assert_eq!(job["status"], "error");
    assert_eq!(job["error"], "job cancelled");
    assert_eq!(state.launcher.active_jobs(), 0);
}
