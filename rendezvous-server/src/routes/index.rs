use axum::http::StatusCode;

const HELP: &str = "\
pair rendezvous server

  PUT  /s/<path>   store a blob (<=10240 bytes, 120s TTL)
  GET  /s/<path>   fetch a stored blob
  PUT  /p/<path>   pipe writer (optional ?n=<receivers> for fan-out)
  GET  /p/<path>   pipe reader (optional ?n=<receivers> for fan-out)
  GET  /metrics    live blob and pipe counts
";

pub async fn index() -> (StatusCode, &'static str) {
    (StatusCode::OK, HELP)
}

pub async fn fallback_404() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found\n")
}
