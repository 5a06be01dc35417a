pub mod error;
pub mod logging;
pub mod pipe;
pub mod routes;
pub mod state;
pub mod store;
pub mod tls;

use axum::routing::{get, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use logging::{AccessLogLayer, ApacheSink, JsonSink, ShipperSink};
use state::AppState;

/// Assemble the full route table over `state`, wrapped in the access
/// log decorator and an HTTP-level trace layer.
pub fn build_router(state: AppState) -> Router {
    let access_log = AccessLogLayer::new(vec![
        Box::new(ApacheSink),
        Box::new(JsonSink),
        Box::new(ShipperSink::from_env()),
    ]);

    Router::new()
        .route("/", get(routes::index::index))
        .route("/metrics", get(routes::metrics::metrics))
        .route(
            "/s/*path",
            put(routes::content::put_blob).get(routes::content::get_blob),
        )
        .route(
            "/p/*path",
            put(routes::pipe::put_pipe).get(routes::pipe::get_pipe),
        )
        .fallback(routes::index::fallback_404)
        .layer(access_log)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn index_responds_ok() {
        let app = build_router(AppState::new());
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = build_router(AppState::new());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn blob_round_trip_through_router() {
        let app = build_router(AppState::new());
        let put = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/s/abc")
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(put.status(), StatusCode::CREATED);

        let get = app
            .oneshot(
                Request::builder()
                    .uri("/s/abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(get.status(), StatusCode::OK);
        let body = axum::body::to_bytes(get.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn oversize_blob_is_rejected() {
        let app = build_router(AppState::new());
        let body = vec![0u8; crate::store::MAX_BLOB_SIZE + 1];
        let put = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/s/big")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(put.status(), StatusCode::BAD_REQUEST);
    }
}
