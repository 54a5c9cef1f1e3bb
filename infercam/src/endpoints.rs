//! Endpoints of HTTP server.
//!
use std::{convert::Infallible, sync::Arc};

use axum::{
    body::StreamBody,
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    routing::get,
    Extension, Json, Router,
};
use common::TickResults;
use futures::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use crate::pubsub::OverlayPubSub;

const INDEX_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>InferCam</title></head>
<body>
    <h3>Live Inference</h3>
    <p id="status"></p>
    <img src="./stream" width="100%">
    <script>
        async function refresh() {
            const resp = await fetch("./status");
            document.getElementById("status").textContent = await resp.text();
        }
        refresh();
        setInterval(refresh, 1000);
    </script>
</body>
</html>
"#;

/// Router serving the overlay stream and its metadata.
pub fn router(pubsub: Arc<OverlayPubSub>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
        .route("/status", get(status))
        .route("/results", get(results))
        .route("/stream", get(overlay_stream))
        .layer(Extension(pubsub))
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

/// Status line shown next to the stream.
///
/// Failures that keep the loop from ever starting are served as unavailable.
pub async fn status(Extension(pubsub): Extension<Arc<OverlayPubSub>>) -> (StatusCode, String) {
    let status = pubsub.status();
    let code = match status.is_failure() {
        true => StatusCode::SERVICE_UNAVAILABLE,
        false => StatusCode::OK,
    };
    (code, status.to_string())
}

/// Results of the latest rendered tick, `null` before the first one.
pub async fn results(
    Extension(pubsub): Extension<Arc<OverlayPubSub>>,
) -> Json<Option<TickResults>> {
    Json(pubsub.latest_results())
}

/// Endpoint of the rendered overlay stream.
pub async fn overlay_stream(Extension(pubsub): Extension<Arc<OverlayPubSub>>) -> impl IntoResponse {
    log::info!("Overlay stream requested");

    // Subscribe to the broadcasted rendered frames, frames missed by slow clients are dropped
    let rx = pubsub.subscribe_frames();
    let stream = BroadcastStream::new(rx).filter_map(|item| async move {
        match item {
            Ok(frame) => Some(Ok::<_, Infallible>(frame)),
            Err(err) => {
                log::debug!("Stream client lagging: {err}");
                None
            }
        }
    });

    // Set body and headers for multipart streaming
    let body = StreamBody::new(stream);
    let headers = [(
        header::CONTENT_TYPE,
        "multipart/x-mixed-replace; boundary=frame",
    )];

    (headers, body)
}

#[cfg(test)]
mod test {
    use common::{Results, TickResults};

    use super::*;
    use crate::status::Status;

    #[tokio::test]
    async fn test_status_and_results() {
        let pubsub = Arc::new(OverlayPubSub::new());
        pubsub.set_status(Status::ModelLoadFailed("no such file".into()));

        let (code, text) = status(Extension(Arc::clone(&pubsub))).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(text, "Failed to load model: no such file");

        let Json(latest) = results(Extension(Arc::clone(&pubsub))).await;
        assert!(latest.is_none());

        pubsub.publish_results(TickResults {
            sequence: 1,
            results: Results::Classification(vec![]),
        });
        let Json(latest) = results(Extension(Arc::clone(&pubsub))).await;
        assert_eq!(latest.unwrap().sequence, 1);

        pubsub.set_status(Status::Running);
        let (code, text) = status(Extension(pubsub)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(text, "Running");
    }

    #[tokio::test]
    async fn test_healthcheck() {
        assert_eq!(healthcheck().await, "healthy");
    }
}
