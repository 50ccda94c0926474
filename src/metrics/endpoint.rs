//! Metrics snapshot endpoint.

use crate::backend::ProxyBody;
use crate::metrics::MetricsCollector;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Response, StatusCode};
use tracing::error;

/// Serve the JSON metrics snapshot for `GET /metrics`.
pub fn handle_snapshot(collector: &MetricsCollector, algorithm: &str) -> Response<ProxyBody> {
    let snapshot = collector.snapshot(algorithm);

    match serde_json::to_vec(&snapshot) {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "application/json")
            .body(full_body(body.into()))
            .unwrap(),
        Err(e) => {
            error!(error = %e, "failed to encode metrics snapshot");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(full_body(Bytes::from("failed to encode metrics\n")))
                .unwrap()
        }
    }
}

fn full_body(bytes: Bytes) -> ProxyBody {
    Full::new(bytes).map_err(|never| match never {}).boxed()
}
