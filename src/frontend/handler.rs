//! Per-request forwarding driver.
//!
//! For each incoming request: identify the client, pick a backend under
//! the coordinator, consult its circuit breaker, forward, observe the
//! outcome, and retry on an alternate backend when the method allows it
//! and nothing has reached the client yet.

use crate::backend::{Backend, ProxyBody};
use crate::balance::LoadBalancer;
use crate::breaker::{CircuitBreaker, Registry};
use crate::metrics::{MetricEvent, MetricsCollector};
use crate::util::RequestId;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Body, Frame, Incoming};
use hyper::http::request::Parts;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Header carrying the serving backend's URL on successful responses.
const BACKEND_HEADER: &str = "x-backend-server";

/// Drives one client request through selection, breaking, forwarding,
/// and retry.
pub struct ForwardingHandler {
    backends: Vec<Arc<Backend>>,
    balancer: Arc<LoadBalancer>,
    /// Absent when circuit breaking is disabled in configuration.
    breakers: Option<Arc<Registry>>,
    metrics: MetricsCollector,
    max_retries: u32,
}

impl ForwardingHandler {
    pub fn new(
        backends: Vec<Arc<Backend>>,
        balancer: Arc<LoadBalancer>,
        breakers: Option<Arc<Registry>>,
        metrics: MetricsCollector,
        max_retries: u32,
    ) -> Self {
        Self {
            backends,
            balancer,
            breakers,
            metrics,
            max_retries,
        }
    }

    /// Handle one client request end to end.
    pub async fn handle<B>(&self, req: Request<B>, client_addr: SocketAddr) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes, Error = hyper::Error> + Send + Sync + 'static,
    {
        let request_id = RequestId::short();
        let client_ip = extract_client_ip(req.headers(), client_addr);

        info!(
            request_id = %request_id,
            client = %client_ip,
            method = %req.method(),
            path = %req.uri().path(),
            "received request"
        );

        let max_attempts = if is_idempotent(req.method()) && self.max_retries > 0 {
            1 + self.max_retries
        } else {
            1
        };

        let (parts, body) = req.into_parts();

        // The client body is streamed to the first attempt; a retried
        // attempt (idempotent methods only) goes out with an empty body.
        let mut client_body: Option<ProxyBody> = Some(body.boxed());

        let mut tried: HashSet<String> = HashSet::new();
        let mut last_error: Option<String> = None;

        for attempt in 1..=max_attempts {
            let selected = if self.balancer.strategy().uses_key() {
                self.balancer
                    .select_and_reserve_with_key(&self.backends, &tried, &client_ip)
            } else {
                self.balancer.select_and_reserve(&self.backends, &tried)
            };

            let backend = match selected {
                Ok(backend) => backend,
                Err(e) => {
                    warn!(
                        request_id = %request_id,
                        client = %client_ip,
                        attempt,
                        error = %e,
                        "no backend available"
                    );
                    last_error = Some(e.to_string());
                    break;
                }
            };

            let backend_url = backend.url_str().to_string();
            tried.insert(backend_url.clone());

            // The coordinator reserved a connection slot; the guard
            // releases it on every path that does not deliver a
            // response body, including this future being dropped.
            let slot = SlotGuard::new(Arc::clone(&backend));

            let breaker = self.breakers.as_ref().map(|r| r.get(&backend_url));
            if let Some(cb) = &breaker {
                if !cb.allow() {
                    debug!(
                        request_id = %request_id,
                        backend = %backend_url,
                        attempt,
                        "circuit open, skipping backend"
                    );
                    drop(slot);
                    continue;
                }
            }

            self.metrics.emit(MetricEvent::request_received(&backend_url));
            self.metrics.emit(MetricEvent::backend_selected(&backend_url));

            info!(
                request_id = %request_id,
                client = %client_ip,
                backend = %backend_url,
                attempt,
                "forwarding to backend"
            );

            let attempt_body = client_body.take().unwrap_or_else(empty_body);
            let upstream_req = build_upstream_request(&parts, attempt_body);

            let start = Instant::now();
            match backend.forwarder().forward(upstream_req).await {
                Ok(upstream_res) => {
                    let duration = start.elapsed();

                    if let Some(cb) = &breaker {
                        cb.record_success();
                    }
                    backend.record_response(duration);

                    let status = upstream_res.status().as_u16();
                    self.metrics.emit(MetricEvent::response_completed(
                        &backend_url,
                        duration,
                        status,
                    ));

                    info!(
                        request_id = %request_id,
                        backend = %backend_url,
                        status,
                        duration_ms = duration.as_millis() as u64,
                        "request completed"
                    );

                    let (mut res_parts, res_body) = upstream_res.into_parts();
                    if let Ok(value) = backend_url.parse() {
                        res_parts.headers.insert(BACKEND_HEADER, value);
                    }

                    // From here on, headers go to the client; the body
                    // wrapper owns the connection slot and failure
                    // reporting for the rest of the transfer.
                    let tracked = TrackedBody::new(res_body, slot, breaker);
                    return Response::from_parts(res_parts, tracked.boxed());
                }
                Err(e) => {
                    drop(slot);
                    if let Some(cb) = &breaker {
                        cb.record_failure();
                    }

                    warn!(
                        request_id = %request_id,
                        backend = %backend_url,
                        attempt,
                        max_attempts,
                        error = %e,
                        "backend request failed"
                    );
                    last_error = Some(e.to_string());

                    // The forward failed before the upstream produced
                    // response headers, so nothing has reached the
                    // client and the next attempt is safe.
                    continue;
                }
            }
        }

        error!(
            request_id = %request_id,
            client = %client_ip,
            error = last_error.as_deref().unwrap_or("no attempt made"),
            "all backends failed"
        );

        text_response(StatusCode::SERVICE_UNAVAILABLE, "Service unavailable")
    }
}

/// RAII handle for the connection slot reserved at selection.
///
/// Dropping it performs the single decrement owed for the reservation,
/// so the count stays balanced on skips, failures, completed bodies,
/// and abandoned requests alike.
struct SlotGuard {
    backend: Arc<Backend>,
}

impl SlotGuard {
    fn new(backend: Arc<Backend>) -> Self {
        Self { backend }
    }

    fn backend(&self) -> &Backend {
        &self.backend
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.backend.decrement_conn();
    }
}

/// Upstream response body wrapper.
///
/// Holds the backend's reserved connection slot until the body has been
/// fully delivered (or abandoned), and reports a breaker failure if the
/// upstream dies after headers were already sent to the client; at that
/// point no retry is possible.
struct TrackedBody {
    inner: Incoming,
    slot: SlotGuard,
    breaker: Option<Arc<CircuitBreaker>>,
    failed: bool,
}

impl TrackedBody {
    fn new(inner: Incoming, slot: SlotGuard, breaker: Option<Arc<CircuitBreaker>>) -> Self {
        Self {
            inner,
            slot,
            breaker,
            failed: false,
        }
    }
}

impl Body for TrackedBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_frame(cx);

        if let Poll::Ready(Some(Err(e))) = &result {
            if !this.failed {
                this.failed = true;
                warn!(
                    backend = %this.slot.backend().url_str(),
                    error = %e,
                    "upstream failed after response headers were sent, cannot retry"
                );
                if let Some(cb) = &this.breaker {
                    cb.record_failure();
                }
            }
        }

        result
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> hyper::body::SizeHint {
        self.inner.size_hint()
    }
}

/// Rebuild the client request for one upstream attempt.
fn build_upstream_request(parts: &Parts, body: ProxyBody) -> Request<ProxyBody> {
    let mut req = Request::new(body);
    *req.method_mut() = parts.method.clone();
    *req.uri_mut() = parts.uri.clone();
    *req.version_mut() = parts.version;
    *req.headers_mut() = parts.headers.clone();
    req
}

/// First `X-Forwarded-For` hop if the header is present, otherwise the
/// peer address with the port stripped. May be empty.
fn extract_client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(xff) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if !xff.is_empty() {
            return xff.split(',').next().unwrap_or("").trim().to_string();
        }
    }

    peer.ip().to_string()
}

/// Whether the method is safe to retry, per RFC 7231. PUT and DELETE are
/// idempotent though not safe; POST and PATCH are never retried.
fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET
            | Method::HEAD
            | Method::OPTIONS
            | Method::TRACE
            | Method::PUT
            | Method::DELETE
    )
}

fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

fn text_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(
            Full::new(Bytes::from(format!("{}\n", message)))
                .map_err(|never| match never {})
                .boxed(),
        )
        .unwrap()
}
