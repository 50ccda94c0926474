//! Single-host HTTP/1.1 reverse-proxy client.
//!
//! A `Forwarder` is owned by one backend and targets exactly that
//! backend's base URL. Each forwarded request opens a connection,
//! performs the client handshake, and relays the request with its
//! target rewritten to origin-form.

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::body::Incoming;
use hyper::{Request, Response, Uri};
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Body type relayed between client and upstream.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Default connect timeout for upstream connections.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors observed while forwarding a request upstream.
///
/// Every variant is a transport-level failure: the client has received
/// nothing when one of these is returned, so the caller may retry on a
/// different backend.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("failed to connect to backend {0}: {1}")]
    Connect(String, #[source] std::io::Error),

    #[error("connection timeout to backend {0}")]
    ConnectTimeout(String),

    #[error("backend handshake failed: {0}")]
    Handshake(#[source] hyper::Error),

    #[error("failed to send request to backend: {0}")]
    Send(#[source] hyper::Error),
}

/// HTTP forwarding client rooted at a single upstream base URL.
pub struct Forwarder {
    /// host:port dialed for every request.
    authority: String,
    connect_timeout: Duration,
}

impl Forwarder {
    /// Create a forwarder targeting the given base URL.
    ///
    /// The port defaults from the scheme when the URL does not carry one.
    pub fn new(url: &Uri) -> Self {
        let host = url.host().unwrap_or("localhost");
        let port = url.port_u16().unwrap_or_else(|| {
            if url.scheme_str() == Some("https") {
                443
            } else {
                80
            }
        });

        Self {
            authority: format!("{}:{}", host, port),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Forward one request to the upstream and return its response.
    ///
    /// The request URI is rewritten to origin-form; all other request
    /// properties (including the Host header) pass through untouched.
    pub async fn forward(
        &self,
        mut req: Request<ProxyBody>,
    ) -> Result<Response<Incoming>, ForwardError> {
        let stream = match timeout(self.connect_timeout, TcpStream::connect(&self.authority)).await
        {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                stream
            }
            Ok(Err(e)) => return Err(ForwardError::Connect(self.authority.clone(), e)),
            Err(_) => return Err(ForwardError::ConnectTimeout(self.authority.clone())),
        };

        let io = TokioIo::new(stream);

        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(ForwardError::Handshake)?;

        // Drive the connection until the exchange completes.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "backend connection error");
            }
        });

        // Rewrite the target to origin-form, required when relaying an
        // inbound request over a client connection.
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .to_string();

        *req.uri_mut() = path_and_query.parse().unwrap_or_else(|e| {
            warn!(error = %e, "failed to rewrite request target, using /");
            Uri::from_static("/")
        });

        sender.send_request(req).await.map_err(ForwardError::Send)
    }
}
