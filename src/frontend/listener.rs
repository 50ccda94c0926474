//! HTTP listener.
//!
//! Accepts client connections and serves each over HTTP/1.1, routing
//! `GET /metrics` to the snapshot endpoint and every other path to the
//! forwarding handler.

use crate::backend::ProxyBody;
use crate::frontend::ForwardingHandler;
use crate::metrics::{handle_snapshot, MetricsCollector};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Front-door listener for client traffic.
pub struct Listener {
    listener: TcpListener,
    handler: Arc<ForwardingHandler>,
    metrics: MetricsCollector,
    algorithm: &'static str,
}

impl Listener {
    /// Bind the listening socket.
    pub async fn bind(
        address: SocketAddr,
        handler: Arc<ForwardingHandler>,
        metrics: MetricsCollector,
        algorithm: &'static str,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(address).await?;

        info!(address = %address, algorithm, "listener bound");

        Ok(Self {
            listener,
            handler,
            metrics,
            algorithm,
        })
    }

    /// The bound local address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("listener shutting down");
                    break;
                }
            }
        }
    }

    /// Serve one client connection.
    fn handle_connection(&self, stream: TcpStream, client_addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY on client connection");
        }

        let handler = Arc::clone(&self.handler);
        let metrics = self.metrics.clone();
        let algorithm = self.algorithm;

        tokio::spawn(async move {
            let io = TokioIo::new(stream);

            let service = service_fn(move |req: Request<Incoming>| {
                let handler = Arc::clone(&handler);
                let metrics = metrics.clone();
                async move {
                    Ok::<_, Infallible>(
                        route(req, client_addr, &handler, &metrics, algorithm).await,
                    )
                }
            });

            if let Err(e) = http1::Builder::new()
                .keep_alive(true)
                .serve_connection(io, service)
                .await
            {
                debug!(client = %client_addr, error = %e, "connection error");
            }
        });
    }
}

async fn route(
    req: Request<Incoming>,
    client_addr: SocketAddr,
    handler: &ForwardingHandler,
    metrics: &MetricsCollector,
    algorithm: &'static str,
) -> Response<ProxyBody> {
    if req.method() == Method::GET && req.uri().path() == "/metrics" {
        return handle_snapshot(metrics, algorithm);
    }

    handler.handle(req, client_addr).await
}
