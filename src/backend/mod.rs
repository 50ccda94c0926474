//! Upstream backend state and the single-host reverse proxy.

mod forwarder;
mod server;

pub use forwarder::{ForwardError, Forwarder, ProxyBody};
pub use server::Backend;
