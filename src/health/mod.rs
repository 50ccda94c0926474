//! Active health probing for backend servers.

mod prober;

pub use prober::HealthProber;
