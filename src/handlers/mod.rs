mod health;
mod metrics;
mod proxy;
mod status;

pub use health::health_handler;
pub use metrics::metrics_handler;
pub use proxy::proxy_handler;
pub use status::status_handler;
