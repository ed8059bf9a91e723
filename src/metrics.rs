use lazy_static::lazy_static;
use prometheus::{Counter, Gauge, Histogram, register_counter, register_gauge, register_histogram};


lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("storefront_requests_total", "Total number of requests").unwrap();
    pub static ref RATE_LIMITED: Counter =
        register_counter!("storefront_rate_limited_total", "Requests rejected by the rate limiter").unwrap();
    pub static ref STORE_ERRORS: Counter = register_counter!(
        "storefront_rate_limit_store_errors_total",
        "Rate limit store read or write failures"
    )
    .unwrap();
    pub static ref UPSTREAM_ERRORS: Counter =
        register_counter!("storefront_upstream_errors_total", "Failed upstream requests").unwrap();
    pub static ref REQUEST_LATENCY: Histogram = register_histogram!(
        "storefront_request_latency_seconds",
        "Upstream request latency in seconds"
    )
    .unwrap();
    pub static ref TRACKED_CLIENTS: Gauge = register_gauge!(
        "storefront_rate_limit_tracked_clients",
        "Current number of rate limit buckets"
    )
    .unwrap();
}
