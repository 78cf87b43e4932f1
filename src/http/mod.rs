//! HTTP gating layer built on axum.

mod middleware;
mod server;

pub use middleware::{
    default_client_id, rate_limit, GateOptions, GateState, RateLimitInfo, X_RATELIMIT_LIMIT,
    X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use server::HttpServer;
