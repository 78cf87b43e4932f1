//! Axum middleware gating requests through the rate accounting engine.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::ratelimit::{Decision, RateAccountingEngine};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

const X_FORWARDED_FOR: &str = "x-forwarded-for";

type ClientIdFn = dyn Fn(&Request) -> Option<String> + Send + Sync;
type SkipFn = dyn Fn(&Request) -> bool + Send + Sync;

/// How the gate identifies clients and shapes its responses.
#[derive(Clone)]
pub struct GateOptions {
    error_message: String,
    show_informative_headers: bool,
    skip_paths: HashSet<String>,
    skip: Option<Arc<SkipFn>>,
    client_id: Arc<ClientIdFn>,
}

impl Default for GateOptions {
    fn default() -> Self {
        Self {
            error_message: "Too many requests, please try again later".to_string(),
            show_informative_headers: true,
            skip_paths: HashSet::new(),
            skip: None,
            client_id: Arc::new(default_client_id),
        }
    }
}

impl std::fmt::Debug for GateOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateOptions")
            .field("error_message", &self.error_message)
            .field("show_informative_headers", &self.show_informative_headers)
            .field("skip_paths", &self.skip_paths)
            .field("custom_skip", &self.skip.is_some())
            .finish()
    }
}

impl GateOptions {
    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = message.into();
        self
    }

    pub fn with_informative_headers(mut self, show: bool) -> Self {
        self.show_informative_headers = show;
        self
    }

    /// Exempt these exact request paths from metering.
    pub fn with_skip_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Exempt any request for which `skip` returns true.
    pub fn with_skip<F>(mut self, skip: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(skip));
        self
    }

    /// Replace the default client identification.
    pub fn with_client_id<F>(mut self, client_id: F) -> Self
    where
        F: Fn(&Request) -> Option<String> + Send + Sync + 'static,
    {
        self.client_id = Arc::new(client_id);
        self
    }

    fn should_skip(&self, req: &Request) -> bool {
        self.skip_paths.contains(req.uri().path())
            || self.skip.as_ref().is_some_and(|skip| skip(req))
    }
}

/// Identify a client by the first `X-Forwarded-For` hop, falling back to the
/// peer address.
pub fn default_client_id(req: &Request) -> Option<String> {
    let forwarded = req
        .headers()
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty());

    if let Some(hop) = forwarded {
        return Some(hop.to_string());
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

/// Shared state for the gate middleware and the routes behind it.
#[derive(Clone, Debug)]
pub struct GateState {
    pub engine: Arc<RateAccountingEngine>,
    pub options: Arc<GateOptions>,
}

impl GateState {
    pub fn new(engine: Arc<RateAccountingEngine>, options: GateOptions) -> Self {
        Self {
            engine,
            options: Arc::new(options),
        }
    }
}

/// Rate limit details attached to admitted requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    pub clients_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitedBody<'a> {
    error: &'a str,
    retry_after: i64,
}

/// Meter a request against its client's window.
///
/// Refuses everything with 403 while the tracked population is over its
/// bound, answers 500 when no client identifier can be determined, and 429
/// once the client is over its limit. Admitted requests carry a
/// [`RateLimitInfo`] extension.
pub async fn rate_limit(State(state): State<GateState>, mut req: Request, next: Next) -> Response {
    let options = &state.options;
    if options.should_skip(&req) {
        return next.run(req).await;
    }

    let engine = &state.engine;
    if engine.population_over_limit() {
        warn!(
            path = %req.uri().path(),
            population = engine.population_size(),
            max_clients = engine.config().max_clients,
            "Tracked client population over limit, refusing request"
        );
        return StatusCode::FORBIDDEN.into_response();
    }

    let Some(client_id) = (options.client_id)(&req) else {
        warn!(path = %req.uri().path(), "Could not determine client identifier");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let (_, decision) = engine.record_request(&client_id);
    let clients_count = engine.population_size();

    let headers = if options.show_informative_headers {
        rate_limit_headers(engine.config().limit, &decision)
    } else {
        HeaderMap::new()
    };

    if !decision.allowed {
        debug!(client = %client_id, reset_at = %decision.reset_at, "Rate limit exceeded");
        let body = RateLimitedBody {
            error: &options.error_message,
            retry_after: ceil_secs((decision.reset_at - engine.now()).num_milliseconds()),
        };
        return (StatusCode::TOO_MANY_REQUESTS, headers, Json(body)).into_response();
    }

    req.extensions_mut().insert(RateLimitInfo {
        remaining: decision.remaining,
        reset_at: decision.reset_at,
        clients_count,
    });

    let mut response = next.run(req).await;
    response.headers_mut().extend(headers);
    response
}

fn rate_limit_headers(limit: u64, decision: &Decision) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(3);
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(
        X_RATELIMIT_RESET,
        HeaderValue::from(ceil_secs(decision.reset_at.timestamp_millis())),
    );
    headers
}

fn ceil_secs(millis: i64) -> i64 {
    millis.div_euclid(1000) + i64::from(millis.rem_euclid(1000) != 0)
}
