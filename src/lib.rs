//! Windowgate - per-client fixed-window rate limiting
//!
//! This crate counts, per client identifier, the requests that arrive inside
//! a fixed-length window anchored at the client's first request and decides
//! whether each new request is admitted. The accounting engine is plain
//! in-memory state behind a lock; an axum middleware puts it in front of an
//! HTTP handler chain.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
