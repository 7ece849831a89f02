//! Outbound access layer for the Jikan anime API.
//!
//! Every call goes through one [`JikanClient`]: a response cache, a FIFO
//! dispatch queue that spaces requests out, and a transport that retries
//! transient failures with exponential backoff.

pub mod api;
pub mod cache;

pub use api::{ApiError, JikanClient, QueryParams, RateLimiter, RequestOptions, SearchParams, TopFilter};
pub use cache::{CacheStats, ResponseCache};
