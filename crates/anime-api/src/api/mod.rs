//! Jikan API v4 client implementation.
//!
//! This module provides a cached, rate-limited, retry-enabled client for
//! interacting with the Jikan API (MyAnimeList unofficial API).

pub mod client;
pub mod error;
pub mod query;
pub mod rate_limiter;
pub mod retry;
pub mod transport;
pub mod types;

pub use client::{JikanClient, RequestOptions, SearchParams, TopFilter};
pub use error::ApiError;
pub use query::{build_url, QueryParams};
pub use rate_limiter::{QueueClosed, RateLimiter};
pub use retry::RetryPolicy;
pub use transport::{HttpResponse, ReqwestTransport, Transport, TransportError};
pub use types::*;
