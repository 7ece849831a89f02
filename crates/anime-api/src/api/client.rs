//! Jikan API client with caching, rate limiting and retry logic.

use super::error::ApiError;
use super::query::{build_url, QueryParams};
use super::rate_limiter::RateLimiter;
use super::retry::{fetch_json, RetryPolicy};
use super::transport::{ReqwestTransport, Transport};
use super::types::*;
use crate::cache::{CacheStats, ResponseCache};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::ApiConfig;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Per-call cache behaviour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Bypass the cache read; the fresh result is still written back
    pub skip_cache: bool,
    /// TTL for the written entry instead of the cache default
    pub cache_ttl: Option<Duration>,
}

impl RequestOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            cache_ttl: Some(ttl),
            ..Self::default()
        }
    }

    pub fn fresh() -> Self {
        Self {
            skip_cache: true,
            ..Self::default()
        }
    }
}

/// Ranking used by the top-anime list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopFilter {
    Airing,
    Upcoming,
    ByPopularity,
    Favorite,
}

impl TopFilter {
    pub fn as_str(&self) -> &str {
        match self {
            TopFilter::Airing => "airing",
            TopFilter::Upcoming => "upcoming",
            TopFilter::ByPopularity => "bypopularity",
            TopFilter::Favorite => "favorite",
        }
    }
}

impl std::str::FromStr for TopFilter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "airing" => Ok(TopFilter::Airing),
            "upcoming" => Ok(TopFilter::Upcoming),
            "bypopularity" => Ok(TopFilter::ByPopularity),
            "favorite" => Ok(TopFilter::Favorite),
            other => Err(format!("unknown top filter: {other}")),
        }
    }
}

/// Filters accepted by the anime search endpoint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchParams {
    pub q: Option<String>,
    pub genres: Vec<u32>,
    pub anime_type: Option<String>,
    pub status: Option<String>,
    pub rating: Option<String>,
    pub order_by: Option<String>,
    pub sort: Option<String>,
    pub min_score: Option<f64>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    /// `None` leaves the client's `sfw=true` default in place
    pub sfw: Option<bool>,
}

impl SearchParams {
    pub fn query(q: impl Into<String>) -> Self {
        Self {
            q: Some(q.into()),
            ..Self::default()
        }
    }

    pub fn to_query(&self) -> QueryParams {
        let genres = self
            .genres
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let mut params = QueryParams::new()
            .set_opt("q", self.q.as_deref())
            .set("genres", genres)
            .set_opt("type", self.anime_type.as_deref())
            .set_opt("status", self.status.as_deref())
            .set_opt("rating", self.rating.as_deref())
            .set_opt("order_by", self.order_by.as_deref())
            .set_opt("sort", self.sort.as_deref())
            .set_opt("min_score", self.min_score)
            .set_opt("page", self.page)
            .set_opt("limit", self.limit);

        if let Some(sfw) = self.sfw {
            params = params.set("sfw", sfw);
        }
        params
    }
}

/// Jikan API v4 client.
///
/// One instance is meant to be built at startup and shared (e.g. behind an
/// `Arc`) by every caller, so that all requests go through the same cache and
/// the same dispatch queue.
pub struct JikanClient {
    base_url: Url,
    transport: Arc<dyn Transport>,
    rate_limiter: RateLimiter,
    cache: ResponseCache,
    retry: RetryPolicy,
    detail_ttl: Duration,
    genre_ttl: Duration,
    /// Genre list, kept until `clear_cache` regardless of cache TTLs
    genres: RwLock<Option<Vec<Genre>>>,
}

impl JikanClient {
    /// Create a new Jikan client talking HTTP through reqwest
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(&config.user_agent, config.request_timeout())?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a client over any transport
    pub fn with_transport(config: &ApiConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid API base URL: {}", config.base_url))?;

        info!(
            base_url = %base_url,
            min_interval_ms = config.min_interval_ms,
            max_retries = config.max_retries,
            cache_enabled = config.cache.enabled,
            "Jikan client initialized"
        );

        Ok(Self {
            base_url,
            transport,
            rate_limiter: RateLimiter::new(config.min_interval(), config.requests_per_minute),
            cache: ResponseCache::new(config.cache.enabled, config.cache.default_ttl()),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: config.retry_base_delay(),
                max_jitter: config.retry_jitter(),
            },
            detail_ttl: config.cache.detail_ttl(),
            genre_ttl: config.cache.genre_ttl(),
            genres: RwLock::new(None),
        })
    }

    /// Fetch a JSON document, consulting the cache first.
    ///
    /// On a miss the fetch is queued behind the rate limiter, retried on
    /// transient failures, and the result cached. Failures are never cached.
    pub async fn get(
        &self,
        endpoint: &str,
        params: &QueryParams,
        options: RequestOptions,
    ) -> Result<Value, ApiError> {
        let url = build_url(&self.base_url, endpoint, params);
        let key = url.to_string();

        if !options.skip_cache {
            if let Some(value) = self.cache.get(&key) {
                return Ok(value);
            }
        }

        let transport = Arc::clone(&self.transport);
        let policy = self.retry;
        let queued = self
            .rate_limiter
            .enqueue(async move { fetch_json(transport.as_ref(), &url, &policy).await });

        let value = match queued.await {
            Ok(outcome) => outcome?,
            Err(closed) => {
                return Err(ApiError::NetworkFailure {
                    message: closed.to_string(),
                    url: key,
                    attempt: 0,
                })
            }
        };

        let ttl = options.cache_ttl.unwrap_or(self.cache.default_ttl());
        self.cache.set_with_ttl(&key, value.clone(), ttl);
        Ok(value)
    }

    /// `get` followed by deserialization into a typed response.
    ///
    /// A document that does not fit `T` is evicted before the error returns.
    async fn get_as<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &QueryParams,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        let value = self.get(endpoint, params, options).await?;
        serde_json::from_value(value).map_err(|e| {
            // A document of the wrong shape must not be served again from cache
            let key = build_url(&self.base_url, endpoint, params).to_string();
            self.cache.remove(&key);
            warn!(url = %key, error = %e, "Unexpected response shape, evicted from cache");
            ApiError::decode(&key, e)
        })
    }

    /// Search anime by filters
    pub async fn search_anime(
        &self,
        params: &SearchParams,
    ) -> Result<PaginatedResponse<Anime>, ApiError> {
        info!(query = ?params.q, page = ?params.page, "Searching anime");
        self.get_as("/anime", &params.to_query(), RequestOptions::default())
            .await
    }

    /// Fetch a page of the top-anime ranking
    pub async fn get_top_anime(
        &self,
        filter: Option<TopFilter>,
        page: Option<u32>,
    ) -> Result<PaginatedResponse<Anime>, ApiError> {
        info!(filter = ?filter, page = ?page, "Fetching top anime");
        let params = QueryParams::new()
            .set_opt("filter", filter.as_ref().map(TopFilter::as_str))
            .set_opt("page", page);
        self.get_as("/top/anime", &params, RequestOptions::default())
            .await
    }

    /// Fetch anime airing this season
    pub async fn get_season_now(&self, page: Option<u32>) -> Result<PaginatedResponse<Anime>, ApiError> {
        info!(page = ?page, "Fetching current season");
        let params = QueryParams::new().set_opt("page", page);
        self.get_as("/seasons/now", &params, RequestOptions::default())
            .await
    }

    /// Fetch anime announced for upcoming seasons
    pub async fn get_season_upcoming(
        &self,
        page: Option<u32>,
    ) -> Result<PaginatedResponse<Anime>, ApiError> {
        info!(page = ?page, "Fetching upcoming season");
        let params = QueryParams::new().set_opt("page", page);
        self.get_as("/seasons/upcoming", &params, RequestOptions::default())
            .await
    }

    /// Fetch full anime details by MAL ID
    pub async fn get_anime_by_id(&self, mal_id: u32) -> Result<Anime, ApiError> {
        debug!(mal_id = mal_id, "Fetching anime details");
        let response: SingleResponse<Anime> = self
            .get_as(
                &format!("/anime/{}/full", mal_id),
                &QueryParams::new(),
                RequestOptions::with_ttl(self.detail_ttl),
            )
            .await?;
        Ok(response.data)
    }

    /// Fetch user recommendations for an anime
    pub async fn get_anime_recommendations(
        &self,
        mal_id: u32,
    ) -> Result<Vec<Recommendation>, ApiError> {
        debug!(mal_id = mal_id, "Fetching recommendations");
        let response: DataResponse<Recommendation> = self
            .get_as(
                &format!("/anime/{}/recommendations", mal_id),
                &QueryParams::new(),
                RequestOptions::with_ttl(self.detail_ttl),
            )
            .await?;
        Ok(response.data)
    }

    /// Fetch all anime genres.
    ///
    /// After the first success the list is served from memory until
    /// `clear_cache`, independent of cache expiry.
    pub async fn get_genres(&self) -> Result<Vec<Genre>, ApiError> {
        let cached = self
            .genres
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(genres) = cached {
            debug!(count = genres.len(), "Genres served from memory");
            return Ok(genres);
        }

        info!("Fetching anime genres");
        let response: DataResponse<Genre> = self
            .get_as(
                "/genres/anime",
                &QueryParams::new(),
                RequestOptions::with_ttl(self.genre_ttl),
            )
            .await?;

        *self.genres.write().unwrap_or_else(PoisonError::into_inner) = Some(response.data.clone());
        Ok(response.data)
    }

    /// Drop every cached response and the genre list.
    ///
    /// Requests already in flight are not cancelled; they repopulate the cache
    /// when they complete.
    pub fn clear_cache(&self) {
        self.cache.clear();
        *self.genres.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Number of requests dispatched through the rate limiter so far
    pub fn dispatched_requests(&self) -> u64 {
        self.rate_limiter.dispatched()
    }
}
