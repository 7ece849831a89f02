//! Request URL construction.
//!
//! The built URL doubles as the cache key, so parameters are kept in a sorted
//! map and always serialized in the same order.

use std::collections::BTreeMap;
use url::Url;

/// Query parameters for one request.
///
/// A key mapped to `None` (or to an empty string) is omitted from the URL,
/// but still counts as "supplied" for the `sfw` default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    params: BTreeMap<String, Option<String>>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter, replacing any previous value
    pub fn set(mut self, key: &str, value: impl ToString) -> Self {
        self.params.insert(key.to_string(), Some(value.to_string()));
        self
    }

    /// Set a parameter that may be absent
    pub fn set_opt<V: ToString>(mut self, key: &str, value: Option<V>) -> Self {
        self.params
            .insert(key.to_string(), value.map(|v| v.to_string()));
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    /// Parameters that will actually be sent
    fn present(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().filter_map(|(key, value)| match value {
            Some(v) if !v.is_empty() => Some((key.as_str(), v.as_str())),
            _ => None,
        })
    }
}

impl<K: ToString, V: ToString> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let params = iter
            .into_iter()
            .map(|(k, v)| (k.to_string(), Some(v.to_string())))
            .collect();
        Self { params }
    }
}

/// Build an absolute request URL from the API base, an endpoint path and query parameters.
///
/// Empty parameters are dropped. `sfw=true` is added unless the caller supplied
/// an `sfw` key of their own.
pub fn build_url(base: &Url, endpoint: &str, params: &QueryParams) -> Url {
    let mut url = base.clone();
    let path = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    );
    url.set_path(&path);
    url.set_query(None);

    {
        let mut query = url.query_pairs_mut();
        for (key, value) in params.present() {
            query.append_pair(key, value);
        }
        if !params.contains("sfw") {
            query.append_pair("sfw", "true");
        }
    }

    if url.query() == Some("") {
        url.set_query(None);
    }

    url
}
