//! Cache keys derived from data-source request parameters

use crate::cache::types::CacheKey;
use std::collections::BTreeMap;

/// Builds keys of the form `namespace:identifier?k1=v1&k2=v2`
///
/// Parameters are emitted in sorted order, so the same request always maps
/// to the same key no matter how the caller assembled it.
///
/// ```
/// use tiered_cache::CacheKeyBuilder;
///
/// let key = CacheKeyBuilder::new("weather")
///     .identifier("paris")
///     .param("units", "metric")
///     .param("days", 3)
///     .build();
/// assert_eq!(key, "weather:paris?days=3&units=metric");
/// ```
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    namespace: String,
    identifier: String,
    params: BTreeMap<String, String>,
}

impl CacheKeyBuilder {
    /// Start a key in `namespace` (typically the upstream source name)
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            identifier: String::new(),
            params: BTreeMap::new(),
        }
    }

    /// Set the primary identifier
    pub fn identifier(mut self, id: impl Into<String>) -> Self {
        self.identifier = id.into();
        self
    }

    /// Add a parameter; a repeated name keeps the last value
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(key.into(), value.to_string());
        self
    }

    /// Tag naming this key's namespace, for `clear` by source
    pub fn namespace_tag(&self) -> String {
        format!("source:{}", self.namespace)
    }

    /// Build the cache key
    pub fn build(self) -> CacheKey {
        let mut key = format!("{}:{}", self.namespace, self.identifier);

        if !self.params.is_empty() {
            let params: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            key.push('?');
            key.push_str(&params.join("&"));
        }

        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_without_params() {
        let key = CacheKeyBuilder::new("hotels").identifier("lisbon").build();
        assert_eq!(key, "hotels:lisbon");
    }

    #[test]
    fn test_params_are_sorted() {
        let a = CacheKeyBuilder::new("flights")
            .identifier("search")
            .param("to", "JFK")
            .param("from", "CDG")
            .build();
        let b = CacheKeyBuilder::new("flights")
            .identifier("search")
            .param("from", "CDG")
            .param("to", "JFK")
            .build();

        assert_eq!(a, b);
        assert_eq!(a, "flights:search?from=CDG&to=JFK");
    }

    #[test]
    fn test_repeated_param_keeps_last() {
        let key = CacheKeyBuilder::new("weather")
            .identifier("paris")
            .param("units", "imperial")
            .param("units", "metric")
            .build();
        assert_eq!(key, "weather:paris?units=metric");
    }

    #[test]
    fn test_namespace_tag() {
        let builder = CacheKeyBuilder::new("weather");
        assert_eq!(builder.namespace_tag(), "source:weather");
    }
}
