//! Engine Configuration
//!
//! Paging limits for traversal queries. Values can be overridden through
//! environment variables so deployments tune them without a rebuild.

use serde::{Deserialize, Serialize};

/// Environment variable overriding [`EngineConfig::default_page_size`]
pub const PAGE_SIZE_ENV: &str = "NESTED_SET_PAGE_SIZE";

/// Environment variable overriding [`EngineConfig::max_page_size`]
pub const MAX_PAGE_SIZE_ENV: &str = "NESTED_SET_MAX_PAGE_SIZE";

/// Configuration for the nested-set engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Page size used when a paginated query is called without a page
    pub default_page_size: u32,

    /// Upper bound applied to caller-supplied page limits
    pub max_page_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 500,
        }
    }
}

impl EngineConfig {
    /// Defaults, overridden by `NESTED_SET_PAGE_SIZE` and
    /// `NESTED_SET_MAX_PAGE_SIZE` when they hold valid numbers
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let read = |key: &str, fallback: u32| {
            lookup(key)
                .and_then(|value| value.trim().parse::<u32>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(fallback)
        };

        Self {
            default_page_size: read(PAGE_SIZE_ENV, defaults.default_page_size),
            max_page_size: read(MAX_PAGE_SIZE_ENV, defaults.max_page_size),
        }
        .normalized()
    }

    /// Ensure the default page never exceeds the maximum
    pub fn normalized(self) -> Self {
        Self {
            default_page_size: self.default_page_size.min(self.max_page_size),
            max_page_size: self.max_page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_overrides() {
        assert_eq!(EngineConfig::from_lookup(lookup(&[])), EngineConfig::default());
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = EngineConfig::from_lookup(lookup(&[
            (PAGE_SIZE_ENV, "20"),
            (MAX_PAGE_SIZE_ENV, " 100 "),
        ]));
        assert_eq!(config.default_page_size, 20);
        assert_eq!(config.max_page_size, 100);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = EngineConfig::from_lookup(lookup(&[
            (PAGE_SIZE_ENV, "lots"),
            (MAX_PAGE_SIZE_ENV, "0"),
        ]));
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_default_page_is_capped_by_max() {
        let config = EngineConfig::from_lookup(lookup(&[(MAX_PAGE_SIZE_ENV, "10")]));
        assert_eq!(config.default_page_size, 10);
    }

    #[test]
    fn test_deserializes_partial_config() {
        let config: EngineConfig = serde_json::from_str(r#"{"max_page_size": 5}"#).unwrap();
        assert_eq!(config.max_page_size, 5);
        assert_eq!(config.default_page_size, 50);
    }
}
