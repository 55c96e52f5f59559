//! In-process weather response cache, keyed per city per hour.
//!
//! The original backend uses Redis so every trip in the same city shares
//! one OpenWeatherMap call per hour. This crate runs as a single process
//! with no distributed cache dependency anywhere in the stack, so the same
//! contract — get/set/invalidate, TTL-bounded, degrade to a miss on any
//! failure — is implemented over a `parking_lot::Mutex`-guarded map instead,
//! following the same connection-guard idiom as `db.rs`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;

const TTL_SECONDS: u64 = 3600;

fn strip_diacritic(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'a',
        'è' | 'é' | 'ê' | 'ë' | 'È' | 'É' | 'Ê' | 'Ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' | 'Ì' | 'Í' | 'Î' | 'Ï' => 'i',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' | 'Ù' | 'Ú' | 'Û' | 'Ü' => 'u',
        'ñ' | 'Ñ' => 'n',
        'ç' | 'Ç' => 'c',
        'ý' | 'ÿ' | 'Ý' => 'y',
        other => other,
    }
}

/// Normalize a city name to an ASCII cache-key slug.
///
/// `"São Paulo"` -> `"sao-paulo"`, `"New York"` -> `"new-york"`.
pub fn slugify(city: &str) -> String {
    let ascii: String = city
        .chars()
        .map(strip_diacritic)
        .filter(|c| c.is_ascii())
        .collect();

    let mut slug = String::with_capacity(ascii.len());
    let mut last_was_hyphen = true; // suppresses a leading hyphen
    for c in ascii.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }

    if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug
    }
}

fn hour_bucket() -> String {
    Utc::now().format("%Y%m%d_%H").to_string()
}

pub fn cache_key(city: &str) -> String {
    format!("weather:{}:{}", slugify(city), hour_bucket())
}

struct Entry {
    payload: String,
    expires_at: Instant,
}

/// Per-city-per-hour weather cache. Cloning shares the same underlying map.
#[derive(Clone)]
pub struct WeatherCache {
    store: Arc<Mutex<HashMap<String, Entry>>>,
}

impl Default for WeatherCache {
    fn default() -> Self {
        Self::new()
    }
}

impl WeatherCache {
    pub fn new() -> Self {
        Self {
            store: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Verbatim cached payload for `city`, or `None` on a miss or expiry.
    pub fn get(&self, city: &str) -> Option<String> {
        let key = cache_key(city);
        let mut store = self.store.lock();
        match store.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                tracing::debug!(key = %key, "weather cache hit");
                Some(entry.payload.clone())
            }
            Some(_) => {
                store.remove(&key);
                tracing::debug!(key = %key, "weather cache expired");
                None
            }
            None => {
                tracing::debug!(key = %key, "weather cache miss");
                None
            }
        }
    }

    pub fn set(&self, city: &str, payload: String) {
        let key = cache_key(city);
        self.store.lock().insert(
            key.clone(),
            Entry {
                payload,
                expires_at: Instant::now() + Duration::from_secs(TTL_SECONDS),
            },
        );
        tracing::debug!(key = %key, ttl_seconds = TTL_SECONDS, "weather cached");
    }

    /// Force-evict a city's current-hour entry. Useful in tests.
    pub fn invalidate(&self, city: &str) {
        let key = cache_key(city);
        self.store.lock().remove(&key);
        tracing::debug!(key = %key, "weather cache invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_handles_accents_and_spaces() {
        assert_eq!(slugify("São Paulo"), "sao-paulo");
        assert_eq!(slugify("New York"), "new-york");
    }

    #[test]
    fn slugify_falls_back_to_unknown() {
        assert_eq!(slugify("!!!"), "unknown");
        assert_eq!(slugify(""), "unknown");
    }

    #[test]
    fn get_after_set_is_a_hit() {
        let cache = WeatherCache::new();
        assert!(cache.get("Tokyo").is_none());
        cache.set("Tokyo", "{\"temp\":20}".to_string());
        assert_eq!(cache.get("Tokyo"), Some("{\"temp\":20}".to_string()));
    }

    #[test]
    fn invalidate_clears_the_entry() {
        let cache = WeatherCache::new();
        cache.set("Tokyo", "{}".to_string());
        cache.invalidate("Tokyo");
        assert!(cache.get("Tokyo").is_none());
    }
}
