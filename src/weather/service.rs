//! OpenWeatherMap client backed by `WeatherCache`.
//!
//! Budget: OpenWeatherMap's free tier caps around 1,000 calls/day (~41/hour).
//! Caching per city per hour keeps every trip in the same city sharing one
//! upstream call regardless of how many trips are active there.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::cache::WeatherCache;

const RAIN_CODES: std::ops::Range<i64> = 500..532;
const STORM_CODES: std::ops::Range<i64> = 200..233;
const DRIZZLE_CODES: std::ops::Range<i64> = 300..322;
// Snow is tracked in the upstream payload but, matching the source this was
// ported from, is not currently treated as bad weather below.
#[allow(dead_code)]
const SNOW_CODES: std::ops::Range<i64> = 600..623;

const OUTDOOR_CATEGORIES: [&str; 2] = ["outdoors", "active"];

const WEATHER_ENDPOINT: &str = "https://api.openweathermap.org/data/2.5/weather";
const API_TIMEOUT: Duration = Duration::from_secs(8);

fn kelvin_to_celsius(k: f64) -> f64 {
    ((k - 273.15) * 10.0).round() / 10.0
}

fn is_bad_weather(condition_code: i64) -> bool {
    RAIN_CODES.contains(&condition_code)
        || STORM_CODES.contains(&condition_code)
        || DRIZZLE_CODES.contains(&condition_code)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherSummary {
    pub condition: String,
    pub code: i64,
    pub temp_c: f64,
    pub description: String,
}

fn parse_condition(raw: &Value) -> WeatherSummary {
    let primary = raw
        .get("weather")
        .and_then(|w| w.as_array())
        .and_then(|arr| arr.first());

    let code = primary.and_then(|p| p.get("id")).and_then(Value::as_i64).unwrap_or(800);
    let main = primary
        .and_then(|p| p.get("main"))
        .and_then(Value::as_str)
        .unwrap_or("Clear");
    let description = primary
        .and_then(|p| p.get("description"))
        .and_then(Value::as_str)
        .unwrap_or("clear sky");

    let temp_kelvin = raw
        .get("main")
        .and_then(|m| m.get("temp"))
        .and_then(Value::as_f64)
        .unwrap_or(293.0);

    WeatherSummary {
        condition: main.to_lowercase(),
        code,
        temp_c: kelvin_to_celsius(temp_kelvin),
        description: description.to_string(),
    }
}

/// OpenWeatherMap client. `api_key` is optional — without one, every lookup
/// returns `None` and callers degrade gracefully (no forecast context).
pub struct WeatherService {
    api_key: Option<String>,
    cache: WeatherCache,
    client: reqwest::Client,
}

impl WeatherService {
    pub fn new(api_key: Option<String>, cache: WeatherCache) -> Self {
        let client = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .expect("reqwest client config is static and valid");
        Self { api_key, cache, client }
    }

    /// Fetch current weather for a city, through the cache. Returns `None`
    /// if no API key is configured or the upstream call fails — errors are
    /// logged, never propagated.
    pub async fn get_weather(&self, city: &str) -> Option<WeatherSummary> {
        if let Some(cached) = self.cache.get(city) {
            return match serde_json::from_str::<Value>(&cached) {
                Ok(raw) => Some(parse_condition(&raw)),
                Err(err) => {
                    tracing::warn!(city, error = %err, "cached weather payload was not valid JSON");
                    None
                }
            };
        }

        let Some(api_key) = self.api_key.as_deref() else {
            tracing::warn!(city, "OPENWEATHERMAP_API_KEY not set; skipping weather fetch");
            return None;
        };

        let resp = match self
            .client
            .get(WEATHER_ENDPOINT)
            .query(&[("q", city), ("appid", api_key)])
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                tracing::warn!(city, error = %err, "OpenWeatherMap request failed");
                return None;
            }
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(
                city,
                status = status.as_u16(),
                body = &body[..body.len().min(200)],
                "OpenWeatherMap returned an error status"
            );
            return None;
        }

        let raw: Value = match resp.json().await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(city, error = %err, "OpenWeatherMap response was not valid JSON");
                return None;
            }
        };

        match serde_json::to_string(&raw) {
            Ok(payload) => self.cache.set(city, payload),
            Err(err) => tracing::warn!(city, error = %err, "failed to serialize weather payload for caching"),
        }

        Some(parse_condition(&raw))
    }

    pub fn is_outdoor_slot(&self, category: &str) -> bool {
        OUTDOOR_CATEGORIES.contains(&category.to_lowercase().as_str())
    }

    /// Compact JSON string stored in `BehavioralSignal.weather_context`, or
    /// `None` when no weather data is available.
    pub fn build_weather_context(&self, summary: Option<&WeatherSummary>, slot_category: &str) -> Option<String> {
        let summary = summary?;
        let outdoor_risk = self.is_outdoor_slot(slot_category) && is_bad_weather(summary.code);

        let context = serde_json::json!({
            "condition": summary.condition,
            "code": summary.code,
            "temp_c": summary.temp_c,
            "outdoor_risk": outdoor_risk,
        });
        serde_json::to_string(&context).ok()
    }

    /// True if this slot category + weather combination warrants a pivot:
    /// the slot is outdoor-sensitive and the current conditions are bad.
    pub fn should_trigger_weather_pivot(&self, summary: Option<&WeatherSummary>, slot_category: &str) -> bool {
        let Some(summary) = summary else {
            return false;
        };
        self.is_outdoor_slot(slot_category) && is_bad_weather(summary.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(code: i64) -> WeatherSummary {
        WeatherSummary {
            condition: "rain".into(),
            code,
            temp_c: 18.2,
            description: "moderate rain".into(),
        }
    }

    fn service() -> WeatherService {
        WeatherService::new(None, WeatherCache::new())
    }

    #[test]
    fn kelvin_conversion_rounds_to_one_decimal() {
        assert_eq!(kelvin_to_celsius(291.35), 18.2);
    }

    #[test]
    fn rain_code_is_bad_weather() {
        assert!(is_bad_weather(501));
        assert!(is_bad_weather(211));
        assert!(is_bad_weather(301));
        assert!(!is_bad_weather(800));
    }

    #[test]
    fn snow_is_not_flagged_as_bad_weather() {
        // Matches the source behavior: snow codes are enumerated but not
        // checked by is_bad_weather.
        assert!(!is_bad_weather(601));
    }

    #[test]
    fn outdoor_pivot_triggers_on_rain_for_outdoor_slot() {
        let svc = service();
        assert!(svc.should_trigger_weather_pivot(Some(&summary(501)), "outdoors"));
        assert!(!svc.should_trigger_weather_pivot(Some(&summary(501)), "dining"));
        assert!(!svc.should_trigger_weather_pivot(None, "outdoors"));
    }

    #[test]
    fn weather_context_is_compact_json_with_outdoor_risk() {
        let svc = service();
        let ctx = svc.build_weather_context(Some(&summary(501)), "active").unwrap();
        assert!(ctx.contains("\"outdoor_risk\":true"));
        assert!(ctx.contains("\"code\":501"));
    }

    #[test]
    fn weather_context_is_none_without_a_summary() {
        let svc = service();
        assert!(svc.build_weather_context(None, "outdoors").is_none());
    }

    #[tokio::test]
    async fn missing_api_key_returns_none() {
        let svc = service();
        assert!(svc.get_weather("Tokyo").await.is_none());
    }
}
