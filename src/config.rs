//! Application configuration, built once at startup from the environment.

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,

    /// `ADMIN_HMAC_SECRET` — required for admin endpoint verification. If unset,
    /// admin verification responds 503 rather than silently accepting requests.
    pub admin_hmac_secret: Option<String>,

    /// `OPENWEATHERMAP_API_KEY`.
    pub weather_api_key: Option<String>,
    pub weather_api_base: String,

    /// `SHADOW_MODE_ENABLED` — default false, zero overhead when off.
    pub shadow_mode_enabled: bool,

    /// `CANT_MISS_FLOOR_ENABLED` — the cantMiss score-floor pass (default on:
    /// this is a core invariant, not the tourist-correction heuristic).
    pub cant_miss_floor_enabled: bool,

    /// Directory the BPR training extract writes into.
    pub training_output_dir: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./tripcore.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let admin_hmac_secret = std::env::var("ADMIN_HMAC_SECRET").ok().filter(|s| !s.is_empty());

        let weather_api_key = std::env::var("OPENWEATHERMAP_API_KEY").ok();

        let weather_api_base = std::env::var("WEATHER_API_BASE")
            .unwrap_or_else(|_| "https://api.openweathermap.org/data/2.5".to_string());

        let shadow_mode_enabled = std::env::var("SHADOW_MODE_ENABLED")
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        let cant_miss_floor_enabled = std::env::var("CANT_MISS_FLOOR_ENABLED")
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(true);

        let training_output_dir =
            std::env::var("TRAINING_OUTPUT_DIR").unwrap_or_else(|_| "./data/training".to_string());

        Ok(Self {
            database_path,
            port,
            admin_hmac_secret,
            weather_api_key,
            weather_api_base,
            shadow_mode_enabled,
            cant_miss_floor_enabled,
            training_output_dir,
        })
    }
}
