//! Weather lookups feeding outdoor-slot pivot signals.

pub mod cache;
pub mod service;

pub use cache::WeatherCache;
pub use service::{WeatherService, WeatherSummary};
