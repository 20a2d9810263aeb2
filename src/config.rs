//! Configuration for the insurance core.
//!
//! Defaults live here as constants; `CoreConfig::from_env` overrides them
//! from environment variables (the binary loads `.env` via `dotenv` first).

use std::env;
use std::time::Duration;

// --- Aggregation defaults ---

/// How long an adapter health verdict is trusted before re-probing.
pub const DEFAULT_HEALTH_TTL_SECS: u64 = 300;

/// TTL for a cached flight record. Live flight data goes stale fast.
pub const DEFAULT_FLIGHT_CACHE_TTL_SECS: u64 = 300;

/// TTL for a cached weather record.
pub const DEFAULT_WEATHER_CACHE_TTL_SECS: u64 = 3600;

// --- Retry defaults ---

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 200;
pub const DEFAULT_BACKOFF_FACTOR: u32 = 2;

// --- Quote defaults ---

/// Time between quote issue and expiry.
pub const DEFAULT_QUOTE_VALIDITY_SECS: i64 = 15 * 60;

/// Below this bundle quality the engine refuses to quote at all.
pub const DEFAULT_REFUSAL_QUALITY_FLOOR: f64 = 0.4;

/// Below this bundle quality a confidence surcharge applies.
pub const DEFAULT_SURCHARGE_QUALITY_THRESHOLD: f64 = 0.7;

// --- Policy defaults ---

/// Minutes of arrival delay before the parametric trigger fires.
pub const DEFAULT_DELAY_THRESHOLD_MINUTES: i64 = 60;

/// Minutes past scheduled arrival after which a missing actual arrival is
/// treated as final for trigger evaluation.
pub const ARRIVAL_GRACE_WINDOW_MINUTES: i64 = 45;

// --- Chain defaults ---

/// Integer chain units per one currency unit. 100 units = $1.00.
pub const DEFAULT_UNIT_SCALE: u64 = 100;

pub const DEFAULT_CHAIN_RPC_URL: &str = "http://localhost:3010";

// --- Environment variable names ---

pub const ENV_AVIATIONSTACK_KEY: &str = "AVIATIONSTACK_API_KEY";
pub const ENV_FLIGHTAWARE_KEY: &str = "FLIGHTAWARE_API_KEY";
pub const ENV_OPENSKY_USER: &str = "OPENSKY_USERNAME";
pub const ENV_OPENSKY_PASS: &str = "OPENSKY_PASSWORD";
pub const ENV_OPENWEATHER_KEY: &str = "OPENWEATHERMAP_API_KEY";
pub const ENV_WEATHERAPI_KEY: &str = "WEATHERAPI_KEY";
pub const ENV_CHAIN_RPC_URL: &str = "CHAIN_RPC_URL";
pub const ENV_CHAIN_SIGNER_KEY: &str = "CHAIN_SIGNER_KEY_BASE64";

/// Runtime configuration assembled once at startup and passed down from the
/// composition root.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub health_ttl: Duration,
    pub flight_cache_ttl: Duration,
    pub weather_cache_ttl: Duration,
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: u32,
    pub quote_validity_secs: i64,
    pub refusal_quality_floor: f64,
    pub surcharge_quality_threshold: f64,
    pub default_delay_threshold_minutes: i64,
    pub arrival_grace_window_minutes: i64,
    pub hash_synthesis_enabled: bool,
    pub unit_scale: u64,
    pub chain_rpc_url: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            health_ttl: Duration::from_secs(DEFAULT_HEALTH_TTL_SECS),
            flight_cache_ttl: Duration::from_secs(DEFAULT_FLIGHT_CACHE_TTL_SECS),
            weather_cache_ttl: Duration::from_secs(DEFAULT_WEATHER_CACHE_TTL_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            quote_validity_secs: DEFAULT_QUOTE_VALIDITY_SECS,
            refusal_quality_floor: DEFAULT_REFUSAL_QUALITY_FLOOR,
            surcharge_quality_threshold: DEFAULT_SURCHARGE_QUALITY_THRESHOLD,
            default_delay_threshold_minutes: DEFAULT_DELAY_THRESHOLD_MINUTES,
            arrival_grace_window_minutes: ARRIVAL_GRACE_WINDOW_MINUTES,
            hash_synthesis_enabled: true,
            unit_scale: DEFAULT_UNIT_SCALE,
            chain_rpc_url: DEFAULT_CHAIN_RPC_URL.to_string(),
        }
    }
}

impl CoreConfig {
    /// Builds a configuration from environment variables, falling back to the
    /// defaults above for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(secs) = env_u64("AGGREGATOR_HEALTH_TTL_SECS") {
            cfg.health_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("AGGREGATOR_FLIGHT_CACHE_TTL_SECS") {
            cfg.flight_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("AGGREGATOR_WEATHER_CACHE_TTL_SECS") {
            cfg.weather_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(n) = env_u64("EXECUTOR_MAX_ATTEMPTS") {
            cfg.max_attempts = n.max(1) as u32;
        }
        if let Some(ms) = env_u64("EXECUTOR_INITIAL_DELAY_MS") {
            cfg.initial_delay = Duration::from_millis(ms);
        }
        if let Some(f) = env_u64("EXECUTOR_BACKOFF_FACTOR") {
            cfg.backoff_factor = f.max(1) as u32;
        }
        if let Some(secs) = env_u64("QUOTE_VALIDITY_SECS") {
            cfg.quote_validity_secs = secs as i64;
        }
        if let Some(f) = env_f64("QUOTE_REFUSAL_QUALITY_FLOOR") {
            cfg.refusal_quality_floor = f.clamp(0.0, 1.0);
        }
        if let Some(mins) = env_u64("POLICY_DEFAULT_DELAY_THRESHOLD") {
            cfg.default_delay_threshold_minutes = mins as i64;
        }
        if let Ok(v) = env::var("ESCROW_HASH_SYNTHESIS") {
            cfg.hash_synthesis_enabled = !matches!(v.as_str(), "0" | "false" | "disabled");
        }
        if let Some(scale) = env_u64("ESCROW_UNIT_SCALE") {
            if scale > 0 {
                cfg.unit_scale = scale;
            }
        }
        if let Ok(url) = env::var(ENV_CHAIN_RPC_URL) {
            if !url.is_empty() {
                cfg.chain_rpc_url = url;
            }
        }

        cfg
    }
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_f64(name: &str) -> Option<f64> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.health_ttl, Duration::from_secs(300));
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.initial_delay, Duration::from_millis(200));
        assert_eq!(cfg.backoff_factor, 2);
        assert_eq!(cfg.quote_validity_secs, 900);
        assert_eq!(cfg.default_delay_threshold_minutes, 60);
        assert_eq!(cfg.unit_scale, 100);
        assert!(cfg.hash_synthesis_enabled);
    }
}
