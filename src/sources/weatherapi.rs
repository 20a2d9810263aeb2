//! WeatherAPI.com weather source. Secondary weather provider.
//!
//! Authentication is a `key` query parameter.

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::{airport_coords, RateWindow, SourceAdapter, WeatherQuery, WeatherSource};
use crate::error::{CoreError, CoreResult};
use crate::model::{CanonicalWeather, SourceContribution, WeatherConditionType};

pub const SOURCE_NAME: &str = "weatherapi";
pub const PRIORITY: u8 = 80;
pub const RELIABILITY: f64 = 0.85;

const DEFAULT_BASE_URL: &str = "https://api.weatherapi.com/v1";
const API_VERSION: &str = "v1";

pub struct WeatherApiSource {
    api_key: String,
    base_url: String,
    client: Client,
    rate: RateWindow,
}

impl WeatherApiSource {
    pub fn new(api_key: String) -> CoreResult<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> CoreResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| CoreError::transport(SOURCE_NAME, e))?;
        Ok(Self {
            api_key,
            base_url,
            client,
            rate: RateWindow::new(90),
        })
    }

    /// WeatherAPI condition codes; the text is a stable fallback when a code
    /// is missing from the table.
    fn map_condition(code: i64, text: &str) -> WeatherConditionType {
        match code {
            1000 => WeatherConditionType::Clear,
            1003 | 1006 | 1009 => WeatherConditionType::Cloudy,
            1030 | 1135 | 1147 => WeatherConditionType::Fog,
            1063 | 1150..=1201 | 1240..=1246 => WeatherConditionType::Rain,
            1066 | 1114 | 1117 | 1210..=1237 | 1249..=1264 => WeatherConditionType::Snow,
            1087 | 1273..=1282 => WeatherConditionType::Storm,
            _ => {
                let lower = text.to_lowercase();
                if lower.contains("thunder") || lower.contains("storm") {
                    WeatherConditionType::Storm
                } else if lower.contains("snow") || lower.contains("blizzard") {
                    WeatherConditionType::Snow
                } else if lower.contains("rain") || lower.contains("drizzle") {
                    WeatherConditionType::Rain
                } else if lower.contains("fog") || lower.contains("mist") {
                    WeatherConditionType::Fog
                } else if lower.contains("cloud") || lower.contains("overcast") {
                    WeatherConditionType::Cloudy
                } else if lower.contains("clear") || lower.contains("sunny") {
                    WeatherConditionType::Clear
                } else {
                    WeatherConditionType::Unknown
                }
            }
        }
    }

    fn parse_weather(&self, body: &Value, query: &WeatherQuery) -> Option<CanonicalWeather> {
        let current = body.get("current")?;

        let mut wx = CanonicalWeather::new(query.airport.clone(), Utc::now(), query.period);
        let mut fields = vec!["airport".to_string(), "observed_at".to_string()];

        let code = current["condition"]["code"].as_i64().unwrap_or(-1);
        let text = current["condition"]["text"].as_str().unwrap_or("");
        if code >= 0 || !text.is_empty() {
            wx.condition_code = Some(code.to_string());
            wx.condition_text = Some(text.to_string());
            wx.condition_type = Self::map_condition(code, text);
            fields.push("condition".into());
        }

        wx.temperature_c = current["temp_c"].as_f64();
        if wx.temperature_c.is_some() {
            fields.push("temperature_c".into());
        }
        wx.wind_speed_kph = current["wind_kph"].as_f64();
        wx.wind_cardinal = current["wind_dir"].as_str().map(str::to_string);
        if wx.wind_speed_kph.is_some() {
            fields.push("wind".into());
        }
        wx.precipitation_mm = current["precip_mm"].as_f64();
        if wx.precipitation_mm.is_some() {
            fields.push("precipitation_mm".into());
        }
        wx.visibility_km = current["vis_km"].as_f64();
        if wx.visibility_km.is_some() {
            fields.push("visibility_km".into());
        }
        wx.humidity_pct = current["humidity"].as_f64();
        if wx.humidity_pct.is_some() {
            fields.push("humidity_pct".into());
        }
        wx.pressure_hpa = current["pressure_mb"].as_f64();

        wx.contributions.push(SourceContribution {
            source_name: SOURCE_NAME.to_string(),
            fields,
            timestamp: Utc::now(),
            confidence: RELIABILITY,
            source_id: None,
            api_version: Some(API_VERSION.to_string()),
        });
        wx.data_quality_score = wx.completeness_score();
        Some(wx)
    }
}

#[async_trait]
impl SourceAdapter for WeatherApiSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn priority(&self) -> u8 {
        PRIORITY
    }

    fn reliability(&self) -> f64 {
        RELIABILITY
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/current.json", self.base_url);
        match self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str()), ("q", "London")])
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("{} health probe failed: {}", SOURCE_NAME, e);
                false
            }
        }
    }
}

#[async_trait]
impl WeatherSource for WeatherApiSource {
    async fn fetch_weather(&self, query: &WeatherQuery) -> CoreResult<Option<CanonicalWeather>> {
        let (lat, lon) = match airport_coords(&query.airport) {
            Some(coords) => coords,
            None => return Ok(None),
        };
        self.rate.check(SOURCE_NAME)?;

        let url = format!("{}/current.json", self.base_url);
        let coords = format!("{},{}", lat, lon);
        let response = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str()), ("q", coords.as_str())])
            .send()
            .await
            .map_err(|e| CoreError::transport(SOURCE_NAME, e))?;

        if !response.status().is_success() {
            return Err(CoreError::transport(
                SOURCE_NAME,
                format!("HTTP {}", response.status()),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CoreError::transport(SOURCE_NAME, e))?;
        Ok(self.parse_weather(&body, query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn source() -> WeatherApiSource {
        WeatherApiSource::new("test-key".into()).unwrap()
    }

    fn query() -> WeatherQuery {
        WeatherQuery::current("RIX", NaiveDate::from_ymd_opt(2025, 7, 1).unwrap())
    }

    #[test]
    fn parses_a_snowy_observation() {
        let body = json!({
            "current": {
                "temp_c": -3.0,
                "condition": {"text": "Light snow", "code": 1213},
                "wind_kph": 18.4,
                "wind_dir": "NNE",
                "precip_mm": 1.2,
                "vis_km": 3.5,
                "humidity": 93,
                "pressure_mb": 1013.0
            }
        });
        let wx = source().parse_weather(&body, &query()).unwrap();
        assert_eq!(wx.condition_type, WeatherConditionType::Snow);
        assert_eq!(wx.temperature_c, Some(-3.0));
        assert_eq!(wx.wind_cardinal.as_deref(), Some("NNE"));
        assert_eq!(wx.humidity_pct, Some(93.0));
    }

    #[test]
    fn text_fallback_classifies_unlisted_codes() {
        assert_eq!(
            WeatherApiSource::map_condition(9999, "Patchy thunderstorm nearby"),
            WeatherConditionType::Storm
        );
        assert_eq!(
            WeatherApiSource::map_condition(9999, "Sunny"),
            WeatherConditionType::Clear
        );
        assert_eq!(
            WeatherApiSource::map_condition(9999, "???"),
            WeatherConditionType::Unknown
        );
    }

    #[test]
    fn missing_current_block_yields_no_record() {
        let body = json!({"location": {"name": "Riga"}});
        assert!(source().parse_weather(&body, &query()).is_none());
    }
}
