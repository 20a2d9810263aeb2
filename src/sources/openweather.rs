//! OpenWeatherMap weather source. Primary weather provider.
//!
//! Authentication is an `appid` query parameter. Requests are keyed on
//! coordinates resolved from the airport table.

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::{airport_coords, RateWindow, SourceAdapter, WeatherQuery, WeatherSource};
use crate::error::{CoreError, CoreResult};
use crate::model::weather::degrees_to_cardinal;
use crate::model::{CanonicalWeather, SourceContribution, WeatherConditionType};

pub const SOURCE_NAME: &str = "openweathermap";
pub const PRIORITY: u8 = 90;
pub const RELIABILITY: f64 = 0.90;

const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";
const API_VERSION: &str = "2.5";

pub struct OpenWeatherSource {
    api_key: String,
    base_url: String,
    client: Client,
    rate: RateWindow,
}

impl OpenWeatherSource {
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
            rate: RateWindow::new(60),
        })
    }

    /// OpenWeatherMap condition IDs group by the hundreds digit.
    fn map_condition(code: i64) -> WeatherConditionType {
        match code {
            200..=299 => WeatherConditionType::Storm,
            300..=399 | 500..=599 => WeatherConditionType::Rain,
            600..=699 => WeatherConditionType::Snow,
            701..=762 => WeatherConditionType::Fog,
            771 | 781 => WeatherConditionType::Storm,
            800 => WeatherConditionType::Clear,
            801..=899 => WeatherConditionType::Cloudy,
            _ => WeatherConditionType::Unknown,
        }
    }

    fn parse_weather(&self, body: &Value, query: &WeatherQuery) -> Option<CanonicalWeather> {
        let main = body.get("main")?;

        let mut wx = CanonicalWeather::new(query.airport.clone(), Utc::now(), query.period);
        let mut fields = vec!["airport".to_string(), "observed_at".to_string()];

        if let Some(condition) = body["weather"].as_array().and_then(|w| w.first()) {
            let code = condition["id"].as_i64().unwrap_or(-1);
            wx.condition_code = Some(code.to_string());
            wx.condition_text = condition["description"].as_str().map(str::to_string);
            wx.condition_type = Self::map_condition(code);
            fields.push("condition".into());
        }

        wx.temperature_c = main["temp"].as_f64();
        if wx.temperature_c.is_some() {
            fields.push("temperature_c".into());
        }
        wx.humidity_pct = main["humidity"].as_f64();
        if wx.humidity_pct.is_some() {
            fields.push("humidity_pct".into());
        }
        wx.pressure_hpa = main["pressure"].as_f64();

        if let Some(wind) = body.get("wind") {
            // Wind speed arrives in m/s with metric units.
            wx.wind_speed_kph = wind["speed"].as_f64().map(|ms| ms * 3.6);
            wx.wind_cardinal = wind["deg"].as_f64().map(|d| degrees_to_cardinal(d).to_string());
            if wx.wind_speed_kph.is_some() {
                fields.push("wind".into());
            }
        }
        // Visibility arrives in metres.
        wx.visibility_km = body["visibility"].as_f64().map(|m| m / 1000.0);
        if wx.visibility_km.is_some() {
            fields.push("visibility_km".into());
        }
        wx.precipitation_mm = body["rain"]["1h"]
            .as_f64()
            .or_else(|| body["snow"]["1h"].as_f64());
        if wx.precipitation_mm.is_some() {
            fields.push("precipitation_mm".into());
        }

        wx.contributions.push(SourceContribution {
            source_name: SOURCE_NAME.to_string(),
            fields,
            timestamp: Utc::now(),
            confidence: RELIABILITY,
            source_id: body["id"].as_i64().map(|id| id.to_string()),
            api_version: Some(API_VERSION.to_string()),
        });
        wx.data_quality_score = wx.completeness_score();
        Some(wx)
    }
}

#[async_trait]
impl SourceAdapter for OpenWeatherSource {
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
        let url = format!("{}/weather", self.base_url);
        match self
            .client
            .get(&url)
            .query(&[
                ("appid", self.api_key.as_str()),
                ("lat", "51.47"),
                ("lon", "-0.45"),
            ])
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
impl WeatherSource for OpenWeatherSource {
    async fn fetch_weather(&self, query: &WeatherQuery) -> CoreResult<Option<CanonicalWeather>> {
        let (lat, lon) = match airport_coords(&query.airport) {
            Some(coords) => coords,
            // Not an error: the provider simply has nothing for us.
            None => return Ok(None),
        };
        self.rate.check(SOURCE_NAME)?;

        let url = format!("{}/weather", self.base_url);
        let lat = lat.to_string();
        let lon = lon.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("appid", self.api_key.as_str()),
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("units", "metric"),
            ])
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

    fn source() -> OpenWeatherSource {
        OpenWeatherSource::new("test-key".into()).unwrap()
    }

    fn query() -> WeatherQuery {
        WeatherQuery::current("LHR", NaiveDate::from_ymd_opt(2025, 7, 1).unwrap())
    }

    fn sample_body() -> Value {
        json!({
            "id": 2643743,
            "weather": [{"id": 500, "main": "Rain", "description": "light rain"}],
            "main": {"temp": 14.2, "humidity": 81, "pressure": 1008},
            "wind": {"speed": 6.1, "deg": 250},
            "visibility": 9000,
            "rain": {"1h": 0.4}
        })
    }

    #[test]
    fn parses_a_rainy_observation() {
        let wx = source().parse_weather(&sample_body(), &query()).unwrap();
        assert_eq!(wx.airport, "LHR");
        assert_eq!(wx.condition_type, WeatherConditionType::Rain);
        assert_eq!(wx.temperature_c, Some(14.2));
        assert_eq!(wx.wind_cardinal.as_deref(), Some("WSW"));
        assert!((wx.wind_speed_kph.unwrap() - 21.96).abs() < 0.01);
        assert!((wx.visibility_km.unwrap() - 9.0).abs() < 1e-9);
        assert_eq!(wx.precipitation_mm, Some(0.4));
    }

    #[test]
    fn condition_buckets_follow_provider_ids() {
        assert_eq!(
            OpenWeatherSource::map_condition(212),
            WeatherConditionType::Storm
        );
        assert_eq!(
            OpenWeatherSource::map_condition(741),
            WeatherConditionType::Fog
        );
        assert_eq!(
            OpenWeatherSource::map_condition(800),
            WeatherConditionType::Clear
        );
        assert_eq!(
            OpenWeatherSource::map_condition(804),
            WeatherConditionType::Cloudy
        );
        assert_eq!(
            OpenWeatherSource::map_condition(601),
            WeatherConditionType::Snow
        );
    }

    #[tokio::test]
    async fn unknown_airport_is_no_data_not_an_error() {
        let mut q = query();
        q.airport = "ZZZ".into();
        let result = source().fetch_weather(&q).await.unwrap();
        assert!(result.is_none());
    }
}
