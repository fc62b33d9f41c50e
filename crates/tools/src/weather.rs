//! `get_weather`: current conditions for a location.
//!
//! Calls OpenWeatherMap when an API key is configured. Without a key it
//! returns deterministic simulated data so the assistant keeps working
//! offline and tests need no network access.

use async_trait::async_trait;
use concierge_config::WeatherConfig;
use concierge_core::error::ExecutionError;
use concierge_core::function::{Arguments, FunctionHandler};
use concierge_core::schema::{FunctionDefinition, ParameterSpec};
use concierge_core::value::Value;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const NAME: &str = "get_weather";

pub struct WeatherFunction {
    client: reqwest::Client,
    api_key: Option<String>,
    api_url: String,
    default_units: String,
}

impl WeatherFunction {
    pub fn new(config: &WeatherConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        if config.api_key.is_none() {
            warn!("OpenWeatherMap API key not configured, weather data will be simulated");
        }

        Self {
            client,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            default_units: config.default_units.clone(),
        }
    }

    /// Offline instance that always simulates.
    pub fn simulated() -> Self {
        Self::new(&WeatherConfig::default())
    }

    pub fn definition() -> FunctionDefinition {
        FunctionDefinition::new(
            NAME,
            "Get the current weather conditions for a location: temperature, \
             conditions, humidity and wind.",
        )
        .param(
            ParameterSpec::string("location", "City and optionally country, e.g. \"Madrid, Spain\"")
                .required(),
        )
        .param(
            ParameterSpec::string("units", "Unit system for temperature and wind speed")
                .one_of(["metric", "imperial"]),
        )
    }

    async fn fetch(&self, api_key: &str, location: &str, units: &str) -> Result<Value, ExecutionError> {
        let url = format!("{}/weather", self.api_url);
        debug!(%location, %units, "Querying OpenWeatherMap");

        let response = self
            .client
            .get(&url)
            .query(&[("q", location), ("appid", api_key), ("units", units)])
            .send()
            .await
            .map_err(|e| ExecutionError::new(format!("weather service unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ApiError>()
                .await
                .map(|e| e.message)
                .unwrap_or_else(|_| "no details".into());
            warn!(status = status.as_u16(), %message, "OpenWeatherMap returned error");
            return Err(ExecutionError::new(format!(
                "weather service error ({}): {message}",
                status.as_u16()
            )));
        }

        let data: ApiWeather = response
            .json()
            .await
            .map_err(|e| ExecutionError::new(format!("unexpected weather response: {e}")))?;

        Ok(Report::from_api(data, units).into_value())
    }
}

#[async_trait]
impl FunctionHandler for WeatherFunction {
    async fn call(&self, args: Arguments) -> Result<Value, ExecutionError> {
        let location = args.require_str("location")?.trim();
        let units = args.str("units").unwrap_or(&self.default_units);

        if !location.chars().any(char::is_alphabetic) {
            return Err(ExecutionError::new(format!("unknown location '{location}'")));
        }

        info!(%location, %units, "Getting weather");
        match &self.api_key {
            Some(key) => self.fetch(key, location, units).await,
            None => Ok(Report::simulated(location, units).into_value()),
        }
    }
}

struct Report {
    location: String,
    temperature: f64,
    feels_like: f64,
    condition: String,
    humidity: i64,
    wind_speed: f64,
    pressure: i64,
    units: String,
    source: &'static str,
}

impl Report {
    fn from_api(data: ApiWeather, units: &str) -> Self {
        let location = match data.sys.country {
            Some(country) => format!("{}, {country}", data.name),
            None => data.name,
        };
        let condition = data
            .weather
            .into_iter()
            .next()
            .map(|w| capitalize(&w.description))
            .unwrap_or_default();

        Self {
            location,
            temperature: round1(data.main.temp),
            feels_like: round1(data.main.feels_like),
            condition,
            humidity: data.main.humidity,
            wind_speed: data.wind.speed,
            pressure: data.main.pressure,
            units: units.to_string(),
            source: "OpenWeatherMap",
        }
    }

    /// Deterministic data derived from a hash of the location name.
    fn simulated(location: &str, units: &str) -> Self {
        let hash: u32 = location
            .to_lowercase()
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));

        let conditions = [
            "Clear sky",
            "Few clouds",
            "Overcast",
            "Light rain",
            "Heavy rain",
            "Thunderstorm",
            "Snow",
            "Mist",
        ];

        let base_c = f64::from(hash % 40) - 5.0;
        let feels_c = base_c - f64::from(hash % 4);
        let wind_kmh = f64::from(hash % 30) + 5.0;
        let (temperature, feels_like, wind_speed) = if units == "imperial" {
            (to_fahrenheit(base_c), to_fahrenheit(feels_c), round1(wind_kmh / 1.609))
        } else {
            (base_c, feels_c, wind_kmh)
        };

        Self {
            location: location.to_string(),
            temperature: round1(temperature),
            feels_like: round1(feels_like),
            condition: conditions[(hash as usize / 7) % conditions.len()].to_string(),
            humidity: i64::from(30 + hash % 60),
            wind_speed,
            pressure: i64::from(990 + hash % 40),
            units: units.to_string(),
            source: "simulated",
        }
    }

    fn into_value(self) -> Value {
        let (temp_unit, wind_unit) = if self.units == "imperial" {
            ("°F", "mph")
        } else {
            ("°C", "km/h")
        };
        Value::map([
            ("location", Value::from(self.location)),
            ("temperature", Value::from(self.temperature)),
            ("feels_like", Value::from(self.feels_like)),
            ("temperature_unit", Value::from(temp_unit)),
            ("condition", Value::from(self.condition)),
            ("humidity", Value::from(self.humidity)),
            ("wind_speed", Value::from(self.wind_speed)),
            ("wind_unit", Value::from(wind_unit)),
            ("pressure_hpa", Value::from(self.pressure)),
            ("source", Value::from(self.source)),
        ])
    }
}

fn to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// --- OpenWeatherMap API types (internal) ---

#[derive(Debug, Deserialize)]
struct ApiWeather {
    name: String,
    main: ApiMain,
    #[serde(default)]
    weather: Vec<ApiCondition>,
    wind: ApiWind,
    sys: ApiSys,
}

#[derive(Debug, Deserialize)]
struct ApiMain {
    temp: f64,
    feels_like: f64,
    humidity: i64,
    pressure: i64,
}

#[derive(Debug, Deserialize)]
struct ApiCondition {
    description: String,
}

#[derive(Debug, Deserialize)]
struct ApiWind {
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct ApiSys {
    #[serde(default)]
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}
