use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{config::UpstreamConfig, errors::UpstreamError};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeoLocation {
    pub name: String,
    #[serde(default)]
    pub country: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CurrentWeather {
    pub temperature: f64,
    pub windspeed: f64,
    pub weathercode: i64,
}

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<GeoLocation>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    current_weather: Option<CurrentWeather>,
}

/// Outbound lookups used by the tools.
#[async_trait]
pub trait UpstreamApis: Send + Sync {
    /// Resolves a city name to its best match, `None` when nothing matches.
    async fn geocode(&self, city: &str) -> Result<Option<GeoLocation>, UpstreamError>;

    async fn current_weather(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Option<CurrentWeather>, UpstreamError>;

    /// Returns the `web.results` list of a web search, or an empty list.
    async fn web_search(
        &self,
        api_key: &str,
        query: &str,
        count: u32,
    ) -> Result<Value, UpstreamError>;
}

pub struct HttpApiClient {
    http: Client,
    config: UpstreamConfig,
}

impl HttpApiClient {
    pub fn new(config: UpstreamConfig) -> Result<Self, UpstreamError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| UpstreamError::Unavailable(format!("failed to build http client: {err}")))?;

        Ok(Self { http, config })
    }

    /// Sends an idempotent GET, retrying timeouts, connection failures,
    /// 429 and 5xx responses with exponential backoff.
    async fn get_json<T, F>(&self, upstream: &'static str, build: F) -> Result<T, UpstreamError>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let outcome = match build(&self.http).send().await {
                Ok(response) if response.status().is_success() => {
                    return response
                        .json::<T>()
                        .await
                        .map_err(|err| UpstreamError::Decode(err.to_string()));
                }
                Ok(response) => {
                    let status = response.status();
                    if !is_retryable_status(status) {
                        return Err(UpstreamError::Status(status.as_u16()));
                    }
                    UpstreamError::Status(status.as_u16())
                }
                Err(err) if err.is_timeout() || err.is_connect() || err.is_request() => {
                    UpstreamError::Unavailable(err.to_string())
                }
                Err(err) => return Err(UpstreamError::Unavailable(err.to_string())),
            };

            if attempt >= self.config.max_retries {
                warn!(upstream, attempts = attempt + 1, error = %outcome, "upstream call failed");
                return Err(outcome);
            }

            let delay = backoff_delay(self.config.retry_base_delay, attempt);
            debug!(upstream, attempt, delay_ms = delay.as_millis(), error = %outcome, "retrying upstream call");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl UpstreamApis for HttpApiClient {
    async fn geocode(&self, city: &str) -> Result<Option<GeoLocation>, UpstreamError> {
        let response: GeocodingResponse = self
            .get_json("geocoding", |http| {
                http.get(&self.config.geocoding_url).query(&[
                    ("name", city),
                    ("count", "1"),
                    ("language", "en"),
                    ("format", "json"),
                ])
            })
            .await?;

        Ok(response.results.into_iter().next())
    }

    async fn current_weather(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Option<CurrentWeather>, UpstreamError> {
        let latitude = latitude.to_string();
        let longitude = longitude.to_string();
        let response: ForecastResponse = self
            .get_json("weather", |http| {
                http.get(&self.config.weather_url).query(&[
                    ("latitude", latitude.as_str()),
                    ("longitude", longitude.as_str()),
                    ("current_weather", "true"),
                ])
            })
            .await?;

        Ok(response.current_weather)
    }

    async fn web_search(
        &self,
        api_key: &str,
        query: &str,
        count: u32,
    ) -> Result<Value, UpstreamError> {
        let count = count.to_string();
        let response: Value = self
            .get_json("search", |http| {
                http.get(&self.config.search_url)
                    .header("Accept", "application/json")
                    .header("X-Subscription-Token", api_key)
                    .query(&[("q", query), ("count", count.as_str())])
            })
            .await?;

        Ok(extract_search_results(response))
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

fn extract_search_results(mut response: Value) -> Value {
    response
        .pointer_mut("/web/results")
        .map(Value::take)
        .filter(|results| !results.is_null())
        .unwrap_or_else(|| Value::Array(vec![]))
}
