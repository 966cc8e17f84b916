//! Domain-specific shared validations and formatting utilities

use crate::{
    errors::ToolError,
    upstream_client::{CurrentWeather, GeoLocation},
};

pub const DEFAULT_SEARCH_COUNT: u32 = 5;
pub const MAX_SEARCH_COUNT: u32 = 20;

/// Formats a number the way JavaScript's `String(number)` does.
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }

    let magnitude = value.abs();
    if magnitude >= 1e21 || magnitude < 1e-6 {
        let formatted = format!("{value:e}");
        return match formatted.split_once('e') {
            Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                format!("{mantissa}e+{exponent}")
            }
            _ => formatted,
        };
    }

    format!("{value}")
}

pub fn normalize_city(city: &str) -> Result<&str, ToolError> {
    let trimmed = city.trim();
    if trimmed.is_empty() {
        return Err(ToolError::invalid_arguments("city must not be empty"));
    }
    Ok(trimmed)
}

pub fn normalize_search_query(query: &str) -> Result<&str, ToolError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(ToolError::invalid_arguments("query must not be empty"));
    }
    Ok(trimmed)
}

/// Accepts any JSON number holding a whole value in `1..=20`, so `5.0` is `5`.
pub fn normalize_search_count(count: Option<f64>) -> Result<u32, ToolError> {
    let Some(count) = count else {
        return Ok(DEFAULT_SEARCH_COUNT);
    };
    if count.fract() != 0.0 || !(1.0..=f64::from(MAX_SEARCH_COUNT)).contains(&count) {
        return Err(ToolError::invalid_arguments(
            "count must be a whole number between 1 and 20",
        ));
    }
    Ok(count as u32)
}

pub fn format_weather_report(location: &GeoLocation, weather: &CurrentWeather) -> String {
    let place = match location.country.as_deref() {
        Some(country) if !country.is_empty() => format!("{}, {country}", location.name),
        _ => location.name.clone(),
    };

    format!(
        "Weather in {place}:\nTemperature: {}°C\nWind speed: {} km/h\nWeather code: {}",
        format_number(weather.temperature),
        format_number(weather.windspeed),
        weather.weathercode,
    )
}
