use std::{str::FromStr, time::Duration};

use log::LevelFilter;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{PlayerError, PlayerErrorCode};

/// Engine tuning. Every field has a default so an empty document is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Period of the local-only update cycle.
    pub cycle_interval_seconds: f64,
    /// Period of the network refresh cycle.
    pub main_cycle_seconds: f64,
    /// Minimum distance between now and a segment's start for it to be scheduled.
    pub lead_seconds: f64,
    pub stop_settle_millis: u64,
    pub unlock_settle_millis: u64,
    /// Concurrent waveform loads. Zero lifts the cap.
    pub max_concurrent_loads: usize,
    pub debug_log_capacity: usize,
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            cycle_interval_seconds: 1.0,
            main_cycle_seconds: 5.0,
            lead_seconds: 1.0,
            stop_settle_millis: 500,
            unlock_settle_millis: 200,
            max_concurrent_loads: 6,
            debug_log_capacity: 200,
            log_level: "info".to_string(),
        }
    }
}

fn config_error(message: String) -> PlayerError {
    PlayerError::new_code(PlayerErrorCode::Config, message)
}

impl EngineConfig {
    pub fn from_toml(source: &str) -> Result<EngineConfig, PlayerError> {
        let config: EngineConfig = toml::from_str(source)
            .map_err(|err| config_error(format!("invalid engine config: {}", err)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PlayerError> {
        for (name, period) in [
            ("cycle_interval_seconds", self.cycle_interval_seconds),
            ("main_cycle_seconds", self.main_cycle_seconds),
        ] {
            if !period.is_finite() || period <= 0.0 {
                return Err(config_error(format!("{} must be positive, got {}", name, period)));
            }
        }
        if !self.lead_seconds.is_finite() || self.lead_seconds < 0.0 {
            return Err(config_error(format!(
                "lead_seconds must not be negative, got {}",
                self.lead_seconds
            )));
        }
        self.level_filter()?;
        Ok(())
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs_f64(self.cycle_interval_seconds)
    }

    pub fn main_cycle(&self) -> Duration {
        Duration::from_secs_f64(self.main_cycle_seconds)
    }

    pub fn stop_settle(&self) -> Duration {
        Duration::from_millis(self.stop_settle_millis)
    }

    pub fn unlock_settle(&self) -> Duration {
        Duration::from_millis(self.unlock_settle_millis)
    }

    pub fn level_filter(&self) -> Result<LevelFilter, PlayerError> {
        LevelFilter::from_str(&self.log_level)
            .map_err(|_| config_error(format!("unknown log level {:?}", self.log_level)))
    }
}

/// Largest magnitude a JavaScript `Date` can hold.
const MAX_DATE_MILLIS: f64 = 8.64e15;

/// Parameters the host page passes to an embedded player.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbedParams {
    /// Pins the playback origin instead of deriving it at unlock.
    pub start_at_millis_utc: Option<i64>,
    /// Chain to start automatically.
    pub chain: Option<String>,
    pub api_base_url: Option<Url>,
    pub debug: bool,
}

impl EmbedParams {
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<EmbedParams, PlayerError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut params = EmbedParams::default();
        for (key, value) in pairs {
            let value = value.as_ref().trim();
            match key.as_ref() {
                "startAtMillisUTC" if !value.is_empty() => {
                    let millis = value
                        .parse::<f64>()
                        .ok()
                        .filter(|millis| millis.is_finite() && millis.abs() <= MAX_DATE_MILLIS)
                        .ok_or_else(|| {
                            config_error(format!("startAtMillisUTC is not a valid instant: {:?}", value))
                        })?;
                    params.start_at_millis_utc = Some(millis.round() as i64);
                }
                "chain" if !value.is_empty() => params.chain = Some(value.to_string()),
                "apiBaseUrl" if !value.is_empty() => {
                    let url = Url::parse(value)
                        .map_err(|err| config_error(format!("invalid apiBaseUrl {:?}: {}", value, err)))?;
                    params.api_base_url = Some(url);
                }
                "debug" => params.debug = matches!(value, "true" | "1" | ""),
                _ => {}
            }
        }
        Ok(params)
    }

    /// Reads the parameters from a page URL's query string.
    pub fn from_url(url: &Url) -> Result<EmbedParams, PlayerError> {
        EmbedParams::from_pairs(url.query_pairs())
    }

    /// The API base, falling back to the page's own origin.
    pub fn api_base_or(&self, page_url: &Url) -> Result<Url, PlayerError> {
        if let Some(url) = &self.api_base_url {
            return Ok(url.clone());
        }
        page_url
            .join("/")
            .map_err(|err| config_error(format!("cannot derive API base from {}: {}", page_url, err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        assert_eq!(EngineConfig::from_toml("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn rejects_non_positive_periods() {
        assert!(EngineConfig::from_toml("main_cycle_seconds = 0.0").is_err());
        assert!(EngineConfig::from_toml("lead_seconds = -1.0").is_err());
        assert!(EngineConfig::from_toml("log_level = \"loud\"").is_err());
        assert!(EngineConfig::from_toml("unknown = 1").is_err());
    }

    #[test]
    fn parses_query_parameters() {
        let url = Url::parse(
            "https://radio.example.com/embed?chain=coolair&startAtMillisUTC=1487073788500&debug=true",
        )
        .unwrap();
        let params = EmbedParams::from_url(&url).unwrap();
        assert_eq!(params.chain.as_deref(), Some("coolair"));
        assert_eq!(params.start_at_millis_utc, Some(1487073788500));
        assert!(params.debug);
        assert_eq!(
            params.api_base_or(&url).unwrap().as_str(),
            "https://radio.example.com/"
        );
    }

    #[test]
    fn rejects_unrepresentable_start_instants() {
        for value in ["NaN", "-inf", "inf", "1e300", "soon"] {
            let result = EmbedParams::from_pairs([("startAtMillisUTC", value)]);
            assert_eq!(result.unwrap_err().code, PlayerErrorCode::Config, "{}", value);
        }
        let params = EmbedParams::from_pairs([("startAtMillisUTC", "-8.64e15")]).unwrap();
        assert_eq!(params.start_at_millis_utc, Some(-8_640_000_000_000_000));
    }
}
