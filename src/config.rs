use std::env;
use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use crate::placement::PlacementConfig;

/// Complete application configuration, loaded from environment variables or default values.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub placement: PlacementSettings,
    pub station: StationConfig,
}

impl AppConfig {
    /// Creates a configuration from the currently available environment variables.
    pub fn from_env() -> Self {
        Self {
            api: ApiConfig::from_env(),
            placement: PlacementSettings::from_env(),
            station: StationConfig::from_env(),
        }
    }
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    bind_ip: IpAddr,
    display_host: String,
    port: u16,
}

impl ApiConfig {
    const DEFAULT_HOST: &'static str = "0.0.0.0";
    const DEFAULT_PORT: u16 = 8080;
    const HOST_VAR: &'static str = "STATION_STOWAGE_API_HOST";
    const PORT_VAR: &'static str = "STATION_STOWAGE_API_PORT";

    fn from_env() -> Self {
        let host_value =
            env_string(Self::HOST_VAR).unwrap_or_else(|| Self::DEFAULT_HOST.to_string());
        let (bind_ip, effective_host) = match host_value.parse::<IpAddr>() {
            Ok(ip) => (ip, host_value),
            Err(err) => {
                warn!(
                    "⚠️ Could not parse {} ('{}'): {}. Using {}.",
                    Self::HOST_VAR,
                    host_value,
                    err,
                    Self::DEFAULT_HOST
                );
                (
                    IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    Self::DEFAULT_HOST.to_string(),
                )
            }
        };

        let port = match env_string(Self::PORT_VAR) {
            Some(raw) => match raw.parse::<u16>() {
                Ok(value) if value != 0 => value,
                Ok(_) => {
                    warn!(
                        "⚠️ {} must not be 0. Using {}.",
                        Self::PORT_VAR,
                        Self::DEFAULT_PORT
                    );
                    Self::DEFAULT_PORT
                }
                Err(err) => {
                    warn!(
                        "⚠️ Could not parse {} ('{}'): {}. Using {}.",
                        Self::PORT_VAR,
                        raw,
                        err,
                        Self::DEFAULT_PORT
                    );
                    Self::DEFAULT_PORT
                }
            },
            None => Self::DEFAULT_PORT,
        };

        Self {
            bind_ip,
            display_host: effective_host,
            port,
        }
    }

    /// Socket address to bind the server to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    /// Visible hostname for logging and hints.
    pub fn display_host(&self) -> &str {
        &self.display_host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Indicates whether binding to all interfaces.
    pub fn binds_to_all_interfaces(&self) -> bool {
        match self.bind_ip {
            IpAddr::V4(addr) => addr == Ipv4Addr::UNSPECIFIED,
            IpAddr::V6(addr) => addr == Ipv6Addr::UNSPECIFIED,
        }
    }

    /// Checks whether the hostname matches the default value.
    pub fn uses_default_host(&self) -> bool {
        self.display_host == Self::DEFAULT_HOST
    }
}

/// Placement engine settings.
#[derive(Clone, Debug)]
pub struct PlacementSettings {
    placement: PlacementConfig,
}

impl PlacementSettings {
    const ALLOW_ROTATION_VAR: &'static str = "STATION_STOWAGE_ALLOW_ROTATIONS";
    const REARRANGEMENT_VAR: &'static str = "STATION_STOWAGE_REARRANGEMENT";
    const MAX_DISPLACED_VAR: &'static str = "STATION_STOWAGE_MAX_DISPLACED";

    fn from_env() -> Self {
        let allow_item_rotation = env_string(Self::ALLOW_ROTATION_VAR)
            .and_then(|raw| parse_bool(&raw, Self::ALLOW_ROTATION_VAR))
            .unwrap_or(PlacementConfig::DEFAULT_ALLOW_ITEM_ROTATION);

        let allow_rearrangement = env_string(Self::REARRANGEMENT_VAR)
            .and_then(|raw| parse_bool(&raw, Self::REARRANGEMENT_VAR))
            .unwrap_or(PlacementConfig::DEFAULT_ALLOW_REARRANGEMENT);

        let max_displaced_items = load_with_warning(
            Self::MAX_DISPLACED_VAR,
            PlacementConfig::DEFAULT_MAX_DISPLACED_ITEMS,
            |value| (1..=16).contains(&value),
            "must be between 1 and 16",
            "Adjusted displacement limit changes how aggressively items are moved",
        );

        let placement = PlacementConfig::builder()
            .allow_item_rotation(allow_item_rotation)
            .allow_rearrangement(allow_rearrangement)
            .max_displaced_items(max_displaced_items)
            .build();

        Self { placement }
    }

    /// Returns the configured PlacementConfig.
    pub fn placement_config(&self) -> PlacementConfig {
        self.placement
    }
}

/// Initial station state and waste defaults.
#[derive(Clone, Debug)]
pub struct StationConfig {
    start_date: NaiveDate,
    return_budget: f64,
}

impl StationConfig {
    const DEFAULT_RETURN_BUDGET: f64 = 100.0;
    const START_DATE_VAR: &'static str = "STATION_STOWAGE_START_DATE";
    const RETURN_BUDGET_VAR: &'static str = "STATION_STOWAGE_RETURN_BUDGET";

    fn from_env() -> Self {
        let today = Utc::now().date_naive();
        let start_date = match env_string(Self::START_DATE_VAR) {
            Some(raw) => match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
                Ok(date) => date,
                Err(err) => {
                    warn!(
                        "⚠️ Could not parse {} ('{}') as YYYY-MM-DD: {}. Using {}.",
                        Self::START_DATE_VAR,
                        raw,
                        err,
                        today
                    );
                    today
                }
            },
            None => today,
        };

        let return_budget = load_with_warning(
            Self::RETURN_BUDGET_VAR,
            Self::DEFAULT_RETURN_BUDGET,
            |value: f64| value.is_finite() && value >= 0.0,
            "must be a non-negative number",
            "Adjusted default return budget",
        );

        Self {
            start_date,
            return_budget,
        }
    }

    /// Simulated date the station starts at.
    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    /// Mass budget used when a return request does not name one.
    pub fn return_budget(&self) -> f64 {
        self.return_budget
    }
}

fn env_string(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_owned())
            }
        }
        Err(env::VarError::NotPresent) => None,
        Err(err) => {
            warn!("⚠️ Access to {} failed: {}. Using default value.", name, err);
            None
        }
    }
}

fn parse_bool(raw: &str, var_name: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        other => {
            warn!(
                "⚠️ Could not interpret {} ('{}') as boolean value. Using default value.",
                var_name, other
            );
            None
        }
    }
}

fn load_with_warning<T>(
    var_name: &str,
    default: T,
    validator: impl Fn(T) -> bool,
    invalid_hint: &str,
    notice: &str,
) -> T
where
    T: FromStr + PartialEq + Display + Copy,
    T::Err: Display,
{
    let Some(raw) = env_string(var_name) else {
        return default;
    };
    match parse_checked(&raw, validator) {
        Ok(value) => {
            if value != default {
                info!("ℹ️ {} ({} = {}).", notice, var_name, value);
            }
            value
        }
        Err(ParseFailure::Invalid) => {
            warn!(
                "⚠️ {} contains invalid value '{}': {}. Using {}.",
                var_name, raw, invalid_hint, default
            );
            default
        }
        Err(ParseFailure::Unparsable(err)) => {
            warn!(
                "⚠️ Could not parse {} ('{}'): {}. Using {}.",
                var_name, raw, err, default
            );
            default
        }
    }
}

#[derive(Debug, PartialEq)]
enum ParseFailure {
    Unparsable(String),
    Invalid,
}

fn parse_checked<T>(raw: &str, validator: impl Fn(T) -> bool) -> Result<T, ParseFailure>
where
    T: FromStr + Copy,
    T::Err: Display,
{
    let value = raw
        .parse::<T>()
        .map_err(|err| ParseFailure::Unparsable(err.to_string()))?;
    if validator(value) {
        Ok(value)
    } else {
        Err(ParseFailure::Invalid)
    }
}
