use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::time::Duration;

use api_types::GeoPosition;
use clap::Parser;
use geotrace_core::BroadcastSettings;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid origin {field}: {reason}")]
    InvalidOrigin {
        field: &'static str,
        reason: String,
    },

    #[error("invalid setting {field}: {reason}")]
    InvalidSetting {
        field: &'static str,
        reason: String,
    },
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "geotrace-server",
    author,
    version,
    about = "Streams a synthetic walking trace over server-sent events",
    long_about = "Walks a random path around a configured origin, one step per tick, \
                  persists every sample to SQLite and pushes it to all clients \
                  connected to /stream-geo-info."
)]
pub struct Config {
    // Raw OS strings: any value, even invalid UTF-8, must reach `origin_or_default`.
    /// Origin latitude in decimal degrees
    #[arg(
        long,
        env = "LATITUDE",
        allow_hyphen_values = true,
        value_parser = clap::value_parser!(OsString)
    )]
    pub latitude: Option<OsString>,

    /// Origin longitude in decimal degrees
    #[arg(
        long,
        env = "LONGITUDE",
        allow_hyphen_values = true,
        value_parser = clap::value_parser!(OsString)
    )]
    pub longitude: Option<OsString>,

    /// Address to listen on
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(short, long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// SQLite database receiving every sample (":memory:" keeps nothing)
    #[arg(long, env = "DATABASE_PATH", default_value = "geotrace.db")]
    pub database: PathBuf,

    /// Milliseconds between two samples
    #[arg(long, env = "TICK_INTERVAL_MS", default_value_t = 10_000)]
    pub tick_interval_ms: u64,

    /// Radius of a single step in kilometers
    #[arg(long, env = "MAX_STEP_KM", default_value_t = 0.1)]
    pub max_step_km: f64,

    /// Number of samples returned by /chart-info
    #[arg(long, env = "CHART_LIMIT", default_value_t = 10)]
    pub chart_limit: usize,

    /// Samples a slow client may fall behind before it misses ticks
    #[arg(long, env = "SUBSCRIBER_BUFFER", default_value_t = 16)]
    pub subscriber_buffer: usize,

    /// Longest a single database write may take, in milliseconds
    #[arg(long, env = "SINK_TIMEOUT_MS", default_value_t = 2_000)]
    pub sink_timeout_ms: u64,

    /// Verbose output (show debug messages)
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "tick_interval_ms",
                reason: "must be greater than zero".into(),
            });
        }

        if !self.max_step_km.is_finite() || self.max_step_km < 0.0 {
            return Err(ConfigError::InvalidSetting {
                field: "max_step_km",
                reason: format!("{} is not a non-negative distance", self.max_step_km),
            });
        }

        if self.subscriber_buffer == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "subscriber_buffer",
                reason: "must be greater than zero".into(),
            });
        }

        Ok(())
    }

    pub fn origin(&self) -> Result<GeoPosition, ConfigError> {
        Ok(GeoPosition {
            latitude: parse_coordinate("latitude", self.latitude.as_deref(), 90.0)?,
            longitude: parse_coordinate("longitude", self.longitude.as_deref(), 180.0)?,
        })
    }

    /// The configured origin, or (0, 0) when it is missing or malformed.
    pub fn origin_or_default(&self) -> GeoPosition {
        self.origin().unwrap_or_else(|error| {
            warn!(%error, "origin misconfigured, starting the trace at (0, 0)");
            GeoPosition::default()
        })
    }

    pub fn broadcast_settings(&self) -> BroadcastSettings {
        BroadcastSettings {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            max_step_km: self.max_step_km,
            subscriber_buffer: self.subscriber_buffer,
            sink_timeout: Duration::from_millis(self.sink_timeout_ms),
            ..Default::default()
        }
    }
}

fn parse_coordinate(
    field: &'static str,
    raw: Option<&OsStr>,
    bound: f64,
) -> Result<f64, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidOrigin { field, reason };

    let Some(raw) = raw else {
        return Err(invalid("not set".into()));
    };
    let raw = raw
        .to_str()
        .ok_or_else(|| invalid(format!("{raw:?} is not valid UTF-8")))?
        .trim();
    if raw.is_empty() {
        return Err(invalid("not set".into()));
    }

    let value: f64 = raw
        .parse()
        .map_err(|_| invalid(format!("{raw:?} is not a number")))?;

    if !value.is_finite() || value.abs() > bound {
        return Err(invalid(format!("{value} is outside ±{bound}")));
    }

    Ok(value)
}
