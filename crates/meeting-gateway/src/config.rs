//! Meeting Gateway configuration.
//!
//! Configuration is loaded from environment variables. Every variable has a
//! default; values that are present but unparseable are rejected instead of
//! silently replaced by the default.

use media_engine::{ListenIp, LocalWorkerSettings, WebRtcTransportOptions};
use std::collections::HashMap;
use std::env;
use std::fmt::Display;
use std::num::NonZeroUsize;
use std::str::FromStr;
use thiserror::Error;

/// Default WebSocket signaling bind address.
pub const DEFAULT_SIGNALING_BIND_ADDRESS: &str = "0.0.0.0:5000";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default address media transports listen on.
pub const DEFAULT_LISTEN_IP: &str = "0.0.0.0";

/// Default RTC port range.
pub const DEFAULT_RTC_MIN_PORT: u16 = 10_000;
pub const DEFAULT_RTC_MAX_PORT: u16 = 10_200;

/// Default cap on the bitrate a client may send on one transport.
pub const DEFAULT_MAX_INCOMING_BITRATE: u32 = 1_500_000;

/// Default initial outgoing bitrate estimate for new transports.
pub const DEFAULT_INITIAL_OUTGOING_BITRATE: u32 = 1_000_000;

/// Default gateway instance ID prefix.
pub const DEFAULT_GATEWAY_ID_PREFIX: &str = "mg";

/// Meeting Gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket signaling server bind address (default: "0.0.0.0:5000").
    pub signaling_bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this gateway instance.
    pub gateway_id: String,

    /// Number of media workers in the routing pool.
    pub num_workers: usize,

    /// Settings applied to every media transport.
    pub media: MediaSettings,

    /// First port of the RTC range.
    pub rtc_min_port: u16,

    /// Last port of the RTC range.
    pub rtc_max_port: u16,
}

/// Transport settings handed to every meeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSettings {
    /// Address transports listen on.
    pub listen_ip: String,

    /// Public address announced in ICE candidates, if behind NAT.
    pub announced_ip: Option<String>,

    /// Per-transport incoming bitrate cap. Zero disables the cap.
    pub max_incoming_bitrate: u32,

    /// Initial available outgoing bitrate for new transports.
    pub initial_outgoing_bitrate: u32,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            listen_ip: DEFAULT_LISTEN_IP.to_string(),
            announced_ip: None,
            max_incoming_bitrate: DEFAULT_MAX_INCOMING_BITRATE,
            initial_outgoing_bitrate: DEFAULT_INITIAL_OUTGOING_BITRATE,
        }
    }
}

impl MediaSettings {
    /// Transport options for a new WebRTC transport.
    ///
    /// UDP and TCP are both enabled; UDP is preferred unless `force_tcp` is set.
    #[must_use]
    pub fn transport_options(&self, force_tcp: bool) -> WebRtcTransportOptions {
        WebRtcTransportOptions {
            listen_ips: vec![ListenIp {
                ip: self.listen_ip.clone(),
                announced_ip: self.announced_ip.clone(),
            }],
            enable_udp: true,
            enable_tcp: true,
            prefer_udp: !force_tcp,
            initial_available_outgoing_bitrate: self.initial_outgoing_bitrate,
        }
    }

    /// Bitrate cap to apply to new transports, if enabled.
    #[must_use]
    pub fn incoming_bitrate_cap(&self) -> Option<u32> {
        (self.max_incoming_bitrate > 0).then_some(self.max_incoming_bitrate)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let signaling_bind_address = vars
            .get("MG_SIGNALING_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SIGNALING_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("MG_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let gateway_id = vars.get("MG_GATEWAY_ID").cloned().unwrap_or_else(|| {
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_GATEWAY_ID_PREFIX}-{short_suffix}")
        });

        let default_workers = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        let num_workers: usize = parse_var(vars, "MG_NUM_WORKERS", default_workers)?;
        if num_workers == 0 {
            return Err(ConfigError::InvalidValue(
                "MG_NUM_WORKERS must be at least 1".to_string(),
            ));
        }

        let listen_ip = vars
            .get("MG_LISTEN_IP")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LISTEN_IP.to_string());

        let announced_ip = vars
            .get("MG_ANNOUNCED_IP")
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty());

        let rtc_min_port = parse_var(vars, "MG_RTC_MIN_PORT", DEFAULT_RTC_MIN_PORT)?;
        let rtc_max_port = parse_var(vars, "MG_RTC_MAX_PORT", DEFAULT_RTC_MAX_PORT)?;
        if rtc_min_port > rtc_max_port {
            return Err(ConfigError::InvalidValue(format!(
                "MG_RTC_MIN_PORT ({rtc_min_port}) must not exceed MG_RTC_MAX_PORT ({rtc_max_port})"
            )));
        }

        let max_incoming_bitrate =
            parse_var(vars, "MG_MAX_INCOMING_BITRATE", DEFAULT_MAX_INCOMING_BITRATE)?;
        let initial_outgoing_bitrate = parse_var(
            vars,
            "MG_INITIAL_OUTGOING_BITRATE",
            DEFAULT_INITIAL_OUTGOING_BITRATE,
        )?;

        Ok(Config {
            signaling_bind_address,
            health_bind_address,
            gateway_id,
            num_workers,
            media: MediaSettings {
                listen_ip,
                announced_ip,
                max_incoming_bitrate,
                initial_outgoing_bitrate,
            },
            rtc_min_port,
            rtc_max_port,
        })
    }

    /// Settings for the in-process media workers.
    #[must_use]
    pub fn worker_settings(&self) -> LocalWorkerSettings {
        LocalWorkerSettings {
            rtc_min_port: self.rtc_min_port,
            rtc_max_port: self.rtc_max_port,
        }
    }
}

fn parse_var<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match vars.get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(format!("{name}={raw:?}: {e}"))),
        None => Ok(default),
    }
}
