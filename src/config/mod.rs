//! Runtime configuration for the smart object process.

use std::{env, time::Duration};

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Local address the CoAP socket binds to
    pub listen_addr: String,

    /// Resource Directory registration endpoint, e.g. `coap://127.0.0.1:5683/rd`
    pub directory_url: String,

    /// Endpoint name advertised to the directory (`ep=`)
    pub endpoint_name: String,

    /// Host advertised in the registration `base=` parameter
    pub advertise_host: String,

    /// Port advertised in the registration `base=` parameter
    pub advertise_port: u16,

    /// Prefix of the generated device id
    pub device_prefix: String,

    /// Refresh interval of the periodic sensor resources
    pub sensor_interval: Duration,

    /// Per-attempt bound on the registration round trip
    pub registration_timeout: Duration,

    /// Registration attempts before giving up, `1` disables retries
    pub registration_attempts: u32,

    /// Whether to register with the directory at all
    pub registration_enabled: bool,

    /// Capacity of the observe notification queue
    pub notification_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5783".to_string(),
            directory_url: "coap://127.0.0.1:5683/rd".to_string(),
            endpoint_name: "testCoapEndpoint".to_string(),
            advertise_host: "127.0.0.1".to_string(),
            advertise_port: 5783,
            device_prefix: "dipi:iot".to_string(),
            sensor_interval: Duration::from_millis(1000),
            registration_timeout: Duration::from_millis(5000),
            registration_attempts: 1,
            registration_enabled: true,
            notification_buffer: 64,
        }
    }
}

impl Config {
    /// Read the configuration from `SMARTOBJECT_*` environment variables,
    /// falling back to [`Config::default`] for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let registration_attempts =
            read_parsed("SMARTOBJECT_RD_ATTEMPTS")?.unwrap_or(defaults.registration_attempts);
        if registration_attempts == 0 {
            return Err(ConfigError::Invalid(
                "SMARTOBJECT_RD_ATTEMPTS".to_string(),
                "0".to_string(),
            ));
        }

        let sensor_interval = read_millis("SMARTOBJECT_SENSOR_INTERVAL_MS")?
            .unwrap_or(defaults.sensor_interval);
        if sensor_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "SMARTOBJECT_SENSOR_INTERVAL_MS".to_string(),
                "0".to_string(),
            ));
        }

        Ok(Self {
            listen_addr: read_string("SMARTOBJECT_LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            directory_url: read_string("SMARTOBJECT_RD_URL").unwrap_or(defaults.directory_url),
            endpoint_name: read_string("SMARTOBJECT_ENDPOINT").unwrap_or(defaults.endpoint_name),
            advertise_host: read_string("SMARTOBJECT_ADVERTISE_HOST")
                .unwrap_or(defaults.advertise_host),
            advertise_port: read_parsed("SMARTOBJECT_ADVERTISE_PORT")?
                .unwrap_or(defaults.advertise_port),
            device_prefix: read_string("SMARTOBJECT_DEVICE_PREFIX")
                .unwrap_or(defaults.device_prefix),
            sensor_interval,
            registration_timeout: read_millis("SMARTOBJECT_RD_TIMEOUT_MS")?
                .unwrap_or(defaults.registration_timeout),
            registration_attempts,
            registration_enabled: read_bool("SMARTOBJECT_RD_ENABLED")?
                .unwrap_or(defaults.registration_enabled),
            notification_buffer: defaults.notification_buffer,
        })
    }
}

fn read_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_parsed<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match read_string(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(key.to_string(), raw)),
        None => Ok(None),
    }
}

fn read_millis(key: &str) -> Result<Option<Duration>, ConfigError> {
    Ok(read_parsed::<u64>(key)?.map(Duration::from_millis))
}

fn read_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match read_string(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::Invalid(key.to_string(), raw)),
        },
        None => Ok(None),
    }
}
