use std::{str::FromStr, time::Duration};

use anyhow::{Context, Result};

// ---------------------------------------------------------------------------
// DeviceCatalog
// ---------------------------------------------------------------------------

/// A known actuator and the power it draws while switched on.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSpec {
    pub id: String,
    /// Watts drawn while ON; used when a payload only reports the relay state.
    pub nominal_watts: f64,
}

/// The fixed set of devices the relay accepts commands for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceCatalog {
    devices: Vec<DeviceSpec>,
}

impl DeviceCatalog {
    pub fn get(&self, device_id: &str) -> Option<&DeviceSpec> {
        self.devices.iter().find(|d| d.id == device_id)
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.get(device_id).is_some()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.devices.iter().map(|d| d.id.as_str())
    }

    pub fn devices(&self) -> &[DeviceSpec] {
        &self.devices
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Parse `"id1:watts1,id2:watts2"` into a catalog, e.g. `"lampu:10,kipas:5"`.
///
/// Returns an error immediately if any entry is malformed, carries a negative
/// wattage, or repeats a device id.
impl FromStr for DeviceCatalog {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let mut devices: Vec<DeviceSpec> = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (id, watts) = entry.split_once(':').with_context(|| {
                format!("DEVICES entry must be 'device_id:nominal_watts', got: {entry:?}")
            })?;
            let id = id.trim();
            anyhow::ensure!(!id.is_empty(), "empty device id in DEVICES entry {entry:?}");
            let nominal_watts: f64 = watts
                .trim()
                .parse()
                .with_context(|| format!("invalid wattage in DEVICES entry {entry:?}"))?;
            anyhow::ensure!(
                nominal_watts.is_finite() && nominal_watts >= 0.0,
                "wattage must be a non-negative number in DEVICES entry {entry:?}"
            );
            anyhow::ensure!(
                devices.iter().all(|d| d.id != id),
                "duplicate device id {id:?} in DEVICES"
            );
            devices.push(DeviceSpec { id: id.to_owned(), nominal_watts });
        }
        Ok(Self { devices })
    }
}

// ---------------------------------------------------------------------------
// MqttSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    /// Base client id; the listener and the relay append their own suffix.
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub keep_alive: Duration,
    /// Topic the nodes publish readings on.
    pub data_topic: String,
    /// Topic actuator commands are published on.
    pub control_topic: String,
    pub publish_timeout: Duration,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. When absent the service keeps readings in memory.
    pub database_url: Option<String>,
    pub server_host: String,
    pub server_port: u16,
    pub devices: DeviceCatalog,
    /// Currency per kWh used when a query does not supply a tariff.
    pub default_tariff: f64,
    /// Upper bound for any single store call.
    pub store_timeout: Duration,
    pub mqtt: MqttSettings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let reconnect_min = secs("MQTT_RECONNECT_MIN_SECS", "1")?;
        let reconnect_max = secs("MQTT_RECONNECT_MAX_SECS", "60")?;
        anyhow::ensure!(
            reconnect_min <= reconnect_max,
            "MQTT_RECONNECT_MIN_SECS must not exceed MQTT_RECONNECT_MAX_SECS"
        );

        let default_tariff: f64 = optional("DEFAULT_TARIFF", "1500")
            .parse()
            .context("DEFAULT_TARIFF must be a number")?;
        anyhow::ensure!(
            default_tariff.is_finite() && default_tariff >= 0.0,
            "DEFAULT_TARIFF must be a non-negative number"
        );

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            devices: optional("DEVICES", "lampu:10,kipas:5")
                .parse()
                .context("DEVICES is malformed")?,
            default_tariff,
            store_timeout: secs("STORE_TIMEOUT_SECS", "5")?,
            mqtt: MqttSettings {
                host: optional("MQTT_HOST", "broker.hivemq.com"),
                port: optional("MQTT_PORT", "1883")
                    .parse()
                    .context("MQTT_PORT must be a valid port number")?,
                client_id: optional("MQTT_CLIENT_ID", "energy-monitor"),
                username: std::env::var("MQTT_USERNAME").ok().filter(|s| !s.is_empty()),
                password: std::env::var("MQTT_PASSWORD").ok(),
                use_tls: parse_bool(&optional("MQTT_USE_TLS", "false"))
                    .context("MQTT_USE_TLS must be true or false")?,
                keep_alive: secs("MQTT_KEEP_ALIVE_SECS", "60")?,
                data_topic: optional("MQTT_DATA_TOPIC", "rumah/status"),
                control_topic: optional("MQTT_CONTROL_TOPIC", "rumah/control"),
                publish_timeout: secs("MQTT_PUBLISH_TIMEOUT_SECS", "5")?,
                reconnect_min,
                reconnect_max,
            },
        })
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow::anyhow!("not a boolean: {other:?}")),
    }
}

fn secs(key: &str, default: &str) -> Result<Duration> {
    let value: u64 = optional(key, default)
        .parse()
        .with_context(|| format!("{key} must be a positive integer"))?;
    anyhow::ensure!(value > 0, "{key} must be a positive integer");
    Ok(Duration::from_secs(value))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_devices_empty() {
        let c: DeviceCatalog = "".parse().unwrap();
        assert!(c.is_empty());
    }

    #[test]
    fn parse_devices_with_wattage() {
        let c: DeviceCatalog = "lampu:10, kipas:5.5".parse().unwrap();
        assert_eq!(c.get("lampu").unwrap().nominal_watts, 10.0);
        assert_eq!(c.get("kipas").unwrap().nominal_watts, 5.5);
        assert_eq!(c.ids().collect::<Vec<_>>(), vec!["lampu", "kipas"]);
        assert!(!c.contains("pompa"));
    }

    #[test]
    fn parse_devices_missing_colon_errors() {
        let err = "lampu".parse::<DeviceCatalog>().unwrap_err();
        assert!(err.to_string().contains("device_id:nominal_watts"));
    }

    #[test]
    fn parse_devices_bad_wattage_errors() {
        let err = "lampu:bright".parse::<DeviceCatalog>().unwrap_err();
        assert!(err.to_string().contains("invalid wattage"));

        let err = "lampu:-3".parse::<DeviceCatalog>().unwrap_err();
        assert!(err.to_string().contains("non-negative"));
    }

    #[test]
    fn parse_devices_duplicate_errors() {
        let err = "lampu:10,lampu:20".parse::<DeviceCatalog>().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("TRUE").unwrap());
        assert!(parse_bool("1").unwrap());
        assert!(!parse_bool("off").unwrap());
        assert!(parse_bool("maybe").is_err());
    }
}
