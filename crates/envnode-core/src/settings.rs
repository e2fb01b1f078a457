//! Broker settings persisted on flash as JSON.
//!
//! ```json
//! { "mqtt": { "broker": { "host": "broker.mqtthq.com", "port": 1883 }, "topic": "devices/%s" } }
//! ```

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{CONFIG_PATH, MQTT_BROKER_HOST, MQTT_BROKER_PORT, MQTT_TOPIC};
use crate::peripherals::{Filesystem, FsError};

/// Placeholder in the topic template that is replaced by the device id.
pub const TOPIC_PLACEHOLDER: &str = "%s";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerSettings {
    pub broker: BrokerAddress,
    pub topic: String,
}

impl BrokerSettings {
    /// Expands the topic template for one device.
    ///
    /// A template without placeholder is treated as a prefix.
    pub fn topic_for(&self, device_id: &str) -> String {
        if self.topic.contains(TOPIC_PLACEHOLDER) {
            self.topic.replacen(TOPIC_PLACEHOLDER, device_id, 1)
        } else {
            let mut topic = self.topic.clone();
            topic.push_str(device_id);
            topic
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub mqtt: BrokerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mqtt: BrokerSettings {
                broker: BrokerAddress {
                    host: MQTT_BROKER_HOST.to_string(),
                    port: MQTT_BROKER_PORT,
                },
                topic: MQTT_TOPIC.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsError {
    NotFound,
    Corrupt,
    Io,
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::NotFound => write!(f, "Settings file not found"),
            SettingsError::Corrupt => write!(f, "Settings file corrupt"),
            SettingsError::Io => write!(f, "Settings storage error"),
        }
    }
}

impl From<FsError> for SettingsError {
    fn from(error: FsError) -> Self {
        match error {
            FsError::NotFound => Self::NotFound,
            FsError::Corrupt => Self::Corrupt,
            FsError::Io => Self::Io,
        }
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(_: serde_json::Error) -> Self {
        Self::Corrupt
    }
}

pub fn load<F: Filesystem>(fs: &mut F) -> Result<Settings, SettingsError> {
    let bytes = fs.read(CONFIG_PATH)?;
    let settings = serde_json::from_slice(&bytes)?;
    Ok(settings)
}

/// Loads the persisted settings, falling back to the compiled-in defaults.
pub fn load_or_default<F: Filesystem>(fs: &mut F) -> Settings {
    match load(fs) {
        Ok(settings) => {
            info!(
                "Loaded settings: broker {}:{}, topic {}",
                settings.mqtt.broker.host, settings.mqtt.broker.port, settings.mqtt.topic
            );
            settings
        }
        Err(e) => {
            warn!("{}, using defaults", e);
            Settings::default()
        }
    }
}

pub fn store<F: Filesystem>(fs: &mut F, settings: &Settings) -> Result<(), SettingsError> {
    let bytes: Vec<u8> = serde_json::to_vec(settings)?;
    fs.write(CONFIG_PATH, &bytes)?;
    Ok(())
}
