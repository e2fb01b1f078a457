use embassy_time::Duration;

/// Cadence at which the sensor is sampled and a telemetry message published.
pub const REPORT_INTERVAL: Duration = Duration::from_secs(5);
/// How long the display stays on after a callup (or after boot).
pub const CALLUP_TIMEOUT: Duration = Duration::from_secs(30);
/// Failed connects allowed in one reconnect burst.
pub const MQTT_MAX_RETRIES: u8 = 5;
/// Pause between two reconnect bursts.
pub const MQTT_RETRY_BACKOFF: Duration = Duration::from_secs(5);
/// How long one broker connect may stay in flight before it counts as failed.
pub const MQTT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const MQTT_KEEP_ALIVE: Duration = Duration::from_secs(30);
// A reboot within this window after boot restores the default settings. Zero disables it.
pub const DRD_TIMEOUT: Duration = Duration::from_secs(1);
/// Period of the main loop ticker in the firmware.
pub const TICK_PERIOD: Duration = Duration::from_millis(50);

pub const MQTT_BROKER_HOST: &str = "broker.mqtthq.com";
pub const MQTT_BROKER_PORT: u16 = 1883;
/// `%s` is replaced with the device id.
pub const MQTT_TOPIC: &str = "devices/%s";

pub const CONFIG_PATH: &str = "/config.json";
pub const DRD_FLAG_PATH: &str = "/drd.flag";

/// Timing knobs of the control loop, bundled so they can be shrunk in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeConfig {
    pub report_interval: Duration,
    pub callup_timeout: Duration,
    pub max_retries: u8,
    pub retry_backoff: Duration,
    pub connect_timeout: Duration,
    pub drd_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            report_interval: REPORT_INTERVAL,
            callup_timeout: CALLUP_TIMEOUT,
            max_retries: MQTT_MAX_RETRIES,
            retry_backoff: MQTT_RETRY_BACKOFF,
            connect_timeout: MQTT_CONNECT_TIMEOUT,
            drd_timeout: DRD_TIMEOUT,
        }
    }
}
