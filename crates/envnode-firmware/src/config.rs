use embassy_time::Duration;

pub const DISPLAY_WIDTH: u16 = 320;
pub const DISPLAY_HEIGHT: u16 = 170;
pub const HOSTNAME: &str = "envnode";

pub const WIFI_SSID: &str = env!("WIFI_SSID");
pub const WIFI_PSK: &str = env!("WIFI_PSK");
// Anonymous brokers: leave both unset.
pub const MQTT_USERNAME: &str = match option_env!("MQTT_USERNAME") {
    Some(username) => username,
    None => "",
};
pub const MQTT_PASSWORD: &str = match option_env!("MQTT_PASSWORD") {
    Some(password) => password,
    None => "",
};

/// Bound on DNS, TCP connect and CONNACK in the MQTT task. Must stay below
/// `envnode_core::config::MQTT_CONNECT_TIMEOUT` so the task settles an attempt
/// before the control loop gives up on it.
pub const MQTT_SETUP_TIMEOUT: Duration = Duration::from_secs(8);
/// How long boot waits for association and a lease before going on offline.
pub const WIFI_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub const WIFI_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Flash offset of the `envnode` data partition (see partitions.csv).
pub const STORAGE_OFFSET: u32 = 0x3f_0000;
pub const STORAGE_SECTORS: u32 = 16;
