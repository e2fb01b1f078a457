use core::sync::atomic::{AtomicI8, Ordering};

use embassy_executor::Spawner;
use embassy_net::{DhcpConfig, Runner, Stack, StackResources};
use embassy_time::{with_timeout, Duration, Timer};
use esp_hal::rng::Rng;
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController, WifiDevice, WifiError};
use esp_radio::Controller;
use log::{error, info, warn};
use static_cell::StaticCell;

use crate::config::{HOSTNAME, WIFI_CONNECT_TIMEOUT, WIFI_PSK, WIFI_RETRY_DELAY, WIFI_SSID};

/// Static cell for network stack resources
static STACK_RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
static RADIO: StaticCell<Controller<'static>> = StaticCell::new();

const RSSI_UNKNOWN: i8 = i8::MIN;
/// Signal strength of the associated access point, refreshed by [`connection`].
static RSSI: AtomicI8 = AtomicI8::new(RSSI_UNKNOWN);
const RSSI_POLL: Duration = Duration::from_secs(5);

pub fn rssi() -> Option<i8> {
    match RSSI.load(Ordering::Relaxed) {
        RSSI_UNKNOWN => None,
        rssi => Some(rssi),
    }
}

/// Brings up the radio and the network stack and spawns their tasks.
///
/// Association happens in the background; see [`wait_for_network`].
pub fn start(
    wifi: esp_hal::peripherals::WIFI<'static>,
    rng: Rng,
    spawner: Spawner,
) -> Result<Stack<'static>, Error> {
    let radio = RADIO.init(esp_radio::init()?);
    let (controller, interfaces) = esp_radio::wifi::new(radio, wifi, Default::default())?;

    let mut dhcp_config = DhcpConfig::default();
    dhcp_config.hostname = HOSTNAME.try_into().ok();

    let seed = u64::from(rng.random()) << 32 | u64::from(rng.random());
    let config = embassy_net::Config::dhcpv4(dhcp_config);

    info!("Initialize network stack");
    let stack_resources: &'static mut _ = STACK_RESOURCES.init(StackResources::new());
    let (stack, runner) = embassy_net::new(interfaces.sta, config, stack_resources, seed);

    spawner.spawn(connection(controller)).map_err(|_| Error::Spawn)?;
    spawner.spawn(net_task(runner)).map_err(|_| Error::Spawn)?;

    Ok(stack)
}

/// Waits up to [`WIFI_CONNECT_TIMEOUT`] for the link and the first DHCP lease.
///
/// On timeout the node goes on offline and the connection task keeps
/// trying. Later losses of the access point just show up as a downed stack.
pub async fn wait_for_network(stack: Stack<'static>) {
    if with_timeout(WIFI_CONNECT_TIMEOUT, wait_for_lease(stack)).await.is_err() {
        warn!(
            "No network after {}s, continuing without it",
            WIFI_CONNECT_TIMEOUT.as_secs()
        );
    }
}

async fn wait_for_lease(stack: Stack<'static>) {
    info!("Wait for network link");
    loop {
        if stack.is_link_up() {
            break;
        }
        Timer::after(Duration::from_millis(500)).await;
    }

    info!("Wait for IP address");
    loop {
        if let Some(config) = stack.config_v4() {
            info!("Connected to WiFi with IP address {}", config.address);
            break;
        }
        Timer::after(Duration::from_millis(500)).await;
    }
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

/// Task for WiFi connection
///
/// This will wrap [`connection_fallible()`] and trap any error.
#[embassy_executor::task]
async fn connection(controller: WifiController<'static>) {
    if let Err(error) = connection_fallible(controller).await {
        error!("Cannot connect to WiFi: {:?}", error);
    }
}

async fn connection_fallible(mut controller: WifiController<'static>) -> Result<(), WifiError> {
    info!("Start connection task");

    let client_config = ModeConfig::Client(
        ClientConfig::default()
            .with_ssid(WIFI_SSID.into())
            .with_password(WIFI_PSK.into()),
    );
    controller.set_config(&client_config)?;
    info!("Starting WiFi controller");
    controller.start_async().await?;
    info!("WiFi controller started");

    loop {
        if matches!(controller.is_connected(), Ok(true)) {
            match controller.rssi() {
                Ok(rssi) => RSSI.store(rssi.clamp(-127, 0) as i8, Ordering::Relaxed),
                Err(e) => warn!("Cannot read RSSI: {:?}", e),
            }
            Timer::after(RSSI_POLL).await;
            continue;
        }

        RSSI.store(RSSI_UNKNOWN, Ordering::Relaxed);
        info!("About to connect to {}...", WIFI_SSID);
        match controller.connect_async().await {
            Ok(()) => info!("Connected to WiFi network"),
            Err(error) => {
                error!("Failed to connect to WiFi network: {:?}", error);
                Timer::after(WIFI_RETRY_DELAY).await;
            }
        }
    }
}

#[derive(Debug)]
pub enum Error {
    Radio(esp_radio::InitializationError),
    Wifi(WifiError),
    Spawn,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Radio(e) => write!(f, "Radio initialization error: {:?}", e),
            Error::Wifi(e) => write!(f, "WiFi error: {:?}", e),
            Error::Spawn => write!(f, "Cannot spawn network task"),
        }
    }
}

impl From<esp_radio::InitializationError> for Error {
    fn from(error: esp_radio::InitializationError) -> Self {
        Self::Radio(error)
    }
}

impl From<WifiError> for Error {
    fn from(error: WifiError) -> Self {
        Self::Wifi(error)
    }
}
