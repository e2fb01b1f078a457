#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_time::{Delay, Duration, Instant, Ticker, Timer};
use envnode_core::callup::CallupSignal;
use envnode_core::config::{NodeConfig, TICK_PERIOD};
use envnode_core::control_loop::{Collaborators, ControlLoop};
use envnode_core::identity::DeviceIdentity;
use envnode_core::peripherals::{Credentials, SensorError};
use envnode_core::status_view::StatusView;
use esp_alloc::heap_allocator;
use esp_hal::{
    efuse::Efuse,
    gpio::{Flex, Level, Output, OutputConfig},
    rng::Rng,
    timer::timg::TimerGroup,
};
use esp_storage::FlashStorage;
use log::{error, info};
use rand_core::{impls, RngCore};
use esp_backtrace as _;

use crate::config::{MQTT_PASSWORD, MQTT_USERNAME};
use crate::display::{Display, DisplayPeripherals};
use crate::mqtt::{mqtt_task, MqttLink};
use crate::portal::SignalPortal;
use crate::sensor::Dht11Sensor;
use crate::storage::FlashFs;

extern crate alloc;

mod button;
mod config;
mod dht11;
mod display;
mod mqtt;
mod portal;
mod sensor;
mod storage;
mod wifi;

esp_bootloader_esp_idf::esp_app_desc!();

/// Stamped by the button task, read by the control loop.
pub static CALLUP: CallupSignal = CallupSignal::new();

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    esp_println::logger::init_logger_from_env();

    if let Err(error) = main_fallible(spawner).await {
        error!("Peripheral initialization failed: {}", error);
    }
    error!("Halted");
    loop {
        Timer::after(Duration::from_secs(60)).await;
    }
}

async fn main_fallible(spawner: Spawner) -> Result<(), Error> {
    let peripherals = esp_hal::init(esp_hal::Config::default());

    heap_allocator!(#[esp_hal::ram(reclaimed)] size: 72 * 1024);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);
    let boot = Instant::now();

    // This IO15 must be set to HIGH, otherwise nothing will be displayed when USB is not connected.
    let mut power_pin = Output::new(peripherals.GPIO15, Level::Low, OutputConfig::default());
    power_pin.set_high();

    let display_peripherals = DisplayPeripherals {
        backlight: peripherals.GPIO38,
        cs: peripherals.GPIO6,
        dc: peripherals.GPIO7,
        rst: peripherals.GPIO5,
        wr: peripherals.GPIO8,
        rd: peripherals.GPIO9,
        d0: peripherals.GPIO39,
        d1: peripherals.GPIO40,
        d2: peripherals.GPIO41,
        d3: peripherals.GPIO42,
        d4: peripherals.GPIO45,
        d5: peripherals.GPIO46,
        d6: peripherals.GPIO47,
        d7: peripherals.GPIO48,
    };
    let mut display = Display::new(display_peripherals, Delay)?;
    StatusView::render_starting(&mut display);

    // see https://github.com/Xinyuan-LilyGO/T-Display-S3/blob/main/image/T-DISPLAY-S3.jpg
    let mut sensor = Dht11Sensor::new(Flex::new(peripherals.GPIO1));
    sensor.probe().await?;

    let identity = DeviceIdentity::from_mac(Efuse::mac_address());
    info!("Device id {}", identity);

    let stack = wifi::start(peripherals.WIFI, Rng::new(), spawner)?;
    spawner.spawn(mqtt_task(stack)).map_err(|_| Error::Spawn)?;
    spawner
        .spawn(button::button_task(peripherals.GPIO14))
        .map_err(|_| Error::Spawn)?;

    let parts = Collaborators {
        sensor,
        display,
        link: MqttLink::new(stack, boot),
        portal: SignalPortal,
        fs: FlashFs::new(FlashStorage::new(peripherals.FLASH)),
        rng: HwRng(Rng::new()),
    };
    let credentials = Credentials {
        username: MQTT_USERNAME,
        password: MQTT_PASSWORD,
    };
    let mut control = ControlLoop::start(
        parts,
        identity,
        credentials,
        &CALLUP,
        NodeConfig::default(),
        boot,
    );

    wifi::wait_for_network(stack).await;

    info!("Entering control loop");
    let mut ticker = Ticker::every(TICK_PERIOD);
    loop {
        control.tick(Instant::now()).await;
        ticker.next().await;
    }
}

/// Hardware random number generator as a `rand_core` source.
struct HwRng(Rng);

impl RngCore for HwRng {
    fn next_u32(&mut self) -> u32 {
        self.0.random()
    }

    fn next_u64(&mut self) -> u64 {
        impls::next_u64_via_u32(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        impls::fill_bytes_via_next(self, dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

#[derive(Debug)]
enum Error {
    Display(display::Error),
    Sensor(SensorError),
    Wifi(wifi::Error),
    Spawn,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Display(e) => write!(f, "{}", e),
            Error::Sensor(e) => write!(f, "{}", e),
            Error::Wifi(e) => write!(f, "{}", e),
            Error::Spawn => write!(f, "Cannot spawn task"),
        }
    }
}

impl From<display::Error> for Error {
    fn from(error: display::Error) -> Self {
        Self::Display(error)
    }
}

impl From<SensorError> for Error {
    fn from(error: SensorError) -> Self {
        Self::Sensor(error)
    }
}

impl From<wifi::Error> for Error {
    fn from(error: wifi::Error) -> Self {
        Self::Wifi(error)
    }
}
