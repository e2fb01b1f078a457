use embassy_time::{Duration, Timer};
use envnode_core::peripherals::{Measurement, Sensor, SensorError};
use esp_hal::gpio::{Flex, InputConfig, OutputConfig, DriveMode, Pull};
use log::{error, info};

use crate::dht11::Dht11;

const PROBE_RETRIES: u8 = 3;
/// The DHT11 needs about a second after power-up before it answers.
const PROBE_RETRY_DELAY: Duration = Duration::from_millis(1200);

pub struct Dht11Sensor<'d> {
    dht11: Dht11<Flex<'d>>,
}

impl<'d> Dht11Sensor<'d> {
    pub fn new(mut pin: Flex<'d>) -> Self {
        pin.apply_output_config(
            &OutputConfig::default()
                .with_drive_mode(DriveMode::OpenDrain)
                .with_pull(Pull::None),
        );
        pin.apply_input_config(&InputConfig::default().with_pull(Pull::None));
        pin.set_output_enable(true);
        pin.set_input_enable(true);
        pin.set_high();

        Self {
            dht11: Dht11::new(pin),
        }
    }

    /// Checks that a sensor answers at all. Called once at boot.
    pub async fn probe(&mut self) -> Result<Measurement, SensorError> {
        let mut attempts = 0;
        loop {
            match self.sample().await {
                Ok(measurement) => return Ok(measurement),
                Err(e) if attempts + 1 >= PROBE_RETRIES => return Err(e),
                Err(e) => {
                    attempts += 1;
                    error!(
                        "DHT11 probe failed: {} (attempt {}/{})",
                        e, attempts, PROBE_RETRIES
                    );
                    Timer::after(PROBE_RETRY_DELAY).await;
                }
            }
        }
    }
}

impl Sensor for Dht11Sensor<'_> {
    async fn sample(&mut self) -> Result<Measurement, SensorError> {
        let frame = self.dht11.read().await?;
        info!(
            "DHT11 reading... Temperature: {}°C, Humidity: {}%",
            frame.temperature, frame.humidity
        );
        Ok(Measurement {
            temperature: frame.temperature,
            humidity: frame.humidity,
        })
    }
}
