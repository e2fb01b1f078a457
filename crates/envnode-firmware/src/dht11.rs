use embassy_time::{Delay, Duration, Timer};
use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
};
use envnode_core::peripherals::SensorError;

/// How long to wait for a pulse on the data line (in microseconds).
const TIMEOUT_US: u16 = 1_000;
/// Start signal: the host holds the line low for at least 18ms.
const START_LOW: Duration = Duration::from_millis(20);

/// Error type for this driver.
#[derive(Debug)]
pub enum Error<E> {
    /// Timeout during communication.
    Timeout,
    /// CRC mismatch.
    CrcMismatch,
    /// GPIO error.
    Gpio(E),
}

impl<E> From<Error<E>> for SensorError {
    fn from(error: Error<E>) -> Self {
        match error {
            Error::Timeout => SensorError::Timeout,
            Error::CrcMismatch => SensorError::CrcMismatch,
            Error::Gpio(_) => SensorError::Unavailable,
        }
    }
}

/// A DHT11 device on a single open-drain data line.
pub struct Dht11<GPIO> {
    gpio: GPIO,
    delay: Delay,
}

/// Raw result of one transfer.
#[derive(Copy, Clone, Default, Debug, PartialEq)]
pub struct Frame {
    /// Degrees Celsius.
    pub temperature: f32,
    /// Relative humidity in percent.
    pub humidity: f32,
}

impl<GPIO, E> Dht11<GPIO>
where
    GPIO: InputPin<Error = E> + OutputPin<Error = E>,
{
    pub fn new(gpio: GPIO) -> Self {
        Dht11 { gpio, delay: Delay }
    }

    /// Performs a reading of the sensor.
    ///
    /// The start signal is awaited; only the ~4ms bit transfer itself busy-waits.
    pub async fn read(&mut self) -> Result<Frame, Error<E>> {
        let mut data = [0u8; 5];

        self.perform_handshake().await?;

        for i in 0..40 {
            data[i / 8] <<= 1;
            if self.read_bit()? {
                data[i / 8] |= 1;
            }
        }

        // Finally wait for line to go idle again.
        self.wait_for_pulse(true)?;

        let crc = data[0]
            .wrapping_add(data[1])
            .wrapping_add(data[2])
            .wrapping_add(data[3]);
        if crc != data[4] {
            return Err(Error::CrcMismatch);
        }

        Ok(decode(&data))
    }

    async fn perform_handshake(&mut self) -> Result<(), Error<E>> {
        // Release the line and let the pull-up raise it.
        self.gpio.set_high().map_err(Error::Gpio)?;
        Timer::after(Duration::from_millis(1)).await;

        self.gpio.set_low().map_err(Error::Gpio)?;
        Timer::after(START_LOW).await;

        self.gpio.set_high().map_err(Error::Gpio)?;
        self.delay.delay_us(40);

        // As a response, the device pulls the line low for 80us and then high for 80us.
        self.read_bit()?;

        Ok(())
    }

    fn read_bit(&mut self) -> Result<bool, Error<E>> {
        let low = self.wait_for_pulse(true)?;
        let high = self.wait_for_pulse(false)?;
        Ok(high > low)
    }

    fn wait_for_pulse(&mut self, level: bool) -> Result<u32, Error<E>> {
        let mut count = 0;

        while self.gpio.is_high().map_err(Error::Gpio)? != level {
            count += 1;
            if count > TIMEOUT_US {
                return Err(Error::Timeout);
            }
            self.delay.delay_us(1);
        }

        Ok(u32::from(count))
    }
}

/// Bytes: humidity integral, humidity decimal, temperature integral,
/// temperature decimal (bit 7 = below zero), checksum.
fn decode(data: &[u8; 5]) -> Frame {
    let humidity = f32::from(data[0]) + f32::from(data[1]) / 10.0;
    let magnitude = f32::from(data[2]) + f32::from(data[3] & 0x7f) / 10.0;
    let temperature = if data[3] & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    };
    Frame {
        temperature,
        humidity,
    }
}
