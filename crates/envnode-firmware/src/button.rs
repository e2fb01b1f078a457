use embassy_time::Instant;
use esp_hal::gpio::{Input, InputConfig, Pull};
use esp_hal::peripherals::GPIO14;
use log::debug;

use crate::CALLUP;

/// Wakes the display on every press of the user button.
///
/// The handler only stamps the callup signal; the control loop does the rest.
#[embassy_executor::task]
pub async fn button_task(pin: GPIO14<'static>) {
    let mut button = Input::new(pin, InputConfig::default().with_pull(Pull::Up));
    loop {
        button.wait_for_falling_edge().await;
        CALLUP.trigger(Instant::now());
        debug!("Callup triggered");
    }
}
