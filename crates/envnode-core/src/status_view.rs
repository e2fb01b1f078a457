use alloc::format;
use alloc::string::String;

use crate::peripherals::{StatusDisplay, TextSize};
use crate::reconnect::ConnectionState;
use crate::telemetry::Reading;

const STATUS_Y: i32 = 0;
const TEMPERATURE_Y: i32 = 16;
const HUMIDITY_Y: i32 = 40;
const PLACEHOLDER: &str = "--.-";
const STARTING: &str = "Starting...";

/// What the status screen shows for one frame.
pub struct StatusView<'a> {
    pub reading: Option<&'a Reading>,
    /// `None` while the network is down.
    pub address: Option<&'a str>,
    pub connection: ConnectionState,
}

impl StatusView<'_> {
    /// Draws one full frame: status line on top, then temperature and humidity.
    pub fn render<D: StatusDisplay>(&self, display: &mut D) {
        let status = match self.address {
            Some(address) => format!("{} {}", address, broker_marker(self.connection)),
            None => String::from("No Connection"),
        };
        let (temperature, humidity) = match self.reading {
            Some(reading) => (
                format!("{:.1}", reading.temperature),
                format!("{:.1}", reading.humidity),
            ),
            None => (String::from(PLACEHOLDER), String::from(PLACEHOLDER)),
        };
        draw_frame(display, &status, &temperature, &humidity);
    }

    /// Frame shown from power-on until the network step is over.
    pub fn render_starting<D: StatusDisplay>(display: &mut D) {
        draw_frame(display, STARTING, PLACEHOLDER, PLACEHOLDER);
    }
}

fn draw_frame<D: StatusDisplay>(display: &mut D, status: &str, temperature: &str, humidity: &str) {
    display.clear();
    display.draw_text(0, STATUS_Y, status, TextSize::Small);
    draw_value(display, TEMPERATURE_Y, temperature, "C");
    draw_value(display, HUMIDITY_Y, humidity, "%");
    display.present();
}

fn broker_marker(connection: ConnectionState) -> &'static str {
    match connection {
        ConnectionState::Connected => "MQTT",
        ConnectionState::Connecting => "MQTT...",
        ConnectionState::Disconnected => "MQTT --",
    }
}

/// Large value followed by a small unit.
fn draw_value<D: StatusDisplay>(display: &mut D, y: i32, value: &str, unit: &str) {
    display.draw_text(0, y, value, TextSize::Large);
    let unit_x = value.len() as i32 * TextSize::Large.advance();
    display.draw_text(unit_x, y, unit, TextSize::Small);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DrawOp, RecordingDisplay};
    use embassy_time::Instant;

    #[test]
    fn test_frame_with_reading() {
        let reading = Reading {
            temperature: 21.46,
            humidity: 47.2,
            rssi: None,
            sampled_at: Instant::from_secs(0),
        };
        let mut display = RecordingDisplay::default();

        StatusView {
            reading: Some(&reading),
            address: Some("192.168.1.23"),
            connection: ConnectionState::Connected,
        }
        .render(&mut display);

        assert_eq!(display.ops.first(), Some(&DrawOp::Clear));
        assert_eq!(display.ops.last(), Some(&DrawOp::Present));
        assert_eq!(display.texts(), ["192.168.1.23 MQTT", "21.5", "C", "47.2", "%"]);
        assert!(display
            .ops
            .contains(&DrawOp::Text(40, TEMPERATURE_Y, "C".into(), TextSize::Small)));
    }

    #[test]
    fn test_frame_before_first_reading_offline() {
        let mut display = RecordingDisplay::default();

        StatusView {
            reading: None,
            address: None,
            connection: ConnectionState::Disconnected,
        }
        .render(&mut display);

        assert_eq!(display.texts(), ["No Connection", "--.-", "C", "--.-", "%"]);
    }

    #[test]
    fn test_starting_frame() {
        let mut display = RecordingDisplay::default();

        StatusView::render_starting(&mut display);

        assert_eq!(display.texts(), ["Starting...", "--.-", "C", "--.-", "%"]);
        assert_eq!(display.count(&DrawOp::Present), 1);
    }
}
