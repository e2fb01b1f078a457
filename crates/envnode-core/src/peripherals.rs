//! Interfaces the control loop consumes.
//!
//! The firmware implements these over the real sensor, panel, Wi-Fi/MQTT
//! stack, configuration portal and flash; tests implement them with fakes.
//! Every recoverable failure comes back as a typed error so the caller can
//! decide between retrying and giving up without inspecting strings.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::future::Future;

use crate::settings::{BrokerAddress, BrokerSettings};

/// One temperature/humidity sample as delivered by the sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// Degrees Celsius.
    pub temperature: f32,
    /// Relative humidity in percent.
    pub humidity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// The sensor did not answer in time.
    Timeout,
    CrcMismatch,
    /// The sensor is not present or its bus failed.
    Unavailable,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::Timeout => write!(f, "Sensor timeout"),
            SensorError::CrcMismatch => write!(f, "Sensor checksum mismatch"),
            SensorError::Unavailable => write!(f, "Sensor unavailable"),
        }
    }
}

pub trait Sensor {
    fn sample(&mut self) -> impl Future<Output = Result<Measurement, SensorError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSize {
    Small,
    Large,
}

impl TextSize {
    /// Horizontal advance of one glyph in pixels. Displays must honour it.
    pub const fn advance(self) -> i32 {
        match self {
            TextSize::Small => 6,
            TextSize::Large => 10,
        }
    }
}

/// Text-only view of the local display. Drawing is fire-and-forget.
pub trait StatusDisplay {
    fn clear(&mut self);
    fn draw_text(&mut self, x: i32, y: i32, text: &str, size: TextSize);
    /// Pushes whatever was drawn since the last `clear` to the panel.
    fn present(&mut self);
}

/// Username/password pair for the broker. Empty strings mean anonymous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

impl Credentials<'static> {
    pub const ANONYMOUS: Self = Self {
        username: "",
        password: "",
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    NetworkDown,
    Dns,
    Connection,
    /// The broker answered with a refusal.
    Broker,
    Timeout,
    /// The outgoing queue is full.
    QueueFull,
    NotConnected,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::NetworkDown => write!(f, "Network down"),
            LinkError::Dns => write!(f, "DNS error"),
            LinkError::Connection => write!(f, "Connection error"),
            LinkError::Broker => write!(f, "Broker refused connection"),
            LinkError::Timeout => write!(f, "Timed out"),
            LinkError::QueueFull => write!(f, "Outgoing queue full"),
            LinkError::NotConnected => write!(f, "Broker not connected"),
        }
    }
}

/// How far a broker connect got before [`Connectivity::connect_broker`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectProgress {
    Connected,
    /// Handed to a background session. The outcome arrives through
    /// [`Connectivity::poll_connect`].
    Pending,
}

/// Network and message-bus link.
pub trait Connectivity {
    fn is_network_up(&self) -> bool;
    fn local_address(&self) -> Option<String>;
    /// Signal strength of the access point in dBm.
    fn rssi(&self) -> Option<i8>;
    fn connect_broker(
        &mut self,
        broker: &BrokerAddress,
        client_id: &str,
        credentials: Credentials<'_>,
    ) -> impl Future<Output = Result<ConnectProgress, LinkError>>;
    /// Outcome of the last `Pending` connect, once. `None` while it runs.
    fn poll_connect(&mut self) -> Option<Result<(), LinkError>>;
    /// Closes the session and abandons any connect still in flight.
    fn disconnect_broker(&mut self);
    fn is_broker_connected(&self) -> bool;
    fn publish(&mut self, topic: &str, payload: &[u8]) -> impl Future<Output = Result<(), LinkError>>;
    fn service_keep_alive(&mut self) -> impl Future<Output = ()>;
}

/// Field reconfiguration front-end.
pub trait ConfigPortal {
    /// Settings the operator submitted since the last call, if any.
    fn service(&mut self) -> Option<BrokerSettings>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    /// Stored data failed its integrity check.
    Corrupt,
    Io,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsError::NotFound => write!(f, "File not found"),
            FsError::Corrupt => write!(f, "File corrupt"),
            FsError::Io => write!(f, "Storage I/O error"),
        }
    }
}

pub trait Filesystem {
    fn read(&mut self, path: &str) -> Result<Vec<u8>, FsError>;
    fn write(&mut self, path: &str, bytes: &[u8]) -> Result<(), FsError>;
}
