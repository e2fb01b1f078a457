//! In-memory collaborators for unit tests.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use rand_core::RngCore;

use crate::peripherals::{
    ConfigPortal, ConnectProgress, Connectivity, Credentials, Filesystem, FsError, LinkError, Measurement, Sensor,
    SensorError, StatusDisplay, TextSize,
};
use crate::settings::{BrokerAddress, BrokerSettings};

#[derive(Default)]
pub struct MemoryFs {
    files: BTreeMap<String, Vec<u8>>,
    pub fail_writes: bool,
}

impl MemoryFs {
    pub fn insert(&mut self, path: &str, bytes: &[u8]) {
        self.files.insert(path.to_string(), bytes.to_vec());
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }
}

impl Filesystem for MemoryFs {
    fn read(&mut self, path: &str) -> Result<Vec<u8>, FsError> {
        self.files.get(path).cloned().ok_or(FsError::NotFound)
    }

    fn write(&mut self, path: &str, bytes: &[u8]) -> Result<(), FsError> {
        if self.fail_writes {
            return Err(FsError::Io);
        }
        self.insert(path, bytes);
        Ok(())
    }
}

pub struct CountingRng(pub u32);

impl RngCore for CountingRng {
    fn next_u32(&mut self) -> u32 {
        self.0 = self.0.wrapping_add(1);
        self.0
    }

    fn next_u64(&mut self) -> u64 {
        u64::from(self.next_u32())
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        rand_core::impls::fill_bytes_via_next(self, dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

pub struct FakeLink {
    pub network_up: bool,
    pub broker_connected: bool,
    pub address: Option<String>,
    pub rssi: Option<i8>,
    pub reject_publish: bool,
    /// Answer connects with `Pending` and settle them via [`FakeLink::complete_connect`].
    pub defer_connects: bool,
    in_flight: bool,
    settled: Option<Result<(), LinkError>>,
    failures_left: u32,
    client_ids: Vec<String>,
    brokers: Vec<BrokerAddress>,
    pub published: Vec<(String, Vec<u8>)>,
    pub keep_alives: u32,
    pub disconnects: u32,
}

impl FakeLink {
    pub fn up() -> Self {
        Self {
            network_up: true,
            broker_connected: false,
            address: Some("192.168.1.23".to_string()),
            rssi: Some(-63),
            reject_publish: false,
            defer_connects: false,
            in_flight: false,
            settled: None,
            failures_left: 0,
            client_ids: Vec::new(),
            brokers: Vec::new(),
            published: Vec::new(),
            keep_alives: 0,
            disconnects: 0,
        }
    }

    pub fn down() -> Self {
        Self {
            network_up: false,
            address: None,
            rssi: None,
            ..Self::up()
        }
    }

    pub fn fail_next_connects(&mut self, count: u32) {
        self.failures_left = count;
    }

    /// Settles the background connect in flight. Ignored once it was abandoned.
    pub fn complete_connect(&mut self, result: Result<(), LinkError>) {
        if !self.in_flight {
            return;
        }
        self.in_flight = false;
        self.broker_connected = result.is_ok();
        self.settled = Some(result);
    }

    /// The broker goes away without the node asking for it.
    pub fn drop_session(&mut self) {
        self.broker_connected = false;
    }

    pub fn connect_calls(&self) -> usize {
        self.client_ids.len()
    }

    pub fn client_ids(&self) -> &[String] {
        &self.client_ids
    }

    pub fn brokers(&self) -> &[BrokerAddress] {
        &self.brokers
    }
}

impl Connectivity for FakeLink {
    fn is_network_up(&self) -> bool {
        self.network_up
    }

    fn local_address(&self) -> Option<String> {
        self.address.clone()
    }

    fn rssi(&self) -> Option<i8> {
        self.rssi
    }

    async fn connect_broker(
        &mut self,
        broker: &BrokerAddress,
        client_id: &str,
        _credentials: Credentials<'_>,
    ) -> Result<ConnectProgress, LinkError> {
        self.client_ids.push(client_id.to_string());
        self.brokers.push(broker.clone());
        self.settled = None;
        if self.defer_connects {
            self.in_flight = true;
            return Ok(ConnectProgress::Pending);
        }
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(LinkError::Connection);
        }
        self.broker_connected = true;
        Ok(ConnectProgress::Connected)
    }

    fn poll_connect(&mut self) -> Option<Result<(), LinkError>> {
        self.settled.take()
    }

    fn disconnect_broker(&mut self) {
        self.disconnects += 1;
        self.broker_connected = false;
        self.in_flight = false;
        self.settled = None;
    }

    fn is_broker_connected(&self) -> bool {
        self.broker_connected
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), LinkError> {
        if !self.broker_connected {
            return Err(LinkError::NotConnected);
        }
        if self.reject_publish {
            return Err(LinkError::QueueFull);
        }
        self.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn service_keep_alive(&mut self) {
        self.keep_alives += 1;
    }
}

/// Replays a script of results, then keeps answering with `fallback`.
pub struct FakeSensor {
    script: VecDeque<Result<Measurement, SensorError>>,
    fallback: Result<Measurement, SensorError>,
    pub samples: u32,
}

impl FakeSensor {
    pub fn steady(temperature: f32, humidity: f32) -> Self {
        Self {
            script: VecDeque::new(),
            fallback: Ok(Measurement {
                temperature,
                humidity,
            }),
            samples: 0,
        }
    }

    pub fn then(mut self, result: Result<Measurement, SensorError>) -> Self {
        self.script.push_back(result);
        self
    }
}

impl Sensor for FakeSensor {
    async fn sample(&mut self) -> Result<Measurement, SensorError> {
        self.samples += 1;
        self.script.pop_front().unwrap_or(self.fallback)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Clear,
    Text(i32, i32, String, TextSize),
    Present,
}

#[derive(Default)]
pub struct RecordingDisplay {
    pub ops: Vec<DrawOp>,
}

impl RecordingDisplay {
    pub fn texts(&self) -> Vec<&str> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text(_, _, text, _) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &DrawOp) -> usize {
        self.ops.iter().filter(|op| *op == wanted).count()
    }
}

impl StatusDisplay for RecordingDisplay {
    fn clear(&mut self) {
        self.ops.push(DrawOp::Clear);
    }

    fn draw_text(&mut self, x: i32, y: i32, text: &str, size: TextSize) {
        self.ops.push(DrawOp::Text(x, y, text.to_string(), size));
    }

    fn present(&mut self) {
        self.ops.push(DrawOp::Present);
    }
}

#[derive(Default)]
pub struct QueuedPortal {
    pub pending: VecDeque<BrokerSettings>,
}

impl ConfigPortal for QueuedPortal {
    fn service(&mut self) -> Option<BrokerSettings> {
        self.pending.pop_front()
    }
}
