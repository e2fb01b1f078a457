//! Broker session over rust-mqtt.
//!
//! The client borrows its buffers for as long as a session lives, so the
//! session runs inside [`mqtt_task`], which owns them. The control loop talks
//! to the task through [`MqttLink`]: requests go through a channel, the
//! outcome of a connect comes back through a signal tagged with the id of
//! the request it answers.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embassy_net::{
    dns::{DnsQueryType, Error as DnsError},
    tcp::{ConnectError, TcpSocket},
    Stack,
};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel, signal::Signal};
use embassy_time::{with_timeout, Instant};
use envnode_core::config::MQTT_KEEP_ALIVE;
use envnode_core::interval::IntervalTimer;
use envnode_core::peripherals::{ConnectProgress, Connectivity, Credentials, LinkError};
use envnode_core::settings::BrokerAddress;
use log::{debug, error, info, warn};
use rust_mqtt::{
    client::{
        client::MqttClient,
        client_config::{ClientConfig, MqttVersion::MQTTv5},
    },
    packet::v5::{publish_packet::QualityOfService, reason_codes::ReasonCode},
    utils::rng_generator::CountingRng,
};
use static_cell::StaticCell;

use crate::config::MQTT_SETUP_TIMEOUT;
use crate::wifi;

const BUFFER_SIZE: usize = 4096;
const BUFFER_SIZE_CLIENT: usize = 1024;
const COMMAND_QUEUE: usize = 4;
/// Request id meaning "no connect wanted".
const NO_REQUEST: u32 = 0;

struct MqttResources {
    rx_buffer: [u8; BUFFER_SIZE],
    tx_buffer: [u8; BUFFER_SIZE],
    client_rx_buffer: [u8; BUFFER_SIZE_CLIENT],
    client_tx_buffer: [u8; BUFFER_SIZE_CLIENT],
}

static RESOURCES: StaticCell<MqttResources> = StaticCell::new();

struct ConnectRequest {
    id: u32,
    host: String,
    port: u16,
    client_id: String,
    username: String,
    password: String,
}

enum MqttCommand {
    Connect(ConnectRequest),
    Publish { topic: String, payload: Vec<u8> },
    Ping,
    Disconnect,
}

static COMMANDS: Channel<CriticalSectionRawMutex, MqttCommand, COMMAND_QUEUE> = Channel::new();
static CONNECT_RESULT: Signal<CriticalSectionRawMutex, (u32, Result<(), LinkError>)> =
    Signal::new();
static BROKER_CONNECTED: AtomicBool = AtomicBool::new(false);
/// The connect request the control loop is waiting for.
static WANTED_REQUEST: AtomicU32 = AtomicU32::new(NO_REQUEST);

type MqttClientImpl<'a> = MqttClient<'a, TcpSocket<'a>, 5, CountingRng>;

#[embassy_executor::task]
pub async fn mqtt_task(stack: Stack<'static>) {
    let resources = RESOURCES.init(MqttResources {
        rx_buffer: [0u8; BUFFER_SIZE],
        tx_buffer: [0u8; BUFFER_SIZE],
        client_rx_buffer: [0u8; BUFFER_SIZE_CLIENT],
        client_tx_buffer: [0u8; BUFFER_SIZE_CLIENT],
    });

    let mut pending: Option<ConnectRequest> = None;
    loop {
        let request = match pending.take() {
            Some(request) => request,
            None => next_connect_request().await,
        };

        let result = match with_timeout(
            MQTT_SETUP_TIMEOUT,
            initialize_mqtt_client(stack, resources, &request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        };

        match result {
            Ok(mut client) => {
                if WANTED_REQUEST.load(Ordering::Acquire) != request.id {
                    info!("Connect request {} was abandoned, closing session", request.id);
                    if let Err(e) = client.disconnect().await {
                        warn!("MQTT disconnect failed: {:?}", e);
                    }
                    continue;
                }
                BROKER_CONNECTED.store(true, Ordering::Release);
                CONNECT_RESULT.signal((request.id, Ok(())));
                pending = serve(&mut client).await;
                BROKER_CONNECTED.store(false, Ordering::Release);
                info!("MQTT session closed");
            }
            Err(e) => {
                error!("Error initializing MQTT client: {}", e);
                CONNECT_RESULT.signal((request.id, Err(e.into())));
            }
        }
    }
}

/// Waits for a connect request. Anything else is stale while there is no session.
async fn next_connect_request() -> ConnectRequest {
    loop {
        match COMMANDS.receive().await {
            MqttCommand::Connect(request) => return request,
            MqttCommand::Publish { topic, .. } => {
                debug!("Dropping message for {} without session", topic)
            }
            MqttCommand::Ping | MqttCommand::Disconnect => {}
        }
    }
}

async fn initialize_mqtt_client<'a>(
    stack: Stack<'static>,
    resources: &'a mut MqttResources,
    request: &'a ConnectRequest,
) -> Result<MqttClientImpl<'a>, Error> {
    let mut socket = TcpSocket::new(stack, &mut resources.rx_buffer, &mut resources.tx_buffer);
    // A silent broker is noticed after two missed pings.
    socket.set_timeout(Some(MQTT_KEEP_ALIVE * 2));

    let host_addr = stack
        .dns_query(&request.host, DnsQueryType::A)
        .await?
        .first()
        .copied()
        .ok_or(Error::Dns(DnsError::Failed))?;

    let socket_addr = (host_addr, request.port);

    info!("Connecting to MQTT server {}:{}...", request.host, request.port);
    socket.connect(socket_addr).await?;
    info!("Connected to MQTT server");

    info!("Initializing MQTT connection as {}", request.client_id);
    let mut mqtt_config: ClientConfig<5, CountingRng> =
        ClientConfig::new(MQTTv5, CountingRng(20000));
    if !request.username.is_empty() {
        mqtt_config.add_username(&request.username);
        mqtt_config.add_password(&request.password);
    }
    mqtt_config.add_client_id(&request.client_id);
    // The broker gives up after 1.5x keep-alive; pings arrive every MQTT_KEEP_ALIVE.
    mqtt_config.keep_alive = (MQTT_KEEP_ALIVE.as_secs() * 2) as u16;

    let mut client = MqttClient::new(
        socket,
        &mut resources.client_tx_buffer,
        BUFFER_SIZE_CLIENT,
        &mut resources.client_rx_buffer,
        BUFFER_SIZE_CLIENT,
        mqtt_config,
    );

    client.connect_to_broker().await?;

    info!("MQTT Broker connected");

    Ok(client)
}

/// Runs one session until it fails or is closed. Returns the connect request
/// that replaced it, if any.
async fn serve(client: &mut MqttClientImpl<'_>) -> Option<ConnectRequest> {
    loop {
        let result = match COMMANDS.receive().await {
            MqttCommand::Publish { topic, payload } => {
                debug!("Publishing {} bytes to topic {}", payload.len(), topic);
                client
                    .send_message(&topic, &payload, QualityOfService::QoS0, false)
                    .await
            }
            MqttCommand::Ping => client.send_ping().await,
            MqttCommand::Disconnect => {
                if let Err(e) = client.disconnect().await {
                    warn!("MQTT disconnect failed: {:?}", e);
                }
                return None;
            }
            MqttCommand::Connect(request) => {
                if let Err(e) = client.disconnect().await {
                    warn!("MQTT disconnect failed: {:?}", e);
                }
                return Some(request);
            }
        };

        if let Err(e) = result {
            error!("MQTT session failed: {:?}", e);
            return None;
        }
    }
}

/// [`Connectivity`] handle for the control loop.
pub struct MqttLink {
    stack: Stack<'static>,
    keep_alive: IntervalTimer,
    next_request: u32,
}

impl MqttLink {
    pub fn new(stack: Stack<'static>, now: Instant) -> Self {
        Self {
            stack,
            keep_alive: IntervalTimer::new(MQTT_KEEP_ALIVE, now),
            next_request: NO_REQUEST,
        }
    }

    fn request_id(&mut self) -> u32 {
        self.next_request = self.next_request.wrapping_add(1);
        if self.next_request == NO_REQUEST {
            self.next_request = 1;
        }
        self.next_request
    }
}

impl Connectivity for MqttLink {
    fn is_network_up(&self) -> bool {
        self.stack.is_link_up() && self.stack.config_v4().is_some()
    }

    fn local_address(&self) -> Option<String> {
        self.stack
            .config_v4()
            .map(|config| config.address.address().to_string())
    }

    fn rssi(&self) -> Option<i8> {
        wifi::rssi()
    }

    async fn connect_broker(
        &mut self,
        broker: &BrokerAddress,
        client_id: &str,
        credentials: Credentials<'_>,
    ) -> Result<ConnectProgress, LinkError> {
        let id = self.request_id();
        let request = ConnectRequest {
            id,
            host: broker.host.clone(),
            port: broker.port,
            client_id: client_id.to_string(),
            username: credentials.username.to_string(),
            password: credentials.password.to_string(),
        };
        WANTED_REQUEST.store(id, Ordering::Release);
        if COMMANDS.try_send(MqttCommand::Connect(request)).is_err() {
            WANTED_REQUEST.store(NO_REQUEST, Ordering::Release);
            return Err(LinkError::QueueFull);
        }
        Ok(ConnectProgress::Pending)
    }

    fn poll_connect(&mut self) -> Option<Result<(), LinkError>> {
        let wanted = WANTED_REQUEST.load(Ordering::Acquire);
        match CONNECT_RESULT.try_take() {
            Some((id, result)) if id == wanted && id != NO_REQUEST => Some(result),
            Some((id, _)) => {
                debug!("Ignoring result of abandoned connect request {}", id);
                None
            }
            None => None,
        }
    }

    fn disconnect_broker(&mut self) {
        WANTED_REQUEST.store(NO_REQUEST, Ordering::Release);
        BROKER_CONNECTED.store(false, Ordering::Release);
        if COMMANDS.try_send(MqttCommand::Disconnect).is_err() {
            warn!("MQTT command queue full, disconnect dropped");
        }
    }

    fn is_broker_connected(&self) -> bool {
        BROKER_CONNECTED.load(Ordering::Acquire)
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), LinkError> {
        if !self.is_broker_connected() {
            return Err(LinkError::NotConnected);
        }
        COMMANDS
            .try_send(MqttCommand::Publish {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            })
            .map_err(|_| LinkError::QueueFull)
    }

    async fn service_keep_alive(&mut self) {
        if self.keep_alive.check(Instant::now())
            && self.is_broker_connected()
            && COMMANDS.try_send(MqttCommand::Ping).is_err()
        {
            debug!("MQTT command queue full, ping skipped");
        }
    }
}

#[derive(Debug)]
enum Error {
    Dns(DnsError),
    Connection(ConnectError),
    Broker(ReasonCode),
    Timeout,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Dns(e) => write!(f, "DNS error: {:?}", e),
            Error::Connection(e) => write!(f, "Connection error: {:?}", e),
            Error::Broker(e) => write!(f, "Broker error: {:?}", e),
            Error::Timeout => write!(f, "Broker did not answer in time"),
        }
    }
}

impl From<DnsError> for Error {
    fn from(error: DnsError) -> Self {
        Self::Dns(error)
    }
}

impl From<ConnectError> for Error {
    fn from(error: ConnectError) -> Self {
        Self::Connection(error)
    }
}

impl From<ReasonCode> for Error {
    fn from(error: ReasonCode) -> Self {
        Self::Broker(error)
    }
}

impl From<Error> for LinkError {
    fn from(error: Error) -> Self {
        match error {
            Error::Dns(_) => LinkError::Dns,
            Error::Connection(_) => LinkError::Connection,
            Error::Broker(_) => LinkError::Broker,
            Error::Timeout => LinkError::Timeout,
        }
    }
}
