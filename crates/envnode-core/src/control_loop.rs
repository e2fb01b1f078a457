//! The operational loop of the node.
//!
//! One [`ControlLoop::tick`] performs, in this order:
//!
//! 1. configuration servicing (portal submissions, double-reset window),
//! 2. one reconnect step when the broker is not connected,
//! 3. protocol keep-alive,
//! 4. sample + publish when the report interval elapsed,
//! 5. callup window update and display refresh.
//!
//! Reconnecting before publishing keeps publish away from a stale session;
//! drawing last lets the screen show the freshest state of the tick. Nothing
//! in a tick sleeps.

use alloc::string::String;

use embassy_time::Instant;
use log::{error, info, warn};
use rand_core::RngCore;

use crate::callup::{CallupSignal, CallupTimer, CallupTransition};
use crate::config::NodeConfig;
use crate::identity::DeviceIdentity;
use crate::interval::IntervalTimer;
use crate::peripherals::{
    ConfigPortal, Connectivity, Credentials, Filesystem, Sensor, SensorError, StatusDisplay,
};
use crate::reconnect::{ConnectionState, ReconnectOutcome, ReconnectPolicy};
use crate::reset_detector::DoubleResetDetector;
use crate::settings::{self, BrokerSettings, Settings};
use crate::status_view::StatusView;
use crate::telemetry::{self, Reading, TelemetryMessage};

/// Everything the loop talks to.
pub struct Collaborators<S, D, C, P, F, R> {
    pub sensor: S,
    pub display: D,
    pub link: C,
    pub portal: P,
    pub fs: F,
    pub rng: R,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Handed to the link under this sequence number.
    Published(u32),
    /// Sampled and numbered, but not delivered.
    Dropped(u32),
    SensorFailed(SensorError),
}

/// Summary of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub reconfigured: bool,
    pub reconnect: ReconnectOutcome,
    pub report: Option<ReportOutcome>,
    pub display: CallupTransition,
}

pub struct ControlLoop<'a, S, D, C, P, F, R> {
    sensor: S,
    display: D,
    link: C,
    portal: P,
    fs: F,
    rng: R,
    identity: DeviceIdentity,
    credentials: Credentials<'a>,
    settings: Settings,
    topic: String,
    callup_signal: &'a CallupSignal,
    callup: CallupTimer<'a>,
    reconnect: ReconnectPolicy,
    report_timer: IntervalTimer,
    reset_detector: DoubleResetDetector,
    sequence: u32,
    latest: Option<Reading>,
}

impl<'a, S, D, C, P, F, R> ControlLoop<'a, S, D, C, P, F, R>
where
    S: Sensor,
    D: StatusDisplay,
    C: Connectivity,
    P: ConfigPortal,
    F: Filesystem,
    R: RngCore,
{
    /// Builds the loop at boot.
    ///
    /// Runs the double-reset check (restoring default settings when it
    /// fires) and loads the persisted broker settings.
    pub fn start(
        parts: Collaborators<S, D, C, P, F, R>,
        identity: DeviceIdentity,
        credentials: Credentials<'a>,
        callup_signal: &'a CallupSignal,
        config: NodeConfig,
        boot: Instant,
    ) -> Self {
        let Collaborators {
            sensor,
            display,
            link,
            portal,
            mut fs,
            rng,
        } = parts;

        let mut reset_detector = DoubleResetDetector::new(config.drd_timeout);
        if reset_detector.detect(&mut fs, boot) {
            info!("Restoring default settings");
            if let Err(e) = settings::store(&mut fs, &Settings::default()) {
                error!("Cannot restore default settings: {}", e);
            }
        }
        let settings = settings::load_or_default(&mut fs);
        let topic = settings.mqtt.topic_for(identity.as_str());
        info!("Device {} publishing to {}", identity, topic);

        Self {
            sensor,
            display,
            link,
            portal,
            fs,
            rng,
            identity,
            credentials,
            settings,
            topic,
            callup_signal,
            callup: CallupTimer::new(callup_signal, config.callup_timeout, boot),
            reconnect: ReconnectPolicy::new(
                config.max_retries,
                config.retry_backoff,
                config.connect_timeout,
            ),
            report_timer: IntervalTimer::immediate(config.report_interval, boot),
            reset_detector,
            sequence: 0,
            latest: None,
        }
    }

    pub async fn tick(&mut self, now: Instant) -> TickReport {
        let reconfigured = self.service_config(now);

        self.reconnect.observe(self.link.is_broker_connected());
        let reconnect = self
            .reconnect
            .step(
                now,
                &mut self.link,
                &self.settings.mqtt.broker,
                &self.identity,
                self.credentials,
                &mut self.rng,
            )
            .await;

        self.link.service_keep_alive().await;

        let report = if self.report_timer.check(now) {
            Some(self.report(now).await)
        } else {
            None
        };

        let display = self.refresh_display(now);

        TickReport {
            reconfigured,
            reconnect,
            report,
            display,
        }
    }

    fn service_config(&mut self, now: Instant) -> bool {
        self.reset_detector.poll(&mut self.fs, now);

        let Some(submitted) = self.portal.service() else {
            return false;
        };
        self.apply_settings(submitted);
        // Saving from the portal also lights up the screen.
        self.callup_signal.trigger(now);
        true
    }

    fn apply_settings(&mut self, submitted: BrokerSettings) {
        info!(
            "New settings: broker {}:{}, topic {}",
            submitted.broker.host, submitted.broker.port, submitted.topic
        );
        self.settings.mqtt = submitted;
        if let Err(e) = settings::store(&mut self.fs, &self.settings) {
            error!("Cannot persist settings: {}", e);
        }
        self.topic = self.settings.mqtt.topic_for(self.identity.as_str());

        self.link.disconnect_broker();
        self.reconnect.restart();
    }

    async fn report(&mut self, now: Instant) -> ReportOutcome {
        let measurement = match self.sensor.sample().await {
            Ok(measurement) => measurement,
            Err(e) => {
                warn!("Skipping report: {}", e);
                return ReportOutcome::SensorFailed(e);
            }
        };

        let reading = Reading::new(measurement, self.link.rssi(), now);
        self.latest = Some(reading);
        self.sequence += 1;
        let sequence = self.sequence;

        let message = TelemetryMessage::new(self.identity.as_str(), sequence, &reading);
        let payload = match telemetry::encode(&message) {
            Ok(payload) => payload,
            Err(e) => {
                error!("{}", e);
                return ReportOutcome::Dropped(sequence);
            }
        };

        if self.reconnect.state() != ConnectionState::Connected {
            warn!("Broker not connected, dropping message {}", sequence);
            return ReportOutcome::Dropped(sequence);
        }

        match self.link.publish(&self.topic, &payload).await {
            Ok(()) => {
                info!(
                    "Published #{} to {}: {}",
                    sequence,
                    self.topic,
                    core::str::from_utf8(&payload).unwrap_or_default()
                );
                ReportOutcome::Published(sequence)
            }
            Err(e) => {
                warn!("Publish of #{} failed: {}", sequence, e);
                ReportOutcome::Dropped(sequence)
            }
        }
    }

    fn refresh_display(&mut self, now: Instant) -> CallupTransition {
        let transition = self.callup.poll(now);
        match transition {
            CallupTransition::Active => {
                let address = if self.link.is_network_up() {
                    self.link.local_address()
                } else {
                    None
                };
                StatusView {
                    reading: self.latest.as_ref(),
                    address: address.as_deref(),
                    connection: self.reconnect.state(),
                }
                .render(&mut self.display);
            }
            CallupTransition::Expired => {
                self.display.clear();
                self.display.present();
            }
            CallupTransition::Idle => {}
        }
        transition
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Sequence number of the last message built, 0 before the first one.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.reconnect.state()
    }

    pub fn reconnect_policy(&self) -> &ReconnectPolicy {
        &self.reconnect
    }

    pub fn latest_reading(&self) -> Option<&Reading> {
        self.latest.as_ref()
    }

    pub fn display_on(&self) -> bool {
        self.callup.is_on()
    }

    pub fn link(&self) -> &C {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut C {
        &mut self.link
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    pub fn portal_mut(&mut self) -> &mut P {
        &mut self.portal
    }
}
