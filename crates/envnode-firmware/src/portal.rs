use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use envnode_core::peripherals::ConfigPortal;
use envnode_core::settings::BrokerSettings;
use log::info;

/// Latest broker settings submitted by the operator. A newer submission
/// replaces one the control loop has not picked up yet.
static SUBMISSIONS: Signal<CriticalSectionRawMutex, BrokerSettings> = Signal::new();

/// Entry point for the captive configuration page served in access-point
/// mode. That HTTP front-end is not part of this firmware, so nothing here
/// calls it yet; the control loop side is live.
#[allow(dead_code)]
pub fn submit(settings: BrokerSettings) {
    info!(
        "Portal received broker {}:{}",
        settings.broker.host, settings.broker.port
    );
    SUBMISSIONS.signal(settings);
}

pub struct SignalPortal;

impl ConfigPortal for SignalPortal {
    fn service(&mut self) -> Option<BrokerSettings> {
        SUBMISSIONS.try_take()
    }
}
