//! Bounded-retry broker reconnection.
//!
//! At most one connect attempt is started per call to [`ReconnectPolicy::step`].
//! An attempt the link runs in the background is polled on later steps until
//! it settles or its deadline passes. When a burst of `max` attempts fails,
//! the policy parks until a resume deadline and answers `Deferred` on every
//! tick before it, so the rest of the loop keeps running while the broker is
//! away.

use embassy_time::{Duration, Instant};
use log::{info, warn};
use rand_core::RngCore;

use crate::identity::DeviceIdentity;
use crate::peripherals::{ConnectProgress, Connectivity, Credentials, LinkError};
use crate::settings::BrokerAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub attempts: u8,
    pub max: u8,
}

impl RetryBudget {
    fn exhausted(&self) -> bool {
        self.attempts >= self.max
    }
}

/// Result of one [`ReconnectPolicy::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// Already connected, nothing to do.
    Idle,
    /// Waiting for the resume deadline of an exhausted burst.
    Deferred,
    /// No network yet, no attempt made.
    NetworkDown,
    /// An attempt is in flight on the link.
    Pending,
    Connected,
    /// Attempt failed, budget left for another one next tick.
    Failed,
    /// Attempt failed and used up the budget of this burst.
    Exhausted,
}

pub struct ReconnectPolicy {
    state: ConnectionState,
    budget: RetryBudget,
    backoff: Duration,
    connect_timeout: Duration,
    resume_at: Option<Instant>,
    attempt_deadline: Option<Instant>,
}

impl ReconnectPolicy {
    pub fn new(max_retries: u8, backoff: Duration, connect_timeout: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            budget: RetryBudget {
                attempts: 0,
                max: max_retries.max(1),
            },
            backoff,
            connect_timeout,
            resume_at: None,
            attempt_deadline: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn budget(&self) -> RetryBudget {
        self.budget
    }

    pub fn resume_at(&self) -> Option<Instant> {
        self.resume_at
    }

    /// Deadline of the attempt in flight, if any.
    pub fn attempt_deadline(&self) -> Option<Instant> {
        self.attempt_deadline
    }

    /// Folds the link's own view of the broker session into the state.
    pub fn observe(&mut self, broker_connected: bool) {
        match (self.state, broker_connected) {
            (ConnectionState::Connected, false) => {
                warn!("Broker connection lost");
                self.state = ConnectionState::Disconnected;
            }
            (ConnectionState::Disconnected | ConnectionState::Connecting, true) => {
                self.mark_connected();
            }
            _ => {}
        }
    }

    /// Forgets any pending burst, e.g. after the broker address changed.
    pub fn restart(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.budget.attempts = 0;
        self.resume_at = None;
        self.attempt_deadline = None;
    }

    pub async fn step<C, R>(
        &mut self,
        now: Instant,
        link: &mut C,
        broker: &BrokerAddress,
        identity: &DeviceIdentity,
        credentials: Credentials<'_>,
        rng: &mut R,
    ) -> ReconnectOutcome
    where
        C: Connectivity,
        R: RngCore,
    {
        if self.state == ConnectionState::Connected {
            return ReconnectOutcome::Idle;
        }

        if let Some(deadline) = self.attempt_deadline {
            return match link.poll_connect() {
                Some(Ok(())) => {
                    self.mark_connected();
                    ReconnectOutcome::Connected
                }
                Some(Err(e)) => self.fail(now, e),
                None if now >= deadline => {
                    link.disconnect_broker();
                    self.fail(now, LinkError::Timeout)
                }
                None => ReconnectOutcome::Pending,
            };
        }

        if let Some(resume_at) = self.resume_at {
            if now < resume_at {
                return ReconnectOutcome::Deferred;
            }
            self.resume_at = None;
            self.budget.attempts = 0;
        }

        if !link.is_network_up() {
            self.state = ConnectionState::Disconnected;
            return ReconnectOutcome::NetworkDown;
        }

        self.state = ConnectionState::Connecting;
        let client_id = identity.client_id(rng.next_u32());
        info!(
            "Connecting to {}:{} as {} (attempt {}/{})",
            broker.host,
            broker.port,
            client_id,
            self.budget.attempts + 1,
            self.budget.max
        );

        match link.connect_broker(broker, &client_id, credentials).await {
            Ok(ConnectProgress::Connected) => {
                self.mark_connected();
                ReconnectOutcome::Connected
            }
            Ok(ConnectProgress::Pending) => {
                self.attempt_deadline = Some(now + self.connect_timeout);
                ReconnectOutcome::Pending
            }
            Err(e) => self.fail(now, e),
        }
    }

    fn fail(&mut self, now: Instant, error: LinkError) -> ReconnectOutcome {
        self.state = ConnectionState::Disconnected;
        self.attempt_deadline = None;
        self.budget.attempts += 1;
        warn!(
            "Broker connect failed: {} ({}/{})",
            error, self.budget.attempts, self.budget.max
        );
        if self.budget.exhausted() {
            self.resume_at = Some(now + self.backoff);
            warn!("Retry budget exhausted, resuming in {}ms", self.backoff.as_millis());
            ReconnectOutcome::Exhausted
        } else {
            ReconnectOutcome::Failed
        }
    }

    fn mark_connected(&mut self) {
        info!("Broker connected");
        self.state = ConnectionState::Connected;
        self.budget.attempts = 0;
        self.resume_at = None;
        self.attempt_deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingRng, FakeLink};
    use embassy_futures::block_on;

    const BACKOFF: Duration = Duration::from_secs(5);
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    fn broker() -> BrokerAddress {
        BrokerAddress {
            host: "broker.test".into(),
            port: 1883,
        }
    }

    fn identity() -> DeviceIdentity {
        DeviceIdentity::from_mac([0, 1, 2, 3, 4, 5])
    }

    fn step(policy: &mut ReconnectPolicy, link: &mut FakeLink, now: Instant) -> ReconnectOutcome {
        block_on(policy.step(
            now,
            link,
            &broker(),
            &identity(),
            Credentials::ANONYMOUS,
            &mut CountingRng(1),
        ))
    }

    #[test]
    fn test_success_after_three_failures() {
        let mut policy = ReconnectPolicy::new(5, BACKOFF, CONNECT_TIMEOUT);
        let mut link = FakeLink::up();
        link.fail_next_connects(3);

        for ms in 0..3 {
            assert_eq!(step(&mut policy, &mut link, Instant::from_millis(ms)), ReconnectOutcome::Failed);
        }
        assert_eq!(policy.budget().attempts, 3);

        assert_eq!(step(&mut policy, &mut link, Instant::from_millis(3)), ReconnectOutcome::Connected);
        assert_eq!(policy.state(), ConnectionState::Connected);
        assert_eq!(policy.budget().attempts, 0);
        assert!(link.is_broker_connected());
        assert_eq!(link.connect_calls(), 4);
    }

    #[test]
    fn test_burst_stops_at_budget_and_defers() {
        let mut policy = ReconnectPolicy::new(3, BACKOFF, CONNECT_TIMEOUT);
        let mut link = FakeLink::up();
        link.fail_next_connects(u32::MAX);

        assert_eq!(step(&mut policy, &mut link, Instant::from_millis(0)), ReconnectOutcome::Failed);
        assert_eq!(step(&mut policy, &mut link, Instant::from_millis(1)), ReconnectOutcome::Failed);
        assert_eq!(step(&mut policy, &mut link, Instant::from_millis(2)), ReconnectOutcome::Exhausted);
        assert_eq!(policy.budget().attempts, 3);
        assert_eq!(policy.resume_at(), Some(Instant::from_millis(2) + BACKOFF));

        // Parked: no attempts until the deadline.
        for ms in [3, 100, 5001] {
            assert_eq!(step(&mut policy, &mut link, Instant::from_millis(ms)), ReconnectOutcome::Deferred);
        }
        assert_eq!(link.connect_calls(), 3);
        assert!(policy.budget().attempts <= policy.budget().max);

        // New burst after the deadline.
        assert_eq!(step(&mut policy, &mut link, Instant::from_millis(5002)), ReconnectOutcome::Failed);
        assert_eq!(policy.budget().attempts, 1);
        assert_eq!(link.connect_calls(), 4);
    }

    #[test]
    fn test_no_attempt_without_network() {
        let mut policy = ReconnectPolicy::new(5, BACKOFF, CONNECT_TIMEOUT);
        let mut link = FakeLink::down();

        assert_eq!(step(&mut policy, &mut link, Instant::from_millis(0)), ReconnectOutcome::NetworkDown);
        assert_eq!(link.connect_calls(), 0);
        assert_eq!(policy.budget().attempts, 0);
    }

    #[test]
    fn test_fresh_client_id_per_attempt() {
        let mut policy = ReconnectPolicy::new(5, BACKOFF, CONNECT_TIMEOUT);
        let mut link = FakeLink::up();
        link.fail_next_connects(1);
        let mut rng = CountingRng(10);

        for ms in 0..2 {
            block_on(policy.step(
                Instant::from_millis(ms),
                &mut link,
                &broker(),
                &identity(),
                Credentials::ANONYMOUS,
                &mut rng,
            ));
        }

        let ids = link.client_ids();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert!(ids.iter().all(|id| id.starts_with("device-000102030405-")));
    }

    #[test]
    fn test_observe_tracks_link_status() {
        let mut policy = ReconnectPolicy::new(5, BACKOFF, CONNECT_TIMEOUT);
        let mut link = FakeLink::up();
        step(&mut policy, &mut link, Instant::from_millis(0));
        assert_eq!(policy.state(), ConnectionState::Connected);

        policy.observe(false);
        assert_eq!(policy.state(), ConnectionState::Disconnected);

        policy.observe(true);
        assert_eq!(policy.state(), ConnectionState::Connected);
        assert_eq!(policy.budget().attempts, 0);
    }

    #[test]
    fn test_restart_clears_pending_deadline() {
        let mut policy = ReconnectPolicy::new(1, BACKOFF, CONNECT_TIMEOUT);
        let mut link = FakeLink::up();
        link.fail_next_connects(1);

        assert_eq!(step(&mut policy, &mut link, Instant::from_millis(0)), ReconnectOutcome::Exhausted);
        policy.restart();

        assert_eq!(policy.resume_at(), None);
        assert_eq!(step(&mut policy, &mut link, Instant::from_millis(1)), ReconnectOutcome::Connected);
    }

    #[test]
    fn test_background_connect_does_not_wait_for_broker() {
        let mut policy = ReconnectPolicy::new(5, BACKOFF, CONNECT_TIMEOUT);
        let mut link = FakeLink::up();
        link.defer_connects = true;

        assert_eq!(step(&mut policy, &mut link, Instant::from_millis(0)), ReconnectOutcome::Pending);
        assert_eq!(policy.state(), ConnectionState::Connecting);
        assert_eq!(policy.attempt_deadline(), Some(Instant::from_millis(0) + CONNECT_TIMEOUT));

        // Still in flight: no second attempt and no failure counted.
        assert_eq!(step(&mut policy, &mut link, Instant::from_millis(50)), ReconnectOutcome::Pending);
        assert_eq!(link.connect_calls(), 1);
        assert_eq!(policy.budget().attempts, 0);

        link.complete_connect(Ok(()));
        policy.observe(link.is_broker_connected());
        assert_eq!(policy.state(), ConnectionState::Connected);
        assert_eq!(policy.attempt_deadline(), None);
        assert_eq!(step(&mut policy, &mut link, Instant::from_millis(100)), ReconnectOutcome::Idle);
    }

    #[test]
    fn test_background_connect_failure_counts_once() {
        let mut policy = ReconnectPolicy::new(5, BACKOFF, CONNECT_TIMEOUT);
        let mut link = FakeLink::up();
        link.defer_connects = true;

        step(&mut policy, &mut link, Instant::from_millis(0));
        link.complete_connect(Err(LinkError::Broker));

        assert_eq!(step(&mut policy, &mut link, Instant::from_millis(50)), ReconnectOutcome::Failed);
        assert_eq!(policy.state(), ConnectionState::Disconnected);
        assert_eq!(policy.budget().attempts, 1);

        // The next step starts a fresh attempt.
        assert_eq!(step(&mut policy, &mut link, Instant::from_millis(100)), ReconnectOutcome::Pending);
        assert_eq!(link.connect_calls(), 2);
    }

    #[test]
    fn test_attempt_past_deadline_is_abandoned() {
        let mut policy = ReconnectPolicy::new(2, BACKOFF, CONNECT_TIMEOUT);
        let mut link = FakeLink::up();
        link.defer_connects = true;

        step(&mut policy, &mut link, Instant::from_millis(0));
        assert_eq!(step(&mut policy, &mut link, Instant::from_millis(9_999)), ReconnectOutcome::Pending);
        assert_eq!(step(&mut policy, &mut link, Instant::from_millis(10_000)), ReconnectOutcome::Failed);
        assert_eq!(link.disconnects, 1);
        assert_eq!(policy.budget().attempts, 1);

        // A result that arrives for the abandoned attempt is not picked up.
        link.complete_connect(Ok(()));
        assert!(!link.is_broker_connected());

        step(&mut policy, &mut link, Instant::from_millis(10_050));
        assert_eq!(
            step(&mut policy, &mut link, Instant::from_millis(20_050)),
            ReconnectOutcome::Exhausted
        );
        assert_eq!(policy.resume_at(), Some(Instant::from_millis(20_050) + BACKOFF));
    }

    #[test]
    fn test_restart_abandons_attempt_in_flight() {
        let mut policy = ReconnectPolicy::new(5, BACKOFF, CONNECT_TIMEOUT);
        let mut link = FakeLink::up();
        link.defer_connects = true;

        step(&mut policy, &mut link, Instant::from_millis(0));
        policy.restart();

        assert_eq!(policy.attempt_deadline(), None);
        assert_eq!(policy.state(), ConnectionState::Disconnected);
        assert_eq!(step(&mut policy, &mut link, Instant::from_millis(50)), ReconnectOutcome::Pending);
        assert_eq!(link.connect_calls(), 2);
    }
}
