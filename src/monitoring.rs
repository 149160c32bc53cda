use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::config;
use crate::notify::ReconnectDetails;
use crate::portal::LoginOutcome;

/// Wait between a successful portal login and the confirming probe.
pub const SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Everything the watchdog needs from the outside world.
pub trait Backend {
    async fn check_connectivity(&self) -> bool;

    /// Discovers the local campus address and logs it in to the portal.
    async fn login(&self) -> LoginOutcome;

    async fn notify(&self, notification: &Notification) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Connectivity seen for the first time since startup or since the
    /// last disconnection. Carries full interface diagnostics.
    Connected,

    /// The watchdog logged back in and connectivity was confirmed.
    Reconnected(ReconnectDetails),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Checking every `interval` minutes.
    Normal,

    /// Retrying every `high_frequency_interval` seconds.
    /// The burst began at the contained instant.
    HighFrequency(Instant),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub is_connected: bool,

    /// Whether the current connected stretch has been reported by email.
    /// Never true while disconnected.
    pub notified_success: bool,
}

pub struct Monitoring<B> {
    backend: B,
    schedule: config::Schedule,

    state: ConnectionState,
    mode: Mode,

    /// The only live timer. Replaced wholesale on every mode switch.
    ticker: Interval,
}

/// Shortest period a timer may run at; `interval_at` rejects zero.
const MIN_PERIOD: Duration = Duration::from_secs(1);

fn ticker(period: Duration) -> Interval {
    let period = period.max(MIN_PERIOD);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

impl<B: Backend> Monitoring<B> {
    pub fn new(backend: B, schedule: config::Schedule) -> Self {
        let ticker = ticker(schedule.normal_period());
        Self {
            backend,
            schedule,
            state: ConnectionState::default(),
            mode: Mode::Normal,
            ticker,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Period of the live timer.
    pub fn period(&self) -> Duration {
        self.ticker.period()
    }

    fn mode_period(&self) -> Duration {
        match self.mode {
            Mode::Normal => self.schedule.normal_period(),
            Mode::HighFrequency(_) => self.schedule.high_frequency_period(),
        }
    }

    /// Runs one check immediately, then keeps checking on the timer forever.
    ///
    /// Each check is awaited to completion before the next tick is taken,
    /// so checks never overlap.
    pub async fn run(&mut self) {
        tracing::info!("Running the first check immediately");
        self.tick().await;

        self.ticker = ticker(self.mode_period());
        tracing::info!(
            "Checks scheduled every {:?}; on disconnection retries every {:?} for {:?}",
            self.schedule.normal_period(),
            self.schedule.high_frequency_period(),
            self.schedule.burst_duration()
        );

        loop {
            self.ticker.tick().await;
            self.tick().await;
        }
    }

    fn enter_high_frequency(&mut self) {
        tracing::info!(
            "Entering high-frequency mode: retrying every {:?} for {:?}",
            self.schedule.high_frequency_period(),
            self.schedule.burst_duration()
        );
        self.mode = Mode::HighFrequency(Instant::now());
        self.ticker = ticker(self.schedule.high_frequency_period());
    }

    fn leave_high_frequency(&mut self) {
        if self.mode == Mode::Normal {
            return;
        }

        tracing::info!(
            "Leaving high-frequency mode, checking every {:?} again",
            self.schedule.normal_period()
        );
        self.mode = Mode::Normal;
        self.ticker = ticker(self.schedule.normal_period());
    }

    /// Leaves high-frequency mode if the burst has run its course.
    /// Returns whether it did.
    fn expire_burst(&mut self) -> bool {
        let Mode::HighFrequency(started_at) = self.mode else {
            return false;
        };
        if started_at.elapsed() < self.schedule.burst_duration() {
            return false;
        }

        tracing::info!(
            "High-frequency burst reached its maximum duration of {:?}",
            self.schedule.burst_duration()
        );
        self.leave_high_frequency();
        true
    }

    /// One check-and-repair cycle.
    pub async fn tick(&mut self) {
        let high_frequency = matches!(self.mode, Mode::HighFrequency(_));
        tracing::info!(
            "---------- Connectivity check{} ----------",
            if high_frequency { " (high-frequency)" } else { "" }
        );

        let burst_exhausted = self.expire_burst();
        let disconnected_at = chrono::Local::now();

        if self.backend.check_connectivity().await {
            self.on_connected().await;
        } else {
            self.on_disconnected(disconnected_at, burst_exhausted).await;
        }

        tracing::debug!(
            "{:?}, {:?}, next check in {:?}",
            self.state(),
            self.mode(),
            self.period()
        );
        tracing::info!("---------- Connectivity check done ----------");
    }

    async fn on_connected(&mut self) {
        tracing::info!("Network is up");
        self.state.is_connected = true;
        self.leave_high_frequency();

        if self.state.notified_success {
            tracing::info!("Network is stable, nothing to do");
            return;
        }

        tracing::info!("First successful check, sending notification");
        if self.backend.notify(&Notification::Connected).await {
            self.state.notified_success = true;
            tracing::info!("Connection notification sent");
        } else {
            tracing::error!("Failed to send connection notification, will retry on the next check");
        }
    }

    async fn on_disconnected(
        &mut self,
        disconnected_at: chrono::DateTime<chrono::Local>,
        burst_exhausted: bool,
    ) {
        tracing::warn!("Network is down or the internet is unreachable");
        self.state = ConnectionState {
            is_connected: false,
            notified_success: false,
        };

        if burst_exhausted {
            tracing::info!("Burst exhausted, staying at the normal interval until the next check");
        } else if self.mode == Mode::Normal {
            self.enter_high_frequency();
        }

        tracing::info!("Trying to log in to the portal");
        let outcome = self.backend.login().await;
        let Some(ip) = outcome.ip() else {
            if let LoginOutcome::Failure(reason) = &outcome {
                tracing::error!("Portal login failed ({}), will keep retrying", reason);
            }
            return;
        };

        tracing::info!("Logged in as {}, re-checking in {:?}", ip, SETTLE_DELAY);
        tokio::time::sleep(SETTLE_DELAY).await;

        if !self.backend.check_connectivity().await {
            tracing::warn!(
                "Portal login succeeded but the internet is still unreachable (IP conflict or gateway failure?), will keep retrying"
            );
            return;
        }

        let reconnected_at = chrono::Local::now();
        tracing::info!("Connectivity restored at {}", reconnected_at.format("%Y-%m-%d %H:%M:%S"));
        self.state.is_connected = true;
        self.leave_high_frequency();

        let notification = Notification::Reconnected(ReconnectDetails {
            ip: ip.to_string(),
            disconnected_at,
            reconnected_at,
        });
        if self.backend.notify(&notification).await {
            self.state.notified_success = true;
            tracing::info!("Reconnection notification sent");
        } else {
            tracing::error!("Failed to send reconnection notification");
        }
    }
}
