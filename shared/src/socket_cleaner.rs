//! Jitter-driven rate control.
//!
//! A [`SocketCleaner`] watches the offset between a peer's send timestamps and
//! local receive times. A noisy offset means the link is struggling, so it
//! signals `SlowDown`; a long stretch without trouble signals `SpeedUp`.
//! Single late packets can be absorbed by an extrapolator instead.

use crate::clock::SharedClock;
use crate::config::CleanerConfig;
use crate::events::{EventEmitter, ListenerId};
use crate::rolling_variance::RollingVariance;
use crate::timers::{InterruptableWait, LimitedCaller};
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CleanerEvent {
    SlowDown,
    SpeedUp,
}

pub struct SocketCleaner {
    config: CleanerConfig,
    clock: SharedClock,
    stats: RollingVariance,
    speed_up: InterruptableWait,
    slow_down: LimitedCaller,
    time_diff: Option<f64>,
    extrapolator: Option<Box<dyn FnMut(f64)>>,
    events: EventEmitter<CleanerEvent, ()>,
}

impl SocketCleaner {
    pub fn new(config: CleanerConfig, clock: SharedClock) -> Self {
        let now = clock.now_ms();
        Self {
            stats: RollingVariance::new(config.rolling_variance_sample_size),
            speed_up: InterruptableWait::new(config.speed_up_quiet_time, now),
            slow_down: LimitedCaller::new(config.slow_down_min_wait),
            time_diff: None,
            extrapolator: None,
            events: EventEmitter::new(),
            config,
            clock,
        }
    }

    pub fn on(&mut self, event: CleanerEvent, mut listener: impl FnMut() + 'static) -> ListenerId {
        self.events.on(event, move |_: &()| listener())
    }

    pub fn off(&mut self, id: ListenerId) -> bool {
        self.events.off(id)
    }

    /// Called with the excess delay (ms) whenever a message arrives more than
    /// `extrapolation_threshold` later than the previous one did
    pub fn set_extrapolator(&mut self, extrapolator: impl FnMut(f64) + 'static) {
        self.extrapolator = Some(Box::new(extrapolator));
    }

    /// Records the arrival of a message stamped `server_time` by the peer.
    /// `client_time` defaults to the local clock.
    pub fn log_time(&mut self, server_time: u64, client_time: Option<u64>) {
        let now = self.clock.now_ms();
        let client_time = client_time.unwrap_or(now);
        let next_diff = client_time as f64 - server_time as f64;

        self.stats.push(next_diff);
        let variance_threshold = self.config.slow_down_threshold * self.config.slow_down_threshold;
        if let Some(variance) = self.stats.variance() {
            if variance > variance_threshold && self.slow_down.trigger(now) {
                debug!(
                    "Offset variance {:.1} above {:.1}, requesting slow down",
                    variance, variance_threshold
                );
                self.speed_up.interrupt(now);
                self.events.emit(CleanerEvent::SlowDown, &());
            }
        }

        let threshold = self.config.extrapolation_threshold;
        let excess = self
            .time_diff
            .map(|previous| next_diff - previous)
            .filter(|excess| *excess > threshold);

        match (excess, self.extrapolator.as_mut()) {
            (Some(excess), Some(extrapolator)) => extrapolator(excess),
            _ => self.time_diff = Some(next_diff),
        }
    }

    /// Fires `SpeedUp` once the quiet period has passed without a slow down
    pub fn poll(&mut self) {
        if self.speed_up.poll(self.clock.now_ms()) {
            debug!("No slow down for {}ms, requesting speed up", self.config.speed_up_quiet_time);
            self.events.emit(CleanerEvent::SpeedUp, &());
        }
    }

    pub fn stop(&mut self) {
        self.speed_up.stop();
    }

    pub fn variance(&self) -> Option<f64> {
        self.stats.variance()
    }

    /// Offset (client - server, ms) last accepted as the baseline
    pub fn time_diff(&self) -> Option<f64> {
        self.time_diff
    }
}
