//! Round Clock
//!
//! The multiplier is a pure function of elapsed flight time. The periodic
//! tick only decides *when* to recompute and publish; it is never the source
//! of the value. A late tick therefore catches up exactly.

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::warn;

use crate::core::fixed::Multiplier;

/// Computes multipliers from elapsed time and schedules ticks.
#[derive(Debug, Clone, Copy)]
pub struct RoundClock {
    /// Time for the multiplier to climb from 1.00 to the ceiling.
    flight_duration: Duration,
    /// Value the multiplier stops at.
    ceiling: Multiplier,
    /// Tick period.
    tick_interval: Duration,
}

impl RoundClock {
    /// Create a clock.
    ///
    /// The ceiling should be at least the generator's maximum crash point so
    /// every flight reaches its crash.
    pub fn new(flight_duration: Duration, ceiling: Multiplier, tick_interval: Duration) -> Self {
        Self {
            flight_duration,
            ceiling: ceiling.max(Multiplier::ONE),
            tick_interval,
        }
    }

    /// Linear growth: `1.00 + (ceiling - 1.00) * elapsed / flight_duration`,
    /// floored to hundredths and capped at the ceiling.
    ///
    /// Instants before `flight_started_at` read as 1.00.
    pub fn multiplier_at(&self, flight_started_at: Instant, now: Instant) -> Multiplier {
        let elapsed_ms = now.saturating_duration_since(flight_started_at).as_millis();
        let flight_ms = self.flight_duration.as_millis().max(1);
        let span = (self.ceiling.hundredths() - Multiplier::ONE.hundredths()) as u128;

        let growth = (elapsed_ms.saturating_mul(span) / flight_ms).min(span);
        Multiplier::from_hundredths(Multiplier::ONE.hundredths() + growth as u32)
    }

    /// Earliest elapsed flight time at which the multiplier reaches `target`.
    ///
    /// Returns `None` if the target is above the ceiling.
    pub fn time_to_reach(&self, target: Multiplier) -> Option<Duration> {
        if target > self.ceiling {
            return None;
        }
        let needed = target.hundredths().saturating_sub(Multiplier::ONE.hundredths()) as u128;
        let span = (self.ceiling.hundredths() - Multiplier::ONE.hundredths()) as u128;
        if span == 0 {
            return Some(Duration::ZERO);
        }
        let flight_ms = self.flight_duration.as_millis().max(1);
        // ceil(needed * flight_ms / span)
        let ms = (needed * flight_ms + span - 1) / span;
        Some(Duration::from_millis(ms as u64))
    }

    /// Ceiling.
    pub fn ceiling(&self) -> Multiplier {
        self.ceiling
    }

    /// Tick period.
    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Start a ticker whose first tick fires one period from now.
    pub fn ticker(&self) -> Ticker {
        let period = self.tick_interval.max(Duration::from_millis(1));
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Ticker { interval, period }
    }
}

impl Default for RoundClock {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(15),
            Multiplier::from_hundredths(1000),
            Duration::from_millis(100),
        )
    }
}

/// Fixed-interval tick source.
///
/// Missed ticks are skipped rather than burst, since a single recompute
/// from elapsed time already yields the right value; the lag is reported.
pub struct Ticker {
    interval: Interval,
    period: Duration,
}

impl Ticker {
    /// Wait for the next tick and return the instant it was processed at.
    pub async fn tick(&mut self) -> Instant {
        let scheduled = self.interval.tick().await;
        let now = Instant::now();
        let lag = now.saturating_duration_since(scheduled);
        if lag > self.period {
            warn!(lag_ms = lag.as_millis() as u64, "Round clock fell behind; catching up from elapsed time");
        }
        now
    }
}
