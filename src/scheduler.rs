/*
 *  scheduler.rs
 *
 *  inkmon - weather metrics on e-paper
 *  (c) 2020-26 Stuart Hunter
 *
 *  Redraw loop: fast polling, rate-limited panel refreshes
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use log::{debug, info, warn};
use std::time::Duration;
use tokio::time::{Instant, sleep};

use crate::display::error::DisplayError;
use crate::loop_cond::LoopCondition;
use crate::metrics::{ReadingsSnapshot, ReadingsSource};

/// Pause between polls. Short, so the loop condition is rechecked promptly.
pub const POLL_TICK: Duration = Duration::from_secs(1);

/// Something that turns a snapshot into a refreshed panel (render + display).
pub trait RedrawTarget {
    fn redraw(&mut self, readings: &ReadingsSnapshot) -> Result<(), DisplayError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub iterations: usize,
    pub redraws: usize,
}

/// Polls every tick, redraws at most once per `min_redraw_interval`.
///
/// The e-paper refresh is slow and visually disruptive, so it is limited
/// independently of how often the readings are polled.
#[derive(Debug)]
pub struct RedrawScheduler {
    min_redraw_interval: Duration,
    tick: Duration,
    last_redraw_at: Option<Instant>,
}

impl RedrawScheduler {
    pub fn new(min_redraw_interval: Duration) -> Self {
        Self {
            min_redraw_interval,
            tick: POLL_TICK,
            last_redraw_at: None,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    // strictly greater: a redraw exactly on the boundary waits for the next tick
    fn redraw_due(&self, now: Instant) -> bool {
        match self.last_redraw_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.min_redraw_interval,
        }
    }

    /// Loop while `cond` holds. The condition is only checked between
    /// iterations; a redraw in progress is never interrupted.
    ///
    /// A redraw failure ends the loop and is returned as is.
    pub async fn run<C, S, T>(
        &mut self,
        cond: &mut C,
        source: &mut S,
        target: &mut T,
    ) -> Result<RunStats, DisplayError>
    where
        C: LoopCondition + ?Sized,
        S: ReadingsSource + ?Sized,
        T: RedrawTarget + ?Sized,
    {
        let mut stats = RunStats::default();

        while cond.cond() {
            stats.iterations += 1;

            let readings = source.current_readings().await;
            debug!("Metrics: {}", readings);

            let now = Instant::now();
            if self.redraw_due(now) {
                info!("Drawing image");
                target.redraw(&readings)?;
                self.last_redraw_at = Some(now);
                stats.redraws += 1;
            }

            sleep(self.tick).await;
        }

        Ok(stats)
    }
}

/// Poll up to `attempts` times, `tick` apart, until every metric is present.
/// Gives up quietly (with a warning) and returns whatever it has.
pub async fn wait_for_readings<S>(source: &mut S, attempts: usize, tick: Duration) -> ReadingsSnapshot
where
    S: ReadingsSource + ?Sized,
{
    info!("Waiting for the metrics");

    let mut readings = ReadingsSnapshot::default();
    for attempt in 0..attempts {
        readings = source.current_readings().await;
        debug!("Metrics: {}", readings);
        if readings.is_complete() {
            return readings;
        }
        if attempt + 1 < attempts {
            sleep(tick).await;
        }
    }

    let missing: Vec<String> = readings.missing().iter().map(|k| k.to_string()).collect();
    warn!("Some metrics are missing ({}): {}", missing.join(", "), readings);
    readings
}
