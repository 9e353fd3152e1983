/*
 *  metrics/freshness.rs
 *
 *  inkmon - weather metrics on e-paper
 *  (c) 2020-26 Stuart Hunter
 *
 *  Last-known value per metric with lazy staleness on read
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

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// The fixed set of sensor readings shown on the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Temperature,
    Co2,
    Pressure,
}

impl MetricKind {
    pub const ALL: [MetricKind; 3] = [MetricKind::Temperature, MetricKind::Co2, MetricKind::Pressure];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            MetricKind::Temperature => 0,
            MetricKind::Co2 => 1,
            MetricKind::Pressure => 2,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Temperature => write!(f, "temperature"),
            MetricKind::Co2 => write!(f, "CO2"),
            MetricKind::Pressure => write!(f, "pressure"),
        }
    }
}

/// One stored reading. Value and arrival time travel together so a value
/// can never exist without its timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSample {
    pub kind: MetricKind,
    reading: Option<(f64, Instant)>,
}

impl MetricSample {
    pub fn empty(kind: MetricKind) -> Self {
        Self { kind, reading: None }
    }

    pub fn value(&self) -> Option<f64> {
        self.reading.map(|(v, _)| v)
    }

    pub fn observed_at(&self) -> Option<Instant> {
        self.reading.map(|(_, at)| at)
    }

    /// Value if it was observed no more than `metric_timeout` before `now`.
    /// A sample stamped after `now` counts as age zero.
    pub fn fresh_value(&self, now: Instant, metric_timeout: Duration) -> Option<f64> {
        let (value, at) = self.reading?;
        let age = now.saturating_duration_since(at);
        if age <= metric_timeout { Some(value) } else { None }
    }
}

/// Holds the last sample per metric kind.
///
/// Writes come from the transport delivery context, reads from the redraw
/// loop; the three samples sit behind one lock so a reader never sees a
/// value paired with someone else's timestamp. Nothing expires on its own,
/// staleness is decided when reading.
#[derive(Debug)]
pub struct FreshnessStore {
    samples: Mutex<[MetricSample; 3]>,
}

impl Default for FreshnessStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FreshnessStore {
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(MetricKind::ALL.map(MetricSample::empty)),
        }
    }

    // the guarded data is three plain values, a panicking writer cannot leave it half-updated
    fn guard(&self) -> MutexGuard<'_, [MetricSample; 3]> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Last write wins; no ordering check against the stored timestamp.
    pub fn record(&self, kind: MetricKind, value: f64, at: Instant) {
        self.guard()[kind.index()].reading = Some((value, at));
    }

    /// Stored value for `kind` if still fresh at `now`, otherwise `None`.
    pub fn read(&self, kind: MetricKind, now: Instant, metric_timeout: Duration) -> Option<f64> {
        self.guard()[kind.index()].fresh_value(now, metric_timeout)
    }

    /// Raw copy of the stored sample, regardless of age.
    pub fn sample(&self, kind: MetricKind) -> MetricSample {
        self.guard()[kind.index()]
    }
}
