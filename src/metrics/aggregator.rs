/*
 *  metrics/aggregator.rs
 *
 *  inkmon - weather metrics on e-paper
 *  (c) 2020-26 Stuart Hunter
 *
 *  Bridges pushed sensor values into a polled, staleness-aware snapshot
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

use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::metrics::freshness::{FreshnessStore, MetricKind};
use crate::transport::BoxedTransport;

/// Where a metric is published: the topic and the JSON field inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorBinding {
    pub topic: String,
    pub name: String,
}

impl SensorBinding {
    pub fn new(topic: impl Into<String>, name: impl Into<String>) -> Self {
        Self { topic: topic.into(), name: name.into() }
    }
}

/// One binding per metric kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorBindings {
    bindings: [SensorBinding; 3],
}

impl SensorBindings {
    pub fn new(temperature: SensorBinding, co2: SensorBinding, pressure: SensorBinding) -> Self {
        Self { bindings: [temperature, co2, pressure] }
    }

    pub fn get(&self, kind: MetricKind) -> &SensorBinding {
        &self.bindings[kind.index()]
    }

    /// Distinct topics in declaration order, for subscribing.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = Vec::with_capacity(3);
        for b in &self.bindings {
            if !topics.contains(&b.topic) {
                topics.push(b.topic.clone());
            }
        }
        topics
    }
}

/// Result of one aggregator query. Absent means never received or stale.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReadingsSnapshot {
    pub temperature: Option<f64>,
    pub co2: Option<f64>,
    pub pressure: Option<f64>,
}

impl ReadingsSnapshot {
    pub fn get(&self, kind: MetricKind) -> Option<f64> {
        match kind {
            MetricKind::Temperature => self.temperature,
            MetricKind::Co2 => self.co2,
            MetricKind::Pressure => self.pressure,
        }
    }

    pub fn is_complete(&self) -> bool {
        MetricKind::ALL.iter().all(|k| self.get(*k).is_some())
    }

    pub fn missing(&self) -> Vec<MetricKind> {
        MetricKind::ALL.into_iter().filter(|k| self.get(*k).is_none()).collect()
    }
}

impl fmt::Display for ReadingsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn show(v: Option<f64>) -> String {
            v.map_or_else(|| "N/A".to_string(), |v| v.to_string())
        }
        write!(
            f,
            "temp = {}, co2 = {}, pressure = {}",
            show(self.temperature),
            show(self.co2),
            show(self.pressure)
        )
    }
}

/// Delivery side of the aggregator, handed to transports.
///
/// Safe to share with another thread: the store is internally locked.
#[derive(Debug)]
pub struct MetricsSink {
    store: FreshnessStore,
    bindings: SensorBindings,
}

impl MetricsSink {
    pub fn new(bindings: SensorBindings) -> Self {
        Self { store: FreshnessStore::new(), bindings }
    }

    pub fn store(&self) -> &FreshnessStore {
        &self.store
    }

    /// Handle a raw message. Every kind bound to `topic` whose field is
    /// present and numeric gets recorded; anything else is dropped.
    /// Returns how many metrics were updated.
    pub fn on_update(&self, topic: &str, payload: &[u8]) -> usize {
        debug!("got {} bytes on {}", payload.len(), topic);

        let kinds: Vec<MetricKind> = MetricKind::ALL
            .into_iter()
            .filter(|k| self.bindings.get(*k).topic == topic)
            .collect();
        if kinds.is_empty() {
            debug!("ignoring message on unknown topic {}", topic);
            return 0;
        }

        let doc: Value = match serde_json::from_slice(payload) {
            Ok(doc) => doc,
            Err(e) => {
                debug!("dropping malformed payload on {}: {}", topic, e);
                return 0;
            }
        };

        let now = Instant::now();
        let mut recorded = 0;
        for kind in kinds {
            let name = &self.bindings.get(kind).name;
            match extract_value(&doc, name) {
                Some(value) => {
                    self.store.record(kind, value, now);
                    recorded += 1;
                }
                None => debug!("no usable '{}' field for {} on {}", name, kind, topic),
            }
        }
        recorded
    }

    /// Record an already decoded value, for pull transports.
    pub fn on_value(&self, kind: MetricKind, value: f64) {
        if value.is_finite() {
            self.store.record(kind, value, Instant::now());
        } else {
            debug!("dropping non-finite {} value", kind);
        }
    }
}

fn extract_value(doc: &Value, name: &str) -> Option<f64> {
    let value = match doc.get(name)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    value.is_finite().then_some(value)
}

/// Anything the redraw loop can poll for a snapshot.
#[async_trait]
pub trait ReadingsSource: Send {
    async fn current_readings(&mut self) -> ReadingsSnapshot;
}

/// Owns the freshness store (via the sink) and the transport session.
pub struct MetricsAggregator {
    sink: Arc<MetricsSink>,
    transport: BoxedTransport,
    metric_timeout: Duration,
}

impl MetricsAggregator {
    pub fn new(transport: BoxedTransport, bindings: SensorBindings, metric_timeout: Duration) -> Self {
        Self {
            sink: Arc::new(MetricsSink::new(bindings)),
            transport,
            metric_timeout,
        }
    }

    /// Shared delivery handle, for transports running in their own context.
    pub fn sink(&self) -> Arc<MetricsSink> {
        Arc::clone(&self.sink)
    }

    pub fn metric_timeout(&self) -> Duration {
        self.metric_timeout
    }

    pub fn on_update(&self, topic: &str, payload: &[u8]) -> usize {
        self.sink.on_update(topic, payload)
    }

    /// Snapshot as of `now`, without touching the transport.
    pub fn snapshot_at(&self, now: Instant) -> ReadingsSnapshot {
        let store = self.sink.store();
        ReadingsSnapshot {
            temperature: store.read(MetricKind::Temperature, now, self.metric_timeout),
            co2: store.read(MetricKind::Co2, now, self.metric_timeout),
            pressure: store.read(MetricKind::Pressure, now, self.metric_timeout),
        }
    }

    /// Services the transport once, then reads all metrics.
    ///
    /// Transport faults never escape: a broken session gets one reconnect
    /// attempt, and if that fails too the next call tries again.
    pub async fn current_readings(&mut self) -> ReadingsSnapshot {
        if let Err(e) = self.transport.keep_alive(&self.sink).await {
            warn!("Got {} exception: {}", self.transport.name(), e);
            match self.transport.reconnect().await {
                Ok(()) => info!("Reconnected to {}", self.transport.name()),
                Err(e) => warn!("Reconnect to {} failed, will retry: {}", self.transport.name(), e),
            }
        }

        let snapshot = self.snapshot_at(Instant::now());
        debug!("{}", snapshot);
        snapshot
    }
}

#[async_trait]
impl ReadingsSource for MetricsAggregator {
    async fn current_readings(&mut self) -> ReadingsSnapshot {
        MetricsAggregator::current_readings(self).await
    }
}
