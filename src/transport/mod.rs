/*
 *  transport/mod.rs
 *
 *  inkmon - weather metrics on e-paper
 *  (c) 2020-26 Stuart Hunter
 *
 *  Delivery of sensor readings into the metrics sink
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
use std::time::Duration;
use thiserror::Error;

use crate::metrics::MetricsSink;

pub mod mqtt;
pub mod prometheus;

pub use mqtt::MqttTransport;
pub use prometheus::PrometheusTransport;

/// Faults raised by a transport while servicing its connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("client request error: {0}")]
    Client(String),
    #[error("broker refused connection: {0}")]
    Refused(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// A source of named sensor values.
///
/// `keep_alive` services the connection and hands every value that arrived
/// to `sink`, synchronously, before returning. An `Err` means the session is
/// broken and the caller should `reconnect`.
#[async_trait]
pub trait Transport: Send {
    /// Short human readable name for logs
    fn name(&self) -> &str;

    async fn keep_alive(&mut self, sink: &MetricsSink) -> Result<(), TransportError>;

    async fn reconnect(&mut self) -> Result<(), TransportError>;
}

pub type BoxedTransport = Box<dyn Transport>;
