/*
 *  transport/mqtt.rs
 *
 *  inkmon - weather metrics on e-paper
 *  (c) 2020-26 Stuart Hunter
 *
 *  MQTT subscriber feeding sensor messages into the metrics sink
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
use log::{debug, info};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeFilter,
};
use std::time::Duration;
use tokio::time::{Instant, timeout_at};

use crate::metrics::MetricsSink;
use crate::transport::{Transport, TransportError};

/// How long one keep-alive call services the event loop
pub const POLL_WINDOW: Duration = Duration::from_secs(1);

/// Upper bound for reaching ConnAck when (re)connecting
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Broker connection parameters
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub hostname: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
}

impl MqttSettings {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            client_id: format!("{}-{}", env!("CARGO_PKG_NAME"), std::process::id()),
            keep_alive: Duration::from_secs(60),
        }
    }
}

pub struct MqttTransport {
    client: AsyncClient,
    eventloop: EventLoop,
    topics: Vec<String>,
    poll_window: Duration,
    label: String,
}

impl MqttTransport {
    /// Set up the client without touching the network. The event loop
    /// connects on its first poll.
    pub fn new(settings: &MqttSettings, topics: Vec<String>) -> Self {
        let mut options = MqttOptions::new(&settings.client_id, &settings.hostname, settings.port);
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, 10);
        Self {
            client,
            eventloop,
            topics,
            poll_window: POLL_WINDOW,
            label: format!("MQTT {}:{}", settings.hostname, settings.port),
        }
    }

    /// Connect to the broker and subscribe to `topics`.
    pub async fn connect(settings: &MqttSettings, topics: Vec<String>) -> Result<Self, TransportError> {
        let mut transport = Self::new(settings, topics);
        info!("Connecting to MQTT broker {} on port {}", settings.hostname, settings.port);
        transport.reconnect().await?;
        Ok(transport)
    }

    // takes owned handles: the event loop is not Sync, so no borrow of self
    // may be held across the await
    async fn subscribe(client: AsyncClient, topics: Vec<String>) -> Result<(), TransportError> {
        info!("subscribing to {:?}", topics);
        let filters = topics
            .into_iter()
            .map(|t| SubscribeFilter::new(t, QoS::AtMostOnce));
        client
            .subscribe_many(filters)
            .await
            .map_err(|e| TransportError::Client(e.to_string()))
    }

    fn check_connack(code: ConnectReturnCode) -> Result<(), TransportError> {
        match code {
            ConnectReturnCode::Success => Ok(()),
            other => Err(TransportError::Refused(format!("{:?}", other))),
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    fn name(&self) -> &str {
        &self.label
    }

    async fn keep_alive(&mut self, sink: &MetricsSink) -> Result<(), TransportError> {
        let deadline = Instant::now() + self.poll_window;
        loop {
            let event = match timeout_at(deadline, self.eventloop.poll()).await {
                Err(_) => return Ok(()),
                Ok(event) => event.map_err(|e| TransportError::Connection(e.to_string()))?,
            };
            match event {
                Event::Incoming(Packet::Publish(publish)) => {
                    sink.on_update(&publish.topic, &publish.payload);
                }
                Event::Incoming(Packet::ConnAck(ack)) => {
                    // the event loop reconnected on its own, subscriptions are gone
                    Self::check_connack(ack.code)?;
                    info!("{} session re-established", self.label);
                    Self::subscribe(self.client.clone(), self.topics.clone()).await?;
                }
                Event::Incoming(packet) => debug!("Received MQTT packet {:?}", packet),
                Event::Outgoing(_) => {}
            }
        }
    }

    async fn reconnect(&mut self) -> Result<(), TransportError> {
        let deadline = Instant::now() + CONNECT_TIMEOUT;
        loop {
            let event = timeout_at(deadline, self.eventloop.poll())
                .await
                .map_err(|_| TransportError::Timeout(CONNECT_TIMEOUT))?
                .map_err(|e| TransportError::Connection(e.to_string()))?;
            if let Event::Incoming(Packet::ConnAck(ack)) = event {
                Self::check_connack(ack.code)?;
                info!("Connected to {}", self.label);
                return Self::subscribe(self.client.clone(), self.topics.clone()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricKind, SensorBinding, SensorBindings};
    use crate::transport::BoxedTransport;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    const CONNACK_OK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

    fn sink() -> MetricsSink {
        MetricsSink::new(SensorBindings::new(
            SensorBinding::new("weather/outside", "temperature"),
            SensorBinding::new("air/co2", "co2"),
            SensorBinding::new("weather/outside", "pressure"),
        ))
    }

    async fn local_settings() -> (TcpListener, MqttSettings) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, MqttSettings::new("127.0.0.1", port))
    }

    /// Fixed header byte and body of the next control packet.
    async fn read_packet(stream: &mut TcpStream) -> (u8, Vec<u8>) {
        let header = stream.read_u8().await.unwrap();
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let b = stream.read_u8().await.unwrap();
            len |= ((b & 0x7f) as usize) << shift;
            if b & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await.unwrap();
        (header, body)
    }

    fn publish(topic: &str, payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![0x30, (2 + topic.len() + payload.len()) as u8];
        packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        packet.extend_from_slice(topic.as_bytes());
        packet.extend_from_slice(payload);
        packet
    }

    /// Single-client broker: accepts the session, waits for SUBSCRIBE,
    /// then publishes one message. Hands back the SUBSCRIBE packet and
    /// keeps the socket open.
    fn broker(listener: TcpListener, message: Vec<u8>) -> JoinHandle<(u8, Vec<u8>, TcpStream)> {
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (connect, _) = read_packet(&mut stream).await;
            assert_eq!(connect >> 4, 1);
            stream.write_all(&CONNACK_OK).await.unwrap();
            let (header, body) = read_packet(&mut stream).await;
            stream.write_all(&message).await.unwrap();
            (header, body, stream)
        })
    }

    fn mentions(body: &[u8], topic: &str) -> bool {
        body.windows(topic.len()).any(|w| w == topic.as_bytes())
    }

    #[test]
    fn test_settings_defaults() {
        let s = MqttSettings::new("broker.local", 1883);
        assert_eq!(s.port, 1883);
        assert_eq!(s.keep_alive, Duration::from_secs(60));
        assert!(s.client_id.starts_with("inkmon-"));
    }

    #[test]
    fn test_refused_connack_is_an_error() {
        assert!(MqttTransport::check_connack(ConnectReturnCode::Success).is_ok());
        assert!(matches!(
            MqttTransport::check_connack(ConnectReturnCode::NotAuthorized),
            Err(TransportError::Refused(_))
        ));
    }

    #[tokio::test]
    async fn test_quiet_window_is_not_a_fault() {
        // the listener never answers, so no ConnAck arrives inside the window
        let (_listener, settings) = local_settings().await;
        let mut transport = MqttTransport::new(&settings, vec!["weather/outside".into()]);
        transport.poll_window = Duration::from_millis(200);

        let sink = sink();
        assert!(transport.keep_alive(&sink).await.is_ok());
        assert_eq!(sink.store().sample(MetricKind::Temperature).value(), None);
    }

    #[tokio::test]
    async fn test_connack_during_keep_alive_resubscribes() {
        let (listener, settings) = local_settings().await;
        let broker = broker(listener, publish("weather/outside", br#"{"temperature": 19.5}"#));

        let topics = vec!["weather/outside".to_string(), "air/co2".to_string()];
        let mut transport = MqttTransport::new(&settings, topics);
        transport.poll_window = Duration::from_secs(2);

        let sink = sink();
        transport.keep_alive(&sink).await.unwrap();

        let (header, body, _stream) = broker.await.unwrap();
        assert_eq!(header >> 4, 8);
        assert!(mentions(&body, "weather/outside"));
        assert!(mentions(&body, "air/co2"));
        assert_eq!(sink.store().sample(MetricKind::Temperature).value(), Some(19.5));
    }

    #[tokio::test]
    async fn test_connect_then_deliver_through_boxed_transport() {
        let (listener, settings) = local_settings().await;
        let broker = broker(listener, publish("air/co2", br#"{"co2": 655}"#));

        let mut transport = MqttTransport::connect(&settings, vec!["air/co2".into()]).await.unwrap();
        transport.poll_window = Duration::from_secs(2);
        let mut boxed: BoxedTransport = Box::new(transport);
        assert_eq!(boxed.name(), format!("MQTT 127.0.0.1:{}", settings.port));

        let sink = sink();
        boxed.keep_alive(&sink).await.unwrap();

        let (header, body, _stream) = broker.await.unwrap();
        assert_eq!(header >> 4, 8);
        assert!(mentions(&body, "air/co2"));
        assert_eq!(sink.store().sample(MetricKind::Co2).value(), Some(655.0));
    }
}
