/*
 *  transport/prometheus.rs
 *
 *  inkmon - weather metrics on e-paper
 *  (c) 2020-26 Stuart Hunter
 *
 *  Pull sensor readings from a Prometheus HTTP API
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
use log::{debug, error, info};
use reqwest::{Client, header};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::metrics::{MetricKind, MetricsSink};
use crate::transport::{Transport, TransportError};

/// Instant queries, one per metric kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrometheusQueries {
    pub temperature: String,
    pub co2: String,
    pub pressure: String,
}

impl PrometheusQueries {
    pub fn default_temperature(sensor_name: &str) -> String {
        format!("last_over_time(temperature{{sensor='{}'}}[30m])", sensor_name)
    }
    pub fn default_co2() -> String {
        "co2_ppm".to_string()
    }
    pub fn default_pressure() -> String {
        "pressure_hpa{name='sea'}".to_string()
    }

    fn get(&self, kind: MetricKind) -> &str {
        match kind {
            MetricKind::Temperature => &self.temperature,
            MetricKind::Co2 => &self.co2,
            MetricKind::Pressure => &self.pressure,
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    result: Value,
}

/// Pulls the latest value for each metric on every keep-alive.
pub struct PrometheusTransport {
    base_url: String,
    queries: PrometheusQueries,
    client: Client,
}

impl PrometheusTransport {
    pub fn new(url: &str, queries: PrometheusQueries) -> Result<Self, TransportError> {
        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            queries,
            client: Self::build_client()?,
        })
    }

    fn build_client() -> Result<Client, TransportError> {
        const VERSION: &str = concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"));

        let mut headers = header::HeaderMap::new();
        headers.insert("User-Agent", header::HeaderValue::from_static(VERSION));
        headers.insert("Accept", header::HeaderValue::from_static("application/json"));

        Ok(Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .default_headers(headers)
            .timeout(Duration::from_secs(5))
            .build()?)
    }

    fn query_url(&self) -> String {
        format!("{}/api/v1/query", self.base_url)
    }

    async fn query(&self, query: &str) -> Result<String, reqwest::Error> {
        let response = self
            .client
            .get(self.query_url())
            .query(&[("query", query)])
            .send()
            .await?;
        response.error_for_status_ref()?;
        response.text().await
    }
}

/// First sample of an instant vector (or the scalar) as a number.
fn extract_sample(body: &str) -> Result<f64, TransportError> {
    let response: QueryResponse =
        serde_json::from_str(body).map_err(|e| TransportError::Protocol(e.to_string()))?;
    if response.status != "success" {
        return Err(TransportError::Protocol(
            response.error.unwrap_or_else(|| format!("status {}", response.status)),
        ));
    }
    let data = response
        .data
        .ok_or_else(|| TransportError::Protocol("response missing 'data'".to_string()))?;

    let pair = match data.result_type.as_str() {
        "vector" => data.result.get(0).and_then(|s| s.get("value")),
        "scalar" => Some(&data.result),
        other => {
            return Err(TransportError::Protocol(format!("unsupported result type {}", other)));
        }
    }
    .ok_or_else(|| TransportError::Protocol("empty result".to_string()))?;

    // samples are [unix_ts, "value"]
    pair.get(1)
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .ok_or_else(|| TransportError::Protocol(format!("undecodable sample {}", pair)))
}

#[async_trait]
impl Transport for PrometheusTransport {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn keep_alive(&mut self, sink: &MetricsSink) -> Result<(), TransportError> {
        let mut transport_fault = None;
        for kind in MetricKind::ALL {
            let query = self.queries.get(kind);
            match self.query(query).await {
                Ok(body) => match extract_sample(&body) {
                    Ok(value) => {
                        debug!("{} = {} ({})", kind, value, query);
                        sink.on_value(kind, value);
                    }
                    Err(e) => error!("cannot get data for {} from {}: {}", kind, self.base_url, e),
                },
                Err(e) if e.is_connect() || e.is_timeout() => {
                    transport_fault = Some(e);
                    break;
                }
                Err(e) => error!("cannot get data for {} from {}: {}", kind, self.base_url, e),
            }
        }
        match transport_fault {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    async fn reconnect(&mut self) -> Result<(), TransportError> {
        info!("Rebuilding HTTP client for {}", self.base_url);
        self.client = Self::build_client()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{SensorBinding, SensorBindings};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const CO2_BODY: &str = r#"{"status":"success","data":{"resultType":"vector","result":[
        {"metric":{"__name__":"co2_ppm"},"value":[1717171717.5,"512"]}]}}"#;
    const BAD_QUERY_BODY: &str = r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#;

    fn queries() -> PrometheusQueries {
        PrometheusQueries {
            temperature: PrometheusQueries::default_temperature("balcony"),
            co2: PrometheusQueries::default_co2(),
            pressure: PrometheusQueries::default_pressure(),
        }
    }

    fn sink() -> MetricsSink {
        let unused = || SensorBinding::new("", "");
        MetricsSink::new(SensorBindings::new(unused(), unused(), unused()))
    }

    /// Answers the co2 query, rejects everything else with 400.
    /// Returns the base url and a request counter.
    async fn serve() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requests);

        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = stream.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                counter.fetch_add(1, Ordering::SeqCst);

                let request_line = String::from_utf8_lossy(&request);
                let (status, body) = if request_line.contains("query=co2_ppm") {
                    ("200 OK", CO2_BODY)
                } else {
                    ("400 Bad Request", BAD_QUERY_BODY)
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                stream.write_all(response.as_bytes()).await.unwrap();
                let _ = stream.shutdown().await;
            }
        });

        (url, requests)
    }

    #[test]
    fn test_default_queries() {
        assert_eq!(
            PrometheusQueries::default_temperature("balcony"),
            "last_over_time(temperature{sensor='balcony'}[30m])"
        );
        assert_eq!(PrometheusQueries::default_co2(), "co2_ppm");
        assert_eq!(PrometheusQueries::default_pressure(), "pressure_hpa{name='sea'}");
    }

    #[test]
    fn test_extract_vector_sample() {
        let body = r#"{"status":"success","data":{"resultType":"vector","result":[
            {"metric":{"__name__":"co2_ppm","instance":"pi"},"value":[1717171717.123,"431"]}]}}"#;
        assert_eq!(extract_sample(body).unwrap(), 431.0);
    }

    #[test]
    fn test_extract_scalar_sample() {
        let body = r#"{"status":"success","data":{"resultType":"scalar","result":[1717171717,"7.25"]}}"#;
        assert_eq!(extract_sample(body).unwrap(), 7.25);
    }

    #[test]
    fn test_extract_empty_vector() {
        let body = r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#;
        assert!(matches!(extract_sample(body), Err(TransportError::Protocol(_))));
    }

    #[test]
    fn test_extract_error_status() {
        let body = r#"{"status":"error","errorType":"bad_data","error":"parse error at char 4"}"#;
        match extract_sample(body) {
            Err(TransportError::Protocol(msg)) => assert!(msg.contains("parse error")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_extract_nan_sample_rejected() {
        let body = r#"{"status":"success","data":{"resultType":"vector","result":[{"metric":{},"value":[1,"NaN"]}]}}"#;
        assert!(extract_sample(body).is_err());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let queries = PrometheusQueries {
            temperature: PrometheusQueries::default_temperature("x"),
            co2: PrometheusQueries::default_co2(),
            pressure: PrometheusQueries::default_pressure(),
        };
        let t = PrometheusTransport::new("http://prom.local:9090/", queries).unwrap();
        assert_eq!(t.query_url(), "http://prom.local:9090/api/v1/query");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_transport_fault() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let mut transport = PrometheusTransport::new(&url, queries()).unwrap();
        let sink = sink();
        assert!(transport.keep_alive(&sink).await.is_err());
        for kind in MetricKind::ALL {
            assert_eq!(sink.store().sample(kind).value(), None);
        }
    }

    #[tokio::test]
    async fn test_failed_queries_are_skipped() {
        let (url, requests) = serve().await;
        let mut transport = PrometheusTransport::new(&url, queries()).unwrap();
        let sink = sink();

        transport.keep_alive(&sink).await.unwrap();

        assert_eq!(requests.load(Ordering::SeqCst), 3);
        assert_eq!(sink.store().sample(MetricKind::Co2).value(), Some(512.0));
        assert_eq!(sink.store().sample(MetricKind::Temperature).value(), None);
        assert_eq!(sink.store().sample(MetricKind::Pressure).value(), None);
    }

    #[tokio::test]
    async fn test_reconnect_rebuilds_working_client() {
        let (url, requests) = serve().await;
        let mut transport = PrometheusTransport::new(&url, queries()).unwrap();
        let sink = sink();

        transport.reconnect().await.unwrap();
        transport.keep_alive(&sink).await.unwrap();

        assert_eq!(requests.load(Ordering::SeqCst), 3);
        assert_eq!(sink.store().sample(MetricKind::Co2).value(), Some(512.0));
    }
}
