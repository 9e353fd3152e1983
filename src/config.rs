/*
 *  config.rs
 *
 *  inkmon - weather metrics on e-paper
 *  (c) 2020-26 Stuart Hunter
 *
 *  Layered configuration: defaults, YAML file, command line
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

use clap::{ArgAction, Parser, ValueEnum, ValueHint};
use dirs_next::home_dir;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::{Path, PathBuf}};
use thiserror::Error;

use crate::metrics::{MetricKind, SensorBinding, SensorBindings};
use crate::transport::mqtt::MqttSettings;
use crate::transport::prometheus::PrometheusQueries;

/// Redraw interval when nothing is configured
pub const DEFAULT_TIMEOUT_SECS: u64 = 900;
/// Shortest redraw interval accepted; e-paper does not like faster refreshes
pub const MIN_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_METRIC_TIMEOUT_SECS: u64 = 1800;
pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Error type for config loading/validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Top-level app configuration. Every field is optional so YAML and CLI
/// can be layered; accessors supply the defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub log_level: Option<String>,
    /// minimum seconds between panel refreshes
    pub timeout_secs: Option<u64>,
    /// seconds after which a sample is stale
    pub metric_timeout_secs: Option<u64>,
    /// render once into this file instead of driving a panel
    pub output: Option<PathBuf>,
    pub mqtt: Option<MqttConfig>,
    pub prometheus: Option<PrometheusConfig>,
    pub sensors: Option<SensorsConfig>,
    pub display: Option<DisplayConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MqttConfig {
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub client_id: Option<String>,
    pub keep_alive_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PrometheusConfig {
    pub url: Option<String>,
    pub temperature_query: Option<String>,
    pub co2_query: Option<String>,
    pub pressure_query: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SensorConfig {
    pub topic: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SensorsConfig {
    pub temperature: Option<SensorConfig>,
    pub co2: Option<SensorConfig>,
    pub pressure: Option<SensorConfig>,
}

impl SensorsConfig {
    fn get(&self, kind: MetricKind) -> Option<&SensorConfig> {
        match kind {
            MetricKind::Temperature => self.temperature.as_ref(),
            MetricKind::Co2 => self.co2.as_ref(),
            MetricKind::Pressure => self.pressure.as_ref(),
        }
    }

    fn get_mut(&mut self, kind: MetricKind) -> &mut SensorConfig {
        let slot = match kind {
            MetricKind::Temperature => &mut self.temperature,
            MetricKind::Co2 => &mut self.co2,
            MetricKind::Pressure => &mut self.pressure,
        };
        slot.get_or_insert_with(SensorConfig::default)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DisplayConfig {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub driver: Option<DriverKind>,
    /// SPI/GPIO wiring; the Waveshare HAT layout when absent
    pub bus: Option<BusConfig>,
}

impl DisplayConfig {
    pub const DEFAULT_WIDTH: u32 = 250;
    pub const DEFAULT_HEIGHT: u32 = 122;

    pub fn width(&self) -> u32 {
        self.width.unwrap_or(Self::DEFAULT_WIDTH)
    }

    pub fn height(&self) -> u32 {
        self.height.unwrap_or(Self::DEFAULT_HEIGHT)
    }
}

/// SPI device plus the GPIO lines an SSD1680 panel needs (sysfs numbering).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    pub device: String,
    pub speed_hz: Option<u32>,
    pub dc_pin: u64,
    pub rst_pin: u64,
    pub busy_pin: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            device: "/dev/spidev0.0".to_string(),
            speed_hz: Some(4_000_000),
            dc_pin: 25,
            rst_pin: 17,
            busy_pin: 24,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// PBM image file
    File,
    /// 2.13" black/white e-paper
    Ssd1680,
    /// 2.13" black/white/red e-paper, drawn black only
    #[value(name = "ssd1680tricolor")]
    Ssd1680TriColor,
}

/// Where readings come from; exactly one per run.
#[derive(Debug, Clone)]
pub enum SourceConfig {
    Mqtt(MqttSettings),
    Prometheus { url: String, queries: PrometheusQueries },
}

/// CLI overrides. All fields are Options so we can layer them over YAML.
#[derive(Debug, Parser, Clone, Default)]
#[command(
    name = "inkmon",
    version,
    about = "Update eInk paper display with weather metrics",
)]
pub struct Cli {
    /// Path to a YAML config file (overrides search)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// MQTT broker hostname
    #[arg(long)]
    pub hostname: Option<String>,

    /// MQTT broker port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Seconds to sleep between updating the display (at least 180)
    #[arg(short = 't', long)]
    pub timeout: Option<u64>,

    /// Seconds after which metrics are considered stale
    #[arg(long = "metric-timeout", alias = "metric_timeout")]
    pub metric_timeout: Option<u64>,

    /// Instead of updating the display, write the image to a PBM file
    #[arg(short = 'o', long, value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long = "loglevel", alias = "log-level")]
    pub log_level: Option<String>,

    /// Temperature sensor MQTT topic
    #[arg(long = "temp-sensor-topic", alias = "temp_sensor_topic")]
    pub temp_sensor_topic: Option<String>,

    /// Temperature sensor name (JSON field)
    #[arg(long = "temp-sensor-name", alias = "temp_sensor_name")]
    pub temp_sensor_name: Option<String>,

    /// CO2 sensor MQTT topic
    #[arg(long = "co2-sensor-topic", alias = "co2_sensor_topic")]
    pub co2_sensor_topic: Option<String>,

    /// CO2 sensor name (JSON field)
    #[arg(long = "co2-sensor-name", alias = "co2_sensor_name")]
    pub co2_sensor_name: Option<String>,

    /// Barometric pressure sensor MQTT topic
    #[arg(long = "pressure-sensor-topic", alias = "pressure_sensor_topic")]
    pub pressure_sensor_topic: Option<String>,

    /// Barometric pressure sensor name (JSON field)
    #[arg(long = "pressure-sensor-name", alias = "pressure_sensor_name")]
    pub pressure_sensor_name: Option<String>,

    /// Read metrics from a Prometheus server instead of MQTT
    #[arg(long = "prometheus-url", alias = "prometheus_url")]
    pub prometheus_url: Option<String>,

    /// Display driver
    #[arg(long, value_enum)]
    pub driver: Option<DriverKind>,

    /// dump fully merged config (after overrides) and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub dump_config: bool,
}

/// Public entry point: parse CLI, read YAML, merge, validate.
pub fn load() -> Result<Config, ConfigError> {
    let cli = Cli::parse();
    let cfg = load_from(&cli)?;

    if cli.dump_config {
        let s = serde_yaml::to_string(&cfg)?;
        println!("{s}");
        std::process::exit(0);
    }

    Ok(cfg)
}

/// Resolve the YAML file for `cli` and build the effective config.
pub fn load_from(cli: &Cli) -> Result<Config, ConfigError> {
    let file_cfg = match cli.config.as_ref() {
        Some(p) if p.exists() => Some(read_yaml(p)?),
        Some(p) => {
            return Err(ConfigError::Validation(format!(
                "Config file not found: {}",
                p.display()
            )));
        }
        None => find_config_file().map(|p| read_yaml(&p)).transpose()?,
    };
    build(cli, file_cfg)
}

/// defaults -> file -> CLI -> validate
fn build(cli: &Cli, file_cfg: Option<Config>) -> Result<Config, ConfigError> {
    let mut cfg = Config::default();
    if let Some(y) = file_cfg {
        merge(&mut cfg, y);
    }
    apply_cli_overrides(&mut cfg, cli);
    validate(&cfg)?;
    Ok(cfg)
}

/// Try common locations in order (first hit wins).
fn find_config_file() -> Option<PathBuf> {
    if let Some(home) = home_dir() {
        let p = home.join(".config/inkmon/config.yaml");
        if p.exists() { return Some(p) }
        let p = home.join(".config/inkmon.yaml");
        if p.exists() { return Some(p) }
    }
    for candidate in &["inkmon.yaml", "config.yaml", "config/inkmon.yaml"] {
        let p = PathBuf::from(candidate);
        if p.exists() { return Some(p) }
    }
    None
}

fn read_yaml(path: &Path) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&s)?;
    Ok(cfg)
}

fn merge_opt<T>(dst: &mut Option<T>, src: Option<T>) {
    if src.is_some() {
        *dst = src;
    }
}

/// Shallow merge `src` into `dst`, Option-by-Option.
fn merge(dst: &mut Config, src: Config) {
    merge_opt(&mut dst.log_level, src.log_level);
    merge_opt(&mut dst.timeout_secs, src.timeout_secs);
    merge_opt(&mut dst.metric_timeout_secs, src.metric_timeout_secs);
    merge_opt(&mut dst.output, src.output);

    if let Some(s) = src.mqtt {
        let d = dst.mqtt.get_or_insert_with(MqttConfig::default);
        merge_opt(&mut d.hostname, s.hostname);
        merge_opt(&mut d.port, s.port);
        merge_opt(&mut d.client_id, s.client_id);
        merge_opt(&mut d.keep_alive_secs, s.keep_alive_secs);
    }
    if let Some(s) = src.prometheus {
        let d = dst.prometheus.get_or_insert_with(PrometheusConfig::default);
        merge_opt(&mut d.url, s.url);
        merge_opt(&mut d.temperature_query, s.temperature_query);
        merge_opt(&mut d.co2_query, s.co2_query);
        merge_opt(&mut d.pressure_query, s.pressure_query);
    }
    if let Some(s) = src.sensors {
        let d = dst.sensors.get_or_insert_with(SensorsConfig::default);
        for kind in MetricKind::ALL {
            if let Some(sensor) = s.get(kind).cloned() {
                let slot = d.get_mut(kind);
                merge_opt(&mut slot.topic, sensor.topic);
                merge_opt(&mut slot.name, sensor.name);
            }
        }
    }
    match (&mut dst.display, src.display) {
        (None, Some(c)) => dst.display = Some(c),
        (Some(d), Some(s)) => merge_display(d, s),
        _ => {}
    }
}

fn merge_display(dst: &mut DisplayConfig, src: DisplayConfig) {
    merge_opt(&mut dst.width, src.width);
    merge_opt(&mut dst.height, src.height);
    merge_opt(&mut dst.driver, src.driver);
    merge_opt(&mut dst.bus, src.bus);
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) {
    merge_opt(&mut cfg.log_level, cli.log_level.clone());
    merge_opt(&mut cfg.timeout_secs, cli.timeout);
    merge_opt(&mut cfg.metric_timeout_secs, cli.metric_timeout);
    merge_opt(&mut cfg.output, cli.output.clone());

    if cli.hostname.is_some() || cli.port.is_some() {
        let mqtt = cfg.mqtt.get_or_insert_with(MqttConfig::default);
        merge_opt(&mut mqtt.hostname, cli.hostname.clone());
        merge_opt(&mut mqtt.port, cli.port);
    }
    if cli.prometheus_url.is_some() {
        let prom = cfg.prometheus.get_or_insert_with(PrometheusConfig::default);
        merge_opt(&mut prom.url, cli.prometheus_url.clone());
    }

    let sensor_args = [
        (MetricKind::Temperature, &cli.temp_sensor_topic, &cli.temp_sensor_name),
        (MetricKind::Co2, &cli.co2_sensor_topic, &cli.co2_sensor_name),
        (MetricKind::Pressure, &cli.pressure_sensor_topic, &cli.pressure_sensor_name),
    ];
    for (kind, topic, name) in sensor_args {
        if topic.is_none() && name.is_none() {
            continue;
        }
        let slot = cfg.sensors.get_or_insert_with(SensorsConfig::default).get_mut(kind);
        merge_opt(&mut slot.topic, topic.clone());
        merge_opt(&mut slot.name, name.clone());
    }

    if cli.driver.is_some() {
        let display = cfg.display.get_or_insert_with(DisplayConfig::default);
        display.driver = cli.driver;
    }
}

fn has_text(v: &Option<String>) -> bool {
    v.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// Put any invariants here (required fields, ranges, etc.)
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if let Some(level) = cfg.log_level.as_deref() {
        if !LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!("unknown log level {}", level)));
        }
    }

    if cfg.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS) < MIN_TIMEOUT_SECS {
        return Err(ConfigError::Validation(format!(
            "timeout must be at least {} seconds",
            MIN_TIMEOUT_SECS
        )));
    }

    let mqtt = cfg.mqtt.as_ref().is_some_and(|m| has_text(&m.hostname));
    let prom = cfg.prometheus.as_ref().is_some_and(|p| has_text(&p.url));
    match (mqtt, prom) {
        (false, false) => {
            return Err(ConfigError::Validation(
                "no metrics source: give an MQTT hostname or a Prometheus url".into(),
            ));
        }
        (true, true) => {
            return Err(ConfigError::Validation(
                "MQTT hostname and Prometheus url are mutually exclusive".into(),
            ));
        }
        _ => {}
    }

    let sensor = |kind| cfg.sensors.as_ref().and_then(|s| s.get(kind));
    if mqtt {
        for kind in MetricKind::ALL {
            let complete = sensor(kind).is_some_and(|s| has_text(&s.topic) && has_text(&s.name));
            if !complete {
                return Err(ConfigError::Validation(format!(
                    "{} sensor needs both topic and name",
                    kind
                )));
            }
        }
    } else {
        let have_query = cfg.prometheus.as_ref().is_some_and(|p| has_text(&p.temperature_query));
        let have_name = sensor(MetricKind::Temperature).is_some_and(|s| has_text(&s.name));
        if !have_query && !have_name {
            return Err(ConfigError::Validation(
                "Prometheus needs a temperature query or a temperature sensor name".into(),
            ));
        }
    }

    if let Some(display) = cfg.display.as_ref() {
        if display.width() == 0 || display.height() == 0 {
            return Err(ConfigError::Validation("display width/height must be > 0".into()));
        }
    }
    Ok(())
}

impl Config {
    pub fn log_level(&self) -> String {
        self.log_level
            .as_deref()
            .unwrap_or("info")
            .to_ascii_lowercase()
    }

    /// Minimum time between two redraws
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    /// Age after which a sample is no longer shown
    pub fn metric_timeout(&self) -> Duration {
        Duration::from_secs(self.metric_timeout_secs.unwrap_or(DEFAULT_METRIC_TIMEOUT_SECS))
    }

    pub fn display(&self) -> DisplayConfig {
        self.display.clone().unwrap_or_default()
    }

    /// Topic/name per metric; blanks where nothing is configured.
    pub fn sensor_bindings(&self) -> SensorBindings {
        let binding = |kind| {
            let s = self.sensors.as_ref().and_then(|s| s.get(kind));
            SensorBinding::new(
                s.and_then(|s| s.topic.clone()).unwrap_or_default(),
                s.and_then(|s| s.name.clone()).unwrap_or_default(),
            )
        };
        SensorBindings::new(
            binding(MetricKind::Temperature),
            binding(MetricKind::Co2),
            binding(MetricKind::Pressure),
        )
    }

    /// The readings source picked by `validate`
    pub fn source(&self) -> Result<SourceConfig, ConfigError> {
        let host = self
            .mqtt
            .as_ref()
            .and_then(|m| m.hostname.as_ref())
            .filter(|h| !h.trim().is_empty());
        if let Some(host) = host {
            let mqtt = self.mqtt.clone().unwrap_or_default();
            let mut settings = MqttSettings::new(host.clone(), mqtt.port.unwrap_or(DEFAULT_MQTT_PORT));
            if let Some(id) = mqtt.client_id {
                settings.client_id = id;
            }
            settings.keep_alive = Duration::from_secs(mqtt.keep_alive_secs.unwrap_or(DEFAULT_KEEP_ALIVE_SECS));
            return Ok(SourceConfig::Mqtt(settings));
        }

        let prom = self.prometheus.clone().unwrap_or_default();
        let url = prom
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ConfigError::Validation("no metrics source configured".into()))?;
        let temperature_name = self.sensor_bindings().get(MetricKind::Temperature).name.clone();
        let queries = PrometheusQueries {
            temperature: prom
                .temperature_query
                .unwrap_or_else(|| PrometheusQueries::default_temperature(&temperature_name)),
            co2: prom.co2_query.unwrap_or_else(PrometheusQueries::default_co2),
            pressure: prom.pressure_query.unwrap_or_else(PrometheusQueries::default_pressure),
        };
        Ok(SourceConfig::Prometheus { url, queries })
    }
}
