/*
 *  main.rs
 *
 *  inkmon - weather metrics on e-paper
 *  (c) 2020-26 Stuart Hunter
 *
 *  Poll temperature, CO2 and pressure; refresh the e-paper panel
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

use anyhow::{Context, Result};
use env_logger::Env;
use log::{info, warn};
use tokio::signal::unix::{signal, SignalKind};

use inkmon::config::{self, Config, SourceConfig};
use inkmon::display::{DisplayDriverFactory, Panel};
use inkmon::loop_cond::CondInfinite;
use inkmon::metrics::MetricsAggregator;
use inkmon::scheduler::{wait_for_readings, RedrawScheduler, RedrawTarget, POLL_TICK};
use inkmon::transport::{BoxedTransport, MqttTransport, PrometheusTransport};

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

/// Asynchronously waits for a SIGINT, SIGTERM, or SIGHUP signal.
async fn signal_handler() -> std::io::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received. Initiating graceful shutdown.");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received. Initiating graceful shutdown.");
        }
        _ = sighup.recv() => {
            info!("SIGHUP received. Initiating graceful shutdown.");
        }
    }
    Ok(())
}

async fn connect(source: SourceConfig, topics: Vec<String>) -> Result<BoxedTransport> {
    Ok(match source {
        SourceConfig::Mqtt(settings) => {
            let transport = MqttTransport::connect(&settings, topics)
                .await
                .with_context(|| format!("cannot connect to {}:{}", settings.hostname, settings.port))?;
            Box::new(transport)
        }
        SourceConfig::Prometheus { url, queries } => {
            info!("Querying Prometheus at {}", url);
            Box::new(PrometheusTransport::new(&url, queries).context("cannot create HTTP client")?)
        }
    })
}

/// Everything after the display is up: connect, wait for the first
/// readings, then render once (`--output`) or keep redrawing.
async fn run(cfg: &Config, panel: &mut Panel) -> Result<()> {
    let bindings = cfg.sensor_bindings();
    let transport = connect(cfg.source()?, bindings.topics()).await?;
    let mut aggregator = MetricsAggregator::new(transport, bindings, cfg.metric_timeout());

    // one attempt per tick for up to the redraw interval
    let attempts = cfg.timeout().as_secs() as usize;
    let readings = wait_for_readings(&mut aggregator, attempts, POLL_TICK).await;

    if cfg.output.is_some() {
        panel.redraw(&readings).context("cannot render image")?;
        return Ok(());
    }

    let mut scheduler = RedrawScheduler::new(cfg.timeout());
    let stats = scheduler
        .run(&mut CondInfinite, &mut aggregator, panel)
        .await
        .context("display update failed")?;
    info!("Redraw loop ended after {} iterations, {} redraws", stats.iterations, stats.redraws);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = config::load().context("invalid configuration")?;

    env_logger::Builder::from_env(Env::default().default_filter_or(cfg.log_level()))
        .format_timestamp_secs()
        .init();

    info!("{} v.{} built {} ({})", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"), BUILD_DATE, BUILD_PROFILE);

    // display first: no point waiting for metrics without one
    let driver = DisplayDriverFactory::create_from_config(&cfg.display(), cfg.output.as_deref())
        .context("cannot create display")?;
    let mut panel = Panel::new(driver);
    panel.init().context("display initialization failed")?;

    tokio::select! {
        res = run(&cfg, &mut panel) => res?,
        sig = signal_handler() => {
            sig.context("cannot install signal handlers")?;
        }
    }

    if let Err(e) = panel.sleep() {
        warn!("Cannot put display to sleep: {}", e);
    }
    Ok(())
}
