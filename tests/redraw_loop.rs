/*
 *  tests/redraw_loop.rs
 *
 *  Integration tests for the metrics cache and redraw loop
 *
 *  inkmon - weather metrics on e-paper
 *  (c) 2020-26 Stuart Hunter
 */

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{advance, Instant};

use inkmon::display::{
    ColorDepth, DisplayCapabilities, DisplayDriver, DisplayError, FrameBuffer, Panel,
};
use inkmon::loop_cond::CondLimit;
use inkmon::metrics::{
    MetricKind, MetricsAggregator, MetricsSink, ReadingsSnapshot, ReadingsSource, SensorBinding,
    SensorBindings,
};
use inkmon::scheduler::{RedrawScheduler, RedrawTarget};
use inkmon::transport::{Transport, TransportError};

const SECOND: Duration = Duration::from_secs(1);

fn bindings() -> SensorBindings {
    SensorBindings::new(
        SensorBinding::new("home/outside", "temp"),
        SensorBinding::new("home/living", "co2"),
        SensorBinding::new("home/living", "pressure"),
    )
}

/// Keeps the session alive without ever delivering anything.
struct IdleTransport;

#[async_trait]
impl Transport for IdleTransport {
    fn name(&self) -> &str {
        "idle"
    }

    async fn keep_alive(&mut self, _sink: &MetricsSink) -> Result<(), TransportError> {
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Counts polls and returns a fixed snapshot.
struct CountingSource {
    polls: usize,
    readings: ReadingsSnapshot,
}

#[async_trait]
impl ReadingsSource for CountingSource {
    async fn current_readings(&mut self) -> ReadingsSnapshot {
        self.polls += 1;
        self.readings
    }
}

/// Records each snapshot it is asked to draw, with the paused-clock time.
#[derive(Default)]
struct Recorder {
    drawn: Vec<(Duration, ReadingsSnapshot)>,
    fail: bool,
    origin: Option<Instant>,
}

impl RedrawTarget for Recorder {
    fn redraw(&mut self, readings: &ReadingsSnapshot) -> Result<(), DisplayError> {
        if self.fail {
            return Err(DisplayError::SpiError("panel unplugged".to_string()));
        }
        let origin = *self.origin.get_or_insert_with(Instant::now);
        self.drawn.push((Instant::now() - origin, *readings));
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_redraw_every_other_tick_on_strict_boundary() {
    let mut scheduler = RedrawScheduler::new(SECOND).with_tick(SECOND);
    let mut source = CountingSource { polls: 0, readings: ReadingsSnapshot::default() };
    let mut target = Recorder::default();

    let stats = scheduler
        .run(&mut CondLimit::new(3), &mut source, &mut target)
        .await
        .unwrap();

    assert_eq!(stats.iterations, 3);
    assert_eq!(stats.redraws, 2);
    assert_eq!(source.polls, 3);
    let at: Vec<Duration> = target.drawn.iter().map(|(t, _)| *t).collect();
    assert_eq!(at, vec![Duration::ZERO, 2 * SECOND]);
}

#[tokio::test(start_paused = true)]
async fn test_interval_bounds_redraw_count() {
    // 10 polls one second apart, interval 3: draws at t=0, 4, 8
    let mut scheduler = RedrawScheduler::new(3 * SECOND).with_tick(SECOND);
    let mut source = CountingSource { polls: 0, readings: ReadingsSnapshot::default() };
    let mut target = Recorder::default();

    let stats = scheduler
        .run(&mut CondLimit::new(10), &mut source, &mut target)
        .await
        .unwrap();

    assert_eq!(stats.redraws, 3);
    for pair in target.drawn.windows(2) {
        assert!(pair[1].0 - pair[0].0 > 3 * SECOND);
    }
}

#[tokio::test(start_paused = true)]
async fn test_redraw_failure_stops_the_loop() {
    let mut scheduler = RedrawScheduler::new(SECOND).with_tick(SECOND);
    let mut source = CountingSource { polls: 0, readings: ReadingsSnapshot::default() };
    let mut target = Recorder { fail: true, ..Default::default() };
    let mut cond = CondLimit::new(5);

    let res = scheduler.run(&mut cond, &mut source, &mut target).await;

    assert!(matches!(res, Err(DisplayError::SpiError(_))));
    assert_eq!(source.polls, 1);
    assert_eq!(cond.remaining(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_stale_metric_drawn_as_missing() {
    let mut aggregator = MetricsAggregator::new(Box::new(IdleTransport), bindings(), 8 * SECOND);
    aggregator.on_update("home/outside", br#"{"temp": 21.5}"#);
    aggregator.on_update("home/living", br#"{"co2": "640", "pressure": 1009.4}"#);

    let mut scheduler = RedrawScheduler::new(4 * SECOND).with_tick(SECOND);
    let mut target = Recorder::default();

    // draws at t=0, 5, 10; the samples were taken at t=0 and age out after 8 s
    scheduler
        .run(&mut CondLimit::new(3), &mut aggregator, &mut target)
        .await
        .unwrap();
    advance(SECOND).await;
    scheduler
        .run(&mut CondLimit::new(10), &mut aggregator, &mut target)
        .await
        .unwrap();

    let first = target.drawn.first().unwrap().1;
    assert_eq!(first.temperature, Some(21.5));
    assert_eq!(first.co2, Some(640.0));
    assert!(first.is_complete());

    let (at, last) = *target.drawn.last().unwrap();
    assert_eq!(at, 10 * SECOND);
    assert_eq!(last, ReadingsSnapshot::default());
    assert_eq!(target.drawn[1].1.temperature, Some(21.5));
}

#[tokio::test(start_paused = true)]
async fn test_value_from_other_thread_is_drawn() {
    let mut aggregator = MetricsAggregator::new(Box::new(IdleTransport), bindings(), 1800 * SECOND);
    let sink = aggregator.sink();

    std::thread::spawn(move || {
        sink.on_update("home/outside", br#"{"temp": -4.2}"#);
        sink.on_value(MetricKind::Pressure, 1021.0);
    })
    .join()
    .unwrap();

    let readings = aggregator.current_readings().await;
    assert_eq!(readings.temperature, Some(-4.2));
    assert_eq!(readings.pressure, Some(1021.0));
    assert_eq!(readings.co2, None);
    assert_eq!(readings.missing(), vec![MetricKind::Co2]);
}

/// Display driver that keeps every frame pushed to it.
struct FrameLog {
    capabilities: DisplayCapabilities,
    frames: Arc<Mutex<Vec<FrameBuffer>>>,
}

impl DisplayDriver for FrameLog {
    fn capabilities(&self) -> &DisplayCapabilities {
        &self.capabilities
    }

    fn init(&mut self) -> Result<(), DisplayError> {
        Ok(())
    }

    fn update(&mut self, frame: &FrameBuffer) -> Result<(), DisplayError> {
        self.frames.lock().unwrap().push(frame.clone());
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_panel_end_to_end() {
    let frames = Arc::new(Mutex::new(Vec::new()));
    let driver = FrameLog {
        capabilities: DisplayCapabilities {
            name: "log",
            width: 250,
            height: 122,
            color_depth: ColorDepth::Monochrome,
            is_physical: false,
        },
        frames: Arc::clone(&frames),
    };
    let mut panel = Panel::new(Box::new(driver));
    panel.init().unwrap();

    let mut aggregator = MetricsAggregator::new(Box::new(IdleTransport), bindings(), 1800 * SECOND);
    aggregator.on_update("home/outside", br#"{"temp": 18}"#);

    let mut scheduler = RedrawScheduler::new(180 * SECOND);
    let stats = scheduler
        .run(&mut CondLimit::new(5), &mut aggregator, &mut panel)
        .await
        .unwrap();

    assert_eq!(stats.redraws, 1);
    let frames = frames.lock().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].dimensions(), (250, 122));
    assert!(frames[0].count_on_pixels() > 0);
}
