use crate::metrics::{TICKS_EXECUTED, TICKS_MISSED, TICK_DURATION_US};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::error::RuntimeError;
use crate::runtime::logging::init_tracing;
use crate::runtime::telemetry::{self, Publisher, TelemetrySnapshot};
use esc_core::hal_sim::{FaultProfile, SimulatedHw4Esc, SimulatedKissBus, SimulatedMotors};
use esc_core::{
    port_options, CallbackOnlyPort, Clock, EscProtocol, EscSample, EscSensor, EscSensorConfig,
    TelemetryStats, TimeBase, MAX_SUPPORTED_MOTORS,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Exporters are refreshed at this rate regardless of the tick rate.
const PUBLISH_INTERVAL: Duration = Duration::from_millis(100);

/// A sensor wired to its simulated ESC hardware.
enum SimulatedLink {
    Kiss(EscSensor<SimulatedKissBus, CallbackOnlyPort>),
    Hw4(EscSensor<SimulatedMotors, SimulatedHw4Esc>),
}

impl SimulatedLink {
    fn open(sensor_config: &EscSensorConfig, config: &RuntimeConfig) -> Self {
        let faults = FaultProfile {
            drop_rate: config.drop_rate,
            corrupt_rate: config.corrupt_rate,
        };
        match sensor_config.protocol {
            EscProtocol::Kiss => {
                let motors = config.motors.clamp(1, MAX_SUPPORTED_MOTORS);
                let bus = SimulatedKissBus::new(motors).with_faults(faults, config.seed);
                let mut sensor = EscSensor::new(sensor_config, bus, Some(CallbackOnlyPort));
                if let Some(receiver) = sensor.frame_receiver() {
                    sensor.driver_mut().attach(receiver);
                }
                Self::Kiss(sensor)
            }
            EscProtocol::Hw4 => {
                if config.motors > 1 {
                    warn!(
                        motors = config.motors,
                        "Hobbywing V4 reports a single ESC; extra motors are ignored"
                    );
                }
                let esc = SimulatedHw4Esc::cruising()
                    .with_faults(faults, config.seed)
                    .with_signature_every(50);
                Self::Hw4(EscSensor::new(
                    sensor_config,
                    SimulatedMotors::new(1),
                    Some(esc),
                ))
            }
        }
    }

    fn tick(&mut self, now_us: u64) {
        match self {
            Self::Kiss(sensor) => {
                sensor.driver_mut().step(now_us);
                sensor.process(now_us);
            }
            Self::Hw4(sensor) => {
                if let Some(esc) = sensor.port_mut() {
                    esc.step(now_us);
                }
                sensor.process(now_us);
            }
        }
    }

    fn snapshot(&mut self) -> TelemetrySnapshot {
        match self {
            Self::Kiss(sensor) => TelemetrySnapshot::capture(sensor),
            Self::Hw4(sensor) => TelemetrySnapshot::capture(sensor),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub ticks_executed: u64,
    pub ticks_missed: u64,
    pub stats: TelemetryStats,
    pub combined: EscSample,
}

pub fn run_from_args() -> Result<(), RuntimeError> {
    let config = RuntimeConfig::from_env();
    if config.show_help {
        RuntimeConfig::print_help();
        return Ok(());
    }
    run(config).map(|_| ())
}

pub fn run(config: RuntimeConfig) -> Result<RunSummary, RuntimeError> {
    let _log_guard = init_tracing(config.json_logs, config.log_dir.as_deref())?;
    for warning in &config.warnings {
        warn!("{}", warning);
    }

    let sensor_config = config.sensor_config()?;

    telemetry::init();
    let _metrics_handle = telemetry::start_metrics_server(&config.metrics_addr);

    let options = port_options(&sensor_config);
    info!(
        protocol = ?sensor_config.protocol,
        baud_rate = options.baud_rate,
        bidirectional = options.bidirectional,
        rx_callback = options.rx_callback,
        update_hz = sensor_config.update_hz,
        "Opening simulated ESC telemetry link"
    );

    let link = SimulatedLink::open(&sensor_config, &config);
    let stop = Arc::new(AtomicBool::new(false));
    let stop_acq = Arc::clone(&stop);
    let period = Duration::from_micros(1_000_000 / u64::from(sensor_config.update_hz));

    let acq_handle = thread::spawn(move || acquisition_loop(link, period, &stop_acq));

    info!("esc-sensor running");

    if let Some(seconds) = config.run_seconds {
        info!(seconds, "Running for limited duration");
        thread::sleep(Duration::from_secs(seconds));
        stop.store(true, Ordering::Relaxed);
    }

    let summary = acq_handle
        .join()
        .map_err(|_| RuntimeError::AcquisitionPanicked)?;

    info!(
        ticks_executed = summary.ticks_executed,
        ticks_missed = summary.ticks_missed,
        frames_decoded = summary.stats.frames_decoded,
        timeouts = summary.stats.timeouts,
        crc_errors = summary.stats.crc_errors,
        data_age = summary.combined.data_age,
        voltage = summary.combined.voltage,
        current = summary.combined.current,
        consumption = summary.combined.consumption,
        rpm = summary.combined.rpm,
        "Run complete"
    );
    Ok(summary)
}

fn acquisition_loop(mut link: SimulatedLink, period: Duration, stop: &AtomicBool) -> RunSummary {
    let timebase = TimeBase::new();
    let mut publisher = Publisher::default();
    let mut ticks_executed = 0u64;
    let mut ticks_missed = 0u64;
    let mut next_tick = Instant::now();
    let mut next_publish = next_tick;

    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now < next_tick {
            thread::sleep(next_tick - now);
        } else if now.duration_since(next_tick) >= period {
            ticks_missed += 1;
            TICKS_MISSED.inc();
            // Skip ahead instead of bursting to catch up.
            next_tick = now;
        }

        let tick_start = Instant::now();
        link.tick(timebase.now_us());
        TICK_DURATION_US.observe(tick_start.elapsed().as_micros() as f64);
        TICKS_EXECUTED.inc();
        ticks_executed += 1;

        if tick_start >= next_publish {
            publisher.publish(&link.snapshot());
            next_publish = tick_start + PUBLISH_INTERVAL;
        }
        next_tick += period;
    }

    let snapshot = link.snapshot();
    publisher.publish(&snapshot);
    RunSummary {
        ticks_executed,
        ticks_missed,
        stats: snapshot.stats,
        combined: snapshot.combined,
    }
}
