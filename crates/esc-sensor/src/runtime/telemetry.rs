use crate::metrics::{
    init_metrics, serve_metrics, COMBINED_CONSUMPTION_MAH, COMBINED_CURRENT_A,
    COMBINED_DATA_AGE, COMBINED_RPM, COMBINED_TEMPERATURE_C, COMBINED_VOLTAGE_V, CRC_ERRORS,
    DEBUG_CHANNELS, FRAMES_DECODED, LINK_ACTIVE, MOTOR_DATA_AGE, MOTOR_RPM,
    MOTOR_TEMPERATURE_C, TIMEOUTS,
};
use esc_core::{
    DebugChannels, EscSample, EscSensor, EscSensorIndex, MotorDriver, SerialPort, TelemetryStats,
    MAX_SUPPORTED_MOTORS,
};
use std::thread;
use tracing::info;

pub fn init() {
    init_metrics();
}

pub fn start_metrics_server(addr: &Option<String>) -> Option<thread::JoinHandle<()>> {
    addr.as_ref().map(|addr| {
        info!(addr = %addr, "Starting metrics server");
        serve_metrics(addr.clone())
    })
}

/// Everything the exporters need from one sensor, copied out in one go.
#[derive(Debug, Clone, Copy)]
pub struct TelemetrySnapshot {
    pub active: bool,
    pub stats: TelemetryStats,
    pub debug: DebugChannels,
    pub combined: EscSample,
    pub motor_count: usize,
    pub motors: [EscSample; MAX_SUPPORTED_MOTORS],
}

impl TelemetrySnapshot {
    pub fn capture<D: MotorDriver, P: SerialPort>(sensor: &mut EscSensor<D, P>) -> Self {
        let motor_count = sensor.store().motor_count();
        let mut motors = [EscSample::INVALID; MAX_SUPPORTED_MOTORS];
        for (motor, slot) in motors.iter_mut().enumerate().take(motor_count) {
            if let Some(sample) = sensor.sample(EscSensorIndex::Motor(motor)) {
                *slot = sample;
            }
        }
        // Reading the combined record can refresh the data-age debug channel.
        let combined = sensor
            .sample(EscSensorIndex::Combined)
            .unwrap_or(EscSample::INVALID);
        Self {
            active: sensor.is_active(),
            stats: sensor.stats(),
            debug: *sensor.debug(),
            combined,
            motor_count,
            motors,
        }
    }
}

/// Pushes snapshots into the Prometheus statics. Engine counters are
/// cumulative, so only the growth since the last publish is added.
#[derive(Debug, Default)]
pub struct Publisher {
    last: TelemetryStats,
}

impl Publisher {
    pub fn publish(&mut self, snapshot: &TelemetrySnapshot) {
        let stats = snapshot.stats;
        FRAMES_DECODED.inc_by(u64::from(
            stats.frames_decoded.wrapping_sub(self.last.frames_decoded),
        ));
        TIMEOUTS.inc_by(u64::from(stats.timeouts.wrapping_sub(self.last.timeouts)));
        CRC_ERRORS.inc_by(u64::from(stats.crc_errors.wrapping_sub(self.last.crc_errors)));
        self.last = stats;

        LINK_ACTIVE.set(i64::from(snapshot.active));
        for (gauge, value) in DEBUG_CHANNELS.iter().zip(snapshot.debug.sensor) {
            gauge.set(i64::from(value));
        }

        for (motor, sample) in snapshot.motors[..snapshot.motor_count].iter().enumerate() {
            let label = motor.to_string();
            MOTOR_RPM.with_label_values(&[label.as_str()]).set(i64::from(sample.rpm));
            MOTOR_TEMPERATURE_C
                .with_label_values(&[label.as_str()])
                .set(i64::from(sample.temperature));
            MOTOR_DATA_AGE
                .with_label_values(&[label.as_str()])
                .set(i64::from(sample.data_age));
        }

        let combined = snapshot.combined;
        COMBINED_VOLTAGE_V.set(f64::from(combined.voltage) / 100.0);
        COMBINED_CURRENT_A.set(f64::from(combined.current) / 100.0);
        COMBINED_CONSUMPTION_MAH.set(i64::from(combined.consumption));
        COMBINED_TEMPERATURE_C.set(i64::from(combined.temperature));
        COMBINED_RPM.set(i64::from(combined.rpm));
        COMBINED_DATA_AGE.set(i64::from(combined.data_age));
    }
}
