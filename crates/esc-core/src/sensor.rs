use crate::config::{EscProtocol, EscSensorConfig};
use crate::frame_buffer::FrameReceiver;
use crate::hal::{MotorDriver, SerialPort};
use crate::hw4::{Hw4Calibration, Hw4Decoder};
use crate::kiss::KissPoller;
use crate::sample::{EscSample, EscSensorStore};
use crate::tags::{self, DebugChannels, TelemetryStats};
use log::info;

/// Raw index that selects the combined record.
pub const ESC_SENSOR_COMBINED: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscSensorIndex {
    Motor(usize),
    Combined,
}

impl From<u8> for EscSensorIndex {
    fn from(raw: u8) -> Self {
        if raw == ESC_SENSOR_COMBINED {
            Self::Combined
        } else {
            Self::Motor(usize::from(raw))
        }
    }
}

/// The protocol chosen at start-up. Never changes afterwards.
pub enum ProtocolEngine {
    Kiss(KissPoller),
    Hw4(Hw4Decoder),
}

impl ProtocolEngine {
    pub fn from_config(config: &EscSensorConfig) -> Self {
        match config.protocol {
            EscProtocol::Kiss => Self::Kiss(KissPoller::new()),
            EscProtocol::Hw4 => Self::Hw4(Hw4Decoder::new(Hw4Calibration::from_config(config))),
        }
    }

    pub fn protocol(&self) -> EscProtocol {
        match self {
            Self::Kiss(_) => EscProtocol::Kiss,
            Self::Hw4(_) => EscProtocol::Hw4,
        }
    }

    pub fn stats(&self) -> TelemetryStats {
        match self {
            Self::Kiss(poller) => poller.stats(),
            Self::Hw4(decoder) => decoder.stats(),
        }
    }

    pub fn bytes_read(&self) -> usize {
        match self {
            Self::Kiss(poller) => poller.bytes_read(),
            Self::Hw4(decoder) => decoder.bytes_read(),
        }
    }
}

/// Telemetry front end: owns the engine, the records and the collaborators.
///
/// `port` is `None` when the telemetry UART could not be opened; the sensor
/// then stays inactive and every tick is a no-op.
pub struct EscSensor<D: MotorDriver, P: SerialPort> {
    engine: ProtocolEngine,
    driver: D,
    port: Option<P>,
    store: EscSensorStore,
    debug: DebugChannels,
}

impl<D: MotorDriver, P: SerialPort> EscSensor<D, P> {
    pub fn new(config: &EscSensorConfig, driver: D, port: Option<P>) -> Self {
        let engine = ProtocolEngine::from_config(config);
        let store = EscSensorStore::new(driver.motor_count());
        info!(
            "esc sensor: {:?} protocol, {} motors, link {}",
            engine.protocol(),
            store.motor_count(),
            if port.is_some() { "open" } else { "closed" }
        );
        Self {
            engine,
            driver,
            port,
            store,
            debug: DebugChannels::default(),
        }
    }

    /// Receive-callback handle for KISS; HW4 reads the port itself.
    pub fn frame_receiver(&self) -> Option<FrameReceiver> {
        match &self.engine {
            ProtocolEngine::Kiss(poller) => Some(poller.receiver()),
            ProtocolEngine::Hw4(_) => None,
        }
    }

    /// One periodic tick. Runs exactly one protocol engine.
    pub fn process(&mut self, now_us: u64) {
        let Some(port) = self.port.as_mut() else {
            return;
        };
        if !self.driver.motors_enabled() {
            return;
        }

        match &mut self.engine {
            ProtocolEngine::Kiss(poller) => {
                poller.process(now_us, &mut self.driver, &mut self.store, &mut self.debug)
            }
            ProtocolEngine::Hw4(decoder) => {
                decoder.process(now_us, port, &mut self.store, &mut self.debug)
            }
        }
    }

    /// KISS: a motor record, or the combined record for
    /// [`EscSensorIndex::Combined`]. Rebuilding the combined record also
    /// publishes its age on the data-age debug channel. HW4 has a single
    /// record and returns it for any index.
    pub fn sample(&mut self, index: EscSensorIndex) -> Option<EscSample> {
        match (&self.engine, index) {
            (ProtocolEngine::Hw4(_), _) => Some(*self.store.primary()),
            (ProtocolEngine::Kiss(_), EscSensorIndex::Motor(motor)) => {
                self.store.get(motor).copied()
            }
            (ProtocolEngine::Kiss(_), EscSensorIndex::Combined) => {
                let before = self.store.recomputations();
                let combined = *self.store.combined();
                if self.store.recomputations() != before {
                    self.debug.set(tags::DATA_AGE, i32::from(combined.data_age));
                }
                Some(combined)
            }
        }
    }

    /// Reported eRPM of one motor, 0 when out of range.
    pub fn rpm(&self, motor: usize) -> i32 {
        self.store.get(motor).map_or(0, |s| s.rpm)
    }

    pub fn is_active(&self) -> bool {
        self.port.is_some()
    }

    pub fn bytes_read(&self) -> usize {
        self.engine.bytes_read()
    }

    pub fn stats(&self) -> TelemetryStats {
        self.engine.stats()
    }

    pub fn debug(&self) -> &DebugChannels {
        &self.debug
    }

    pub fn protocol(&self) -> EscProtocol {
        self.engine.protocol()
    }

    pub fn store(&self) -> &EscSensorStore {
        &self.store
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn port_mut(&mut self) -> Option<&mut P> {
        self.port.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::CallbackOnlyPort;
    use crate::kiss::ESC_BOOT_TIME_MS;
    use crate::sample::DATA_AGE_INVALID;

    struct Motors {
        count: usize,
        enabled: bool,
        requests: usize,
    }

    impl MotorDriver for Motors {
        fn motor_count(&self) -> usize {
            self.count
        }

        fn motors_enabled(&self) -> bool {
            self.enabled
        }

        fn request_telemetry(&mut self, _motor: usize) {
            self.requests += 1;
        }
    }

    fn motors(count: usize, enabled: bool) -> Motors {
        Motors {
            count,
            enabled,
            requests: 0,
        }
    }

    #[test]
    fn raw_index_maps_combined() {
        assert_eq!(EscSensorIndex::from(255), EscSensorIndex::Combined);
        assert_eq!(EscSensorIndex::from(3), EscSensorIndex::Motor(3));
    }

    #[test]
    fn closed_link_is_inactive_noop() {
        let cfg = EscSensorConfig::default();
        let mut sensor = EscSensor::<_, CallbackOnlyPort>::new(&cfg, motors(4, true), None);
        assert!(!sensor.is_active());
        sensor.process(ESC_BOOT_TIME_MS * 1000);
        assert_eq!(sensor.driver().requests, 0);
    }

    #[test]
    fn disabled_motors_are_noop() {
        let cfg = EscSensorConfig::default();
        let mut sensor = EscSensor::new(&cfg, motors(4, false), Some(CallbackOnlyPort));
        sensor.process(ESC_BOOT_TIME_MS * 1000);
        assert_eq!(sensor.driver().requests, 0);

        sensor.driver_mut().enabled = true;
        sensor.process(ESC_BOOT_TIME_MS * 1000);
        assert_eq!(sensor.driver().requests, 1);
    }

    #[test]
    fn kiss_index_rules() {
        let cfg = EscSensorConfig::default();
        let mut sensor = EscSensor::new(&cfg, motors(2, true), Some(CallbackOnlyPort));
        assert!(sensor.frame_receiver().is_some());
        assert!(sensor.sample(EscSensorIndex::Motor(1)).is_some());
        assert!(sensor.sample(EscSensorIndex::Motor(2)).is_none());
        let combined = sensor.sample(EscSensorIndex::Combined).unwrap();
        assert_eq!(combined.data_age, DATA_AGE_INVALID);
        assert_eq!(sensor.rpm(7), 0);
    }

    #[test]
    fn kiss_combined_rebuild_publishes_data_age() {
        let cfg = EscSensorConfig::default();
        let mut sensor = EscSensor::new(&cfg, motors(2, true), Some(CallbackOnlyPort));
        assert_eq!(sensor.debug().get(tags::DATA_AGE), 0);

        let combined = sensor.sample(EscSensorIndex::Combined).unwrap();
        assert_eq!(
            sensor.debug().get(tags::DATA_AGE),
            i32::from(combined.data_age)
        );
        assert_eq!(
            sensor.debug().get(tags::DATA_AGE),
            i32::from(DATA_AGE_INVALID)
        );
    }

    #[test]
    fn hw4_always_returns_primary_record() {
        let cfg = EscSensorConfig {
            protocol: EscProtocol::Hw4,
            ..Default::default()
        };
        let mut sensor = EscSensor::new(&cfg, motors(2, true), Some(CallbackOnlyPort));
        assert_eq!(sensor.protocol(), EscProtocol::Hw4);
        assert!(sensor.frame_receiver().is_none());
        let a = sensor.sample(EscSensorIndex::Motor(5));
        let b = sensor.sample(EscSensorIndex::Combined);
        assert_eq!(a, b);
        assert!(a.is_some());
    }
}
