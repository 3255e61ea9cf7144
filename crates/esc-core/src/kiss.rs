//! KISS ESC telemetry: one 10-byte frame per request at 115200 baud.
//!
//! | byte | field                |
//! |------|----------------------|
//! | 0    | temperature (°C)     |
//! | 1-2  | voltage (0.01 V)     |
//! | 3-4  | current (0.01 A)     |
//! | 5-6  | consumption (mAh)    |
//! | 7-8  | eRPM / 100           |
//! | 9    | CRC8 over bytes 0-8  |

use crate::crc8::crc8;
use crate::error::FrameError;
use crate::frame_buffer::{FrameBuffer, FrameReceiver};
use crate::hal::MotorDriver;
use crate::sample::{EscSensorStore, Reading};
use crate::tags::{self, slot_value, DebugChannels, TelemetryStats};
use log::{debug, trace};
use std::sync::Arc;

pub const KISS_FRAME_SIZE: usize = 10;
/// Let the ESCs boot before the first request.
pub const ESC_BOOT_TIME_MS: u64 = 5_000;
/// A transfer takes about 900 µs; anything past this is a lost reply.
pub const ESC_REQUEST_TIMEOUT_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Pending,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KissFrame {
    pub temperature: u8,
    pub voltage: u16,
    pub current: u16,
    pub consumption: u16,
    pub rpm: u16,
}

impl KissFrame {
    pub fn parse(raw: &[u8; KISS_FRAME_SIZE]) -> Result<Self, FrameError> {
        let expected = crc8(&raw[..KISS_FRAME_SIZE - 1]);
        let actual = raw[KISS_FRAME_SIZE - 1];
        if expected != actual {
            return Err(FrameError::CrcMismatch { expected, actual });
        }
        Ok(Self {
            temperature: raw[0],
            voltage: u16::from_be_bytes([raw[1], raw[2]]),
            current: u16::from_be_bytes([raw[3], raw[4]]),
            consumption: u16::from_be_bytes([raw[5], raw[6]]),
            rpm: u16::from_be_bytes([raw[7], raw[8]]),
        })
    }

    /// Wire image with a trailing CRC, as an ESC would send it.
    pub fn to_bytes(&self) -> [u8; KISS_FRAME_SIZE] {
        let mut raw = [0u8; KISS_FRAME_SIZE];
        raw[0] = self.temperature;
        raw[1..3].copy_from_slice(&self.voltage.to_be_bytes());
        raw[3..5].copy_from_slice(&self.current.to_be_bytes());
        raw[5..7].copy_from_slice(&self.consumption.to_be_bytes());
        raw[7..9].copy_from_slice(&self.rpm.to_be_bytes());
        raw[9] = crc8(&raw[..KISS_FRAME_SIZE - 1]);
        raw
    }

    fn reading(&self) -> Reading {
        Reading {
            temperature: i16::from(self.temperature),
            voltage: i32::from(self.voltage),
            current: i32::from(self.current),
            consumption: i32::from(self.consumption),
            rpm: i32::from(self.rpm),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerState {
    #[default]
    Startup,
    Pending,
}

/// Round-robin request/response poller. One motor is in flight at a time.
pub struct KissPoller {
    frame: Arc<FrameBuffer>,
    trigger: TriggerState,
    motor: usize,
    request_ms: u64,
    stats: TelemetryStats,
}

impl KissPoller {
    pub fn new() -> Self {
        Self {
            frame: Arc::new(FrameBuffer::new()),
            trigger: TriggerState::Startup,
            motor: 0,
            request_ms: 0,
            stats: TelemetryStats::default(),
        }
    }

    /// Producer handle for the serial receive callback.
    pub fn receiver(&self) -> FrameReceiver {
        FrameReceiver::new(Arc::clone(&self.frame))
    }

    pub fn current_motor(&self) -> usize {
        self.motor
    }

    pub fn trigger_state(&self) -> TriggerState {
        self.trigger
    }

    pub fn stats(&self) -> TelemetryStats {
        self.stats
    }

    pub fn bytes_read(&self) -> usize {
        self.frame.bytes_read()
    }

    /// Decode the armed frame into the record of the motor in flight.
    pub fn decode(&mut self, store: &mut EscSensorStore, dbg: &mut DebugChannels) -> FrameState {
        if !self.frame.is_complete() {
            return FrameState::Pending;
        }

        let raw = self.frame.snapshot::<KISS_FRAME_SIZE>();
        match KissFrame::parse(&raw) {
            Ok(frame) => {
                store.update(self.motor, frame.reading());
                self.stats.frames_decoded = self.stats.frames_decoded.wrapping_add(1);
                dbg.set_rpm(self.motor, i32::from(frame.rpm));
                dbg.set_temperature(self.motor, i32::from(frame.temperature));
                trace!("kiss frame from motor {}: rpm {}", self.motor, frame.rpm);
                FrameState::Complete
            }
            Err(err) => {
                debug!("kiss frame from motor {} rejected: {}", self.motor, err);
                FrameState::Failed
            }
        }
    }

    pub fn process<D: MotorDriver + ?Sized>(
        &mut self,
        now_us: u64,
        driver: &mut D,
        store: &mut EscSensorStore,
        dbg: &mut DebugChannels,
    ) {
        let now_ms = now_us / 1000;
        let motor_count = store.motor_count();

        match self.trigger {
            TriggerState::Startup => {
                if now_ms >= ESC_BOOT_TIME_MS {
                    self.request(now_ms, driver, dbg);
                }
            }
            TriggerState::Pending => {
                if now_ms < self.request_ms.saturating_add(ESC_REQUEST_TIMEOUT_MS) {
                    match self.decode(store, dbg) {
                        FrameState::Complete => {
                            self.select_next(motor_count);
                            self.request(now_ms, driver, dbg);
                        }
                        FrameState::Failed => {
                            store.increase_data_age(self.motor);
                            self.select_next(motor_count);
                            self.request(now_ms, driver, dbg);
                            self.stats.crc_errors = self.stats.crc_errors.wrapping_add(1);
                            dbg.set(tags::NUM_CRC_ERRORS, slot_value(self.stats.crc_errors));
                        }
                        FrameState::Pending => {}
                    }
                } else {
                    // Move on; this motor comes around again next cycle.
                    debug!(
                        "kiss request to motor {} timed out after {} bytes",
                        self.motor,
                        self.frame.bytes_read()
                    );
                    store.increase_data_age(self.motor);
                    self.select_next(motor_count);
                    self.request(now_ms, driver, dbg);
                    self.stats.timeouts = self.stats.timeouts.wrapping_add(1);
                    dbg.set(tags::NUM_TIMEOUTS, slot_value(self.stats.timeouts));
                }
            }
        }
    }

    fn select_next(&mut self, motor_count: usize) {
        self.motor += 1;
        if self.motor >= motor_count {
            self.motor = 0;
        }
    }

    fn request<D: MotorDriver + ?Sized>(&mut self, now_ms: u64, driver: &mut D, dbg: &mut DebugChannels) {
        self.frame.start_capture(KISS_FRAME_SIZE);
        driver.request_telemetry(self.motor);
        self.trigger = TriggerState::Pending;
        self.request_ms = now_ms;
        dbg.set(tags::MOTOR_INDEX, slot_value(self.motor + 1));
    }
}

impl Default for KissPoller {
    fn default() -> Self {
        Self::new()
    }
}
