//! Hobbywing V4 telemetry: a free-running 19200 baud stream of 19-byte
//! packets with no checksum.
//!
//! | byte  | field                    |
//! |-------|--------------------------|
//! | 0     | sync 0x9B                |
//! | 1-3   | packet counter           |
//! | 4-5   | throttle                 |
//! | 6-7   | PWM                      |
//! | 8-10  | eRPM                     |
//! | 11-12 | voltage ADC              |
//! | 13-14 | current ADC              |
//! | 15-16 | FET temperature ADC      |
//! | 17-18 | BEC temperature ADC      |
//!
//! Voltage gain by model: LV 110, LVv2 154, HV 210. Current gain by rating:
//! 60A 60, 80A 78, 100A 90, 120A 100, 130A 113, 150A 129, 160A 137, 200A 169.

use crate::config::EscSensorConfig;
use crate::error::FrameError;
use crate::hal::SerialPort;
use crate::sample::{EscSensorStore, Reading};
use crate::tags::{self, slot_value, DebugChannels, TelemetryStats};
use log::{debug, trace};

pub const HW4_SYNC_BYTE: u8 = 0x9B;
pub const HW4_PACKET_SIZE: usize = 19;
/// Bytes that follow a doubled sync byte and carry no telemetry.
pub const HW4_SIGNATURE_SKIP: u8 = 11;
pub const HW4_DATA_AGE_WINDOW_US: u64 = 250_000;

const V_REF: f32 = 3.3;
const ADC_RESOLUTION: f32 = 4096.0;
const DIFFAMP_SHUNT: f32 = 0.000_25;
const NTC_BETA: f32 = 3950.0;
const NTC_R1: f32 = 10_000.0;
const NTC_R_REF: f32 = 47_000.0;

/// Raw RPM below which the ESC's latched current reading is discarded.
const CURRENT_RPM_THRESHOLD: u32 = 100;
const CURRENT_THROTTLE_THRESHOLD: u16 = 50;

/// mA·µs per mAh.
const CONSUMPTION_DIVISOR: f64 = 3_600e6;

/// (offset, exclusive upper bound) of the high bytes that must stay small.
const PLAUSIBILITY_BOUNDS: [(usize, u8); 7] = [
    (4, 4),
    (6, 4),
    (8, 4),
    (11, 0x0F),
    (13, 0x0F),
    (15, 0x0F),
    (17, 0x0F),
];

pub type RawPacket = [u8; HW4_PACKET_SIZE];

/// Reassembles packets out of the byte stream.
#[derive(Debug, Clone)]
pub struct StreamSynchronizer {
    data: RawPacket,
    bytes_read: usize,
    skip_bytes: u8,
}

impl StreamSynchronizer {
    pub fn new() -> Self {
        Self {
            data: [0; HW4_PACKET_SIZE],
            bytes_read: 0,
            skip_bytes: 0,
        }
    }

    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    /// Feed one byte; returns a packet once 19 bytes from a sync byte on
    /// have been collected.
    pub fn push(&mut self, byte: u8) -> Option<RawPacket> {
        if self.skip_bytes > 0 {
            self.skip_bytes -= 1;
        } else if self.bytes_read == 0 && byte == HW4_SYNC_BYTE {
            self.data[0] = byte;
            self.bytes_read = 1;
        } else if self.bytes_read == 1 && byte == HW4_SYNC_BYTE {
            // Signature packet.
            self.bytes_read = 0;
            self.skip_bytes = HW4_SIGNATURE_SKIP;
        } else if self.bytes_read > 0 {
            self.data[self.bytes_read] = byte;
            self.bytes_read += 1;
            if self.bytes_read == HW4_PACKET_SIZE {
                self.bytes_read = 0;
                return Some(self.data);
            }
        }
        None
    }
}

impl Default for StreamSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hw4Packet {
    pub counter: u32,
    pub throttle: u16,
    pub pwm: u16,
    pub rpm: u32,
    pub voltage_raw: u16,
    pub current_raw: u16,
    pub temp_fet_raw: u16,
    pub temp_bec_raw: u16,
}

fn be16(raw: &RawPacket, at: usize) -> u16 {
    u16::from_be_bytes([raw[at], raw[at + 1]])
}

fn be24(raw: &RawPacket, at: usize) -> u32 {
    u32::from_be_bytes([0, raw[at], raw[at + 1], raw[at + 2]])
}

impl Hw4Packet {
    /// The protocol has no checksum; out-of-range high bytes are the only
    /// corruption we can detect.
    pub fn parse(raw: &RawPacket) -> Result<Self, FrameError> {
        for &(offset, limit) in &PLAUSIBILITY_BOUNDS {
            let value = raw[offset];
            if value >= limit {
                return Err(FrameError::Implausible {
                    offset,
                    value,
                    limit,
                });
            }
        }

        Ok(Self {
            counter: be24(raw, 1),
            throttle: be16(raw, 4),
            pwm: be16(raw, 6),
            rpm: be24(raw, 8),
            voltage_raw: be16(raw, 11),
            current_raw: be16(raw, 13),
            temp_fet_raw: be16(raw, 15),
            temp_bec_raw: be16(raw, 17),
        })
    }

    pub fn to_bytes(&self) -> RawPacket {
        let mut raw = [0u8; HW4_PACKET_SIZE];
        raw[0] = HW4_SYNC_BYTE;
        raw[1..4].copy_from_slice(&self.counter.to_be_bytes()[1..]);
        raw[4..6].copy_from_slice(&self.throttle.to_be_bytes());
        raw[6..8].copy_from_slice(&self.pwm.to_be_bytes());
        raw[8..11].copy_from_slice(&self.rpm.to_be_bytes()[1..]);
        raw[11..13].copy_from_slice(&self.voltage_raw.to_be_bytes());
        raw[13..15].copy_from_slice(&self.current_raw.to_be_bytes());
        raw[15..17].copy_from_slice(&self.temp_fet_raw.to_be_bytes());
        raw[17..19].copy_from_slice(&self.temp_bec_raw.to_be_bytes());
        raw
    }
}

/// Gain and offset calibration, tenths-scaled as stored in the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hw4Calibration {
    pub current_offset: u16,
    pub current_gain: u16,
    pub voltage_gain: u16,
}

impl Hw4Calibration {
    pub fn from_config(config: &EscSensorConfig) -> Self {
        Self {
            current_offset: config.hw4_current_offset,
            current_gain: config.hw4_current_gain,
            voltage_gain: config.hw4_voltage_gain,
        }
    }

    /// NTC divider to °C with a single-beta model; 0 below freezing.
    pub fn temperature(raw: u16) -> f32 {
        let voltage = f32::from(raw) * (V_REF / ADC_RESOLUTION);
        let ntc_ratio = (voltage / (V_REF - voltage)) * (NTC_R1 / NTC_R_REF);
        if ntc_ratio < 0.001 {
            return 0.0;
        }

        let temperature = 1.0 / (ntc_ratio.ln() / NTC_BETA + 1.0 / 298.15) - 273.15;
        if temperature.is_finite() && temperature > 0.0 {
            temperature
        } else {
            0.0
        }
    }

    /// Volts.
    pub fn voltage(&self, raw: u16) -> f32 {
        f32::from(raw) * (V_REF / ADC_RESOLUTION) * (f32::from(self.voltage_gain) / 10.0)
    }

    /// Amps; never negative.
    pub fn current(&self, raw: u16) -> f32 {
        if raw <= self.current_offset || self.current_gain == 0 {
            return 0.0;
        }
        f32::from(raw - self.current_offset)
            * (V_REF
                / (ADC_RESOLUTION * DIFFAMP_SHUNT * f32::from(self.current_gain) / 10.0))
    }
}

/// A packet converted to physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hw4Telemetry {
    pub packet: Hw4Packet,
    pub voltage: f32,
    pub current: f32,
    pub temp_fet: f32,
    pub temp_bec: f32,
}

impl Hw4Telemetry {
    pub fn convert(packet: Hw4Packet, calibration: &Hw4Calibration) -> Self {
        Self {
            packet,
            voltage: calibration.voltage(packet.voltage_raw),
            current: calibration.current(packet.current_raw),
            temp_fet: Hw4Calibration::temperature(packet.temp_fet_raw),
            temp_bec: Hw4Calibration::temperature(packet.temp_bec_raw),
        }
    }

    /// The ESC keeps reporting its last current after the motor stops.
    pub fn motor_stopped(&self) -> bool {
        self.packet.rpm < CURRENT_RPM_THRESHOLD || self.packet.throttle < CURRENT_THROTTLE_THRESHOLD
    }

    /// Record fields: °C, 0.01 V, 0.01 A, eRPM / 100.
    pub fn reading(&self, consumption: i32) -> Reading {
        let current = if self.motor_stopped() {
            0
        } else {
            (self.current * 100.0).round() as i32
        };
        Reading {
            temperature: self.temp_fet.round() as i16,
            voltage: (self.voltage * 100.0).round() as i32,
            current,
            consumption,
            rpm: (self.packet.rpm / 100) as i32,
        }
    }
}

/// Drains the port every tick and keeps record 0 up to date.
pub struct Hw4Decoder {
    sync: StreamSynchronizer,
    calibration: Hw4Calibration,
    data_update_us: u64,
    consumption_update_us: Option<u64>,
    total_consumption: f64,
    stats: TelemetryStats,
}

impl Hw4Decoder {
    pub fn new(calibration: Hw4Calibration) -> Self {
        Self {
            sync: StreamSynchronizer::new(),
            calibration,
            data_update_us: 0,
            consumption_update_us: None,
            total_consumption: 0.0,
            stats: TelemetryStats::default(),
        }
    }

    pub fn stats(&self) -> TelemetryStats {
        self.stats
    }

    pub fn bytes_read(&self) -> usize {
        self.sync.bytes_read()
    }

    pub fn process<P: SerialPort + ?Sized>(
        &mut self,
        now_us: u64,
        port: &mut P,
        store: &mut EscSensorStore,
        dbg: &mut DebugChannels,
    ) {
        if now_us.saturating_sub(self.data_update_us) > HW4_DATA_AGE_WINDOW_US {
            store.increase_data_age(0);
            self.data_update_us = now_us;
        }

        for _ in 0..port.rx_bytes_waiting() {
            let Some(byte) = port.read_byte() else {
                break;
            };
            if let Some(raw) = self.sync.push(byte) {
                self.handle_packet(&raw, now_us, store, dbg);
            }
        }

        // The HW4 path has no request timeouts; the slot shows the fill level.
        dbg.set(tags::NUM_TIMEOUTS, slot_value(self.sync.bytes_read()));
        dbg.set(tags::DATA_AGE, i32::from(store.primary().data_age));

        let dt_us = self
            .consumption_update_us
            .map_or(0, |last| now_us.saturating_sub(last));
        self.consumption_update_us = Some(now_us);
        self.total_consumption += dt_us as f64 * f64::from(store.primary().current) * 10.0;
        store.set_consumption(0, (self.total_consumption / CONSUMPTION_DIVISOR).round() as i32);
    }

    fn handle_packet(
        &mut self,
        raw: &RawPacket,
        now_us: u64,
        store: &mut EscSensorStore,
        dbg: &mut DebugChannels,
    ) {
        let packet = match Hw4Packet::parse(raw) {
            Ok(packet) => packet,
            Err(err) => {
                self.stats.crc_errors = self.stats.crc_errors.wrapping_add(1);
                dbg.set(tags::NUM_CRC_ERRORS, slot_value(self.stats.crc_errors));
                debug!("hw4 packet rejected: {}", err);
                return;
            }
        };

        let telemetry = Hw4Telemetry::convert(packet, &self.calibration);
        let reading = telemetry.reading(store.primary().consumption);
        store.update(0, reading);
        self.stats.frames_decoded = self.stats.frames_decoded.wrapping_add(1);
        self.data_update_us = now_us;

        dbg.set(tags::MOTOR_INDEX, slot_value(packet.counter));
        dbg.set(tags::RPM, slot_value(packet.rpm));
        dbg.set(tags::TEMPERATURE, telemetry.temp_fet.round() as i32);
        dbg.set(tags::VOLTAGE, (telemetry.voltage * 100.0).round() as i32);
        dbg.set(tags::CURRENT, (telemetry.current * 100.0).round() as i32);
        dbg.set_rpm(0, slot_value(packet.rpm));
        dbg.set_rpm(1, i32::from(packet.throttle));
        dbg.set_rpm(2, i32::from(packet.pwm));
        dbg.set_temperature(0, (telemetry.temp_fet * 10.0).round() as i32);
        dbg.set_temperature(1, (telemetry.temp_bec * 10.0).round() as i32);

        trace!(
            "hw4 packet {}: rpm {} thr {} {:.2} V {:.2} A",
            packet.counter,
            packet.rpm,
            packet.throttle,
            telemetry.voltage,
            telemetry.current
        );
    }
}
