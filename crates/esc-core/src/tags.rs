//! Diagnostic channels published by the telemetry engines.

#[derive(Debug, Clone, Copy)]
pub struct Tag {
    pub key: &'static str,
    pub metric: &'static str,
    pub channel: usize,
}

pub const MOTOR_INDEX: Tag = Tag {
    key: "motor_index",
    metric: "esc_sensor_debug_motor_index",
    channel: 0,
};

pub const NUM_TIMEOUTS: Tag = Tag {
    key: "num_timeouts",
    metric: "esc_sensor_debug_timeouts",
    channel: 1,
};

pub const NUM_CRC_ERRORS: Tag = Tag {
    key: "num_crc_errors",
    metric: "esc_sensor_debug_crc_errors",
    channel: 2,
};

pub const DATA_AGE: Tag = Tag {
    key: "data_age",
    metric: "esc_sensor_debug_data_age",
    channel: 3,
};

pub const RPM: Tag = Tag {
    key: "rpm",
    metric: "esc_sensor_debug_rpm",
    channel: 4,
};

pub const TEMPERATURE: Tag = Tag {
    key: "temperature",
    metric: "esc_sensor_debug_temperature",
    channel: 5,
};

pub const VOLTAGE: Tag = Tag {
    key: "voltage",
    metric: "esc_sensor_debug_voltage",
    channel: 6,
};

pub const CURRENT: Tag = Tag {
    key: "current",
    metric: "esc_sensor_debug_current",
    channel: 7,
};

pub const SENSOR_TAGS: &[Tag] = &[
    MOTOR_INDEX,
    NUM_TIMEOUTS,
    NUM_CRC_ERRORS,
    DATA_AGE,
    RPM,
    TEMPERATURE,
    VOLTAGE,
    CURRENT,
];

pub const DEBUG_SLOTS: usize = 8;

/// Latest value written to each debug slot.
///
/// `sensor` carries the channels in [`SENSOR_TAGS`]; `rpm` and `temperature`
/// are per-motor groups (KISS) or per-field groups (HW4).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugChannels {
    pub sensor: [i32; DEBUG_SLOTS],
    pub rpm: [i32; DEBUG_SLOTS],
    pub temperature: [i32; DEBUG_SLOTS],
}

impl DebugChannels {
    pub fn set(&mut self, tag: Tag, value: i32) {
        self.sensor[tag.channel] = value;
    }

    pub fn get(&self, tag: Tag) -> i32 {
        self.sensor[tag.channel]
    }

    pub fn set_rpm(&mut self, slot: usize, value: i32) {
        if let Some(v) = self.rpm.get_mut(slot) {
            *v = value;
        }
    }

    pub fn set_temperature(&mut self, slot: usize, value: i32) {
        if let Some(v) = self.temperature.get_mut(slot) {
            *v = value;
        }
    }
}

/// Clamp a counter into a debug slot.
pub fn slot_value<T: TryInto<i32>>(value: T) -> i32 {
    value.try_into().unwrap_or(i32::MAX)
}

/// Cumulative failure counts, mirrored into the timeout and crc debug slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryStats {
    pub timeouts: u32,
    pub crc_errors: u32,
    pub frames_decoded: u32,
}
