use serde::Serialize;

pub const MAX_SUPPORTED_MOTORS: usize = 8;
pub const DATA_AGE_INVALID: u8 = 255;

/// Latest telemetry reported by one ESC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EscSample {
    /// Ticks since the last valid update, saturating at [`DATA_AGE_INVALID`].
    pub data_age: u8,
    /// °C
    pub temperature: i16,
    /// 0.01 V
    pub voltage: i32,
    /// 0.01 A
    pub current: i32,
    /// mAh
    pub consumption: i32,
    /// eRPM / 100 as reported by the ESC.
    pub rpm: i32,
}

impl EscSample {
    pub const INVALID: Self = Self {
        data_age: DATA_AGE_INVALID,
        temperature: 0,
        voltage: 0,
        current: 0,
        consumption: 0,
        rpm: 0,
    };

    pub fn is_stale(&self) -> bool {
        self.data_age == DATA_AGE_INVALID
    }
}

impl Default for EscSample {
    fn default() -> Self {
        Self::INVALID
    }
}

/// New readings from a decoder, applied with [`EscSensorStore::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reading {
    pub temperature: i16,
    pub voltage: i32,
    pub current: i32,
    pub consumption: i32,
    pub rpm: i32,
}

/// Per-motor records plus the memoized combined record.
///
/// Every mutation marks the combined record dirty; [`EscSensorStore::combined`]
/// takes `&mut self` so the recompute and the read are one step for the caller.
#[derive(Debug, Clone)]
pub struct EscSensorStore {
    samples: [EscSample; MAX_SUPPORTED_MOTORS],
    motor_count: usize,
    combined: EscSample,
    needs_recompute: bool,
    recomputations: u64,
}

impl EscSensorStore {
    pub fn new(motor_count: usize) -> Self {
        Self {
            samples: [EscSample::INVALID; MAX_SUPPORTED_MOTORS],
            motor_count: motor_count.min(MAX_SUPPORTED_MOTORS),
            combined: EscSample::INVALID,
            needs_recompute: true,
            recomputations: 0,
        }
    }

    pub fn motor_count(&self) -> usize {
        self.motor_count
    }

    pub fn get(&self, motor: usize) -> Option<&EscSample> {
        self.samples[..self.motor_count].get(motor)
    }

    /// Record 0 regardless of motor count; single-ESC protocols report here.
    pub fn primary(&self) -> &EscSample {
        &self.samples[0]
    }

    /// Store a successful decode: data age restarts at zero.
    pub fn update(&mut self, motor: usize, reading: Reading) {
        if let Some(sample) = self.samples.get_mut(motor) {
            *sample = EscSample {
                data_age: 0,
                temperature: reading.temperature,
                voltage: reading.voltage,
                current: reading.current,
                consumption: reading.consumption,
                rpm: reading.rpm,
            };
            self.needs_recompute = true;
        }
    }

    /// Age a record after a missed or rejected reply.
    pub fn increase_data_age(&mut self, motor: usize) {
        if let Some(sample) = self.samples.get_mut(motor) {
            sample.data_age = sample.data_age.saturating_add(1);
            self.needs_recompute = true;
        }
    }

    /// Consumption is integrated outside the decode path for HW4.
    pub fn set_consumption(&mut self, motor: usize, consumption: i32) {
        if let Some(sample) = self.samples.get_mut(motor) {
            if sample.consumption != consumption {
                sample.consumption = consumption;
                self.needs_recompute = true;
            }
        }
    }

    pub fn needs_recompute(&self) -> bool {
        self.needs_recompute
    }

    /// Number of times the combined record has been rebuilt.
    pub fn recomputations(&self) -> u64 {
        self.recomputations
    }

    /// Max age and temperature, mean voltage and rpm, summed current and
    /// consumption over all motors.
    pub fn combined(&mut self) -> &EscSample {
        if self.needs_recompute && self.motor_count > 0 {
            let motors = &self.samples[..self.motor_count];
            let n = self.motor_count as i64;

            let mut combined = EscSample {
                data_age: 0,
                temperature: 0,
                voltage: 0,
                current: 0,
                consumption: 0,
                rpm: 0,
            };
            let mut voltage = 0i64;
            let mut current = 0i64;
            let mut consumption = 0i64;
            let mut rpm = 0i64;
            for s in motors {
                combined.data_age = combined.data_age.max(s.data_age);
                combined.temperature = combined.temperature.max(s.temperature);
                voltage += i64::from(s.voltage);
                current += i64::from(s.current);
                consumption += i64::from(s.consumption);
                rpm += i64::from(s.rpm);
            }
            combined.voltage = saturate(voltage / n);
            combined.current = saturate(current);
            combined.consumption = saturate(consumption);
            combined.rpm = saturate(rpm / n);

            self.combined = combined;
            self.needs_recompute = false;
            self.recomputations += 1;
        }
        &self.combined
    }
}

fn saturate(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}
