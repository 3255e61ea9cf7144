use esc_core::hal_sim::{FaultProfile, SimulatedHw4Esc, SimulatedKissBus, SimulatedMotors};
use esc_core::hw4::{HW4_SIGNATURE_SKIP, HW4_SYNC_BYTE};
use esc_core::tags;
use esc_core::{
    CallbackOnlyPort, Clock, EscProtocol, EscSensor, EscSensorConfig, EscSensorIndex, Hw4Packet,
    KissFrame, ManualClock, DATA_AGE_INVALID,
};

const TICK_MS: u64 = 10;

fn kiss_sensor(bus: SimulatedKissBus) -> EscSensor<SimulatedKissBus, CallbackOnlyPort> {
    let cfg = EscSensorConfig::default();
    let mut sensor = EscSensor::new(&cfg, bus, Some(CallbackOnlyPort));
    let rx = sensor.frame_receiver().expect("kiss sensor exposes a receiver");
    sensor.driver_mut().attach(rx);
    sensor
}

fn run_kiss(
    sensor: &mut EscSensor<SimulatedKissBus, CallbackOnlyPort>,
    clock: &ManualClock,
    ms: u64,
) {
    for _ in 0..ms / TICK_MS {
        let now = clock.advance_ms(TICK_MS);
        sensor.driver_mut().step(now);
        sensor.process(now);
    }
}

fn hw4_sensor(esc: SimulatedHw4Esc) -> EscSensor<SimulatedMotors, SimulatedHw4Esc> {
    let cfg = EscSensorConfig {
        protocol: EscProtocol::Hw4,
        ..Default::default()
    };
    EscSensor::new(&cfg, SimulatedMotors::new(1), Some(esc))
}

fn run_hw4(
    sensor: &mut EscSensor<SimulatedMotors, SimulatedHw4Esc>,
    clock: &ManualClock,
    ms: u64,
    streaming: bool,
) {
    for _ in 0..ms / TICK_MS {
        let now = clock.advance_ms(TICK_MS);
        if streaming {
            if let Some(esc) = sensor.port_mut() {
                esc.step(now);
            }
        }
        sensor.process(now);
    }
}

#[test]
fn kiss_waits_for_esc_boot() {
    let clock = ManualClock::new(0);
    let mut sensor = kiss_sensor(SimulatedKissBus::new(4));

    run_kiss(&mut sensor, &clock, 4_990);
    assert!(sensor.driver().request_log().is_empty());

    run_kiss(&mut sensor, &clock, 10);
    assert_eq!(sensor.driver().request_log(), &[0]);
    assert!(clock.now_us() >= 5_000_000);
}

#[test]
fn kiss_polls_motors_round_robin() {
    let clock = ManualClock::new(0);
    let mut sensor = kiss_sensor(SimulatedKissBus::new(4).with_latency_us(2_000));

    run_kiss(&mut sensor, &clock, 6_000);

    let log = sensor.driver().request_log();
    assert!(log.len() > 8);
    for (i, &motor) in log.iter().enumerate() {
        assert_eq!(motor, i % 4);
    }
    for motor in 0..4 {
        let sample = sensor.sample(EscSensorIndex::Motor(motor)).unwrap();
        assert_eq!(sample.data_age, 0);
        assert_eq!(sample.rpm, sensor.driver().frame(motor).unwrap().rpm as i32);
    }
    let stats = sensor.stats();
    assert_eq!(stats.timeouts, 0);
    assert_eq!(stats.crc_errors, 0);
    assert!(stats.frames_decoded > 8);
}

#[test]
fn kiss_decodes_reference_frame() {
    let clock = ManualClock::new(0);
    let mut bus = SimulatedKissBus::new(1);
    bus.set_frame(
        0,
        KissFrame {
            temperature: 50,
            voltage: 150,
            current: 50,
            consumption: 10,
            rpm: 300,
        },
    );
    let mut sensor = kiss_sensor(bus);

    run_kiss(&mut sensor, &clock, 5_100);

    let sample = sensor.sample(EscSensorIndex::Motor(0)).unwrap();
    assert_eq!(sample.data_age, 0);
    assert_eq!(sample.temperature, 50);
    assert_eq!(sample.voltage, 150);
    assert_eq!(sample.current, 50);
    assert_eq!(sample.consumption, 10);
    assert_eq!(sample.rpm, 300);
    assert_eq!(sensor.rpm(0), 300);

    let combined = sensor.sample(EscSensorIndex::Combined).unwrap();
    assert_eq!(combined, sample);
}

#[test]
fn kiss_combined_aggregates_motors() {
    let clock = ManualClock::new(0);
    let mut bus = SimulatedKissBus::new(2);
    for (motor, (temperature, current, rpm)) in [(40u8, 100u16, 1000u16), (60, 300, 3000)]
        .into_iter()
        .enumerate()
    {
        bus.set_frame(
            motor,
            KissFrame {
                temperature,
                voltage: 1600 + motor as u16 * 20,
                current,
                consumption: 5,
                rpm,
            },
        );
    }
    let mut sensor = kiss_sensor(bus);

    run_kiss(&mut sensor, &clock, 5_200);

    let combined = sensor.sample(EscSensorIndex::Combined).unwrap();
    assert_eq!(combined.data_age, 0);
    assert_eq!(combined.temperature, 60);
    assert_eq!(combined.voltage, 1610);
    assert_eq!(combined.current, 400);
    assert_eq!(combined.rpm, 2000);
    let consumption: i32 = (0..2)
        .map(|m| sensor.sample(EscSensorIndex::Motor(m)).unwrap().consumption)
        .sum();
    assert_eq!(combined.consumption, consumption);
}

#[test]
fn kiss_dropped_replies_time_out_and_age() {
    let clock = ManualClock::new(0);
    let faults = FaultProfile {
        drop_rate: 1.0,
        corrupt_rate: 0.0,
    };
    let mut sensor = kiss_sensor(SimulatedKissBus::new(3).with_faults(faults, 11));

    run_kiss(&mut sensor, &clock, 6_000);

    let stats = sensor.stats();
    // One timeout per 100 ms window after the first request at 5 s.
    assert_eq!(stats.timeouts, 10);
    assert_eq!(stats.crc_errors, 0);
    assert_eq!(stats.frames_decoded, 0);
    for motor in 0..3 {
        let sample = sensor.sample(EscSensorIndex::Motor(motor)).unwrap();
        assert_eq!(sample.data_age, DATA_AGE_INVALID);
    }
    assert_eq!(&sensor.driver().request_log()[..4], &[0, 1, 2, 0]);
}

#[test]
fn kiss_combined_age_reaches_debug_channel() {
    let clock = ManualClock::new(0);
    let faults = FaultProfile {
        drop_rate: 1.0,
        corrupt_rate: 0.0,
    };
    let mut sensor = kiss_sensor(SimulatedKissBus::new(2).with_faults(faults, 3));

    run_kiss(&mut sensor, &clock, 7_000);

    let combined = sensor.sample(EscSensorIndex::Combined).unwrap();
    assert_eq!(combined.data_age, DATA_AGE_INVALID);
    assert_eq!(
        sensor.debug().get(tags::DATA_AGE),
        i32::from(combined.data_age)
    );
}

#[test]
fn kiss_corrupted_replies_count_crc_errors() {
    let clock = ManualClock::new(0);
    let faults = FaultProfile {
        drop_rate: 0.0,
        corrupt_rate: 1.0,
    };
    let mut sensor = kiss_sensor(SimulatedKissBus::new(2).with_faults(faults, 5));

    run_kiss(&mut sensor, &clock, 5_500);

    let stats = sensor.stats();
    assert!(stats.crc_errors > 0);
    assert_eq!(stats.frames_decoded, 0);
    assert_eq!(stats.timeouts, 0);
    assert!(sensor.sample(EscSensorIndex::Combined).unwrap().is_stale());
}

#[test]
fn kiss_disabled_motors_are_not_polled() {
    let clock = ManualClock::new(0);
    let mut bus = SimulatedKissBus::new(4);
    bus.set_enabled(false);
    let mut sensor = kiss_sensor(bus);

    run_kiss(&mut sensor, &clock, 6_000);
    assert!(sensor.driver().request_log().is_empty());

    sensor.driver_mut().set_enabled(true);
    run_kiss(&mut sensor, &clock, 100);
    assert!(!sensor.driver().request_log().is_empty());
}

#[test]
fn hw4_stream_updates_primary_record() {
    let clock = ManualClock::new(0);
    let esc = SimulatedHw4Esc::cruising().with_signature_every(5);
    let mut sensor = hw4_sensor(esc);

    run_hw4(&mut sensor, &clock, 1_000, true);

    let sample = sensor.sample(EscSensorIndex::Combined).unwrap();
    assert_eq!(sample.data_age, 0);
    assert_eq!(sample.rpm, 1800);
    assert_eq!(sample.voltage, 1772);
    assert_eq!(sample.current, 8798);
    assert_eq!(sample.temperature, 25);
    // ~88 A for one second
    assert!((20..=30).contains(&sample.consumption), "{}", sample.consumption);

    let stats = sensor.stats();
    assert!(stats.frames_decoded >= 40);
    assert_eq!(stats.crc_errors, 0);
    assert_eq!(sensor.sample(EscSensorIndex::Motor(3)), Some(sample));
}

#[test]
fn hw4_silent_stream_ages_record() {
    let clock = ManualClock::new(0);
    let mut sensor = hw4_sensor(SimulatedHw4Esc::cruising());

    run_hw4(&mut sensor, &clock, 200, true);
    assert_eq!(sensor.sample(EscSensorIndex::Combined).unwrap().data_age, 0);

    run_hw4(&mut sensor, &clock, 1_100, false);
    let age = sensor.sample(EscSensorIndex::Combined).unwrap().data_age;
    assert!((3..=4).contains(&age), "{age}");
}

#[test]
fn hw4_implausible_packets_are_rejected() {
    let clock = ManualClock::new(0);
    let faults = FaultProfile {
        drop_rate: 0.0,
        corrupt_rate: 0.5,
    };
    let mut sensor = hw4_sensor(SimulatedHw4Esc::cruising().with_faults(faults, 9));

    run_hw4(&mut sensor, &clock, 2_000, true);

    let stats = sensor.stats();
    assert!(stats.frames_decoded > 0);
    assert!(stats.crc_errors > 0);
}

#[test]
fn hw4_injected_noise_and_signature_are_skipped() {
    let clock = ManualClock::new(0);
    let packet = Hw4Packet {
        counter: 7,
        throttle: 400,
        pwm: 380,
        rpm: 50_000,
        voltage_raw: 2000,
        current_raw: 288,
        temp_fet_raw: 3377,
        temp_bec_raw: 3000,
    };
    let mut esc = SimulatedHw4Esc::new(packet);
    esc.inject(&[0x12, 0x34, HW4_SYNC_BYTE, HW4_SYNC_BYTE]);
    esc.inject(&[0x9B; HW4_SIGNATURE_SKIP as usize]);
    esc.inject(&packet.to_bytes());
    let mut sensor = hw4_sensor(esc);

    run_hw4(&mut sensor, &clock, TICK_MS, false);

    let stats = sensor.stats();
    assert_eq!(stats.frames_decoded, 1);
    assert_eq!(stats.crc_errors, 0);
    assert_eq!(sensor.bytes_read(), 0);
    let sample = sensor.sample(EscSensorIndex::Combined).unwrap();
    assert_eq!(sample.data_age, 0);
    assert_eq!(sample.rpm, 500);
}

#[test]
fn hw4_record_follows_packet_changes() {
    let clock = ManualClock::new(0);
    let mut sensor = hw4_sensor(SimulatedHw4Esc::cruising());

    run_hw4(&mut sensor, &clock, 300, true);
    assert_eq!(sensor.rpm(0), 1800);

    if let Some(esc) = sensor.port_mut() {
        esc.set_packet(Hw4Packet {
            counter: 0,
            throttle: 300,
            pwm: 280,
            rpm: 90_000,
            voltage_raw: 2000,
            current_raw: 100,
            temp_fet_raw: 3377,
            temp_bec_raw: 3000,
        });
    }
    run_hw4(&mut sensor, &clock, 100, true);
    assert_eq!(sensor.rpm(0), 900);
    assert_eq!(sensor.sample(EscSensorIndex::Combined).unwrap().data_age, 0);
}

#[test]
fn hw4_disabled_motors_leave_stream_unread() {
    let clock = ManualClock::new(0);
    let mut motors = SimulatedMotors::new(1);
    motors.set_enabled(false);
    let cfg = EscSensorConfig {
        protocol: EscProtocol::Hw4,
        ..Default::default()
    };
    let mut sensor = EscSensor::new(&cfg, motors, Some(SimulatedHw4Esc::cruising()));

    run_hw4(&mut sensor, &clock, 200, true);
    assert_eq!(sensor.stats().frames_decoded, 0);
    assert!(sensor.sample(EscSensorIndex::Combined).unwrap().is_stale());

    sensor.driver_mut().set_enabled(true);
    run_hw4(&mut sensor, &clock, 100, true);
    assert!(sensor.stats().frames_decoded > 0);
    assert_eq!(sensor.rpm(0), 1800);
}
