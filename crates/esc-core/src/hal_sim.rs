use crate::frame_buffer::FrameReceiver;
use crate::hal::{MotorDriver, SerialPort};
use crate::hw4::{Hw4Packet, HW4_SIGNATURE_SKIP, HW4_SYNC_BYTE};
use crate::kiss::KissFrame;
use crate::sample::MAX_SUPPORTED_MOTORS;
use std::collections::VecDeque;

/// Small deterministic generator so simulated faults are reproducible.
#[derive(Debug, Clone)]
pub struct XorShift32(u32);

impl XorShift32 {
    pub fn new(seed: u32) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }

    /// True with probability `p`.
    pub fn chance(&mut self, p: f32) -> bool {
        p >= 1.0 || (p > 0.0 && (self.next_u32() as f32 / u32::MAX as f32) < p)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FaultProfile {
    /// Fraction of requests that never get an answer.
    pub drop_rate: f32,
    /// Fraction of replies/packets delivered with a damaged byte.
    pub corrupt_rate: f32,
}

#[derive(Debug, Clone, Copy)]
struct SimulatedEsc {
    frame: KissFrame,
    consumption_mah: f64,
}

#[derive(Debug, Clone, Copy)]
struct PendingReply {
    motor: usize,
    due_us: u64,
    corrupt: bool,
}

const REQUEST_LOG_LIMIT: usize = 4096;

/// KISS ESCs on a shared half-duplex wire.
///
/// A telemetry request schedules a reply that [`SimulatedKissBus::step`]
/// shifts into the attached receiver once the reply latency has passed.
pub struct SimulatedKissBus {
    escs: Vec<SimulatedEsc>,
    receiver: Option<FrameReceiver>,
    pending: Option<PendingReply>,
    now_us: u64,
    latency_us: u64,
    faults: FaultProfile,
    rng: XorShift32,
    enabled: bool,
    requests: [u64; MAX_SUPPORTED_MOTORS],
    request_log: Vec<usize>,
}

impl SimulatedKissBus {
    pub fn new(motor_count: usize) -> Self {
        let motor_count = motor_count.min(MAX_SUPPORTED_MOTORS);
        let escs = (0..motor_count)
            .map(|i| SimulatedEsc {
                frame: KissFrame {
                    temperature: 35 + i as u8,
                    voltage: 1680,
                    current: 1200 + 50 * i as u16,
                    consumption: 0,
                    rpm: 2400 + 10 * i as u16,
                },
                consumption_mah: 0.0,
            })
            .collect();
        Self {
            escs,
            receiver: None,
            pending: None,
            now_us: 0,
            latency_us: 1_000,
            faults: FaultProfile::default(),
            rng: XorShift32::new(0x5EED_0001),
            enabled: true,
            requests: [0; MAX_SUPPORTED_MOTORS],
            request_log: Vec::new(),
        }
    }

    pub fn with_faults(mut self, faults: FaultProfile, seed: u32) -> Self {
        self.faults = faults;
        self.rng = XorShift32::new(seed);
        self
    }

    pub fn with_latency_us(mut self, latency_us: u64) -> Self {
        self.latency_us = latency_us;
        self
    }

    /// Wire the bus to the sensor's receive path.
    pub fn attach(&mut self, receiver: FrameReceiver) {
        self.receiver = Some(receiver);
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_frame(&mut self, motor: usize, frame: KissFrame) {
        if let Some(esc) = self.escs.get_mut(motor) {
            esc.frame = frame;
            esc.consumption_mah = f64::from(frame.consumption);
        }
    }

    pub fn frame(&self, motor: usize) -> Option<KissFrame> {
        self.escs.get(motor).map(|esc| esc.frame)
    }

    pub fn requests(&self, motor: usize) -> u64 {
        self.requests.get(motor).copied().unwrap_or(0)
    }

    /// Motors in the order they were asked for telemetry, up to the first
    /// few thousand requests.
    pub fn request_log(&self) -> &[usize] {
        &self.request_log
    }

    /// Advance simulated time: integrate consumption and deliver a due reply.
    pub fn step(&mut self, now_us: u64) {
        let dt_h = now_us.saturating_sub(self.now_us) as f64 / 3.6e9;
        self.now_us = now_us;
        for esc in &mut self.escs {
            // current is in 0.01 A; 1 A for 1 h is 1000 mAh
            esc.consumption_mah += f64::from(esc.frame.current) * 10.0 * dt_h;
            esc.frame.consumption = esc.consumption_mah.min(f64::from(u16::MAX)) as u16;
        }

        let Some(reply) = self.pending else {
            return;
        };
        if now_us < reply.due_us {
            return;
        }
        self.pending = None;

        let (Some(receiver), Some(esc)) = (self.receiver.as_ref(), self.escs.get(reply.motor))
        else {
            return;
        };
        let mut raw = esc.frame.to_bytes();
        if reply.corrupt {
            let at = (self.rng.next_u32() % 9) as usize;
            raw[at] ^= 1 << (self.rng.next_u32() % 8);
        }
        for byte in raw {
            receiver.receive(byte);
        }
    }
}

impl MotorDriver for SimulatedKissBus {
    fn motor_count(&self) -> usize {
        self.escs.len()
    }

    fn motors_enabled(&self) -> bool {
        self.enabled
    }

    fn request_telemetry(&mut self, motor: usize) {
        if let Some(count) = self.requests.get_mut(motor) {
            *count += 1;
        }
        if self.request_log.len() < REQUEST_LOG_LIMIT {
            self.request_log.push(motor);
        }

        // Half duplex: a new request cuts off any reply still on the wire.
        self.pending = None;
        if self.rng.chance(self.faults.drop_rate) {
            return;
        }
        self.pending = Some(PendingReply {
            motor,
            due_us: self.now_us + self.latency_us,
            corrupt: self.rng.chance(self.faults.corrupt_rate),
        });
    }
}

/// Motor outputs for protocols that never get polled.
#[derive(Debug, Clone)]
pub struct SimulatedMotors {
    count: usize,
    enabled: bool,
}

impl SimulatedMotors {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            enabled: true,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

impl MotorDriver for SimulatedMotors {
    fn motor_count(&self) -> usize {
        self.count
    }

    fn motors_enabled(&self) -> bool {
        self.enabled
    }

    fn request_telemetry(&mut self, _motor: usize) {}
}

/// A Hobbywing V4 ESC streaming into a receive FIFO.
pub struct SimulatedHw4Esc {
    packet: Hw4Packet,
    queue: VecDeque<u8>,
    next_packet_us: Option<u64>,
    interval_us: u64,
    signature_every: u32,
    sent: u32,
    faults: FaultProfile,
    rng: XorShift32,
}

/// FIFO depth of a typical UART receive buffer.
const RX_QUEUE_LIMIT: usize = 256;

impl SimulatedHw4Esc {
    pub fn new(packet: Hw4Packet) -> Self {
        Self {
            packet,
            queue: VecDeque::with_capacity(RX_QUEUE_LIMIT),
            next_packet_us: None,
            interval_us: 20_000,
            signature_every: 0,
            sent: 0,
            faults: FaultProfile::default(),
            rng: XorShift32::new(0x5EED_0004),
        }
    }

    /// 100 A LV ESC at moderate throttle.
    pub fn cruising() -> Self {
        Self::new(Hw4Packet {
            counter: 0,
            throttle: 600,
            pwm: 580,
            rpm: 180_000,
            voltage_raw: 2000,
            current_raw: 288,
            temp_fet_raw: 3377,
            temp_bec_raw: 3000,
        })
    }

    pub fn with_faults(mut self, faults: FaultProfile, seed: u32) -> Self {
        self.faults = faults;
        self.rng = XorShift32::new(seed);
        self
    }

    pub fn with_interval_us(mut self, interval_us: u64) -> Self {
        self.interval_us = interval_us.max(1);
        self
    }

    /// Interleave a signature run after every `n` packets (0 disables).
    pub fn with_signature_every(mut self, n: u32) -> Self {
        self.signature_every = n;
        self
    }

    pub fn set_packet(&mut self, packet: Hw4Packet) {
        self.packet = packet;
    }

    pub fn packets_sent(&self) -> u32 {
        self.sent
    }

    /// Push raw bytes as if they arrived on the wire.
    pub fn inject(&mut self, bytes: &[u8]) {
        self.queue.extend(bytes);
    }

    pub fn step(&mut self, now_us: u64) {
        let mut next = self.next_packet_us.unwrap_or(now_us);
        while next <= now_us {
            self.emit_packet();
            next += self.interval_us;
        }
        self.next_packet_us = Some(next);

        while self.queue.len() > RX_QUEUE_LIMIT {
            self.queue.pop_front();
        }
    }

    fn emit_packet(&mut self) {
        self.packet.counter = self.packet.counter.wrapping_add(1) & 0x00FF_FFFF;
        let mut raw = self.packet.to_bytes();
        if self.rng.chance(self.faults.corrupt_rate) {
            // Either lose the sync byte or push a high byte out of range.
            if self.rng.next_u32() % 2 == 0 {
                raw[0] = 0x00;
            } else {
                raw[11] = 0xFF;
            }
        }
        if !self.rng.chance(self.faults.drop_rate) {
            self.queue.extend(raw);
        }
        self.sent = self.sent.wrapping_add(1);

        if self.signature_every > 0 && self.sent % self.signature_every == 0 {
            self.queue.extend([HW4_SYNC_BYTE, HW4_SYNC_BYTE]);
            self.queue
                .extend(std::iter::repeat(0x9B).take(HW4_SIGNATURE_SKIP as usize));
        }
    }
}

impl SerialPort for SimulatedHw4Esc {
    fn rx_bytes_waiting(&self) -> usize {
        self.queue.len()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.queue.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_buffer::FrameBuffer;
    use std::sync::Arc;

    #[test]
    fn xorshift_is_deterministic() {
        let mut a = XorShift32::new(7);
        let mut b = XorShift32::new(7);
        for _ in 0..10 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
        assert!(!a.chance(0.0));
    }

    #[test]
    fn kiss_bus_replies_after_latency() {
        let buffer = Arc::new(FrameBuffer::new());
        buffer.start_capture(10);
        let mut bus = SimulatedKissBus::new(2).with_latency_us(500);
        bus.attach(FrameReceiver::new(Arc::clone(&buffer)));

        bus.step(1_000);
        bus.request_telemetry(1);
        bus.step(1_400);
        assert_eq!(buffer.bytes_read(), 0);
        bus.step(1_500);
        assert!(buffer.is_complete());
        let raw = buffer.snapshot::<10>();
        assert_eq!(KissFrame::parse(&raw).unwrap().rpm, bus.frame(1).unwrap().rpm);
        assert_eq!(bus.requests(1), 1);
        assert_eq!(bus.request_log(), &[1]);
    }

    #[test]
    fn kiss_bus_drops_everything_at_full_drop_rate() {
        let buffer = Arc::new(FrameBuffer::new());
        buffer.start_capture(10);
        let faults = FaultProfile {
            drop_rate: 1.0,
            corrupt_rate: 0.0,
        };
        let mut bus = SimulatedKissBus::new(1).with_faults(faults, 3);
        bus.attach(FrameReceiver::new(Arc::clone(&buffer)));
        bus.request_telemetry(0);
        bus.step(50_000);
        assert_eq!(buffer.bytes_read(), 0);
    }

    #[test]
    fn hw4_esc_streams_on_interval() {
        let mut esc = SimulatedHw4Esc::cruising().with_interval_us(10_000);
        esc.step(0);
        assert_eq!(esc.rx_bytes_waiting(), 19);
        esc.step(25_000);
        assert_eq!(esc.packets_sent(), 3);
        assert_eq!(esc.read_byte(), Some(HW4_SYNC_BYTE));
    }
}
