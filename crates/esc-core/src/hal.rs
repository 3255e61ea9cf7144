use crate::config::{EscProtocol, EscSensorConfig};

/// Buffered receive side of the telemetry UART. Only HW4 reads through this;
/// KISS bytes arrive through a [`crate::FrameReceiver`] instead.
pub trait SerialPort: Send {
    fn rx_bytes_waiting(&self) -> usize;
    fn read_byte(&mut self) -> Option<u8>;
}

/// The motor output driver that owns the ESC signal lines.
pub trait MotorDriver: Send {
    fn motor_count(&self) -> usize;
    fn motors_enabled(&self) -> bool;
    /// Set the telemetry-request bit on the next command sent to `motor`.
    fn request_telemetry(&mut self, motor: usize);
}

/// A port that never has data. Handy for KISS, where the tick never reads
/// from the buffered side.
#[derive(Debug, Default, Clone, Copy)]
pub struct CallbackOnlyPort;

impl SerialPort for CallbackOnlyPort {
    fn rx_bytes_waiting(&self) -> usize {
        0
    }

    fn read_byte(&mut self) -> Option<u8> {
        None
    }
}

/// How the transport has to open the port for a given protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialOptions {
    pub baud_rate: u32,
    pub stop_bits: u8,
    pub parity: bool,
    pub inverted: bool,
    pub bidirectional: bool,
    /// KISS bytes are pushed from the receive interrupt; HW4 is polled.
    pub rx_callback: bool,
}

pub const KISS_BAUDRATE: u32 = 115_200;
pub const HW4_BAUDRATE: u32 = 19_200;

pub fn port_options(config: &EscSensorConfig) -> SerialOptions {
    match config.protocol {
        EscProtocol::Kiss => SerialOptions {
            baud_rate: KISS_BAUDRATE,
            stop_bits: 1,
            parity: false,
            inverted: false,
            bidirectional: config.half_duplex,
            rx_callback: true,
        },
        EscProtocol::Hw4 => SerialOptions {
            baud_rate: HW4_BAUDRATE,
            stop_bits: 1,
            parity: false,
            inverted: false,
            bidirectional: config.half_duplex,
            rx_callback: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_follow_protocol() {
        let mut cfg = EscSensorConfig::default();
        let kiss = port_options(&cfg);
        assert_eq!(kiss.baud_rate, KISS_BAUDRATE);
        assert!(kiss.rx_callback);
        assert!(!kiss.bidirectional);

        cfg.protocol = EscProtocol::Hw4;
        cfg.half_duplex = true;
        let hw4 = port_options(&cfg);
        assert_eq!(hw4.baud_rate, HW4_BAUDRATE);
        assert!(!hw4.rx_callback);
        assert!(hw4.bidirectional);
    }
}
