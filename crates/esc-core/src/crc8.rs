//! CRC-8 as used by the KISS telemetry frame (polynomial 0x07, seed 0).

const POLYNOMIAL: u8 = 0x07;

/// Feed one byte into a running checksum.
pub fn update(crc: u8, byte: u8) -> u8 {
    let mut crc = crc ^ byte;
    for _ in 0..8 {
        crc = if crc & 0x80 != 0 {
            (crc << 1) ^ POLYNOMIAL
        } else {
            crc << 1
        };
    }
    crc
}

/// Checksum over a whole byte range.
pub fn crc8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |crc, &byte| update(crc, byte))
}
