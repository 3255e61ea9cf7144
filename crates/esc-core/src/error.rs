use thiserror::Error;

/// Why a completed frame or packet was thrown away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("crc mismatch: computed {expected:#04x}, frame carries {actual:#04x}")]
    CrcMismatch { expected: u8, actual: u8 },
    #[error("packet field at byte {offset} out of range ({value:#04x} >= {limit:#04x})")]
    Implausible { offset: usize, value: u8, limit: u8 },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("hw4 current gain must be non-zero")]
    ZeroCurrentGain,
    #[error("update rate must be non-zero")]
    ZeroUpdateRate,
    #[error("invalid esc sensor config: {0}")]
    Parse(#[from] serde_json::Error),
}
