pub mod config;
pub mod crc8;
pub mod error;
pub mod frame_buffer;
pub mod hal;
#[cfg(feature = "simulation")]
pub mod hal_sim;
pub mod hw4;
pub mod kiss;
pub mod sample;
pub mod sensor;
pub mod tags;
pub mod timebase;

pub use config::{EscProtocol, EscSensorConfig, ESC_SENSOR_TASK_FREQ_HZ};
pub use crc8::crc8;
pub use error::{ConfigError, FrameError};
pub use frame_buffer::{FrameBuffer, FrameReceiver};
pub use hal::{port_options, CallbackOnlyPort, MotorDriver, SerialOptions, SerialPort};
#[cfg(feature = "simulation")]
pub use hal_sim::{FaultProfile, SimulatedHw4Esc, SimulatedKissBus, SimulatedMotors};
pub use hw4::{Hw4Calibration, Hw4Decoder, Hw4Packet};
pub use kiss::{KissFrame, KissPoller};
pub use sample::{EscSample, EscSensorStore, DATA_AGE_INVALID, MAX_SUPPORTED_MOTORS};
pub use sensor::{EscSensor, EscSensorIndex, ProtocolEngine};
pub use tags::{DebugChannels, TelemetryStats};
pub use timebase::{Clock, ManualClock, TimeBase};
