use crate::runtime::error::RuntimeError;
use esc_core::{EscProtocol, EscSensorConfig};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub run_seconds: Option<u64>,
    pub protocol: Option<EscProtocol>,
    pub motors: usize,
    pub config_path: Option<PathBuf>,
    pub half_duplex: bool,
    pub update_hz: Option<u16>,
    pub json_logs: bool,
    pub log_dir: Option<PathBuf>,
    pub metrics_addr: Option<String>,
    pub drop_rate: f32,
    pub corrupt_rate: f32,
    pub seed: u32,
    /// Problems found while parsing; reported once logging is up.
    pub warnings: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            run_seconds: None,
            protocol: None,
            motors: 4,
            config_path: None,
            half_duplex: false,
            update_hz: None,
            json_logs: false,
            log_dir: None,
            metrics_addr: None,
            drop_rate: 0.0,
            corrupt_rate: 0.0,
            seed: 0x5EED,
            warnings: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Self {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--run-seconds" => {
                    if i + 1 < args.len() {
                        cfg.run_seconds = args[i + 1].parse::<u64>().ok();
                        i += 1;
                    }
                }
                "--protocol" => {
                    if i + 1 < args.len() {
                        match args[i + 1].parse::<EscProtocol>() {
                            Ok(protocol) => cfg.protocol = Some(protocol),
                            Err(e) => cfg.warnings.push(e),
                        }
                        i += 1;
                    }
                }
                "--motors" => {
                    if i + 1 < args.len() {
                        cfg.motors = args[i + 1].parse().unwrap_or(cfg.motors);
                        i += 1;
                    }
                }
                "--config" => {
                    if i + 1 < args.len() {
                        cfg.config_path = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--half-duplex" => {
                    cfg.half_duplex = true;
                }
                "--update-hz" => {
                    if i + 1 < args.len() {
                        cfg.update_hz = args[i + 1].parse::<u16>().ok();
                        i += 1;
                    }
                }
                "--json-logs" => {
                    cfg.json_logs = true;
                }
                "--log-dir" => {
                    if i + 1 < args.len() {
                        cfg.log_dir = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--metrics-addr" => {
                    if i + 1 < args.len() {
                        cfg.metrics_addr = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "--drop-rate" => {
                    if i + 1 < args.len() {
                        cfg.drop_rate = parse_rate(&args[i + 1]).unwrap_or(cfg.drop_rate);
                        i += 1;
                    }
                }
                "--corrupt-rate" => {
                    if i + 1 < args.len() {
                        cfg.corrupt_rate = parse_rate(&args[i + 1]).unwrap_or(cfg.corrupt_rate);
                        i += 1;
                    }
                }
                "--seed" => {
                    if i + 1 < args.len() {
                        cfg.seed = args[i + 1].parse().unwrap_or(cfg.seed);
                        i += 1;
                    }
                }
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                other => {
                    cfg.warnings.push(format!("ignoring unknown argument '{other}'"));
                }
            }
            i += 1;
        }
        cfg
    }

    /// Sensor configuration: the JSON file if given, then command-line
    /// overrides, then validation.
    pub fn sensor_config(&self) -> Result<EscSensorConfig, RuntimeError> {
        let mut sensor = match &self.config_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| {
                    RuntimeError::ConfigRead {
                        path: path.clone(),
                        source,
                    }
                })?;
                EscSensorConfig::from_json_str(&raw)?
            }
            None => EscSensorConfig::default(),
        };

        if let Some(protocol) = self.protocol {
            sensor.protocol = protocol;
        }
        if self.half_duplex {
            sensor.half_duplex = true;
        }
        if let Some(update_hz) = self.update_hz {
            sensor.update_hz = update_hz;
        }
        sensor.validate()?;
        Ok(sensor)
    }

    pub fn print_help() {
        println!(
            r#"esc-sensor - ESC telemetry acquisition over KISS or Hobbywing V4

USAGE:
    esc-sensor [OPTIONS]

OPTIONS:
    --protocol <NAME>       Telemetry protocol (kiss|hw4) [default: kiss]
    --motors <N>            Number of simulated motors (1-8) [default: 4]
    --config <PATH>         Load sensor configuration from a JSON file
    --half-duplex           Share one wire for TX and RX
    --update-hz <HZ>        Telemetry tick rate [default: 100]
    --run-seconds <SECS>    Run for a fixed duration then exit
    --json-logs             Output logs in JSON format (for log aggregation)
    --log-dir <PATH>        Also write logs to a daily rolling file in PATH
    --metrics-addr <ADDR>   Enable Prometheus metrics server on address (e.g., 0.0.0.0:9090)
    --drop-rate <0-1>       Fraction of simulated replies/packets lost
    --corrupt-rate <0-1>    Fraction of simulated replies/packets damaged
    --seed <N>              Seed for the simulated fault generator
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log filter (e.g., RUST_LOG=debug,esc_core=trace)

EXAMPLES:
    # Four KISS ESCs with metrics
    esc-sensor --motors 4 --metrics-addr 0.0.0.0:9090

    # Hobbywing V4 on a noisy link
    esc-sensor --protocol hw4 --corrupt-rate 0.05 --run-seconds 10
"#
        );
    }
}

fn parse_rate(raw: &str) -> Option<f32> {
    raw.parse::<f32>()
        .ok()
        .filter(|rate| (0.0..=1.0).contains(rate))
}
