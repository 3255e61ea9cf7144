//! Prometheus metrics for the ESC telemetry runtime.
//!
//! Debug channels are exported one gauge per channel under the metric name
//! carried by their tag; per-motor values are labelled by motor index.

use esc_core::tags::SENSOR_TAGS;
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::LazyLock;
use std::thread;
use tiny_http::{Response, Server};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Tick Metrics
// ============================================================================

pub static TICKS_EXECUTED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new("esc_sensor_ticks_total", "Telemetry ticks executed")
        .expect("valid metric");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric registers once");
    counter
});

/// Ticks that started after their deadline
pub static TICKS_MISSED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "esc_sensor_ticks_missed_total",
        "Telemetry ticks started late",
    )
    .expect("valid metric");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric registers once");
    counter
});

pub static TICK_DURATION_US: LazyLock<Histogram> = LazyLock::new(|| {
    let histogram = Histogram::with_opts(
        HistogramOpts::new(
            "esc_sensor_tick_duration_us",
            "Time spent inside one telemetry tick in microseconds",
        )
        .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0]),
    )
    .expect("valid metric");
    REGISTRY
        .register(Box::new(histogram.clone()))
        .expect("metric registers once");
    histogram
});

// ============================================================================
// Link Health
// ============================================================================

pub static FRAMES_DECODED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "esc_sensor_frames_decoded_total",
        "Telemetry frames accepted by the decoder",
    )
    .expect("valid metric");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric registers once");
    counter
});

pub static TIMEOUTS: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "esc_sensor_timeouts_total",
        "Telemetry requests that got no complete reply",
    )
    .expect("valid metric");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric registers once");
    counter
});

pub static CRC_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "esc_sensor_crc_errors_total",
        "Frames rejected by checksum or plausibility checks",
    )
    .expect("valid metric");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric registers once");
    counter
});

/// Serial link status (1 = open, 0 = closed)
pub static LINK_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new("esc_sensor_link_active", "Telemetry link open (1) or closed (0)")
        .expect("valid metric");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("metric registers once");
    gauge
});

// ============================================================================
// Debug Channels
// ============================================================================

/// One gauge per debug channel, indexed by channel number.
pub static DEBUG_CHANNELS: LazyLock<Vec<IntGauge>> = LazyLock::new(|| {
    SENSOR_TAGS
        .iter()
        .map(|tag| {
            let help = format!("Debug channel {} ({})", tag.channel, tag.key);
            let gauge = IntGauge::new(tag.metric, help).expect("valid metric");
            REGISTRY
                .register(Box::new(gauge.clone()))
                .expect("metric registers once");
            gauge
        })
        .collect()
});

pub static MOTOR_RPM: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let gauge = IntGaugeVec::new(
        Opts::new("esc_sensor_motor_rpm", "Reported eRPM / 100 per motor"),
        &["motor"],
    )
    .expect("valid metric");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("metric registers once");
    gauge
});

pub static MOTOR_TEMPERATURE_C: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let gauge = IntGaugeVec::new(
        Opts::new("esc_sensor_motor_temperature_c", "ESC temperature per motor"),
        &["motor"],
    )
    .expect("valid metric");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("metric registers once");
    gauge
});

pub static MOTOR_DATA_AGE: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let gauge = IntGaugeVec::new(
        Opts::new(
            "esc_sensor_motor_data_age",
            "Missed updates since the last valid frame (255 = never)",
        ),
        &["motor"],
    )
    .expect("valid metric");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("metric registers once");
    gauge
});

// ============================================================================
// Combined Sample
// ============================================================================

pub static COMBINED_VOLTAGE_V: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new("esc_sensor_voltage_volts", "Mean ESC supply voltage")
        .expect("valid metric");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("metric registers once");
    gauge
});

pub static COMBINED_CURRENT_A: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge =
        Gauge::new("esc_sensor_current_amps", "Total ESC current").expect("valid metric");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("metric registers once");
    gauge
});

pub static COMBINED_CONSUMPTION_MAH: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new("esc_sensor_consumption_mah", "Total consumed charge")
        .expect("valid metric");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("metric registers once");
    gauge
});

pub static COMBINED_TEMPERATURE_C: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new("esc_sensor_temperature_c", "Hottest ESC temperature")
        .expect("valid metric");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("metric registers once");
    gauge
});

pub static COMBINED_RPM: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new("esc_sensor_rpm", "Mean reported eRPM / 100")
        .expect("valid metric");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("metric registers once");
    gauge
});

pub static COMBINED_DATA_AGE: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new("esc_sensor_data_age", "Oldest record age across motors")
        .expect("valid metric");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("metric registers once");
    gauge
});

// ============================================================================
// Metrics HTTP Server
// ============================================================================

/// Start the metrics HTTP server on the given address.
pub fn serve_metrics(bind_addr: String) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to start metrics server on {}: {}", bind_addr, e);
                return;
            }
        };

        tracing::info!("Metrics server listening on http://{}/metrics", bind_addr);

        for request in server.incoming_requests() {
            match request.url() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let mut buffer = Vec::new();
                    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
                        tracing::warn!("Failed to encode metrics: {}", e);
                        let _ = request.respond(
                            Response::from_string("Internal Server Error").with_status_code(500),
                        );
                        continue;
                    }

                    let mut response = Response::from_data(buffer);
                    if let Ok(header) = tiny_http::Header::from_bytes(
                        &b"Content-Type"[..],
                        encoder.format_type().as_bytes(),
                    ) {
                        response = response.with_header(header);
                    }
                    let _ = request.respond(response);
                }
                "/health" => {
                    let _ = request.respond(Response::from_string("OK"));
                }
                "/ready" => {
                    // Ready once the link has produced at least one valid frame
                    if FRAMES_DECODED.get() > 0 {
                        let _ = request.respond(Response::from_string("Ready"));
                    } else {
                        let _ = request
                            .respond(Response::from_string("Not Ready").with_status_code(503));
                    }
                }
                _ => {
                    let _ =
                        request.respond(Response::from_string("Not Found").with_status_code(404));
                }
            }
        }
    })
}

/// Initialize all metrics (forces lazy initialization)
pub fn init_metrics() {
    let _ = TICKS_EXECUTED.get();
    let _ = TICKS_MISSED.get();
    let _ = TICK_DURATION_US.get_sample_count();
    let _ = FRAMES_DECODED.get();
    let _ = TIMEOUTS.get();
    let _ = CRC_ERRORS.get();
    let _ = LINK_ACTIVE.get();
    let _ = DEBUG_CHANNELS.len();
    let _ = MOTOR_RPM.with_label_values(&["0"]).get();
    let _ = MOTOR_TEMPERATURE_C.with_label_values(&["0"]).get();
    let _ = MOTOR_DATA_AGE.with_label_values(&["0"]).get();
    let _ = COMBINED_VOLTAGE_V.get();
    let _ = COMBINED_CURRENT_A.get();
    let _ = COMBINED_CONSUMPTION_MAH.get();
    let _ = COMBINED_TEMPERATURE_C.get();
    let _ = COMBINED_RPM.get();
    let _ = COMBINED_DATA_AGE.get();
}

#[cfg(test)]
mod tests {
    use super::*;
    use esc_core::tags;

    #[test]
    fn debug_channels_follow_tag_order() {
        init_metrics();
        assert_eq!(DEBUG_CHANNELS.len(), SENSOR_TAGS.len());

        let names: Vec<String> = REGISTRY
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        for tag in SENSOR_TAGS {
            assert!(names.iter().any(|n| n == tag.metric), "{} missing", tag.metric);
        }
        assert!(names.iter().any(|n| n == "esc_sensor_ticks_total"));
        assert_eq!(tags::CURRENT.channel, 7);
    }
}
