use lazy_static::lazy_static;
use prometheus::{register_counter, register_gauge, Counter, Encoder, Gauge, TextEncoder};
use serde::Deserialize;

lazy_static! {
    pub static ref CHANNEL_CHANGES: Counter = register_counter!(
        "zaptv_channel_changes_total",
        "Number of times a channel was tuned"
    )
    .unwrap();
    pub static ref STREAM_FALLBACKS: Counter = register_counter!(
        "zaptv_stream_fallbacks_total",
        "Number of times playback moved on to the next stream candidate"
    )
    .unwrap();
    pub static ref STREAMS_EXHAUSTED: Counter = register_counter!(
        "zaptv_streams_exhausted_total",
        "Number of channels whose stream candidates all failed"
    )
    .unwrap();
    pub static ref STALE_CALLBACKS: Counter = register_counter!(
        "zaptv_stale_callbacks_total",
        "Sink callbacks discarded because a newer load superseded them"
    )
    .unwrap();
    pub static ref VISIBLE_CHANNELS: Gauge = register_gauge!(
        "zaptv_visible_channels",
        "Channels visible under the active category"
    )
    .unwrap();
}

pub fn gather_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitoringConfig {
    #[serde(default = "default_monitoring_enabled")]
    pub enabled: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: default_monitoring_enabled(),
        }
    }
}

fn default_monitoring_enabled() -> bool {
    true
}
