//! C8: deterministic debug/telemetry payload (spec.md §4.8). Pure data, no
//! side effects.

use serde::Serialize;

/// Round a value for stable test/log comparisons (spec.md §4.8).
pub fn round_for_debug(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

pub fn round_opt(value: Option<f64>, digits: i32) -> Option<f64> {
    value.map(|v| round_for_debug(v, digits))
}

/// One cycle's full telemetry, suitable for property tests and offline
/// replay (spec.md §4.8's enumerated field list).
#[derive(Debug, Clone, Serialize)]
pub struct DebugPayload {
    pub delta_t: Option<f64>,
    pub raw_percent: f64,
    pub smooth_percent: f64,
    pub percent_out: u8,
    pub flow_cap_k: f64,
    pub setpoint_eff_c: Option<f64>,
    pub gain: f64,
    pub loss: f64,
    pub horizon: u32,
    pub eval_count: u32,
    pub cost: Option<f64>,
    pub min_effective_percent: Option<f64>,
    pub dead_zone_hits: u32,
    pub trv_temp_delta: Option<f64>,
    pub trv_time_delta_s: Option<f64>,
    pub ema_slope: Option<f64>,
    pub force_open: bool,
    pub force_close: bool,
    pub too_soon: bool,
    pub target_changed: bool,
    pub trv_profile: &'static str,
    pub profile_confidence: f64,
}
