//! C7: convert a valve percent into an equivalent setpoint shift, for
//! valve-less TRVs that only accept a target temperature (spec.md §4.7).

#[derive(Debug, Clone, Copy)]
pub struct FlowCapOutcome {
    pub flow_cap_k: f64,
    pub setpoint_eff_c: Option<f64>,
}

/// `flow_cap_K = cap_max_K * (1 - percent/100)`. `setpoint_eff_C` is emitted
/// only when not actively demanding heat (`current >= target`, i.e.
/// `delta_t <= 0`).
pub fn map_flow_cap(
    cap_max_k: f64,
    percent: u8,
    target_temp_c: Option<f64>,
    delta_t: Option<f64>,
) -> FlowCapOutcome {
    let flow_cap_k = cap_max_k * (1.0 - percent as f64 / 100.0);
    let setpoint_eff_c = match (target_temp_c, delta_t) {
        (Some(target), Some(dt)) if dt <= 0.0 => Some(target - flow_cap_k),
        _ => None,
    };
    FlowCapOutcome {
        flow_cap_k,
        setpoint_eff_c,
    }
}
