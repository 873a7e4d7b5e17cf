//! C5: hysteresis, rate limiting, dead-zone learning, and saturation
//! (spec.md §4.5), applied to the predictor's raw output.

use log::debug;

use crate::params::ControllerParams;
use crate::state::KeyState;

/// Minimum absolute target change that counts as a "target changed this
/// cycle" bypass (spec.md §4.5 step 1).
const TARGET_CHANGE_THRESHOLD_K: f64 = 0.05;

#[derive(Debug, Clone, Copy, Default)]
pub struct PostProcessOutcome {
    pub percent_out: u8,
    pub raw_percent: f64,
    pub smooth_percent: f64,
    pub too_soon: bool,
    pub target_changed: bool,
    pub force_open: bool,
    pub force_close: bool,
    pub delta_t: Option<f64>,
    pub trv_temp_delta: Option<f64>,
    pub trv_time_delta_s: Option<f64>,
}

pub struct PostProcessInput {
    pub now: f64,
    pub target_temp_c: Option<f64>,
    pub current_temp_c: Option<f64>,
    pub trv_temp_c: Option<f64>,
    pub tolerance_k: f64,
    pub delta_t: Option<f64>,
}

/// Apply the fixed post-processing pipeline to a raw MPC percent and mutate
/// `state` with the committed result plus any dead-zone learning updates.
pub fn post_process(
    state: &mut KeyState,
    params: &ControllerParams,
    input: &PostProcessInput,
    raw_percent: f64,
) -> PostProcessOutcome {
    let now = input.now;

    // --- step 1: target-change bypass ---
    let mut target_changed = false;
    if let Some(target) = input.target_temp_c {
        if let Some(prev_target) = state.last_target_c {
            target_changed = (target - prev_target).abs() >= TARGET_CHANGE_THRESHOLD_K;
        }
        state.last_target_c = Some(target);
    }

    // A clock moving backwards (spec.md §7 StaleState) must not read as
    // "too soon" — that would lock the output at a stale last_percent
    // instead of treating the cycle as fresh, mirroring plant::observed_rate
    // rejecting a non-positive dt.
    let since_update = now - state.last_update_ts;
    let since_hold = now - state.last_hold_ts;
    let mut too_soon = (since_update >= 0.0 && since_update < params.min_update_interval_s)
        || (since_hold >= 0.0 && since_hold < params.min_percent_hold_time_s);
    if target_changed {
        too_soon = false;
    }

    // --- step 2: force-close / force-open on strong over/undershoot ---
    let mut force_close = false;
    let mut force_open = false;
    let mut delta_t = input.delta_t;
    if let (Some(target), Some(current)) = (input.target_temp_c, input.current_temp_c) {
        let diff = target - current;
        force_close = diff <= -params.band_far_k;
        force_open = diff >= params.band_far_k;
        if delta_t.is_none() {
            delta_t = Some(diff);
        }
    }

    let mut smooth = raw_percent;
    if force_close {
        smooth = 0.0;
        too_soon = false;
    }

    // --- step 3: minimum-effective clamp (pre-smoothing) ---
    if let Some(min_eff) = state.min_effective_percent {
        if min_eff > 0.0 && smooth > 0.0 && smooth < min_eff && !force_close {
            debug!("postprocess: clamping smooth {smooth:.2} up to min_effective {min_eff:.2}");
            smooth = min_eff;
        }
    }

    // --- step 4: smoothing ---
    // The MPC strategy's change_penalty already discourages large jumps, so
    // `smooth` is taken as-is here (see DESIGN.md Open Question #1); the EMA
    // branch is kept for a future non-MPC strategy sharing this pipeline.
    let smooth_percent = smooth;

    // --- step 5: hysteresis + rate limit ---
    let last_percent = state.last_percent;
    let committed = if let Some(last) = last_percent {
        let change = (smooth_percent - last).abs();
        let within_hysteresis =
            change < params.hysteresis_pts && !force_close && !target_changed && !force_open;
        if (within_hysteresis) || (too_soon && !force_open) {
            last
        } else {
            smooth_percent
        }
    } else {
        smooth_percent
    };

    let changed_from_last = last_percent != Some(committed);
    if changed_from_last || last_percent.is_none() {
        state.last_percent = Some(committed);
        state.last_update_ts = now;
        state.last_hold_ts = now;
    }

    // --- step 6: rate cap ---
    let mut new_percent = committed;
    if let Some(last) = last_percent {
        if !force_open && !force_close {
            let delta = new_percent - last;
            if delta.abs() > params.du_max_pct {
                new_percent = last + params.du_max_pct * delta.signum();
                state.last_percent = Some(new_percent);
            }
        }
    }

    // --- step 7: round + saturate, then re-clamp to min-effective ---
    let mut percent_out = new_percent.round().clamp(0.0, 100.0) as i64;
    if let Some(min_eff) = state.min_effective_percent {
        if min_eff > 0.0 && percent_out > 0 && (percent_out as f64) < min_eff {
            percent_out = min_eff.round() as i64;
            state.last_percent = Some(percent_out as f64);
            state.last_update_ts = now;
            debug!("postprocess: re-clamping rounded percent_out up to min_effective {min_eff:.2}");
        }
    }
    let percent_out = percent_out.clamp(0, 100) as u8;

    // --- dead-zone learning ---
    let (trv_temp_delta, trv_time_delta_s) =
        run_deadzone_learning(state, params, input, percent_out, delta_t);

    PostProcessOutcome {
        percent_out,
        raw_percent,
        smooth_percent,
        too_soon,
        target_changed,
        force_open,
        force_close,
        delta_t,
        trv_temp_delta,
        trv_time_delta_s,
    }
}

/// Dead-zone hit/raise/decay/freeze state machine (spec.md §4.5's
/// "Dead-zone learning" section).
fn run_deadzone_learning(
    state: &mut KeyState,
    params: &ControllerParams,
    input: &PostProcessInput,
    committed_percent: u8,
    delta_t: Option<f64>,
) -> (Option<f64>, Option<f64>) {
    let Some(trv_temp) = input.trv_temp_c else {
        // No TRV sensor this cycle: freeze the counter, the baseline, and the
        // learned minimum untouched (spec.md §4.5: "do not mutate").
        return (None, None);
    };

    // `last_trv_temp` being unset is the real "no baseline yet" signal;
    // `last_trv_temp_ts` can legitimately be 0.0 on a host whose monotonic
    // clock starts at zero, so it is never compared against zero.
    if state.last_trv_temp.is_none() {
        state.last_trv_temp = Some(trv_temp);
        state.last_trv_temp_ts = input.now;
        return (None, None);
    }

    let last_trv_temp = state.last_trv_temp.unwrap();
    let temp_delta = trv_temp - last_trv_temp;
    let time_delta = input.now - state.last_trv_temp_ts;
    let eval_after = params.dz_time_s.max(1.0);

    if time_delta < eval_after {
        return (Some(temp_delta), Some(time_delta));
    }

    let needs_heat = delta_t.map(|d| d > input.tolerance_k).unwrap_or(false);
    let small_command = committed_percent > 0 && (committed_percent as f64) <= params.dz_threshold_pct;
    let weak_response = temp_delta <= params.dz_temp_delta_k;

    if small_command && needs_heat && weak_response {
        state.dead_zone_hits += 1;
        debug!(
            "deadzone: hit {}/{} temp_delta={temp_delta:.3} command={committed_percent}%",
            state.dead_zone_hits, params.dz_hits_required
        );
        if params.dz_hits_required > 0 && state.dead_zone_hits >= params.dz_hits_required {
            let proposed = committed_percent as f64 + params.dz_raise_pct;
            let current_min = state.min_effective_percent.unwrap_or(0.0);
            let new_min = proposed.max(current_min).min(100.0);
            state.min_effective_percent = Some(new_min);
            state.dead_zone_hits = 0;
            debug!("deadzone: raised min_effective_percent to {new_min:.2}");
        }
    } else {
        if let Some(min_eff) = state.min_effective_percent {
            if temp_delta > params.dz_temp_delta_k {
                let decayed = min_eff - params.dz_decay_pct;
                state.min_effective_percent = if decayed > 0.0 { Some(decayed) } else { None };
                debug!("deadzone: decayed min_effective_percent to {:?}", state.min_effective_percent);
            }
        }
        state.dead_zone_hits = 0;
    }

    state.last_trv_temp = Some(trv_temp);
    state.last_trv_temp_ts = input.now;

    (Some(temp_delta), Some(time_delta))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ControllerParams {
        ControllerParams::default()
    }

    #[test]
    fn cold_start_commits_raw_percent() {
        let mut state = KeyState::default();
        let p = params();
        let input = PostProcessInput {
            now: 100.0,
            target_temp_c: Some(22.0),
            current_temp_c: Some(20.5),
            trv_temp_c: None,
            tolerance_k: 0.2,
            delta_t: Some(1.5),
        };
        let out = post_process(&mut state, &p, &input, 42.0);
        assert_eq!(out.percent_out, 42);
        assert_eq!(state.last_percent, Some(42.0));
    }

    #[test]
    fn hysteresis_holds_small_changes() {
        let mut state = KeyState::default();
        state.last_percent = Some(40.0);
        state.last_update_ts = 0.0;
        state.last_hold_ts = 0.0;
        state.last_target_c = Some(22.0);
        let mut p = params();
        p.hysteresis_pts = 5.0;
        p.min_update_interval_s = 0.0;
        // Keep |target - current| under band_far_k so force_open/close don't
        // pre-empt the hysteresis gate this test is exercising.
        let input = PostProcessInput {
            now: 1000.0,
            target_temp_c: Some(22.0),
            current_temp_c: Some(21.9),
            trv_temp_c: None,
            tolerance_k: 0.2,
            delta_t: Some(0.1),
        };
        let out = post_process(&mut state, &p, &input, 42.0);
        assert_eq!(out.percent_out, 40);
    }

    fn dummy_input() -> PostProcessInput {
        PostProcessInput {
            now: 0.0,
            target_temp_c: Some(22.0),
            current_temp_c: Some(21.9),
            trv_temp_c: None,
            tolerance_k: 0.2,
            delta_t: Some(0.1),
        }
    }

    #[test]
    fn backwards_clock_is_not_too_soon() {
        let mut state = KeyState::default();
        state.last_percent = Some(10.0);
        state.last_update_ts = 1000.0;
        state.last_hold_ts = 1000.0;
        state.last_target_c = Some(22.0);
        let mut p = params();
        p.min_update_interval_s = 60.0;
        p.hysteresis_pts = 0.0;
        let input = PostProcessInput {
            now: 5.0,
            target_temp_c: Some(22.0),
            current_temp_c: Some(21.9),
            trv_temp_c: None,
            tolerance_k: 0.2,
            delta_t: Some(0.1),
        };
        let out = post_process(&mut state, &p, &input, 40.0);
        assert!(!out.too_soon);
        assert_eq!(out.percent_out, 40);
    }

    #[test]
    fn target_change_bypasses_too_soon() {
        let mut state = KeyState::default();
        state.last_percent = Some(10.0);
        state.last_update_ts = 990.0;
        state.last_hold_ts = 990.0;
        state.last_target_c = Some(20.0);
        let mut p = params();
        p.min_update_interval_s = 60.0;
        let input = PostProcessInput {
            now: 1000.0,
            target_temp_c: Some(21.0),
            current_temp_c: Some(19.0),
            trv_temp_c: None,
            tolerance_k: 0.2,
            delta_t: Some(2.0),
        };
        let out = post_process(&mut state, &p, &input, 60.0);
        assert!(out.target_changed);
        assert!(!out.too_soon);
        assert_eq!(out.percent_out, 60);
    }

    #[test]
    fn force_close_on_strong_overshoot() {
        let mut state = KeyState::default();
        state.last_percent = Some(50.0);
        state.last_target_c = Some(22.0);
        let mut p = params();
        p.band_far_k = 0.3;
        let input = PostProcessInput {
            now: 10.0,
            target_temp_c: Some(22.0),
            current_temp_c: Some(22.5),
            trv_temp_c: None,
            tolerance_k: 0.2,
            delta_t: Some(-0.5),
        };
        let out = post_process(&mut state, &p, &input, 0.0);
        assert!(out.force_close);
        assert_eq!(out.percent_out, 0);
    }

    #[test]
    fn min_effective_clamp_raises_small_commands() {
        let mut state = KeyState::default();
        state.min_effective_percent = Some(15.0);
        let p = params();
        let input = dummy_input();
        let out = post_process(&mut state, &p, &input, 5.0);
        assert_eq!(out.percent_out, 15);
    }

    #[test]
    fn dead_zone_raises_after_required_hits() {
        let mut state = KeyState::default();
        let mut p = params();
        p.dz_hits_required = 2;
        p.dz_time_s = 100.0;
        p.dz_threshold_pct = 20.0;
        p.dz_temp_delta_k = 0.1;
        p.dz_raise_pct = 2.0;
        p.min_update_interval_s = 0.0;
        p.hysteresis_pts = 0.0;

        // seed TRV baseline
        let input0 = PostProcessInput {
            now: 0.0,
            target_temp_c: Some(22.0),
            current_temp_c: Some(20.0),
            trv_temp_c: Some(19.0),
            tolerance_k: 0.2,
            delta_t: Some(2.0),
        };
        post_process(&mut state, &p, &input0, 10.0);

        let input1 = PostProcessInput {
            now: 100.0,
            target_temp_c: Some(22.0),
            current_temp_c: Some(20.0),
            trv_temp_c: Some(19.05),
            tolerance_k: 0.2,
            delta_t: Some(2.0),
        };
        post_process(&mut state, &p, &input1, 10.0);
        assert_eq!(state.dead_zone_hits, 1);

        let input2 = PostProcessInput {
            now: 200.0,
            target_temp_c: Some(22.0),
            current_temp_c: Some(20.0),
            trv_temp_c: Some(19.08),
            tolerance_k: 0.2,
            delta_t: Some(2.0),
        };
        post_process(&mut state, &p, &input2, 10.0);
        assert_eq!(state.dead_zone_hits, 0);
        assert_eq!(state.min_effective_percent, Some(12.0));
    }

    #[test]
    fn missing_trv_sensor_freezes_learned_minimum() {
        let mut state = KeyState::default();
        state.min_effective_percent = Some(15.0);
        state.dead_zone_hits = 1;
        let p = params();
        let input = PostProcessInput {
            trv_temp_c: None,
            ..dummy_input()
        };
        post_process(&mut state, &p, &input, 5.0);
        assert_eq!(state.min_effective_percent, Some(15.0));
        assert_eq!(state.dead_zone_hits, 1);
    }
}
