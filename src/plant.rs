//! C3: discrete first-order plant model, online adaptation, and advisory
//! TRV response-profiling (spec.md §4.3).

use log::debug;

use crate::params::ControllerParams;
use crate::state::{push_bounded, KeyState, ProfileSample, TrvProfile};

/// First-order lag coefficient `1 - exp(-dt/tau)`.
pub fn response_alpha(step_seconds: f64, room_time_constant_s: f64) -> f64 {
    let tau = if room_time_constant_s > 0.0 {
        room_time_constant_s
    } else {
        step_seconds
    };
    1.0 - (-step_seconds / tau).exp()
}

/// Linear-ramp horizon selection: longer look-ahead for larger errors.
pub fn resolve_horizon(params: &ControllerParams, error_mag: f64) -> u32 {
    let min_h = params.horizon_min_steps.max(1);
    let max_h = params.horizon_max_steps.max(min_h);
    let low = params.small_error_threshold_k.max(0.0);
    let high = params.large_error_threshold_k.max(low + 1e-6);

    if error_mag <= low {
        return min_h;
    }
    if error_mag >= high {
        return max_h;
    }
    let ratio = (error_mag - low) / (high - low);
    let horizon = min_h as f64 + ratio * (max_h - min_h) as f64;
    horizon.round().max(1.0) as u32
}

fn clamp(value: f64, lower: f64, upper: f64) -> f64 {
    value.max(lower).min(upper)
}

/// Outlier-filtered running mean: reject `candidate` if it deviates from the
/// buffer's mean by more than `sigma` standard deviations, otherwise fold it
/// into the bounded buffer and return the new mean.
fn filtered_sample_update(buf: &mut Vec<f64>, candidate: f64, window: usize, sigma: f64) -> f64 {
    if window == 0 {
        return candidate;
    }

    if buf.len() >= 2 {
        let mean = buf.iter().sum::<f64>() / buf.len() as f64;
        let variance = buf.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / buf.len() as f64;
        let stddev = if variance > 0.0 { variance.sqrt() } else { 0.0 };
        if sigma > 0.0 && stddev > 0.0 && (candidate - mean).abs() > sigma * stddev {
            return mean;
        }
    }

    push_bounded(buf, candidate, window);
    buf.iter().sum::<f64>() / buf.len() as f64
}

/// Compute `(current - last) / dt_min` from two timestamped readings, or
/// `None` if the elapsed interval can't be trusted as a rate measurement.
///
/// `last_ts` itself can legitimately be 0.0 on a host whose monotonic clock
/// starts at zero, so callers signal "no prior reading" through a separate
/// `Option` rather than through the timestamp. An interval shorter than
/// `min_interval_s` is rejected even when positive: `dt_min` in the single
/// digits of seconds turns ordinary sensor jitter into a rate estimate many
/// times the room's real thermal response, so the same floor the
/// post-processor uses between committed updates (`min_update_interval_s`)
/// is reused here as the shortest gap worth trusting for adaptation.
pub(crate) fn observed_rate(last: f64, last_ts: f64, current: f64, now: f64, min_interval_s: f64) -> Option<f64> {
    let dt_s = now - last_ts;
    if dt_s <= 0.0 || dt_s < min_interval_s {
        return None;
    }
    let dt_min = dt_s / 60.0;
    Some((current - last) / dt_min)
}

/// Run the per-cycle online adaptation step (spec.md §4.3 steps 1-5).
///
/// Only has an effect when the previous cycle left a usable
/// `(last_sample_temp, last_percent, dt > 0)` triple and `adapt_enabled` is
/// set; otherwise this is a no-op (first cycle after state creation, or
/// adaptation disabled).
pub fn adapt(state: &mut KeyState, params: &ControllerParams, now: f64, current_temp: f64) {
    if !params.adapt_enabled {
        return;
    }
    let Some(last_temp) = state.last_sample_temp else {
        return;
    };
    let Some(observed_rate) = observed_rate(
        last_temp,
        state.last_sample_ts,
        current_temp,
        now,
        params.min_update_interval_s,
    ) else {
        return;
    };
    let last_percent = state.last_percent.unwrap_or(0.0).clamp(0.0, 100.0);

    // Phase is decided by the error sign over the interval just elapsed
    // (the target that was active when `last_temp` was sampled, vs.
    // `last_temp` itself), independent of the valve position that drove it.
    // A room can be actuated open while still net-cooling (rooms cool
    // faster than TRVs heat; spec.md §4.3), and that interval must land in
    // the cooling buffers, not the heating ones. `last_sample_target_c` is
    // used rather than `last_target_c`, since a blocked cycle between the
    // sample and now can move `last_target_c` without a new sample ever
    // being taken.
    let heating_phase = state
        .last_sample_target_c
        .map(|target| target - last_temp >= 0.0)
        .unwrap_or(true);

    if last_percent > 1.0 {
        let gain_candidate = observed_rate / (last_percent / 100.0);
        let samples = if heating_phase {
            &mut state.gain_heat_samples
        } else {
            &mut state.gain_cool_samples
        };
        let current = if heating_phase {
            state.gain_heat_est
        } else {
            state.gain_cool_est
        }
        .unwrap_or(params.gain_min.max(state.gain_est));

        if (0.0..params.gain_max * 10.0).contains(&gain_candidate) {
            let filtered = filtered_sample_update(
                samples,
                gain_candidate,
                params.adapt_window,
                params.adapt_outlier_sigma,
            );
            let new_gain = clamp(
                (1.0 - params.adapt_alpha) * current + params.adapt_alpha * filtered,
                params.gain_min,
                params.gain_max,
            );
            debug!(
                "adapt: gain_candidate={gain_candidate:.4} accepted, new_gain={new_gain:.4} (heating={heating_phase})"
            );
            if heating_phase {
                state.gain_heat_est = Some(new_gain);
            } else {
                state.gain_cool_est = Some(new_gain);
            }
        } else {
            let shrunk = clamp(
                current * (1.0 - 0.5 * params.adapt_alpha),
                params.gain_min,
                params.gain_max,
            );
            debug!(
                "adapt: gain_candidate={gain_candidate:.4} rejected, shrinking estimate to {shrunk:.4}"
            );
            if heating_phase {
                state.gain_heat_est = Some(shrunk);
            } else {
                state.gain_cool_est = Some(shrunk);
            }
        }
    } else {
        let loss_candidate = (-observed_rate).max(0.0);
        let samples = if heating_phase {
            &mut state.loss_heat_samples
        } else {
            &mut state.loss_cool_samples
        };
        let current = if heating_phase {
            state.loss_heat_est
        } else {
            state.loss_cool_est
        }
        .unwrap_or(params.loss_min.max(state.loss_est));

        if loss_candidate < params.loss_max * 10.0 {
            let filtered = filtered_sample_update(
                samples,
                loss_candidate,
                params.adapt_window,
                params.adapt_outlier_sigma,
            );
            let new_loss = clamp(
                (1.0 - params.adapt_alpha) * current + params.adapt_alpha * filtered,
                params.loss_min,
                params.loss_max,
            );
            debug!(
                "adapt: loss_candidate={loss_candidate:.4} accepted, new_loss={new_loss:.4} (heating={heating_phase})"
            );
            if heating_phase {
                state.loss_heat_est = Some(new_loss);
            } else {
                state.loss_cool_est = Some(new_loss);
            }
        } else {
            let shrunk = clamp(
                current * (1.0 - 0.5 * params.adapt_alpha),
                params.loss_min,
                params.loss_max,
            );
            debug!(
                "adapt: loss_candidate={loss_candidate:.4} rejected, shrinking estimate to {shrunk:.4}"
            );
            if heating_phase {
                state.loss_heat_est = Some(shrunk);
            } else {
                state.loss_cool_est = Some(shrunk);
            }
        }
    }
}

/// Select the gain estimate to drive this cycle's predictor, falling back
/// through phase-specific, opposite-phase, blended, and default estimates.
pub fn select_gain_estimate(state: &KeyState, params: &ControllerParams, heating: bool) -> f64 {
    let candidates = if heating {
        [
            state.gain_heat_est,
            state.gain_cool_est,
            Some(state.gain_est),
        ]
    } else {
        [
            state.gain_cool_est,
            state.gain_heat_est,
            Some(state.gain_est),
        ]
    };
    candidates
        .into_iter()
        .flatten()
        .next()
        .unwrap_or(params.gain_min.max(state.gain_est))
}

pub fn select_loss_estimate(state: &KeyState, params: &ControllerParams, heating: bool) -> f64 {
    let candidates = if heating {
        [
            state.loss_heat_est,
            state.loss_cool_est,
            Some(state.loss_est),
        ]
    } else {
        [
            state.loss_cool_est,
            state.loss_heat_est,
            Some(state.loss_est),
        ]
    };
    candidates
        .into_iter()
        .flatten()
        .next()
        .unwrap_or(params.loss_min.max(state.loss_est))
}

/// Refresh `state.gain_est`/`state.loss_est` (the blended, telemetry-facing
/// values) and clamp them to the configured bounds.
pub fn refresh_blended_estimates(state: &mut KeyState, params: &ControllerParams, heating: bool) {
    let gain = clamp(
        select_gain_estimate(state, params, heating),
        params.gain_min,
        params.gain_max,
    );
    let loss = clamp(
        select_loss_estimate(state, params, heating),
        params.loss_min,
        params.loss_max,
    );
    state.gain_est = gain;
    state.loss_est = loss;
}

const PROFILE_SAMPLE_CAP: usize = 60;
const PROFILE_MIN_SAMPLES: usize = 10;

/// Record a (commanded_percent, observed_rate) pair for advisory TRV
/// response-profiling. Never consulted by [`crate::predictor`].
pub fn observe_profile_sample(state: &mut KeyState, percent: f64, rate: f64) {
    if percent <= 0.0 || !rate.is_finite() {
        return;
    }
    push_bounded(&mut state.profile_samples, ProfileSample { percent, rate }, PROFILE_SAMPLE_CAP);
    classify_profile(state);
}

/// Classify accumulated samples into `linear`/`threshold`/`exponential` once
/// enough data has accrued; `unknown` (with zero confidence) until then.
fn classify_profile(state: &mut KeyState) {
    let samples = &state.profile_samples;
    if samples.len() < PROFILE_MIN_SAMPLES {
        state.trv_profile = TrvProfile::Unknown;
        state.profile_confidence = 0.0;
        return;
    }

    let low_avg = bucket_avg_rate(samples, 0.0, 30.0);
    let high_avg = bucket_avg_rate(samples, 60.0, 100.0);

    let (profile, confidence) = match (low_avg, high_avg) {
        (Some(low), Some(high)) if high > 0.0 && low <= 0.1 * high => {
            (TrvProfile::Threshold, (1.0 - (low / high).max(0.0)).clamp(0.0, 1.0))
        }
        (Some(low), Some(high)) if high > 0.0 => {
            let ratio = low / high;
            // A strictly proportional response keeps low/high close to the
            // ratio of the bucket midpoints (15/80); sub-proportional growth
            // reads as exponential.
            let expected = 15.0 / 80.0;
            if (ratio - expected).abs() < 0.15 {
                (TrvProfile::Linear, 1.0 - (ratio - expected).abs() / 0.15)
            } else {
                (TrvProfile::Exponential, ((expected - ratio) / expected).clamp(0.0, 1.0))
            }
        }
        _ => (TrvProfile::Unknown, 0.0),
    };

    state.trv_profile = profile;
    state.profile_confidence = confidence.clamp(0.0, 1.0);
}

fn bucket_avg_rate(samples: &[ProfileSample], lo: f64, hi: f64) -> Option<f64> {
    let in_bucket: Vec<f64> = samples
        .iter()
        .filter(|s| s.percent >= lo && s.percent <= hi)
        .map(|s| s.rate)
        .collect();
    if in_bucket.is_empty() {
        return None;
    }
    Some(in_bucket.iter().sum::<f64>() / in_bucket.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_alpha_is_between_zero_and_one() {
        let a = response_alpha(300.0, 600.0);
        assert!(a > 0.0 && a < 1.0);
    }

    #[test]
    fn horizon_clamps_at_extremes() {
        let params = ControllerParams::default();
        assert_eq!(resolve_horizon(&params, 0.0), params.horizon_min_steps);
        assert_eq!(resolve_horizon(&params, 100.0), params.horizon_max_steps);
    }

    #[test]
    fn horizon_ramps_between_bounds() {
        let params = ControllerParams::default();
        let mid = resolve_horizon(&params, 0.5);
        assert!(mid > params.horizon_min_steps && mid < params.horizon_max_steps);
    }

    #[test]
    fn gain_estimate_falls_back_to_param_default() {
        let state = KeyState::default();
        let params = ControllerParams::default();
        let gain = select_gain_estimate(&state, &params, true);
        assert!(gain >= params.gain_min && gain <= params.gain_max);
    }

    #[test]
    fn adapt_no_op_on_first_cycle() {
        let mut state = KeyState::default();
        let params = ControllerParams::default();
        adapt(&mut state, &params, 100.0, 20.0);
        assert_eq!(state.gain_heat_est, None);
        assert_eq!(state.loss_heat_est, None);
    }

    #[test]
    fn adapt_estimates_gain_when_valve_open() {
        let mut state = KeyState::default();
        state.last_sample_temp = Some(20.0);
        state.last_sample_ts = 0.0;
        state.last_percent = Some(50.0);
        state.last_sample_target_c = Some(21.0);
        let params = ControllerParams::default();
        adapt(&mut state, &params, 300.0, 20.5);
        assert!(state.gain_heat_est.is_some());
    }

    #[test]
    fn adapt_estimates_loss_when_valve_closed() {
        let mut state = KeyState::default();
        state.last_sample_temp = Some(20.5);
        state.last_sample_ts = 0.0;
        state.last_percent = Some(0.0);
        state.last_sample_target_c = Some(19.0);
        let params = ControllerParams::default();
        adapt(&mut state, &params, 300.0, 20.3);
        assert!(state.loss_cool_est.is_some());
    }

    #[test]
    fn adapt_ignores_an_interval_shorter_than_min_update_interval() {
        let mut state = KeyState::default();
        state.last_sample_temp = Some(20.0);
        state.last_sample_ts = 0.0;
        state.last_percent = Some(50.0);
        state.last_sample_target_c = Some(21.0);
        let params = ControllerParams::default();
        adapt(&mut state, &params, 1.0, 20.5);
        assert_eq!(state.gain_heat_est, None);
    }

    #[test]
    fn adapt_writes_cooling_phase_gain_when_valve_open_but_room_net_cools() {
        // Valve actuated open (last_percent > 1%) but the room was already
        // above target at the start of the interval: the observed rate must
        // land in the cooling-phase gain buffer, not the heating one, since
        // phase is decided by the previous error sign, not valve position.
        let mut state = KeyState::default();
        state.last_sample_temp = Some(22.0);
        state.last_sample_ts = 0.0;
        state.last_percent = Some(30.0);
        state.last_sample_target_c = Some(21.0);
        let params = ControllerParams::default();
        adapt(&mut state, &params, 300.0, 21.8);
        assert!(state.gain_cool_est.is_some());
        assert!(state.gain_heat_est.is_none());
    }

    #[test]
    fn adapt_reads_sample_target_not_current_target_across_a_blocked_cycle() {
        // Simulates: a sample is taken under target=21; a later, unrelated
        // cycle (e.g. blocked by a window) moves `last_target_c` to 16
        // without taking a new sample; adapt() must still classify phase
        // against the target that was active when the sample was taken.
        let mut state = KeyState::default();
        state.last_sample_temp = Some(20.0);
        state.last_sample_ts = 0.0;
        state.last_percent = Some(30.0);
        state.last_sample_target_c = Some(21.0);
        state.last_target_c = Some(16.0);
        let params = ControllerParams::default();
        adapt(&mut state, &params, 300.0, 20.5);
        assert!(state.gain_heat_est.is_some());
        assert!(state.gain_cool_est.is_none());
    }

    #[test]
    fn profile_stays_unknown_until_enough_samples() {
        let mut state = KeyState::default();
        for i in 0..5 {
            observe_profile_sample(&mut state, 10.0 + i as f64, 0.01);
        }
        assert_eq!(state.trv_profile, TrvProfile::Unknown);
    }

    #[test]
    fn profile_classifies_threshold_response() {
        let mut state = KeyState::default();
        for _ in 0..12 {
            observe_profile_sample(&mut state, 10.0, 0.0005);
        }
        for _ in 0..12 {
            observe_profile_sample(&mut state, 80.0, 0.05);
        }
        assert_eq!(state.trv_profile, TrvProfile::Threshold);
    }
}
