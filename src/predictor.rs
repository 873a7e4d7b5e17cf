//! C4: finite-horizon predictive optimiser (spec.md §4.4).

use log::debug;

use crate::params::ControllerParams;
use crate::plant::{resolve_horizon, response_alpha};

/// Error below which heating is considered actively overshooting and the
/// predictor is bypassed entirely.
const OVERSHOOT_SHORTCUT_K: f64 = -0.3;

/// Whether `error = target - current` falls in the overshoot band that
/// makes [`predict`] bypass the optimiser entirely (spec.md §4.4 step 1).
/// Exposed so callers that must decide something *before* running the
/// predictor (e.g. whether to run adaptation) stay in lock-step with the
/// predictor's own shortcut condition rather than re-deriving it.
pub fn will_shortcut(error: f64) -> bool {
    error <= OVERSHOOT_SHORTCUT_K
}

/// Outcome of one [`predict`] call.
#[derive(Debug, Clone, Copy)]
pub struct PredictorOutcome {
    pub percent: f64,
    pub horizon: u32,
    pub eval_count: u32,
    pub cost: Option<f64>,
    pub response_alpha: f64,
    pub step_minutes: f64,
    pub shortcut: bool,
    pub heating_phase: bool,
}

/// Roll the plant forward `horizon` steps under a constant candidate valve
/// percent, with a first-order valve lag, and return the accumulated
/// quadratic-error cost contribution (control/change penalties are added by
/// the caller once per candidate, not once per step).
fn simulate_cost(
    candidate: f64,
    horizon: u32,
    error0: f64,
    gain: f64,
    loss: f64,
    step_minutes: f64,
    alpha: f64,
    last_percent: f64,
) -> f64 {
    let mut error = error0;
    let mut valve_state = last_percent;
    let loss_step = loss * step_minutes;
    let mut cost = 0.0;
    for _ in 0..horizon {
        valve_state += (candidate - valve_state) * alpha;
        let heating_effect = gain * step_minutes * (valve_state / 100.0);
        error = error * (1.0 + loss_step) - heating_effect;
        cost += error * error;
    }
    cost
}

fn candidate_cost(
    candidate: f64,
    horizon: u32,
    error0: f64,
    gain: f64,
    loss: f64,
    step_minutes: f64,
    alpha: f64,
    last_percent: Option<f64>,
    control_penalty: f64,
    change_penalty: f64,
) -> f64 {
    let base = last_percent.unwrap_or(0.0);
    let mut cost = simulate_cost(candidate, horizon, error0, gain, loss, step_minutes, alpha, base);
    cost += control_penalty * candidate * candidate;
    if let Some(last) = last_percent {
        cost += change_penalty * (candidate - last).abs();
    }
    cost
}

/// Run the coarse-to-fine candidate search and return the winning percent
/// plus the telemetry the caller needs.
///
/// `error` is `target - current`; callers are responsible for the
/// overshoot/blocked-heating shortcuts upstream of this function (spec.md
/// §4.4 step 1 is implemented here directly since the shortcut is part of
/// the predictor's own contract).
pub fn predict(
    params: &ControllerParams,
    error: f64,
    gain: f64,
    loss: f64,
    last_percent: Option<f64>,
) -> PredictorOutcome {
    let step_seconds = params.step_seconds.max(1.0);
    let step_minutes = step_seconds / 60.0;
    let alpha = response_alpha(step_seconds, params.room_time_constant_s);
    let heating_phase = error >= 0.0;

    if will_shortcut(error) {
        debug!("predict: overshoot shortcut error={error:.3}K <= {OVERSHOOT_SHORTCUT_K}K");
        return PredictorOutcome {
            percent: 0.0,
            horizon: 0,
            eval_count: 0,
            cost: None,
            response_alpha: alpha,
            step_minutes,
            shortcut: true,
            heating_phase,
        };
    }

    let horizon = resolve_horizon(params, error.abs());
    let control_penalty = params.control_penalty.max(0.0);
    let change_penalty = params.change_penalty.max(0.0);

    let mut eval_count = 0u32;
    let mut best_percent = 0.0f64;
    let mut best_cost = f64::INFINITY;

    // Coarse pass: 10% granularity over [0, 100].
    let mut coarse = 0u32;
    while coarse <= 100 {
        let candidate = coarse as f64;
        let cost = candidate_cost(
            candidate,
            horizon,
            error,
            gain,
            loss,
            step_minutes,
            alpha,
            last_percent,
            control_penalty,
            change_penalty,
        );
        eval_count += horizon;
        if cost < best_cost {
            best_cost = cost;
            best_percent = candidate;
        }
        coarse += 10;
    }

    // Fine pass: 2% granularity within +/-10 points of the coarse winner.
    let lo = (best_percent - 10.0).max(0.0) as i64;
    let hi = (best_percent + 10.0).min(100.0) as i64;
    let mut fine = lo;
    while fine <= hi {
        let candidate = fine as f64;
        let cost = candidate_cost(
            candidate,
            horizon,
            error,
            gain,
            loss,
            step_minutes,
            alpha,
            last_percent,
            control_penalty,
            change_penalty,
        );
        eval_count += horizon;
        if cost < best_cost {
            best_cost = cost;
            best_percent = candidate;
        }
        fine += 2;
    }

    debug!(
        "predict: error={error:.3}K horizon={horizon} eval_count={eval_count} best_percent={best_percent:.1} cost={best_cost:.6}"
    );

    PredictorOutcome {
        percent: best_percent,
        horizon,
        eval_count,
        cost: Some(best_cost),
        response_alpha: alpha,
        step_minutes,
        shortcut: false,
        heating_phase,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overshoot_triggers_shortcut() {
        let params = ControllerParams::default();
        let outcome = predict(&params, -0.3, 0.1, 0.01, None);
        assert!(outcome.shortcut);
        assert_eq!(outcome.percent, 0.0);
        assert_eq!(outcome.eval_count, 0);
    }

    #[test]
    fn will_shortcut_matches_predict_own_shortcut_decision() {
        for error in [-1.0, -0.3, -0.2999, 0.0, 1.0] {
            let params = ControllerParams::default();
            let outcome = predict(&params, error, 0.1, 0.01, None);
            assert_eq!(will_shortcut(error), outcome.shortcut);
        }
    }

    #[test]
    fn just_above_overshoot_threshold_runs_optimiser() {
        let params = ControllerParams::default();
        let outcome = predict(&params, -0.2, 0.1, 0.01, None);
        assert!(!outcome.shortcut);
    }

    #[test]
    fn demand_heating_yields_percent_in_bounds() {
        let params = ControllerParams::default();
        let outcome = predict(&params, 1.5, 0.1, 0.01, None);
        assert!(outcome.percent >= 0.0 && outcome.percent <= 100.0);
        assert!(outcome.eval_count > 0);
    }

    #[test]
    fn larger_error_does_not_shrink_output() {
        let params = ControllerParams::default();
        let small = predict(&params, 0.2, 0.1, 0.01, None);
        let large = predict(&params, 2.0, 0.1, 0.01, None);
        assert!(large.percent >= small.percent);
    }

    #[test]
    fn change_penalty_pulls_toward_last_percent() {
        let mut params = ControllerParams::default();
        params.change_penalty = 5.0;
        let outcome = predict(&params, 1.0, 0.1, 0.01, Some(20.0));
        // A heavy change penalty should keep the output close to last_percent
        // relative to an unconstrained run.
        let unconstrained = {
            let mut p = params.clone();
            p.change_penalty = 0.0;
            predict(&p, 1.0, 0.1, 0.01, Some(20.0))
        };
        assert!((outcome.percent - 20.0).abs() <= (unconstrained.percent - 20.0).abs());
    }
}
