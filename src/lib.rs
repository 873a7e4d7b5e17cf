//! Predictive thermostatic-valve control core: per-room model-predictive
//! control, online plant adaptation, dead-zone learning, group distribution,
//! and a persistence bridge for a smart-heating host integration.
//!
//! This crate is a pure compute library (spec `§6.3`: no device I/O, no
//! service dispatch, no CLI). A host collaborator owns sensors, actuators,
//! scheduling, and per-vendor device quirks; it calls [`compute`] once per
//! control cycle per room and does whatever it likes with the result.
//!
//! ```ignore
//! let mut store = ControlStore::new();
//! let params = ControllerParams::default();
//! let key = build_key("living_room", "trv_1", Some(21.5));
//! let input = ControllerInput {
//!     now: 0.0,
//!     target_temp_c: Some(21.5),
//!     current_temp_c: Some(20.8),
//!     trv_temp_c: Some(20.5),
//!     tolerance_k: 0.2,
//!     temp_slope_k_per_min: None,
//!     window_open: false,
//!     heating_allowed: true,
//! };
//! let output = store.compute(&key, &input, &params);
//! ```

pub mod debug;
pub mod distribute;
pub mod error;
pub mod flowcap;
pub mod key;
pub mod params;
pub mod persist;
pub mod plant;
pub mod postprocess;
pub mod predictor;
pub mod state;

pub use debug::DebugPayload;
pub use distribute::{distribute_valve_percent, DEFAULT_K_PCT_PER_K};
pub use error::{Result, ThermalCoreError};
pub use key::{build_group_key, build_key};
pub use params::ControllerParams;
pub use persist::{load_snapshot_json, restore, save_snapshot_json, snapshot, ScalarValue};
pub use state::{ControlStore, KeyState, ProfileSample, ResetMode, TrvProfile};

use postprocess::PostProcessInput;

/// Decimal precision applied to every rounded field of [`DebugPayload`].
const DEBUG_ROUND_DIGITS: i32 = 4;

/// Smoothing factor for the telemetry-facing `ema_slope` field. Unrelated to
/// the post-processor's own smoothing step (`§4.5` step 4); this is purely
/// an exponential filter over the caller-supplied external slope estimate.
const SLOPE_EMA_ALPHA: f64 = 0.3;

/// Controller input for one cycle of one room/TRV (spec `§3.1`).
///
/// `now` is the caller's monotonic clock reading. `compute` is otherwise a
/// pure function of `(input, params, prior state)`; injecting the clock
/// keeps it that way for tests (`§6.1`).
#[derive(Debug, Clone, Copy)]
pub struct ControllerInput {
    pub now: f64,
    pub target_temp_c: Option<f64>,
    pub current_temp_c: Option<f64>,
    pub trv_temp_c: Option<f64>,
    pub tolerance_k: f64,
    pub temp_slope_k_per_min: Option<f64>,
    pub window_open: bool,
    pub heating_allowed: bool,
}

/// Controller output for one cycle (spec `§3.4`).
#[derive(Debug, Clone)]
pub struct ControllerOutput {
    pub valve_percent: u8,
    pub flow_cap_k: f64,
    pub setpoint_eff_c: Option<f64>,
    pub debug: DebugPayload,
}

impl ControlStore {
    /// Convenience entry point: look up (or create) `key`'s state and run
    /// one control cycle against it (spec `§6.1`).
    pub fn compute(
        &mut self,
        key: &str,
        input: &ControllerInput,
        params: &ControllerParams,
    ) -> ControllerOutput {
        compute(key, input, params, self)
    }
}

/// Run one control cycle: key lookup, adaptation, prediction,
/// post-processing, flow-cap mapping, and telemetry assembly (spec `§2`'s
/// data-flow table, C1 excluded — callers derive `key` themselves via
/// [`build_key`]/[`build_group_key`] once per cycle, typically before
/// batching several TRVs' calls).
///
/// Never panics and never returns an error: malformed or missing inputs
/// degrade locally per `§7`'s error taxonomy and are visible only through
/// the returned [`DebugPayload`].
pub fn compute(
    key: &str,
    input: &ControllerInput,
    params: &ControllerParams,
    store: &mut ControlStore,
) -> ControllerOutput {
    let state = store.get_or_create(key);

    update_slope(state, input.temp_slope_k_per_min);

    if input.window_open || !input.heating_allowed {
        return compute_blocked(state, params, input);
    }

    let prev_last_percent = state.last_percent;
    let prev_sample_temp = state.last_sample_temp;
    let prev_sample_ts = state.last_sample_ts;

    let error = match (input.target_temp_c, input.current_temp_c) {
        (Some(target), Some(current)) => Some(target - current),
        _ => None,
    };
    // The predictor shortcuts to 0% without evaluating any candidate when
    // the room is overshooting past the band (spec.md §4.4 step 1); on
    // those cycles the source never reaches the adaptation step at all
    // (`_compute_predictive_percent` is only called in the non-shortcut
    // branch), so learned state must stay untouched here too.
    let will_shortcut = error.map(predictor::will_shortcut).unwrap_or(false);

    if !will_shortcut {
        if let Some(current) = input.current_temp_c {
            plant::adapt(state, params, input.now, current);
        }
    }
    let heating_phase = error.map(|e| e >= 0.0).unwrap_or(true);
    plant::refresh_blended_estimates(state, params, heating_phase);

    let outcome = match error {
        Some(err) => predictor::predict(
            params,
            err,
            state.gain_est,
            state.loss_est,
            state.last_percent,
        ),
        None => predictor::PredictorOutcome {
            percent: state.last_percent.unwrap_or(0.0),
            horizon: 0,
            eval_count: 0,
            cost: None,
            response_alpha: plant::response_alpha(params.step_seconds, params.room_time_constant_s),
            step_minutes: params.step_seconds.max(1.0) / 60.0,
            shortcut: false,
            heating_phase,
        },
    };

    let pp_input = PostProcessInput {
        now: input.now,
        target_temp_c: input.target_temp_c,
        current_temp_c: input.current_temp_c,
        trv_temp_c: input.trv_temp_c,
        tolerance_k: input.tolerance_k,
        delta_t: error,
    };
    let pp = postprocess::post_process(state, params, &pp_input, outcome.percent);

    observe_response(
        state,
        params,
        input,
        prev_last_percent,
        prev_sample_temp,
        prev_sample_ts,
    );
    // A shortcut cycle never calls plant::adapt() above, so it must not move
    // the adaptation baseline either: the next non-shortcut cycle's
    // observed_rate() needs the interval since the last real adaptation
    // sample, not since this shortcut cycle's reading.
    if !will_shortcut {
        if let Some(current) = input.current_temp_c {
            state.last_sample_temp = Some(current);
            state.last_sample_ts = input.now;
            state.last_sample_target_c = input.target_temp_c;
        }
    }

    let flow = flowcap::map_flow_cap(
        params.cap_max_k,
        pp.percent_out,
        input.target_temp_c,
        pp.delta_t,
    );

    let debug = build_debug(state, &outcome, &pp, &flow);

    ControllerOutput {
        valve_percent: pp.percent_out,
        flow_cap_k: flow.flow_cap_k,
        setpoint_eff_c: flow.setpoint_eff_c,
        debug,
    }
}

/// `window_open`/`heating_allowed=false` path (spec `§4.4` edge cases,
/// `§7`'s `BlockedHeating`): force 0%, skip adaptation, leave `gain_est`/
/// `loss_est`/dead-zone state untouched. `last_percent` and
/// `last_target_C` still advance, since those describe the emitted command
/// history rather than the learned plant/dead-zone state the invariant
/// protects.
fn compute_blocked(
    state: &mut KeyState,
    params: &ControllerParams,
    input: &ControllerInput,
) -> ControllerOutput {
    state.last_percent = Some(0.0);
    state.last_update_ts = input.now;
    if let Some(target) = input.target_temp_c {
        state.last_target_c = Some(target);
    }

    let delta_t = match (input.target_temp_c, input.current_temp_c) {
        (Some(t), Some(c)) => Some(t - c),
        _ => None,
    };
    let flow = flowcap::map_flow_cap(params.cap_max_k, 0, input.target_temp_c, delta_t);

    let outcome = predictor::PredictorOutcome {
        percent: 0.0,
        horizon: 0,
        eval_count: 0,
        cost: None,
        response_alpha: plant::response_alpha(params.step_seconds, params.room_time_constant_s),
        step_minutes: params.step_seconds.max(1.0) / 60.0,
        shortcut: false,
        heating_phase: true,
    };
    let pp = postprocess::PostProcessOutcome {
        percent_out: 0,
        raw_percent: 0.0,
        smooth_percent: 0.0,
        too_soon: false,
        target_changed: false,
        force_open: false,
        force_close: false,
        delta_t,
        trv_temp_delta: None,
        trv_time_delta_s: None,
    };
    let debug = build_debug(state, &outcome, &pp, &flow);

    ControllerOutput {
        valve_percent: 0,
        flow_cap_k: flow.flow_cap_k,
        setpoint_eff_c: flow.setpoint_eff_c,
        debug,
    }
}

fn update_slope(state: &mut KeyState, slope: Option<f64>) {
    state.ema_slope = match (state.ema_slope, slope) {
        (Some(prev), Some(s)) => Some((1.0 - SLOPE_EMA_ALPHA) * prev + SLOPE_EMA_ALPHA * s),
        (None, Some(s)) => Some(s),
        (prev, None) => prev,
    };
}

/// Feed this cycle's (previously-committed percent, observed rate) pair into
/// the advisory TRV response profiler (spec `§4.3`). Uses the percent
/// committed *before* this cycle's post-processing, since that is the
/// command whose thermal effect is reflected in the reading taken now.
fn observe_response(
    state: &mut KeyState,
    params: &ControllerParams,
    input: &ControllerInput,
    prev_last_percent: Option<f64>,
    prev_sample_temp: Option<f64>,
    prev_sample_ts: f64,
) {
    let (Some(current), Some(last_temp), Some(percent)) =
        (input.current_temp_c, prev_sample_temp, prev_last_percent)
    else {
        return;
    };
    let Some(rate) = plant::observed_rate(
        last_temp,
        prev_sample_ts,
        current,
        input.now,
        params.min_update_interval_s,
    ) else {
        return;
    };
    plant::observe_profile_sample(state, percent, rate);
}

fn build_debug(
    state: &KeyState,
    outcome: &predictor::PredictorOutcome,
    pp: &postprocess::PostProcessOutcome,
    flow: &flowcap::FlowCapOutcome,
) -> DebugPayload {
    let r = |v: f64| debug::round_for_debug(v, DEBUG_ROUND_DIGITS);
    let ro = |v: Option<f64>| debug::round_opt(v, DEBUG_ROUND_DIGITS);

    DebugPayload {
        delta_t: ro(pp.delta_t),
        raw_percent: r(pp.raw_percent),
        smooth_percent: r(pp.smooth_percent),
        percent_out: pp.percent_out,
        flow_cap_k: r(flow.flow_cap_k),
        setpoint_eff_c: ro(flow.setpoint_eff_c),
        gain: r(state.gain_est),
        loss: r(state.loss_est),
        horizon: outcome.horizon,
        eval_count: outcome.eval_count,
        cost: ro(outcome.cost),
        min_effective_percent: ro(state.min_effective_percent),
        dead_zone_hits: state.dead_zone_hits,
        trv_temp_delta: ro(pp.trv_temp_delta),
        trv_time_delta_s: ro(pp.trv_time_delta_s),
        ema_slope: ro(state.ema_slope),
        force_open: pp.force_open,
        force_close: pp.force_close,
        too_soon: pp.too_soon,
        target_changed: pp.target_changed,
        trv_profile: state.trv_profile.as_str(),
        profile_confidence: r(state.profile_confidence),
    }
}
