//! Controller configuration (spec.md §3.2), immutable per control cycle.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ThermalCoreError};

/// Immutable per-cycle configuration for [`crate::compute`].
///
/// Defaults are reconciled from the two `MpcParams` dataclasses in the
/// original Python source (`utils/mpc.py` is preferred where they diverge —
/// see `DESIGN.md`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerParams {
    // --- Horizon & time step ---
    pub horizon_steps: u32,
    pub step_seconds: f64,
    pub room_time_constant_s: f64,
    pub horizon_min_steps: u32,
    pub horizon_max_steps: u32,
    pub small_error_threshold_k: f64,
    pub large_error_threshold_k: f64,

    // --- Plant bounds (°C/min) ---
    pub gain_min: f64,
    pub gain_max: f64,
    pub loss_min: f64,
    pub loss_max: f64,
    pub deadzone_min: f64,
    pub deadzone_max: f64,

    // --- Adaptation ---
    pub adapt_enabled: bool,
    pub adapt_alpha: f64,
    pub adapt_window: usize,
    pub adapt_outlier_sigma: f64,

    // --- Cost weights ---
    pub control_penalty: f64,
    pub change_penalty: f64,

    // --- Smoothing / rate limiting ---
    pub hysteresis_pts: f64,
    pub min_update_interval_s: f64,
    pub min_percent_hold_time_s: f64,
    pub du_max_pct: f64,

    // --- Dead-zone learning ---
    pub dz_threshold_pct: f64,
    pub dz_temp_delta_k: f64,
    pub dz_time_s: f64,
    pub dz_hits_required: u32,
    pub dz_raise_pct: f64,
    pub dz_decay_pct: f64,

    // --- Overshoot band & flow-cap ---
    pub band_far_k: f64,
    pub cap_max_k: f64,

    // --- Distribution ---
    pub k_pct_per_k: f64,
}

impl Default for ControllerParams {
    fn default() -> Self {
        Self {
            horizon_steps: 12,
            step_seconds: 300.0,
            room_time_constant_s: 600.0,
            horizon_min_steps: 6,
            horizon_max_steps: 36,
            small_error_threshold_k: 0.15,
            large_error_threshold_k: 1.0,

            gain_min: 0.005,
            gain_max: 0.5,
            loss_min: 0.0,
            loss_max: 0.05,
            deadzone_min: 0.0,
            deadzone_max: 100.0,

            adapt_enabled: true,
            adapt_alpha: 0.1,
            adapt_window: 5,
            adapt_outlier_sigma: 2.5,

            control_penalty: 0.0003,
            change_penalty: 0.005,

            hysteresis_pts: 0.5,
            min_update_interval_s: 60.0,
            min_percent_hold_time_s: 0.0,
            du_max_pct: 100.0,

            dz_threshold_pct: 20.0,
            dz_temp_delta_k: 0.1,
            dz_time_s: 300.0,
            dz_hits_required: 3,
            dz_raise_pct: 2.0,
            dz_decay_pct: 1.0,

            band_far_k: 0.3,
            cap_max_k: 0.8,

            k_pct_per_k: 8.0,
        }
    }
}

impl ControllerParams {
    /// Check the structural bounds a malformed config could violate.
    ///
    /// Never called from [`crate::compute`] — a caller validates once at
    /// startup, not on every cycle.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.horizon_steps == 0 {
            problems.push("horizon_steps must be >= 1");
        }
        if self.step_seconds <= 0.0 {
            problems.push("step_seconds must be > 0");
        }
        if self.room_time_constant_s <= 0.0 {
            problems.push("room_time_constant_s must be > 0");
        }
        if self.gain_min > self.gain_max {
            problems.push("gain_min must be <= gain_max");
        }
        if self.loss_min > self.loss_max {
            problems.push("loss_min must be <= loss_max");
        }
        if self.deadzone_min > self.deadzone_max {
            problems.push("deadzone_min must be <= deadzone_max");
        }
        if !(0.0..=1.0).contains(&self.adapt_alpha) {
            problems.push("adapt_alpha must be within [0, 1]");
        }
        if self.adapt_outlier_sigma < 0.0 {
            problems.push("adapt_outlier_sigma must be >= 0");
        }
        if self.control_penalty < 0.0 {
            problems.push("control_penalty must be >= 0");
        }
        if self.change_penalty < 0.0 {
            problems.push("change_penalty must be >= 0");
        }
        if self.hysteresis_pts < 0.0 {
            problems.push("hysteresis_pts must be >= 0");
        }
        if self.min_update_interval_s < 0.0 {
            problems.push("min_update_interval_s must be >= 0");
        }
        if self.du_max_pct < 0.0 {
            problems.push("du_max_pct must be >= 0");
        }
        if self.cap_max_k < 0.0 {
            problems.push("cap_max_k must be >= 0");
        }
        if self.band_far_k < 0.0 {
            problems.push("band_far_k must be >= 0");
        }
        if self.horizon_min_steps == 0 {
            problems.push("horizon_min_steps must be >= 1");
        }
        if self.horizon_min_steps > self.horizon_max_steps {
            problems.push("horizon_min_steps must be <= horizon_max_steps");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ThermalCoreError::InvalidParams(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        ControllerParams::default().validate().unwrap();
    }

    #[test]
    fn rejects_inverted_gain_bounds() {
        let mut p = ControllerParams::default();
        p.gain_min = 1.0;
        p.gain_max = 0.1;
        assert!(p.validate().is_err());
    }

    #[test]
    fn rejects_zero_horizon() {
        let mut p = ControllerParams::default();
        p.horizon_steps = 0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_adapt_alpha() {
        let mut p = ControllerParams::default();
        p.adapt_alpha = 1.5;
        assert!(p.validate().is_err());
    }

    #[test]
    fn rejects_negative_band_far_k() {
        let mut p = ControllerParams::default();
        p.band_far_k = -0.3;
        assert!(p.validate().is_err());
    }
}
