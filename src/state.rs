//! C2: per-key persistent state and the process-wide store (spec.md §3.3, §4.2).

use std::collections::HashMap;

/// Advisory classification of a TRV's response to a commanded percent.
///
/// Purely observational (spec.md §4.3: "The profile is advisory telemetry;
/// the predictor's numeric behaviour must not depend on it"). Never read by
/// [`crate::predictor`] or [`crate::postprocess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrvProfile {
    #[default]
    Unknown,
    Linear,
    Threshold,
    Exponential,
}

impl TrvProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Linear => "linear",
            Self::Threshold => "threshold",
            Self::Exponential => "exponential",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "linear" => Self::Linear,
            "threshold" => Self::Threshold,
            "exponential" => Self::Exponential,
            _ => Self::Unknown,
        }
    }
}

/// One (commanded_percent, observed_rate) sample feeding TRV profiling.
#[derive(Debug, Clone, Copy)]
pub struct ProfileSample {
    pub percent: f64,
    pub rate: f64,
}

/// Mode for [`ControlStore::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Clear the whole record, as if newly created.
    All,
    /// Clear only the learned dead-zone floor and its hit counter.
    DeadzoneOnly,
}

/// Per-key persistent estimator/controller state (spec.md §3.3).
#[derive(Debug, Clone)]
pub struct KeyState {
    pub last_percent: Option<f64>,
    pub last_update_ts: f64,
    pub last_hold_ts: f64,
    pub last_target_c: Option<f64>,

    pub gain_est: f64,
    pub loss_est: f64,
    pub gain_heat_est: Option<f64>,
    pub gain_cool_est: Option<f64>,
    pub loss_heat_est: Option<f64>,
    pub loss_cool_est: Option<f64>,
    pub gain_heat_samples: Vec<f64>,
    pub gain_cool_samples: Vec<f64>,
    pub loss_heat_samples: Vec<f64>,
    pub loss_cool_samples: Vec<f64>,

    pub min_effective_percent: Option<f64>,
    pub dead_zone_hits: u32,

    pub last_trv_temp: Option<f64>,
    pub last_trv_temp_ts: f64,

    pub ema_slope: Option<f64>,

    pub trv_profile: TrvProfile,
    pub profile_confidence: f64,
    pub profile_samples: Vec<ProfileSample>,

    pub is_calibration_active: bool,

    /// Previous cycle's room temperature, used only to compute the
    /// adaptation observation (`observed_rate`). Not part of spec.md §3.3's
    /// enumerated field list, but required by §4.3's "(last_temp,
    /// last_percent, dt > 0)" precondition.
    pub last_sample_temp: Option<f64>,
    pub last_sample_ts: f64,
    /// The target in effect when `last_sample_temp` was captured. Tracked
    /// separately from `last_target_c` (which a blocked cycle updates on
    /// its own cadence, independent of sampling) so phase classification in
    /// `crate::plant::adapt` always pairs the sampled interval with the
    /// target that was actually active during it.
    pub last_sample_target_c: Option<f64>,
}

impl Default for KeyState {
    fn default() -> Self {
        Self {
            last_percent: None,
            last_update_ts: 0.0,
            last_hold_ts: 0.0,
            last_target_c: None,
            gain_est: 0.1,
            loss_est: 0.01,
            gain_heat_est: None,
            gain_cool_est: None,
            loss_heat_est: None,
            loss_cool_est: None,
            gain_heat_samples: Vec::new(),
            gain_cool_samples: Vec::new(),
            loss_heat_samples: Vec::new(),
            loss_cool_samples: Vec::new(),
            min_effective_percent: None,
            dead_zone_hits: 0,
            last_trv_temp: None,
            last_trv_temp_ts: 0.0,
            ema_slope: None,
            trv_profile: TrvProfile::Unknown,
            profile_confidence: 0.0,
            profile_samples: Vec::new(),
            is_calibration_active: false,
            last_sample_temp: None,
            last_sample_ts: 0.0,
            last_sample_target_c: None,
        }
    }
}

impl KeyState {
    fn reset_deadzone(&mut self) {
        self.min_effective_percent = None;
        self.dead_zone_hits = 0;
    }
}

/// Process-wide mapping from key to per-room state (spec.md §4.2).
///
/// Single-key mutation is assumed serialized by the caller (spec.md §5); the
/// store only needs to be safe against independent keys being inserted
/// concurrently, which a host can satisfy by wrapping it in a `Mutex` or by
/// sharding if it ever runs rooms on separate threads.
#[derive(Debug, Clone, Default)]
pub struct ControlStore {
    states: HashMap<String, KeyState>,
}

impl ControlStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the state for `key`, inserting a default record if absent.
    pub fn get_or_create(&mut self, key: &str) -> &mut KeyState {
        self.states.entry(key.to_string()).or_default()
    }

    /// Look up a key's state without creating it.
    pub fn get(&self, key: &str) -> Option<&KeyState> {
        self.states.get(key)
    }

    /// Reset a key's state per `mode`. A no-op if the key has no state yet,
    /// except `All`, which still leaves no record (nothing to clear).
    pub fn reset(&mut self, key: &str, mode: ResetMode) {
        match mode {
            ResetMode::All => {
                self.states.remove(key);
            }
            ResetMode::DeadzoneOnly => {
                if let Some(state) = self.states.get_mut(key) {
                    state.reset_deadzone();
                }
            }
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.states.keys()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Push `candidate` into a bounded ring buffer, evicting the oldest entry
/// once `window` is reached.
pub(crate) fn push_bounded<T>(buf: &mut Vec<T>, candidate: T, window: usize) {
    if window == 0 {
        return;
    }
    buf.push(candidate);
    if buf.len() > window {
        buf.remove(0);
    }
}
