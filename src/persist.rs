//! C9: persistence bridge — serialise/restore per-key state to a flat
//! dictionary of primitive scalars, plus optional JSON file I/O with
//! directory creation on save.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ThermalCoreError};
use crate::state::{ControlStore, KeyState, TrvProfile};

/// A single persisted scalar. Untagged so the JSON on disk reads as plain
/// numbers/strings/bools rather than `{"Float": 1.23}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Float(f64),
    Int(i64),
    Str(String),
    Bool(bool),
}

impl ScalarValue {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Self::Str(s) => s.parse().ok(),
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) => Some(*v as i64),
            Self::Bool(v) => Some(if *v { 1 } else { 0 }),
            Self::Str(s) => s.parse().ok(),
        }
    }

    fn as_str(&self) -> Option<String> {
        match self {
            Self::Str(s) => Some(s.clone()),
            _ => None,
        }
    }
}

type RecordMap = HashMap<String, ScalarValue>;
type SnapshotMap = HashMap<String, RecordMap>;

fn insert_f64(record: &mut RecordMap, field: &str, value: Option<f64>) {
    if let Some(v) = value {
        record.insert(field.to_string(), ScalarValue::Float(v));
    }
}

/// Serialise one key's state into its exported field subset (spec.md
/// §3.3's enumerated list plus the phase-specific gain/loss fields).
fn serialize_state(state: &KeyState) -> RecordMap {
    let mut record = RecordMap::new();
    insert_f64(&mut record, "last_percent", state.last_percent);
    insert_f64(&mut record, "last_target_C", state.last_target_c);
    insert_f64(&mut record, "ema_slope", state.ema_slope);
    insert_f64(&mut record, "gain_est", Some(state.gain_est));
    insert_f64(&mut record, "loss_est", Some(state.loss_est));
    insert_f64(&mut record, "gain_heat_est", state.gain_heat_est);
    insert_f64(&mut record, "gain_cool_est", state.gain_cool_est);
    insert_f64(&mut record, "loss_heat_est", state.loss_heat_est);
    insert_f64(&mut record, "loss_cool_est", state.loss_cool_est);
    insert_f64(&mut record, "last_trv_temp", state.last_trv_temp);
    insert_f64(
        &mut record,
        "min_effective_percent",
        state.min_effective_percent,
    );
    record.insert(
        "dead_zone_hits".to_string(),
        ScalarValue::Int(state.dead_zone_hits as i64),
    );
    record.insert(
        "trv_profile".to_string(),
        ScalarValue::Str(state.trv_profile.as_str().to_string()),
    );
    insert_f64(
        &mut record,
        "profile_confidence",
        Some(state.profile_confidence),
    );
    record
}

/// Coerce a restored field back onto `state`, per the field's declared
/// type. Malformed entries are dropped silently (spec.md §7's
/// `RestoreMalformed` — "Drop that field only; keep the record").
fn apply_field(state: &mut KeyState, field: &str, value: &ScalarValue) {
    match field {
        "last_percent" => state.last_percent = value.as_f64(),
        "last_target_C" => state.last_target_c = value.as_f64(),
        "ema_slope" => state.ema_slope = value.as_f64(),
        "gain_est" => {
            if let Some(v) = value.as_f64() {
                state.gain_est = v;
            }
        }
        "loss_est" => {
            if let Some(v) = value.as_f64() {
                state.loss_est = v;
            }
        }
        "gain_heat_est" => state.gain_heat_est = value.as_f64(),
        "gain_cool_est" => state.gain_cool_est = value.as_f64(),
        "loss_heat_est" => state.loss_heat_est = value.as_f64(),
        "loss_cool_est" => state.loss_cool_est = value.as_f64(),
        "last_trv_temp" => state.last_trv_temp = value.as_f64(),
        "min_effective_percent" => state.min_effective_percent = value.as_f64(),
        "dead_zone_hits" => {
            if let Some(v) = value.as_i64() {
                state.dead_zone_hits = v.max(0) as u32;
            }
        }
        "trv_profile" => {
            if let Some(s) = value.as_str() {
                state.trv_profile = TrvProfile::parse(&s);
            }
        }
        "profile_confidence" => {
            if let Some(v) = value.as_f64() {
                state.profile_confidence = v;
            }
        }
        _ => {
            log::debug!("restore: ignoring unknown field '{field}'");
        }
    }
}

/// Export a serialisable snapshot of the store, optionally restricted to
/// keys starting with `prefix`. Restore buffers are never re-created
/// (spec.md §4.9: "Restore must... not invent samples").
pub fn snapshot(store: &ControlStore, prefix: Option<&str>) -> SnapshotMap {
    let mut out = SnapshotMap::new();
    for key in store.keys() {
        if let Some(p) = prefix {
            if !key.starts_with(p) {
                continue;
            }
        }
        let state = store.get(key).expect("key came from store.keys()");
        let record = serialize_state(state);
        if !record.is_empty() {
            out.insert(key.clone(), record);
        }
    }
    out
}

/// Hydrate states from a previously exported snapshot. Idempotent: applying
/// the same snapshot twice leaves the store in the same state.
pub fn restore(store: &mut ControlStore, snapshot: &SnapshotMap, prefix: Option<&str>) {
    for (key, record) in snapshot {
        if let Some(p) = prefix {
            if !key.starts_with(p) {
                continue;
            }
        }
        let state = store.get_or_create(key);
        for (field, value) in record {
            apply_field(state, field, value);
        }
    }
}

/// Write a snapshot to `path` as pretty JSON, creating the parent directory
/// if needed (teacher precedent: `State::save`).
pub fn save_snapshot_json(store: &ControlStore, path: &Path, prefix: Option<&str>) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir).map_err(|source| ThermalCoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
    }
    let data = snapshot(store, prefix);
    let json = serde_json::to_string_pretty(&data)?;
    fs::write(path, json).map_err(|source| ThermalCoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a previously-saved JSON snapshot and restore it into `store`.
pub fn load_snapshot_json(
    store: &mut ControlStore,
    path: &Path,
    prefix: Option<&str>,
) -> Result<()> {
    let data = fs::read_to_string(path).map_err(|source| ThermalCoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: SnapshotMap = serde_json::from_str(&data)?;
    restore(store, &parsed, prefix);
    Ok(())
}
