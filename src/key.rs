//! C1: stable, deterministic key derivation (spec.md §4.1).

/// Fallback controller id literal when none is supplied.
const UNKNOWN_CONTROLLER: &str = "bt";

/// TRV id substituted for a group-level key.
const GROUP_TRV_ID: &str = "group";

fn target_bucket(target_c: Option<f64>) -> String {
    match target_c {
        Some(t) if t.is_finite() => format!("{:.1}", (t * 2.0).round() / 2.0),
        _ => "unknown".to_string(),
    }
}

fn controller_part(controller_id: &str) -> &str {
    if controller_id.is_empty() {
        UNKNOWN_CONTROLLER
    } else {
        controller_id
    }
}

/// Build a per-TRV state key: `"{controller_id}:{trv_id}:t{bucket}"`.
pub fn build_key(controller_id: &str, trv_id: &str, target_c: Option<f64>) -> String {
    format!(
        "{}:{}:t{}",
        controller_part(controller_id),
        trv_id,
        target_bucket(target_c)
    )
}

/// Build a group-level state key, substituting `group` for the TRV id.
pub fn build_group_key(controller_id: &str, target_c: Option<f64>) -> String {
    build_key(controller_id, GROUP_TRV_ID, target_c)
}
